//! Both parties bootstrapped from binary configuration files, then talking.

use std::path::PathBuf;

use palisade_core::{ClientCtx, Error, ServerCtx};

use crate::infra::*;

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("palisade-interop-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn server_file() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"HZLs\0");
    bytes.extend_from_slice(&[2, 2, 0]); // groups, clients, header type
    for (sid, ltk) in [(ALICE, ALICE_LTK), (BOB, BOB_LTK)] {
        bytes.push(sid);
        bytes.extend_from_slice(&ltk);
    }
    for gid in 0..2u8 {
        bytes.extend_from_slice(&MAX_DELAY.to_le_bytes());
        bytes.extend_from_slice(&0x00FF_0000u32.to_le_bytes());
        bytes.extend_from_slice(&3_600_000u32.to_le_bytes());
        bytes.extend_from_slice(&5_000u32.to_le_bytes());
        bytes.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        bytes.extend_from_slice(&MAX_SILENCE_MS.to_le_bytes());
        bytes.push(gid);
        bytes.push(0);
    }
    bytes
}

fn client_file(sid: u8, ltk: &[u8; 16]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"HZLc\0");
    bytes.extend_from_slice(&REQ_TIMEOUT_MS.to_le_bytes());
    bytes.extend_from_slice(ltk);
    bytes.extend_from_slice(&[sid, 0, 2]); // sid, header type, groups
    for gid in 0..2u8 {
        bytes.extend_from_slice(&MAX_DELAY.to_le_bytes());
        bytes.extend_from_slice(&30_000u32.to_le_bytes());
        bytes.extend_from_slice(&MAX_SILENCE_MS.to_le_bytes());
        bytes.push(gid);
        bytes.push(0);
    }
    bytes
}

#[test]
fn parties_loaded_from_files_interoperate() {
    let dir = temp_dir("ok");
    let server_path = dir.join("server.hzl");
    let alice_path = dir.join("alice.hzl");
    std::fs::write(&server_path, server_file()).unwrap();
    std::fs::write(&alice_path, client_file(ALICE, &ALICE_LTK)).unwrap();

    let clock = BusClock::start();
    let mut server = ServerCtx::from_file(&server_path, io(&clock, 0x10)).unwrap();
    let mut alice = ClientCtx::from_file(&alice_path, io(&clock, 0x41)).unwrap();

    establish(&mut server, &mut alice, 0);
    clock.advance(10);
    let pdu = alice.build_secured_fd(b"from file config", 0).unwrap();
    let received = server.process_received(pdu.as_bytes(), 0).unwrap();
    assert_eq!(received.sdu.unwrap().data(), b"from file config");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn corrupt_files_are_rejected() {
    let dir = temp_dir("bad");
    let clock = BusClock::start();

    let truncated = dir.join("short.hzl");
    std::fs::write(&truncated, &server_file()[..20]).unwrap();
    assert_eq!(
        ServerCtx::from_file(&truncated, io(&clock, 1)).unwrap_err(),
        Error::UnexpectedEof
    );

    let wrong_magic = dir.join("magic.hzl");
    let mut bytes = client_file(ALICE, &ALICE_LTK);
    bytes[0] = b'X';
    std::fs::write(&wrong_magic, bytes).unwrap();
    assert_eq!(
        ClientCtx::from_file(&wrong_magic, io(&clock, 1)).unwrap_err(),
        Error::InvalidFileMagicNumber
    );

    let missing = dir.join("does-not-exist.hzl");
    assert_eq!(
        ServerCtx::from_file(&missing, io(&clock, 1)).unwrap_err(),
        Error::CannotOpenConfigFile
    );

    // A file that parses but fails validation: zero LTK.
    let zero_ltk = dir.join("zero-ltk.hzl");
    std::fs::write(&zero_ltk, client_file(ALICE, &[0; 16])).unwrap();
    assert_eq!(
        ClientCtx::from_file(&zero_ltk, io(&clock, 1)).unwrap_err(),
        Error::LtkIsAllZeros
    );

    let _ = std::fs::remove_dir_all(&dir);
}
