//! Unsecured application data crosses the bus untouched, in both
//! directions, with no session required.

use crate::infra::*;

#[test]
fn uad_from_client_reaches_the_server_verbatim() {
    init_logging();
    let clock = BusClock::start();
    let mut server = server(&clock);
    let alice = alice(&clock);

    // Group 3 is not even configured; UAD does not care.
    let pdu = alice.build_unsecured(b"hello\0", 3).unwrap();
    let received = server.process_received(pdu.as_bytes(), 0xABC).unwrap();

    assert!(received.reaction.is_none());
    let sdu = received.sdu.unwrap();
    assert_eq!(sdu.data(), b"hello\0");
    assert_eq!(sdu.gid, 3);
    assert_eq!(sdu.sid, ALICE);
    assert_eq!(sdu.can_id, 0xABC);
    assert!(sdu.is_for_user);
    assert!(!sdu.was_secured);
}

#[test]
fn uad_from_the_server_reaches_clients() {
    let clock = BusClock::start();
    let server = server(&clock);
    let mut bob = bob(&clock);

    let pdu = server.build_unsecured(b"broadcast", 0).unwrap();
    let received = bob.process_received(pdu.as_bytes(), 0x1).unwrap();
    let sdu = received.sdu.unwrap();
    assert_eq!(sdu.data(), b"broadcast");
    assert_eq!(sdu.sid, 0);
    assert!(!sdu.was_secured);
}

#[test]
fn uad_between_clients_needs_no_server() {
    let clock = BusClock::start();
    let alice = alice(&clock);
    let mut bob = bob(&clock);

    let pdu = alice.build_unsecured(b"hi bob", 0).unwrap();
    let received = bob.process_received(pdu.as_bytes(), 0x2).unwrap();
    assert_eq!(received.sdu.unwrap().data(), b"hi bob");
}

#[test]
fn empty_uad_is_valid() {
    let clock = BusClock::start();
    let mut server = server(&clock);
    let alice = alice(&clock);

    let pdu = alice.build_unsecured(b"", 0).unwrap();
    let received = server.process_received(pdu.as_bytes(), 0).unwrap();
    let sdu = received.sdu.unwrap();
    assert_eq!(sdu.data(), b"");
    assert!(sdu.is_for_user);
}
