//! Automatic session expiry: the counter-nonce upper limit tips the Server
//! into a renewal, announced on the very message that crossed the line.

use palisade_core::{Pty, ServerGroupConfig};

use crate::infra::*;

fn tight_groups() -> Vec<ServerGroupConfig> {
    let mut group1 = server_group(1, 0b11);
    group1.ctrnonce_upper_limit = 20;
    vec![server_group(0, 0xFFFF_FFFF), group1]
}

#[test]
fn nonce_expiry_triggers_renewal_and_clients_follow() {
    init_logging();
    let clock = BusClock::start();
    let mut server = server_with_groups(&clock, tight_groups());
    let mut alice = client(&clock, ALICE, 2);
    establish(&mut server, &mut alice, 1);

    // Nonces 0..19 push the Server's counter to its limit of 20; the
    // message that crosses it is still accepted and answered with a REN.
    let mut ren = None;
    for step in 0..20 {
        clock.advance(10);
        let pdu = alice.build_secured_fd(b"load", 1).unwrap();
        let received = server.process_received(pdu.as_bytes(), 0).unwrap();
        assert_eq!(received.sdu.unwrap().data(), b"load");
        match received.reaction {
            Some(pdu) => {
                assert_eq!(step, 19, "renewal must start exactly at the limit");
                ren = Some(pdu);
            }
            None => assert!(step < 19),
        }
    }
    let ren = ren.expect("the server never renewed");
    assert_eq!(ren.as_bytes()[2], u8::from(Pty::Ren));

    // Alice follows the notification into the new session.
    let req = reaction_of(alice.process_received(ren.as_bytes(), 0).unwrap());
    let res = reaction_of(server.process_received(req.as_bytes(), 0).unwrap());
    alice.process_received(res.as_bytes(), 0).unwrap();

    // The new session runs from counter zero with a fresh key.
    clock.advance(10);
    let fresh = server.build_secured_fd(b"fresh session", 1).unwrap();
    let at_alice = alice.process_received(fresh.as_bytes(), 0).unwrap();
    assert_eq!(at_alice.sdu.unwrap().data(), b"fresh session");

    clock.advance(10);
    let reply = alice.build_secured_fd(b"caught up", 1).unwrap();
    let at_server = server.process_received(reply.as_bytes(), 0).unwrap();
    assert_eq!(at_server.sdu.unwrap().data(), b"caught up");
    assert!(at_server.reaction.is_none());
}
