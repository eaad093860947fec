//! Session renewal: the REN notification, the dual-key window in which the
//! previous session still decrypts, and the window's end.

use palisade_core::{Error, Pty};

use crate::infra::*;

#[test]
fn forced_renewal_bridges_old_and_new_sessions() {
    init_logging();
    let clock = BusClock::start();
    let mut server = server(&clock);
    let mut alice = alice(&clock);
    let mut bob = bob(&clock);

    establish(&mut server, &mut alice, 0);
    clock.advance(10);
    establish(&mut server, &mut bob, 0);

    // Some traffic so every party's nonce sits at 10.
    for _ in 0..10 {
        clock.advance(10);
        let pdu = alice.build_secured_fd(b"chatter", 0).unwrap();
        server.process_received(pdu.as_bytes(), 0).unwrap();
        bob.process_received(pdu.as_bytes(), 0).unwrap();
    }

    // The Server starts a renewal and notifies.
    clock.advance(10);
    let ren = server.force_session_renewal(0).unwrap();
    assert_eq!(ren.as_bytes()[2], u8::from(Pty::Ren));

    // Alice reacts with a REQ and completes the new handshake; Bob misses
    // the REN and stays on the old session.
    let outcome = alice.process_received(ren.as_bytes(), 0).unwrap();
    let req = outcome.reaction.expect("REN must trigger a REQ");
    let res = reaction_of(server.process_received(req.as_bytes(), 0).unwrap());
    alice.process_received(res.as_bytes(), 0).unwrap();

    // Bob's old-session traffic still decrypts everywhere during the
    // renewal window.
    clock.advance(10);
    let from_bob = bob.build_secured_fd(b"old key still fine", 0).unwrap();
    let at_server = server.process_received(from_bob.as_bytes(), 0).unwrap();
    assert_eq!(at_server.sdu.unwrap().data(), b"old key still fine");
    let at_alice = alice.process_received(from_bob.as_bytes(), 0).unwrap();
    let sdu = at_alice.sdu.unwrap();
    assert_eq!(sdu.data(), b"old key still fine");
    assert!(sdu.was_secured);

    // New-session traffic flows in parallel.
    clock.advance(10);
    let fresh = server.build_secured_fd(b"new key", 0).unwrap();
    let at_alice = alice.process_received(fresh.as_bytes(), 0).unwrap();
    assert_eq!(at_alice.sdu.unwrap().data(), b"new key");
}

#[test]
fn renewal_window_closes_after_enough_new_messages() {
    let clock = BusClock::start();
    let mut server = server(&clock);
    let mut alice = alice(&clock);
    let mut bob = bob(&clock);

    establish(&mut server, &mut alice, 0);
    clock.advance(10);
    establish(&mut server, &mut bob, 0);
    // Enough traffic that the old session's nonce (20) sits well clear of
    // the new session's early nonces.
    for _ in 0..20 {
        clock.advance(10);
        let pdu = alice.build_secured_fd(b"chatter", 0).unwrap();
        server.process_received(pdu.as_bytes(), 0).unwrap();
        bob.process_received(pdu.as_bytes(), 0).unwrap();
    }

    clock.advance(10);
    let ren = server.force_session_renewal(0).unwrap();
    let req = reaction_of(alice.process_received(ren.as_bytes(), 0).unwrap());
    let res = reaction_of(server.process_received(req.as_bytes(), 0).unwrap());
    alice.process_received(res.as_bytes(), 0).unwrap();

    // Drive Alice's new-session nonce to 2 * max_ctrnonce_delay.
    for _ in 0..(2 * MAX_DELAY as usize) {
        clock.advance(10);
        let pdu = server.build_secured_fd(b"n", 0).unwrap();
        alice.process_received(pdu.as_bytes(), 0).unwrap();
    }

    // Bob is still on the old session; past the window his messages no
    // longer authenticate for Alice.
    clock.advance(10);
    let stale = bob.build_secured_fd(b"too late", 0).unwrap();
    assert_eq!(
        alice.process_received(stale.as_bytes(), 0).unwrap_err(),
        Error::InvalidTag
    );

    // Bob recovers by requesting the new session himself.
    let req = bob.build_request(0).unwrap();
    let res = reaction_of(server.process_received(req.as_bytes(), 0).unwrap());
    bob.process_received(res.as_bytes(), 0).unwrap();
    clock.advance(10);
    let recovered = bob.build_secured_fd(b"back again", 0).unwrap();
    let at_alice = alice.process_received(recovered.as_bytes(), 0).unwrap();
    assert_eq!(at_alice.sdu.unwrap().data(), b"back again");
}
