//! The REQ/RES handshake and secured data exchange over the simulated bus.

use palisade_core::Error;

use crate::infra::*;

#[test]
fn handshake_then_secured_data_both_ways() {
    init_logging();
    let clock = BusClock::start();
    let mut server = server(&clock);
    let mut alice = alice(&clock);

    // REQ -> RES, 3 header bytes + 44 payload bytes.
    let req = alice.build_request(1).unwrap();
    let answer = server.process_received(req.as_bytes(), 0).unwrap();
    assert!(answer.sdu.is_none());
    let res = reaction_of(answer);
    assert_eq!(res.len(), 3 + 44);
    alice.process_received(res.as_bytes(), 0).unwrap();

    // Alice -> Server secured.
    clock.advance(10);
    let secured = alice.build_secured_fd(b"secret\0", 1).unwrap();
    let received = server.process_received(secured.as_bytes(), 0x77).unwrap();
    assert!(received.reaction.is_none());
    let sdu = received.sdu.unwrap();
    assert_eq!(sdu.data(), b"secret\0");
    assert_eq!(sdu.sid, ALICE);
    assert!(sdu.was_secured);

    // Server -> Alice secured.
    clock.advance(10);
    let secured = server.build_secured_fd(b"ack", 1).unwrap();
    let received = alice.process_received(secured.as_bytes(), 0x78).unwrap();
    assert_eq!(received.sdu.unwrap().data(), b"ack");
}

#[test]
fn non_member_request_is_rejected_without_a_response() {
    let clock = BusClock::start();
    let mut server = server(&clock);
    let mut alice = alice(&clock);

    // Group 2 contains only Bob.
    let req = alice.build_request(2).unwrap();
    let err = server.process_received(req.as_bytes(), 0).unwrap_err();
    assert_eq!(err, Error::NotInGroup);
    assert!(err.is_security_warning());

    // Without a Client holding the STK the Server cannot transmit secured.
    assert_eq!(
        server.build_secured_fd(b"x", 2).unwrap_err(),
        Error::NoPotentialReceiver
    );
}

#[test]
fn client_to_client_secured_data() {
    let clock = BusClock::start();
    let mut server = server(&clock);
    let mut alice = alice(&clock);
    let mut bob = bob(&clock);

    establish(&mut server, &mut alice, 0);
    clock.advance(5);
    establish(&mut server, &mut bob, 0);

    // Alice's nonce is at least as fresh as the one Bob learned from his
    // Response, so Bob accepts directly.
    clock.advance(5);
    let secured = alice.build_secured_fd(b"psst, bob", 0).unwrap();
    let at_bob = bob.process_received(secured.as_bytes(), 0).unwrap();
    assert_eq!(at_bob.sdu.unwrap().data(), b"psst, bob");
    let at_server = server.process_received(secured.as_bytes(), 0).unwrap();
    assert_eq!(at_server.sdu.unwrap().data(), b"psst, bob");
}

#[test]
fn late_response_is_flagged_as_timeout() {
    let clock = BusClock::start();
    let mut server = server(&clock);
    let mut alice = alice(&clock);

    let req = alice.build_request(0).unwrap();
    let res = reaction_of(server.process_received(req.as_bytes(), 0).unwrap());

    clock.advance(REQ_TIMEOUT_MS + 1);
    assert_eq!(
        alice.process_received(res.as_bytes(), 0).unwrap_err(),
        Error::ResponseTimeout
    );
    // The handshake can be restarted afterwards.
    let req = alice.build_request(0).unwrap();
    let res = reaction_of(server.process_received(req.as_bytes(), 0).unwrap());
    alice.process_received(res.as_bytes(), 0).unwrap();
}

#[test]
fn maximal_sdu_fills_the_frame_exactly() {
    let clock = BusClock::start();
    let mut server = server(&clock);
    let mut alice = alice(&clock);
    establish(&mut server, &mut alice, 0);

    // Header type 0: 64 - 3 header - 12 metadata = 49 plaintext bytes.
    let payload = [0x5Au8; 49];
    clock.advance(5);
    let pdu = alice.build_secured_fd(&payload, 0).unwrap();
    assert_eq!(pdu.len(), 64);
    let received = server.process_received(pdu.as_bytes(), 0).unwrap();
    assert_eq!(received.sdu.unwrap().data(), &payload);

    assert_eq!(
        alice.build_secured_fd(&[0u8; 50], 0).unwrap_err(),
        Error::TooLongSdu
    );
}

#[test]
fn secured_data_before_handshake_is_refused_locally() {
    let clock = BusClock::start();
    let mut alice = alice(&clock);
    assert_eq!(
        alice.build_secured_fd(b"data", 0).unwrap_err(),
        Error::SessionNotEstablished
    );
}

#[test]
fn response_meant_for_alice_is_ignored_by_bob() {
    let clock = BusClock::start();
    let mut server = server(&clock);
    let mut alice = alice(&clock);
    let mut bob = bob(&clock);

    let req = alice.build_request(0).unwrap();
    let res = reaction_of(server.process_received(req.as_bytes(), 0).unwrap());

    // Bob sees the RES on the bus too; it is not addressed to him.
    assert_eq!(
        bob.process_received(res.as_bytes(), 0).unwrap_err(),
        Error::MsgIgnored
    );
    // Alice still completes.
    alice.process_received(res.as_bytes(), 0).unwrap();
}
