//! Counter-nonce freshness across the bus: replays near the edge of the
//! adaptive tolerance window, and the shrinking of that window with
//! silence.

use palisade_core::Error;

use crate::infra::*;

#[test]
fn old_nonces_are_rejected_and_the_window_shrinks_with_silence() {
    init_logging();
    let clock = BusClock::start();
    let mut server = server(&clock);
    let mut alice = alice(&clock);
    establish(&mut server, &mut alice, 0);

    // Alice sends nine secured messages, nonces 0..9, 100 ms apart.
    let mut sent = Vec::new();
    for _ in 0..9 {
        clock.advance(100);
        let pdu = alice.build_secured_fd(b"tick", 0).unwrap();
        server.process_received(pdu.as_bytes(), 0).unwrap();
        sent.push(pdu);
    }
    // Server-side nonce is now 9.

    // A replay from far behind the window (nonce 3, tolerance 4): too old.
    clock.advance(100);
    assert_eq!(
        server.process_received(sent[3].as_bytes(), 0).unwrap_err(),
        Error::OldMessage
    );

    // A delayed frame still inside the window (nonce 7 >= 9 - 4) passes.
    let received = server.process_received(sent[7].as_bytes(), 0).unwrap();
    assert_eq!(received.sdu.unwrap().data(), b"tick");
    // Acceptance moved the server nonce to 10 (max kept, then one past).

    // After a full silence interval the tolerance collapses to zero, so
    // even the most recent nonce is now too old.
    clock.advance(u32::from(MAX_SILENCE_MS));
    assert_eq!(
        server.process_received(sent[8].as_bytes(), 0).unwrap_err(),
        Error::OldMessage
    );

    // Alice herself fell behind (her next nonce is 9 < 10); the repair is
    // simply sending again until she catches up.
    let lagging = alice.build_secured_fd(b"late", 0).unwrap();
    assert_eq!(
        server.process_received(lagging.as_bytes(), 0).unwrap_err(),
        Error::OldMessage
    );
    let caught_up = alice.build_secured_fd(b"ok", 0).unwrap();
    let received = server.process_received(caught_up.as_bytes(), 0).unwrap();
    assert_eq!(received.sdu.unwrap().data(), b"ok");
}

#[test]
fn overflown_nonce_never_passes() {
    let clock = BusClock::start();
    let mut server = server(&clock);
    let mut alice = alice(&clock);
    establish(&mut server, &mut alice, 0);

    // Hand-corrupt a secured frame to carry the expiry nonce value.
    let pdu = alice.build_secured_fd(b"x", 0).unwrap();
    let mut bytes = pdu.as_bytes().to_vec();
    bytes[3] = 0xFF;
    bytes[4] = 0xFF;
    bytes[5] = 0xFF;
    assert_eq!(
        server.process_received(&bytes, 0).unwrap_err(),
        Error::ReceivedOverflownNonce
    );
}
