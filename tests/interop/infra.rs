//! Shared fixtures: deterministic collaborators and a two-client bus
//! (Alice SID 1, Bob SID 2, Server SID 0, header type 0).

use std::cell::Cell;
use std::rc::Rc;

use palisade_core::io::{Clock, Io, Trng};
use palisade_core::{
    ClientConfig, ClientCtx, ClientGroupConfig, Error, Pdu, ServerClientConfig, ServerConfig,
    ServerCtx, ServerGroupConfig, Timestamp,
};

pub const ALICE: u8 = 1;
pub const BOB: u8 = 2;
pub const ALICE_LTK: [u8; 16] = [0xA1; 16];
pub const BOB_LTK: [u8; 16] = [0xB2; 16];

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Deterministic TRNG: a walking byte pattern, never all-zero.
pub struct StepTrng {
    next: u8,
}

impl StepTrng {
    pub fn new(seed: u8) -> Self {
        Self { next: seed.max(1) }
    }
}

impl Trng for StepTrng {
    fn fill(&mut self, out: &mut [u8]) -> Result<(), Error> {
        for byte in out.iter_mut() {
            *byte = self.next;
            self.next = self.next.wrapping_add(1).max(1);
        }
        Ok(())
    }
}

/// One clock shared by every party on the simulated bus.
#[derive(Clone)]
pub struct BusClock(Rc<Cell<Timestamp>>);

impl BusClock {
    pub fn start() -> Self {
        Self(Rc::new(Cell::new(1_000)))
    }

    pub fn advance(&self, millis: u32) {
        self.0.set(self.0.get().wrapping_add(millis));
    }
}

impl Clock for BusClock {
    fn now(&mut self) -> Result<Timestamp, Error> {
        Ok(self.0.get())
    }
}

pub fn io(clock: &BusClock, trng_seed: u8) -> Io {
    Io {
        trng: Box::new(StepTrng::new(trng_seed)),
        clock: Box::new(clock.clone()),
    }
}

// ── Configurations ────────────────────────────────────────────────────────

pub const MAX_DELAY: u32 = 4;
pub const MAX_SILENCE_MS: u16 = 5_000;
pub const REQ_TIMEOUT_MS: u32 = 5_000;

pub fn server_group(gid: u8, members_bitmap: u32) -> ServerGroupConfig {
    ServerGroupConfig {
        max_ctrnonce_delay: MAX_DELAY,
        ctrnonce_upper_limit: 0x00FF_0000,
        session_duration_ms: 3_600_000,
        delay_between_ren_ms: 5_000,
        members_bitmap,
        max_silence_ms: MAX_SILENCE_MS,
        gid,
    }
}

pub fn client_group(gid: u8) -> ClientGroupConfig {
    ClientGroupConfig {
        max_ctrnonce_delay: MAX_DELAY,
        session_renewal_duration_ms: 30_000,
        max_silence_ms: MAX_SILENCE_MS,
        gid,
    }
}

/// Groups: 0 broadcast (everyone), 1 Alice+Bob, 2 Bob only.
pub fn server(clock: &BusClock) -> ServerCtx {
    server_with_groups(
        clock,
        vec![
            server_group(0, 0xFFFF_FFFF),
            server_group(1, 0b11),
            server_group(2, 0b10),
        ],
    )
}

pub fn server_with_groups(clock: &BusClock, groups: Vec<ServerGroupConfig>) -> ServerCtx {
    ServerCtx::init(
        ServerConfig {
            num_groups: groups.len() as u8,
            num_clients: 2,
            header_type: 0,
        },
        vec![
            ServerClientConfig { sid: ALICE, ltk: ALICE_LTK },
            ServerClientConfig { sid: BOB, ltk: BOB_LTK },
        ],
        groups,
        io(clock, 0x10),
    )
    .unwrap()
}

pub fn client(clock: &BusClock, sid: u8, num_groups: u8) -> ClientCtx {
    let ltk = if sid == ALICE { ALICE_LTK } else { BOB_LTK };
    ClientCtx::init(
        ClientConfig {
            timeout_req_to_res_ms: REQ_TIMEOUT_MS,
            ltk,
            sid,
            header_type: 0,
            num_groups,
        },
        (0..num_groups).map(client_group).collect(),
        io(clock, 0x40 + sid),
    )
    .unwrap()
}

pub fn alice(clock: &BusClock) -> ClientCtx {
    client(clock, ALICE, 3)
}

pub fn bob(clock: &BusClock) -> ClientCtx {
    client(clock, BOB, 3)
}

/// Run the full REQ/RES handshake for one Client over the simulated bus.
pub fn establish(server: &mut ServerCtx, client: &mut ClientCtx, gid: u8) {
    let req = client.build_request(gid).unwrap();
    let answer = server.process_received(req.as_bytes(), 0).unwrap();
    let res = answer.reaction.unwrap_or_else(|| {
        panic!("no response to request {}", hex::encode(req.as_bytes()))
    });
    let outcome = client.process_received(res.as_bytes(), 0).unwrap();
    assert!(outcome.sdu.is_none());
    assert!(outcome.reaction.is_none());
}

/// Convenience: unwrap a reaction PDU.
pub fn reaction_of(received: palisade_core::Received) -> Pdu {
    received.reaction.expect("expected a reaction PDU")
}
