//! palisade-core — CAN Bus Security (CBS) protocol core.
//!
//! Secures CAN FD traffic with confidentiality, authenticity and freshness.
//! One Server (SID 0) distributes per-Group short-term session keys to N
//! Clients over a challenge-response handshake protected by pre-shared
//! long-term keys; application data then travels in AEAD-secured frames
//! freshened by a monotonic 24-bit counter nonce per Group.
//!
//! The core is sans-IO: the caller owns the CAN FD driver and hands
//! received PDUs to [`ClientCtx::process_received`] /
//! [`ServerCtx::process_received`], transmitting whatever reaction PDUs
//! come back. Randomness and timestamping are injected through [`io::Io`].
//!
//! ```no_run
//! use palisade_core::{ClientCtx, Io};
//!
//! # fn main() -> Result<(), palisade_core::Error> {
//! let mut client = ClientCtx::from_file("alice.cfg".as_ref(), Io::os())?;
//! let request = client.build_request(0)?;
//! // transmit request.as_bytes() on the bus, feed received frames back in
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod freshness;
pub mod header;
pub mod io;
pub mod msg;
pub mod payload;
mod persist;
pub mod server;
pub mod time;

pub use client::ClientCtx;
pub use config::{
    ClientConfig, ClientGroupConfig, ServerClientConfig, ServerConfig, ServerGroupConfig,
};
pub use errors::Error;
pub use header::Header;
pub use io::{Clock, Io, Trng};
pub use msg::{CanId, Pdu, Pty, Received, RxSdu, BROADCAST_GID, MAX_CAN_FD_DATA_LEN, SERVER_SID};
pub use server::ServerCtx;
pub use time::Timestamp;
