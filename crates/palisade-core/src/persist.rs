//! Binary configuration file loading.
//!
//! The on-disk layout is fixed and little-endian. Server files:
//!
//! ```text
//! "HZLs\0"                                     magic, 5 B
//! num_groups (1) || num_clients (1) || header_type (1)
//! num_clients x { sid (1) || ltk (16) }                          17 B each
//! num_groups  x { max_ctrnonce_delay (4) || ctrnonce_upper_limit (4)
//!              || session_duration_ms (4) || delay_between_ren_ms (4)
//!              || members_bitmap (4) || max_silence_ms (2)
//!              || gid (1) || pad (1) }                           24 B each
//! ```
//!
//! Client files carry magic `"HZLc\0"`, then
//! `timeout_req_to_res_ms (4) || ltk (16) || sid (1) || header_type (1) ||
//! num_groups (1)` followed by `num_groups` records of
//! `max_ctrnonce_delay (4) || session_renewal_duration_ms (4) ||
//! max_silence_ms (2) || gid (1) || pad (1)`.
//!
//! A short file fails with [`Error::UnexpectedEof`], a wrong magic with
//! [`Error::InvalidFileMagicNumber`]. Record structs use `zerocopy` so the
//! parse is a bounds check plus a cast, with compile-time size guards.

use std::path::Path;

use static_assertions::const_assert_eq;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::config::{
    ClientConfig, ClientGroupConfig, ServerClientConfig, ServerConfig, ServerGroupConfig,
};
use crate::errors::Error;

type U32le = U32<LittleEndian>;
type U16le = U16<LittleEndian>;

const SERVER_MAGIC: &[u8; 5] = b"HZLs\0";
const CLIENT_MAGIC: &[u8; 5] = b"HZLc\0";

// ── Raw records ───────────────────────────────────────────────────────────

#[derive(FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(C)]
struct ServerHeaderRecord {
    num_groups: u8,
    num_clients: u8,
    header_type: u8,
}

#[derive(FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(C)]
struct ServerClientRecord {
    sid: u8,
    ltk: [u8; 16],
}

#[derive(FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(C)]
struct ServerGroupRecord {
    max_ctrnonce_delay: U32le,
    ctrnonce_upper_limit: U32le,
    session_duration_ms: U32le,
    delay_between_ren_ms: U32le,
    members_bitmap: U32le,
    max_silence_ms: U16le,
    gid: u8,
    pad: u8,
}

#[derive(FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(C)]
struct ClientHeaderRecord {
    timeout_req_to_res_ms: U32le,
    ltk: [u8; 16],
    sid: u8,
    header_type: u8,
    num_groups: u8,
}

#[derive(FromBytes, FromZeroes, AsBytes, Unaligned)]
#[repr(C)]
struct ClientGroupRecord {
    max_ctrnonce_delay: U32le,
    session_renewal_duration_ms: U32le,
    max_silence_ms: U16le,
    gid: u8,
    pad: u8,
}

const_assert_eq!(std::mem::size_of::<ServerHeaderRecord>(), 3);
const_assert_eq!(std::mem::size_of::<ServerClientRecord>(), 17);
const_assert_eq!(std::mem::size_of::<ServerGroupRecord>(), 24);
const_assert_eq!(std::mem::size_of::<ClientHeaderRecord>(), 23);
const_assert_eq!(std::mem::size_of::<ClientGroupRecord>(), 12);

// ── Cursor ────────────────────────────────────────────────────────────────

struct Cursor<'a> {
    bytes: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, amount: usize) -> Result<&'a [u8], Error> {
        if self.bytes.len() < amount {
            return Err(Error::UnexpectedEof);
        }
        let (head, tail) = self.bytes.split_at(amount);
        self.bytes = tail;
        Ok(head)
    }

    fn record<R: FromBytes>(&mut self) -> Result<R, Error> {
        let raw = self.take(std::mem::size_of::<R>())?;
        R::read_from(raw).ok_or(Error::UnexpectedEof)
    }

    fn magic(&mut self, expected: &[u8; 5]) -> Result<(), Error> {
        if self.take(expected.len())? != expected {
            return Err(Error::InvalidFileMagicNumber);
        }
        Ok(())
    }
}

// ── Parsed file contents ──────────────────────────────────────────────────

pub(crate) struct ServerFileConfig {
    pub config: ServerConfig,
    pub clients: Vec<ServerClientConfig>,
    pub groups: Vec<ServerGroupConfig>,
}

impl std::fmt::Debug for ServerFileConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerFileConfig")
            .field("config", &self.config)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

pub(crate) struct ClientFileConfig {
    pub config: ClientConfig,
    pub groups: Vec<ClientGroupConfig>,
}

pub(crate) fn parse_server_file(bytes: &[u8]) -> Result<ServerFileConfig, Error> {
    let mut cursor = Cursor { bytes };
    cursor.magic(SERVER_MAGIC)?;
    let header: ServerHeaderRecord = cursor.record()?;
    let config = ServerConfig {
        num_groups: header.num_groups,
        num_clients: header.num_clients,
        header_type: header.header_type,
    };
    let mut clients = Vec::with_capacity(usize::from(config.num_clients));
    for _ in 0..config.num_clients {
        let raw: ServerClientRecord = cursor.record()?;
        clients.push(ServerClientConfig { sid: raw.sid, ltk: raw.ltk });
    }
    let mut groups = Vec::with_capacity(usize::from(config.num_groups));
    for _ in 0..config.num_groups {
        let raw: ServerGroupRecord = cursor.record()?;
        groups.push(ServerGroupConfig {
            max_ctrnonce_delay: raw.max_ctrnonce_delay.get(),
            ctrnonce_upper_limit: raw.ctrnonce_upper_limit.get(),
            session_duration_ms: raw.session_duration_ms.get(),
            delay_between_ren_ms: raw.delay_between_ren_ms.get(),
            members_bitmap: raw.members_bitmap.get(),
            max_silence_ms: raw.max_silence_ms.get(),
            gid: raw.gid,
        });
    }
    Ok(ServerFileConfig { config, clients, groups })
}

pub(crate) fn parse_client_file(bytes: &[u8]) -> Result<ClientFileConfig, Error> {
    let mut cursor = Cursor { bytes };
    cursor.magic(CLIENT_MAGIC)?;
    let header: ClientHeaderRecord = cursor.record()?;
    let config = ClientConfig {
        timeout_req_to_res_ms: header.timeout_req_to_res_ms.get(),
        ltk: header.ltk,
        sid: header.sid,
        header_type: header.header_type,
        num_groups: header.num_groups,
    };
    let mut groups = Vec::with_capacity(usize::from(config.num_groups));
    for _ in 0..config.num_groups {
        let raw: ClientGroupRecord = cursor.record()?;
        groups.push(ClientGroupConfig {
            max_ctrnonce_delay: raw.max_ctrnonce_delay.get(),
            session_renewal_duration_ms: raw.session_renewal_duration_ms.get(),
            max_silence_ms: raw.max_silence_ms.get(),
            gid: raw.gid,
        });
    }
    Ok(ClientFileConfig { config, groups })
}

fn read_file(path: &Path) -> Result<Vec<u8>, Error> {
    std::fs::read(path).map_err(|_| Error::CannotOpenConfigFile)
}

pub(crate) fn load_server_file(path: &Path) -> Result<ServerFileConfig, Error> {
    parse_server_file(&read_file(path)?)
}

pub(crate) fn load_client_file(path: &Path) -> Result<ClientFileConfig, Error> {
    parse_client_file(&read_file(path)?)
}
