//! Party configuration structs and the initialisation-time validation pass.
//!
//! Configurations are immutable once a context is built. The checks here
//! run once at init and establish the invariants the rest of the core
//! relies on without re-checking: contiguous SIDs (`1..=n`), contiguous
//! GIDs (`0..n`, index == gid), non-zero LTKs, field values that fit the
//! bus-wide header layout, and sane per-group timing parameters.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{is_all_zeros, Ltk};
use crate::errors::Error;
use crate::header;
use crate::msg::{BROADCAST_GID, SERVER_SID};

/// Maximum amount of Clients a Server supports: one bit per Client in each
/// Group's membership bitmap.
pub const MAX_AMOUNT_OF_CLIENTS: usize = 32;

/// Largest allowed max-counter-nonce-delay (2^22, unitless).
pub const LARGEST_MAX_CTRNONCE_DELAY: u32 = 1 << 22;

/// Largest allowed counter-nonce upper limit: 128 less than the 24-bit
/// maximum, leaving room for the renewal phase to conclude.
pub const MAX_CTRNONCE_UPPER_LIMIT: u32 = 0x00FF_FF80;

// ── Server side ───────────────────────────────────────────────────────────

/// Server-wide constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Amount of Groups; must be >= 1.
    pub num_groups: u8,
    /// Amount of Clients; must be in `[1, MAX_AMOUNT_OF_CLIENTS]`.
    pub num_clients: u8,
    /// Bus-wide CBS header type, `0..=6`.
    pub header_type: u8,
}

/// One Client as the Server knows it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ServerClientConfig {
    /// Source identifier; element `i` of the array must hold `sid == i+1`.
    pub sid: u8,
    /// Long-term key shared with exactly this Client. Never all-zeros.
    pub ltk: Ltk,
}

impl std::fmt::Debug for ServerClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerClientConfig")
            .field("sid", &self.sid)
            .field("ltk", &"<redacted>")
            .finish()
    }
}

/// One Group as the Server knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerGroupConfig {
    /// Maximum counter-nonce delay tolerated at zero silence.
    pub max_ctrnonce_delay: u32,
    /// Counter nonce value at which the session expires.
    pub ctrnonce_upper_limit: u32,
    /// Wall-clock session duration before expiry, in milliseconds.
    pub session_duration_ms: u32,
    /// Delay between consecutive REN notifications, in milliseconds.
    /// Must lie in `(0, session_duration_ms / 6)`.
    pub delay_between_ren_ms: u32,
    /// Membership bitmap: bit `i` (lsb = bit 0) set means the Client with
    /// `sid == i+1` belongs to this Group.
    pub members_bitmap: u32,
    /// Maximum silence interval for the freshness filter, in milliseconds.
    pub max_silence_ms: u16,
    /// Group identifier; array index must equal this field.
    pub gid: u8,
}

// ── Client side ───────────────────────────────────────────────────────────

/// A Client's own constants.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ClientConfig {
    /// How long to wait for a Response before the handshake may be retried,
    /// in milliseconds.
    pub timeout_req_to_res_ms: u32,
    /// Long-term key shared with the Server. Never all-zeros.
    pub ltk: Ltk,
    /// This Client's source identifier; never the Server's 0.
    pub sid: u8,
    /// Bus-wide CBS header type, `0..=6`.
    pub header_type: u8,
    /// Amount of Groups this Client participates in.
    pub num_groups: u8,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("sid", &self.sid)
            .field("header_type", &self.header_type)
            .field("num_groups", &self.num_groups)
            .field("timeout_req_to_res_ms", &self.timeout_req_to_res_ms)
            .field("ltk", &"<redacted>")
            .finish()
    }
}

/// One Group as a Client knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientGroupConfig {
    /// Maximum counter-nonce delay tolerated at zero silence.
    pub max_ctrnonce_delay: u32,
    /// How long the Client keeps accepting the previous session's STK after
    /// entering a renewal phase, in milliseconds.
    pub session_renewal_duration_ms: u32,
    /// Maximum silence interval for the freshness filter, in milliseconds.
    pub max_silence_ms: u16,
    /// Group identifier; array index must equal this field.
    pub gid: u8,
}

// ── Validation ────────────────────────────────────────────────────────────

pub(crate) fn check_server_config(config: &ServerConfig) -> Result<(), Error> {
    header::check_header_type(config.header_type)?;
    if config.num_groups == 0 {
        return Err(Error::ZeroGroups);
    }
    // GIDs are contiguous from 0, so the count bounds the largest GID.
    let max_groups = usize::from(header::max_gid(config.header_type)) + 1;
    if usize::from(config.num_groups) > max_groups {
        return Err(Error::TooManyGroupsForHeaderType);
    }
    if config.num_clients == 0 {
        return Err(Error::ZeroClients);
    }
    if config.num_clients > header::max_sid(config.header_type) {
        return Err(Error::TooManyClientsForHeaderType);
    }
    if usize::from(config.num_clients) > MAX_AMOUNT_OF_CLIENTS {
        return Err(Error::TooManyClients);
    }
    Ok(())
}

pub(crate) fn check_server_clients(
    config: &ServerConfig,
    clients: &[ServerClientConfig],
) -> Result<(), Error> {
    if clients.len() != usize::from(config.num_clients) {
        return Err(Error::GapInSids);
    }
    for (i, client) in clients.iter().enumerate() {
        if is_all_zeros(&client.ltk) {
            return Err(Error::LtkIsAllZeros);
        }
        if client.sid == SERVER_SID {
            return Err(Error::ServerSidAssignedToClient);
        }
        if i > 0 {
            if clients[i - 1].sid >= client.sid {
                return Err(Error::SidsNotStrictlyAscending);
            }
            if clients[i - 1].sid + 1 != client.sid {
                return Err(Error::GapInSids);
            }
        } else if client.sid != 1 {
            return Err(Error::GapInSids);
        }
    }
    Ok(())
}

/// Bitmap with one set bit per configured Client SID.
#[inline]
fn all_clients_bitmap(num_clients: u8) -> u32 {
    (u64::MAX >> (64 - u32::from(num_clients))) as u32
}

pub(crate) fn check_server_groups(
    config: &ServerConfig,
    groups: &[ServerGroupConfig],
) -> Result<(), Error> {
    if groups.len() != usize::from(config.num_groups) {
        return Err(Error::GapInGids);
    }
    if groups[0].gid != BROADCAST_GID {
        return Err(Error::MissingGid0);
    }
    let all_clients = all_clients_bitmap(config.num_clients);
    if groups[0].members_bitmap & all_clients != all_clients {
        // The broadcast bitmap must include every configured Client; extra
        // high bits are tolerated and ignored.
        return Err(Error::ClientsBitmapInvalidBroadcastGroup);
    }
    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            if groups[i - 1].gid >= group.gid {
                return Err(Error::GidsNotStrictlyAscending);
            }
            if groups[i - 1].gid + 1 != group.gid {
                return Err(Error::GapInGids);
            }
            if group.members_bitmap == 0 {
                return Err(Error::ClientsBitmapZeroClients);
            }
            if group.members_bitmap & !all_clients != 0 {
                return Err(Error::ClientsBitmapUnknownSid);
            }
        }
        if group.max_ctrnonce_delay > LARGEST_MAX_CTRNONCE_DELAY {
            return Err(Error::InvalidMaxCtrNonceDelay);
        }
        if group.ctrnonce_upper_limit > MAX_CTRNONCE_UPPER_LIMIT {
            return Err(Error::TooLargeCtrNonceUpperLimit);
        }
        // The division by 6 is an upper limit from the protocol.
        if group.delay_between_ren_ms == 0
            || group.delay_between_ren_ms >= group.session_duration_ms / 6
        {
            return Err(Error::InvalidDelayBetweenRenNotifications);
        }
    }
    Ok(())
}

pub(crate) fn check_client_config(config: &ClientConfig) -> Result<(), Error> {
    header::check_header_type(config.header_type)?;
    if config.num_groups == 0 {
        return Err(Error::ZeroGroups);
    }
    let max_groups = usize::from(header::max_gid(config.header_type)) + 1;
    if usize::from(config.num_groups) > max_groups {
        return Err(Error::TooManyGroupsForHeaderType);
    }
    if is_all_zeros(&config.ltk) {
        return Err(Error::LtkIsAllZeros);
    }
    if config.sid == SERVER_SID {
        return Err(Error::ServerSidAssignedToClient);
    }
    if config.sid > header::max_sid(config.header_type) {
        return Err(Error::SidTooLargeForHeaderType);
    }
    Ok(())
}

pub(crate) fn check_client_groups(
    config: &ClientConfig,
    groups: &[ClientGroupConfig],
) -> Result<(), Error> {
    if groups.len() != usize::from(config.num_groups) {
        return Err(Error::GapInGids);
    }
    if groups[0].gid != BROADCAST_GID {
        return Err(Error::MissingGid0);
    }
    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            if groups[i - 1].gid >= group.gid {
                return Err(Error::GidsNotStrictlyAscending);
            }
            if groups[i - 1].gid + 1 != group.gid {
                return Err(Error::GapInGids);
            }
        }
        if group.max_ctrnonce_delay > LARGEST_MAX_CTRNONCE_DELAY {
            return Err(Error::InvalidMaxCtrNonceDelay);
        }
    }
    Ok(())
}
