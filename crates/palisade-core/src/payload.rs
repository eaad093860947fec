//! Payload field offsets and lengths for every CBS message type.
//!
//! These constants ARE the wire format. Every offset is relative to the end
//! of the packed header; the packed header length varies with the header
//! type and is added by the builders/parsers.

use static_assertions::{const_assert, const_assert_eq};

/// Long-term key length in bytes.
pub const LTK_LEN: usize = 16;

/// Short-term key length in bytes.
pub const STK_LEN: usize = 16;

/// Counter nonce length on the wire in bytes (24-bit little-endian).
pub const CTRNONCE_LEN: usize = 3;

/// First counter nonce value that means "session expired".
pub const CTRNONCE_EXPIRED: u32 = 0x00FF_FFFF;

/// GID / SID / PTY each occupy one byte in hash and AEAD inputs.
pub const GID_LEN: usize = 1;
pub const SID_LEN: usize = 1;
pub const PTY_LEN: usize = 1;

// ── Unsecured Application Data (UAD) ──────────────────────────────────────

/// UAD carries the user bytes verbatim, no metadata.
pub const UAD_METADATA_LEN: usize = 0;

// ── Request (REQ) ─────────────────────────────────────────────────────────

/// Domain-separation label for REQ tags. ASCII, not NUL-terminated.
pub const REQ_LABEL: &[u8] = b"cbs_request";

pub const REQ_REQNONCE_IDX: usize = 0;
pub const REQ_REQNONCE_LEN: usize = 8;
pub const REQ_TAG_IDX: usize = REQ_REQNONCE_IDX + REQ_REQNONCE_LEN;
pub const REQ_TAG_LEN: usize = 16;
pub const REQ_PAYLOAD_LEN: usize = REQ_REQNONCE_LEN + REQ_TAG_LEN;

const_assert_eq!(REQ_PAYLOAD_LEN, 24);

// ── Response (RES) ────────────────────────────────────────────────────────

/// Domain-separation label for RES associated data. ASCII, not
/// NUL-terminated.
pub const RES_LABEL: &[u8] = b"cbs_response";

pub const RES_CLIENT_IDX: usize = 0;
pub const RES_CLIENT_LEN: usize = 1;
pub const RES_CTRNONCE_IDX: usize = RES_CLIENT_IDX + RES_CLIENT_LEN;
pub const RES_RESNONCE_IDX: usize = RES_CTRNONCE_IDX + CTRNONCE_LEN;
pub const RES_RESNONCE_LEN: usize = 8;
/// Ciphertext is the encrypted STK; same length, the tag is separate.
pub const RES_CTEXT_IDX: usize = RES_RESNONCE_IDX + RES_RESNONCE_LEN;
pub const RES_CTEXT_LEN: usize = STK_LEN;
pub const RES_TAG_IDX: usize = RES_CTEXT_IDX + RES_CTEXT_LEN;
pub const RES_TAG_LEN: usize = 16;
pub const RES_PAYLOAD_LEN: usize =
    RES_CLIENT_LEN + CTRNONCE_LEN + RES_RESNONCE_LEN + RES_CTEXT_LEN + RES_TAG_LEN;

const_assert_eq!(RES_PAYLOAD_LEN, 44);
const_assert_eq!(RES_TAG_IDX + RES_TAG_LEN, RES_PAYLOAD_LEN);

// ── Session Renewal Notification (REN) ────────────────────────────────────

/// Domain-separation label for REN tags. ASCII, not NUL-terminated.
pub const REN_LABEL: &[u8] = b"cbs_renewal";

pub const REN_CTRNONCE_IDX: usize = 0;
pub const REN_TAG_IDX: usize = REN_CTRNONCE_IDX + CTRNONCE_LEN;
pub const REN_TAG_LEN: usize = 16;
pub const REN_PAYLOAD_LEN: usize = CTRNONCE_LEN + REN_TAG_LEN;

const_assert_eq!(REN_PAYLOAD_LEN, 19);

// ── Secured Application Data over CAN FD (SADFD) ──────────────────────────

/// Domain-separation label for SADFD associated data. ASCII, not
/// NUL-terminated.
pub const SADFD_LABEL: &[u8] = b"cbs_secured_fd";

pub const SADFD_CTRNONCE_IDX: usize = 0;
pub const SADFD_PTLEN_IDX: usize = SADFD_CTRNONCE_IDX + CTRNONCE_LEN;
pub const SADFD_PTLEN_LEN: usize = 1;
pub const SADFD_CTEXT_IDX: usize = SADFD_PTLEN_IDX + SADFD_PTLEN_LEN;
pub const SADFD_TAG_LEN: usize = 8;

/// Everything in a SADFD payload that is not ciphertext.
pub const SADFD_METADATA_LEN: usize = CTRNONCE_LEN + SADFD_PTLEN_LEN + SADFD_TAG_LEN;

/// Byte offset of the tag, after `ctlen` bytes of ciphertext.
#[inline]
#[must_use]
pub const fn sadfd_tag_idx(ctlen: usize) -> usize {
    SADFD_CTEXT_IDX + ctlen
}

/// Total payload length for `ctlen` bytes of ciphertext.
#[inline]
#[must_use]
pub const fn sadfd_payload_len(ctlen: usize) -> usize {
    SADFD_METADATA_LEN + ctlen
}

const_assert_eq!(sadfd_payload_len(0), 12);

// ── AEAD nonce layouts ────────────────────────────────────────────────────

/// AEAD nonce length offered by the shim. Both message nonce layouts must
/// fit: `reqnonce || resnonce` (RES) and `ctrnonce || gid || sid || pad`
/// (SADFD).
pub const AEAD_NONCE_LEN: usize = 16;

const_assert_eq!(REQ_REQNONCE_LEN + RES_RESNONCE_LEN, AEAD_NONCE_LEN);
const_assert!(CTRNONCE_LEN + GID_LEN + SID_LEN <= AEAD_NONCE_LEN);
