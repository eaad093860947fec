//! PDU/SDU containers, payload-type dispatch tags, and the message logic
//! shared by both parties: pre-pack validation, the generic receive check,
//! and the unsecured (UAD) build/extract pass-through.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::codec;
use crate::crypto::{Aead, HashXof, Ltk, Stk};
use crate::errors::Error;
use crate::header::{self, Header};
use crate::payload::{
    AEAD_NONCE_LEN, CTRNONCE_LEN, REN_LABEL, REQ_LABEL, REQ_REQNONCE_LEN, RES_LABEL,
    RES_RESNONCE_LEN, SADFD_LABEL, UAD_METADATA_LEN,
};

/// Source identifier of the Server, always zero.
pub const SERVER_SID: u8 = 0;

/// Group identifier reserved for broadcasting, always zero.
pub const BROADCAST_GID: u8 = 0;

/// Maximum CAN FD frame payload in bytes; every PDU must fit.
pub const MAX_CAN_FD_DATA_LEN: usize = 64;

/// CAN message identifier, 11- or 29-bit. Opaque to the core; echoed back
/// to the caller on reception.
pub type CanId = u32;

// ── Payload type ──────────────────────────────────────────────────────────

/// CBS payload type tag.
///
/// Values 6 and 7 are reserved for future use and are rejected at parse
/// time; SADTP is named but its transport-protocol segmentation is not
/// implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Pty {
    /// Session renewal notification.
    Ren = 0,
    /// Response carrying the encrypted STK.
    Res = 1,
    /// Request for the session information.
    Req = 2,
    /// Secured application data over the transport protocol (reserved).
    Sadtp = 3,
    /// Secured application data within one CAN FD frame.
    Sadfd = 4,
    /// Unsecured application data.
    Uad = 5,
}

impl TryFrom<u8> for Pty {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(Pty::Ren),
            1 => Ok(Pty::Res),
            2 => Ok(Pty::Req),
            3 => Ok(Pty::Sadtp),
            4 => Ok(Pty::Sadfd),
            5 => Ok(Pty::Uad),
            // 6 and 7 are RFU; larger values cannot appear in 3-bit layouts
            // but can in header type 0.
            _ => Err(Error::InvalidPayloadType),
        }
    }
}

impl From<Pty> for u8 {
    fn from(pty: Pty) -> u8 {
        pty as u8
    }
}

// ── PDU ───────────────────────────────────────────────────────────────────

/// A packed CBS message, ready for transmission in one CAN FD frame.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Pdu {
    len: usize,
    data: [u8; MAX_CAN_FD_DATA_LEN],
}

impl Pdu {
    pub(crate) fn zeroed() -> Self {
        Self {
            len: 0,
            data: [0; MAX_CAN_FD_DATA_LEN],
        }
    }

    /// The packed bytes to hand to the CAN FD driver.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut [u8; MAX_CAN_FD_DATA_LEN] {
        &mut self.data
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        debug_assert!(len <= MAX_CAN_FD_DATA_LEN);
        self.len = len;
    }
}

impl std::fmt::Debug for Pdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // PDUs may carry ciphertext and tags; length is enough for logs.
        f.debug_struct("Pdu").field("len", &self.len).finish()
    }
}

// ── Received SDU ──────────────────────────────────────────────────────────

/// A validated (and, for secured messages, decrypted) received message.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RxSdu {
    /// CAN ID of the underlying frame, echoed for the caller.
    pub can_id: CanId,
    /// Group the message addressed.
    pub gid: u8,
    /// Claimed (for UAD) or authenticated (for SADFD) sender.
    pub sid: u8,
    /// True iff the payload was encrypted and authenticated in transit.
    pub was_secured: bool,
    /// True iff `data` is user data rather than protocol-internal content.
    pub is_for_user: bool,
    len: usize,
    data: [u8; MAX_CAN_FD_DATA_LEN],
}

impl RxSdu {
    pub(crate) fn zeroed() -> Self {
        Self {
            can_id: 0,
            gid: 0,
            sid: 0,
            was_secured: false,
            is_for_user: false,
            len: 0,
            data: [0; MAX_CAN_FD_DATA_LEN],
        }
    }

    /// The plaintext user data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut [u8; MAX_CAN_FD_DATA_LEN] {
        &mut self.data
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        debug_assert!(len <= MAX_CAN_FD_DATA_LEN);
        self.len = len;
    }
}

impl Default for RxSdu {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl std::fmt::Debug for RxSdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RxSdu")
            .field("can_id", &self.can_id)
            .field("gid", &self.gid)
            .field("sid", &self.sid)
            .field("was_secured", &self.was_secured)
            .field("is_for_user", &self.is_for_user)
            .field("len", &self.len)
            .finish()
    }
}

/// Outcome of processing one received PDU.
#[derive(Debug, Default)]
pub struct Received {
    /// Decrypted/extracted user data, when the message carried any.
    pub sdu: Option<RxSdu>,
    /// A protocol message the caller must transmit in reaction (RES on the
    /// Server after a REQ; REQ on a Client after a REN; REN on the Server
    /// when a session expires).
    pub reaction: Option<Pdu>,
}

// ── Shared message logic ──────────────────────────────────────────────────

/// Pre-pack validation for outgoing messages: the GID must fit the header
/// layout and the user data must fit the frame next to the header and the
/// message type's metadata.
pub(crate) fn check_before_packing(
    sdu_len: usize,
    gid: u8,
    metadata_len: usize,
    header_type: u8,
) -> Result<(), Error> {
    if gid > header::max_gid(header_type) {
        return Err(Error::GidTooLargeForHeaderType);
    }
    let max_sdu = MAX_CAN_FD_DATA_LEN - header::packed_len(header_type) - metadata_len;
    if sdu_len > max_sdu {
        return Err(Error::TooLongSdu);
    }
    Ok(())
}

/// Generic checks on any received PDU: long enough for the header, and not
/// claiming to come from the receiver itself.
pub(crate) fn check_received_generic(
    pdu: &[u8],
    receiver_sid: u8,
    header_type: u8,
) -> Result<Header, Error> {
    if pdu.len() < header::packed_len(header_type) {
        return Err(Error::TooShortPduToContainHeader);
    }
    let hdr = header::unpack(pdu, header_type)?;
    if hdr.sid == receiver_sid {
        return Err(Error::MessageFromMyself);
    }
    Ok(hdr)
}

/// Build an unsecured (UAD) message: packed header followed by the user
/// bytes verbatim.
///
/// UAD needs no session and may even target a GID absent from the local
/// configuration, to reach devices that never handshake.
pub(crate) fn build_unsecured(
    sdu: &[u8],
    gid: u8,
    sid: u8,
    header_type: u8,
) -> Result<Pdu, Error> {
    check_before_packing(sdu.len(), gid, UAD_METADATA_LEN, header_type)?;
    let hdr = Header {
        gid,
        sid,
        pty: Pty::Uad.into(),
    };
    let hdr_len = header::packed_len(header_type);
    let mut pdu = Pdu::zeroed();
    header::pack(pdu.buffer_mut(), &hdr, header_type)?;
    pdu.buffer_mut()[hdr_len..hdr_len + sdu.len()].copy_from_slice(sdu);
    pdu.set_len(hdr_len + sdu.len());
    Ok(pdu)
}

// ── Cryptographic bindings per message type ───────────────────────────────

/// AEAD context for a RES message.
///
/// Key: the addressee Client's LTK. Nonce: `reqnonce || resnonce`.
/// Associated data: `"cbs_response" || gid || sid || pty || client_sid ||
/// ctrnonce`, all fields as they travel on the wire.
pub(crate) fn aead_for_res(
    ltk: &Ltk,
    hdr: &Header,
    ctrnonce: &[u8; CTRNONCE_LEN],
    reqnonce: &[u8; REQ_REQNONCE_LEN],
    resnonce: &[u8; RES_RESNONCE_LEN],
    client_sid: u8,
) -> Aead {
    let mut nonce = [0u8; AEAD_NONCE_LEN];
    nonce[..REQ_REQNONCE_LEN].copy_from_slice(reqnonce);
    nonce[REQ_REQNONCE_LEN..].copy_from_slice(resnonce);
    let mut aead = Aead::init(ltk, &nonce);
    aead.associated_data(RES_LABEL);
    aead.associated_data(&[hdr.gid, hdr.sid, hdr.pty, client_sid]);
    aead.associated_data(ctrnonce);
    aead
}

/// AEAD context for a SADFD message.
///
/// Key: the session STK. Nonce: `ctrnonce || gid || sid || zero-pad` (the
/// zero padding is part of the nonce). Associated data:
/// `"cbs_secured_fd" || gid || sid || pty || ptlen`.
pub(crate) fn aead_for_sadfd(stk: &Stk, hdr: &Header, ctrnonce: u32, ptlen: u8) -> Aead {
    let mut nonce = [0u8; AEAD_NONCE_LEN];
    codec::encode_le24(&mut nonce, ctrnonce);
    nonce[CTRNONCE_LEN] = hdr.gid;
    nonce[CTRNONCE_LEN + 1] = hdr.sid;
    let mut aead = Aead::init(stk, &nonce);
    aead.associated_data(SADFD_LABEL);
    aead.associated_data(&[hdr.gid, hdr.sid, hdr.pty, ptlen]);
    aead
}

/// Keyed hash for a REQ tag:
/// `hash(LTK || "cbs_request" || gid || sid || pty || reqnonce)`.
pub(crate) fn hash_for_req(ltk: &Ltk, hdr: &Header, reqnonce: &[u8; REQ_REQNONCE_LEN]) -> HashXof {
    let mut hash = HashXof::init();
    hash.update(ltk);
    hash.update(REQ_LABEL);
    hash.update(&[hdr.gid, hdr.sid, hdr.pty]);
    hash.update(reqnonce);
    hash
}

/// Keyed hash for a REN tag:
/// `hash(STK || "cbs_renewal" || gid || sid || pty || ctrnonce)`.
///
/// The key is the STK the receiver currently holds, which is the previous
/// session's STK from the Server's point of view.
pub(crate) fn hash_for_ren(stk: &Stk, hdr: &Header, ctrnonce: &[u8; CTRNONCE_LEN]) -> HashXof {
    let mut hash = HashXof::init();
    hash.update(stk);
    hash.update(REN_LABEL);
    hash.update(&[hdr.gid, hdr.sid, hdr.pty]);
    hash.update(ctrnonce);
    hash
}

/// Build a SADFD message: `ctrnonce || ptlen || ciphertext || tag(8)` after
/// the packed header. Both parties share this shape; only the STK and the
/// counter nonce they feed in differ.
pub(crate) fn build_msg_sadfd(
    hdr: &Header,
    header_type: u8,
    ctrnonce: u32,
    stk: &Stk,
    sdu: &[u8],
) -> Result<Pdu, Error> {
    use crate::payload::{
        sadfd_payload_len, sadfd_tag_idx, SADFD_CTEXT_IDX, SADFD_CTRNONCE_IDX, SADFD_PTLEN_IDX,
        SADFD_TAG_LEN,
    };

    let hdr_len = header::packed_len(header_type);
    let mut pdu = Pdu::zeroed();
    header::pack(pdu.buffer_mut(), hdr, header_type)?;
    codec::encode_le24(&mut pdu.buffer_mut()[hdr_len + SADFD_CTRNONCE_IDX..], ctrnonce);
    pdu.buffer_mut()[hdr_len + SADFD_PTLEN_IDX] = sdu.len() as u8;

    let mut aead = aead_for_sadfd(stk, hdr, ctrnonce, sdu.len() as u8);
    let ct_at = hdr_len + SADFD_CTEXT_IDX;
    let mut ciphertext = [0u8; MAX_CAN_FD_DATA_LEN];
    let ct_len = aead.encrypt_update(&mut ciphertext[..sdu.len()], sdu);
    pdu.buffer_mut()[ct_at..ct_at + ct_len].copy_from_slice(&ciphertext[..ct_len]);

    let tag_at = hdr_len + sadfd_tag_idx(ct_len);
    let mut tag = [0u8; SADFD_TAG_LEN];
    aead.encrypt_finish(&mut tag);
    pdu.buffer_mut()[tag_at..tag_at + tag.len()].copy_from_slice(&tag);
    pdu.set_len(hdr_len + sadfd_payload_len(ct_len));
    Ok(pdu)
}

/// Extract a received UAD message verbatim. No validation is possible; the
/// data is flagged as unsecured.
pub(crate) fn process_unsecured(
    pdu: &[u8],
    hdr: &Header,
    header_type: u8,
    can_id: CanId,
) -> Result<RxSdu, Error> {
    let hdr_len = header::packed_len(header_type);
    let data_len = pdu.len() - hdr_len;
    if data_len > MAX_CAN_FD_DATA_LEN {
        return Err(Error::TooLongSdu);
    }
    let mut sdu = RxSdu::zeroed();
    sdu.can_id = can_id;
    sdu.gid = hdr.gid;
    sdu.sid = hdr.sid;
    sdu.was_secured = false;
    sdu.is_for_user = true;
    sdu.buffer_mut()[..data_len].copy_from_slice(&pdu[hdr_len..]);
    sdu.set_len(data_len);
    Ok(sdu)
}
