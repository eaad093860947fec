//! Client-side protocol core.
//!
//! A Client holds one state slot per Group. Per Group it is either idle
//! (no STK), in a pending handshake (a non-zero request nonce is stored and
//! a Response is awaited), established (STK present, no pending request),
//! or additionally in a renewal phase (the previous session's STK is still
//! accepted for decryption while the new one is being fetched).
//!
//! All state transitions happen inside `process_received` and the build
//! calls; the caller only moves PDUs between this core and the CAN FD
//! driver.

use std::path::Path;

use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::codec;
use crate::config::{self, ClientConfig, ClientGroupConfig};
use crate::crypto::{is_all_zeros, Stk};
use crate::errors::Error;
use crate::freshness;
use crate::header::{self, Header};
use crate::io::Io;
use crate::msg::{self, CanId, Pdu, Pty, Received, RxSdu, MAX_CAN_FD_DATA_LEN, SERVER_SID};
use crate::payload::{
    sadfd_payload_len, sadfd_tag_idx, CTRNONCE_LEN, CTRNONCE_EXPIRED, REN_CTRNONCE_IDX,
    REN_PAYLOAD_LEN, REN_TAG_IDX, REN_TAG_LEN, REQ_PAYLOAD_LEN, REQ_REQNONCE_IDX,
    REQ_REQNONCE_LEN, REQ_TAG_IDX, REQ_TAG_LEN, RES_CLIENT_IDX, RES_CTEXT_IDX, RES_CTEXT_LEN,
    RES_CTRNONCE_IDX, RES_PAYLOAD_LEN, RES_RESNONCE_IDX, RES_RESNONCE_LEN, RES_TAG_IDX,
    RES_TAG_LEN, SADFD_CTEXT_IDX, SADFD_CTRNONCE_IDX, SADFD_METADATA_LEN, SADFD_PTLEN_IDX,
    STK_LEN,
};
use crate::persist;
use crate::time::{time_delta, Timestamp};

/// Request nonce value meaning "no Response is expected".
const REQNONCE_IDLE: u64 = 0;

/// Per-Group mutable state on the Client.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct GroupState {
    current_stk: Stk,
    previous_stk: Stk,
    current_ctrnonce: u32,
    previous_ctrnonce: u32,
    current_rx_last: Timestamp,
    previous_rx_last: Timestamp,
    /// Non-zero iff a handshake is pending for this Group.
    request_nonce: u64,
    /// Instant of the last REQ transmission or RES reception.
    last_handshake_event: Timestamp,
}

impl GroupState {
    fn zeroed() -> Self {
        Self {
            current_stk: [0; STK_LEN],
            previous_stk: [0; STK_LEN],
            current_ctrnonce: 0,
            previous_ctrnonce: 0,
            current_rx_last: 0,
            previous_rx_last: 0,
            request_nonce: REQNONCE_IDLE,
            last_handshake_event: 0,
        }
    }

    /// A session is usable iff the STK was installed and its counter nonce
    /// has not run out.
    fn is_established(&self) -> bool {
        !is_all_zeros(&self.current_stk) && self.current_ctrnonce < CTRNONCE_EXPIRED
    }

    /// The renewal phase is active iff the previous STK backup is non-zero.
    fn renewal_active(&self) -> bool {
        !is_all_zeros(&self.previous_stk)
    }
}

/// The Client context: configuration, per-Group states, collaborators.
pub struct ClientCtx {
    config: ClientConfig,
    groups: Vec<ClientGroupConfig>,
    states: Vec<GroupState>,
    io: Io,
}

impl std::fmt::Debug for ClientCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCtx").finish_non_exhaustive()
    }
}

impl ClientCtx {
    /// Validate the configuration and build a context with all Groups idle.
    pub fn init(
        config: ClientConfig,
        groups: Vec<ClientGroupConfig>,
        io: Io,
    ) -> Result<Self, Error> {
        config::check_client_config(&config)?;
        config::check_client_groups(&config, &groups)?;
        let states = vec![GroupState::zeroed(); groups.len()];
        Ok(Self { config, groups, states, io })
    }

    /// Load, validate and initialise from a binary configuration file.
    pub fn from_file(path: &Path, io: Io) -> Result<Self, Error> {
        let file = persist::load_client_file(path)?;
        Self::init(file.config, file.groups, io)
    }

    /// Securely wipe all session state and key material.
    ///
    /// Dropping the context wipes as well; this makes the teardown explicit.
    pub fn deinit(mut self) {
        for state in &mut self.states {
            state.zeroize();
        }
        self.config.zeroize();
    }

    /// This Client's source identifier.
    #[must_use]
    pub fn sid(&self) -> u8 {
        self.config.sid
    }

    fn group_index(&self, gid: u8) -> Result<usize, Error> {
        let idx = usize::from(gid);
        if idx >= self.groups.len() {
            return Err(Error::UnknownGroup);
        }
        Ok(idx)
    }

    fn header_type(&self) -> u8 {
        self.config.header_type
    }

    // ── Renewal phase bookkeeping ─────────────────────────────────────────

    fn renewal_exit_if_needed(&mut self, idx: usize, now: Timestamp) {
        let cfg = &self.groups[idx];
        let state = &mut self.states[idx];
        if !state.renewal_active() {
            return;
        }
        let enough_messages = state.current_ctrnonce >= 2 * cfg.max_ctrnonce_delay;
        let enough_time =
            time_delta(state.last_handshake_event, now) > cfg.session_renewal_duration_ms;
        if enough_messages || enough_time {
            state.previous_stk.zeroize();
            state.previous_ctrnonce = 0;
            state.previous_rx_last = 0;
            debug!(gid = cfg.gid, "renewal phase over, previous session dropped");
        }
    }

    /// Freshness check for a received counter nonce, selecting the session
    /// it belongs to: during a renewal phase the previous session is tried
    /// first, then the current one. Returns whether the previous session
    /// was selected.
    fn check_rx_ctrnonce(&self, idx: usize, received: u32, now: Timestamp) -> Result<bool, Error> {
        let cfg = &self.groups[idx];
        let state = &self.states[idx];
        freshness::reject_if_overflown(received)?;
        if state.renewal_active()
            && freshness::check(
                received,
                state.previous_ctrnonce,
                state.previous_rx_last,
                now,
                cfg.max_ctrnonce_delay,
                cfg.max_silence_ms,
            )
            .is_ok()
        {
            return Ok(true);
        }
        freshness::check(
            received,
            state.current_ctrnonce,
            state.current_rx_last,
            now,
            cfg.max_ctrnonce_delay,
            cfg.max_silence_ms,
        )?;
        Ok(false)
    }

    fn update_ctrnonce_and_rx(
        &mut self,
        idx: usize,
        received: u32,
        now: Timestamp,
        previous: bool,
    ) {
        let state = &mut self.states[idx];
        if previous {
            freshness::advance(&mut state.previous_ctrnonce, received);
            state.previous_rx_last = now;
        } else {
            freshness::advance(&mut state.current_ctrnonce, received);
            state.current_rx_last = now;
        }
    }

    // ── TX: Request ───────────────────────────────────────────────────────

    /// Start a handshake for the Group: emit a REQ carrying a fresh random
    /// request nonce, authenticated under the LTK.
    ///
    /// Fails with [`Error::HandshakeOngoing`] while a previous REQ is still
    /// awaiting its Response within the configured timeout.
    pub fn build_request(&mut self, gid: u8) -> Result<Pdu, Error> {
        let idx = self.group_index(gid)?;
        let now = self.io.clock.now()?;
        let state = &self.states[idx];
        let pending = state.request_nonce != REQNONCE_IDLE
            && time_delta(state.last_handshake_event, now) <= self.config.timeout_req_to_res_ms;
        if pending {
            return Err(Error::HandshakeOngoing);
        }
        self.build_msg_request(idx)
    }

    /// Build the REQ message and record the pending handshake.
    fn build_msg_request(&mut self, idx: usize) -> Result<Pdu, Error> {
        let hdr = Header {
            gid: self.groups[idx].gid,
            sid: self.config.sid,
            pty: Pty::Req.into(),
        };
        let hdr_len = header::packed_len(self.header_type());
        let mut pdu = Pdu::zeroed();
        header::pack(pdu.buffer_mut(), &hdr, self.header_type())?;

        let mut reqnonce = [0u8; REQ_REQNONCE_LEN];
        self.io.non_zero_random(&mut reqnonce)?;
        pdu.buffer_mut()[hdr_len + REQ_REQNONCE_IDX..hdr_len + REQ_REQNONCE_IDX + REQ_REQNONCE_LEN]
            .copy_from_slice(&reqnonce);

        let tag_at = hdr_len + REQ_TAG_IDX;
        let mut tag = [0u8; REQ_TAG_LEN];
        msg::hash_for_req(&self.config.ltk, &hdr, &reqnonce).finalize(&mut tag);
        pdu.buffer_mut()[tag_at..tag_at + REQ_TAG_LEN].copy_from_slice(&tag);
        pdu.set_len(hdr_len + REQ_PAYLOAD_LEN);

        // Timestamp taken as late as possible so the response timeout
        // window starts close to the actual transmission.
        let tx_instant = self.io.clock.now()?;
        let state = &mut self.states[idx];
        state.last_handshake_event = tx_instant;
        state.request_nonce = codec::decode_le64(&reqnonce);
        debug!(gid = hdr.gid, "handshake started");
        Ok(pdu)
    }

    // ── TX: application data ──────────────────────────────────────────────

    /// Build an unsecured UAD message. Works in any state, even for Groups
    /// absent from the local configuration.
    pub fn build_unsecured(&self, sdu: &[u8], gid: u8) -> Result<Pdu, Error> {
        msg::build_unsecured(sdu, gid, self.config.sid, self.header_type())
    }

    /// Encrypt `sdu` into a SADFD message under the Group's current STK and
    /// advance the counter nonce.
    pub fn build_secured_fd(&mut self, sdu: &[u8], gid: u8) -> Result<Pdu, Error> {
        msg::check_before_packing(sdu.len(), gid, SADFD_METADATA_LEN, self.header_type())?;
        let idx = self.group_index(gid)?;
        if !self.states[idx].is_established() {
            return Err(Error::SessionNotEstablished);
        }
        let hdr = Header {
            gid,
            sid: self.config.sid,
            pty: Pty::Sadfd.into(),
        };
        let header_type = self.header_type();
        let state = &mut self.states[idx];
        let pdu = msg::build_msg_sadfd(
            &hdr,
            header_type,
            state.current_ctrnonce,
            &state.current_stk,
            sdu,
        )?;
        freshness::increment_saturating(&mut state.current_ctrnonce);
        Ok(pdu)
    }

    // ── RX ────────────────────────────────────────────────────────────────

    /// Validate, decrypt and apply one received PDU.
    ///
    /// Returns extracted user data and/or a reaction PDU the caller must
    /// transmit (a REQ, when a renewal notification arrived).
    pub fn process_received(&mut self, pdu: &[u8], can_id: CanId) -> Result<Received, Error> {
        // Reception timestamp as early as possible.
        let now = self.io.clock.now()?;
        let result = self.dispatch(pdu, can_id, now);
        if let Err(err) = &result {
            if err.is_security_warning() {
                let head = &pdu[..pdu.len().min(4)];
                warn!(%err, head = %hex::encode(head), "security warning on received message");
            }
        }
        result
    }

    fn dispatch(&mut self, pdu: &[u8], can_id: CanId, now: Timestamp) -> Result<Received, Error> {
        let hdr = msg::check_received_generic(pdu, self.config.sid, self.header_type())?;
        match Pty::try_from(hdr.pty)? {
            // Requests are addressed to the Server; another Client's REQ is
            // simply not for us.
            Pty::Req => Err(Error::MsgIgnored),
            Pty::Res => {
                self.process_response(pdu, &hdr, now)?;
                Ok(Received::default())
            }
            Pty::Ren => {
                let reaction = self.process_renewal(pdu, &hdr, now)?;
                Ok(Received {
                    sdu: None,
                    reaction: Some(reaction),
                })
            }
            Pty::Sadfd => {
                let sdu = self.process_sadfd(pdu, &hdr, now, can_id)?;
                Ok(Received {
                    sdu: Some(sdu),
                    reaction: None,
                })
            }
            Pty::Sadtp => Err(Error::NotImplemented),
            Pty::Uad => {
                let sdu = msg::process_unsecured(pdu, &hdr, self.header_type(), can_id)?;
                Ok(Received {
                    sdu: Some(sdu),
                    reaction: None,
                })
            }
        }
    }

    /// Handle a RES: complete the pending handshake and install the session.
    fn process_response(&mut self, pdu: &[u8], hdr: &Header, now: Timestamp) -> Result<(), Error> {
        if hdr.sid != SERVER_SID {
            return Err(Error::ServerOnlyMessage);
        }
        let hdr_len = header::packed_len(self.header_type());
        if pdu.len() < hdr_len + RES_PAYLOAD_LEN {
            return Err(Error::TooShortPduToContainRes);
        }
        let client_sid = pdu[hdr_len + RES_CLIENT_IDX];
        if client_sid != self.config.sid {
            // Some other Client's handshake concluding.
            return Err(Error::MsgIgnored);
        }
        let idx = self.group_index(hdr.gid)?;
        let state = &self.states[idx];
        if state.request_nonce == REQNONCE_IDLE {
            return Err(Error::NotExpectingAResponse);
        }
        if time_delta(state.last_handshake_event, now) > self.config.timeout_req_to_res_ms {
            return Err(Error::ResponseTimeout);
        }
        let mut ctrnonce = [0u8; CTRNONCE_LEN];
        ctrnonce.copy_from_slice(&pdu[hdr_len + RES_CTRNONCE_IDX..hdr_len + RES_RESNONCE_IDX]);
        let received_ctrnonce = codec::decode_le24(&ctrnonce);
        freshness::reject_if_overflown(received_ctrnonce)?;

        let mut reqnonce = [0u8; REQ_REQNONCE_LEN];
        codec::encode_le64(&mut reqnonce, state.request_nonce);
        let mut resnonce = [0u8; RES_RESNONCE_LEN];
        resnonce.copy_from_slice(&pdu[hdr_len + RES_RESNONCE_IDX..hdr_len + RES_CTEXT_IDX]);

        let mut aead =
            msg::aead_for_res(&self.config.ltk, hdr, &ctrnonce, &reqnonce, &resnonce, client_sid);
        // The decrypted STK stays in a self-wiping buffer until validated.
        let mut stk_plain = Zeroizing::new([0u8; RES_CTEXT_LEN]);
        aead.decrypt_update(
            &mut stk_plain[..],
            &pdu[hdr_len + RES_CTEXT_IDX..hdr_len + RES_TAG_IDX],
        );
        aead.decrypt_finish(&pdu[hdr_len + RES_TAG_IDX..hdr_len + RES_TAG_IDX + RES_TAG_LEN])?;
        if is_all_zeros(&stk_plain[..STK_LEN]) {
            return Err(Error::ReceivedZeroKey);
        }

        let state = &mut self.states[idx];
        state.request_nonce = REQNONCE_IDLE;
        state.current_stk.copy_from_slice(&stk_plain[..STK_LEN]);
        state.current_ctrnonce = received_ctrnonce;
        state.current_rx_last = now;
        state.last_handshake_event = now;
        debug!(gid = hdr.gid, "session established");
        Ok(())
    }

    /// Handle a REN: enter the renewal phase and emit a REQ as reaction.
    fn process_renewal(&mut self, pdu: &[u8], hdr: &Header, now: Timestamp) -> Result<Pdu, Error> {
        if hdr.sid != SERVER_SID {
            return Err(Error::ServerOnlyMessage);
        }
        let idx = match self.group_index(hdr.gid) {
            Ok(idx) => idx,
            Err(Error::UnknownGroup) => return Err(Error::MsgIgnored),
            Err(err) => return Err(err),
        };
        if !self.states[idx].is_established() {
            return Err(Error::SessionNotEstablished);
        }
        if self.states[idx].request_nonce != REQNONCE_IDLE || self.states[idx].renewal_active() {
            // A repeated notification. The running phase may have expired
            // meanwhile, so give it the chance to conclude.
            self.renewal_exit_if_needed(idx, now);
            return Err(Error::MsgIgnored);
        }
        let hdr_len = header::packed_len(self.header_type());
        if pdu.len() < hdr_len + REN_PAYLOAD_LEN {
            return Err(Error::TooShortPduToContainRen);
        }
        let mut ctrnonce = [0u8; CTRNONCE_LEN];
        ctrnonce.copy_from_slice(&pdu[hdr_len + REN_CTRNONCE_IDX..hdr_len + REN_TAG_IDX]);
        let received_ctrnonce = codec::decode_le24(&ctrnonce);
        {
            let cfg = &self.groups[idx];
            let state = &self.states[idx];
            freshness::check(
                received_ctrnonce,
                state.current_ctrnonce,
                state.current_rx_last,
                now,
                cfg.max_ctrnonce_delay,
                cfg.max_silence_ms,
            )?;
        }
        msg::hash_for_ren(&self.states[idx].current_stk, hdr, &ctrnonce)
            .finalize_check(&pdu[hdr_len + REN_TAG_IDX..hdr_len + REN_TAG_IDX + REN_TAG_LEN])?;

        self.update_ctrnonce_and_rx(idx, received_ctrnonce, now, false);
        // Back up the whole current session; it keeps serving decryption
        // until the renewal phase concludes.
        let state = &mut self.states[idx];
        state.previous_stk = state.current_stk;
        state.previous_ctrnonce = state.current_ctrnonce;
        state.previous_rx_last = state.current_rx_last;
        debug!(gid = hdr.gid, "renewal notified, requesting the new session");
        // The REQ reaction is built atomically with entering the phase.
        self.build_msg_request(idx)
    }

    /// Handle a SADFD: decrypt under the session the nonce selects.
    fn process_sadfd(
        &mut self,
        pdu: &[u8],
        hdr: &Header,
        now: Timestamp,
        can_id: CanId,
    ) -> Result<RxSdu, Error> {
        let idx = match self.group_index(hdr.gid) {
            Ok(idx) => idx,
            Err(Error::UnknownGroup) => return Err(Error::MsgIgnored),
            Err(err) => return Err(err),
        };
        self.renewal_exit_if_needed(idx, now);
        if !self.states[idx].is_established() {
            return Err(Error::SessionNotEstablished);
        }
        let hdr_len = header::packed_len(self.header_type());
        if pdu.len() < hdr_len + SADFD_METADATA_LEN {
            return Err(Error::TooShortPduToContainSadfd);
        }
        let received_ctrnonce = codec::decode_le24(&pdu[hdr_len + SADFD_CTRNONCE_IDX..]);
        let from_previous = self.check_rx_ctrnonce(idx, received_ctrnonce, now)?;

        let ptlen = usize::from(pdu[hdr_len + SADFD_PTLEN_IDX]);
        let inferred_len = hdr_len + sadfd_payload_len(ptlen);
        if inferred_len > pdu.len() || inferred_len > MAX_CAN_FD_DATA_LEN {
            // The ptlen field implies ciphertext beyond the frame bounds.
            return Err(Error::TooLongCiphertext);
        }
        let state = &self.states[idx];
        let stk = if from_previous {
            &state.previous_stk
        } else {
            &state.current_stk
        };
        let mut aead = msg::aead_for_sadfd(stk, hdr, received_ctrnonce, ptlen as u8);
        let mut sdu = RxSdu::zeroed();
        aead.decrypt_update(
            &mut sdu.buffer_mut()[..ptlen],
            &pdu[hdr_len + SADFD_CTEXT_IDX..hdr_len + sadfd_tag_idx(ptlen)],
        );
        let tag = &pdu[hdr_len + sadfd_tag_idx(ptlen)..inferred_len];
        if let Err(err) = aead.decrypt_finish(tag) {
            // Wipe the partially decrypted plaintext before reporting.
            sdu.zeroize();
            return Err(err);
        }
        self.update_ctrnonce_and_rx(idx, received_ctrnonce, now, from_previous);

        sdu.can_id = can_id;
        sdu.gid = hdr.gid;
        sdu.sid = hdr.sid;
        sdu.was_secured = true;
        sdu.is_for_user = true;
        sdu.set_len(ptlen);
        Ok(sdu)
    }
}
