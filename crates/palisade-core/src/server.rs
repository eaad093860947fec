//! Server-side protocol core.
//!
//! The Server always has an established session per Group: it generates a
//! random STK for every Group at init and hands it to Clients through the
//! REQ/RES handshake. On top of that it drives session expiry: when a
//! Group's counter nonce climbs past its configured limit or the session
//! outlives its wall-clock duration, the Server starts a renewal phase,
//! backing up the old session and notifying Clients with a REN so they
//! fetch the new STK while the old one keeps decrypting stragglers.

use std::path::Path;

use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::codec;
use crate::config::{self, ServerClientConfig, ServerConfig, ServerGroupConfig};
use crate::crypto::{is_all_zeros, Ltk, Stk};
use crate::errors::Error;
use crate::freshness;
use crate::header::{self, Header};
use crate::io::Io;
use crate::msg::{self, CanId, Pdu, Pty, Received, RxSdu, MAX_CAN_FD_DATA_LEN, SERVER_SID};
use crate::payload::{
    sadfd_payload_len, sadfd_tag_idx, CTRNONCE_LEN, REN_CTRNONCE_IDX, REN_PAYLOAD_LEN,
    REN_TAG_IDX, REN_TAG_LEN, REQ_PAYLOAD_LEN, REQ_REQNONCE_IDX, REQ_REQNONCE_LEN, REQ_TAG_IDX,
    REQ_TAG_LEN, RES_CLIENT_IDX, RES_CTEXT_IDX, RES_CTEXT_LEN, RES_CTRNONCE_IDX, RES_PAYLOAD_LEN,
    RES_RESNONCE_IDX, RES_RESNONCE_LEN, RES_TAG_IDX, RES_TAG_LEN, SADFD_CTEXT_IDX,
    SADFD_CTRNONCE_IDX, SADFD_METADATA_LEN, SADFD_PTLEN_IDX, STK_LEN,
};
use crate::persist;
use crate::time::{time_delta, Timestamp};

/// Per-Group mutable state on the Server.
///
/// `current_rx_last == session_start` is a deliberate sentinel meaning "no
/// Client has Requested this session's STK yet"; it gates secured
/// transmissions that nobody could decrypt.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct GroupState {
    session_start: Timestamp,
    current_rx_last: Timestamp,
    previous_rx_last: Timestamp,
    current_ctrnonce: u32,
    previous_ctrnonce: u32,
    current_stk: Stk,
    previous_stk: Stk,
}

impl GroupState {
    fn zeroed() -> Self {
        Self {
            session_start: 0,
            current_rx_last: 0,
            previous_rx_last: 0,
            current_ctrnonce: 0,
            previous_ctrnonce: 0,
            current_stk: [0; STK_LEN],
            previous_stk: [0; STK_LEN],
        }
    }

    fn renewal_active(&self) -> bool {
        !is_all_zeros(&self.previous_stk)
    }

    fn any_client_requested(&self) -> bool {
        // Equal again only for one millisecond when the timestamp rolls
        // around 49 days after session start, long past any session expiry.
        self.current_rx_last != self.session_start
    }
}

/// The Server context: configuration, per-Client LTKs, per-Group sessions.
pub struct ServerCtx {
    config: ServerConfig,
    clients: Vec<ServerClientConfig>,
    groups: Vec<ServerGroupConfig>,
    states: Vec<GroupState>,
    io: Io,
}

impl std::fmt::Debug for ServerCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCtx").finish_non_exhaustive()
    }
}

impl ServerCtx {
    /// Validate the configuration and start a fresh session in every Group.
    ///
    /// The Server must be initialised before any Client so it can answer
    /// their Requests.
    pub fn init(
        config: ServerConfig,
        clients: Vec<ServerClientConfig>,
        groups: Vec<ServerGroupConfig>,
        mut io: Io,
    ) -> Result<Self, Error> {
        config::check_server_config(&config)?;
        config::check_server_clients(&config, &clients)?;
        config::check_server_groups(&config, &groups)?;
        let mut states = vec![GroupState::zeroed(); groups.len()];
        for state in &mut states {
            let start = io.clock.now()?;
            state.session_start = start;
            state.current_rx_last = start;
            state.previous_rx_last = 0;
            state.current_ctrnonce = 0;
            state.previous_ctrnonce = 0;
            io.non_zero_random(&mut state.current_stk)?;
            state.previous_stk = [0; STK_LEN];
        }
        Ok(Self { config, clients, groups, states, io })
    }

    /// Load, validate and initialise from a binary configuration file.
    pub fn from_file(path: &Path, io: Io) -> Result<Self, Error> {
        let file = persist::load_server_file(path)?;
        Self::init(file.config, file.clients, file.groups, io)
    }

    /// Securely wipe all session state and key material.
    pub fn deinit(mut self) {
        for state in &mut self.states {
            state.zeroize();
        }
        for client in &mut self.clients {
            client.zeroize();
        }
    }

    fn header_type(&self) -> u8 {
        self.config.header_type
    }

    fn ltk_of(&self, sid: u8) -> &Ltk {
        &self.clients[usize::from(sid) - 1].ltk
    }

    /// The SID must name a configured Client and the GID a configured Group
    /// that the Client belongs to.
    fn validate_sid_and_gid(&self, gid: u8, sid: u8) -> Result<(), Error> {
        if sid == SERVER_SID || sid > self.config.num_clients {
            return Err(Error::UnknownSource);
        }
        if usize::from(gid) >= self.groups.len() {
            return Err(Error::UnknownGroup);
        }
        // SID 1 maps to bit 0.
        let sid_bit = 1u32 << (sid - 1);
        if self.groups[usize::from(gid)].members_bitmap & sid_bit == 0 {
            return Err(Error::NotInGroup);
        }
        Ok(())
    }

    // ── Session lifecycle ─────────────────────────────────────────────────

    /// Store the reception instant of a valid message of the current
    /// session, preserving the "nobody Requested yet" sentinel: a Request
    /// landing within the same millisecond as the session start is recorded
    /// one millisecond later.
    fn touch_current_rx(&mut self, idx: usize, rx_instant: Timestamp) {
        let state = &mut self.states[idx];
        state.current_rx_last = rx_instant;
        if state.current_rx_last == state.session_start {
            state.current_rx_last = state.current_rx_last.wrapping_add(1);
        }
    }

    fn session_is_expired(&self, idx: usize, now: Timestamp) -> bool {
        let cfg = &self.groups[idx];
        let state = &self.states[idx];
        state.current_ctrnonce >= cfg.ctrnonce_upper_limit
            || time_delta(state.session_start, now) > cfg.session_duration_ms
    }

    fn renewal_is_over(&self, idx: usize, now: Timestamp) -> bool {
        // The 2 and 6 multipliers come from the protocol specification.
        let cfg = &self.groups[idx];
        let state = &self.states[idx];
        state.current_ctrnonce >= 2 * cfg.max_ctrnonce_delay
            || time_delta(state.session_start, now) > 6 * cfg.delay_between_ren_ms
    }

    /// Back up the current session and start a new one: fresh STK, counter
    /// nonce 0, new session start instant.
    fn renewal_enter(&mut self, idx: usize) -> Result<(), Error> {
        let start = self.io.clock.now()?;
        let state = &mut self.states[idx];
        state.previous_stk = state.current_stk;
        state.previous_rx_last = state.current_rx_last;
        state.previous_ctrnonce = state.current_ctrnonce;
        state.session_start = start;
        state.current_rx_last = start;
        self.io.non_zero_random(&mut self.states[idx].current_stk)?;
        self.states[idx].current_ctrnonce = 0;
        debug!(gid = self.groups[idx].gid, "session renewal started");
        Ok(())
    }

    fn renewal_exit_if_needed(&mut self, idx: usize, now: Timestamp) {
        if self.states[idx].renewal_active() && self.renewal_is_over(idx, now) {
            let state = &mut self.states[idx];
            state.previous_stk.zeroize();
            state.previous_rx_last = 0;
            state.previous_ctrnonce = 0;
            debug!(gid = self.groups[idx].gid, "renewal phase over");
        }
    }

    /// After an accepted current-session message, renew the session if it
    /// expired, returning the REN to broadcast.
    fn renewal_enter_if_needed(
        &mut self,
        idx: usize,
        now: Timestamp,
    ) -> Result<Option<Pdu>, Error> {
        if !self.session_is_expired(idx, now) {
            return Ok(None);
        }
        self.renewal_enter(idx)?;
        Ok(Some(self.build_msg_renewal(idx)?))
    }

    /// Build a REN: the previous session's counter nonce, authenticated
    /// under the previous session's STK (the one Clients still hold).
    fn build_msg_renewal(&mut self, idx: usize) -> Result<Pdu, Error> {
        let hdr = Header {
            gid: self.groups[idx].gid,
            sid: SERVER_SID,
            pty: Pty::Ren.into(),
        };
        let hdr_len = header::packed_len(self.header_type());
        let mut pdu = Pdu::zeroed();
        header::pack(pdu.buffer_mut(), &hdr, self.header_type())?;

        let state = &self.states[idx];
        let mut ctrnonce = [0u8; CTRNONCE_LEN];
        codec::encode_le24(&mut ctrnonce, state.previous_ctrnonce);
        pdu.buffer_mut()[hdr_len + REN_CTRNONCE_IDX..hdr_len + REN_TAG_IDX]
            .copy_from_slice(&ctrnonce);
        let mut tag = [0u8; REN_TAG_LEN];
        msg::hash_for_ren(&state.previous_stk, &hdr, &ctrnonce).finalize(&mut tag);
        pdu.buffer_mut()[hdr_len + REN_TAG_IDX..hdr_len + REN_TAG_IDX + REN_TAG_LEN]
            .copy_from_slice(&tag);
        pdu.set_len(hdr_len + REN_PAYLOAD_LEN);

        // Advance regardless of transmission success.
        freshness::increment_saturating(&mut self.states[idx].previous_ctrnonce);
        Ok(pdu)
    }

    /// Explicitly start (or continue notifying about) a session renewal.
    ///
    /// Fails with [`Error::NoPotentialReceiver`] when no Client ever
    /// Requested the current session's STK: none of them could validate the
    /// notification. Repeated calls during an active phase emit additional
    /// REN messages without restarting the phase.
    pub fn force_session_renewal(&mut self, gid: u8) -> Result<Pdu, Error> {
        if usize::from(gid) >= self.groups.len() {
            return Err(Error::UnknownGroup);
        }
        let idx = usize::from(gid);
        let active = self.states[idx].renewal_active();
        if !active && !self.states[idx].any_client_requested() {
            return Err(Error::NoPotentialReceiver);
        }
        if !active {
            self.renewal_enter(idx)?;
        }
        self.build_msg_renewal(idx)
    }

    // ── Freshness ─────────────────────────────────────────────────────────

    /// Freshness check for a received counter nonce. During a renewal phase
    /// the nonce is attributed to the previous or current session by the
    /// midpoint rule; the selected session's variables drive the check.
    /// Returns whether the previous session was selected.
    fn check_rx_ctrnonce(&self, idx: usize, received: u32, now: Timestamp) -> Result<bool, Error> {
        freshness::reject_if_overflown(received)?;
        let cfg = &self.groups[idx];
        let state = &self.states[idx];
        let from_previous = state.renewal_active()
            && freshness::belongs_to_previous_session(
                received,
                state.current_ctrnonce,
                state.previous_ctrnonce,
            );
        let (local_nonce, last_rx) = if from_previous {
            (state.previous_ctrnonce, state.previous_rx_last)
        } else {
            (state.current_ctrnonce, state.current_rx_last)
        };
        let delay =
            freshness::tolerated_delay(last_rx, now, cfg.max_ctrnonce_delay, cfg.max_silence_ms);
        freshness::reject_if_old(received, local_nonce, delay)?;
        Ok(from_previous)
    }

    fn update_ctrnonce_and_rx(
        &mut self,
        idx: usize,
        received: u32,
        now: Timestamp,
        previous: bool,
    ) {
        if previous {
            let state = &mut self.states[idx];
            freshness::advance(&mut state.previous_ctrnonce, received);
            state.previous_rx_last = now;
        } else {
            freshness::advance(&mut self.states[idx].current_ctrnonce, received);
            self.touch_current_rx(idx, now);
        }
    }

    // ── TX ────────────────────────────────────────────────────────────────

    /// Build an unsecured UAD message. Works in any state, even for Groups
    /// absent from the local configuration.
    pub fn build_unsecured(&self, sdu: &[u8], gid: u8) -> Result<Pdu, Error> {
        msg::build_unsecured(sdu, gid, SERVER_SID, self.header_type())
    }

    /// Encrypt `sdu` into a SADFD message under the Group's current STK.
    ///
    /// Requires at least one Client to have Requested the session, else
    /// nobody could decrypt it.
    pub fn build_secured_fd(&mut self, sdu: &[u8], gid: u8) -> Result<Pdu, Error> {
        msg::check_before_packing(sdu.len(), gid, SADFD_METADATA_LEN, self.header_type())?;
        if usize::from(gid) >= self.groups.len() {
            return Err(Error::UnknownGroup);
        }
        let idx = usize::from(gid);
        if !self.states[idx].any_client_requested() {
            return Err(Error::NoPotentialReceiver);
        }
        let hdr = Header {
            gid,
            sid: SERVER_SID,
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
    /// transmit (a RES answering a REQ, or a REN when the accepted message
    /// tipped the session over its expiry limits).
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
        let hdr = msg::check_received_generic(pdu, SERVER_SID, self.header_type())?;
        match Pty::try_from(hdr.pty)? {
            Pty::Req => {
                let reaction = self.process_request(pdu, &hdr, now)?;
                Ok(Received {
                    sdu: None,
                    reaction: Some(reaction),
                })
            }
            // Only the Server itself may emit these.
            Pty::Res | Pty::Ren => Err(Error::ServerOnlyMessage),
            Pty::Sadfd => self.process_sadfd(pdu, &hdr, now, can_id),
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

    /// Handle a REQ: authenticate the requester and answer with a RES
    /// carrying the Group's current session encrypted under its LTK.
    fn process_request(&mut self, pdu: &[u8], hdr: &Header, now: Timestamp) -> Result<Pdu, Error> {
        self.validate_sid_and_gid(hdr.gid, hdr.sid)?;
        let hdr_len = header::packed_len(self.header_type());
        if pdu.len() < hdr_len + REQ_PAYLOAD_LEN {
            return Err(Error::TooShortPduToContainReq);
        }
        let mut reqnonce = [0u8; REQ_REQNONCE_LEN];
        reqnonce.copy_from_slice(&pdu[hdr_len + REQ_REQNONCE_IDX..hdr_len + REQ_TAG_IDX]);
        if is_all_zeros(&reqnonce) {
            return Err(Error::ReceivedZeroReqNonce);
        }
        msg::hash_for_req(self.ltk_of(hdr.sid), hdr, &reqnonce)
            .finalize_check(&pdu[hdr_len + REQ_TAG_IDX..hdr_len + REQ_TAG_IDX + REQ_TAG_LEN])?;

        let idx = usize::from(hdr.gid);
        self.touch_current_rx(idx, now);
        debug!(gid = hdr.gid, sid = hdr.sid, "request accepted, responding");
        self.build_msg_response(idx, &reqnonce, hdr.gid, hdr.sid)
    }

    /// Build the RES for one Client, drawing a fresh response nonce.
    fn build_msg_response(
        &mut self,
        idx: usize,
        reqnonce: &[u8; REQ_REQNONCE_LEN],
        gid: u8,
        client_sid: u8,
    ) -> Result<Pdu, Error> {
        let hdr = Header {
            gid,
            sid: SERVER_SID,
            pty: Pty::Res.into(),
        };
        let hdr_len = header::packed_len(self.header_type());
        let mut pdu = Pdu::zeroed();
        header::pack(pdu.buffer_mut(), &hdr, self.header_type())?;
        pdu.buffer_mut()[hdr_len + RES_CLIENT_IDX] = client_sid;

        let mut ctrnonce = [0u8; CTRNONCE_LEN];
        codec::encode_le24(&mut ctrnonce, self.states[idx].current_ctrnonce);
        pdu.buffer_mut()[hdr_len + RES_CTRNONCE_IDX..hdr_len + RES_RESNONCE_IDX]
            .copy_from_slice(&ctrnonce);

        let mut resnonce = [0u8; RES_RESNONCE_LEN];
        self.io.non_zero_random(&mut resnonce)?;
        pdu.buffer_mut()[hdr_len + RES_RESNONCE_IDX..hdr_len + RES_CTEXT_IDX]
            .copy_from_slice(&resnonce);

        let mut aead = msg::aead_for_res(
            self.ltk_of(client_sid),
            &hdr,
            &ctrnonce,
            reqnonce,
            &resnonce,
            client_sid,
        );
        let mut ciphertext = [0u8; RES_CTEXT_LEN];
        aead.encrypt_update(&mut ciphertext, &self.states[idx].current_stk);
        pdu.buffer_mut()[hdr_len + RES_CTEXT_IDX..hdr_len + RES_TAG_IDX]
            .copy_from_slice(&ciphertext);
        let mut tag = [0u8; RES_TAG_LEN];
        aead.encrypt_finish(&mut tag);
        pdu.buffer_mut()[hdr_len + RES_TAG_IDX..hdr_len + RES_TAG_IDX + RES_TAG_LEN]
            .copy_from_slice(&tag);
        pdu.set_len(hdr_len + RES_PAYLOAD_LEN);
        Ok(pdu)
    }

    /// Handle a SADFD: decrypt under the session the nonce selects, then
    /// renew the session if the accepted message tipped it over its limits.
    fn process_sadfd(
        &mut self,
        pdu: &[u8],
        hdr: &Header,
        now: Timestamp,
        can_id: CanId,
    ) -> Result<Received, Error> {
        self.validate_sid_and_gid(hdr.gid, hdr.sid)?;
        let idx = usize::from(hdr.gid);
        // Conclude an elapsed renewal phase first, so messages of a
        // previous session that must no longer be accepted are not.
        self.renewal_exit_if_needed(idx, now);

        let hdr_len = header::packed_len(self.header_type());
        if pdu.len() < hdr_len + SADFD_METADATA_LEN {
            return Err(Error::TooShortPduToContainSadfd);
        }
        let received_ctrnonce = codec::decode_le24(&pdu[hdr_len + SADFD_CTRNONCE_IDX..]);
        let from_previous = self.check_rx_ctrnonce(idx, received_ctrnonce, now)?;

        let ptlen = usize::from(pdu[hdr_len + SADFD_PTLEN_IDX]);
        let inferred_len = hdr_len + sadfd_payload_len(ptlen);
        if inferred_len > pdu.len() || inferred_len > MAX_CAN_FD_DATA_LEN {
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

        // The expiry check runs after every accepted message, whichever
        // session it was attributed to: the current session ages by its own
        // counter and clock. It sees the already-updated nonce, so a REN
        // carries the value Clients have just seen.
        let reaction = self.renewal_enter_if_needed(idx, now)?;
        Ok(Received {
            sdu: Some(sdu),
            reaction,
        })
    }
}
