//! Cryptographic shims for the protocol core.
//!
//! Provides two things:
//!   1. [`Aead`] — authenticated encryption with associated data, streaming
//!      interface, caller-chosen tag length (8 B for SADFD, 16 B for RES)
//!   2. [`HashXof`] — extendable-output hash for the keyed REQ/REN tags
//!
//! The cores depend only on these behavioral contracts; swapping the
//! primitives underneath never touches the client or server state machines.
//!
//! The AEAD is an encrypt-then-MAC composition: AES-128-CTR over the full
//! 16-byte nonce block, with a BLAKE3 prefix-keyed MAC over
//! `key || nonce || ad || ciphertext || le64(ad_len) || le64(ct_len)`,
//! truncated to the requested tag length. The trailing lengths make the
//! ad/ciphertext boundary unambiguous. Ciphertext length equals plaintext
//! length; the tag travels separately.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use subtle::ConstantTimeEq;

use crate::codec;
use crate::errors::Error;
use crate::payload::{AEAD_NONCE_LEN, LTK_LEN, STK_LEN};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Long-term key, pre-shared between one Client and the Server.
pub type Ltk = [u8; LTK_LEN];

/// Short-term per-Group session key, distributed by the Server.
pub type Stk = [u8; STK_LEN];

/// Largest tag the shims produce.
pub const MAX_TAG_LEN: usize = 16;

/// True iff every byte is zero. All-zero keys and nonces are sentinels
/// throughout the protocol, never valid material.
#[inline]
#[must_use]
pub fn is_all_zeros(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

// ── AEAD ──────────────────────────────────────────────────────────────────

/// Streaming AEAD context.
///
/// Usage order: [`Aead::init`], any number of [`Aead::associated_data`]
/// calls, then either encrypt or decrypt updates, then the matching finish
/// call which consumes the context.
pub struct Aead {
    cipher: Aes128Ctr,
    mac: blake3::Hasher,
    ad_len: u64,
    stream_len: u64,
}

impl Aead {
    /// Bind the context to a key and a 16-byte nonce.
    pub fn init(key: &[u8; 16], nonce: &[u8; AEAD_NONCE_LEN]) -> Self {
        let mut mac = blake3::Hasher::new();
        mac.update(key);
        mac.update(nonce);
        Self {
            cipher: Aes128Ctr::new(key.into(), nonce.into()),
            mac,
            ad_len: 0,
            stream_len: 0,
        }
    }

    /// Absorb associated data. Callable repeatedly, but only before the
    /// first encrypt/decrypt update.
    pub fn associated_data(&mut self, ad: &[u8]) {
        debug_assert_eq!(self.stream_len, 0, "associated data after ciphertext");
        self.mac.update(ad);
        self.ad_len += ad.len() as u64;
    }

    /// Encrypt `plaintext` into `out`, returning the bytes written
    /// (always `plaintext.len()`: no expansion).
    pub fn encrypt_update(&mut self, out: &mut [u8], plaintext: &[u8]) -> usize {
        let n = plaintext.len();
        out[..n].copy_from_slice(plaintext);
        self.cipher.apply_keystream(&mut out[..n]);
        self.mac.update(&out[..n]);
        self.stream_len += n as u64;
        n
    }

    /// Produce the authentication tag of length `tag_out.len()`
    /// (at most [`MAX_TAG_LEN`]).
    pub fn encrypt_finish(mut self, tag_out: &mut [u8]) {
        debug_assert!(tag_out.len() <= MAX_TAG_LEN);
        self.absorb_lengths();
        self.mac.finalize_xof().fill(tag_out);
    }

    /// Decrypt `ciphertext` into `out`, returning the bytes written.
    ///
    /// The plaintext must not be released to the caller until
    /// [`Aead::decrypt_finish`] validated the tag.
    pub fn decrypt_update(&mut self, out: &mut [u8], ciphertext: &[u8]) -> usize {
        let n = ciphertext.len();
        self.mac.update(ciphertext);
        out[..n].copy_from_slice(ciphertext);
        self.cipher.apply_keystream(&mut out[..n]);
        self.stream_len += n as u64;
        n
    }

    /// Validate `expected_tag` in constant time.
    pub fn decrypt_finish(mut self, expected_tag: &[u8]) -> Result<(), Error> {
        debug_assert!(expected_tag.len() <= MAX_TAG_LEN);
        self.absorb_lengths();
        let mut tag = [0u8; MAX_TAG_LEN];
        let computed = &mut tag[..expected_tag.len()];
        self.mac.finalize_xof().fill(computed);
        if bool::from(computed.ct_eq(expected_tag)) {
            Ok(())
        } else {
            Err(Error::InvalidTag)
        }
    }

    fn absorb_lengths(&mut self) {
        let mut lengths = [0u8; 16];
        codec::encode_le64(&mut lengths[..8], self.ad_len);
        codec::encode_le64(&mut lengths[8..], self.stream_len);
        self.mac.update(&lengths);
    }
}

// ── Hash XOF ──────────────────────────────────────────────────────────────

/// Extendable-output hash for the keyed REQ/REN tags.
///
/// Keying is done by the caller absorbing the key first, so the same shim
/// serves both tag generation and validation.
pub struct HashXof(blake3::Hasher);

impl HashXof {
    pub fn init() -> Self {
        Self(blake3::Hasher::new())
    }

    /// Absorb more input. Callable repeatedly.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Produce `out.len()` bytes of output.
    pub fn finalize(self, out: &mut [u8]) {
        self.0.finalize_xof().fill(out);
    }

    /// Compare the output of length `expected.len()` against `expected`,
    /// in constant time.
    pub fn finalize_check(self, expected: &[u8]) -> Result<(), Error> {
        debug_assert!(expected.len() <= MAX_TAG_LEN);
        let mut tag = [0u8; MAX_TAG_LEN];
        let computed = &mut tag[..expected.len()];
        self.0.finalize_xof().fill(computed);
        if bool::from(computed.ct_eq(expected)) {
            Ok(())
        } else {
            Err(Error::InvalidTag)
        }
    }
}
