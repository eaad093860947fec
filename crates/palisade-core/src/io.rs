//! Collaborator traits for randomness and timestamping.
//!
//! The core never talks to the OS directly; it goes through these traits so
//! embedded integrations can supply their own TRNG and millisecond timer,
//! and tests can supply deterministic stubs.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::is_all_zeros;
use crate::errors::Error;
use crate::time::Timestamp;

/// Consecutive all-zeros TRNG draws tolerated before giving up.
///
/// Assuming one honest random byte per draw, 20 all-zero draws in a row is
/// rarer than guessing an AES-128 key; reaching the limit means the
/// generator is broken, not unlucky.
pub const MAX_TRNG_TRIES_FOR_NONZERO: u32 = 20;

/// True-random number generator collaborator.
pub trait Trng {
    /// Fill `out` with random bytes, or fail with
    /// [`Error::CannotGenerateRandom`] leaving `out` unspecified.
    fn fill(&mut self, out: &mut [u8]) -> Result<(), Error>;
}

/// Millisecond timestamp collaborator.
///
/// The returned value is a rolling counter with no defined origin; the core
/// only ever computes differences.
pub trait Clock {
    fn now(&mut self) -> Result<Timestamp, Error>;
}

/// The collaborators a context needs to operate.
pub struct Io {
    pub trng: Box<dyn Trng>,
    pub clock: Box<dyn Clock>,
}

impl Io {
    /// OS-backed collaborators: the system CSPRNG and a monotonic
    /// millisecond counter.
    pub fn os() -> Self {
        Self {
            trng: Box::new(OsTrng),
            clock: Box::new(SystemClock::new()),
        }
    }

    /// Draw random bytes that are not all zero, retrying the TRNG up to
    /// [`MAX_TRNG_TRIES_FOR_NONZERO`] times.
    pub fn non_zero_random(&mut self, out: &mut [u8]) -> Result<(), Error> {
        for _ in 0..MAX_TRNG_TRIES_FOR_NONZERO {
            self.trng.fill(out)?;
            if !is_all_zeros(out) {
                return Ok(());
            }
        }
        Err(Error::CannotGenerateNonZeroRandom)
    }
}

/// TRNG backed by the operating system's entropy source.
pub struct OsTrng;

impl Trng for OsTrng {
    fn fill(&mut self, out: &mut [u8]) -> Result<(), Error> {
        OsRng
            .try_fill_bytes(out)
            .map_err(|_| Error::CannotGenerateRandom)
    }
}

/// Monotonic millisecond counter starting at process-local zero.
pub struct SystemClock {
    origin: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&mut self) -> Result<Timestamp, Error> {
        // Truncation to 32 bits is deliberate: elapsed-time comparisons use
        // wrapping subtraction.
        Ok(self.origin.elapsed().as_millis() as Timestamp)
    }
}
