//! Error taxonomy for the whole protocol core.
//!
//! Three groups share one enum so every API returns the same error type:
//!   1. Standard CBS security warnings (wire-level codes 1..=15)
//!   2. Configuration / API misuse
//!   3. Infrastructure failures (TRNG, clock, config file I/O)
//!
//! A security warning never tears down a session — the caller may log or
//! count it and carry on. [`Error::MsgIgnored`] is not an alarm at all: the
//! message was addressed to someone else or is redundant in a benign state.

use thiserror::Error;

/// Everything that can go wrong in the core.
///
/// The CBS standard reserves numeric codes 1..=15 for security warnings;
/// [`Error::code`] reports them for callers bridging to the wire-level
/// numbering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // ── CBS standard security warnings ────────────────────────────────────

    /// Message is not intact, not authentic, or was protected with the wrong
    /// key material. CBS warning "INV".
    #[error("invalid authentication tag")]
    InvalidTag,

    /// The transmitter's SID in the header equals the receiver's own SID.
    /// CBS warning "MFM".
    #[error("message claims to come from the receiving party itself")]
    MessageFromMyself,

    /// A Response arrived while no handshake is pending. Client-side only.
    /// CBS warning "NER".
    #[error("not expecting a response")]
    NotExpectingAResponse,

    /// A message only the Server may send carried a non-Server SID.
    /// CBS warning "SOM".
    #[error("server-only message from a non-server SID")]
    ServerOnlyMessage,

    /// The Response did not arrive within the configured timeout.
    /// Client-side only. CBS warning "RTO".
    #[error("response arrived after the request timeout")]
    ResponseTimeout,

    /// The received counter nonce is older than the adaptive tolerance
    /// allows. CBS warning "OLD".
    #[error("counter nonce too old")]
    OldMessage,

    /// Reserved: too many suspect messages. Accounting is not implemented.
    /// CBS warning "DOS".
    #[error("denial of service suspected")]
    DenialOfService,

    /// The requesting Client is not a member of the requested Group.
    /// Server-side only. CBS warning "NIG".
    #[error("client is not a member of the group")]
    NotInGroup,

    /// The received counter nonce reached its maximum value, so the session
    /// it belongs to is expired. CBS warning "RON".
    #[error("received an overflown counter nonce")]
    ReceivedOverflownNonce,

    /// A decrypted Response carried an all-zeros STK. Client-side only.
    /// CBS warning "RZK".
    #[error("received an all-zeros short-term key")]
    ReceivedZeroKey,

    /// A Request carried an all-zeros request nonce. Server-side only.
    #[error("received an all-zeros request nonce")]
    ReceivedZeroReqNonce,

    // ── Configuration / API misuse ────────────────────────────────────────

    #[error("unknown or unsupported CBS header type")]
    InvalidHeaderType,

    #[error("configuration contains zero groups")]
    ZeroGroups,

    #[error("configuration contains zero clients")]
    ZeroClients,

    #[error("more clients configured than the group bitmap can hold")]
    TooManyClients,

    #[error("a long-term key is all-zeros")]
    LtkIsAllZeros,

    #[error("the server SID (0) is assigned to a client")]
    ServerSidAssignedToClient,

    #[error("client SIDs are not sorted strictly ascending")]
    SidsNotStrictlyAscending,

    #[error("client SIDs do not cover 1..=n without gaps")]
    GapInSids,

    #[error("SID does not fit the configured header type")]
    SidTooLargeForHeaderType,

    #[error("amount of groups does not fit the configured header type")]
    TooManyGroupsForHeaderType,

    #[error("amount of clients does not fit the configured header type")]
    TooManyClientsForHeaderType,

    #[error("group GIDs are not sorted strictly ascending")]
    GidsNotStrictlyAscending,

    #[error("group GIDs do not cover 0..n without gaps")]
    GapInGids,

    #[error("the broadcast group (GID 0) is missing")]
    MissingGid0,

    #[error("GID does not fit the configured header type")]
    GidTooLargeForHeaderType,

    #[error("max counter nonce delay out of the allowed range")]
    InvalidMaxCtrNonceDelay,

    #[error("counter nonce upper limit out of the allowed range")]
    TooLargeCtrNonceUpperLimit,

    #[error("delay between renewal notifications out of the allowed range")]
    InvalidDelayBetweenRenNotifications,

    #[error("a group bitmap contains no clients")]
    ClientsBitmapZeroClients,

    #[error("a group bitmap contains an unknown client SID")]
    ClientsBitmapUnknownSid,

    #[error("the broadcast group bitmap does not include every client")]
    ClientsBitmapInvalidBroadcastGroup,

    // ── TX / RX processing ────────────────────────────────────────────────

    #[error("GID not present in this party's configuration")]
    UnknownGroup,

    #[error("SID not present in the server's configuration")]
    UnknownSource,

    #[error("no valid session information for the group")]
    SessionNotEstablished,

    #[error("user data too long for the message type")]
    TooLongSdu,

    #[error("handshake still ongoing, retry after it completes")]
    HandshakeOngoing,

    #[error("no client has requested the session information yet")]
    NoPotentialReceiver,

    #[error("unknown payload type field")]
    InvalidPayloadType,

    #[error("message type is reserved but not implemented")]
    NotImplemented,

    #[error("PDU too short to contain the CBS header")]
    TooShortPduToContainHeader,

    #[error("PDU too short to contain a SADFD message")]
    TooShortPduToContainSadfd,

    #[error("PDU too short to contain a REQ message")]
    TooShortPduToContainReq,

    #[error("PDU too short to contain a RES message")]
    TooShortPduToContainRes,

    #[error("PDU too short to contain a REN message")]
    TooShortPduToContainRen,

    #[error("in-message plaintext length exceeds the PDU bounds")]
    TooLongCiphertext,

    /// The message is not addressed to this party or is redundant in a
    /// benign state. Not an alarm.
    #[error("message ignored")]
    MsgIgnored,

    // ── Infrastructure ────────────────────────────────────────────────────

    #[error("timestamping source failed")]
    CannotGetCurrentTime,

    #[error("true-random number generator failed")]
    CannotGenerateRandom,

    #[error("TRNG produced all-zeros output for too many draws in a row")]
    CannotGenerateNonZeroRandom,

    #[error("cannot open the configuration file")]
    CannotOpenConfigFile,

    #[error("configuration file ended before the expected amount of data")]
    UnexpectedEof,

    #[error("configuration file magic number mismatch")]
    InvalidFileMagicNumber,
}

impl Error {
    /// The CBS wire-level code of this error, if it is a standard security
    /// warning (codes 1..=15); `None` otherwise.
    pub fn code(&self) -> Option<u8> {
        let code = match self {
            Error::InvalidTag => 1,
            Error::MessageFromMyself => 2,
            Error::NotExpectingAResponse => 3,
            Error::ServerOnlyMessage => 4,
            Error::ResponseTimeout => 5,
            Error::OldMessage => 6,
            Error::DenialOfService => 7,
            Error::NotInGroup => 8,
            Error::ReceivedOverflownNonce => 9,
            Error::ReceivedZeroKey => 10,
            Error::ReceivedZeroReqNonce => 11,
            _ => return None,
        };
        Some(code)
    }

    /// True for the standard CBS security warnings.
    ///
    /// These indicate a suspect message on the bus, not a local defect; the
    /// session survives and repair happens through a fresh REQ/RES exchange.
    pub fn is_security_warning(&self) -> bool {
        self.code().is_some()
    }
}
