use thiserror::Error;

/// Errors surfaced by the threshold key core.
///
/// Every failure a caller can act on gets its own variant; nothing is
/// silently swallowed. The only sanctioned retry pattern is re-fetching the
/// latest metadata after a [`Error::MetadataConflict`] and replaying the
/// mutation, which remains the caller's responsibility.
#[derive(Error, Debug)]
pub enum Error {
    /// Fewer shares available than the polynomial's threshold requires.
    #[error("insufficient shares: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    /// No public share commitment matches the given share.
    #[error("share not found in metadata")]
    ShareNotFound,

    /// A held share belongs to a superseded polynomial and no stored
    /// transfer chain leads to the latest one.
    #[error("share is stale: {0}")]
    ShareStale(String),

    /// A share's commitment does not match the one recorded in metadata.
    #[error("share commitment does not match metadata")]
    InvalidShareCommitment,

    /// No self-addressed encrypted backup exists for the given share.
    #[error("encrypted share unavailable for commitment {0}")]
    EncryptedShareUnavailable(String),

    /// The requested share index is already committed under the latest
    /// polynomial.
    #[error("duplicate share index {0}")]
    DuplicateShareIndex(String),

    /// `never_initialize_new_key` was set and neither a local nor a remote
    /// share exists.
    #[error("no existing key found and new key creation is disabled")]
    ExistingKeyNotFound,

    /// A concurrent writer already persisted metadata at or past the nonce
    /// this write carried.
    #[error("metadata write conflict: store already holds nonce {0}")]
    MetadataConflict(u64),

    /// The persisted wire format could not be produced or parsed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failure inside the encryption primitive or curve codec.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The storage collaborator failed for a reason other than a nonce
    /// conflict.
    #[error("storage error: {0}")]
    Storage(String),

    /// Operation requires state the orchestrator has not reached yet
    /// (e.g. reconstructing before initializing).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
