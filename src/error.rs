//! Error types for every layer of the session engine.
//!
//! All of these are recoverable: the session turns them into `last_error`
//! for the screen instead of ending the process.

use crate::session::Mode;

/// Failures while pulling one metadata block out of a byte stream.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The stream ended before `metaint` audio bytes were seen.
    #[error("stream ended prematurely ({got} of {expected} audio bytes)")]
    ShortRead { expected: usize, got: usize },

    /// The length byte or the metadata block itself was cut short.
    #[error("metadata block truncated")]
    Truncated,

    #[error("stream read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a single metadata poll against a station.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("station answered with HTTP {0}")]
    Status(reqwest::StatusCode),

    /// The server ignored `Icy-MetaData: 1`.
    #[error("station does not send an icy-metaint header")]
    MissingMetaInt,

    #[error("invalid icy-metaint header: {0:?}")]
    InvalidMetaInt(String),

    #[error("metadata request timed out")]
    Timeout,

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("station cache has not been downloaded yet")]
    CacheMissing,

    /// The cache file exists but cannot be read as a station list.
    #[error("station cache is unreadable: {0}")]
    CacheUnreadable(String),

    #[error("no station tagged {0:?}")]
    NotFound(String),

    #[error("search tag is empty")]
    EmptyTag,
}

impl ResolveError {
    /// Whether a directory refresh is the way out of this error.
    pub fn needs_refresh(&self) -> bool {
        matches!(self, Self::CacheMissing | Self::CacheUnreadable(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("station directory request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("station directory sent an invalid station list: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("could not write station cache: {0}")]
    Write(#[from] std::io::Error),
}

/// Errors raised by a Playback Port implementation.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    Output(String),

    #[error("failed to spawn decoder: {0}")]
    Spawn(#[source] std::io::Error),

    /// The decoder gave up on the stream (unreachable, unsupported format, dropped).
    #[error("stream stopped: {0}")]
    Stopped(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error("no station selected")]
    NoStation,

    #[error("cannot {op} while {mode:?}")]
    InvalidTransition { op: &'static str, mode: Mode },

    #[error("station list was missing and has been downloaded, search again")]
    CacheRecovered,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_cache_recovers_like_a_missing_one() {
        assert!(ResolveError::CacheMissing.needs_refresh());
        assert!(ResolveError::CacheUnreadable("bad json".into()).needs_refresh());
        assert!(!ResolveError::NotFound("jazz".into()).needs_refresh());
        assert!(!ResolveError::EmptyTag.needs_refresh());
    }
}
