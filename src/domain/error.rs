//! Domain error types.

use chrono::NaiveDateTime;

/// Top-level error type for signalbt.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("broker authentication failed: {reason}")]
    Auth { reason: String },

    #[error("price provider error: {reason}")]
    Provider { reason: String },

    #[error("unknown symbol {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("cannot load trade entries: {reason}")]
    Ingest { reason: String },

    #[error("no trades could be processed ({entries} entries, {skipped} skipped)")]
    BatchEmpty { entries: usize, skipped: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SignalError {
    /// Errors that invalidate the whole batch rather than a single entry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SignalError::Auth { .. })
    }
}

/// Why a trade entry produced no result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SkipReason {
    #[error("no price data")]
    DataUnavailable,

    #[error("price fetch failed: {reason}")]
    ProviderFailed { reason: String },

    #[error("no valid bar within the entry window")]
    EntryUnresolvable,

    #[error("no stop-loss, target or time-exit bar")]
    ExitUnresolvable,

    #[error("holding period or fetch range runs past the supported calendar")]
    DateOutOfRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEntry {
    pub symbol: String,
    pub entry_datetime: NaiveDateTime,
    pub reason: SkipReason,
}

impl From<&SignalError> for std::process::ExitCode {
    fn from(err: &SignalError) -> Self {
        let code: u8 = match err {
            SignalError::Io(_) => 1,
            SignalError::ConfigParse { .. }
            | SignalError::ConfigMissing { .. }
            | SignalError::ConfigInvalid { .. } => 2,
            SignalError::Auth { .. }
            | SignalError::Provider { .. }
            | SignalError::UnknownSymbol { .. } => 3,
            SignalError::Ingest { .. } => 4,
            SignalError::BatchEmpty { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auth_is_fatal() {
        assert!(SignalError::Auth { reason: "bad totp".into() }.is_fatal());
        assert!(!SignalError::Provider { reason: "503".into() }.is_fatal());
        assert!(!SignalError::UnknownSymbol { symbol: "XYZ".into() }.is_fatal());
    }

    #[test]
    fn batch_empty_message_counts() {
        let err = SignalError::BatchEmpty {
            entries: 3,
            skipped: 3,
        };
        assert_eq!(
            err.to_string(),
            "no trades could be processed (3 entries, 3 skipped)"
        );
    }

    #[test]
    fn skip_reason_display() {
        let reason = SkipReason::ProviderFailed {
            reason: "timeout".into(),
        };
        assert_eq!(reason.to_string(), "price fetch failed: timeout");
    }
}
