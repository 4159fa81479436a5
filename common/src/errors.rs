use std::fmt::{Display, Formatter};
use thiserror::Error;

pub type WalletResult<T> = Result<T, WalletError>;

/// Classification of an indexer failure, used by the retry decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkErrorKind {
    Timeout,
    ConnectionRefused,
    ServerUnavailable,
    ServerIndexing,
    RateLimited,
    Protocol,
}

impl NetworkErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            NetworkErrorKind::Timeout => "NETWORK_TIMEOUT",
            NetworkErrorKind::ConnectionRefused => "CONNECTION_REFUSED",
            NetworkErrorKind::ServerUnavailable => "SERVER_UNAVAILABLE",
            NetworkErrorKind::ServerIndexing => "SERVER_INDEXING",
            NetworkErrorKind::RateLimited => "RATE_LIMITED",
            NetworkErrorKind::Protocol => "PROTOCOL_ERROR",
        }
    }
}

impl Display for NetworkErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error, Clone)]
pub enum WalletError {
    #[error("invalid UTXO structure: {0}")]
    InvalidUtxoStructure(String),

    #[error("insufficient funds: {required} sats required, only {available} sats available")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("insufficient {ticker} balance: need {need}, have {have}")]
    InsufficientToken {
        ticker: String,
        need: String,
        have: String,
    },

    #[error("insufficient XEC to fund token transaction: need {need_sats} sats, have {have_sats} sats")]
    InsufficientXec { need_sats: u64, have_sats: u64 },

    #[error("output of {sats} sats is below the dust limit of {limit} sats")]
    DustOutput { sats: u64, limit: u64 },

    #[error("OP_RETURN payload of {len} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("unknown token protocol: {0}")]
    UnknownProtocol(String),

    #[error("token {token_id} belongs to protocol {actual}, not {requested}")]
    WrongProtocolForToken {
        token_id: String,
        requested: String,
        actual: String,
    },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("{count} recipients exceed the maximum of {max} per transaction")]
    TooManyRecipients { count: usize, max: usize },

    #[error("{kind} from {endpoint}: {message}")]
    Network {
        kind: NetworkErrorKind,
        endpoint: String,
        message: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("cached UTXO set is stale")]
    CacheStale,

    #[error("unsupported script type")]
    UnsupportedScript,
}

impl WalletError {
    /// Stable machine code for every error kind.
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::InvalidUtxoStructure(_) => "INVALID_UTXO_STRUCTURE",
            WalletError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            WalletError::InsufficientToken { .. } => "INSUFFICIENT_TOKEN",
            WalletError::InsufficientXec { .. } => "INSUFFICIENT_XEC",
            WalletError::DustOutput { .. } => "DUST_OUTPUT",
            WalletError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            WalletError::UnknownProtocol(_) => "UNKNOWN_PROTOCOL",
            WalletError::WrongProtocolForToken { .. } => "WRONG_PROTOCOL_FOR_TOKEN",
            WalletError::InvalidAddress(_) => "INVALID_ADDRESS",
            WalletError::InvalidKey(_) => "INVALID_KEY",
            WalletError::TooManyRecipients { .. } => "TOO_MANY_RECIPIENTS",
            WalletError::Network { kind, .. } => kind.code(),
            WalletError::Cancelled => "CANCELLED",
            WalletError::CacheStale => "CACHE_STALE",
            WalletError::UnsupportedScript => "UNSUPPORTED_SCRIPT",
        }
    }

    pub fn network(kind: NetworkErrorKind, endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        WalletError::Network {
            kind,
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Whether the retry loop may attempt this operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            WalletError::Network { kind, .. } => !matches!(kind, NetworkErrorKind::Protocol),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(WalletError::Cancelled.code(), "CANCELLED");
        assert_eq!(
            WalletError::InsufficientFunds {
                required: 2,
                available: 1
            }
            .code(),
            "INSUFFICIENT_FUNDS"
        );
        assert_eq!(
            WalletError::network(NetworkErrorKind::RateLimited, "https://a", "429").code(),
            "RATE_LIMITED"
        );
    }

    #[test]
    fn network_errors_are_retryable_except_protocol() {
        assert!(WalletError::network(NetworkErrorKind::Timeout, "e", "m").is_retryable());
        assert!(WalletError::network(NetworkErrorKind::ServerIndexing, "e", "m").is_retryable());
        assert!(!WalletError::network(NetworkErrorKind::Protocol, "e", "m").is_retryable());
        assert!(!WalletError::Cancelled.is_retryable());
    }

    #[test]
    fn token_deficit_message_uses_display_units() {
        let err = WalletError::InsufficientToken {
            ticker: "FLEX".to_string(),
            need: "12.5".to_string(),
            have: "3.75".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "insufficient FLEX balance: need 12.5, have 3.75"
        );
    }
}
