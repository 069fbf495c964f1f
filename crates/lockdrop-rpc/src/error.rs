use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error talking to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("cannot decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("snapshot block {snapshot} is ahead of chain head {head}")]
    SnapshotAhead { snapshot: u64, head: u64 },

    #[error("no lockdrop contract addresses configured")]
    NoContracts,

    #[error("gave up on {label} after {attempts} attempts: {last}")]
    RetriesExhausted {
        label: String,
        attempts: u32,
        #[source]
        last: Box<RpcError>,
    },
}

impl RpcError {
    pub(crate) fn decode(what: &'static str, reason: impl ToString) -> Self {
        RpcError::Decode {
            what,
            reason: reason.to_string(),
        }
    }

    /// Failures that are retried under the configured `RetryPolicy`.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Transport { .. } => true,
            RpcError::Node { code, message } => node_error_is_transient(*code, message),
            _ => false,
        }
    }
}

/// Node messages that will fail the same way however often they are sent.
const PERMANENT_HINTS: &[&str] = &[
    "execution reverted",
    "query returned more than",
    "response size",
    "block range",
    "too many results",
];

const TRANSIENT_HINTS: &[&str] = &[
    "header not found",
    "timeout",
    "timed out",
    "rate limit",
    "too many requests",
    "try again",
];

/// Rate limits, timeouts and not-yet-synced state are retried; malformed
/// requests, reverts and result-size limits are not.
fn node_error_is_transient(code: i64, message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    if PERMANENT_HINTS.iter().any(|hint| message.contains(hint)) {
        return false;
    }
    match code {
        -32600 | -32601 | -32602 | 3 => false,
        -32000 | -32005 | -32603 | 429 => true,
        _ => TRANSIENT_HINTS.iter().any(|hint| message.contains(hint)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(code: i64, message: &str) -> RpcError {
        RpcError::Node {
            code,
            message: message.into(),
        }
    }

    #[test]
    fn node_errors_are_classified_by_code_and_message() {
        assert!(node(-32005, "rate limited").is_transient());
        assert!(node(-32000, "header not found").is_transient());
        assert!(node(-32603, "internal error").is_transient());
        assert!(node(-1, "request timed out").is_transient());

        assert!(!node(-32602, "invalid params").is_transient());
        assert!(!node(-32601, "method not found").is_transient());
        assert!(!node(3, "execution reverted").is_transient());
        assert!(!node(-32000, "execution reverted: not started").is_transient());
        assert!(!node(-32005, "query returned more than 10000 results").is_transient());
        assert!(!node(-1, "unknown failure").is_transient());
    }

    #[test]
    fn local_failures_are_never_transient() {
        assert!(node(-32005, "rate limited").is_transient());
        assert!(!RpcError::decode("log", "short data").is_transient());
        assert!(!RpcError::NoContracts.is_transient());
        assert!(!RpcError::SnapshotAhead { snapshot: 10, head: 5 }.is_transient());
    }
}
