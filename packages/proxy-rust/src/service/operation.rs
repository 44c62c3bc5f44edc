use app_proxy_core::{BridgeError, ACK};

/// A request to the bridge as seen by the service pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCall {
    /// Search request text.
    Search(String),
    /// Write request text.
    Write(String),
}

impl BridgeCall {
    /// Short label used in spans and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Search(_) => "search",
            Self::Write(_) => "write",
        }
    }

    /// The raw request text.
    #[must_use]
    pub fn payload(&self) -> &str {
        match self {
            Self::Search(text) | Self::Write(text) => text,
        }
    }
}

/// Successful response of a bridge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeReply {
    /// Encoded search result, keyed by entity type.
    Records(String),
    /// Encoded map of created identifiers.
    Created(String),
    /// A write that created nothing.
    Ack,
}

impl BridgeReply {
    /// Response text as returned to the client.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Records(text) | Self::Created(text) => text,
            Self::Ack => ACK.to_string(),
        }
    }
}

/// Errors returned by the service pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("{kind} call timed out after {timeout_ms}ms")]
    Timeout { kind: &'static str, timeout_ms: u64 },
    #[error("proxy overloaded, {kind} call shed")]
    Overloaded { kind: &'static str },
}
