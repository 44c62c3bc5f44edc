//! Closed error taxonomy shared by the codec and the bridge.

/// Result alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Every failure a `search` or `write` call can surface.
///
/// All variants abort the whole request; the bridge never returns a partial
/// payload alongside an error.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Request text is not valid JSON or does not have the envelope shape.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    /// A well-formed search produced no data at all.
    #[error("unable to fetch required data: search produced no records")]
    EmptyResult,

    /// The store does not know the requested entity type.
    #[error("unknown entity type: {name}")]
    UnknownEntityType { name: String },

    /// The store failed while reading.
    #[error("query on {entity_type} failed: {source}")]
    StoreQueryFailure {
        entity_type: String,
        #[source]
        source: anyhow::Error,
    },

    /// The store failed while updating or creating.
    #[error("write on {entity_type} failed: {source}")]
    StoreWriteFailure {
        entity_type: String,
        #[source]
        source: anyhow::Error,
    },

    /// A response value could not be encoded as JSON.
    #[error("an error occurred while creating the response: {reason}")]
    SerializationFailure { reason: String },

    /// A write named an attribute that is not writable, under the strict policy.
    #[error("attribute {field} is not writable on {entity_type}")]
    RejectedField { entity_type: String, field: String },
}

impl BridgeError {
    /// Shorthand for [`BridgeError::MalformedEnvelope`].
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`BridgeError::SerializationFailure`].
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::SerializationFailure {
            reason: reason.into(),
        }
    }

    /// Whether the failure was caused by the caller's input rather than the store.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedEnvelope { .. }
                | Self::EmptyResult
                | Self::UnknownEntityType { .. }
                | Self::RejectedField { .. }
        )
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}
