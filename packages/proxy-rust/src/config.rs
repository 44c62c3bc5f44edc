use app_proxy_core::UnknownFieldPolicy;
use serde::{Deserialize, Serialize};

/// Bridge-level configuration.
///
/// Built once at startup and shared read-only; the bridge never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Handling of write attributes that are not writable on the entity type.
    pub unknown_field_policy: UnknownFieldPolicy,
    /// Maximum number of entity-type groups of one request processed at once.
    pub max_concurrent_groups: usize,
    /// Timeout applied by the service pipeline, in milliseconds.
    pub call_timeout_ms: u64,
    /// Timeout for write calls; `None` uses `call_timeout_ms`.
    pub write_timeout_ms: Option<u64>,
    /// Maximum number of in-flight calls before the pipeline sheds load.
    pub max_concurrent_calls: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            unknown_field_policy: UnknownFieldPolicy::Drop,
            max_concurrent_groups: 8,
            call_timeout_ms: 30_000,
            write_timeout_ms: None,
            max_concurrent_calls: 1000,
        }
    }
}
