//! Tower middleware layers for the call pipeline.
//!
//! - [`metrics`]: call timing and outcome via `tracing` spans
//! - [`guard`]: admission limit and per-kind deadlines
//! - [`pipeline`]: composes the layers around the bridge

pub mod guard;
pub mod metrics;
pub mod pipeline;

pub use guard::{CallBudget, CallGuardLayer};
pub use metrics::MetricsLayer;
pub use pipeline::build_proxy_pipeline;
