//! Call pipeline for transports that expose the bridge.
//!
//! 1. **Calls** (`operation`): `BridgeCall` in, `BridgeReply` or `CallError` out
//! 2. **Bridge service** (`proxy_service`): forwards calls to `AppProxy`
//! 3. **Middleware** (`middleware`): tower layers (admission and deadlines, metrics)

pub mod middleware;
pub mod operation;
pub mod proxy_service;

pub use middleware::build_proxy_pipeline;
pub use operation::{BridgeCall, BridgeReply, CallError};
pub use proxy_service::ProxyService;
