//! Pipeline composition: wraps the bridge service with every middleware layer.

use std::sync::Arc;

use tower::ServiceBuilder;

use super::guard::CallGuardLayer;
use super::metrics::MetricsLayer;
use crate::proxy::AppProxy;
use crate::service::operation::{BridgeCall, BridgeReply, CallError};
use crate::service::proxy_service::ProxyService;

/// Builds the call pipeline around `proxy`, configured from its [`crate::ProxyConfig`].
///
/// Metrics wrap the guard, so shed and timed-out calls are recorded with
/// their kind and outcome like any other.
#[must_use]
pub fn build_proxy_pipeline(
    proxy: Arc<AppProxy>,
) -> impl tower::Service<BridgeCall, Response = BridgeReply, Error = CallError> + Clone {
    let guard = CallGuardLayer::new(proxy.config());
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(guard)
        .service(ProxyService::new(Arc::clone(&proxy)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
