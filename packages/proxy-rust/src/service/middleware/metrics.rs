//! Metrics middleware for bridge calls.
//!
//! Records call duration and outcome on a `tracing` span.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{BridgeCall, BridgeReply, CallError};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments calls with timing and outcome.
#[derive(Debug, Clone, Copy)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Outcome label of a finished call.
fn outcome(result: &Result<BridgeReply, CallError>) -> &'static str {
    match result {
        Ok(BridgeReply::Ack) => "ack",
        Ok(_) => "ok",
        Err(CallError::Bridge(err)) if err.is_client_error() => "rejected",
        Err(CallError::Bridge(_)) => "failed",
        Err(CallError::Timeout { .. }) => "timeout",
        Err(CallError::Overloaded { .. }) => "overloaded",
    }
}

impl<S> Service<BridgeCall> for MetricsService<S>
where
    S: Service<BridgeCall, Response = BridgeReply, Error = CallError> + Send,
    S::Future: Send + 'static,
{
    type Response = BridgeReply;
    type Error = CallError;
    type Future = Pin<Box<dyn Future<Output = Result<BridgeReply, CallError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: BridgeCall) -> Self::Future {
        let kind = call.kind();
        let span = info_span!(
            "bridge_call",
            kind,
            request_bytes = call.payload().len(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                let label = outcome(&result);
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", label);
                match &result {
                    Err(err) => {
                        tracing::warn!(
                            kind,
                            duration_ms,
                            outcome = label,
                            error = %err,
                            "call failed"
                        );
                    }
                    Ok(_) => tracing::info!(kind, duration_ms, outcome = label, "call complete"),
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use app_proxy_core::BridgeError;
    use tower::ServiceExt;

    use super::*;

    /// Replies immediately with the write payload echoed back.
    struct EchoService;

    impl Service<BridgeCall> for EchoService {
        type Response = BridgeReply;
        type Error = CallError;
        type Future = Pin<Box<dyn Future<Output = Result<BridgeReply, CallError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: BridgeCall) -> Self::Future {
            Box::pin(async move {
                match call {
                    BridgeCall::Write(text) => Ok(BridgeReply::Created(text)),
                    BridgeCall::Search(_) => Err(BridgeError::EmptyResult.into()),
                }
            })
        }
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_response() {
        let svc = MetricsLayer.layer(EchoService);
        let reply = svc
            .oneshot(BridgeCall::Write("{\"party\":[1]}".to_string()))
            .await
            .unwrap();
        assert_eq!(reply, BridgeReply::Created("{\"party\":[1]}".to_string()));
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_errors() {
        let svc = MetricsLayer.layer(EchoService);
        let err = svc
            .oneshot(BridgeCall::Search("[]".to_string()))
            .await
            .unwrap_err();
        assert_eq!(outcome(&Err(err)), "rejected");
    }
}
