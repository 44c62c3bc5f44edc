//! Admission and deadline guard for bridge calls.
//!
//! A call is admitted only while fewer than `max_concurrent_calls` are in
//! flight; the rest fail at once with `CallError::Overloaded`. Admitted calls
//! run under the deadline of their kind: writes use `write_timeout_ms` when it
//! is set, everything else `call_timeout_ms`. A write cut short by its
//! deadline may already have applied some of its groups.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::Semaphore;
use tower::{Layer, Service};
use tracing::warn;

use crate::config::ProxyConfig;
use crate::service::operation::{BridgeCall, BridgeReply, CallError};

/// Deadlines per call kind, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallBudget {
    pub search_ms: u64,
    pub write_ms: u64,
}

impl CallBudget {
    #[must_use]
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            search_ms: config.call_timeout_ms,
            write_ms: config.write_timeout_ms.unwrap_or(config.call_timeout_ms),
        }
    }

    #[must_use]
    pub fn for_call(&self, call: &BridgeCall) -> u64 {
        match call {
            BridgeCall::Search(_) => self.search_ms,
            BridgeCall::Write(_) => self.write_ms,
        }
    }
}

/// Layer shared by every clone of the pipeline: one permit pool, one shed
/// counter.
#[derive(Debug, Clone)]
pub struct CallGuardLayer {
    permits: Arc<Semaphore>,
    budget: CallBudget,
    shed: Arc<AtomicU64>,
}

impl CallGuardLayer {
    #[must_use]
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_calls as usize)),
            budget: CallBudget::from_config(config),
            shed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Calls rejected for lack of a permit since the layer was built.
    #[must_use]
    pub fn shed_calls(&self) -> u64 {
        self.shed.load(Ordering::Relaxed)
    }
}

impl<S> Layer<S> for CallGuardLayer {
    type Service = CallGuard<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CallGuard {
            inner,
            guard: self.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallGuard<S> {
    inner: S,
    guard: CallGuardLayer,
}

impl<S> Service<BridgeCall> for CallGuard<S>
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
        // Taken here rather than in poll_ready so a full pool fails fast.
        let Ok(permit) = Arc::clone(&self.guard.permits).try_acquire_owned() else {
            let shed = self.guard.shed.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(kind, shed, "call shed");
            return Box::pin(async move { Err(CallError::Overloaded { kind }) });
        };
        let timeout_ms = self.guard.budget.for_call(&call);
        let fut = self.inner.call(call);
        Box::pin(async move {
            let _permit = permit;
            tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
                .await
                .unwrap_or(Err(CallError::Timeout { kind, timeout_ms }))
        })
    }
}
