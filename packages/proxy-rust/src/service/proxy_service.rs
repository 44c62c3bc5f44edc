//! Tower service adapter over [`AppProxy`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use app_proxy_core::ACK;
use tower::Service;

use crate::proxy::AppProxy;
use crate::service::operation::{BridgeCall, BridgeReply, CallError};

/// Innermost service of the pipeline: forwards each call to the bridge.
#[derive(Clone)]
pub struct ProxyService {
    proxy: Arc<AppProxy>,
}

impl ProxyService {
    #[must_use]
    pub fn new(proxy: Arc<AppProxy>) -> Self {
        Self { proxy }
    }

    #[must_use]
    pub fn proxy(&self) -> &AppProxy {
        &self.proxy
    }
}

impl Service<BridgeCall> for ProxyService {
    type Response = BridgeReply;
    type Error = CallError;
    type Future = Pin<Box<dyn Future<Output = Result<BridgeReply, CallError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: BridgeCall) -> Self::Future {
        let proxy = Arc::clone(&self.proxy);
        Box::pin(async move {
            match call {
                BridgeCall::Search(text) => Ok(BridgeReply::Records(proxy.search(&text).await?)),
                BridgeCall::Write(text) => {
                    let response = proxy.write(&text).await?;
                    if response == ACK {
                        Ok(BridgeReply::Ack)
                    } else {
                        Ok(BridgeReply::Created(response))
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use app_proxy_core::{BridgeError, EntitySchema, FieldType};
    use tower::ServiceExt;

    use super::*;
    use crate::config::ProxyConfig;
    use crate::storage::MemoryStore;

    fn service() -> ProxyService {
        let party = EntitySchema::new("party").with_field("name", FieldType::Char);
        let store = MemoryStore::new([party]).unwrap();
        ProxyService::new(Arc::new(AppProxy::new(
            Arc::new(store),
            ProxyConfig::default(),
        )))
    }

    #[tokio::test]
    async fn write_replies_distinguish_ack_from_created() {
        let svc = service();
        let reply = svc
            .clone()
            .oneshot(BridgeCall::Write(r#"{"party":[[-1,{"name":"A"}]]}"#.to_string()))
            .await
            .unwrap();
        assert_eq!(reply, BridgeReply::Created(r#"{"party":[1]}"#.to_string()));

        let reply = svc
            .oneshot(BridgeCall::Write(r#"{"party":[[1,{"name":"B"}]]}"#.to_string()))
            .await
            .unwrap();
        assert_eq!(reply, BridgeReply::Ack);
    }

    #[tokio::test]
    async fn bridge_failures_surface_as_call_errors() {
        let err = service()
            .oneshot(BridgeCall::Search("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CallError::Bridge(BridgeError::MalformedEnvelope { .. })
        ));
    }
}
