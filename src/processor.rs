//! The seam between the gateway and the processing core.
//!
//! The gateway hands every normalized request to a [`Processor`] and never
//! looks at the answer: the processor replies through the request's responder.

use std::future::Future;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use serde_json::json;

use crate::http::request::NormalizedRequest;
use crate::http::response::Respond;

/// Consumes normalized requests and answers them through their responder.
pub trait Processor: Send + Sync + 'static {
    fn process(&self, request: NormalizedRequest) -> BoxFuture<'static, ()>;
}

impl<F, Fut> Processor for F
where
    F: Fn(NormalizedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn process(&self, request: NormalizedRequest) -> BoxFuture<'static, ()> {
        Box::pin(self(request))
    }
}

/// Answers every request with a JSON description of what was received.
///
/// Used by the binary when no processing core is linked in, and by tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoProcessor;

impl Processor for EchoProcessor {
    fn process(&self, request: NormalizedRequest) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let body = json!({
                "method": request.method().as_str(),
                "path": request.path(),
                "query": request.query(),
                "endpoint": request.endpoint(),
                "filesystem": request.is_filesystem_op(),
                "api": request.is_api_op(),
                "data": request.data(),
                "files": request.files(),
                "session": request.session().id(),
                "transport": request.transport(),
            });

            if let Err(e) = request.into_responder().json(body, StatusCode::OK).await {
                tracing::debug!(error = %e, "Echo reply not delivered");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestPayload;
    use crate::http::response::{HttpResponder, Responder};
    use crate::session::{MemorySessionStore, SessionHandle};
    use axum::http::Method;
    use std::sync::Arc;

    #[tokio::test]
    async fn echo_describes_the_request() {
        let (responder, rx) = HttpResponder::new();
        let session = SessionHandle::new("s1", Arc::new(MemorySessionStore::new()));
        let request = NormalizedRequest::new(
            Method::GET,
            "/API/status".to_string(),
            Some("verbose=1".to_string()),
            RequestPayload::default(),
            session,
            Responder::Http(responder),
        );

        EchoProcessor.process(request).await;

        let response = rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["endpoint"], "status");
        assert_eq!(body["api"], true);
        assert_eq!(body["query"], "verbose=1");
        assert_eq!(body["session"], "s1");
        assert_eq!(body["transport"], "http");
    }

    #[tokio::test]
    async fn closures_are_processors() {
        let processor = |request: NormalizedRequest| async move {
            let _ = request
                .into_responder()
                .error("nope", StatusCode::FORBIDDEN)
                .await;
        };

        let (responder, rx) = HttpResponder::new();
        let session = SessionHandle::new("s2", Arc::new(MemorySessionStore::new()));
        let request = NormalizedRequest::new(
            Method::GET,
            "/".to_string(),
            None,
            RequestPayload::default(),
            session,
            Responder::Http(responder),
        );

        processor.process(request).await;
        assert_eq!(rx.await.unwrap().status(), StatusCode::FORBIDDEN);
    }
}
