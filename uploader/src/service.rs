use crate::error::UploaderError;
use crate::events::LifecycleEvent;
use crate::registry::SessionRegistry;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::body::{Body, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Receives recorder lifecycle webhooks and feeds them to the registry
#[derive(Clone)]
pub struct WebhookService {
    registry: Arc<SessionRegistry>,
    path: Arc<str>,
}

impl WebhookService {
    pub fn new(registry: Arc<SessionRegistry>, path: &str) -> Self {
        Self {
            registry,
            path: Arc::from(path.trim_end_matches('/')),
        }
    }

    /// Handle an incoming HTTP request
    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<Empty<Bytes>>, Infallible>
    where
        B: Body,
        B::Error: Debug,
    {
        if req.method() != Method::POST {
            info!("Received not allowed request: {}", req.method());
            return Ok(self.empty_response(StatusCode::METHOD_NOT_ALLOWED));
        }

        if !req.uri().path().starts_with(self.path.as_ref()) {
            debug!("Request outside webhook path: {}", req.uri().path());
            return Ok(self.empty_response(StatusCode::NOT_FOUND));
        }

        let body = match req.into_body().collect().await {
            Ok(body) => body.to_bytes(),
            Err(e) => {
                error!("Error reading request body: {:?}", e);
                return Ok(self.empty_response(StatusCode::INTERNAL_SERVER_ERROR));
            }
        };

        let event = match LifecycleEvent::parse(&body) {
            Ok(event) => event,
            Err(e) => {
                debug!("Ignoring unrecognized event: {}", e);
                return Ok(self.empty_response(StatusCode::NO_CONTENT));
            }
        };

        let session_id = event.session_id().to_string();
        match self.registry.handle(event) {
            Ok(()) => {}
            Err(UploaderError::OrphanEvent(reason)) => {
                warn!("Session {}: {}", session_id, reason);
            }
            Err(e) => error!("Session {}: {}", session_id, e),
        }

        Ok(self.empty_response(StatusCode::NO_CONTENT))
    }

    fn empty_response(&self, status: StatusCode) -> Response<Empty<Bytes>> {
        let mut response = Response::new(Empty::new());
        *response.status_mut() = status;
        response
    }
}

impl Service<Request<Incoming>> for WebhookService {
    type Response = Response<Empty<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.handle(req).await })
    }
}
