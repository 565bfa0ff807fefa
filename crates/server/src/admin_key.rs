use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{body::Body, response::IntoResponse};
use http::{HeaderMap, Request, Response};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tower::Layer;

use crate::response::ApiError;

pub(crate) const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Rejects requests without the configured admin key. Without a configured
/// key every request passes.
#[derive(Clone)]
pub struct AdminKeyLayer(Arc<AdminKeyLayerInner>);

struct AdminKeyLayerInner {
    /// Digest of the expected key. Comparing digests keeps the comparison
    /// independent of the key length.
    expected: Option<[u8; 32]>,
}

impl AdminKeyLayer {
    pub fn new(admin_key: Option<&SecretString>) -> Self {
        let expected = admin_key.map(|key| digest(key.expose_secret()));
        Self(Arc::new(AdminKeyLayerInner { expected }))
    }
}

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

impl AdminKeyLayerInner {
    fn check(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = &self.expected else {
            return Ok(());
        };

        let provided = headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        if digest(provided) == *expected {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

impl<Service> Layer<Service> for AdminKeyLayer
where
    Service: Send + Clone,
{
    type Service = AdminKeyService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        AdminKeyService {
            next,
            layer: self.0.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AdminKeyService<Service> {
    next: Service,
    layer: Arc<AdminKeyLayerInner>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for AdminKeyService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = http::Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();

        match self.layer.check(req.headers()) {
            Ok(()) => Box::pin(next.call(req)),
            Err(error) => {
                log::debug!("Rejected administrative request to {}: {error}", req.uri().path());
                Box::pin(async move { Ok::<_, Service::Error>(error.into_response()) })
            }
        }
    }
}
