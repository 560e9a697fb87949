use std::future::Future;

use avro_ipc::{Error, Protocol, Requestor, Result, Transceiver};
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request},
    Router,
};
use bytes::Bytes;
use tower::ServiceExt;

use crate::AVRO_CONTENT_TYPE;

fn transport(error: impl std::fmt::Display) -> Error {
    Error::Transport(error.to_string())
}

/// POSTs request bodies to an avro-ipc endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransceiver {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpTransceiver {
    pub fn new(url: &str) -> crate::Result<Self> {
        let url = reqwest::Url::parse(url).map_err(|e| crate::Error::InvalidUrl(e.to_string()))?;
        Ok(Self::with_client(reqwest::Client::builder().build()?, url))
    }

    /// Use a client you configured, e.g. with timeouts.
    pub fn with_client(client: reqwest::Client, url: reqwest::Url) -> Self {
        Self { client, url }
    }
}

impl Transceiver for HttpTransceiver {
    fn remote_name(&self) -> String {
        self.url.to_string()
    }

    fn transceive(&self, request: Bytes) -> impl Future<Output = Result<Bytes>> + Send {
        let request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, AVRO_CONTENT_TYPE)
            .body(request);
        async move {
            let response = request.send().await.map_err(transport)?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(Error::Transport(format!("{status}: {text}")));
            }
            response.bytes().await.map_err(transport)
        }
    }
}

/// Sends request bodies through an axum [`Router`] in the same process.
///
/// The whole HTTP stack runs, routing and status codes included, without a socket.
#[derive(Clone)]
pub struct RouterTransceiver {
    router: Router,
    path: String,
}

impl RouterTransceiver {
    pub fn new(router: Router, path: impl Into<String>) -> Self {
        Self {
            router,
            path: path.into(),
        }
    }
}

impl Transceiver for RouterTransceiver {
    fn remote_name(&self) -> String {
        "localhost".to_string()
    }

    fn transceive(&self, request: Bytes) -> impl Future<Output = Result<Bytes>> + Send {
        let router = self.router.clone();
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.path.as_str())
            .header(CONTENT_TYPE, AVRO_CONTENT_TYPE)
            .body(Body::from(request));
        async move {
            let response = router.oneshot(request.map_err(transport)?).await.map_err(transport)?;
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .map_err(transport)?;
            if !status.is_success() {
                return Err(Error::Transport(format!(
                    "{status}: {}",
                    String::from_utf8_lossy(&body)
                )));
            }
            Ok(body)
        }
    }
}

/// A requestor that calls `router` at `path` in process. Use it to test endpoints.
pub fn test_client(
    protocol: impl Into<std::sync::Arc<Protocol>>,
    router: Router,
    path: &str,
) -> Requestor<RouterTransceiver> {
    Requestor::new(protocol, RouterTransceiver::new(router, path))
}
