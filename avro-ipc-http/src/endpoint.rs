use std::sync::Arc;

use avro_ipc::Responder;
use axum::{
    extract::DefaultBodyLimit,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use bytes::Bytes;
use tokio::net::TcpListener;

use crate::{Result, AVRO_CONTENT_TYPE};

/// Mounts a [`Responder`] on an axum router.
///
/// One endpoint serves one route, and only `POST` to it. The request body is a
/// handshake and a call; the response body is a handshake and the call's response.
#[derive(Clone)]
pub struct AvroEndpoint {
    name: Arc<str>,
    responder: Arc<Responder>,
}

impl AvroEndpoint {
    pub fn new(name: impl Into<Arc<str>>, responder: Arc<Responder>) -> Self {
        Self {
            name: name.into(),
            responder,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }

    /// Add this endpoint to `router` at `path`.
    ///
    /// Bodies longer than the responder's max body length are refused with
    /// `413 Payload Too Large`.
    pub fn connect(self, router: Router, path: &str) -> Router {
        log::info!(
            "{} serves {} at POST {path}",
            self.name,
            self.responder.protocol().fullname()
        );
        let body_limit = DefaultBodyLimit::max(self.responder.max_body_length());
        router.route(
            path,
            post(move |body: Bytes| self.clone().handle(body)).layer(body_limit),
        )
    }

    async fn handle(self, body: Bytes) -> Response {
        let responder = self.responder.clone();
        // Handlers are synchronous and may block.
        match tokio::task::spawn_blocking(move || responder.respond(body)).await {
            Ok(Ok(response)) => ([(CONTENT_TYPE, AVRO_CONTENT_TYPE)], response).into_response(),
            Ok(Err(e)) => {
                log::warn!("{} bad request: {e}", self.name);
                (StatusCode::BAD_REQUEST, e.to_string()).into_response()
            }
            Err(e) => {
                log::error!("{} responder did not complete: {e}", self.name);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    avro_ipc::INTERNAL_SERVER_ERROR,
                )
                    .into_response()
            }
        }
    }
}

/// Serve `router` on `listener` until the server fails.
pub async fn serve(listener: TcpListener, router: Router) -> Result<()> {
    log::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}
