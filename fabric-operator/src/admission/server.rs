//! Admission webhook HTTP server.
//!
//! hyper http1 with TokioIo; every connection is served on its own task.
//! Reviews arrive as POSTed JSON and are answered with the same envelope.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::review::AdmissionReview;
use super::router::Router;
use crate::controller::Context;

pub struct WebhookState {
    pub ctx: Context,
    pub router: Router,
}

/// Bind `addr` and serve until the task is dropped.
pub async fn run(addr: SocketAddr, state: Arc<WebhookState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state).await
}

pub async fn serve(listener: TcpListener, state: Arc<WebhookState>) -> anyhow::Result<()> {
    info!(
        addr = %listener.local_addr()?,
        routes = state.router.paths().len(),
        "admission webhooks listening"
    );

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, req).await }
                    });
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", peer, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

async fn handle_request(state: Arc<WebhookState>, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(path, "failed to read review body: {}", e);
            return Ok(text(StatusCode::BAD_REQUEST, "unreadable body"));
        }
    };
    Ok(respond(&state, &method, &path, body).await)
}

/// Answer one request; split out of the hyper service for tests.
pub async fn respond(state: &WebhookState, method: &Method, path: &str, body: Bytes) -> Response<Full<Bytes>> {
    if path == "/healthz" {
        return text(StatusCode::OK, "ok");
    }
    if method != Method::POST {
        return text(StatusCode::METHOD_NOT_ALLOWED, "admission reviews are POSTed");
    }
    let review: AdmissionReview = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            warn!(path, "malformed admission review: {}", e);
            return text(StatusCode::BAD_REQUEST, &format!("malformed admission review: {}", e));
        }
    };
    debug!(path, "admission review");
    match state.router.review(&state.ctx, path, review).await {
        Some(answer) => match serde_json::to_vec(&answer) {
            Ok(json) => Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from(json)))
                .unwrap_or_else(|_| text(StatusCode::INTERNAL_SERVER_ERROR, "response build failed")),
            Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        },
        None => text(StatusCode::NOT_FOUND, "no webhook at this path"),
    }
}

fn text(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(message.to_string())));
    *resp.status_mut() = status;
    resp
}
