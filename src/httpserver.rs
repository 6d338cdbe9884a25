//! The HTTP surface: one POST endpoint accepting a command
//! envelope and returning its classification, plus a Prometheus scrape
//! endpoint.
//!
//! An `axum::Router` built over `State<Arc<_>>`, bound with a plain
//! `tokio::net::TcpListener` and served with `axum::serve`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::info;
use zoneward_api::CommandEnvelope;

use crate::acl::Acl;
use crate::backend::Backend;
use crate::dns::DnsProbe;
use crate::handlers::{Clock, Controller};
use crate::local_rules::LocalRules;
use crate::metrics::Metrics;

/// Header carrying the caller's already-authenticated identity. A real
/// deployment terminates JOSE/JWS verification in front of this daemon
/// (reverse proxy or sidecar) and forwards the verified `kid` here;
/// verifying the signature itself is out of scope here.
pub const KID_HEADER: &str = "x-zoneward-kid";

struct AppState<D, B, R, C>
where
    D: DnsProbe,
    B: Backend,
    R: LocalRules,
    C: Clock,
{
    controller: Controller<D, B, R, C>,
    acl: Arc<Acl>,
    metrics: Arc<Metrics>,
}

/// Bind `listen_addr` and serve the command and metrics endpoints until
/// the listener is dropped or the process is killed.
///
/// `acl` is shared with the caller so an out-of-band reload (e.g. on
/// SIGHUP) can update the same table this server consults.
pub async fn serve<D, B, R, C>(
    listen_addr: SocketAddr,
    controller: Controller<D, B, R, C>,
    acl: Arc<Acl>,
    metrics: Arc<Metrics>,
) -> std::io::Result<()>
where
    D: DnsProbe + 'static,
    B: Backend + 'static,
    R: LocalRules + 'static,
    C: Clock + 'static,
{
    let state = Arc::new(AppState { controller, acl, metrics });

    let app = Router::new()
        .route("/command", post(handle_command::<D, B, R, C>))
        .route("/metrics", get(handle_metrics::<D, B, R, C>))
        .with_state(state);

    let listener = TcpListener::bind(listen_addr).await?;
    info!(%listen_addr, "listening for command envelopes");
    axum::serve(listener, app).await
}

async fn handle_command<D, B, R, C>(
    State(state): State<Arc<AppState<D, B, R, C>>>,
    headers: HeaderMap,
    Json(envelope): Json<CommandEnvelope>,
) -> impl IntoResponse
where
    D: DnsProbe,
    B: Backend,
    R: LocalRules,
    C: Clock,
{
    let Some(kid) = headers.get(KID_HEADER).and_then(|v| v.to_str().ok()) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let result = crate::dispatch::dispatch(&state.controller, &state.acl, kid, &envelope.command, &envelope.zones).await;
    state.metrics.record(&envelope.command, &result);
    Json(result).into_response()
}

async fn handle_metrics<D, B, R, C>(State(state): State<Arc<AppState<D, B, R, C>>>) -> impl IntoResponse
where
    D: DnsProbe,
    B: Backend,
    R: LocalRules,
    C: Clock,
{
    match state.metrics.encode() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
