//! REST surface for the station engine.
//!
//! Exposes the queue, pile, billing, and admin endpoints as JSON with a
//! uniform `{status, msg, data}` envelope. The served process also runs a
//! periodic settle-and-schedule tick so sessions complete and waiting
//! vehicles dispatch even while no client is calling.

mod handlers;
pub mod types;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tracing::info;

use crate::station::Station;

/// Shared application state: the engine behind its single lock.
///
/// Every operation — admission, scheduling pass, fault handling — runs as
/// one critical section under this mutex, which serializes scheduling
/// passes exactly as the engine requires.
pub struct AppState {
    pub station: Mutex<Station>,
}

/// Builds the axum router with all station routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/queue/status", get(handlers::queue_status))
        .route("/queue/join", post(handlers::queue_join))
        .route("/queue/leave", post(handlers::queue_leave))
        .route("/queue/change_mode", post(handlers::queue_change_mode))
        .route("/queue/cancel", post(handlers::queue_cancel))
        .route("/pile/status", get(handlers::pile_status))
        .route("/pile/modify_charging", post(handlers::modify_charging))
        .route("/pile/disconnect", post(handlers::pile_disconnect))
        .route("/bills", get(handlers::bills))
        .route("/admin/pile/toggle", post(handlers::admin_pile_toggle))
        .route("/admin/pile/status", get(handlers::admin_pile_status))
        .route("/admin/queue/waiting", get(handlers::admin_queue_waiting))
        .route("/admin/reports", get(handlers::admin_reports))
        .route("/admin/pile/fault", post(handlers::admin_pile_fault))
        .route("/admin/pile/repair", post(handlers::admin_pile_repair))
        .route("/admin/time_speedup", post(handlers::admin_time_speedup))
        .route("/admin/set_time", post(handlers::admin_set_time))
        .route("/admin/get_time", get(handlers::admin_get_time))
        .route("/admin/reset_time", post(handlers::admin_reset_time))
        .with_state(state)
}

/// Interval between background settle-and-schedule ticks.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Binds to the given address and serves the API with the background tick.
///
/// # Panics
///
/// Panics if the TCP listener cannot bind to `addr`.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) {
    let app = router(Arc::clone(&state));

    let ticker_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            ticker_state
                .station
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .tick();
        }
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind to {addr}: {e}"));
    info!("station API listening on http://{addr}");
    axum::serve(listener, app)
        .await
        .unwrap_or_else(|e| panic!("server error: {e}"));
}
