//! HTTP surface (§6): a small axum router exposing the asset upload/delete
//! endpoints and a liveness probe. Everything else pawtal's original router
//! carried (CMS pages/articles/auth/admin) has no counterpart here and was
//! dropped — see DESIGN.md.

pub mod upload;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/assets", post(upload::create_asset))
        .route("/assets/{id}", axum::routing::delete(upload::delete_asset))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(axum::extract::State(state): axum::extract::State<AppState>) -> axum::Json<serde_json::Value> {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(state.ctx.catalog.pool()).await.is_ok();
    axum::Json(serde_json::json!({ "status": if db_ok { "ok" } else { "degraded" } }))
}
