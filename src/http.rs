use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use crate::engine::Engine;
use crate::model::UsageStats;

/// Read-side statistics surface. One route; axum answers 405 for any
/// method other than GET on it.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new().route("/stats", get(stats)).with_state(engine)
}

#[derive(Debug, Deserialize)]
struct StatsParams {
    from: Option<String>,
    to: Option<String>,
}

async fn stats(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<UsageStats>, (StatusCode, String)> {
    let from = parse_date(params.from.as_deref(), "from")?;
    let to = parse_date(params.to.as_deref(), "to")?;
    if let (Some(f), Some(t)) = (from, to)
        && f > t {
            return Err((
                StatusCode::BAD_REQUEST,
                "from date is after to date".into(),
            ));
        }
    Ok(Json(engine.usage_stats(from, to).await))
}

fn parse_date(s: Option<&str>, name: &str) -> Result<Option<NaiveDate>, (StatusCode, String)> {
    match s {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("bad {name} date: {e}"))),
    }
}

pub async fn serve(engine: Arc<Engine>, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("stats endpoint: http://0.0.0.0:{port}/stats");
    axum::serve(listener, router(engine)).await
}
