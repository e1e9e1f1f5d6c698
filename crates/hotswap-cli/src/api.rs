use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use hotswap::{StatusBoard, StatusSnapshot};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

pub fn router(board: StatusBoard) -> Router {
	Router::new()
		.route("/api/status", get(status))
		.route("/api/logs", get(logs))
		.layer(CorsLayer::permissive())
		.with_state(board)
}

#[derive(Serialize)]
struct LogLine {
	timestamp: String,
	message: String,
}

async fn status(State(board): State<StatusBoard>) -> Json<StatusSnapshot> {
	Json(board.snapshot().await)
}

async fn logs(State(board): State<StatusBoard>) -> Json<Vec<LogLine>> {
	let lines = board
		.log()
		.entries()
		.into_iter()
		.map(|e| LogLine {
			timestamp: hotswap::logs::format_timestamp(e.timestamp),
			message: e.message,
		})
		.collect();
	Json(lines)
}

/// Serves the status API until the process exits. A bind failure is logged
/// and leaves the supervisor running without it.
pub async fn serve(board: StatusBoard, bind: String) {
	let listener = match TcpListener::bind(&bind).await {
		Ok(l) => l,
		Err(e) => {
			board.log().error(format!("status API could not bind {}: {}", bind, e));
			return;
		}
	};
	board.log().info(format!("status API on http://{}/api/status", bind));
	serve_on(listener, board).await;
}

async fn serve_on(listener: TcpListener, board: StatusBoard) {
	let log = board.log().clone();
	if let Err(e) = axum::serve(listener, router(board)).await {
		log.error(format!("status API stopped: {}", e));
	}
}
