//! HTTP 接口
//!
//! - `GET /video_feed`            multipart/x-mixed-replace JPEG 流
//! - `GET /api/stats`             当前人数与运行统计
//! - `GET /api/history?limit=N`   最近的人数事件 (时间倒序, 默认 200 条)
//! - `GET /healthz`

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::Error;
use crate::pipeline::{FrameHub, StatsSnapshot};
use crate::renderer::FrameEncoder;
use crate::storage::{EventSink, StoredEvent};

pub const DEFAULT_HISTORY_LIMIT: usize = 200;
const MAX_HISTORY_LIMIT: usize = 10_000;

#[derive(Clone)]
pub struct AppState {
    pub hub: FrameHub,
    pub sink: Arc<dyn EventSink>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/video_feed", get(video_feed))
        .route("/api/stats", get(stats))
        .route("/api/history", get(history))
        .with_state(state)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Error::SourceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SOURCE_UNAVAILABLE"),
            Error::Config(_) => (StatusCode::BAD_REQUEST, "CONFIG_ERROR"),
            Error::Persistence(_) | Error::Database(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        tracing::warn!(error = %self, code, "request failed");

        let body = Json(json!({
            "error": code,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.hub.stats().snapshot())
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<StoredEvent>>, Error> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    // SQLite 查询会阻塞, 放到阻塞线程池
    let sink = state.sink.clone();
    let events = tokio::task::spawn_blocking(move || sink.query(limit))
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;

    Ok(Json(events))
}

async fn video_feed(State(state): State<AppState>) -> Result<Response, Error> {
    let hub = state.hub.clone();
    // 首个订阅者会打开视频源 (摄像头可能需要数秒)
    let rx = tokio::task::spawn_blocking(move || hub.subscribe())
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;

    tracing::info!("video feed client connected");
    let response = (
        [
            (header::CONTENT_TYPE, FrameEncoder::content_type()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(part_stream(rx)),
    );
    Ok(response.into_response())
}

/// 广播接收端 → 分片流; 落后的订阅者跳过积压的分片
fn part_stream(
    rx: broadcast::Receiver<Bytes>,
) -> impl futures::Stream<Item = Result<Bytes, Infallible>> {
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(part) => return Some((Ok(part), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "slow video feed client skipped parts");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}
