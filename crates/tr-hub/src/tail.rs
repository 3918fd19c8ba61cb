//! # Live Tail
//!
//! `GET /ws/tail?<filter>` upgrades to a WebSocket that pushes a page
//! envelope whenever rows newer than the last `prevCursor` arrive.
//!
//! The session re-dispatches a `prev` step on every tick of the configured
//! interval. A tick that finds nothing new leaves the cursor where it was and
//! pushes nothing. A text frame carrying a new query string replaces the
//! filter; batches dispatched for the old filter are discarded when they land.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::Uri,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tr_core::{Cursor, Direction, EngineError, FilterError, FilterState, LogsPage, PageRequest};
use uuid::Uuid;

use crate::error::ApiError;
use crate::service::{BatchTicket, BatchTracker};
use crate::AppState;

pub async fn ws_tail(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let filter = state.service.parse_filter(params)?;
    Ok(ws
        .on_upgrade(move |socket| handle_tail(socket, state, filter))
        .into_response())
}

/// The filter for one tail step: the base filter in live mode, stepping
/// `prev` from `cursor` once a first page has been seen.
pub fn tail_filter(base: &FilterState, cursor: Option<Cursor>) -> FilterState {
    FilterState {
        live_tail: true,
        pagination: cursor.map(|cursor| PageRequest {
            cursor: Some(cursor),
            direction: Direction::Prev,
        }),
        ..base.clone()
    }
}

/// Whether a page is worth pushing. A re-dispatch that found no rows comes
/// back with the cursor it was sent with.
pub fn has_news(last: Option<Cursor>, page: &LogsPage) -> bool {
    match last {
        None => true,
        Some(last) => !page.data.is_empty() || page.prev_cursor != last.as_micros(),
    }
}

/// Parse a raw query string (with or without the leading `?`).
pub fn parse_query_string(raw: &str) -> Result<Vec<(String, String)>, FilterError> {
    let raw = raw.trim().trim_start_matches('?');
    let malformed = |reason: String| FilterError::InvalidValue {
        field: "query".into(),
        value: raw.to_string(),
        reason,
    };
    let uri: Uri = format!("/ws/tail?{}", raw)
        .parse()
        .map_err(|e: axum::http::uri::InvalidUri| malformed(e.to_string()))?;
    Query::<Vec<(String, String)>>::try_from_uri(&uri)
        .map(|Query(pairs)| pairs)
        .map_err(|e| malformed(e.body_text()))
}

type BatchResult = (BatchTicket, Result<LogsPage, EngineError>);

async fn handle_tail(socket: WebSocket, state: Arc<AppState>, initial: FilterState) {
    let session = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<BatchResult>(4);
    let tracker = BatchTracker::new();

    let mut base = initial;
    let mut last: Option<Cursor> = None;

    let dispatch = |filter: FilterState, ticket: BatchTicket| {
        let service = state.service.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = service.fetch_page(&filter, Utc::now()).await;
            // The session may be gone by now.
            let _ = tx.send((ticket, result)).await;
        });
    };

    tracing::info!(%session, snapshot = %base.snapshot_key(), "tail session opened");
    let first = tail_filter(&base, last);
    dispatch(first.clone(), tracker.begin(&first));
    let mut in_flight = true;

    let mut interval = tokio::time::interval(state.config.tail.period());
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if in_flight {
                    continue;
                }
                let step = tail_filter(&base, last);
                dispatch(step.clone(), tracker.begin(&step));
                in_flight = true;
            }
            Some((ticket, result)) = rx.recv() => {
                if !tracker.is_current(&ticket) {
                    tracing::debug!(
                        %session,
                        generation = ticket.generation,
                        snapshot = %ticket.snapshot,
                        "discarding stale batch"
                    );
                    continue;
                }
                in_flight = false;
                let frame = match result {
                    Ok(page) => {
                        if !has_news(last, &page) {
                            continue;
                        }
                        last = Some(Cursor::from_micros(page.prev_cursor));
                        serde_json::to_string(&page)
                    }
                    Err(e) => {
                        let err = ApiError::from(e);
                        tracing::warn!(%session, "tail batch failed: {}", err);
                        serde_json::to_string(&err.body())
                    }
                };
                match frame {
                    Ok(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!(%session, "failed to encode tail frame: {}", e),
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let parsed = parse_query_string(&text)
                            .map_err(EngineError::from)
                            .and_then(|pairs| state.service.parse_filter(pairs));
                        match parsed {
                            Ok(filter) => {
                                tracing::info!(%session, snapshot = %filter.snapshot_key(), "tail filter replaced");
                                base = filter;
                                last = None;
                                let first = tail_filter(&base, last);
                                dispatch(first.clone(), tracker.begin(&first));
                                in_flight = true;
                            }
                            Err(e) => {
                                let body = ApiError::from(e).body().to_string();
                                if sender.send(Message::Text(body)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(%session, "tail socket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(%session, "tail session closed");
}
