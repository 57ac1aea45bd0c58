//! Binance depth feed transport.
//!
//! One WebSocket diff-depth stream per symbol plus a REST depth snapshot for
//! synchronization. Wire ids map onto the book's sequencing model as
//! `prev_update_id = U - 1`, `update_id = u`.

use std::str::FromStr;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use super::{FeedEvent, FeedTransport};
use crate::domain::{BookDelta, BookSnapshot, Symbol};
use crate::error::FeedError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SnapshotRequest = BoxFuture<'static, Result<DepthSnapshot, FeedError>>;

/// REST depth snapshot response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

impl DepthSnapshot {
    #[must_use]
    pub fn into_snapshot(self) -> BookSnapshot {
        BookSnapshot {
            update_id: self.last_update_id,
            bids: parse_levels(&self.bids),
            asks: parse_levels(&self.asks),
        }
    }
}

/// WebSocket diff-depth update.
#[derive(Debug, Deserialize)]
pub struct DepthUpdate {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

impl DepthUpdate {
    #[must_use]
    pub fn into_delta(self) -> BookDelta {
        BookDelta {
            prev_update_id: self.first_update_id.saturating_sub(1),
            update_id: self.final_update_id,
            bids: parse_levels(&self.bids),
            asks: parse_levels(&self.asks),
        }
    }
}

/// Parse `[price, quantity]` string pairs, skipping unparsable entries so one
/// malformed level never poisons the whole message.
fn parse_levels(raw: &[[String; 2]]) -> Vec<(Decimal, Decimal)> {
    raw.iter()
        .filter_map(|[price, quantity]| {
            match (Decimal::from_str(price), Decimal::from_str(quantity)) {
                (Ok(price), Ok(quantity)) => Some((price, quantity)),
                _ => {
                    warn!(price = %price, quantity = %quantity, "skipping unparsable level");
                    None
                }
            }
        })
        .collect()
}

/// Binance transport for one symbol's depth stream.
pub struct BinanceTransport {
    symbol: Symbol,
    ws_url: String,
    api_url: String,
    snapshot_limit: u32,
    http: reqwest::Client,
    ws: Option<WsStream>,
    snapshot_request: Option<SnapshotRequest>,
}

impl BinanceTransport {
    #[must_use]
    pub fn new(symbol: Symbol, ws_url: String, api_url: String, snapshot_limit: u32) -> Self {
        Self {
            symbol,
            ws_url,
            api_url,
            snapshot_limit,
            http: reqwest::Client::new(),
            ws: None,
            snapshot_request: None,
        }
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/{}@depth@100ms",
            self.ws_url,
            self.symbol.as_str().to_lowercase()
        )
    }

    /// Translate one WebSocket frame. `None` means "nothing to surface, keep
    /// reading" (pings, unparsable text, non-text frames).
    async fn frame_to_event(
        ws: &mut WsStream,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> Option<FeedEvent> {
        match frame {
            Some(Ok(Message::Text(text))) => {
                trace!(bytes = text.len(), "received WebSocket text frame");
                match serde_json::from_str::<DepthUpdate>(&text) {
                    Ok(update) => Some(FeedEvent::Delta(update.into_delta())),
                    Err(e) => {
                        // Parse failures are logged but do not terminate the
                        // stream; the next frame may be fine.
                        warn!(error = %e, bytes = text.len(), "failed to parse depth update");
                        None
                    }
                }
            }
            Some(Ok(Message::Ping(data))) => {
                trace!("received WebSocket ping");
                if ws.send(Message::Pong(data)).await.is_err() {
                    return Some(FeedEvent::Disconnected {
                        reason: "failed to send pong".into(),
                    });
                }
                None
            }
            Some(Ok(Message::Close(frame))) => {
                info!(frame = ?frame, "WebSocket closed by server");
                Some(FeedEvent::Disconnected {
                    reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                })
            }
            Some(Ok(_)) => None,
            Some(Err(e)) => {
                error!(error = %e, "WebSocket error");
                Some(FeedEvent::Disconnected {
                    reason: e.to_string(),
                })
            }
            None => Some(FeedEvent::Disconnected {
                reason: "stream ended".into(),
            }),
        }
    }
}

#[async_trait]
impl FeedTransport for BinanceTransport {
    async fn connect(&mut self) -> Result<(), FeedError> {
        let url = self.stream_url();
        info!(symbol = %self.symbol, url = %url, "connecting to WebSocket");

        let (ws_stream, response) = connect_async(url.as_str()).await?;
        info!(symbol = %self.symbol, status = %response.status(), "WebSocket connected");

        self.ws = Some(ws_stream);
        self.snapshot_request = None;
        Ok(())
    }

    fn request_snapshot(&mut self) {
        let request = self
            .http
            .get(&self.api_url)
            .query(&[
                ("symbol", self.symbol.as_str().to_uppercase()),
                ("limit", self.snapshot_limit.to_string()),
            ])
            .send();

        debug!(symbol = %self.symbol, "requesting depth snapshot");
        self.snapshot_request = Some(
            async move {
                let response = request.await?.error_for_status()?;
                let snapshot: DepthSnapshot = response.json().await?;
                Ok(snapshot)
            }
            .boxed(),
        );
    }

    async fn next_event(&mut self) -> Option<FeedEvent> {
        loop {
            let ws = self.ws.as_mut()?;

            // While a snapshot fetch is in flight, poll it alongside the
            // stream so deltas keep arriving for the client to buffer.
            if let Some(mut request) = self.snapshot_request.take() {
                tokio::select! {
                    snapshot = &mut request => {
                        return Some(match snapshot {
                            Ok(s) => FeedEvent::Snapshot(s.into_snapshot()),
                            Err(e) => FeedEvent::Disconnected {
                                reason: format!("snapshot fetch failed: {e}"),
                            },
                        });
                    }
                    frame = ws.next() => {
                        self.snapshot_request = Some(request);
                        if let Some(event) = Self::frame_to_event(ws, frame).await {
                            return Some(event);
                        }
                    }
                }
                continue;
            }

            let frame = ws.next().await;
            if let Some(event) = Self::frame_to_event(ws, frame).await {
                return Some(event);
            }
        }
    }

    async fn close(&mut self) {
        self.snapshot_request = None;
        if let Some(mut ws) = self.ws.take() {
            let _ = ws.close(None).await;
            debug!(symbol = %self.symbol, "WebSocket closed");
        }
    }

    fn name(&self) -> &'static str {
        "Binance"
    }
}
