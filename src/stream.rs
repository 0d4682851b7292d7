//! Upstream SSE connector with reconnect, backoff, and liveness checks.
//!
//! One connection at a time: the read loop runs until the transport
//! fails, the server closes the stream, or no event arrives within the
//! silence window, then the connection is dropped and a single reconnect
//! is scheduled after a classified delay. Some transports die without an
//! error, so silence is treated as a failure in its own right.

use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use reqwest::{header, Client};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::event::Event;

const MIN_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(300);
const MAX_JITTER_MS: u64 = 2000;

/// Connector tuning; defaults match production use.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// SSE endpoint URL.
    pub url: String,
    /// Delay for HTTP 429 responses without a Retry-After header.
    pub retry_after_fallback: Duration,
    /// Silence threshold after which the connection is presumed dead.
    pub silence_timeout: Duration,
    /// How often the silence check runs.
    pub liveness_tick: Duration,
}

impl StreamConfig {
    pub fn new(url: String, retry_after_fallback: Duration) -> Self {
        Self {
            url,
            retry_after_fallback,
            silence_timeout: Duration::from_secs(120),
            liveness_tick: Duration::from_secs(60),
        }
    }
}

/// Why a connection attempt or an established connection ended,
/// normalized at the transport boundary before any policy runs.
#[derive(Debug, Error)]
pub enum Disconnect {
    #[error("upstream returned HTTP {status}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
    },
    #[error("network failure: {0}")]
    Network(String),
    #[error("stream closed by upstream")]
    Eof,
    #[error("no events within {0:?}")]
    Silent(Duration),
    #[error("event channel closed")]
    ChannelClosed,
}

/// Deterministic part of the reconnect delay.
fn base_delay(reason: &Disconnect, retry_after_fallback: Duration) -> Duration {
    match reason {
        Disconnect::Status {
            status: 429,
            retry_after,
        } => retry_after.unwrap_or(retry_after_fallback),
        Disconnect::Status { status, .. } if *status >= 500 => Duration::from_secs(10),
        Disconnect::Status { .. } => Duration::from_secs(5),
        Disconnect::Network(_) | Disconnect::Eof => Duration::from_secs(3),
        Disconnect::Silent(_) => Duration::ZERO,
        Disconnect::ChannelClosed => Duration::ZERO,
    }
}

/// Full reconnect delay: classified base plus up to 2s of jitter so
/// several deployments don't hammer the endpoint in lockstep, clamped
/// to [1s, 300s].
fn reconnect_delay(reason: &Disconnect, retry_after_fallback: Duration) -> Duration {
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_JITTER_MS));
    (base_delay(reason, retry_after_fallback) + jitter).clamp(MIN_DELAY, MAX_DELAY)
}

/// One decoded `text/event-stream` frame.
#[derive(Debug, Clone, Default, PartialEq)]
struct Frame {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

/// Incremental SSE decoder fed with arbitrary byte chunks.
#[derive(Default)]
struct FrameDecoder {
    buf: String,
    current: Frame,
}

impl FrameDecoder {
    /// Consume a chunk, returning the frames it completed.
    fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut done = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                // Blank line terminates a frame.
                if self.current.event.is_some() || !self.current.data.is_empty() {
                    done.push(std::mem::take(&mut self.current));
                }
                continue;
            }
            if line.starts_with(':') {
                // Comment line, used by servers as a keepalive.
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.current.event = Some(value.to_string()),
                "data" => self.current.data.push(value.to_string()),
                "id" => self.current.id = Some(value.to_string()),
                _ => {}
            }
        }
        done
    }
}

/// Open one connection and pump events into `tx` until it dies.
///
/// The latest SSE `id` is written through `last_event_id` so the next
/// attempt can resume from roughly where this one stopped.
async fn connect_once(
    client: &Client,
    cfg: &StreamConfig,
    last_event_id: &mut Option<String>,
    tx: &mpsc::Sender<Event>,
) -> Disconnect {
    let mut request = client
        .get(&cfg.url)
        .header(header::ACCEPT, "text/event-stream");
    if let Some(id) = last_event_id.as_deref() {
        request = request.header("Last-Event-ID", id);
    }
    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => return Disconnect::Network(e.to_string()),
    };
    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Disconnect::Status {
            status: status.as_u16(),
            retry_after,
        };
    }
    info!(url = %cfg.url, "connected to event stream");

    let mut body = response.bytes_stream();
    let mut decoder = FrameDecoder::default();
    let mut last_seen = Instant::now();
    let mut ticker = interval_at(Instant::now() + cfg.liveness_tick, cfg.liveness_tick);

    loop {
        tokio::select! {
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    for frame in decoder.feed(&bytes) {
                        last_seen = Instant::now();
                        if let Some(id) = frame.id {
                            *last_event_id = Some(id);
                        }
                        if frame.event.as_deref().unwrap_or("message") != "message" {
                            continue;
                        }
                        if frame.data.is_empty() {
                            continue;
                        }
                        let payload = frame.data.join("\n");
                        match serde_json::from_str::<Event>(&payload) {
                            Ok(ev) => {
                                debug!(wiki = %ev.wiki, kind = %ev.kind, "event received");
                                if tx.send(ev).await.is_err() {
                                    return Disconnect::ChannelClosed;
                                }
                            }
                            Err(e) => warn!(error = %e, "dropping unparseable event payload"),
                        }
                    }
                }
                Some(Err(e)) => return Disconnect::Network(e.to_string()),
                None => return Disconnect::Eof,
            },
            _ = ticker.tick() => {
                if last_seen.elapsed() >= cfg.silence_timeout {
                    return Disconnect::Silent(cfg.silence_timeout);
                }
            }
        }
    }
}

/// Run the connector until the receiving side goes away. Returning from
/// `connect_once` drops the response body, so the old connection is
/// closed before any reconnect is scheduled.
pub async fn run(cfg: StreamConfig, tx: mpsc::Sender<Event>) {
    let client = match Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "could not build the stream http client");
            return;
        }
    };
    let mut last_event_id = None;
    loop {
        let reason = connect_once(&client, &cfg, &mut last_event_id, &tx).await;
        if matches!(reason, Disconnect::ChannelClosed) {
            info!("event channel closed, stopping connector");
            return;
        }
        let delay = reconnect_delay(&reason, cfg.retry_after_fallback);
        warn!(reason = %reason, delay_ms = delay.as_millis() as u64, "stream disconnected, reconnecting");
        sleep(delay).await;
    }
}
