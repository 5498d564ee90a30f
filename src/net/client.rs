//! One TCP connection to a remote rendering worker: owns the socket, a
//! strictly-FIFO outbound command queue, and per-connection rate
//! accounting.
//!
//! Responses are matched to requests with a `VecDeque` rather than a
//! request-id map, since this wire format carries no request id and
//! guarantees in-order delivery.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::warn;

use crate::net::protocol::{ClientProtocol, Response, ResponseCode};

pub const DEFAULT_RETRY_TIMEOUT_SECS: f64 = 60.0;
pub const DEFAULT_MIN_WINDOW_SECS: f64 = 1.0;
pub const DEFAULT_MIN_STREAM_INTERVAL_SECS: f64 = 1.0;

/// A live connection to one worker. Dropping this drops the dispatch
/// task, which cancels every outstanding request.
pub struct RemoteClient {
    commands: mpsc::Sender<(String, oneshot::Sender<Response>)>,
}

impl RemoteClient {
    /// Connects to `addr` and waits for the mandatory `220` greeting.
    pub async fn connect(addr: SocketAddr) -> Result<RemoteClient> {
        let stream = TcpStream::connect(addr).await.context("failed to connect to the worker")?;
        let mut framed = Framed::new(stream, ClientProtocol::default());

        let greeting = framed
            .next()
            .await
            .context("connection closed before a greeting was received")?
            .context("failed to read the greeting")?;
        if greeting.code != ResponseCode::Ready {
            bail!("expected a 220 greeting, got {:?}", greeting.code);
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(dispatch(framed, rx));
        Ok(RemoteClient { commands: tx })
    }

    /// Queues `command`, resolving once its response arrives. FIFO with
    /// respect to every other call on this client.
    pub async fn call(&self, command: impl Into<String>) -> Result<Response> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send((command.into(), tx))
            .await
            .context("worker connection's dispatch task has stopped")?;
        rx.await.context("connection closed before a response arrived")
    }
}

async fn dispatch(
    mut framed: Framed<TcpStream, ClientProtocol>,
    mut commands: mpsc::Receiver<(String, oneshot::Sender<Response>)>,
) {
    // Strictly FIFO: since the wire format carries no request id, the
    // n-th queued command's reply channel is the n-th response to
    // arrive.
    let mut pending: VecDeque<oneshot::Sender<Response>> = VecDeque::new();

    loop {
        tokio::select! {
            next_command = commands.recv() => {
                match next_command {
                    Some((line, reply)) => {
                        if let Err(e) = framed.send(line).await {
                            warn!(error = %e, "failed to send a command");
                            return;
                        }
                        pending.push_back(reply);
                    }
                    None => return,
                }
            }
            next_response = framed.next() => {
                match next_response {
                    Some(Ok(response)) => {
                        if let Some(reply) = pending.pop_front() {
                            let _ = reply.send(response);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "failed to read a response");
                        return;
                    }
                    None => return,
                }
            }
        }
    }
    // `pending` and `commands` drop here, cancelling any outstanding
    // requests still queued or awaiting a response.
}

/// Tracks iteration/byte throughput over a minimum window, and throttles
/// histogram-stream requests to at most one per `min_stream_interval`.
pub struct RateTracker {
    min_window: Duration,
    window_start: Instant,
    iterations_accum: f64,
    bytes_accum: u64,
    last_iters_per_sec: f64,
    last_bytes_per_sec: f64,
    last_stream_request: Option<Instant>,
}

impl RateTracker {
    pub fn new(min_window: Duration) -> RateTracker {
        RateTracker {
            min_window,
            window_start: Instant::now(),
            iterations_accum: 0.0,
            bytes_accum: 0,
            last_iters_per_sec: 0.0,
            last_bytes_per_sec: 0.0,
            last_stream_request: None,
        }
    }

    /// Accumulates a progress delta. Returns the refreshed
    /// iterations/sec and bytes/sec once the window has elapsed; `None`
    /// if the window is still open (accumulators keep growing).
    pub fn note_progress(&mut self, iterations_delta: f64, bytes_delta: u64) -> Option<(f64, f64)> {
        self.iterations_accum += iterations_delta;
        self.bytes_accum += bytes_delta;

        let elapsed = self.window_start.elapsed();
        if elapsed < self.min_window {
            return None;
        }

        let secs = elapsed.as_secs_f64();
        self.last_iters_per_sec = self.iterations_accum / secs;
        self.last_bytes_per_sec = self.bytes_accum as f64 / secs;
        self.iterations_accum = 0.0;
        self.bytes_accum = 0;
        self.window_start = Instant::now();
        Some((self.last_iters_per_sec, self.last_bytes_per_sec))
    }

    pub fn last_rates(&self) -> (f64, f64) {
        (self.last_iters_per_sec, self.last_bytes_per_sec)
    }

    /// Returns whether a stream request is due, marking one as just
    /// sent if so.
    pub fn stream_due(&mut self, min_stream_interval: Duration) -> bool {
        let now = Instant::now();
        let due = match self.last_stream_request {
            Some(last) => now.duration_since(last) >= min_stream_interval,
            None => true,
        };
        if due {
            self.last_stream_request = Some(now);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::server::RemoteServer;

    #[tokio::test]
    async fn commands_receive_fifo_matched_responses() {
        let server = RemoteServer::bind(0).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve(None));

        let client = RemoteClient::connect(addr).await.unwrap();
        let a = client.call("set_param zoom = 2.0").await.unwrap();
        let b = client.call("calc_status").await.unwrap();
        assert_eq!(a.code, ResponseCode::Ok);
        assert_eq!(b.code, ResponseCode::Progress);
    }

    #[test]
    fn stream_throttle_fires_once_per_interval() {
        let mut tracker = RateTracker::new(Duration::from_millis(10));
        assert!(tracker.stream_due(Duration::from_millis(50)));
        assert!(!tracker.stream_due(Duration::from_millis(50)));
    }

    #[test]
    fn rate_tracker_waits_for_the_minimum_window() {
        let mut tracker = RateTracker::new(Duration::from_secs(10));
        assert!(tracker.note_progress(1000.0, 500).is_none());
        // Accumulators keep growing across calls within the window.
        assert!(tracker.note_progress(1000.0, 500).is_none());
    }
}
