//! Cluster controller: fans parameter changes and calculation commands
//! out to a set of remote workers, periodically pulls their histogram
//! deltas into the master's imager, and tracks each node's reported
//! throughput for display.
//!
//! Each node reconnects lazily on next use after a retry timeout
//! elapses. The scheduling loop runs single-threaded, so each node
//! owns its connection directly rather than behind a lock.

use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::map::DeJongMap;
use crate::net::client::{
    RateTracker, RemoteClient, DEFAULT_MIN_STREAM_INTERVAL_SECS, DEFAULT_MIN_WINDOW_SECS,
    DEFAULT_RETRY_TIMEOUT_SECS,
};
use crate::net::discovery::DiscoveryClient;
use crate::net::protocol::ResponseCode;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub hostname: String,
    pub port: u16,
}

/// A cluster node: connection state plus the status fields a cluster
/// view would display.
pub struct ClusterNode {
    pub key: NodeKey,
    pub enabled: bool,
    pub status: String,
    pub last_iters_per_sec: f64,
    pub last_bytes_per_sec: f64,
    client: Option<RemoteClient>,
    last_reported_iterations: Option<f64>,
    /// Incremented on every `set_param` sent to this node; a histogram
    /// delta received while this is nonzero was computed under a
    /// parameter set the master has since changed, and is discarded.
    pending_param_changes: u32,
    retry_at: Option<Instant>,
    rate: RateTracker,
}

impl ClusterNode {
    fn new(key: NodeKey) -> ClusterNode {
        ClusterNode {
            key,
            enabled: true,
            status: "disconnected".to_string(),
            last_iters_per_sec: 0.0,
            last_bytes_per_sec: 0.0,
            client: None,
            last_reported_iterations: None,
            pending_param_changes: 0,
            retry_at: None,
            rate: RateTracker::new(Duration::from_secs_f64(DEFAULT_MIN_WINDOW_SECS)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.enabled && self.client.is_some()
    }

    async fn ensure_connected(&mut self, retry_timeout: Duration) {
        if !self.enabled || self.client.is_some() {
            return;
        }
        if let Some(retry_at) = self.retry_at {
            if Instant::now() < retry_at {
                return;
            }
        }

        let addr = match tokio::net::lookup_host((self.key.hostname.as_str(), self.key.port)).await {
            Ok(mut addrs) => addrs.next(),
            Err(_) => None,
        };
        let Some(addr) = addr else {
            self.mark_failed(retry_timeout, "DNS lookup failed or returned no addresses");
            return;
        };

        match RemoteClient::connect(addr).await {
            Ok(client) => {
                self.client = Some(client);
                self.status = "ready".to_string();
                self.retry_at = None;
            }
            Err(e) => self.mark_failed(retry_timeout, &e.to_string()),
        }
    }

    fn mark_failed(&mut self, retry_timeout: Duration, reason: &str) {
        warn!(hostname = %self.key.hostname, port = self.key.port, reason, "cluster node connection failed");
        self.client = None;
        self.status = format!("error: {reason}");
        self.retry_at = Some(Instant::now() + retry_timeout);
    }

    async fn send(
        &mut self,
        command: &str,
        retry_timeout: Duration,
    ) -> Option<crate::net::protocol::Response> {
        let client = self.client.as_ref()?;
        match client.call(command).await {
            Ok(response) => Some(response),
            Err(e) => {
                self.mark_failed(retry_timeout, &e.to_string());
                None
            }
        }
    }
}

/// Owns the node set and the timing knobs governing retries and
/// histogram-stream throttling.
pub struct ClusterModel {
    nodes: Vec<ClusterNode>,
    retry_timeout: Duration,
    min_stream_interval: Duration,
}

impl ClusterModel {
    pub fn new() -> ClusterModel {
        ClusterModel {
            nodes: Vec::new(),
            retry_timeout: Duration::from_secs_f64(DEFAULT_RETRY_TIMEOUT_SECS),
            min_stream_interval: Duration::from_secs_f64(DEFAULT_MIN_STREAM_INTERVAL_SECS),
        }
    }

    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    /// Adds `(hostname, port)` as a node if not already present.
    pub fn add_node(&mut self, hostname: impl Into<String>, port: u16) {
        let key = NodeKey { hostname: hostname.into(), port };
        if self.nodes.iter().any(|n| n.key == key) {
            return;
        }
        self.nodes.push(ClusterNode::new(key));
    }

    /// Adds any node `recv_one` reports that isn't already present.
    pub async fn discover_and_add(
        &mut self,
        discovery: &DiscoveryClient,
        service_name: &str,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        if let Some(found) = discovery.recv_one(service_name, timeout).await? {
            self.add_node(found.addr.ip().to_string(), found.port);
        }
        Ok(())
    }

    async fn broadcast(&mut self, command: &str) {
        let retry_timeout = self.retry_timeout;
        for node in &mut self.nodes {
            if !node.enabled {
                continue;
            }
            node.ensure_connected(retry_timeout).await;
            node.send(command, retry_timeout).await;
        }
    }

    /// On `calculation-start`: sends `calc_start` to every ready node,
    /// connecting nodes that are due for a retry first.
    pub async fn broadcast_start(&mut self) {
        self.broadcast("calc_start").await;
    }

    /// On `calculation-stop`: sends `calc_stop` to every ready node.
    pub async fn broadcast_stop(&mut self) {
        self.broadcast("calc_stop").await;
    }

    /// Fans a parameter change out as `set_param`, marking every node's
    /// pending-change counter so a histogram delta received before it
    /// reflects the new parameters is dropped rather than merged.
    pub async fn broadcast_set_param(&mut self, name: &str, value: &str) {
        let retry_timeout = self.retry_timeout;
        let command = format!("set_param {name} = {value}");
        for node in &mut self.nodes {
            if !node.enabled {
                continue;
            }
            node.ensure_connected(retry_timeout).await;
            if node.client.is_some() {
                node.pending_param_changes += 1;
                node.send(&command, retry_timeout).await;
            }
        }
    }

    /// On `calculation-finished`: requests a histogram stream from
    /// every ready node whose `min_stream_interval` has elapsed, and
    /// merges each reply into `master`'s imager.
    pub async fn collect_and_merge(&mut self, master: &mut DeJongMap) {
        let retry_timeout = self.retry_timeout;
        let min_stream_interval = self.min_stream_interval;

        for node in &mut self.nodes {
            if !node.is_ready() || !node.rate.stream_due(min_stream_interval) {
                continue;
            }

            let Some(response) = node.send("get_histogram_stream", retry_timeout).await else {
                continue;
            };
            if response.code != ResponseCode::Binary {
                warn!(hostname = %node.key.hostname, "expected a binary histogram stream reply");
                continue;
            }

            if node.pending_param_changes > 0 {
                node.pending_param_changes -= 1;
                continue;
            }

            if let Some(data) = response.binary {
                master.imager_mut().merge_stream(&data);
            }
        }
    }

    /// Polls every ready node's `calc_status`, unthrottled. The
    /// iteration delta since the previous poll (or the new absolute
    /// value, if it decreased — meaning the worker's calculation was
    /// reset) is added to `master`'s iteration count.
    pub async fn poll_status(&mut self, master: &mut DeJongMap) {
        let retry_timeout = self.retry_timeout;
        for node in &mut self.nodes {
            if !node.is_ready() {
                continue;
            }
            let Some(response) = node.send("calc_status", retry_timeout).await else {
                continue;
            };
            let Some(iterations) = parse_progress_iterations(&response.message) else {
                continue;
            };

            let delta = match node.last_reported_iterations {
                Some(previous) if iterations >= previous => iterations - previous,
                _ => iterations,
            };
            node.last_reported_iterations = Some(iterations);
            master.add_remote_iterations(delta as u64);

            if let Some((iters_per_sec, bytes_per_sec)) = node.rate.note_progress(delta, 0) {
                node.last_iters_per_sec = iters_per_sec;
                node.last_bytes_per_sec = bytes_per_sec;
            }
        }
    }
}

impl Default for ClusterModel {
    fn default() -> ClusterModel {
        ClusterModel::new()
    }
}

fn parse_progress_iterations(message: &str) -> Option<f64> {
    message.split_whitespace().find_map(|field| field.strip_prefix("iterations=")?.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::server::RemoteServer;

    #[test]
    fn adding_the_same_node_twice_is_a_no_op() {
        let mut cluster = ClusterModel::new();
        cluster.add_node("worker-a", 7931);
        cluster.add_node("worker-a", 7931);
        assert_eq!(cluster.nodes().len(), 1);
    }

    #[test]
    fn parses_iterations_out_of_a_progress_message() {
        assert_eq!(parse_progress_iterations("iterations=42 density=7"), Some(42.0));
        assert_eq!(parse_progress_iterations("garbage"), None);
    }

    #[tokio::test]
    async fn broadcast_start_connects_and_sends_to_a_live_worker() {
        let server = RemoteServer::bind(0).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve(None));

        let mut cluster = ClusterModel::new();
        cluster.add_node(addr.ip().to_string(), addr.port());
        cluster.broadcast_start().await;

        assert!(cluster.nodes()[0].is_ready());
        assert_eq!(cluster.nodes()[0].status, "ready");
    }

    #[tokio::test]
    async fn poll_status_accumulates_master_iterations() {
        let server = RemoteServer::bind(0).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve(None));

        let mut cluster = ClusterModel::new();
        cluster.add_node(addr.ip().to_string(), addr.port());
        cluster.broadcast_start().await;

        let mut master = DeJongMap::new();
        cluster.poll_status(&mut master).await;
        // A fresh worker reports 0 iterations; nothing should be added yet.
        assert_eq!(master.iterations(), 0);
    }

    #[tokio::test]
    async fn collect_and_merge_skips_a_node_with_pending_param_changes() {
        let server = RemoteServer::bind(0).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve(None));

        let mut cluster = ClusterModel::new();
        cluster.add_node(addr.ip().to_string(), addr.port());
        cluster.broadcast_set_param("zoom", "2.0").await;
        assert_eq!(cluster.nodes()[0].pending_param_changes, 1);

        let mut master = DeJongMap::new();
        let before = master.imager().total_points_plotted();
        cluster.collect_and_merge(&mut master).await;
        assert_eq!(cluster.nodes()[0].pending_param_changes, 0);
        assert_eq!(master.imager().total_points_plotted(), before);
    }
}
