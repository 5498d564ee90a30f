//! UDP broadcast service discovery: a probe carries the wanted service
//! name; a matching server answers with the same payload plus its TCP
//! port.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_DISCOVERY_PORT: u16 = 7932;
pub const DEFAULT_SERVICE_NAME: &str = "Fyre Server 1";

fn request_payload(service_name: &str) -> Vec<u8> {
    let mut payload = service_name.as_bytes().to_vec();
    payload.push(0);
    payload
}

/// Answers discovery probes for one running server.
pub struct DiscoveryServer {
    socket: UdpSocket,
    service_name: String,
    server_port: u16,
}

impl DiscoveryServer {
    pub async fn bind(
        discovery_port: u16,
        service_name: impl Into<String>,
        server_port: u16,
    ) -> Result<DiscoveryServer> {
        let socket = UdpSocket::bind(("0.0.0.0", discovery_port))
            .await
            .context("failed to bind the discovery socket")?;
        socket.set_broadcast(true).context("failed to enable broadcast on the discovery socket")?;
        Ok(DiscoveryServer { socket, service_name: service_name.into(), server_port })
    }

    /// Services one incoming probe. Replies only if the probe names
    /// this server's service; otherwise logs and returns without
    /// answering. Returns the probe's source address either way.
    pub async fn serve_one(&self) -> Result<SocketAddr> {
        let mut buf = [0u8; 256];
        let (len, addr) = self.socket.recv_from(&mut buf).await.context("discovery recv failed")?;
        let request = &buf[..len];

        let expected = request_payload(&self.service_name);
        if request != expected.as_slice() {
            debug!(?addr, "ignoring discovery probe for a different service");
            return Ok(addr);
        }

        let mut response = expected;
        response.push((self.server_port >> 8) as u8);
        response.push((self.server_port & 0xFF) as u8);
        if let Err(e) = self.socket.send_to(&response, addr).await {
            warn!(error = %e, "failed to answer a discovery probe");
        }
        Ok(addr)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscoveredServer {
    pub addr: SocketAddr,
    pub port: u16,
}

/// Broadcasts discovery probes and collects replies.
pub struct DiscoveryClient {
    socket: UdpSocket,
}

impl DiscoveryClient {
    pub async fn bind() -> Result<DiscoveryClient> {
        let socket =
            UdpSocket::bind(("0.0.0.0", 0)).await.context("failed to bind the discovery client socket")?;
        socket.set_broadcast(true).context("failed to enable broadcast on the discovery client socket")?;
        Ok(DiscoveryClient { socket })
    }

    pub async fn broadcast_probe(&self, discovery_port: u16, service_name: &str) -> Result<()> {
        let payload = request_payload(service_name);
        self.socket
            .send_to(&payload, (Ipv4Addr::BROADCAST, discovery_port))
            .await
            .context("failed to send the discovery broadcast")?;
        Ok(())
    }

    /// Sends a probe directly to `target` (used for unicast discovery
    /// and in tests, where OS-level broadcast may be unavailable).
    pub async fn probe_one(&self, target: SocketAddr, service_name: &str) -> Result<()> {
        let payload = request_payload(service_name);
        self.socket.send_to(&payload, target).await.context("failed to send the discovery probe")?;
        Ok(())
    }

    /// Waits up to `timeout` for one reply naming `service_name`.
    pub async fn recv_one(
        &self,
        service_name: &str,
        timeout: Duration,
    ) -> Result<Option<DiscoveredServer>> {
        let expected = request_payload(service_name);
        let mut buf = [0u8; 256];
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let recv = tokio::time::timeout(remaining, self.socket.recv_from(&mut buf)).await;
            let (len, addr) = match recv {
                Ok(result) => result.context("discovery recv failed")?,
                Err(_) => return Ok(None),
            };
            let data = &buf[..len];
            if data.len() == expected.len() + 2 && data[..expected.len()] == expected[..] {
                let port = ((data[data.len() - 2] as u16) << 8) | data[data.len() - 1] as u16;
                return Ok(Some(DiscoveredServer { addr, port }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_answers_a_matching_probe_with_its_port() {
        let server = DiscoveryServer::bind(0, "Test Service", 9001).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = DiscoveryClient::bind().await.unwrap();

        let serve = tokio::spawn(async move { server.serve_one().await.unwrap() });
        client.probe_one(server_addr, "Test Service").await.unwrap();
        let discovered = client.recv_one("Test Service", Duration::from_secs(2)).await.unwrap();

        serve.await.unwrap();
        assert_eq!(discovered.unwrap().port, 9001);
    }

    #[tokio::test]
    async fn server_ignores_probes_for_a_different_service() {
        let server = DiscoveryServer::bind(0, "Real Service", 9002).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = DiscoveryClient::bind().await.unwrap();

        let serve = tokio::spawn(async move { server.serve_one().await.unwrap() });
        client.probe_one(server_addr, "Other Service").await.unwrap();
        serve.await.unwrap();

        let discovered = client.recv_one("Real Service", Duration::from_millis(200)).await.unwrap();
        assert!(discovered.is_none());
    }
}
