//! UDP receiver for game-server log lines.
//!
//! Servers stream their logs here (`logaddress_add`). Each packet carries
//! one line; chat lines from known servers go to the in-game dispatcher.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info, Instrument};

use crate::dispatch::GameDispatcher;
use crate::pool::ServerPool;
use crate::server::Server;
use crate::supervisor::TaskSupervisor;

/// Largest log packet a game server sends.
const MAX_PACKET: usize = 2048;

/// Strip the out-of-band header and trailing padding from a log packet.
///
/// Returns `None` for packets that are not log lines.
pub fn decode_packet(packet: &[u8]) -> Option<String> {
    let body = packet.strip_prefix(&[0xff, 0xff, 0xff, 0xff])?;
    let body = match body.first()? {
        // Unauthenticated: `RL ...`
        b'R' => body,
        // Secret-prefixed: `S<secret>L ...`
        b'S' => {
            let at = body.windows(2).position(|w| w == b"L ")?;
            &body[at..]
        }
        _ => return None,
    };

    let text = String::from_utf8_lossy(body);
    let text = text.trim_end_matches(['\0', '\n', '\r']);
    (!text.is_empty()).then(|| text.to_string())
}

pub struct LogServer {
    socket: UdpSocket,
    pool: Arc<dyn ServerPool>,
    dispatcher: Arc<GameDispatcher>,
    supervisor: Arc<TaskSupervisor>,
}

impl LogServer {
    pub async fn bind(
        addr: SocketAddr,
        pool: Arc<dyn ServerPool>,
        dispatcher: Arc<GameDispatcher>,
        supervisor: Arc<TaskSupervisor>,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(bind_addr = %socket.local_addr()?, "Log server bound");
        Ok(Self {
            socket,
            pool,
            dispatcher,
            supervisor,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive packets until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; MAX_PACKET];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => self.handle_packet(&buf[..len], peer).await,
                    Err(e) => {
                        error!(error = %e, "Log socket receive failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Log server shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_packet(&self, packet: &[u8], peer: SocketAddr) {
        let Some(line) = decode_packet(packet) else {
            debug!(peer = %peer, len = packet.len(), "Ignoring non-log packet");
            return;
        };
        let Some(server) = self.resolve(peer).await else {
            debug!(peer = %peer, "Log line from unknown server");
            return;
        };

        let dispatcher = Arc::clone(&self.dispatcher);
        let span = tracing::debug_span!("log_line", server = %server.id());
        self.supervisor.spawn(
            "log-line",
            async move {
                dispatcher.handle_line(&server, &line).await;
            }
            .instrument(span),
        );
    }

    /// Match the sender by address, then by IP alone.
    async fn resolve(&self, peer: SocketAddr) -> Option<Arc<Server>> {
        if let Some(server) = self.pool.get_server_by_address(&peer.to_string()).await {
            return Some(server);
        }

        let ip = peer.ip().to_string();
        self.pool.get_servers().await.into_iter().find(|s| {
            s.identity()
                .address
                .rsplit_once(':')
                .is_some_and(|(host, _)| host == ip)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"\xff\xff\xff\xffRL 10/19/2026 - 21:04:11: \"a<1><[U:1:2]><Red>\" say \"hi\"\n\0", Some("RL 10/19/2026 - 21:04:11: \"a<1><[U:1:2]><Red>\" say \"hi\""))]
    #[case(b"\xff\xff\xff\xffSsecret123L 10/19/2026 - 21:04:11: World triggered", Some("L 10/19/2026 - 21:04:11: World triggered"))]
    #[case(b"RL 10/19/2026 - no header", None)]
    #[case(b"\xff\xff\xff\xffI info reply", None)]
    #[case(b"\xff\xff\xff\xff", None)]
    fn test_decode_packet(#[case] packet: &[u8], #[case] expected: Option<&str>) {
        assert_eq!(decode_packet(packet).as_deref(), expected);
    }
}
