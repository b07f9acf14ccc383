//! Prometheus metrics fed by engine notifications

use crate::error::Result;
use ibft_consensus::EngineNotification;
use ibft_core::Address;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Consensus metrics, labelled by node address
pub struct ConsensusMetrics {
    registry: Registry,
    committed_blocks: IntCounterVec,
    round_changes: IntCounterVec,
    timeouts: IntCounterVec,
    height: IntGaugeVec,
    round: IntGaugeVec,
}

impl ConsensusMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let committed_blocks = IntCounterVec::new(
            Opts::new("ibft_committed_blocks_total", "Blocks committed by consensus"),
            &["node"],
        )?;
        let round_changes = IntCounterVec::new(
            Opts::new("ibft_round_changes_total", "Rounds started by a round change"),
            &["node"],
        )?;
        let timeouts = IntCounterVec::new(
            Opts::new("ibft_round_timeouts_total", "Round-change timer expiries"),
            &["node"],
        )?;
        let height = IntGaugeVec::new(
            Opts::new("ibft_height", "Sequence currently being decided"),
            &["node"],
        )?;
        let round = IntGaugeVec::new(Opts::new("ibft_round", "Current round"), &["node"])?;

        registry.register(Box::new(committed_blocks.clone()))?;
        registry.register(Box::new(round_changes.clone()))?;
        registry.register(Box::new(timeouts.clone()))?;
        registry.register(Box::new(height.clone()))?;
        registry.register(Box::new(round.clone()))?;

        Ok(Self {
            registry,
            committed_blocks,
            round_changes,
            timeouts,
            height,
            round,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record one notification from `node`
    pub fn observe(&self, node: &Address, notification: &EngineNotification) {
        let label = node.to_hex();
        let label = [label.as_str()];
        match notification {
            EngineNotification::NewRound { view, round_change } => {
                if *round_change {
                    self.round_changes.with_label_values(&label).inc();
                }
                self.height
                    .with_label_values(&label)
                    .set(gauge_value(view.sequence));
                self.round
                    .with_label_values(&label)
                    .set(gauge_value(view.round));
            }
            EngineNotification::Committed { .. } => {
                self.committed_blocks.with_label_values(&label).inc();
            }
            EngineNotification::Timeout { .. } => {
                self.timeouts.with_label_values(&label).inc();
            }
            EngineNotification::StateChanged { .. } => {}
        }
    }

    pub fn committed_blocks(&self, node: &Address) -> u64 {
        self.committed_blocks
            .with_label_values(&[node.to_hex().as_str()])
            .get()
    }

    pub fn round_changes(&self, node: &Address) -> u64 {
        self.round_changes
            .with_label_values(&[node.to_hex().as_str()])
            .get()
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Feed notifications of one engine into the registry until it stops
    pub fn spawn_observer(
        self: Arc<Self>,
        node: Address,
        mut events: broadcast::Receiver<EngineNotification>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(notification) => self.observe(&node, &notification),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(%node, missed, "Metrics observer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn gauge_value(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Serve `/metrics` and `/health` over plain HTTP
pub async fn serve(metrics: Arc<ConsensusMetrics>, address: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(address).await?;
    info!("Starting metrics server on {}", listener.local_addr()?);

    loop {
        let (mut stream, peer) = listener.accept().await?;
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let n = match stream.read(&mut buf).await {
                Ok(n) => n,
                Err(err) => {
                    debug!(%peer, %err, "Metrics request read failed");
                    return;
                }
            };
            let request = String::from_utf8_lossy(&buf[..n]);

            let response = if request.starts_with("GET /metrics") {
                match metrics.encode() {
                    Ok(body) => format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    ),
                    Err(err) => {
                        warn!(%err, "Metrics encoding failed");
                        "HTTP/1.1 500 Internal Server Error\r\n\r\n".to_string()
                    }
                }
            } else if request.starts_with("GET /health") {
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"status\":\"healthy\"}"
                    .to_string()
            } else {
                "HTTP/1.1 404 Not Found\r\n\r\n".to_string()
            };

            if let Err(err) = stream.write_all(response.as_bytes()).await {
                debug!(%peer, %err, "Metrics response write failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibft_core::{Hash, View};

    #[test]
    fn test_notifications_update_metrics() {
        let metrics = ConsensusMetrics::new().unwrap();
        let node = Address::new([7u8; 20]);

        metrics.observe(
            &node,
            &EngineNotification::NewRound {
                view: View::new(5, 0),
                round_change: false,
            },
        );
        metrics.observe(&node, &EngineNotification::Timeout { view: View::new(5, 0) });
        metrics.observe(
            &node,
            &EngineNotification::NewRound {
                view: View::new(5, 1),
                round_change: true,
            },
        );
        metrics.observe(
            &node,
            &EngineNotification::Committed {
                number: 5,
                hash: Hash::digest(b"block-5"),
                round: 1,
                seals: 3,
            },
        );

        assert_eq!(metrics.committed_blocks(&node), 1);
        assert_eq!(metrics.round_changes(&node), 1);

        let text = metrics.encode().unwrap();
        assert!(text.contains("ibft_committed_blocks_total"));
        assert!(text.contains("ibft_round_timeouts_total"));
        assert!(text.contains(&format!("ibft_round{{node=\"{}\"}} 1", node.to_hex())));
        assert!(text.contains(&format!("ibft_height{{node=\"{}\"}} 5", node.to_hex())));
    }
}
