//! Fault-injecting UDP relay for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate datagrams.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`LossyRelay`] sits between two endpoints on loopback and applies a
//! configurable fault model to every datagram it forwards:
//!
//! | Fault            | Description                                        |
//! |------------------|----------------------------------------------------|
//! | Loss             | Drop a datagram with probability `loss_rate`.      |
//! | Reordering       | Hold a datagram back by `reorder_delay`, letting   |
//! |                  | later ones overtake it.                            |
//! | Duplication      | Deliver a datagram twice.                          |
//!
//! ```text
//!   client ──▶ relay ──▶ upstream
//!   client ◀── relay ◀── upstream
//! ```
//!
//! The first address that is not `upstream` becomes the client.  Faults are
//! drawn from a seeded [`StdRng`] so a failing run can be replayed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Fault model; all probabilities are in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Probability that a datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is sent twice.
    pub duplicate_rate: f64,
    /// Probability that a datagram is delayed by `reorder_delay`.
    pub reorder_rate: f64,
    pub reorder_delay: Duration,
    /// RNG seed; reapplied whenever the config changes.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::ZERO,
            seed: 0,
        }
    }
}

/// What to do with one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Drop,
    Forward { copies: usize, delayed: bool },
}

fn decide(config: &SimulatorConfig, rng: &mut StdRng) -> Fate {
    if rng.random_bool(config.loss_rate.clamp(0.0, 1.0)) {
        return Fate::Drop;
    }
    let copies = if rng.random_bool(config.duplicate_rate.clamp(0.0, 1.0)) {
        2
    } else {
        1
    };
    let delayed = rng.random_bool(config.reorder_rate.clamp(0.0, 1.0));
    Fate::Forward { copies, delayed }
}

/// A running relay.  Dropping it without [`LossyRelay::stop`] leaves the
/// task running until the runtime shuts down.
#[derive(Debug)]
pub struct LossyRelay {
    addr: SocketAddr,
    config: watch::Sender<SimulatorConfig>,
    task: JoinHandle<()>,
}

impl LossyRelay {
    /// Bind a loopback socket and start forwarding to `upstream`.
    pub async fn start(upstream: SocketAddr, config: SimulatorConfig) -> std::io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
        let addr = socket.local_addr()?;
        let (config_tx, config_rx) = watch::channel(config);
        let task = tokio::spawn(relay_loop(socket, upstream, config_rx));
        log::debug!("[sim] relay {addr} → {upstream}");
        Ok(Self {
            addr,
            config: config_tx,
            task,
        })
    }

    /// Address clients should send to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Swap the fault model; the RNG is reseeded from the new config.
    pub fn set_config(&self, config: SimulatorConfig) {
        self.config.send_replace(config);
    }

    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
        log::debug!("[sim] relay {} stopped", self.addr);
    }
}

async fn relay_loop(
    socket: Arc<UdpSocket>,
    upstream: SocketAddr,
    mut config: watch::Receiver<SimulatorConfig>,
) {
    let mut rng = StdRng::seed_from_u64(config.borrow_and_update().seed);
    let mut client: Option<SocketAddr> = None;
    let mut buf = vec![0u8; 65_535];

    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[sim] recv failed: {e}");
                continue;
            }
        };

        let dest = if from == upstream {
            match client {
                Some(c) => c,
                None => continue,
            }
        } else {
            if client != Some(from) {
                log::debug!("[sim] client is {from}");
                client = Some(from);
            }
            upstream
        };

        if config.has_changed().unwrap_or(false) {
            rng = StdRng::seed_from_u64(config.borrow_and_update().seed);
        }
        let cfg = config.borrow().clone();

        match decide(&cfg, &mut rng) {
            Fate::Drop => log::debug!("[sim] drop {n}B {from} → {dest}"),
            Fate::Forward { copies, delayed } => {
                let data = buf[..n].to_vec();
                if delayed {
                    let socket = Arc::clone(&socket);
                    let delay = cfg.reorder_delay;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        for _ in 0..copies {
                            let _ = socket.send_to(&data, dest).await;
                        }
                    });
                } else {
                    for _ in 0..copies {
                        if let Err(e) = socket.send_to(&data, dest).await {
                            log::warn!("[sim] send to {dest} failed: {e}");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transparent_by_default() {
        let cfg = SimulatorConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(
                decide(&cfg, &mut rng),
                Fate::Forward {
                    copies: 1,
                    delayed: false
                }
            );
        }
    }

    #[test]
    fn same_seed_same_fates() {
        let cfg = SimulatorConfig {
            loss_rate: 0.3,
            duplicate_rate: 0.2,
            reorder_rate: 0.2,
            ..SimulatorConfig::default()
        };
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..50).map(|_| decide(&cfg, &mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(run(7), run(7));
        assert!(run(7).contains(&Fate::Drop));
    }

    #[test]
    fn total_loss_drops_everything() {
        let cfg = SimulatorConfig {
            loss_rate: 1.0,
            ..SimulatorConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        assert!((0..20).all(|_| decide(&cfg, &mut rng) == Fate::Drop));
    }

    #[tokio::test]
    async fn relays_both_directions() {
        let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let relay = LossyRelay::start(upstream.local_addr().unwrap(), SimulatorConfig::default())
            .await
            .unwrap();

        client.send_to(b"ping", relay.addr()).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = upstream.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, relay.addr());

        upstream.send_to(b"pong", relay.addr()).await.unwrap();
        let (n, from) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
        assert_eq!(from, relay.addr());

        relay.stop().await;
    }
}
