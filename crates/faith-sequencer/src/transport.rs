//! In-process bridge transport.
//!
//! [`SimulatedBridge`] stands in for the cross-chain message transport: each
//! submitted request resolves after a random latency, failing with a
//! configured probability. Resubmitting an unresolved activation id returns
//! the original ticket without rolling a new outcome. A ticket is forgotten
//! once a poll has reported its outcome.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use faith_core::error::SettlementError;
use faith_core::traits::{BridgeTransport, SettlementRequest, SettlementStatus, SettlementTicket};

/// Behaviour of a [`SimulatedBridge`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedBridgeConfig {
    pub min_latency: Duration,
    pub max_latency: Duration,
    /// Chance in `[0, 1]` that a settlement is rejected.
    pub failure_probability: f64,
}

impl Default for SimulatedBridgeConfig {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_millis(50),
            max_latency: Duration::from_millis(500),
            failure_probability: 0.0,
        }
    }
}

struct InFlight {
    resolves_at: Instant,
    outcome: SettlementStatus,
}

/// Randomised in-process transport.
pub struct SimulatedBridge {
    config: SimulatedBridgeConfig,
    rng: Mutex<StdRng>,
    tickets: Mutex<HashMap<SettlementTicket, InFlight>>,
}

impl SimulatedBridge {
    pub fn new(config: SimulatedBridgeConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic outcomes for a given seed.
    pub fn with_seed(config: SimulatedBridgeConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SimulatedBridgeConfig, rng: StdRng) -> Self {
        Self {
            config,
            rng: Mutex::new(rng),
            tickets: Mutex::new(HashMap::new()),
        }
    }

    /// Tickets submitted but not yet reported resolved.
    pub fn outstanding(&self) -> usize {
        self.tickets.lock().len()
    }

    fn roll(&self, request: &SettlementRequest) -> InFlight {
        let mut rng = self.rng.lock();
        let lo = self.config.min_latency.as_millis() as u64;
        let hi = (self.config.max_latency.as_millis() as u64).max(lo);
        let latency = Duration::from_millis(rng.gen_range(lo..=hi));
        let p = self.config.failure_probability.clamp(0.0, 1.0);
        let outcome = if rng.gen_bool(p) {
            SettlementStatus::Rejected {
                reason: "simulated relay rejection".into(),
            }
        } else {
            SettlementStatus::Settled {
                reference: format!("sim-{}", &request.activation_id.to_string()[..16]),
            }
        };
        InFlight {
            resolves_at: Instant::now() + latency,
            outcome,
        }
    }
}

#[async_trait]
impl BridgeTransport for SimulatedBridge {
    async fn submit(&self, request: &SettlementRequest) -> Result<SettlementTicket, SettlementError> {
        let ticket = SettlementTicket(request.activation_id.to_string());
        let mut tickets = self.tickets.lock();
        if !tickets.contains_key(&ticket) {
            let entry = self.roll(request);
            tickets.insert(ticket.clone(), entry);
        }
        Ok(ticket)
    }

    async fn poll(&self, ticket: &SettlementTicket) -> Result<SettlementStatus, SettlementError> {
        let mut tickets = self.tickets.lock();
        let entry = tickets
            .get(ticket)
            .ok_or_else(|| SettlementError::Transport(format!("unknown ticket {}", ticket.0)))?;
        if Instant::now() < entry.resolves_at {
            return Ok(SettlementStatus::Pending);
        }
        let resolved = tickets.remove(ticket).map(|entry| entry.outcome);
        Ok(resolved.unwrap_or(SettlementStatus::Pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faith_core::types::DepositKey;

    fn request(deposit: &str) -> SettlementRequest {
        let key = DepositKey::new("solana", deposit);
        SettlementRequest {
            activation_id: key.activation_id(),
            source_chain: key.chain,
            deposit_id: key.deposit_id,
            user: "user".into(),
            amount: 10,
            btc_equivalent: 10_000,
            locked_price: 3,
        }
    }

    fn fixed(latency_ms: u64, failure_probability: f64) -> SimulatedBridgeConfig {
        SimulatedBridgeConfig {
            min_latency: Duration::from_millis(latency_ms),
            max_latency: Duration::from_millis(latency_ms),
            failure_probability,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn settles_after_latency() {
        let bridge = SimulatedBridge::with_seed(fixed(100, 0.0), 7);
        let ticket = bridge.submit(&request("a")).await.unwrap();
        assert_eq!(bridge.poll(&ticket).await.unwrap(), SettlementStatus::Pending);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(matches!(
            bridge.poll(&ticket).await.unwrap(),
            SettlementStatus::Settled { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn certain_failure_rejects() {
        let bridge = SimulatedBridge::with_seed(fixed(0, 1.0), 7);
        let ticket = bridge.submit(&request("a")).await.unwrap();
        assert!(matches!(
            bridge.poll(&ticket).await.unwrap(),
            SettlementStatus::Rejected { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn resubmission_keeps_ticket_and_deadline() {
        let bridge = SimulatedBridge::with_seed(fixed(100, 0.0), 7);
        let first = bridge.submit(&request("a")).await.unwrap();
        tokio::time::advance(Duration::from_millis(60)).await;
        let second = bridge.submit(&request("a")).await.unwrap();
        assert_eq!(first, second);
        tokio::time::advance(Duration::from_millis(40)).await;
        assert!(matches!(
            bridge.poll(&second).await.unwrap(),
            SettlementStatus::Settled { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_tickets_are_forgotten() {
        let bridge = SimulatedBridge::with_seed(fixed(10, 0.5), 11);
        let mut tickets = Vec::new();
        for i in 0..50 {
            tickets.push(bridge.submit(&request(&format!("d{i}"))).await.unwrap());
        }
        assert_eq!(bridge.outstanding(), 50);
        tokio::time::advance(Duration::from_millis(10)).await;
        for ticket in &tickets {
            assert_ne!(bridge.poll(ticket).await.unwrap(), SettlementStatus::Pending);
        }
        assert_eq!(bridge.outstanding(), 0);
        assert!(matches!(
            bridge.poll(&tickets[0]).await,
            Err(SettlementError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn unknown_ticket_is_transport_error() {
        let bridge = SimulatedBridge::new(SimulatedBridgeConfig::default());
        let err = bridge
            .poll(&SettlementTicket("nope".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Transport(_)));
    }
}
