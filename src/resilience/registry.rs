//! Owned container for the shared resilience state.

use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::queue::RequestQueue;

/// One circuit breaker registry and one request queue, shared by the
/// dispatcher and the admin/health surfaces.
pub struct ResilienceRegistry {
    breaker: CircuitBreaker,
    queue: RequestQueue,
}

impl ResilienceRegistry {
    pub fn new(config: &DispatchConfig) -> Arc<Self> {
        Arc::new(Self {
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            queue: RequestQueue::new(config.queue.clone()),
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Push reloaded breaker and queue settings into the live components.
    pub fn apply_config(&self, config: &DispatchConfig) {
        self.breaker.update_config(config.circuit_breaker.clone());
        self.queue.update_config(config.queue.clone());
        tracing::info!(
            failure_threshold = config.circuit_breaker.failure_threshold,
            max_concurrent = config.queue.max_concurrent,
            max_queue_size = config.queue.max_queue_size,
            "Resilience configuration applied"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_config() {
        let registry = ResilienceRegistry::new(&DispatchConfig::default());
        assert_eq!(registry.queue().get_stats().max_concurrent, 3);

        let mut config = DispatchConfig::default();
        config.queue.max_concurrent = 7;
        config.circuit_breaker.min_samples = 1;
        registry.apply_config(&config);

        assert_eq!(registry.queue().get_stats().max_concurrent, 7);
        assert_eq!(registry.breaker().config().min_samples, 1);
    }
}
