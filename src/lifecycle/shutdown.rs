//! Shutdown coordination.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::resilience::RequestQueue;

/// Broadcast channel that every long-running task subscribes to.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Signal every subscriber.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still subscribed.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Stop starting queued work, fail what is still pending, then wait up
    /// to `grace` for in-flight tasks. Returns false if the deadline passed.
    pub async fn drain_queue(&self, queue: &RequestQueue, grace: Duration) -> bool {
        queue.pause();
        let cleared = queue.clear();
        tracing::info!(cleared, running = queue.running(), "Draining request queue");

        match tokio::time::timeout(grace, queue.wait_idle()).await {
            Ok(()) => {
                tracing::info!("Request queue drained");
                true
            }
            Err(_) => {
                tracing::warn!(running = queue.running(), "Shutdown grace period elapsed with tasks in flight");
                false
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::resilience::EnqueueOptions;

    #[tokio::test]
    async fn test_trigger_reaches_subscribers() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 2);

        shutdown.trigger();
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_in_flight() {
        let queue = RequestQueue::new(QueueConfig {
            max_concurrent: 1,
            ..QueueConfig::default()
        });
        let running = queue
            .enqueue(
                || async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, String>(1)
                },
                EnqueueOptions::default(),
            )
            .unwrap();
        let pending = queue
            .enqueue(|| async { Ok::<_, String>(2) }, EnqueueOptions::default())
            .unwrap();
        tokio::task::yield_now().await;

        let shutdown = Shutdown::new();
        assert!(shutdown.drain_queue(&queue, Duration::from_secs(1)).await);
        assert!(running.await.is_ok());
        assert_eq!(pending.await.unwrap_err().attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_deadline() {
        let queue = RequestQueue::default();
        let _slow = queue
            .enqueue(
                || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, String>(())
                },
                EnqueueOptions::default(),
            )
            .unwrap();
        tokio::task::yield_now().await;

        let shutdown = Shutdown::new();
        assert!(!shutdown.drain_queue(&queue, Duration::from_millis(100)).await);
    }
}
