//! Bundled worker that only logs; used by the default daemon and the demo fleet.

use async_trait::async_trait;
use tracing::info;

use crate::error::WorkerError;
use crate::jobs::WorkerConfig;
use crate::workers::worker::Worker;

/// Logs on start and on every cycle.
///
/// `workerConfig` keys:
/// - `failAfterCycles` (integer): fail the n-th cycle, to exercise restart backoff.
#[derive(Debug, Default)]
pub struct MockWorker {
    cycles: u64,
    fail_after: Option<u64>,
}

impl MockWorker {
    /// Registry constructor.
    pub fn factory() -> Box<dyn Worker> {
        Box::new(Self::default())
    }

    /// Number of completed cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

#[async_trait]
impl Worker for MockWorker {
    async fn start(&mut self, config: &WorkerConfig) -> Result<(), WorkerError> {
        self.fail_after = config.get("failAfterCycles").and_then(|v| v.as_u64());
        info!(fail_after = ?self.fail_after, "mock worker initialized");
        Ok(())
    }

    async fn cycle(&mut self) -> Result<(), WorkerError> {
        self.cycles += 1;
        if self.fail_after.is_some_and(|n| self.cycles >= n) {
            return Err(WorkerError::Fail {
                reason: format!("configured to fail after {} cycles", self.cycles),
            });
        }
        info!(cycle = self.cycles, "mock worker cycle");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fails_on_configured_cycle() {
        let mut worker = MockWorker::default();
        let config = json!({"failAfterCycles": 2});
        worker.start(config.as_object().unwrap()).await.unwrap();
        assert!(worker.cycle().await.is_ok());
        assert!(worker.cycle().await.is_err());
        assert_eq!(worker.cycles(), 2);
    }

    #[tokio::test]
    async fn test_runs_forever_by_default() {
        let mut worker = MockWorker::default();
        worker.start(&WorkerConfig::new()).await.unwrap();
        for _ in 0..10 {
            worker.cycle().await.unwrap();
        }
    }
}
