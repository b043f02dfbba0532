//! Asynchronous planning pipeline.
//!
//! Planning calls run on the tokio runtime behind a semaphore that bounds
//! how many are outstanding at once. The tick loop never awaits them: each
//! submission returns a [`PendingPlan`] that is polled with
//! [`PendingPlan::try_take`] at the start of every tick.
//!
//! Cancellation is a shared flag plus an abort of the worker task. The abort
//! drops a call parked at an await point, releasing its permit. A call that
//! already returned is caught by the flag: the worker checks it after the
//! external call and drops its result, and the consumer checks it before
//! looking at the channel. A result that lands after cancellation is
//! therefore never observed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crew_core::{AgentContext, Error, PlanningError, PlanningResult, PlanningService, Result};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;

type PlanOutcome = std::result::Result<PlanningResult, PlanningError>;

/// Non-blocking view of an outstanding request.
#[derive(Debug)]
pub enum PlanPoll {
    Pending,
    Ready(PlanOutcome),
}

/// Handle to one in-flight planning request.
pub struct PendingPlan {
    goal: String,
    rx: oneshot::Receiver<PlanOutcome>,
    cancelled: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl PendingPlan {
    pub fn goal(&self) -> &str {
        &self.goal
    }

    /// Check for a result without blocking.
    pub fn try_take(&mut self) -> PlanPoll {
        if self.cancelled.load(Ordering::Acquire) {
            return PlanPoll::Ready(Err(PlanningError::Cancelled));
        }
        match self.rx.try_recv() {
            Ok(outcome) => PlanPoll::Ready(outcome),
            Err(oneshot::error::TryRecvError::Empty) => PlanPoll::Pending,
            Err(oneshot::error::TryRecvError::Closed) => PlanPoll::Ready(Err(
                PlanningError::Transport("planning worker stopped without a result".into()),
            )),
        }
    }

    /// Abandon the request. Any result that arrives later is discarded.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.worker.abort();
    }
}

impl Drop for PendingPlan {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Bounded worker pool in front of a [`PlanningService`].
pub struct PlanningPipeline {
    service: Arc<dyn PlanningService>,
    permits: Arc<Semaphore>,
    handle: Handle,
}

impl PlanningPipeline {
    /// Create a pipeline on the current tokio runtime.
    pub fn new(service: Arc<dyn PlanningService>, max_concurrent: usize) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::internal(format!("planning pipeline needs a tokio runtime: {}", e)))?;
        Ok(Self::with_handle(service, max_concurrent, handle))
    }

    pub fn with_handle(
        service: Arc<dyn PlanningService>,
        max_concurrent: usize,
        handle: Handle,
    ) -> Self {
        Self {
            service,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            handle,
        }
    }

    /// Requests currently allowed to start.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Start planning `goal`. Returns immediately.
    pub fn submit(&self, goal: impl Into<String>, context: AgentContext) -> PendingPlan {
        let goal = goal.into();
        let (tx, rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let service = self.service.clone();
        let permits = self.permits.clone();
        let flag = cancelled.clone();
        let request = goal.clone();

        let worker = self.handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                let _ = tx.send(Err(PlanningError::Transport("planning pool is closed".into())));
                return;
            };
            if flag.load(Ordering::Acquire) {
                tracing::debug!(agent = %context.name, "Planning cancelled before it started");
                return;
            }

            let outcome = service.plan(&request, &context).await;

            if flag.load(Ordering::Acquire) {
                tracing::debug!(
                    agent = %context.name,
                    planner = service.name(),
                    "Discarding planning result that arrived after cancellation"
                );
                return;
            }
            // Receiver gone means the agent was dropped; nothing to do.
            let _ = tx.send(outcome);
        });

        PendingPlan {
            goal,
            rx,
            cancelled,
            worker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_core::mocks::ScriptedPlanner;
    use crew_core::{AgentId, Position, Task};
    use std::time::Duration;

    fn context() -> AgentContext {
        AgentContext {
            agent_id: AgentId::new(),
            name: "Ada".into(),
            position: Position::default(),
            available_actions: vec!["gather".into()],
            memories: vec![],
            recent_actions: vec![],
        }
    }

    async fn wait_ready(pending: &mut PendingPlan) -> PlanOutcome {
        for _ in 0..200 {
            if let PlanPoll::Ready(outcome) = pending.try_take() {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("planning never finished");
    }

    #[tokio::test]
    async fn test_result_is_delivered() {
        let planner = Arc::new(ScriptedPlanner::with_tasks(vec![Task::new("wait")]));
        let pipeline = PlanningPipeline::new(planner, 2).unwrap();

        let mut pending = pipeline.submit("rest", context());
        let plan = wait_ready(&mut pending).await.unwrap();
        assert_eq!(plan.goal(), "rest");
        assert_eq!(plan.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_poll_is_non_blocking_while_in_flight() {
        let (planner, gate) = ScriptedPlanner::with_tasks(vec![]).gated();
        let pipeline = PlanningPipeline::new(Arc::new(planner), 1).unwrap();

        let mut pending = pipeline.submit("think", context());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(pending.try_take(), PlanPoll::Pending));

        gate.notify_one();
        assert!(wait_ready(&mut pending).await.is_ok());
    }

    #[tokio::test]
    async fn test_late_result_after_cancel_is_discarded() {
        let (planner, gate) = ScriptedPlanner::with_tasks(vec![Task::new("wait")]).gated();
        let planner = Arc::new(planner);
        let pipeline = PlanningPipeline::new(planner.clone(), 1).unwrap();

        let mut pending = pipeline.submit("think", context());
        tokio::time::sleep(Duration::from_millis(10)).await;
        // The call wins the race: it returns after the flag is set but
        // before the worker is aborted.
        pending.cancelled.store(true, Ordering::Release);
        gate.notify_one();

        // Let the worker finish its call.
        for _ in 0..200 {
            if planner.completed_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(planner.completed_count(), 1);
        assert!(matches!(
            pending.try_take(),
            PlanPoll::Ready(Err(PlanningError::Cancelled))
        ));
    }

    #[tokio::test]
    async fn test_cancel_releases_permit_of_hung_call() {
        let (planner, gate) = ScriptedPlanner::with_tasks(vec![]).gated();
        let planner = Arc::new(planner);
        let pipeline = PlanningPipeline::new(planner.clone(), 1).unwrap();

        let first = pipeline.submit("hang", context());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pipeline.available_permits(), 0);

        first.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pipeline.available_permits(), 1);

        let mut second = pipeline.submit("next goal", context());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(planner.call_count(), 2);
        gate.notify_one();
        let plan = wait_ready(&mut second).await.unwrap();
        assert_eq!(plan.goal(), "next goal");
        assert_eq!(planner.completed_count(), 1);
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let (planner, gate) = ScriptedPlanner::with_tasks(vec![]).gated();
        let planner = Arc::new(planner);
        let pipeline = PlanningPipeline::new(planner.clone(), 1).unwrap();

        let mut first = pipeline.submit("one", context());
        let mut second = pipeline.submit("two", context());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(planner.call_count(), 1);

        gate.notify_one();
        wait_ready(&mut first).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(planner.call_count(), 2);

        gate.notify_one();
        wait_ready(&mut second).await.unwrap();
    }
}
