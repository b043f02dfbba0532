//! Task executor: drains one agent's queue, one task at a time.
//!
//! Each call to [`TaskExecutor::tick`] starts the next queued task when
//! nothing is running, then advances the running task by one step. The
//! executor only reports what happened; the agent decides what that means
//! for its lifecycle state.

use std::collections::VecDeque;
use std::sync::Arc;

use crew_core::{traits::Action, ActionContext, ActionResult, Error, Task};
use crew_skills::ActionRegistry;

/// What one executor step produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorStep {
    /// Nothing running and nothing queued.
    Drained,
    /// The current task needs more ticks.
    Running,
    /// A task finished this tick.
    Finished { task: Task, result: ActionResult },
}

struct RunningTask {
    task: Task,
    action: Box<dyn Action>,
}

pub struct TaskExecutor {
    actions: Arc<ActionRegistry>,
    queue: VecDeque<Task>,
    current: Option<RunningTask>,
}

impl TaskExecutor {
    pub fn new(actions: Arc<ActionRegistry>) -> Self {
        Self {
            actions,
            queue: VecDeque::new(),
            current: None,
        }
    }

    /// Replace the queue with a fresh plan.
    pub fn load_plan(&mut self, tasks: Vec<Task>) {
        self.queue = tasks.into();
    }

    pub fn enqueue(&mut self, task: Task) {
        self.queue.push_back(task);
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current.as_ref().map(|r| &r.task)
    }

    /// Running task first, then the queue in order.
    pub fn pending_tasks(&self) -> Vec<Task> {
        self.current
            .iter()
            .map(|r| r.task.clone())
            .chain(self.queue.iter().cloned())
            .collect()
    }

    /// Advance by one step.
    pub fn tick(&mut self, ctx: &ActionContext) -> ExecutorStep {
        if self.current.is_none() {
            let Some(task) = self.queue.pop_front() else {
                return ExecutorStep::Drained;
            };
            match self.actions.create(ctx, &task) {
                Ok(mut action) => {
                    tracing::debug!(agent = %ctx.agent_name, task = %action.description(), "Starting task");
                    action.start();
                    self.current = Some(RunningTask { task, action });
                }
                Err(e) => {
                    let result = match &e {
                        // Skipping an unknown action keeps the rest of the plan usable.
                        Error::UnknownAction(_) => ActionResult::failure_no_replan(e.to_string()),
                        _ => ActionResult::failure(e.to_string()),
                    };
                    return ExecutorStep::Finished { task, result };
                }
            }
        }

        let Some(running) = self.current.as_mut() else {
            return ExecutorStep::Drained;
        };
        match running.action.tick() {
            None => ExecutorStep::Running,
            Some(result) => {
                let finished = self.current.take().map(|r| r.task);
                match finished {
                    Some(task) => ExecutorStep::Finished { task, result },
                    None => ExecutorStep::Drained,
                }
            }
        }
    }

    /// Cancel the running task and clear the queue. Returns the cancelled task.
    pub fn stop(&mut self) -> Option<Task> {
        self.queue.clear();
        self.current.take().map(|mut running| {
            running.action.cancel();
            running.task
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_core::mocks::MockWorld;
    use crew_core::{AgentId, Position};

    fn ctx(world: Arc<MockWorld>) -> ActionContext {
        ActionContext {
            agent_id: AgentId::new(),
            agent_name: "Ada".into(),
            position: Position::default(),
            world,
        }
    }

    fn gather(resource: &str) -> Task {
        Task::new("gather").with_param("resource", resource)
    }

    #[test]
    fn test_runs_tasks_in_order() {
        let world = Arc::new(MockWorld::with_latency(1));
        let ctx = ctx(world.clone());
        let mut executor = TaskExecutor::new(Arc::new(ActionRegistry::with_builtins()));
        executor.load_plan(vec![gather("iron"), gather("coal")]);

        assert_eq!(executor.tick(&ctx), ExecutorStep::Running);
        assert_eq!(executor.current_task(), Some(&gather("iron")));
        assert!(matches!(executor.tick(&ctx), ExecutorStep::Finished { ref task, ref result } if task == &gather("iron") && result.success));
        assert_eq!(executor.tick(&ctx), ExecutorStep::Running);
        assert!(matches!(executor.tick(&ctx), ExecutorStep::Finished { .. }));
        assert_eq!(executor.tick(&ctx), ExecutorStep::Drained);
        assert!(executor.is_idle());
        assert_eq!(world.submitted_count(), 2);
    }

    #[test]
    fn test_unknown_action_does_not_require_replanning() {
        let world = Arc::new(MockWorld::new());
        let mut executor = TaskExecutor::new(Arc::new(ActionRegistry::with_builtins()));
        executor.load_plan(vec![Task::new("teleport"), gather("iron")]);

        let ExecutorStep::Finished { result, .. } = executor.tick(&ctx(world)) else {
            panic!("expected finished step");
        };
        assert!(!result.success);
        assert!(!result.requires_replanning);
        assert_eq!(executor.queued(), 1);
    }

    #[test]
    fn test_bad_parameters_require_replanning() {
        let world = Arc::new(MockWorld::new());
        let mut executor = TaskExecutor::new(Arc::new(ActionRegistry::with_builtins()));
        executor.load_plan(vec![Task::new("gather")]);

        let ExecutorStep::Finished { result, .. } = executor.tick(&ctx(world)) else {
            panic!("expected finished step");
        };
        assert!(result.requires_replanning);
    }

    #[test]
    fn test_stop_cancels_and_clears() {
        let world = Arc::new(MockWorld::with_latency(5));
        let ctx = ctx(world.clone());
        let mut executor = TaskExecutor::new(Arc::new(ActionRegistry::with_builtins()));
        executor.load_plan(vec![gather("iron"), gather("coal")]);
        executor.tick(&ctx);

        assert_eq!(executor.pending_tasks(), vec![gather("iron"), gather("coal")]);
        assert_eq!(executor.stop(), Some(gather("iron")));
        assert!(executor.is_idle());
        assert_eq!(world.cancelled_count(), 1);
    }
}
