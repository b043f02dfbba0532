//! Built-in actions.
//!
//! World actions submit one mutation on `start` and poll it every tick until
//! the world reports an outcome. `wait` runs locally.

use std::sync::Arc;

use crew_core::{
    traits::{Action, ActionContext, ActionFactory, WorldInterface},
    types::{ActionResult, AgentId, MutationStatus, MutationTicket, Position, Task, WorldRequest},
    Error, Result,
};

/// Every built-in factory, in registration order.
pub fn builtin_factories() -> Vec<Arc<dyn ActionFactory>> {
    vec![
        Arc::new(GatherFactory),
        Arc::new(BuildFactory),
        Arc::new(PlaceFactory),
        Arc::new(MoveToFactory),
        Arc::new(WaitFactory),
    ]
}

// =============================================================================
// World Action
// =============================================================================

/// Drives a single world mutation to completion.
pub struct WorldAction {
    agent: AgentId,
    world: Arc<dyn WorldInterface>,
    request: WorldRequest,
    ticket: Option<MutationTicket>,
    description: String,
}

impl WorldAction {
    pub fn new(ctx: &ActionContext, request: WorldRequest, description: String) -> Self {
        Self {
            agent: ctx.agent_id,
            world: ctx.world.clone(),
            request,
            ticket: None,
            description,
        }
    }
}

impl Action for WorldAction {
    fn start(&mut self) {
        let ticket = self.world.submit(self.agent, self.request.clone());
        tracing::debug!(agent = %self.agent, ticket = ticket.0, action = %self.description, "Submitted world mutation");
        self.ticket = Some(ticket);
    }

    fn tick(&mut self) -> Option<ActionResult> {
        let Some(ticket) = self.ticket else {
            return Some(ActionResult::failure_no_replan(format!(
                "{} was never started",
                self.description
            )));
        };
        match self.world.poll(ticket) {
            MutationStatus::Pending => None,
            MutationStatus::Succeeded(msg) => {
                self.ticket = None;
                Some(ActionResult::success(msg))
            }
            MutationStatus::Failed(msg) => {
                self.ticket = None;
                Some(ActionResult::failure(msg))
            }
        }
    }

    fn cancel(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.world.cancel(ticket);
        }
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

fn required_str(task: &Task, key: &str) -> Result<String> {
    match task.get_str(key) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(Error::task(format!(
            "'{}' needs a '{}' parameter",
            task.action, key
        ))),
    }
}

fn coord(task: &Task, key: &str) -> Result<i32> {
    let v = task.get_i64(key).ok_or_else(|| {
        Error::task(format!("'{}' needs a numeric '{}' parameter", task.action, key))
    })?;
    i32::try_from(v).map_err(|_| Error::task(format!("'{}' is out of range: {}", key, v)))
}

/// Explicit `x`/`y`/`z`, or `None` when none are given.
fn optional_position(task: &Task) -> Result<Option<Position>> {
    if !task.has("x") && !task.has("y") && !task.has("z") {
        return Ok(None);
    }
    Ok(Some(Position::new(
        coord(task, "x")?,
        coord(task, "y")?,
        coord(task, "z")?,
    )))
}

// =============================================================================
// Gather
// =============================================================================

pub struct GatherFactory;

impl ActionFactory for GatherFactory {
    fn id(&self) -> &str {
        "gather"
    }

    fn usage(&self) -> &str {
        "collect a resource near the agent {resource: string, quantity: int = 1}"
    }

    fn create(&self, ctx: &ActionContext, task: &Task) -> Result<Box<dyn Action>> {
        let resource = required_str(task, "resource")?;
        let quantity = task.get_i64_or("quantity", 1);
        let quantity = u32::try_from(quantity)
            .ok()
            .filter(|q| *q > 0)
            .ok_or_else(|| Error::task(format!("gather quantity must be positive, got {}", quantity)))?;
        let description = format!("gather {} {}", quantity, resource);
        Ok(Box::new(WorldAction::new(
            ctx,
            WorldRequest::Gather {
                resource,
                quantity,
                near: ctx.position,
            },
            description,
        )))
    }
}

// =============================================================================
// Build
// =============================================================================

pub struct BuildFactory;

impl ActionFactory for BuildFactory {
    fn id(&self) -> &str {
        "build"
    }

    fn usage(&self) -> &str {
        "build a structure {structure: string, x?: int, y?: int, z?: int}"
    }

    fn create(&self, ctx: &ActionContext, task: &Task) -> Result<Box<dyn Action>> {
        let structure = required_str(task, "structure")?;
        let at = optional_position(task)?.unwrap_or(ctx.position);
        let description = format!("build {} at {}", structure, at);
        Ok(Box::new(WorldAction::new(
            ctx,
            WorldRequest::Build { structure, at },
            description,
        )))
    }
}

// =============================================================================
// Place
// =============================================================================

pub struct PlaceFactory;

impl ActionFactory for PlaceFactory {
    fn id(&self) -> &str {
        "place"
    }

    fn usage(&self) -> &str {
        "place one block {block: string, x: int, y: int, z: int}"
    }

    fn create(&self, ctx: &ActionContext, task: &Task) -> Result<Box<dyn Action>> {
        let block = required_str(task, "block")?;
        let at = optional_position(task)?
            .ok_or_else(|| Error::task("'place' needs x, y and z parameters"))?;
        let description = format!("place {} at {}", block, at);
        Ok(Box::new(WorldAction::new(
            ctx,
            WorldRequest::Place { block, at },
            description,
        )))
    }
}

// =============================================================================
// Move
// =============================================================================

pub struct MoveToFactory;

impl ActionFactory for MoveToFactory {
    fn id(&self) -> &str {
        "move_to"
    }

    fn usage(&self) -> &str {
        "walk to a position {x: int, y: int, z: int}"
    }

    fn create(&self, ctx: &ActionContext, task: &Task) -> Result<Box<dyn Action>> {
        let target = optional_position(task)?
            .ok_or_else(|| Error::task("'move_to' needs x, y and z parameters"))?;
        Ok(Box::new(WorldAction::new(
            ctx,
            WorldRequest::MoveTo { target },
            format!("move to {}", target),
        )))
    }
}

// =============================================================================
// Wait
// =============================================================================

/// Idles for a number of ticks.
pub struct WaitAction {
    remaining: u64,
    cancelled: bool,
}

impl Action for WaitAction {
    fn start(&mut self) {}

    fn tick(&mut self) -> Option<ActionResult> {
        if self.cancelled {
            return Some(ActionResult::failure_no_replan("wait cancelled"));
        }
        if self.remaining == 0 {
            return Some(ActionResult::success("finished waiting"));
        }
        self.remaining -= 1;
        None
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }

    fn description(&self) -> String {
        format!("wait ({} ticks left)", self.remaining)
    }
}

pub struct WaitFactory;

impl ActionFactory for WaitFactory {
    fn id(&self) -> &str {
        "wait"
    }

    fn usage(&self) -> &str {
        "do nothing for a while {ticks: int = 20}"
    }

    fn create(&self, _ctx: &ActionContext, task: &Task) -> Result<Box<dyn Action>> {
        let ticks = task.get_i64_or("ticks", 20);
        let remaining = u64::try_from(ticks)
            .map_err(|_| Error::task(format!("wait ticks must not be negative, got {}", ticks)))?;
        Ok(Box::new(WaitAction {
            remaining,
            cancelled: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_core::mocks::MockWorld;

    fn ctx(world: Arc<MockWorld>) -> ActionContext {
        ActionContext {
            agent_id: AgentId::new(),
            agent_name: "Ada".into(),
            position: Position::new(10, 64, 10),
            world,
        }
    }

    fn run(action: &mut dyn Action, max_ticks: usize) -> Option<ActionResult> {
        action.start();
        for _ in 0..max_ticks {
            if let Some(result) = action.tick() {
                return Some(result);
            }
        }
        None
    }

    #[test]
    fn test_gather_polls_until_done() {
        let world = Arc::new(MockWorld::with_latency(2));
        let task = Task::new("gather")
            .with_param("resource", "iron")
            .with_param("quantity", 10);
        let mut action = GatherFactory.create(&ctx(world.clone()), &task).unwrap();

        action.start();
        assert_eq!(action.tick(), None);
        assert_eq!(action.tick(), None);
        let result = action.tick().unwrap();
        assert!(result.success);

        let submitted = world.submitted();
        assert_eq!(
            submitted[0].1,
            WorldRequest::Gather {
                resource: "iron".into(),
                quantity: 10,
                near: Position::new(10, 64, 10),
            }
        );
    }

    #[test]
    fn test_world_failure_requires_replanning() {
        let world = Arc::new(MockWorld::new());
        world.fail_action("place");
        let task = Task::new("place")
            .with_param("block", "stone")
            .with_param("x", 1)
            .with_param("y", 2)
            .with_param("z", 3);
        let mut action = PlaceFactory.create(&ctx(world), &task).unwrap();

        let result = run(action.as_mut(), 3).unwrap();
        assert!(!result.success);
        assert!(result.requires_replanning);
    }

    #[test]
    fn test_cancel_releases_ticket() {
        let world = Arc::new(MockWorld::with_latency(10));
        let task = Task::new("move_to")
            .with_param("x", 0)
            .with_param("y", 70)
            .with_param("z", 0);
        let mut action = MoveToFactory.create(&ctx(world.clone()), &task).unwrap();
        action.start();
        assert_eq!(action.tick(), None);
        action.cancel();
        assert_eq!(world.cancelled_count(), 1);
    }

    #[test]
    fn test_bad_parameters_rejected() {
        let world = Arc::new(MockWorld::new());
        let c = ctx(world);
        assert!(GatherFactory.create(&c, &Task::new("gather")).is_err());
        assert!(GatherFactory
            .create(
                &c,
                &Task::new("gather")
                    .with_param("resource", "iron")
                    .with_param("quantity", 0)
            )
            .is_err());
        assert!(PlaceFactory
            .create(&c, &Task::new("place").with_param("block", "stone").with_param("x", 1))
            .is_err());
        assert!(WaitFactory
            .create(&c, &Task::new("wait").with_param("ticks", -1))
            .is_err());
    }

    #[test]
    fn test_build_defaults_to_agent_position() {
        let world = Arc::new(MockWorld::new());
        let task = Task::new("build").with_param("structure", "hut");
        let action = BuildFactory.create(&ctx(world), &task).unwrap();
        assert_eq!(action.description(), "build hut at (10, 64, 10)");
    }

    #[test]
    fn test_wait_counts_ticks() {
        let world = Arc::new(MockWorld::new());
        let mut action = WaitFactory
            .create(&ctx(world), &Task::new("wait").with_param("ticks", 2))
            .unwrap();
        action.start();
        assert_eq!(action.tick(), None);
        assert_eq!(action.tick(), None);
        assert!(action.tick().unwrap().success);
    }
}
