use rand::Rng;
use tracing::{debug, warn};

use crate::executor::{Outcome, ScenarioContext};
use crate::scenario::{Scenario, ScenarioTable, DRAW_DOMAIN};

/// What an iteration ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The fixture is empty, nothing to act on
    Skipped,
    /// One scenario ran with this outcome
    Ran(Scenario, Outcome),
}

/// Maps a uniform draw to exactly one scenario executor
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    table: ScenarioTable,
}

impl Dispatcher {
    pub fn new(table: ScenarioTable) -> Self {
        Self { table }
    }

    /// Uniform draw in `[0, 100)`
    pub fn draw() -> u32 {
        rand::thread_rng().gen_range(0..DRAW_DOMAIN)
    }

    /// Run the scenario selected by `draw` for worker `worker_id`
    pub async fn dispatch(&self, draw: u32, ctx: &ScenarioContext, worker_id: u32) -> Dispatch {
        if ctx.fixture.is_empty() {
            debug!(worker_id = worker_id, "No teams available, skipping iteration");
            ctx.metrics.record_no_op_iteration();
            ctx.metrics.record_iteration(None);
            return Dispatch::Skipped;
        }

        let Some(scenario) = self.table.select(draw) else {
            warn!(draw = draw, "Draw outside the scenario table, skipping iteration");
            ctx.metrics.record_no_op_iteration();
            ctx.metrics.record_iteration(None);
            return Dispatch::Skipped;
        };

        let outcome = ctx.execute(scenario, worker_id).await;
        if outcome == Outcome::NoOp {
            ctx.metrics.record_no_op_iteration();
        }
        ctx.metrics.record_iteration(Some(scenario));

        debug!(
            worker_id = worker_id,
            draw = draw,
            scenario = %scenario,
            outcome = ?outcome,
            "Iteration finished"
        );
        Dispatch::Ran(scenario, outcome)
    }

    /// Draw and dispatch in one step
    pub async fn run_iteration(&self, ctx: &ScenarioContext, worker_id: u32) -> Dispatch {
        let draw = Self::draw();
        self.dispatch(draw, ctx, worker_id).await
    }
}
