// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Candidate Evaluators
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Scoring of realized schedules, either with one batched surrogate
//! rollout or with one simulator run per candidate on a worker pool.

use crate::env::SimulatorFactory;
use crate::problem::ControlProblem;
use drain_ml::model::SequenceModel;
use drain_ml::objective::FloodObjective;
use drain_ml::rollout::RolloutEngine;
use drain_types::error::{ensure_shape, DrainError, DrainResult};
use drain_types::state::NetworkState;
use ndarray::{Array, Array1, Array2, ArrayD, ArrayView2, ArrayView3, Dimension, IxDyn};
use rayon::prelude::*;
use tracing::{debug, warn};

pub trait Evaluator {
    /// Realized schedules `(p, eval_steps, n_act)` → objectives `(p,)`.
    fn evaluate(&mut self, schedules: ArrayView3<'_, f64>) -> DrainResult<Array1<f64>>;

    /// Candidates scored so far.
    fn evaluations(&self) -> usize;
}

/// Repeat `a` along a new leading axis of size `p`.
pub(crate) fn repeat_batch<D: Dimension>(a: &Array<f64, D>, p: usize) -> ArrayD<f64> {
    let mut shape = vec![p];
    shape.extend_from_slice(a.shape());
    let src = a.view().into_dyn();
    let mut out = ArrayD::zeros(IxDyn(&shape));
    for mut lane in out.outer_iter_mut() {
        lane.assign(&src);
    }
    out
}

/// Read-only surrogate view of one control instant.
///
/// Holds the rollout engine over a borrowed model, the state window and
/// the runoff forecast for a single optimisation run; everything is
/// released when the context drops.
pub struct SurrogateContext<'m> {
    engine: RolloutEngine<'m>,
    state: NetworkState,
    runoff: Array2<f64>,
    objective: FloodObjective,
    evaluations: usize,
}

impl<'m> SurrogateContext<'m> {
    /// `state` is the model input window, `runoff (eval_steps, n_node)`.
    pub fn acquire(
        model: &'m dyn SequenceModel,
        problem: &ControlProblem,
        state: NetworkState,
        runoff: Array2<f64>,
        objective: FloodObjective,
    ) -> DrainResult<Self> {
        let engine = RolloutEngine::new(model)?;
        let s = engine.shape();
        state.check(s.seq_in, s.n_node, s.n_in)?;
        state.check_edges(s.seq_in, s.n_edge, s.edge_in)?;
        ensure_shape(
            "runoff forecast",
            &[problem.eval_steps(), s.n_node],
            runoff.shape(),
        )?;
        if s.n_act != problem.n_act() {
            return Err(DrainError::ConfigError(format!(
                "surrogate expects {} control channels, action space realizes {}",
                s.n_act,
                problem.n_act()
            )));
        }
        debug!(
            n_node = s.n_node,
            eval_steps = problem.eval_steps(),
            "surrogate context acquired"
        );
        Ok(Self {
            engine,
            state,
            runoff,
            objective,
            evaluations: 0,
        })
    }

    pub fn engine(&self) -> &RolloutEngine<'m> {
        &self.engine
    }

    pub fn state(&self) -> &NetworkState {
        &self.state
    }

    pub fn runoff(&self) -> &Array2<f64> {
        &self.runoff
    }

    pub fn objective(&self) -> &FloodObjective {
        &self.objective
    }

    /// Window, runoff and edge window repeated for `p` candidates.
    pub fn batch_inputs(&self, p: usize) -> (ArrayD<f64>, ArrayD<f64>, Option<ArrayD<f64>>) {
        (
            repeat_batch(&self.state.nodes, p),
            repeat_batch(&self.runoff, p),
            self.state.edges.as_ref().map(|e| repeat_batch(e, p)),
        )
    }

    pub(crate) fn count(&mut self, n: usize) {
        self.evaluations += n;
    }
}

impl Evaluator for SurrogateContext<'_> {
    fn evaluate(&mut self, schedules: ArrayView3<'_, f64>) -> DrainResult<Array1<f64>> {
        let traj = self
            .engine
            .rollout_batch(&self.state, self.runoff.view(), schedules)?;
        let scores = self.objective.score(traj.view())?;
        self.evaluations += scores.len();
        Ok(scores)
    }

    fn evaluations(&self) -> usize {
        self.evaluations
    }
}

impl Drop for SurrogateContext<'_> {
    fn drop(&mut self) {
        debug!(evaluations = self.evaluations, "surrogate context released");
    }
}

/// One simulator run per candidate on a fixed-size worker pool.
///
/// A failed or non-finite run scores `failure_penalty` instead of
/// aborting the batch.
pub struct SimulatorEvaluator<'f> {
    factory: &'f dyn SimulatorFactory,
    pool: rayon::ThreadPool,
    inflow: Option<Array2<f64>>,
    failure_penalty: f64,
    evaluations: usize,
}

impl<'f> SimulatorEvaluator<'f> {
    pub fn new(
        factory: &'f dyn SimulatorFactory,
        processes: usize,
        failure_penalty: f64,
    ) -> DrainResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(processes.max(1))
            .build()
            .map_err(|e| DrainError::Simulation(format!("worker pool: {e}")))?;
        debug!(processes, "simulator pool acquired");
        Ok(Self {
            factory,
            pool,
            inflow: None,
            failure_penalty,
            evaluations: 0,
        })
    }

    /// Lateral inflow `(eval_steps, n_node)` forced into every candidate run.
    pub fn with_inflow(mut self, inflow: Array2<f64>) -> Self {
        self.inflow = Some(inflow);
        self
    }

    pub fn failure_penalty(&self) -> f64 {
        self.failure_penalty
    }
}

/// Objective summed over the schedule, stopping early if the event ends.
fn simulate(
    factory: &dyn SimulatorFactory,
    schedule: ArrayView2<'_, f64>,
    inflow: Option<&Array2<f64>>,
) -> DrainResult<f64> {
    let mut sim = factory.build()?;
    let mut total = 0.0;
    for (idx, setting) in schedule.outer_iter().enumerate() {
        if let Some(rates) = inflow {
            if idx < rates.nrows() {
                for (node, &q) in rates.row(idx).iter().enumerate() {
                    sim.set_inflow(node, q)?;
                }
            }
        }
        let done = sim.step(&setting.to_vec())?;
        total += sim.objective();
        if done {
            break;
        }
    }
    if !total.is_finite() {
        return Err(DrainError::Simulation(format!(
            "non-finite objective {total}"
        )));
    }
    Ok(total)
}

impl Evaluator for SimulatorEvaluator<'_> {
    fn evaluate(&mut self, schedules: ArrayView3<'_, f64>) -> DrainResult<Array1<f64>> {
        let rows: Vec<ArrayView2<'_, f64>> = schedules.outer_iter().collect();
        let factory = self.factory;
        let inflow = self.inflow.as_ref();
        let results: Vec<DrainResult<f64>> = self.pool.install(|| {
            rows.par_iter()
                .map(|schedule| simulate(factory, schedule.view(), inflow))
                .collect()
        });
        self.evaluations += results.len();
        Ok(results
            .into_iter()
            .enumerate()
            .map(|(candidate, res)| match res {
                Ok(f) => f,
                Err(e) => {
                    warn!(
                        candidate,
                        error = %e,
                        penalty = self.failure_penalty,
                        "candidate simulation failed"
                    );
                    self.failure_penalty
                }
            })
            .collect())
    }

    fn evaluations(&self) -> usize {
        self.evaluations
    }
}

impl Drop for SimulatorEvaluator<'_> {
    fn drop(&mut self) {
        debug!(evaluations = self.evaluations, "simulator pool released");
    }
}
