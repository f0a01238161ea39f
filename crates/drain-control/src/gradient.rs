// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Gradient Optimizer
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Batched gradient descent on continuous schedules through the surrogate.
//!
//! The whole candidate batch is one tape leaf. Each iteration clips it
//! into bounds, expands it to simulator resolution, rolls the surrogate
//! out with projection, scores the overflow and takes one Adam step on
//! every candidate at once. Coordinates sitting on a bound get no
//! gradient through the clip.

use crate::evaluate::SurrogateContext;
use crate::population::{best_of, Progress};
use crate::problem::ControlProblem;
use crate::results::OptimizationResult;
use drain_math::autodiff::Tape;
use drain_ml::optim::{Adam, Optimizer};
use drain_types::config::GradientConfig;
use drain_types::error::{DrainError, DrainResult};
use ndarray::{Array1, Array2, ArrayD, Dimension, Ix1, Ix2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

/// Tape key of the candidate batch inside the optimizer state.
const CONTROLS_KEY: &str = "controls";

/// One forward/backward pass over the batch.
#[derive(Debug, Clone)]
pub struct GradientStep {
    /// Objective per candidate at the clipped decision.
    pub objectives: Array1<f64>,
    /// Gradient with respect to the unclipped batch `(p, n_var)`.
    pub grad: Array2<f64>,
}

pub struct GradientOptimizer<'p> {
    problem: &'p ControlProblem,
    config: GradientConfig,
}

impl<'p> GradientOptimizer<'p> {
    pub fn new(problem: &'p ControlProblem, config: GradientConfig) -> DrainResult<Self> {
        config.validate()?;
        if problem.is_discrete() {
            return Err(DrainError::ConfigError(
                "gradient search needs a continuous action space".to_string(),
            ));
        }
        Ok(Self { problem, config })
    }

    pub fn config(&self) -> &GradientConfig {
        &self.config
    }

    fn bounds(&self, p: usize) -> (ArrayD<f64>, ArrayD<f64>) {
        let n_var = self.problem.n_var();
        let row = |b: &[f64]| Array2::from_shape_fn((p, n_var), |(_, j)| b[j]).into_dyn();
        (row(self.problem.lower()), row(self.problem.upper()))
    }

    /// Objective and gradient of a decision batch `y (p, n_var)`.
    pub fn evaluate(
        &self,
        ctx: &SurrogateContext<'_>,
        y: &Array2<f64>,
    ) -> DrainResult<GradientStep> {
        let problem = self.problem;
        let (p, n_var) = y.dim();
        if n_var != problem.n_var() {
            return Err(DrainError::shape(
                "decision batch",
                &[p, problem.n_var()],
                &[p, n_var],
            ));
        }
        let (lo, hi) = self.bounds(p);
        let (window, runoff, edges) = ctx.batch_inputs(p);

        let tape = Tape::new();
        let bound = ctx.engine().model().bind(&tape, false);
        let leaf = tape.leaf(y.clone().into_dyn());
        let settings = leaf
            .clamp(&lo, &hi)
            .reshape(&[p, problem.n_step(), problem.n_act()])
            .mix(&problem.expansion_matrix());
        let traj = ctx.engine().rollout_var(
            &bound,
            &window,
            &runoff,
            Some(settings),
            edges.as_ref(),
            true,
        )?;
        let scores = ctx.objective().score_var(traj)?;
        let objectives = scores
            .value()
            .into_dimensionality::<Ix1>()
            .map_err(|e| DrainError::ConfigError(format!("objective batch: {e}")))?;
        let mut grads = tape.backward(scores.sum());
        let grad = grads
            .take(leaf)
            .unwrap_or_else(|| ArrayD::zeros(y.raw_dim().into_dyn()))
            .into_dimensionality::<Ix2>()
            .map_err(|e| DrainError::ConfigError(format!("control gradient: {e}")))?;
        Ok(GradientStep { objectives, grad })
    }

    /// Minimise the surrogate objective, optionally seeded with `warm`.
    pub fn run(
        &self,
        ctx: &mut SurrogateContext<'_>,
        warm: Option<&[f64]>,
    ) -> DrainResult<OptimizationResult> {
        let problem = self.problem;
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut y = problem.initial_population(
            self.config.pop_size,
            warm,
            self.config.sampling,
            &mut rng,
        )?;
        let (lower, upper) = (problem.lower(), problem.upper());
        let mut adam = Adam::new(self.config.learning_rate);
        let mut progress = Progress::new();
        let mut best: Option<(Vec<f64>, f64)> = None;
        let mut best_history = Vec::new();

        loop {
            let step = self.evaluate(ctx, &y)?;
            ctx.count(y.nrows());
            progress.evaluations += y.nrows();
            progress.generations += 1;

            if let Some((x, f)) = best_of(y.view(), step.objectives.as_slice().unwrap_or(&[])) {
                if best.as_ref().map_or(true, |(_, bf)| f < *bf) {
                    let clipped = x
                        .iter()
                        .zip(lower.iter().zip(upper))
                        .map(|(v, (l, u))| v.clamp(*l, *u))
                        .collect();
                    best = Some((clipped, f));
                }
            }
            let iter_min = step.objectives.iter().copied().fold(f64::INFINITY, f64::min);
            progress.history.push(iter_min);
            best_history.push(best.as_ref().map_or(iter_min, |(_, f)| *f));

            let g = step.grad.mapv(f64::abs).mean().unwrap_or(0.0);
            debug!(
                iteration = progress.generations,
                grad = g,
                mean = step.objectives.mean().unwrap_or(f64::NAN),
                min = iter_min,
                best = best.as_ref().map_or(f64::NAN, |(_, f)| *f),
                "gradient iteration"
            );

            let mut y_dyn = y.into_dyn();
            adam.update(CONTROLS_KEY, &mut y_dyn, &step.grad.into_dyn());
            y = y_dyn
                .into_dimensionality::<Ix2>()
                .map_err(|e| DrainError::ConfigError(format!("control batch: {e}")))?;

            // Convergence is judged on the best-so-far sequence.
            let judged = Progress {
                history: best_history.clone(),
                ..progress.clone()
            };
            if judged.done(&self.config.termination, Some(g)) {
                break;
            }
        }

        let (encoded, objective) = best.ok_or_else(|| {
            DrainError::ConfigError("gradient search produced no candidate".to_string())
        })?;
        info!(
            iterations = progress.generations,
            evaluations = progress.evaluations,
            best = objective,
            "gradient search finished"
        );
        OptimizationResult::from_best(problem, encoded, objective, progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::Evaluator;
    use drain_math::autodiff::Var;
    use drain_ml::layers::Binding;
    use drain_ml::model::{ModelShape, SequenceModel};
    use drain_ml::objective::FloodObjective;
    use drain_types::config::{ActionSpaceConfig, HorizonConfig, Termination};
    use drain_types::state::NetworkState;
    use ndarray::Array3;

    /// Single full node whose outflow is the control; overflow is `max(0, r - c)`.
    struct PumpModel {
        shape: ModelShape,
    }

    impl PumpModel {
        fn new() -> Self {
            Self {
                shape: ModelShape {
                    n_node: 1,
                    n_in: 4,
                    n_out: 3,
                    n_act: 1,
                    edge_in: 0,
                    n_edge: 0,
                    seq_in: 2,
                    seq_out: 1,
                    hmax: vec![1.0],
                },
            }
        }
    }

    impl SequenceModel for PumpModel {
        fn shape(&self) -> &ModelShape {
            &self.shape
        }

        fn bind<'t>(&self, tape: &'t Tape, _trainable: bool) -> Binding<'t> {
            Binding::empty(tape)
        }

        fn step<'t>(&self, _bound: &Binding<'t>, x: Var<'t>, _edges: Option<Var<'t>>) -> Var<'t> {
            let t = x.shape()[1];
            let last = x.slice(1, t - 1, t);
            let full = last.slice(3, 0, 1).affine(0.0, 1.0);
            let q_ds = last.slice(3, 4, 5);
            Var::concat(&[full, full.scale(0.0), q_ds], 3)
        }
    }

    fn problem() -> ControlProblem {
        let horizon = HorizonConfig {
            interval: 1,
            setting_duration: 2,
            control_interval: 2,
            control_horizon: 4,
            eval_horizon: 4,
        };
        let space = ActionSpaceConfig::Continuous {
            lower: vec![0.0],
            upper: vec![2.0],
        };
        ControlProblem::new(&horizon, &space).unwrap()
    }

    fn context<'m>(model: &'m PumpModel, problem: &ControlProblem) -> SurrogateContext<'m> {
        SurrogateContext::acquire(
            model,
            problem,
            NetworkState::new(Array3::zeros((2, 1, 4))),
            Array2::from_elem((4, 1), 1.0),
            FloodObjective::new(),
        )
        .unwrap()
    }

    fn config(termination: Termination) -> GradientConfig {
        GradientConfig {
            pop_size: 6,
            learning_rate: 0.1,
            sampling: 0.4,
            termination,
            seed: Some(7),
        }
    }

    #[test]
    fn test_gradient_points_towards_more_outflow() {
        let model = PumpModel::new();
        let problem = problem();
        let ctx = context(&model, &problem);
        let opt = GradientOptimizer::new(&problem, config(Termination::NGen(1))).unwrap();
        let y = Array2::from_elem((2, 2), 0.5);
        let step = opt.evaluate(&ctx, &y).unwrap();
        // four steps of 0.5 overflow each
        assert!((step.objectives[0] - 2.0).abs() < 1e-12);
        assert!(step.grad.iter().all(|g| *g < 0.0));
    }

    #[test]
    fn test_no_gradient_through_active_bound() {
        let model = PumpModel::new();
        let problem = problem();
        let ctx = context(&model, &problem);
        let opt = GradientOptimizer::new(&problem, config(Termination::NGen(1))).unwrap();
        let y = Array2::from_shape_vec((1, 2), vec![-1.0, 0.5]).unwrap();
        let step = opt.evaluate(&ctx, &y).unwrap();
        assert_eq!(step.grad[[0, 0]], 0.0);
        assert!(step.grad[[0, 1]] < 0.0);
    }

    #[test]
    fn test_run_drives_overflow_to_zero_within_bounds() {
        let model = PumpModel::new();
        let problem = problem();
        let mut ctx = context(&model, &problem);
        let opt = GradientOptimizer::new(&problem, config(Termination::NGen(40))).unwrap();
        let res = opt.run(&mut ctx, Some(&[0.5, 0.5])).unwrap();
        assert!(res.objective < 1e-9, "objective {}", res.objective);
        assert!(res.encoded.iter().all(|v| (0.0..=2.0).contains(v)));
        assert_eq!(res.generations, 40);
        assert_eq!(res.history.len(), 40);
        assert_eq!(res.evaluations, 240);
        assert_eq!(ctx.evaluations(), 240);
        assert_eq!(res.schedule.dim(), (2, 1));
    }

    #[test]
    fn test_grad_termination_stops_on_flat_objective() {
        let model = PumpModel::new();
        let problem = problem();
        let mut ctx = context(&model, &problem);
        let cfg = GradientConfig {
            sampling: 0.0,
            ..config(Termination::Grad(1e-9))
        };
        let opt = GradientOptimizer::new(&problem, cfg).unwrap();
        // every candidate already drains the runoff, so the gradient vanishes
        let res = opt.run(&mut ctx, Some(&[1.5, 1.5])).unwrap();
        assert_eq!(res.generations, 1);
        assert_eq!(res.objective, 0.0);
    }

    #[test]
    fn test_discrete_space_rejected() {
        let horizon = HorizonConfig::default();
        let space = ActionSpaceConfig::Discrete {
            table: vec![drain_types::config::ActionEntry {
                index: vec![0],
                setting: vec![0.0],
            }],
        };
        let problem = ControlProblem::new(&horizon, &space).unwrap();
        assert!(GradientOptimizer::new(&problem, GradientConfig::default()).is_err());
    }
}
