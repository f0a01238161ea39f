// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Receding-Horizon Control Loop
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Rolling-horizon controller.
//!
//! Every `control_interval` the loop snapshots the simulator, searches a
//! new schedule and then plays it back one decision per
//! `setting_duration` until the next search is due. Each search acquires
//! its own evaluation context, which is released before the simulator
//! advances again.

use crate::env::{record_runoff, RunoffForecast, Simulator};
use crate::evaluate::{SimulatorEvaluator, SurrogateContext};
use crate::gradient::GradientOptimizer;
use crate::population::PopulationOptimizer;
use crate::problem::ControlProblem;
use crate::results::{EvalMode, EventRecord, OptimizationResult};
use drain_ml::model::SequenceModel;
use drain_ml::objective::FloodObjective;
use drain_types::config::MpcConfig;
use drain_types::error::{DrainError, DrainResult};
use drain_types::state::NetworkState;
use ndarray::{s, Array2, Array3, Axis};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

pub struct ControlLoop<'m> {
    config: MpcConfig,
    problem: ControlProblem,
    surrogate: Option<&'m dyn SequenceModel>,
    objective: FloodObjective,
    forecast: Option<RunoffForecast>,
}

/// Last `len` observations, oldest first.
struct Window {
    rows: VecDeque<Array2<f64>>,
    len: usize,
}

impl Window {
    fn filled(first: Array2<f64>, len: usize) -> Self {
        Self {
            rows: std::iter::repeat(first).take(len).collect(),
            len,
        }
    }

    fn push(&mut self, row: Array2<f64>) {
        if self.rows.len() == self.len {
            self.rows.pop_front();
        }
        self.rows.push_back(row);
    }

    fn stacked(&self) -> DrainResult<Array3<f64>> {
        let views: Vec<_> = self.rows.iter().map(|r| r.view()).collect();
        ndarray::stack(Axis(0), &views)
            .map_err(|e| DrainError::Simulation(format!("state window: {e}")))
    }
}

impl<'m> ControlLoop<'m> {
    pub fn new(config: MpcConfig) -> DrainResult<Self> {
        config.validate()?;
        let problem = ControlProblem::from_config(&config)?;
        Ok(Self {
            config,
            problem,
            surrogate: None,
            objective: FloodObjective::new(),
            forecast: None,
        })
    }

    /// Model scoring candidates when `surrogate` is configured.
    pub fn with_surrogate(mut self, model: &'m dyn SequenceModel) -> DrainResult<Self> {
        if model.shape().n_act != self.problem.n_act() {
            return Err(DrainError::ConfigError(format!(
                "surrogate expects {} control channels, action space realizes {}",
                model.shape().n_act,
                self.problem.n_act()
            )));
        }
        self.surrogate = Some(model);
        Ok(self)
    }

    pub fn with_objective(mut self, objective: FloodObjective) -> Self {
        self.objective = objective;
        self
    }

    /// Runoff forecast; its horizon must cover the evaluation horizon.
    pub fn with_forecast(mut self, forecast: RunoffForecast) -> DrainResult<Self> {
        if forecast.horizon() < self.problem.eval_steps() {
            return Err(DrainError::ConfigError(format!(
                "runoff forecast covers {} steps, evaluation needs {}",
                forecast.horizon(),
                self.problem.eval_steps()
            )));
        }
        self.forecast = Some(forecast);
        Ok(self)
    }

    /// Record the event's runoff under the baseline setting and use it as
    /// forecast.
    pub fn record_forecast(self, sim: &mut dyn Simulator, event: &str) -> DrainResult<Self> {
        let setting = self.baseline_setting()?;
        let series = record_runoff(sim, event, &setting)?;
        let horizon = self.problem.eval_steps();
        self.with_forecast(RunoffForecast::from_series(series, horizon)?)
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    pub fn problem(&self) -> &ControlProblem {
        &self.problem
    }

    pub fn mode(&self) -> EvalMode {
        if self.config.surrogate {
            EvalMode::Surrogate
        } else {
            EvalMode::Simulator
        }
    }

    /// Realized setting of the configured baseline, else of the lower bound.
    fn baseline_setting(&self) -> DrainResult<Vec<f64>> {
        match &self.config.baseline {
            Some(b) => self.problem.realize(b),
            None => self.problem.realize(&self.problem.lower()[..self.problem.n_dim()]),
        }
    }

    fn warm_start(&self, previous: Option<&OptimizationResult>) -> DrainResult<Option<Vec<f64>>> {
        if !self.config.use_current {
            return Ok(None);
        }
        match (previous, &self.config.baseline) {
            (Some(prev), _) => Ok(Some(prev.encoded.clone())),
            (None, Some(b)) => self.problem.tile(b).map(Some),
            (None, None) => Ok(None),
        }
    }

    fn runoff_window(&self, step: usize) -> DrainResult<Array2<f64>> {
        let forecast = self.forecast.as_ref().ok_or_else(|| {
            DrainError::ConfigError("no runoff forecast attached to the control loop".to_string())
        })?;
        Ok(forecast
            .window(step)
            .slice(s![..self.problem.eval_steps(), ..])
            .to_owned())
    }

    /// One search from the simulator's current condition.
    fn optimize(
        &self,
        sim: &dyn Simulator,
        step: usize,
        nodes: &Window,
        edges: &Window,
        warm: Option<&[f64]>,
    ) -> DrainResult<OptimizationResult> {
        if self.config.surrogate {
            let model = self.surrogate.ok_or_else(|| {
                DrainError::ConfigError("surrogate mode without a surrogate model".to_string())
            })?;
            let mut state = NetworkState::new(nodes.stacked()?);
            if model.shape().edge_in > 0 {
                state = state.with_edges(edges.stacked()?)?;
            }
            let mut ctx = SurrogateContext::acquire(
                model,
                &self.problem,
                state,
                self.runoff_window(step)?,
                self.objective.clone(),
            )?;
            if self.config.use_gradient {
                GradientOptimizer::new(&self.problem, self.config.gradient.clone())?
                    .run(&mut ctx, warm)
            } else {
                PopulationOptimizer::new(&self.problem, self.config.population.clone())?
                    .run(&mut ctx, warm)
            }
        } else {
            let factory = sim.snapshot()?;
            let mut evaluator = SimulatorEvaluator::new(
                factory.as_ref(),
                self.config.processes,
                self.config.failure_penalty,
            )?;
            if self.config.no_runoff {
                evaluator = evaluator.with_inflow(self.runoff_window(step)?);
            }
            PopulationOptimizer::new(&self.problem, self.config.population.clone())?
                .run(&mut evaluator, warm)
        }
    }

    /// Drive `event` to completion under receding-horizon control.
    pub fn run_event(&self, sim: &mut dyn Simulator, event: &str) -> DrainResult<EventRecord> {
        let horizon = self.config.horizon;
        let seq_in = self.surrogate.map_or(1, |m| m.shape().seq_in);

        let initial = sim.reset(event)?;
        let mut record = EventRecord::default();
        let mut nodes = Window::filled(initial.clone(), seq_in);
        let mut edges = Window::filled(sim.state_full(), seq_in);
        record.states.push(initial);

        let mut current: Option<OptimizationResult> = None;
        let mut last_search = 0u64;
        let mut j = 0usize;
        let mut step = 0usize;
        loop {
            let elapsed = step as u64 * horizon.interval;
            if elapsed % horizon.control_interval == 0 {
                let warm = self.warm_start(current.as_ref())?;
                let started = Instant::now();
                let result = self.optimize(&*sim, step, &nodes, &edges, warm.as_deref())?;
                let secs = started.elapsed().as_secs_f64();
                info!(
                    event,
                    step,
                    objective = result.objective,
                    generations = result.generations,
                    seconds = secs,
                    "control interval optimised"
                );
                record.vals.push(result.history.clone());
                record.opt_times.push(secs);
                current = Some(result);
                last_search = elapsed;
                j = 0;
            } else if (elapsed - last_search) % horizon.setting_duration == 0 {
                j += 1;
            }

            let setting = match &current {
                Some(result) => result.setting(j),
                None => self.baseline_setting()?,
            };
            let done = sim.step(&setting)?;
            let state = sim.state();
            debug!(event, step, decision = j, "simulator advanced");

            record.states.push(state.clone());
            record.perfs.push(sim.flood());
            record.objects.push(sim.objective());
            record.settings.push(setting);
            let edge_state = sim.state_full();
            record.edge_states.push(edge_state.clone());
            nodes.push(state);
            edges.push(edge_state);

            step += 1;
            if done {
                break;
            }
        }
        info!(
            event,
            steps = step,
            flood = record.total_flood(),
            mean_opt_seconds = record.mean_opt_time(),
            "event finished"
        );
        Ok(record)
    }

    /// [`Self::run_event`] followed by [`EventRecord::save`] into `result_dir`.
    pub fn run_event_and_save(
        &self,
        sim: &mut dyn Simulator,
        event: &str,
    ) -> DrainResult<(EventRecord, Vec<PathBuf>)> {
        let record = self.run_event(sim, event)?;
        let paths = record.save(&self.config.result_dir, event, self.mode())?;
        Ok((record, paths))
    }
}
