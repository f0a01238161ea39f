// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Population Optimizer
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Elitist genetic search over decision vectors.
//!
//! Binary tournament, simulated binary crossover and polynomial mutation
//! produce offspring; parents and offspring compete for the next
//! generation, so the best objective never worsens.

use crate::evaluate::Evaluator;
use crate::operators::{binary_tournament, polynomial_mutation, sbx};
use crate::problem::ControlProblem;
use crate::results::OptimizationResult;
use drain_types::config::{PopulationConfig, Termination};
use drain_types::error::{ensure_shape, DrainError, DrainResult};
use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info};

/// Mating attempts per requested child before a generation gives up
/// refilling offspring lost to duplicate elimination.
const MAX_MATING_ATTEMPTS: usize = 100;

/// Generation counters checked against a [`Termination`].
#[derive(Debug, Clone)]
pub(crate) struct Progress {
    pub generations: usize,
    pub evaluations: usize,
    pub started: Instant,
    pub history: Vec<f64>,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            generations: 0,
            evaluations: 0,
            started: Instant::now(),
            history: Vec::new(),
        }
    }

    /// `grad` is the latest mean absolute gradient, if any.
    pub fn done(&self, termination: &Termination, grad: Option<f64>) -> bool {
        match *termination {
            Termination::NGen(n) => self.generations >= n,
            Termination::NEval(n) => self.evaluations >= n,
            Termination::Time(secs) => self.started.elapsed().as_secs_f64() >= secs,
            Termination::Convergence { tol, period } => {
                let n = self.history.len();
                n > period && self.history[n - 1 - period] - self.history[n - 1] < tol
            }
            Termination::Grad(threshold) => grad.is_some_and(|g| g <= threshold),
        }
    }
}

fn key(x: &[f64]) -> Vec<u64> {
    // +0.0 folds -0.0 onto 0.0
    x.iter().map(|v| (v + 0.0).to_bits()).collect()
}

pub struct PopulationOptimizer<'p> {
    problem: &'p ControlProblem,
    config: PopulationConfig,
}

impl<'p> PopulationOptimizer<'p> {
    pub fn new(problem: &'p ControlProblem, config: PopulationConfig) -> DrainResult<Self> {
        config.validate()?;
        Ok(Self { problem, config })
    }

    pub fn config(&self) -> &PopulationConfig {
        &self.config
    }

    fn offspring(
        &self,
        pop: ArrayView2<'_, f64>,
        objectives: &[f64],
        seen: &mut HashSet<Vec<u64>>,
        rng: &mut StdRng,
    ) -> Vec<Vec<f64>> {
        let (lower, upper) = (self.problem.lower(), self.problem.upper());
        let target = self.config.pop_size;
        let mut children = Vec::with_capacity(target);
        let mut attempts = 0;
        while children.len() < target && attempts < MAX_MATING_ATTEMPTS * target {
            attempts += 1;
            let a = binary_tournament(objectives, rng);
            let b = binary_tournament(objectives, rng);
            let (c1, c2) = sbx(
                &pop.row(a).to_vec(),
                &pop.row(b).to_vec(),
                lower,
                upper,
                self.config.crossover,
                rng,
            );
            for mut child in [c1, c2] {
                polynomial_mutation(&mut child, lower, upper, self.config.mutation, rng);
                self.problem.repair(&mut child);
                if children.len() < target
                    && (!self.config.eliminate_duplicates || seen.insert(key(&child)))
                {
                    children.push(child);
                }
            }
        }
        children
    }

    /// Minimise the evaluator's objective, optionally seeded with `warm`.
    pub fn run(
        &self,
        evaluator: &mut dyn Evaluator,
        warm: Option<&[f64]>,
    ) -> DrainResult<OptimizationResult> {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let problem = self.problem;
        let n_var = problem.n_var();
        let initial = problem.initial_population(
            self.config.pop_size,
            warm,
            self.config.sampling,
            &mut rng,
        )?;

        let mut seen = HashSet::new();
        let mut members: Vec<Vec<f64>> = Vec::with_capacity(self.config.pop_size);
        for row in initial.outer_iter() {
            let x = row.to_vec();
            if !self.config.eliminate_duplicates || seen.insert(key(&x)) {
                members.push(x);
            }
        }

        let mut progress = Progress::new();
        let mut pop = rows_to_array(&members, n_var)?;
        let mut objectives = evaluator
            .evaluate(problem.expand_batch(pop.view())?.view())?
            .to_vec();
        ensure_shape("population objectives", &[members.len()], &[objectives.len()])?;
        progress.evaluations += members.len();
        sort_by_objective(&mut members, &mut objectives);
        pop = rows_to_array(&members, n_var)?;
        progress.history.push(objectives[0]);
        debug!(
            generation = 0,
            evaluations = progress.evaluations,
            best = objectives[0],
            "population initialised"
        );

        while !progress.done(&self.config.termination, None) {
            let children = self.offspring(pop.view(), &objectives, &mut seen, &mut rng);
            if children.is_empty() {
                // every reachable candidate has been scored already
                debug!(
                    generation = progress.generations,
                    distinct = seen.len(),
                    "no new offspring, search space exhausted"
                );
                break;
            }
            let batch = rows_to_array(&children, n_var)?;
            let scores = evaluator.evaluate(problem.expand_batch(batch.view())?.view())?;
            ensure_shape("offspring objectives", &[children.len()], &[scores.len()])?;
            progress.evaluations += children.len();
            members.extend(children);
            objectives.extend(scores.iter().copied());
            sort_by_objective(&mut members, &mut objectives);
            members.truncate(self.config.pop_size);
            objectives.truncate(self.config.pop_size);
            pop = rows_to_array(&members, n_var)?;
            progress.generations += 1;
            progress.history.push(objectives[0]);
            let mean = objectives.iter().sum::<f64>() / objectives.len() as f64;
            debug!(
                generation = progress.generations,
                evaluations = progress.evaluations,
                best = objectives[0],
                mean,
                "generation complete"
            );
        }

        info!(
            generations = progress.generations,
            evaluations = progress.evaluations,
            best = objectives[0],
            "population search finished"
        );
        OptimizationResult::from_best(problem, members[0].clone(), objectives[0], progress)
    }
}

fn rows_to_array(rows: &[Vec<f64>], n_var: usize) -> DrainResult<Array2<f64>> {
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), n_var), flat)
        .map_err(|e| DrainError::ConfigError(format!("population shape: {e}")))
}

/// Stable ascending sort of members by objective.
fn sort_by_objective(members: &mut Vec<Vec<f64>>, objectives: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..members.len()).collect();
    order.sort_by(|&a, &b| objectives[a].total_cmp(&objectives[b]));
    *members = order.iter().map(|&i| members[i].clone()).collect();
    *objectives = order.iter().map(|&i| objectives[i]).collect();
}

/// Best member of a scored population `(p, n_var)`.
pub fn best_of(pop: ArrayView2<'_, f64>, objectives: &[f64]) -> Option<(Vec<f64>, f64)> {
    objectives
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, &f)| (pop.index_axis(Axis(0), i).to_vec(), f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use drain_types::config::{ActionEntry, ActionSpaceConfig, HorizonConfig};
    use ndarray::{Array1, ArrayView3};

    /// Squared distance of the realized schedule from a target setting.
    struct Bowl {
        target: f64,
        evaluations: usize,
    }

    impl Evaluator for Bowl {
        fn evaluate(&mut self, schedules: ArrayView3<'_, f64>) -> DrainResult<Array1<f64>> {
            self.evaluations += schedules.dim().0;
            Ok(schedules
                .outer_iter()
                .map(|s| s.iter().map(|v| (v - self.target).powi(2)).sum())
                .collect())
        }

        fn evaluations(&self) -> usize {
            self.evaluations
        }
    }

    fn horizon() -> HorizonConfig {
        HorizonConfig {
            interval: 1,
            setting_duration: 2,
            control_interval: 2,
            control_horizon: 6,
            eval_horizon: 8,
        }
    }

    fn problem() -> ControlProblem {
        ControlProblem::new(
            &horizon(),
            &ActionSpaceConfig::Continuous {
                lower: vec![0.0, 0.0],
                upper: vec![1.0, 1.0],
            },
        )
        .unwrap()
    }

    fn config(termination: Termination) -> PopulationConfig {
        PopulationConfig {
            pop_size: 16,
            termination,
            seed: Some(11),
            ..Default::default()
        }
    }

    #[test]
    fn test_history_non_increasing_and_improves() {
        let p = problem();
        let opt = PopulationOptimizer::new(&p, config(Termination::NGen(30))).unwrap();
        let mut bowl = Bowl {
            target: 0.3,
            evaluations: 0,
        };
        let res = opt.run(&mut bowl, None).unwrap();
        assert_eq!(res.history.len(), 31);
        assert_eq!(res.generations, 30);
        for w in res.history.windows(2) {
            assert!(w[1] <= w[0], "{:?}", res.history);
        }
        assert!(res.history[30] < res.history[0]);
        assert_eq!(res.objective, res.history[30]);
        assert_eq!(res.evaluations, bowl.evaluations);
        assert_eq!(res.schedule.dim(), (3, 2));
    }

    #[test]
    fn test_seeded_runs_reproduce() {
        let p = problem();
        let opt = PopulationOptimizer::new(&p, config(Termination::NGen(5))).unwrap();
        let run = || {
            let mut bowl = Bowl {
                target: 0.7,
                evaluations: 0,
            };
            opt.run(&mut bowl, None).unwrap()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.encoded, b.encoded);
        assert_eq!(a.history, b.history);
    }

    #[test]
    fn test_eval_budget_stops_search() {
        let p = problem();
        let opt = PopulationOptimizer::new(&p, config(Termination::NEval(40))).unwrap();
        let mut bowl = Bowl {
            target: 0.5,
            evaluations: 0,
        };
        let res = opt.run(&mut bowl, None).unwrap();
        assert!(res.evaluations >= 40);
        assert!(res.evaluations < 40 + 16);
    }

    #[test]
    fn test_warm_start_is_never_lost() {
        let p = problem();
        let opt = PopulationOptimizer::new(&p, config(Termination::NGen(3))).unwrap();
        let mut bowl = Bowl {
            target: 0.25,
            evaluations: 0,
        };
        let warm = p.tile(&[0.25, 0.25]).unwrap();
        let res = opt.run(&mut bowl, Some(&warm)).unwrap();
        assert_eq!(res.objective, 0.0);
        assert_eq!(res.history[0], 0.0);
    }

    #[test]
    fn test_discrete_result_is_realized() {
        let table = (0..3)
            .map(|i| ActionEntry {
                index: vec![i],
                setting: vec![0.5 * i as f64],
            })
            .collect();
        let p = ControlProblem::new(&horizon(), &ActionSpaceConfig::Discrete { table }).unwrap();
        let opt = PopulationOptimizer::new(&p, config(Termination::NGen(10))).unwrap();
        let mut bowl = Bowl {
            target: 1.0,
            evaluations: 0,
        };
        let res = opt.run(&mut bowl, None).unwrap();
        assert!(res.encoded.iter().all(|v| v.fract() == 0.0));
        assert_eq!(res.schedule.column(0).to_vec(), vec![1.0, 1.0, 1.0]);
        assert_eq!(res.objective, 0.0);
    }

    #[test]
    fn test_exhausted_discrete_space_ends_search() {
        let single = HorizonConfig {
            interval: 1,
            setting_duration: 1,
            control_interval: 1,
            control_horizon: 1,
            eval_horizon: 2,
        };
        let table = (0..3)
            .map(|i| ActionEntry {
                index: vec![i],
                setting: vec![0.5 * i as f64],
            })
            .collect();
        let p = ControlProblem::new(&single, &ActionSpaceConfig::Discrete { table }).unwrap();
        let opt = PopulationOptimizer::new(
            &p,
            PopulationConfig {
                pop_size: 4,
                ..config(Termination::NEval(20))
            },
        )
        .unwrap();
        let mut bowl = Bowl {
            target: 1.0,
            evaluations: 0,
        };
        let res = opt.run(&mut bowl, None).unwrap();
        // three distinct candidates exist, none is scored twice
        assert!(res.evaluations <= 3);
        assert_eq!(res.evaluations, bowl.evaluations);
        assert_eq!(res.history.len(), res.generations + 1);
        assert!([0.0, 0.5, 2.0].contains(&res.objective));
        assert_eq!(res.objective, *res.history.last().unwrap());
        assert!(res.encoded[0] >= 0.0 && res.encoded[0] <= 2.0);
    }

    #[test]
    fn test_gradient_threshold_rejected() {
        let p = problem();
        assert!(PopulationOptimizer::new(&p, config(Termination::Grad(0.1))).is_err());
    }

    #[test]
    fn test_convergence_termination() {
        let mut progress = Progress::new();
        let rule = Termination::Convergence {
            tol: 1e-3,
            period: 2,
        };
        progress.history = vec![5.0, 4.0, 3.0];
        assert!(!progress.done(&rule, None));
        progress.history.extend([3.0, 3.0]);
        assert!(progress.done(&rule, None));
        assert!(Progress::new().done(&Termination::Grad(0.5), Some(0.1)));
        assert!(!Progress::new().done(&Termination::Grad(0.5), None));
    }

    #[test]
    fn test_best_of_picks_minimum() {
        let pop = Array2::from_shape_vec((3, 1), vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(best_of(pop.view(), &[0.5, 0.1, 0.3]), Some((vec![2.0], 0.1)));
    }
}
