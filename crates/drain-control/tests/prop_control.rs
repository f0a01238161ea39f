// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Property-Based Tests (proptest) for drain-control
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for drain-control using proptest.
//!
//! Covers: schedule expansion length and padding, agreement of the
//! expansion matrix with array expansion, discrete realization and
//! variation operators staying inside bounds.

use drain_control::operators::{polynomial_mutation, sbx};
use drain_control::problem::{pad_to_horizon, ControlProblem};
use drain_types::config::{ActionEntry, ActionSpaceConfig, HorizonConfig, OperatorRate};
use ndarray::Array2;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn horizon(repeat: u64, n_step: u64, eval_steps: u64) -> HorizonConfig {
    HorizonConfig {
        interval: 1,
        setting_duration: repeat,
        control_interval: repeat,
        control_horizon: repeat * n_step,
        eval_horizon: eval_steps,
    }
}

fn unit_box(n_act: usize) -> ActionSpaceConfig {
    ActionSpaceConfig::Continuous {
        lower: vec![0.0; n_act],
        upper: vec![1.0; n_act],
    }
}

// ── Schedule expansion ───────────────────────────────────────────────

proptest! {
    /// Expansion always yields exactly eval_steps rows, repeating each
    /// decision and then the last one.
    #[test]
    fn expansion_reaches_eval_horizon(
        repeat in 1u64..4,
        n_step in 1u64..5,
        eval_steps in 1u64..20,
        n_act in 1usize..3,
        vals in proptest::collection::vec(0.0f64..1.0, 8),
    ) {
        let problem = ControlProblem::new(&horizon(repeat, n_step, eval_steps), &unit_box(n_act)).unwrap();
        let schedule = Array2::from_shape_fn((n_step as usize, n_act), |(i, j)| vals[(i * n_act + j) % vals.len()]);
        let full = problem.expand(schedule.view());
        prop_assert_eq!(full.dim(), (eval_steps as usize, n_act));
        for t in 0..eval_steps as usize {
            let step = (t / repeat as usize).min(n_step as usize - 1);
            prop_assert_eq!(full.row(t), schedule.row(step));
        }
    }

    /// The 0/1 expansion matrix reproduces array expansion exactly.
    #[test]
    fn expansion_matrix_matches_expand(
        repeat in 1u64..4,
        n_step in 1u64..5,
        eval_steps in 1u64..20,
        vals in proptest::collection::vec(-2.0f64..2.0, 4),
    ) {
        let problem = ControlProblem::new(&horizon(repeat, n_step, eval_steps), &unit_box(1)).unwrap();
        let schedule = Array2::from_shape_fn((n_step as usize, 1), |(i, _)| vals[i % vals.len()]);
        let e = problem.expansion_matrix();
        prop_assert_eq!(e.dot(&schedule), problem.expand(schedule.view()));
        for row in e.rows() {
            prop_assert!((row.sum() - 1.0).abs() < 1e-12);
        }
    }

    /// Padding is a no-op at the target length and repeats the last row otherwise.
    #[test]
    fn padding_identity_and_tail(
        n in 1usize..8,
        extra in 0usize..6,
        vals in proptest::collection::vec(-5.0f64..5.0, 8),
    ) {
        let seq = Array2::from_shape_fn((n, 2), |(i, j)| vals[(2 * i + j) % vals.len()]);
        prop_assert_eq!(pad_to_horizon(seq.view(), n), seq.clone());
        let padded = pad_to_horizon(seq.view(), n + extra);
        prop_assert_eq!(padded.nrows(), n + extra);
        for t in n..n + extra {
            prop_assert_eq!(padded.row(t), seq.row(n - 1));
        }
    }
}

// ── Discrete realization ─────────────────────────────────────────────

proptest! {
    /// Any encoded step, on or off the table, realizes to a table setting.
    #[test]
    fn discrete_steps_realize_to_table(
        keys in proptest::collection::btree_set(0i64..6, 1..6),
        probe in -3.0f64..9.0,
    ) {
        let table: Vec<ActionEntry> = keys
            .iter()
            .map(|&k| ActionEntry { index: vec![k], setting: vec![10.0 * k as f64] })
            .collect();
        let settings: Vec<f64> = table.iter().map(|e| e.setting[0]).collect();
        let problem = ControlProblem::new(
            &horizon(1, 2, 2),
            &ActionSpaceConfig::Discrete { table },
        ).unwrap();
        let realized = problem.realize(&[probe]).unwrap();
        prop_assert_eq!(realized.len(), 1);
        prop_assert!(settings.contains(&realized[0]));
        let rounded = probe.round() as i64;
        if keys.contains(&rounded) {
            prop_assert_eq!(realized[0], 10.0 * rounded as f64);
        }
    }
}

// ── Variation operators ──────────────────────────────────────────────

proptest! {
    /// Crossover and mutation never leave the box.
    #[test]
    fn operators_stay_in_bounds(
        seed in any::<u64>(),
        p1 in proptest::collection::vec(-1.0f64..1.0, 4),
        p2 in proptest::collection::vec(-1.0f64..1.0, 4),
        eta in 1.0f64..30.0,
    ) {
        let lower = vec![-1.0; 4];
        let upper = vec![1.0; 4];
        let rate = OperatorRate { prob: 1.0, eta };
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut c1, c2) = sbx(&p1, &p2, &lower, &upper, rate, &mut rng);
        polynomial_mutation(&mut c1, &lower, &upper, rate, &mut rng);
        for v in c1.iter().chain(&c2) {
            prop_assert!((-1.0..=1.0).contains(v), "child value {v} out of bounds");
        }
    }
}
