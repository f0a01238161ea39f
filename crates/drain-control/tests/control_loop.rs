// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Control Loop Integration Tests
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! End-to-end receding-horizon runs against a deterministic three-node
//! line network, in simulator, surrogate and gradient modes.

use drain_control::env::{RunoffForecast, Simulator, SimulatorFactory};
use drain_control::mpc::ControlLoop;
use drain_control::results::EvalMode;
use drain_math::autodiff::{Tape, Var};
use drain_ml::layers::Binding;
use drain_ml::model::{ModelShape, SequenceModel};
use drain_types::config::{
    ActionEntry, ActionSpaceConfig, GradientConfig, HorizonConfig, MpcConfig, PopulationConfig,
    Termination,
};
use drain_types::error::{DrainError, DrainResult};
use ndarray::{Array1, Array2};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

const HMAX: f64 = 1.0;
const STORM: [f64; 10] = [0.6; 10];

/// Node 0 takes the rain and is drained by a pump running at `c · h0`;
/// node 1 releases half its head, node 2 all of it. Excess over `HMAX`
/// floods.
#[derive(Clone)]
struct LineNetwork {
    rain: Vec<f64>,
    t: usize,
    h: [f64; 3],
    q_us: [f64; 3],
    q_ds: [f64; 3],
    r: [f64; 3],
    flood: [f64; 3],
    forced: [Option<f64>; 3],
}

impl LineNetwork {
    fn new(rain: &[f64]) -> Self {
        Self {
            rain: rain.to_vec(),
            t: 0,
            h: [0.0; 3],
            q_us: [0.0; 3],
            q_ds: [0.0; 3],
            r: [0.0; 3],
            flood: [0.0; 3],
            forced: [None; 3],
        }
    }
}

impl Simulator for LineNetwork {
    fn reset(&mut self, _event: &str) -> DrainResult<Array2<f64>> {
        let rain = std::mem::take(&mut self.rain);
        *self = LineNetwork::new(&rain);
        Ok(self.state())
    }

    fn step(&mut self, setting: &[f64]) -> DrainResult<bool> {
        let c = match setting {
            [c] => c.clamp(0.0, 1.0),
            other => {
                return Err(DrainError::Simulation(format!(
                    "expected one setting, got {}",
                    other.len()
                )))
            }
        };
        let rain = self.rain.get(self.t).copied().unwrap_or(0.0);
        for (n, r) in self.r.iter_mut().enumerate() {
            let natural = if n == 0 { rain } else { 0.0 };
            *r = self.forced[n].take().unwrap_or(natural);
        }
        let outflow = [c * self.h[0], 0.5 * self.h[1], self.h[2]];
        let inflow = [0.0, outflow[0], outflow[1]];
        for n in 0..3 {
            let h = self.h[n] + inflow[n] + self.r[n] - outflow[n];
            self.flood[n] = (h - HMAX).max(0.0);
            self.h[n] = h.min(HMAX);
        }
        self.q_us = inflow;
        self.q_ds = outflow;
        self.t += 1;
        Ok(self.t >= self.rain.len())
    }

    fn state(&self) -> Array2<f64> {
        Array2::from_shape_fn((3, 4), |(n, c)| match c {
            0 => self.h[n],
            1 => self.q_us[n],
            2 => self.q_ds[n],
            _ => self.r[n],
        })
    }

    fn state_full(&self) -> Array2<f64> {
        Array2::from_shape_fn((2, 1), |(e, _)| self.q_ds[e])
    }

    fn flood(&self) -> Array1<f64> {
        Array1::from(self.flood.to_vec())
    }

    fn objective(&self) -> f64 {
        self.flood.iter().sum()
    }

    fn set_inflow(&mut self, node: usize, inflow: f64) -> DrainResult<()> {
        let slot = self
            .forced
            .get_mut(node)
            .ok_or_else(|| DrainError::Simulation(format!("no node {node}")))?;
        *slot = Some(inflow);
        Ok(())
    }

    fn snapshot(&self) -> DrainResult<Box<dyn SimulatorFactory>> {
        let frozen = self.clone();
        Ok(Box::new(move || -> DrainResult<Box<dyn Simulator>> {
            Ok(Box::new(frozen.clone()))
        }))
    }
}

/// Per-node storage with the pump as outflow: `h' = h + r - c · h`.
struct StorageSurrogate {
    shape: ModelShape,
}

impl StorageSurrogate {
    fn new() -> Self {
        Self {
            shape: ModelShape {
                n_node: 3,
                n_in: 4,
                n_out: 3,
                n_act: 1,
                edge_in: 0,
                n_edge: 0,
                seq_in: 2,
                seq_out: 1,
                hmax: vec![HMAX; 3],
            },
        }
    }
}

impl SequenceModel for StorageSurrogate {
    fn shape(&self) -> &ModelShape {
        &self.shape
    }

    fn bind<'t>(&self, tape: &'t Tape, _trainable: bool) -> Binding<'t> {
        Binding::empty(tape)
    }

    fn step<'t>(&self, _bound: &Binding<'t>, x: Var<'t>, _edges: Option<Var<'t>>) -> Var<'t> {
        let t = x.shape()[1];
        let last = x.slice(1, t - 1, t);
        let h = last.slice(3, 0, 1);
        let r = last.slice(3, 3, 4);
        let pumped = last.slice(3, 4, 5).mul(h);
        Var::concat(&[h.add(r).sub(pumped), r, pumped], 3)
    }
}

fn continuous() -> ActionSpaceConfig {
    ActionSpaceConfig::Continuous {
        lower: vec![0.0],
        upper: vec![1.0],
    }
}

fn config(space: ActionSpaceConfig) -> MpcConfig {
    let mut cfg = MpcConfig::new(space);
    cfg.horizon = HorizonConfig {
        interval: 1,
        setting_duration: 2,
        control_interval: 4,
        control_horizon: 4,
        eval_horizon: 4,
    };
    cfg.population = PopulationConfig {
        pop_size: 8,
        termination: Termination::NGen(4),
        seed: Some(11),
        ..Default::default()
    };
    cfg.processes = 2;
    cfg
}

/// Total flooding with the pump held at `c` for the whole event.
fn constant_flood(c: f64) -> f64 {
    let mut sim = LineNetwork::new(&STORM);
    sim.reset("storm").unwrap();
    let mut total = 0.0;
    loop {
        let done = sim.step(&[c]).unwrap();
        total += sim.objective();
        if done {
            return total;
        }
    }
}

fn temp_dir(tag: &str) -> PathBuf {
    let epoch_ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "drain_control_{tag}_{}_{}",
        std::process::id(),
        epoch_ns
    ))
}

// ── Simulator mode ───────────────────────────────────────────────────

#[test]
fn test_simulator_mode_reduces_flooding() {
    let control = ControlLoop::new(config(continuous())).unwrap();
    assert_eq!(control.mode(), EvalMode::Simulator);
    let mut sim = LineNetwork::new(&STORM);
    let record = control.run_event(&mut sim, "storm").unwrap();

    assert_eq!(record.states.len(), STORM.len() + 1);
    assert_eq!(record.settings.len(), STORM.len());
    assert_eq!(record.perfs.len(), STORM.len());
    assert_eq!(record.edge_states.len(), STORM.len());
    // searches at steps 0, 4 and 8
    assert_eq!(record.vals.len(), 3);
    assert_eq!(record.opt_times.len(), 3);
    for history in &record.vals {
        assert_eq!(history.len(), 5);
        assert!(history.windows(2).all(|w| w[1] <= w[0]));
    }
    assert!(record
        .settings
        .iter()
        .all(|s| s.len() == 1 && (0.0..=1.0).contains(&s[0])));

    let uncontrolled = constant_flood(0.0);
    assert!((uncontrolled - 5.0).abs() < 1e-9);
    assert!(
        record.total_flood() < uncontrolled,
        "controlled {} vs uncontrolled {uncontrolled}",
        record.total_flood()
    );
}

#[test]
fn test_discrete_settings_come_from_table() {
    let table = [0.0, 0.5, 1.0]
        .iter()
        .enumerate()
        .map(|(i, &s)| ActionEntry {
            index: vec![i as i64],
            setting: vec![s],
        })
        .collect();
    let mut cfg = config(ActionSpaceConfig::Discrete { table });
    cfg.population.termination = Termination::NGen(2);
    let control = ControlLoop::new(cfg).unwrap();
    let record = control
        .run_event(&mut LineNetwork::new(&STORM), "storm")
        .unwrap();
    assert!(record
        .settings
        .iter()
        .all(|s| [0.0, 0.5, 1.0].contains(&s[0])));
}

#[test]
fn test_forced_inflow_from_forecast() {
    let mut cfg = config(continuous());
    cfg.no_runoff = true;
    cfg.population.termination = Termination::NGen(1);
    let control = ControlLoop::new(cfg).unwrap();
    // without a forecast the candidate inflow cannot be forced
    let err = control.run_event(&mut LineNetwork::new(&STORM), "storm");
    assert!(matches!(err, Err(DrainError::ConfigError(_))));

    let mut sim = LineNetwork::new(&STORM);
    let control = control.record_forecast(&mut sim, "storm").unwrap();
    let record = control.run_event(&mut sim, "storm").unwrap();
    assert_eq!(record.settings.len(), STORM.len());
}

#[test]
fn test_run_and_save_writes_artifacts() {
    let dir = temp_dir("save");
    let mut cfg = config(continuous());
    cfg.population.termination = Termination::NGen(1);
    cfg.result_dir = dir.clone();
    let control = ControlLoop::new(cfg).unwrap();
    let (record, paths) = control
        .run_event_and_save(&mut LineNetwork::new(&STORM), "storm")
        .unwrap();
    assert_eq!(record.len(), STORM.len() + 1);
    assert_eq!(paths.len(), 6);
    for path in &paths {
        assert!(path.is_file(), "{} missing", path.display());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("storm_simu_"), "{name}");
    }
    let _ = std::fs::remove_dir_all(&dir);
}

// ── Surrogate mode ───────────────────────────────────────────────────

fn surrogate_config() -> MpcConfig {
    let mut cfg = config(continuous());
    cfg.surrogate = true;
    cfg.population.pop_size = 6;
    cfg.population.termination = Termination::NGen(3);
    cfg
}

#[test]
fn test_surrogate_mode_runs_population_search() {
    let model = StorageSurrogate::new();
    let mut sim = LineNetwork::new(&STORM);
    let control = ControlLoop::new(surrogate_config())
        .unwrap()
        .with_surrogate(&model)
        .unwrap()
        .record_forecast(&mut sim, "storm")
        .unwrap();
    assert_eq!(control.mode(), EvalMode::Surrogate);
    let record = control.run_event(&mut sim, "storm").unwrap();
    assert_eq!(record.settings.len(), STORM.len());
    assert_eq!(record.vals.len(), 3);
    assert!(record
        .settings
        .iter()
        .all(|s| (0.0..=1.0).contains(&s[0])));
}

#[test]
fn test_gradient_mode_keeps_settings_in_bounds() {
    let model = StorageSurrogate::new();
    let mut cfg = surrogate_config();
    cfg.use_gradient = true;
    cfg.use_current = true;
    cfg.baseline = Some(vec![0.5]);
    cfg.gradient = GradientConfig {
        pop_size: 4,
        learning_rate: 0.2,
        termination: Termination::NGen(5),
        seed: Some(3),
        ..Default::default()
    };
    let mut sim = LineNetwork::new(&STORM);
    let control = ControlLoop::new(cfg)
        .unwrap()
        .with_surrogate(&model)
        .unwrap()
        .record_forecast(&mut sim, "storm")
        .unwrap();
    let record = control.run_event(&mut sim, "storm").unwrap();
    assert_eq!(record.vals.len(), 3);
    assert!(record.vals.iter().all(|h| h.len() == 5));
    assert!(record
        .settings
        .iter()
        .all(|s| (0.0..=1.0).contains(&s[0])));
}

#[test]
fn test_surrogate_mode_needs_model_and_forecast() {
    let control = ControlLoop::new(surrogate_config()).unwrap();
    let err = control.run_event(&mut LineNetwork::new(&STORM), "storm");
    assert!(matches!(err, Err(DrainError::ConfigError(_))));

    let model = StorageSurrogate::new();
    let short = RunoffForecast::from_series(Array2::zeros((10, 3)), 2).unwrap();
    let err = ControlLoop::new(surrogate_config())
        .unwrap()
        .with_surrogate(&model)
        .unwrap()
        .with_forecast(short);
    assert!(matches!(err, Err(DrainError::ConfigError(_))));
}

#[test]
fn test_gradient_requires_surrogate() {
    let mut cfg = config(continuous());
    cfg.use_gradient = true;
    assert!(matches!(
        ControlLoop::new(cfg),
        Err(DrainError::ConfigError(_))
    ));
}
