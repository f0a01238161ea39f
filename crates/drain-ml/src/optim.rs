// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Gradient Optimizers
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! First-order update rules keyed by parameter name.

use drain_types::error::{DrainError, DrainResult};
use ndarray::ArrayD;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

impl OptimizerKind {
    pub fn parse(name: &str) -> DrainResult<Self> {
        match name {
            "Adam" | "adam" => Ok(Self::Adam),
            "SGD" | "Sgd" | "sgd" => Ok(Self::Sgd),
            other => Err(DrainError::ConfigError(format!(
                "Unknown optimizer '{other}'"
            ))),
        }
    }

    pub fn build(self, learning_rate: f64) -> Box<dyn Optimizer> {
        match self {
            Self::Adam => Box::new(Adam::new(learning_rate)),
            Self::Sgd => Box::new(Sgd::new(learning_rate)),
        }
    }
}

pub trait Optimizer: Send {
    /// In-place descent step for the parameter stored under `key`.
    fn update(&mut self, key: &str, param: &mut ArrayD<f64>, grad: &ArrayD<f64>);

    fn learning_rate(&self) -> f64;
}

#[derive(Debug, Clone)]
struct Moments {
    m: ArrayD<f64>,
    v: ArrayD<f64>,
    t: i32,
}

/// Adam with bias-corrected moments.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    state: HashMap<String, Moments>,
}

impl Adam {
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-7,
            state: HashMap::new(),
        }
    }
}

impl Optimizer for Adam {
    fn update(&mut self, key: &str, param: &mut ArrayD<f64>, grad: &ArrayD<f64>) {
        if param.raw_dim() != grad.raw_dim() {
            return;
        }
        let entry = self
            .state
            .entry(key.to_string())
            .or_insert_with(|| Moments {
                m: ArrayD::zeros(grad.raw_dim()),
                v: ArrayD::zeros(grad.raw_dim()),
                t: 0,
            });
        if entry.m.raw_dim() != grad.raw_dim() {
            entry.m = ArrayD::zeros(grad.raw_dim());
            entry.v = ArrayD::zeros(grad.raw_dim());
            entry.t = 0;
        }
        entry.t += 1;
        let (b1, b2) = (self.beta1, self.beta2);
        entry.m.zip_mut_with(grad, |m, &g| *m = b1 * *m + (1.0 - b1) * g);
        entry.v.zip_mut_with(grad, |v, &g| *v = b2 * *v + (1.0 - b2) * g * g);
        let c1 = 1.0 - b1.powi(entry.t);
        let c2 = 1.0 - b2.powi(entry.t);
        let (lr, eps) = (self.lr, self.eps);
        ndarray::Zip::from(param)
            .and(&entry.m)
            .and(&entry.v)
            .for_each(|p, &m, &v| *p -= lr * (m / c1) / ((v / c2).sqrt() + eps));
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }
}

#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f64,
}

impl Sgd {
    pub fn new(lr: f64) -> Self {
        Self { lr }
    }
}

impl Optimizer for Sgd {
    fn update(&mut self, _key: &str, param: &mut ArrayD<f64>, grad: &ArrayD<f64>) {
        if param.raw_dim() != grad.raw_dim() {
            return;
        }
        let lr = self.lr;
        param.zip_mut_with(grad, |p, &g| *p -= lr * g);
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }
}
