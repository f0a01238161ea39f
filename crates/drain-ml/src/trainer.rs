// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Surrogate Trainer
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Supervised fitting of a [`GraphSequenceModel`] on sampled event batches.
//!
//! Each step rolls the model over the batch horizon without clipping,
//! compares the state channels against the observed trajectory and,
//! with a non-zero `balance_weight`, adds the mass-balance residual.
//! No early stopping: the caller decides when to save.

use crate::model::GraphSequenceModel;
use crate::optim::{Optimizer, OptimizerKind};
use crate::rollout::RolloutEngine;
use drain_math::autodiff::{Tape, Var};
use drain_types::config::TrainConfig;
use drain_types::error::{ensure_shape, DrainError, DrainResult};
use ndarray::{ArrayD, Axis};
use rand::Rng;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    MeanSquaredError,
    MeanAbsoluteError,
}

impl Loss {
    pub fn parse(name: &str) -> DrainResult<Self> {
        match name {
            "MeanSquaredError" | "mse" | "mean_squared_error" => Ok(Self::MeanSquaredError),
            "MeanAbsoluteError" | "mae" | "mean_absolute_error" => Ok(Self::MeanAbsoluteError),
            other => Err(DrainError::ConfigError(format!("Unknown loss '{other}'"))),
        }
    }

    pub fn apply<'t>(self, pred: Var<'t>, target: Var<'t>) -> Var<'t> {
        let diff = pred.sub(target);
        match self {
            Self::MeanSquaredError => diff.square().mean(),
            Self::MeanAbsoluteError => diff.abs().mean(),
        }
    }
}

/// One minibatch of events.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `(b, seq_in, n_node, n_in)`.
    pub window: ArrayD<f64>,
    /// `(b, h, n_node)`.
    pub runoff: ArrayD<f64>,
    /// `(b, h, n_act)` when the model has actuators.
    pub settings: Option<ArrayD<f64>>,
    /// `(b, seq_in, n_edge, edge_in)` for edge-feature models.
    pub edges: Option<ArrayD<f64>>,
    /// Observed `(b, h, n_node, n_out)`.
    pub target: ArrayD<f64>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.window.shape().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of training minibatches drawn from recorded events.
pub trait EventSampler {
    fn n_events(&self) -> usize;

    /// Draw `batch_size` samples restricted to events in `ids`.
    fn sample(&mut self, ids: &[usize], batch_size: usize) -> DrainResult<Batch>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossHistory {
    pub train: Vec<f64>,
    pub test: Vec<f64>,
}

pub struct Trainer {
    model: GraphSequenceModel,
    loss: Loss,
    optimizer: Box<dyn Optimizer>,
    balance_weight: f64,
}

impl Trainer {
    pub fn new(model: GraphSequenceModel, config: &TrainConfig) -> DrainResult<Self> {
        config.validate()?;
        let loss = Loss::parse(&config.loss_function)?;
        let optimizer = OptimizerKind::parse(&config.optimizer)?.build(config.learning_rate);
        Ok(Self {
            model,
            loss,
            optimizer,
            balance_weight: config.balance_weight,
        })
    }

    pub fn model(&self) -> &GraphSequenceModel {
        &self.model
    }

    pub fn into_model(self) -> GraphSequenceModel {
        self.model
    }

    fn batch_loss<'t>(
        &self,
        tape: &'t Tape,
        trainable: bool,
        batch: &Batch,
    ) -> DrainResult<(Var<'t>, Vec<(String, Var<'t>)>)> {
        let engine = RolloutEngine::new(&self.model)?;
        let s = engine.shape();
        let b = batch.len();
        let h = batch.runoff.shape().get(1).copied().unwrap_or(0);
        ensure_shape(
            "training target",
            &[b, h, s.n_node, s.n_out],
            batch.target.shape(),
        )?;

        let bound = engine.model().bind(tape, trainable);
        let settings = batch.settings.as_ref().map(|c| tape.constant(c.clone()));
        let traj = engine.rollout_var(
            &bound,
            &batch.window,
            &batch.runoff,
            settings,
            batch.edges.as_ref(),
            false,
        )?;
        let pred = traj.slice(3, 0, s.n_out);
        let target = tape.constant(batch.target.clone());
        let mut loss = self.loss.apply(pred, target);
        if self.balance_weight > 0.0 {
            let r = tape.constant(batch.runoff.clone().insert_axis(Axis(3)));
            let balance = engine.projector().balance_var(pred, r);
            loss = loss.add(balance.scale(self.balance_weight));
        }
        let params = bound.iter().map(|(name, var)| (name.clone(), *var)).collect();
        Ok((loss, params))
    }

    /// One optimizer step on `batch`; returns the loss before the update.
    pub fn fit_epoch(&mut self, batch: &Batch) -> DrainResult<f64> {
        let tape = Tape::new();
        let (loss, params) = self.batch_loss(&tape, true, batch)?;
        let value = loss.scalar();
        let mut grads = tape.backward(loss);
        for (name, var) in params {
            if let (Some(grad), Some(param)) =
                (grads.take(var), self.model.params_mut().get_mut(&name))
            {
                self.optimizer.update(&name, param, &grad);
            }
        }
        Ok(value)
    }

    /// Loss on `batch` without touching the parameters.
    pub fn evaluate(&self, batch: &Batch) -> DrainResult<f64> {
        let tape = Tape::new();
        let (loss, _) = self.batch_loss(&tape, false, batch)?;
        Ok(loss.scalar())
    }

    /// Alternate a training step and a held-out evaluation per epoch.
    pub fn update_net(
        &mut self,
        sampler: &mut dyn EventSampler,
        train_ids: &[usize],
        test_ids: &[usize],
        epochs: usize,
        batch_size: usize,
    ) -> DrainResult<LossHistory> {
        if train_ids.is_empty() || test_ids.is_empty() {
            return Err(DrainError::ConfigError(
                "training needs non-empty train and test event sets".to_string(),
            ));
        }
        let mut history = LossHistory::default();
        for epoch in 0..epochs {
            let train_batch = sampler.sample(train_ids, batch_size)?;
            let train_loss = self.fit_epoch(&train_batch)?;
            let test_batch = sampler.sample(test_ids, batch_size)?;
            let test_loss = self.evaluate(&test_batch)?;
            debug!(epoch, batch = train_batch.len(), "minibatch fitted");
            info!(
                epoch,
                train_loss,
                test_loss,
                lr = self.optimizer.learning_rate(),
                "surrogate epoch"
            );
            history.train.push(train_loss);
            history.test.push(test_loss);
        }
        Ok(history)
    }
}

/// Train ids drawn without replacement; test ids are the complement, sorted.
pub fn split_events<R: Rng + ?Sized>(
    n_events: usize,
    ratio: f64,
    rng: &mut R,
) -> (Vec<usize>, Vec<usize>) {
    let n_train = ((n_events as f64 * ratio).round() as usize).min(n_events);
    let mut train = rand::seq::index::sample(rng, n_events, n_train).into_vec();
    train.sort_unstable();
    let test = (0..n_events)
        .filter(|i| train.binary_search(i).is_err())
        .collect();
    (train, test)
}
