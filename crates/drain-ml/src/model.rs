// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Graph Sequence Model
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Spatiotemporal surrogate: embedding → spatial stack → temporal stage → output.
//!
//! Input `(batch, seq_in, n_node, n_in + n_act)` in physical units, output
//! `(batch, seq_out, n_node, n_out)`. Without a temporal stage only the
//! last window step is read and the output layer emits every predicted
//! step at once.

use crate::layers::{
    init_params, Activation, Binding, Convolution, Dense, GraphAttention, GraphConv, Gru,
    ParamMap, Recurrent, TemporalConv,
};
use drain_math::autodiff::{Tape, Var};
use drain_math::graph::{adjacency, graph_filter, incidence_mean, FilterKind};
use drain_types::config::ModelConfig;
use drain_types::constants::{NORMAL_FILE, WEIGHTS_FILE};
use drain_types::error::{ensure_shape, DrainError, DrainResult};
use ndarray::{s, Array2, ArrayD, IxDyn, OwnedRepr};
use ndarray_npy::{read_npy, write_npy, NpzReader, NpzWriter};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;
use std::path::Path;

/// Dimensions every sequence model exposes to the rollout engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelShape {
    pub n_node: usize,
    pub n_in: usize,
    pub n_out: usize,
    pub n_act: usize,
    pub edge_in: usize,
    /// Network edges behind the edge features; zero without them.
    pub n_edge: usize,
    pub seq_in: usize,
    /// Steps emitted per call.
    pub seq_out: usize,
    pub hmax: Vec<f64>,
}

impl ModelShape {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            n_node: config.n_node,
            n_in: config.n_in,
            n_out: config.n_out,
            n_act: config.n_act,
            edge_in: config.edge_in,
            n_edge: 0,
            seq_in: config.seq_in,
            seq_out: config.effective_seq_out(),
            hmax: config.hmax_per_node(),
        }
    }

    /// Channels fed to the model per node and step.
    pub fn n_feature(&self) -> usize {
        self.n_in + self.n_act
    }
}

/// One differentiable prediction step, shared by every architecture.
pub trait SequenceModel: Send + Sync {
    fn shape(&self) -> &ModelShape;

    /// Bring the parameters onto `tape`.
    fn bind<'t>(&self, tape: &'t Tape, trainable: bool) -> Binding<'t>;

    /// `x (b, seq_in, n_node, n_in + n_act)`, `edges (b, seq_in, n_edge, edge_in)`
    /// → `(b, seq_out, n_node, n_out)`.
    fn step<'t>(&self, bound: &Binding<'t>, x: Var<'t>, edges: Option<Var<'t>>) -> Var<'t>;
}

#[derive(Debug, Clone)]
enum Spatial {
    Dense(Dense),
    Spectral(GraphConv),
    Attention(GraphAttention),
}

#[derive(Debug, Clone)]
enum Temporal {
    Conv(TemporalConv),
    Gru(Gru),
}

#[derive(Debug, Clone)]
pub struct GraphSequenceModel {
    config: ModelConfig,
    shape: ModelShape,
    conv: Convolution,
    recurrent: Recurrent,
    filter: Option<Array2<f64>>,
    incidence: Option<Array2<f64>>,
    embed: Dense,
    spatial: Vec<Spatial>,
    temporal: Option<Temporal>,
    output: Dense,
    params: ParamMap,
    normal: Array2<f64>,
}

impl GraphSequenceModel {
    /// Build with freshly initialised weights. `edges` is the network
    /// edge list; graph convolutions and edge features require it.
    pub fn new(config: ModelConfig, edges: Option<&[(usize, usize)]>) -> DrainResult<Self> {
        config.validate()?;
        let conv = Convolution::parse(&config.conv)?;
        let recurrent = Recurrent::parse(&config.recurrent)?;
        let activation = Activation::parse(&config.activation)?;
        let mut shape = ModelShape::from_config(&config);

        if conv.is_graph() && edges.is_none() {
            return Err(DrainError::ConfigError(format!(
                "convolution '{}' requires network edges",
                config.conv
            )));
        }
        if config.edge_in > 0 && edges.is_none() {
            return Err(DrainError::ConfigError(
                "model.edge_in > 0 requires network edges".to_string(),
            ));
        }
        if config.norm && shape.n_out > shape.n_in {
            return Err(DrainError::ConfigError(format!(
                "model.norm needs n_out={} <= n_in={}",
                shape.n_out, shape.n_in
            )));
        }
        if recurrent != Recurrent::None && shape.seq_out > shape.seq_in {
            return Err(DrainError::ConfigError(format!(
                "model.seq_out={} exceeds model.seq_in={}",
                shape.seq_out, shape.seq_in
            )));
        }

        let filter = match (conv, edges) {
            (Convolution::Spectral, Some(e)) => Some(graph_filter(
                &adjacency(e, shape.n_node)?,
                FilterKind::Spectral,
            )),
            (Convolution::Attention, Some(e)) => Some(graph_filter(
                &adjacency(e, shape.n_node)?,
                FilterKind::Attention,
            )),
            _ => None,
        };
        let incidence = match edges {
            Some(e) if config.edge_in > 0 => Some(incidence_mean(e, shape.n_node)?),
            _ => None,
        };
        shape.n_edge = incidence.as_ref().map_or(0, |m| m.ncols());

        let n_feat = shape.n_feature() + shape.edge_in;
        let embed_in = if conv.is_graph() {
            n_feat
        } else {
            shape.n_node * n_feat
        };
        let embed = Dense::new("embed", embed_in, config.embed_size, activation);
        let spatial = (0..config.n_layer)
            .map(|i| {
                let name = format!("spatial{i}");
                let (e, act) = (config.embed_size, activation);
                match conv {
                    Convolution::None => Spatial::Dense(Dense::new(name, e, e, act)),
                    Convolution::Spectral => Spatial::Spectral(GraphConv::new(name, e, e, act)),
                    Convolution::Attention => {
                        Spatial::Attention(GraphAttention::new(name, e, e, act))
                    }
                }
            })
            .collect();
        let temporal = match recurrent {
            Recurrent::None => None,
            Recurrent::Conv1d => Some(Temporal::Conv(TemporalConv::new(
                "temporal",
                shape.seq_in - shape.seq_out + 1,
                config.embed_size,
                config.hidden_dim,
                activation,
            ))),
            Recurrent::Gru => Some(Temporal::Gru(Gru::new(
                "temporal",
                config.embed_size,
                config.hidden_dim,
            ))),
        };
        let width = if temporal.is_some() {
            config.hidden_dim
        } else {
            config.embed_size
        };
        let per_node = if temporal.is_some() {
            shape.n_out
        } else {
            shape.seq_out * shape.n_out
        };
        let out_dim = if conv.is_graph() {
            per_node
        } else {
            shape.n_node * per_node
        };
        let output = Dense::new("output", width, out_dim, Activation::Linear);

        let mut model = Self {
            normal: Array2::ones((shape.n_node, shape.n_in)),
            config,
            shape,
            conv,
            recurrent,
            filter,
            incidence,
            embed,
            spatial,
            temporal,
            output,
            params: ParamMap::new(),
        };
        let mut rng = match model.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        model.params = init_params(&model.param_shapes(), &mut rng);
        Ok(model)
    }

    /// Build and load persisted weights from `dir`.
    pub fn from_dir(
        config: ModelConfig,
        edges: Option<&[(usize, usize)]>,
        dir: impl AsRef<Path>,
    ) -> DrainResult<Self> {
        let mut model = Self::new(config, edges)?;
        model.load(dir)?;
        Ok(model)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn convolution(&self) -> Convolution {
        self.conv
    }

    pub fn recurrent(&self) -> Recurrent {
        self.recurrent
    }

    /// Static graph filter, `(n_node, n_node)` when a graph convolution is used.
    pub fn filter(&self) -> Option<&Array2<f64>> {
        self.filter.as_ref()
    }

    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamMap {
        &mut self.params
    }

    pub fn normal(&self) -> &Array2<f64> {
        &self.normal
    }

    /// Normalisation factors `(n_node, n_in)`; used when `norm` is set.
    pub fn set_norm(&mut self, normal: Array2<f64>) -> DrainResult<()> {
        ensure_shape(
            "normalisation factors",
            &[self.shape.n_node, self.shape.n_in],
            normal.shape(),
        )?;
        self.normal = normal;
        Ok(())
    }

    pub fn param_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let mut shapes = self.embed.param_shapes();
        for layer in &self.spatial {
            shapes.extend(match layer {
                Spatial::Dense(l) => l.param_shapes(),
                Spatial::Spectral(l) => l.param_shapes(),
                Spatial::Attention(l) => l.param_shapes(),
            });
        }
        match &self.temporal {
            Some(Temporal::Conv(l)) => shapes.extend(l.param_shapes()),
            Some(Temporal::Gru(l)) => shapes.extend(l.param_shapes()),
            None => {}
        }
        shapes.extend(self.output.param_shapes());
        shapes
    }

    /// Inference on a raw window `(b, seq_in, n_node, n_in + n_act)`.
    pub fn predict(&self, x: &ArrayD<f64>, edges: Option<&ArrayD<f64>>) -> DrainResult<ArrayD<f64>> {
        let s = &self.shape;
        let batch = x.shape().first().copied().unwrap_or(0);
        ensure_shape(
            "model input",
            &[batch, s.seq_in, s.n_node, s.n_feature()],
            x.shape(),
        )?;
        match (&self.incidence, edges) {
            (Some(_), None) => {
                return Err(DrainError::ConfigError(
                    "model.edge_in > 0 requires edge features on predict".to_string(),
                ))
            }
            (Some(_), Some(e)) => ensure_shape(
                "edge features",
                &[batch, s.seq_in, s.n_edge, s.edge_in],
                e.shape(),
            )?,
            (None, _) => {}
        }
        let tape = Tape::new();
        let bound = self.bind(&tape, false);
        let xv = tape.constant(x.clone());
        let ev = edges.map(|e| tape.constant(e.clone()));
        Ok(self.step(&bound, xv, ev).value())
    }

    /// Write `model.npz` and `normal.npy` into `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> DrainResult<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let file = File::create(dir.join(WEIGHTS_FILE))?;
        let mut writer = NpzWriter::new(file);
        for (name, value) in &self.params {
            writer
                .add_array(name.as_str(), value)
                .map_err(|e| DrainError::Npy(format!("Failed to write {name}: {e}")))?;
        }
        writer
            .finish()
            .map_err(|e| DrainError::Npy(format!("Failed to finish weights archive: {e}")))?;
        write_npy(dir.join(NORMAL_FILE), &self.normal)
            .map_err(|e| DrainError::Npy(format!("Failed to write normalisation: {e}")))?;
        Ok(())
    }

    /// Replace weights and normalisation from `dir`; both files must exist
    /// and match the configured shapes.
    pub fn load(&mut self, dir: impl AsRef<Path>) -> DrainResult<()> {
        let dir = dir.as_ref();
        let weights_path = dir.join(WEIGHTS_FILE);
        let normal_path = dir.join(NORMAL_FILE);
        for path in [&weights_path, &normal_path] {
            if !path.is_file() {
                return Err(DrainError::MissingArtifact(path.clone()));
            }
        }

        let file = File::open(&weights_path)?;
        let mut npz = NpzReader::new(file).map_err(|e| {
            DrainError::Npy(format!("Failed to open npz '{}': {e}", weights_path.display()))
        })?;
        let mut params = ParamMap::new();
        for (name, expected) in self.param_shapes() {
            let value = npz
                .by_name::<OwnedRepr<f64>, IxDyn>(&format!("{name}.npy"))
                .or_else(|_| npz.by_name::<OwnedRepr<f64>, IxDyn>(&name))
                .map_err(|e| DrainError::Npy(format!("Failed to read {name} from npz: {e}")))?;
            ensure_shape(&name, &expected, value.shape())?;
            params.insert(name, value);
        }

        let normal: Array2<f64> = read_npy(&normal_path)
            .map_err(|e| DrainError::Npy(format!("Failed to read normalisation: {e}")))?;
        ensure_shape(
            "normalisation factors",
            &[self.shape.n_node, self.shape.n_in],
            normal.shape(),
        )?;
        self.params = params;
        self.normal = normal;
        Ok(())
    }

    fn input_scale(&self) -> ArrayD<f64> {
        let s = &self.shape;
        let mut scale = Array2::ones((s.n_node, s.n_feature()));
        for ((i, j), v) in self.normal.indexed_iter() {
            if *v != 0.0 {
                scale[[i, j]] = 1.0 / v;
            }
        }
        scale.into_dyn()
    }

    fn output_scale(&self) -> ArrayD<f64> {
        self.normal
            .slice(s![.., ..self.shape.n_out])
            .to_owned()
            .into_dyn()
    }

    /// Temporal stage on one branch. Graph branches arrive as
    /// `(b, t, n_node, e)`, flat ones as `(b, t, e)`.
    fn temporal_forward<'t>(&self, bound: &Binding<'t>, z: Var<'t>) -> Var<'t> {
        let keep = self.shape.seq_out;
        let stage = match &self.temporal {
            Some(stage) => stage,
            None => return z,
        };
        let apply = |seq: Var<'t>| match stage {
            Temporal::Conv(layer) => layer.forward(bound, seq),
            Temporal::Gru(layer) => layer.forward(bound, seq, keep),
        };
        if self.conv.is_graph() {
            let shape = z.shape();
            let (b, t, n, e) = (shape[0], shape[1], shape[2], shape[3]);
            let per_node = z.permute(&[0, 2, 1, 3]).reshape(&[b * n, t, e]);
            let out = apply(per_node);
            let h = out.shape()[2];
            out.reshape(&[b, n, keep, h]).permute(&[0, 2, 1, 3])
        } else {
            apply(z)
        }
    }
}

impl SequenceModel for GraphSequenceModel {
    fn shape(&self) -> &ModelShape {
        &self.shape
    }

    fn bind<'t>(&self, tape: &'t Tape, trainable: bool) -> Binding<'t> {
        Binding::new(tape, &self.params, trainable)
    }

    fn step<'t>(&self, bound: &Binding<'t>, x: Var<'t>, edges: Option<Var<'t>>) -> Var<'t> {
        let s = &self.shape;
        let dims = x.shape();
        let (b, t) = (dims[0], dims[1]);
        let n = s.n_node;
        let e = self.config.embed_size;

        let mut x = if self.config.norm {
            x.mul_const(&self.input_scale())
        } else {
            x
        };
        if let (Some(inc), Some(ev)) = (&self.incidence, edges) {
            x = Var::concat(&[x, ev.mix(inc)], 3);
        }
        let (x, tt) = if self.temporal.is_none() {
            (x.slice(1, t - 1, t), 1)
        } else {
            (x, t)
        };
        let f = x.shape()[3];

        let (embedded, spatial_out) = if self.conv.is_graph() {
            let embedded = self.embed.forward(bound, x);
            let mut h = embedded.reshape(&[b * tt, n, e]);
            let filter = self.filter.as_ref();
            for layer in &self.spatial {
                h = match (layer, filter) {
                    (Spatial::Spectral(l), Some(flt)) => l.forward(bound, h, flt),
                    (Spatial::Attention(l), Some(flt)) => l.forward(bound, h, flt),
                    (Spatial::Dense(l), _) => l.forward(bound, h),
                    (_, None) => h,
                };
            }
            (embedded, h.reshape(&[b, tt, n, e]))
        } else {
            let embedded = self.embed.forward(bound, x.reshape(&[b, tt, n * f]));
            let mut h = embedded;
            for layer in &self.spatial {
                if let Spatial::Dense(l) = layer {
                    h = l.forward(bound, h);
                }
            }
            (embedded, h)
        };

        let mut hidden = self.temporal_forward(bound, spatial_out);
        if self.config.resnet {
            hidden = hidden.add(self.temporal_forward(bound, embedded));
        }

        let out = self.output.forward(bound, hidden);
        let out = match (self.conv.is_graph(), self.temporal.is_some()) {
            (true, true) => out,
            (true, false) => out
                .reshape(&[b, n, s.seq_out, s.n_out])
                .permute(&[0, 2, 1, 3]),
            (false, _) => out.reshape(&[b, s.seq_out, n, s.n_out]),
        };
        if self.config.norm {
            out.mul_const(&self.output_scale())
        } else {
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn line_edges(n: usize) -> Vec<(usize, usize)> {
        (0..n - 1).map(|i| (i, i + 1)).collect()
    }

    fn small_config(conv: &str, recurrent: &str) -> ModelConfig {
        ModelConfig {
            n_node: 4,
            n_in: 4,
            n_out: 3,
            n_act: 1,
            seq_in: 5,
            seq_out: 2,
            embed_size: 6,
            hidden_dim: 5,
            n_layer: 2,
            conv: conv.to_string(),
            recurrent: recurrent.to_string(),
            seed: Some(17),
            ..Default::default()
        }
    }

    fn window(cfg: &ModelConfig, batch: usize) -> ArrayD<f64> {
        ArrayD::from_shape_fn(
            IxDyn(&[batch, cfg.seq_in, cfg.n_node, cfg.n_in + cfg.n_act]),
            |ix| ((ix[0] + 2 * ix[1] + 3 * ix[2] + ix[3]) % 7) as f64 * 0.1,
        )
    }

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        let epoch_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "drain_model_{tag}_{}_{}",
            std::process::id(),
            epoch_ns
        ))
    }

    #[test]
    fn test_every_architecture_emits_configured_shape() {
        let edges = line_edges(4);
        for conv in ["None", "GCNconv", "GATconv"] {
            for recurrent in ["None", "Conv1D", "GRU"] {
                for resnet in [false, true] {
                    let mut cfg = small_config(conv, recurrent);
                    cfg.resnet = resnet;
                    let model = GraphSequenceModel::new(cfg.clone(), Some(edges.as_slice())).unwrap();
                    let y = model.predict(&window(&cfg, 3), None).unwrap();
                    assert_eq!(
                        y.shape(),
                        &[3, 2, 4, 3],
                        "conv={conv} recurrent={recurrent} resnet={resnet}"
                    );
                    assert!(y.iter().all(|v| v.is_finite()));
                }
            }
        }
    }

    #[test]
    fn test_roll_emits_single_step() {
        let mut cfg = small_config("GCNconv", "GRU");
        cfg.roll = true;
        let model = GraphSequenceModel::new(cfg.clone(), Some(line_edges(4).as_slice())).unwrap();
        let y = model.predict(&window(&cfg, 1), None).unwrap();
        assert_eq!(y.shape(), &[1, 1, 4, 3]);
    }

    #[test]
    fn test_unknown_tags_are_fatal() {
        let err = GraphSequenceModel::new(small_config("CNN", "GRU"), Some(line_edges(4).as_slice()))
            .expect_err("CNN is not a supported convolution");
        assert!(matches!(err, DrainError::ConfigError(_)));
        let err = GraphSequenceModel::new(small_config("None", "LSTM"), None)
            .expect_err("LSTM is not a supported recurrent layer");
        assert!(matches!(err, DrainError::ConfigError(_)));
    }

    #[test]
    fn test_graph_conv_requires_edges() {
        let err = GraphSequenceModel::new(small_config("GATconv", "GRU"), None)
            .expect_err("attention needs edges");
        assert!(err.to_string().contains("edges"));
    }

    #[test]
    fn test_filter_shape_matches_nodes() {
        let model =
            GraphSequenceModel::new(small_config("GCNconv", "None"), Some(line_edges(4).as_slice())).unwrap();
        assert_eq!(model.filter().unwrap().dim(), (4, 4));
    }

    #[test]
    fn test_input_shape_mismatch_is_reported() {
        let cfg = small_config("None", "GRU");
        let model = GraphSequenceModel::new(cfg, None).unwrap();
        let bad = ArrayD::zeros(IxDyn(&[1, 5, 3, 5]));
        assert!(matches!(
            model.predict(&bad, None),
            Err(DrainError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_edge_features_feed_the_model() {
        let mut cfg = small_config("GCNconv", "GRU");
        cfg.edge_in = 2;
        let edges = line_edges(4);
        let model = GraphSequenceModel::new(cfg.clone(), Some(edges.as_slice())).unwrap();
        let x = window(&cfg, 2);
        let e0 = ArrayD::zeros(IxDyn(&[2, cfg.seq_in, edges.len(), 2]));
        let e1 = ArrayD::ones(IxDyn(&[2, cfg.seq_in, edges.len(), 2]));
        let y0 = model.predict(&x, Some(&e0)).unwrap();
        let y1 = model.predict(&x, Some(&e1)).unwrap();
        assert_eq!(y0.shape(), y1.shape());
        assert!(y0.iter().zip(y1.iter()).any(|(a, b)| (a - b).abs() > 1e-12));
    }

    #[test]
    fn test_edge_count_mismatch_is_reported() {
        let mut cfg = small_config("GCNconv", "GRU");
        cfg.edge_in = 2;
        let edges = line_edges(4);
        let model = GraphSequenceModel::new(cfg.clone(), Some(edges.as_slice())).unwrap();
        assert_eq!(model.shape().n_edge, 3);
        let x = window(&cfg, 1);
        let wrong = ArrayD::zeros(IxDyn(&[1, cfg.seq_in, 5, 2]));
        assert!(matches!(
            model.predict(&x, Some(&wrong)),
            Err(DrainError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_save_load_roundtrip_reproduces_predictions() {
        let mut cfg = small_config("GATconv", "GRU");
        cfg.norm = true;
        let edges = line_edges(4);
        let mut model = GraphSequenceModel::new(cfg.clone(), Some(edges.as_slice())).unwrap();
        model
            .set_norm(Array2::from_shape_fn((4, 4), |(i, j)| 1.0 + 0.5 * (i + j) as f64))
            .unwrap();
        let dir = temp_dir("roundtrip");
        model.save(&dir).unwrap();

        let mut fresh_cfg = cfg.clone();
        fresh_cfg.seed = Some(99);
        let loaded = GraphSequenceModel::from_dir(fresh_cfg, Some(edges.as_slice()), &dir).unwrap();
        let x = window(&cfg, 2);
        let a = model.predict(&x, None).unwrap();
        let b = loaded.predict(&x, None).unwrap();
        assert_eq!(a, b);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_requires_both_artifacts() {
        let cfg = small_config("None", "GRU");
        let model = GraphSequenceModel::new(cfg.clone(), None).unwrap();
        let dir = temp_dir("missing");
        model.save(&dir).unwrap();
        std::fs::remove_file(dir.join(NORMAL_FILE)).unwrap();
        let mut other = GraphSequenceModel::new(cfg, None).unwrap();
        match other.load(&dir) {
            Err(DrainError::MissingArtifact(path)) => assert!(path.ends_with(NORMAL_FILE)),
            res => panic!("Unexpected result: {res:?}"),
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_rejects_incompatible_shapes() {
        let cfg = small_config("None", "GRU");
        let model = GraphSequenceModel::new(cfg.clone(), None).unwrap();
        let dir = temp_dir("incompatible");
        model.save(&dir).unwrap();
        let mut wider = cfg;
        wider.hidden_dim = 7;
        let mut other = GraphSequenceModel::new(wider, None).unwrap();
        assert!(matches!(
            other.load(&dir),
            Err(DrainError::ShapeMismatch { .. })
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
