// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Sampling
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use drain_types::error::{DrainError, DrainResult};
use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;

/// Latin-hypercube design on the unit cube: each column places exactly
/// one sample in each of `n_samples` equal strata.
pub fn latin_hypercube<R: Rng + ?Sized>(
    n_samples: usize,
    n_dims: usize,
    rng: &mut R,
) -> Array2<f64> {
    let mut samples = Array2::zeros((n_samples, n_dims));
    for dim in 0..n_dims {
        let mut values: Vec<f64> = (0..n_samples)
            .map(|i| (i as f64 + rng.gen::<f64>()) / n_samples as f64)
            .collect();
        values.shuffle(rng);
        for (i, v) in values.into_iter().enumerate() {
            samples[[i, dim]] = v;
        }
    }
    samples
}

/// Latin-hypercube design scaled into the box `[lower, upper]`.
pub fn latin_hypercube_in<R: Rng + ?Sized>(
    n_samples: usize,
    lower: &[f64],
    upper: &[f64],
    rng: &mut R,
) -> DrainResult<Array2<f64>> {
    if lower.len() != upper.len() {
        return Err(DrainError::shape("sampling bounds", &[lower.len()], &[upper.len()]));
    }
    if lower.iter().zip(upper).any(|(l, u)| l > u || l.is_nan() || u.is_nan()) {
        return Err(DrainError::ConfigError(
            "sampling bounds require lower <= upper".to_string(),
        ));
    }
    let mut samples = latin_hypercube(n_samples, lower.len(), rng);
    for mut row in samples.rows_mut() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = lower[j] + *v * (upper[j] - lower[j]);
        }
    }
    Ok(samples)
}

/// Uniform integers in `[lower, upper]` per column.
pub fn random_integers<R: Rng + ?Sized>(
    n_samples: usize,
    lower: &[i64],
    upper: &[i64],
    rng: &mut R,
) -> Array2<f64> {
    let mut samples = Array2::zeros((n_samples, lower.len()));
    for mut row in samples.rows_mut() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = rng.gen_range(lower[j]..=upper[j].max(lower[j])) as f64;
        }
    }
    samples
}
