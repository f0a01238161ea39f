// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Variation Operators
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Selection, simulated binary crossover and polynomial mutation on
//! bounded real vectors.

use drain_types::config::OperatorRate;
use rand::Rng;

/// Gene differences below this are treated as equal parents.
const SBX_EPS: f64 = 1e-14;

/// Index of the better of two uniformly drawn members.
pub fn binary_tournament<R: Rng + ?Sized>(objectives: &[f64], rng: &mut R) -> usize {
    let n = objectives.len();
    let a = rng.gen_range(0..n);
    let b = rng.gen_range(0..n);
    if objectives[b] < objectives[a] {
        b
    } else {
        a
    }
}

fn sbx_spread(u: f64, alpha: f64, eta: f64) -> f64 {
    if u <= 1.0 / alpha {
        (u * alpha).powf(1.0 / (eta + 1.0))
    } else {
        (1.0 / (2.0 - u * alpha)).powf(1.0 / (eta + 1.0))
    }
}

/// Bounded simulated binary crossover.
///
/// The pair crosses with probability `rate.prob`; each variable then
/// recombines with probability one half.
pub fn sbx<R: Rng + ?Sized>(
    p1: &[f64],
    p2: &[f64],
    lower: &[f64],
    upper: &[f64],
    rate: OperatorRate,
    rng: &mut R,
) -> (Vec<f64>, Vec<f64>) {
    let mut c1 = p1.to_vec();
    let mut c2 = p2.to_vec();
    if rng.gen::<f64>() >= rate.prob {
        return (c1, c2);
    }
    let eta = rate.eta;
    for j in 0..p1.len() {
        if rng.gen::<f64>() > 0.5 || (p1[j] - p2[j]).abs() <= SBX_EPS {
            continue;
        }
        let (xl, xu) = (lower[j], upper[j]);
        if xu - xl <= SBX_EPS {
            continue;
        }
        let (y1, y2) = (p1[j].min(p2[j]), p1[j].max(p2[j]));
        let delta = y2 - y1;

        let beta = 1.0 + 2.0 * (y1 - xl) / delta;
        let alpha = 2.0 - beta.powf(-(eta + 1.0));
        let lo = 0.5 * ((y1 + y2) - sbx_spread(rng.gen(), alpha, eta) * delta);

        let beta = 1.0 + 2.0 * (xu - y2) / delta;
        let alpha = 2.0 - beta.powf(-(eta + 1.0));
        let hi = 0.5 * ((y1 + y2) + sbx_spread(rng.gen(), alpha, eta) * delta);

        let (lo, hi) = (lo.clamp(xl, xu), hi.clamp(xl, xu));
        if rng.gen::<bool>() {
            c1[j] = hi;
            c2[j] = lo;
        } else {
            c1[j] = lo;
            c2[j] = hi;
        }
    }
    (c1, c2)
}

/// Bounded polynomial mutation in place.
///
/// The individual mutates with probability `rate.prob`; each variable with
/// probability `min(0.5, 1 / n_var)`.
pub fn polynomial_mutation<R: Rng + ?Sized>(
    x: &mut [f64],
    lower: &[f64],
    upper: &[f64],
    rate: OperatorRate,
    rng: &mut R,
) {
    if x.is_empty() || rng.gen::<f64>() >= rate.prob {
        return;
    }
    let per_var = (1.0 / x.len() as f64).min(0.5);
    let power = 1.0 / (rate.eta + 1.0);
    for (j, v) in x.iter_mut().enumerate() {
        if rng.gen::<f64>() >= per_var {
            continue;
        }
        let (xl, xu) = (lower[j], upper[j]);
        let span = xu - xl;
        if span <= 0.0 {
            continue;
        }
        let d1 = (*v - xl) / span;
        let d2 = (xu - *v) / span;
        let u: f64 = rng.gen();
        let dq = if u <= 0.5 {
            let val = 2.0 * u + (1.0 - 2.0 * u) * (1.0 - d1).powf(rate.eta + 1.0);
            val.powf(power) - 1.0
        } else {
            let val = 2.0 * (1.0 - u) + 2.0 * (u - 0.5) * (1.0 - d2).powf(rate.eta + 1.0);
            1.0 - val.powf(power)
        };
        *v = (*v + dq * span).clamp(xl, xu);
    }
}
