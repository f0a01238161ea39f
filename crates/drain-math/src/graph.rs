// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Graph Filters
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Adjacency construction and the static filters fed to graph layers.

use drain_types::error::{DrainError, DrainResult};
use ndarray::Array2;

/// Which preprocessing a graph layer expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Adjacency counts as given.
    Raw,
    /// `D^-1/2 (A + I) D^-1/2`.
    Spectral,
    /// 0/1 neighbourhood mask `(A + Aᵀ + I) > 0`.
    Attention,
}

fn check_edges(edges: &[(usize, usize)], n_node: usize) -> DrainResult<()> {
    if let Some(&(u, v)) = edges.iter().find(|(u, v)| *u >= n_node || *v >= n_node) {
        return Err(DrainError::ConfigError(format!(
            "edge ({u}, {v}) references a node outside 0..{n_node}"
        )));
    }
    Ok(())
}

/// Directed adjacency with `A[u, v] += 1` per edge.
pub fn adjacency(edges: &[(usize, usize)], n_node: usize) -> DrainResult<Array2<f64>> {
    check_edges(edges, n_node)?;
    let mut a = Array2::zeros((n_node, n_node));
    for &(u, v) in edges {
        a[[u, v]] += 1.0;
    }
    Ok(a)
}

/// Derive the filter for `kind`. Output shape always equals `adj`'s.
pub fn graph_filter(adj: &Array2<f64>, kind: FilterKind) -> Array2<f64> {
    let n = adj.nrows();
    match kind {
        FilterKind::Raw => adj.clone(),
        FilterKind::Spectral => {
            let a_hat = adj + &Array2::<f64>::eye(n);
            let d_inv_sqrt: Vec<f64> = a_hat
                .rows()
                .into_iter()
                .map(|row| {
                    let deg = row.sum();
                    if deg > 0.0 {
                        1.0 / deg.sqrt()
                    } else {
                        0.0
                    }
                })
                .collect();
            let mut out = a_hat;
            for ((i, j), v) in out.indexed_iter_mut() {
                *v *= d_inv_sqrt[i] * d_inv_sqrt[j];
            }
            out
        }
        FilterKind::Attention => {
            let mut mask = Array2::zeros((n, n));
            for ((i, j), v) in mask.indexed_iter_mut() {
                if i == j || adj[[i, j]] != 0.0 || adj[[j, i]] != 0.0 {
                    *v = 1.0;
                }
            }
            mask
        }
    }
}

/// Node×edge matrix averaging incident edge features onto nodes.
/// Isolated nodes get a zero row.
pub fn incidence_mean(edges: &[(usize, usize)], n_node: usize) -> DrainResult<Array2<f64>> {
    check_edges(edges, n_node)?;
    let mut m = Array2::zeros((n_node, edges.len()));
    for (e, &(u, v)) in edges.iter().enumerate() {
        m[[u, e]] = 1.0;
        m[[v, e]] = 1.0;
    }
    for mut row in m.rows_mut() {
        let deg = row.sum();
        if deg > 0.0 {
            row.mapv_inplace(|x| x / deg);
        }
    }
    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> Vec<(usize, usize)> {
        (0..n - 1).map(|i| (i, i + 1)).collect()
    }

    #[test]
    fn test_adjacency_counts_parallel_edges() {
        let a = adjacency(&[(0, 1), (0, 1), (1, 2)], 3).unwrap();
        assert_eq!(a[[0, 1]], 2.0);
        assert_eq!(a[[1, 0]], 0.0);
        assert_eq!(a[[1, 2]], 1.0);
    }

    #[test]
    fn test_adjacency_rejects_out_of_range() {
        let err = adjacency(&[(0, 3)], 3).expect_err("node 3 does not exist");
        assert!(err.to_string().contains("(0, 3)"));
    }

    #[test]
    fn test_spectral_filter_line() {
        let a = adjacency(&line(3), 3).unwrap();
        let f = graph_filter(&a, FilterKind::Spectral);
        assert_eq!(f.dim(), (3, 3));
        // degrees of A + I for a directed line: [2, 2, 1]
        assert!((f[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((f[[0, 1]] - 0.5).abs() < 1e-12);
        assert!((f[[2, 2]] - 1.0).abs() < 1e-12);
        assert_eq!(f[[1, 0]], 0.0);
    }

    #[test]
    fn test_attention_mask_is_symmetric_with_self_loops() {
        let a = adjacency(&line(4), 4).unwrap();
        let m = graph_filter(&a, FilterKind::Attention);
        for i in 0..4 {
            assert_eq!(m[[i, i]], 1.0);
            for j in 0..4 {
                assert_eq!(m[[i, j]], m[[j, i]]);
            }
        }
        assert_eq!(m[[0, 2]], 0.0);
    }

    #[test]
    fn test_incidence_rows_average() {
        let m = incidence_mean(&line(3), 3).unwrap();
        assert_eq!(m.dim(), (3, 2));
        assert!((m[[1, 0]] - 0.5).abs() < 1e-12);
        assert!((m[[0, 0]] - 1.0).abs() < 1e-12);
        for row in m.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
    }
}
