//! Neighbour-graph layout: embeddings to 2-D points.
//!
//! A compact UMAP-style reduction:
//!
//! 1. exact k-nearest neighbours in embedding space (euclidean)
//! 2. per-point smooth-kNN calibration (`rho`, `sigma`) into fuzzy edge weights
//! 3. fuzzy union symmetrisation, `w = a + b - ab`
//! 4. seeded random layout refined by edge-sampled SGD with negative sampling
//!
//! Output order matches input order, and a fixed seed gives identical points
//! for identical input.

use crate::config::ProjectionConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

const DEFAULT_EPOCHS: usize = 500;
const NEGATIVE_SAMPLE_RATE: f64 = 5.0;
const REPULSION_STRENGTH: f64 = 1.0;
const GRADIENT_CLIP: f64 = 4.0;
const INIT_RANGE: f64 = 10.0;
const SPREAD: f64 = 1.0;
const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const MIN_K_DIST_SCALE: f64 = 1e-3;

/// Reduce `data` to one 2-D point per row.
pub fn project(data: &[Vec<f64>], config: &ProjectionConfig) -> Vec<[f64; 2]> {
    let n = data.len();
    match n {
        0 => return Vec::new(),
        1 => return vec![[0.0, 0.0]],
        _ => {}
    }

    let k = config.n_neighbors.max(2).min(n);
    let neighbours = nearest_neighbours(data, k);
    let graph = fuzzy_graph(&neighbours, k);
    let (a, b) = fit_ab(config.min_dist);
    let n_epochs = config.n_epochs.unwrap_or(DEFAULT_EPOCHS).max(1);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut embedding: Vec<[f64; 2]> = (0..n)
        .map(|_| {
            [
                rng.gen_range(-INIT_RANGE..INIT_RANGE),
                rng.gen_range(-INIT_RANGE..INIT_RANGE),
            ]
        })
        .collect();

    optimize_layout(&mut embedding, &graph, a, b, n_epochs, &mut rng);

    tracing::debug!(points = n, k, n_epochs, a, b, "Projected embeddings");
    embedding
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// For each point: itself first, then its `k - 1` nearest others.
fn nearest_neighbours(data: &[Vec<f64>], k: usize) -> Vec<Vec<(usize, f64)>> {
    (0..data.len())
        .map(|i| {
            let mut others: Vec<(usize, f64)> = (0..data.len())
                .filter(|&j| j != i)
                .map(|j| (j, euclidean(&data[i], &data[j])))
                .collect();
            others.sort_by(|x, y| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0)));

            let mut row = Vec::with_capacity(k);
            row.push((i, 0.0));
            row.extend(others.into_iter().take(k - 1));
            row
        })
        .collect()
}

/// Calibrate `(rho, sigma)` so the row's membership strengths sum to log2(k).
fn smooth_knn(distances: &[f64], k: usize, mean_distance: f64) -> (f64, f64) {
    let target = (k as f64).log2();
    let rho = distances.iter().copied().find(|d| *d > 0.0).unwrap_or(0.0);

    let mut lo = 0.0;
    let mut hi = f64::INFINITY;
    let mut mid = 1.0;

    for _ in 0..64 {
        let psum: f64 = distances
            .iter()
            .map(|d| {
                let gap = d - rho;
                if gap > 0.0 {
                    (-gap / mid).exp()
                } else {
                    1.0
                }
            })
            .sum();

        if (psum - target).abs() < SMOOTH_K_TOLERANCE {
            break;
        }
        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            if hi.is_infinite() {
                mid *= 2.0;
            } else {
                mid = (lo + hi) / 2.0;
            }
        }
    }

    let row_mean = if distances.is_empty() {
        0.0
    } else {
        distances.iter().sum::<f64>() / distances.len() as f64
    };
    let floor = if rho > 0.0 {
        MIN_K_DIST_SCALE * row_mean
    } else {
        MIN_K_DIST_SCALE * mean_distance
    };

    (rho, mid.max(floor).max(f64::MIN_POSITIVE))
}

/// One directed edge of the symmetrised graph
struct Edge {
    head: usize,
    tail: usize,
    weight: f64,
}

fn fuzzy_graph(neighbours: &[Vec<(usize, f64)>], k: usize) -> Vec<Edge> {
    let all: Vec<f64> = neighbours
        .iter()
        .flat_map(|row| row.iter().skip(1).map(|(_, d)| *d))
        .collect();
    let mean_distance = if all.is_empty() {
        0.0
    } else {
        all.iter().sum::<f64>() / all.len() as f64
    };

    // (i, j) with i < j -> (w_ij, w_ji)
    let mut pairs: BTreeMap<(usize, usize), (f64, f64)> = BTreeMap::new();
    for (i, row) in neighbours.iter().enumerate() {
        let distances: Vec<f64> = row.iter().skip(1).map(|(_, d)| *d).collect();
        let (rho, sigma) = smooth_knn(&distances, k, mean_distance);

        for &(j, d) in row.iter().skip(1) {
            let gap = d - rho;
            let w = if gap > 0.0 { (-gap / sigma).exp() } else { 1.0 };
            let entry = pairs.entry((i.min(j), i.max(j))).or_insert((0.0, 0.0));
            if i < j {
                entry.0 = w;
            } else {
                entry.1 = w;
            }
        }
    }

    let mut edges = Vec::with_capacity(pairs.len() * 2);
    for ((i, j), (w_ij, w_ji)) in pairs {
        let weight = w_ij + w_ji - w_ij * w_ji;
        if weight > 0.0 {
            edges.push(Edge {
                head: i,
                tail: j,
                weight,
            });
            edges.push(Edge {
                head: j,
                tail: i,
                weight,
            });
        }
    }
    edges
}

/// Fit `1 / (1 + a d^(2b))` to the target membership curve for `min_dist`.
///
/// Deterministic least squares by refining grid search.
pub fn fit_ab(min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..300).map(|i| i as f64 * 3.0 * SPREAD / 299.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / SPREAD).exp()
            }
        })
        .collect();

    let loss = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let r = 1.0 / (1.0 + a * x.powf(2.0 * b)) - y;
                r * r
            })
            .sum()
    };

    let (mut best_a, mut best_b) = (1.0, 1.0);
    let mut best = loss(best_a, best_b);
    let (mut a_lo, mut a_hi, mut b_lo, mut b_hi) = (0.01, 10.0, 0.1, 3.0);

    for _ in 0..6 {
        let steps = 40;
        for ia in 0..=steps {
            let a = a_lo + (a_hi - a_lo) * ia as f64 / steps as f64;
            for ib in 0..=steps {
                let b = b_lo + (b_hi - b_lo) * ib as f64 / steps as f64;
                let l = loss(a, b);
                if l < best {
                    best = l;
                    best_a = a;
                    best_b = b;
                }
            }
        }
        let (da, db) = ((a_hi - a_lo) / 8.0, (b_hi - b_lo) / 8.0);
        a_lo = (best_a - da).max(1e-4);
        a_hi = best_a + da;
        b_lo = (best_b - db).max(1e-4);
        b_hi = best_b + db;
    }

    (best_a, best_b)
}

fn clip(v: f64) -> f64 {
    v.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

fn dist_sq(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)
}

fn optimize_layout(
    embedding: &mut [[f64; 2]],
    edges: &[Edge],
    a: f64,
    b: f64,
    n_epochs: usize,
    rng: &mut StdRng,
) {
    let n = embedding.len();
    let max_weight = edges.iter().map(|e| e.weight).fold(0.0, f64::max);
    if max_weight <= 0.0 {
        return;
    }

    // Edges too weak to be sampled even once are dropped.
    let min_weight = max_weight / n_epochs as f64;
    let edges: Vec<&Edge> = edges.iter().filter(|e| e.weight >= min_weight).collect();

    let epochs_per_sample: Vec<f64> = edges.iter().map(|e| max_weight / e.weight).collect();
    let epochs_per_negative: Vec<f64> = epochs_per_sample
        .iter()
        .map(|eps| eps / NEGATIVE_SAMPLE_RATE)
        .collect();
    let mut next_sample = epochs_per_sample.clone();
    let mut next_negative = epochs_per_negative.clone();

    for epoch in 0..n_epochs {
        let alpha = 1.0 - epoch as f64 / n_epochs as f64;
        let now = epoch as f64;

        for (e, edge) in edges.iter().enumerate() {
            if next_sample[e] > now {
                continue;
            }
            let (i, j) = (edge.head, edge.tail);

            let d2 = dist_sq(&embedding[i], &embedding[j]);
            if d2 > 0.0 {
                let coeff = -2.0 * a * b * d2.powf(b - 1.0) / (a * d2.powf(b) + 1.0);
                for dim in 0..2 {
                    let g = clip(coeff * (embedding[i][dim] - embedding[j][dim]));
                    embedding[i][dim] += g * alpha;
                    embedding[j][dim] -= g * alpha;
                }
            }
            next_sample[e] += epochs_per_sample[e];

            let n_negative = ((now - next_negative[e]) / epochs_per_negative[e]).floor();
            let n_negative = if n_negative > 0.0 { n_negative as usize } else { 0 };
            for _ in 0..n_negative {
                let other = rng.gen_range(0..n);
                if other == i {
                    continue;
                }
                let d2 = dist_sq(&embedding[i], &embedding[other]);
                let coeff = if d2 > 0.0 {
                    2.0 * REPULSION_STRENGTH * b / ((0.001 + d2) * (a * d2.powf(b) + 1.0))
                } else if other == j {
                    continue;
                } else {
                    0.0
                };
                for dim in 0..2 {
                    let g = if coeff > 0.0 {
                        clip(coeff * (embedding[i][dim] - embedding[other][dim]))
                    } else {
                        GRADIENT_CLIP
                    };
                    embedding[i][dim] += g * alpha;
                }
            }
            next_negative[e] += n_negative as f64 * epochs_per_negative[e];
        }
    }
}
