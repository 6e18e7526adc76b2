use anyhow::{Context, Result};
use derive_more::{From, Into, IntoIterator};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::embeddings::Embeddings;

/// Neighborhood size of the layout graph.
const NEIGHBORS: usize = 3;
/// Distance floor below which connected points stop attracting.
const MIN_DIST: f32 = 0.1;
/// Seed for the layout initialization and negative sampling.
const SEED: u64 = 42;

const EPOCHS: usize = 200;
const LEARNING_RATE: f32 = 0.1;
const REPULSION: f32 = 0.02;

/// 2-D coordinates per rule, aligned by row with the embedding
/// matrix. Display-only: planar distances are not comparable to the
/// original cosine similarities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, From, Into, IntoIterator)]
#[serde(transparent)]
pub struct Projection(Vec<(f32, f32)>);

impl Projection {
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, (f32, f32)> {
        self.0.iter()
    }
    pub fn get(&self, row: usize) -> Option<(f32, f32)> {
        self.0.get(row).copied()
    }
}

/// Project the embedding rows onto the plane with a seeded
/// neighborhood-graph layout: a k-nearest-neighbor graph over cosine
/// distance, random initial placement, then iterative attraction along
/// graph edges down to a distance floor with sampled repulsion
/// elsewhere.
///
/// The neighbor count clamps to `n - 1`, a lone rule lands at the
/// origin and an empty matrix yields an empty projection; beyond that
/// the geometry in degenerate regimes is arbitrary but deterministic
/// under the fixed seed.
pub fn project(embeddings: &Embeddings) -> Result<Projection> {
    let n = embeddings.len();
    if n == 0 {
        return Ok(Projection::default());
    }
    if n == 1 {
        return Ok(vec![(0.0, 0.0)].into());
    }

    let matrix = embeddings.as_ndarray().with_context(|| "project()")?;
    let similarities = matrix.dot(&matrix.t());

    // k nearest neighbors per row over cosine distance, stable order.
    // Edges keep the similarity as a weight so near-duplicates attract
    // much harder than merely-adjacent points.
    let k = NEIGHBORS.min(n - 1);
    let neighbors: Vec<Vec<(usize, f32)>> = (0..n)
        .map(|i| {
            let mut candidates: Vec<(usize, f32)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, 1.0 - similarities[[i, j]]))
                .collect();
            candidates.sort_by(|a, b| {
                a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
            });
            candidates.truncate(k);
            candidates
                .into_iter()
                .map(|(j, dist)| (j, (1.0 - dist).max(0.0)))
                .collect()
        })
        .collect();

    let mut rng = StdRng::seed_from_u64(SEED);
    let mut positions: Vec<(f32, f32)> = (0..n)
        .map(|_| (rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
        .collect();

    for epoch in 0..EPOCHS {
        let alpha = LEARNING_RATE * (1.0 - epoch as f32 / EPOCHS as f32);
        for i in 0..n {
            // Pull i toward each graph neighbor until the floor.
            for &(j, weight) in &neighbors[i] {
                let (dx, dy) = delta(positions[i], positions[j]);
                let dist = (dx * dx + dy * dy).sqrt();
                if dist > MIN_DIST {
                    let pull = alpha * weight * (dist - MIN_DIST) / dist;
                    positions[i].0 += dx * pull;
                    positions[i].1 += dy * pull;
                }
            }

            // Push i away from one sampled non-neighbor.
            let other = rng.gen_range(0..n);
            if other != i && !neighbors[i].iter().any(|&(j, _)| j == other) {
                let (dx, dy) = delta(positions[i], positions[other]);
                let dist_sq = dx * dx + dy * dy;
                if dist_sq > f32::EPSILON {
                    let push = alpha * REPULSION / dist_sq;
                    positions[i].0 -= dx * push.min(1.0);
                    positions[i].1 -= dy * push.min(1.0);
                } else {
                    // Coincident points: nudge apart deterministically.
                    positions[i].0 += alpha * rng.gen_range(-1.0..1.0);
                    positions[i].1 += alpha * rng.gen_range(-1.0..1.0);
                }
            }
        }
    }

    Ok(positions.into())
}

fn delta(from: (f32, f32), to: (f32, f32)) -> (f32, f32) {
    (to.0 - from.0, to.1 - from.1)
}
