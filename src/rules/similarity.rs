use anyhow::{Context, Result, anyhow};
use derive_more::{AsRef, Deref, Display, From, Into, IntoIterator};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use super::embeddings::Embeddings;
use super::model::RuleName;

/// How many neighbors to report per rule.
#[derive(
    Debug, Copy, Clone, Hash, PartialEq, Eq, From, Into, AsRef, Deref, Serialize, Deserialize,
    Display,
)]
pub struct TopK(usize);

impl TopK {
    pub const DEFAULT: Self = TopK(3);
}

impl Default for TopK {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The full pairwise cosine-similarity matrix, indexed by rule name on
/// both axes. Symmetric, unit diagonal, values in [-1, 1] since the
/// embedding rows are unit vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    names: Vec<RuleName>,
    values: Array2<f32>,
}

impl SimilarityMatrix {
    /// Compute `E · Eᵀ` over the embedding rows.
    pub fn new(names: &[RuleName], embeddings: &Embeddings) -> Result<Self> {
        if names.len() != embeddings.len() {
            return Err(anyhow!(
                "{} rule names for {} embedding rows",
                names.len(),
                embeddings.len()
            ));
        }
        let matrix = embeddings
            .as_ndarray()
            .with_context(|| "SimilarityMatrix::new()")?;
        let mut values = matrix.dot(&matrix.t());
        // Unit-vector self-products land within float error of 1; pin
        // the diagonal so self-similarity is exact.
        for i in 0..values.nrows() {
            values[[i, i]] = 1.0;
        }
        Ok(Self {
            names: names.to_vec(),
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[RuleName] {
        &self.names
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// Similarity between two rules by name. With duplicate names the
    /// first occurrence wins, as documented.
    pub fn get(&self, a: &RuleName, b: &RuleName) -> Option<f32> {
        let i = self.names.iter().position(|n| n == a)?;
        let j = self.names.iter().position(|n| n == b)?;
        Some(self.values[[i, j]])
    }
}

/// One `(rule, similar_rule, similarity)` row of the neighbor report.
/// Similarity is rounded to 3 decimals at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub rule: RuleName,
    pub similar_rule: RuleName,
    pub similarity: f32,
}

/// Per-rule top-k neighbor rows, self-pairs excluded, each rule's
/// block sorted by descending similarity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, From, Into, IntoIterator)]
#[serde(transparent)]
pub struct NeighborReport(Vec<Neighbor>);

impl NeighborReport {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Neighbor> {
        self.0.iter()
    }

    /// The duplicate filter: rows at or above `threshold`, sorted by
    /// descending similarity.
    pub fn at_least(&self, threshold: f32) -> NeighborReport {
        let mut rows: Vec<Neighbor> = self
            .0
            .iter()
            .filter(|n| n.similarity >= threshold)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows.into()
    }
}

/// Build the similarity matrix and the per-rule top-k neighbor table.
/// With one rule or fewer there are no pairs and the report is empty.
pub fn report(
    names: &[RuleName],
    embeddings: &Embeddings,
    top_k: TopK,
) -> Result<(SimilarityMatrix, NeighborReport)> {
    let matrix = SimilarityMatrix::new(names, embeddings).with_context(|| "similarity::report()")?;

    let n = matrix.len();
    if n <= 1 {
        return Ok((matrix, NeighborReport::default()));
    }

    let k: usize = top_k.into();
    let mut rows = Vec::with_capacity(n * k.min(n - 1));
    for i in 0..n {
        let mut candidates: Vec<(usize, f32)> = (0..n)
            .filter(|&j| j != i)
            .map(|j| (j, matrix.values[[i, j]]))
            .collect();
        // Stable sort: ties keep the original row order.
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(k);

        for (j, similarity) in candidates {
            rows.push(Neighbor {
                rule: names[i].clone(),
                similar_rule: names[j].clone(),
                similarity: round3(similarity),
            });
        }
    }
    Ok((matrix, rows.into()))
}

fn round3(x: f32) -> f32 {
    (x * 1000.0).round() / 1000.0
}
