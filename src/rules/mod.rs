//! The analysis pipeline: canonicalize, embed, then derive the
//! similarity report, clusters and 2-D projection from the shared
//! embedding matrix. The three downstream stages are independent of
//! each other; each returns a fresh value instead of mutating a
//! shared table.

pub mod canon;
pub mod cluster;
pub mod dataset;
pub mod embeddings;
pub mod model;
pub mod project;
pub mod similarity;

use anyhow::{Context, Result};
use tch::Device;

use cluster::{ClusterLabels, DbscanEpsilon};
use embeddings::{Embeddings, RuleEncoder, SentenceEmbeddingsModelType};
use model::{AnalyzedRule, AnalyzedRules, CanonicalText, Rules};
use project::Projection;
use similarity::{NeighborReport, SimilarityMatrix, TopK};

/// Knobs for one analysis run.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisOptions {
    pub top_k: TopK,
    pub epsilon: DbscanEpsilon,
    pub model_type: SentenceEmbeddingsModelType,
    pub device: Device,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            top_k: TopK::default(),
            epsilon: DbscanEpsilon::default(),
            model_type: SentenceEmbeddingsModelType::default(),
            device: Device::Cpu,
        }
    }
}

/// Everything one run derives from a dataset, handed to the
/// presentation layer as a bundle. The projection is aligned by row
/// index with `rules`.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub rules: AnalyzedRules,
    pub similarity: SimilarityMatrix,
    pub neighbors: NeighborReport,
    pub cluster_labels: ClusterLabels,
    pub projection: Projection,
}

/// Flatten every rule body to its canonical text, in row order.
pub fn canonicalize(rules: &Rules) -> Vec<CanonicalText> {
    rules.iter().map(|r| canon::flatten(&r.body)).collect()
}

/// Run the full pipeline: load the model, encode, and derive all
/// downstream products. Model load failure is fatal and not retried.
pub fn analyze(rules: Rules, options: &AnalysisOptions) -> Result<Analysis> {
    let texts = canonicalize(&rules);
    let encoder =
        RuleEncoder::new(options.device, options.model_type).with_context(|| "analyze()")?;
    let embeddings = encoder.encode(&texts).with_context(|| "analyze()")?;
    analyze_embedded(rules, texts, embeddings, options)
}

/// The post-embedding half of the pipeline, split out so it can run
/// against any unit-row embedding matrix.
pub fn analyze_embedded(
    rules: Rules,
    texts: Vec<CanonicalText>,
    embeddings: Embeddings,
    options: &AnalysisOptions,
) -> Result<Analysis> {
    let names = rules.names();

    let (similarity, neighbors) = similarity::report(&names, &embeddings, options.top_k)
        .with_context(|| "analyze_embedded()")?;
    let (assignments, cluster_labels) = cluster::cluster(&texts, &embeddings, options.epsilon)
        .with_context(|| "analyze_embedded()")?;
    let projection = project::project(&embeddings).with_context(|| "analyze_embedded()")?;

    let analyzed = rules
        .into_iter()
        .zip(texts)
        .enumerate()
        .map(|(row, (rule, text_rule))| {
            let cluster_id = assignments.get(row).unwrap_or_default();
            AnalyzedRule {
                name: rule.name,
                body: rule.body,
                extras: rule.extras,
                text_rule,
                cluster_id,
                cluster_label: cluster_labels.label_of(cluster_id).to_owned(),
            }
        })
        .collect::<Vec<AnalyzedRule>>();

    Ok(Analysis {
        rules: analyzed.into(),
        similarity,
        neighbors,
        cluster_labels,
        projection,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::rules::model::{Rule, RuleName};

    fn unit(v: Vec<f32>) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.into_iter().map(|x| x / norm).collect()
    }

    /// Scenario A with a synthetic unit-row matrix standing in for the
    /// model: identical rule bodies get identical vectors.
    #[test]
    fn test_identical_rules_are_duplicates_in_one_cluster() {
        let mut rules = Rules::default();
        rules.push(Rule::new("R1", json!({"age": ">18"})));
        rules.push(Rule::new("R2", json!({"age": ">18"})));
        let texts = canonicalize(&rules);
        assert_eq!(
            texts,
            vec![
                CanonicalText::from("age:>18"),
                CanonicalText::from("age:>18")
            ]
        );

        let embeddings = Embeddings::from(vec![
            unit(vec![0.3, 0.7, 0.1]),
            unit(vec![0.3, 0.7, 0.1]),
        ]);
        let analysis =
            analyze_embedded(rules, texts, embeddings, &AnalysisOptions::default()).unwrap();

        let sim = analysis
            .similarity
            .get(&RuleName::from("R1"), &RuleName::from("R2"))
            .unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
        assert_eq!(
            analysis.rules[0].cluster_id,
            analysis.rules[1].cluster_id
        );
        assert_eq!(analysis.rules[0].cluster_label, "18, age");
        assert_eq!(analysis.projection.len(), 2);
    }

    /// Scenario D: a single-rule dataset degrades without error.
    #[test]
    fn test_single_rule_dataset() {
        let mut rules = Rules::default();
        rules.push(Rule::new("R1", json!({"age": ">18"})));
        let texts = canonicalize(&rules);
        let embeddings = Embeddings::from(vec![unit(vec![1.0, 2.0])]);

        let analysis =
            analyze_embedded(rules, texts, embeddings, &AnalysisOptions::default()).unwrap();
        assert!(analysis.neighbors.is_empty());
        assert_eq!(analysis.cluster_labels.len(), 1);
        assert_eq!(analysis.rules.len(), 1);
        assert_eq!(analysis.projection.len(), 1);
    }

    #[test]
    fn test_empty_dataset() {
        let analysis = analyze_embedded(
            Rules::default(),
            Vec::new(),
            Embeddings::default(),
            &AnalysisOptions::default(),
        )
        .unwrap();
        assert!(analysis.rules.is_empty());
        assert!(analysis.neighbors.is_empty());
        assert!(analysis.cluster_labels.is_empty());
        assert!(analysis.projection.is_empty());
    }

    #[test]
    fn test_rows_stay_aligned_across_stages() {
        let mut rules = Rules::default();
        rules.push(Rule::new("A", json!({"x": 1})));
        rules.push(Rule::new("B", json!({"y": 2})));
        rules.push(Rule::new("C", json!({"x": 1})));
        let texts = canonicalize(&rules);
        let embeddings = Embeddings::from(vec![
            unit(vec![1.0, 0.0]),
            unit(vec![0.0, 1.0]),
            unit(vec![1.0, 0.0]),
        ]);

        let analysis =
            analyze_embedded(rules, texts, embeddings, &AnalysisOptions::default()).unwrap();
        assert_eq!(analysis.rules.len(), 3);
        assert_eq!(analysis.rules[0].name, RuleName::from("A"));
        assert_eq!(analysis.rules[2].name, RuleName::from("C"));
        // A and C embed identically, so they share a cluster.
        assert_eq!(analysis.rules[0].cluster_id, analysis.rules[2].cluster_id);
        assert_ne!(analysis.rules[0].cluster_id, analysis.rules[1].cluster_id);
        assert_eq!(analysis.projection.len(), 3);
    }
}
