use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result, anyhow};
use derive_more::{AsMut, AsRef, Deref, DerefMut, Display, From, Into, IntoIterator};
use serde::{Deserialize, Serialize};

use super::embeddings::Embeddings;
use super::model::CanonicalText;

/// How many tokens a cluster label carries.
const LABEL_TOKENS: usize = 3;

/// Simple newtype wrapper around a cluster id. Ids are dense and
/// assigned in the order clusters are discovered; with a minimum
/// cluster size of one there is no reserved noise id.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Copy,
    From,
    Into,
    Default,
    AsRef,
    AsMut,
    Deref,
    DerefMut,
    Display,
    Serialize,
    Deserialize,
)]
pub struct ClusterId(usize);

/// Newtype for epsilon (the DBSCAN neighborhood radius over cosine
/// distance) which enforces the invariant that it's >= 0.0.
#[derive(
    Debug, Copy, Clone, PartialEq, PartialOrd, Into, AsRef, Deref, Serialize, Deserialize, Display,
)]
pub struct DbscanEpsilon(f32);

impl DbscanEpsilon {
    pub const MIN: DbscanEpsilon = DbscanEpsilon(0.0);
    pub const DEFAULT: DbscanEpsilon = DbscanEpsilon(0.25);

    /// Attempt to create a new value from the given `f32`, ensuring
    /// invariants (notably, epsilon >= 0.0) are observed.
    pub fn try_new(epsilon: f32) -> Result<Self> {
        if epsilon >= Self::MIN.0 {
            Ok(Self(epsilon))
        } else {
            Err(anyhow!(
                "invalid value {}; must be >= {}",
                epsilon,
                Self::MIN
            ))
        }
    }
}

impl Default for DbscanEpsilon {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<f32> for DbscanEpsilon {
    type Error = anyhow::Error;

    fn try_from(value: f32) -> std::result::Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

/// One cluster id per rule, aligned by row with the input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, From, Into, IntoIterator)]
#[serde(transparent)]
pub struct ClusterAssignments(Vec<ClusterId>);

impl ClusterAssignments {
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, ClusterId> {
        self.0.iter()
    }
    pub fn get(&self, row: usize) -> Option<ClusterId> {
        self.0.get(row).copied()
    }
    /// Distinct cluster count.
    pub fn num_clusters(&self) -> usize {
        self.0.iter().collect::<BTreeSet<_>>().len()
    }
}

/// Mapping of cluster ids to their short human-readable labels,
/// ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, From, Into, IntoIterator)]
#[serde(transparent)]
pub struct ClusterLabels(BTreeMap<ClusterId, String>);

impl ClusterLabels {
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, ClusterId, String> {
        self.0.iter()
    }
    /// The label for a cluster; a cluster with no members yields the
    /// empty string rather than an error.
    pub fn label_of(&self, id: ClusterId) -> &str {
        self.0.get(&id).map_or("", |s| s.as_str())
    }
}

/// Assign every rule to a density-based cluster over cosine distance
/// and derive a token label per cluster.
///
/// With a minimum cluster size of one, DBSCAN reduces to connected
/// components of the epsilon-neighborhood graph: every point is a core
/// point and none is noise. A rule with no neighbor within epsilon
/// becomes a singleton cluster. Ids are assigned in discovery order,
/// scanning rows in input order.
pub fn cluster(
    texts: &[CanonicalText],
    embeddings: &Embeddings,
    epsilon: DbscanEpsilon,
) -> Result<(ClusterAssignments, ClusterLabels)> {
    if texts.len() != embeddings.len() {
        return Err(anyhow!(
            "{} canonical texts for {} embedding rows",
            texts.len(),
            embeddings.len()
        ));
    }
    let assignments = cluster_embeddings(embeddings, epsilon).with_context(|| "cluster()")?;
    let labels = label_clusters(texts, &assignments);
    Ok((assignments, labels))
}

fn cluster_embeddings(
    embeddings: &Embeddings,
    epsilon: DbscanEpsilon,
) -> Result<ClusterAssignments> {
    let n = embeddings.len();
    if n == 0 {
        return Ok(ClusterAssignments::default());
    }

    let matrix = embeddings
        .as_ndarray()
        .with_context(|| "cluster_embeddings()")?;
    let similarities = matrix.dot(&matrix.t());
    let eps: f32 = epsilon.into();

    let mut assigned: Vec<Option<ClusterId>> = vec![None; n];
    let mut next_id: usize = 0;
    for seed in 0..n {
        if assigned[seed].is_some() {
            continue;
        }
        let id = ClusterId::from(next_id);
        next_id += 1;

        // Expand the component reachable from the seed.
        let mut stack = vec![seed];
        assigned[seed] = Some(id);
        while let Some(current) = stack.pop() {
            for other in 0..n {
                if assigned[other].is_none() && 1.0 - similarities[[current, other]] <= eps {
                    assigned[other] = Some(id);
                    stack.push(other);
                }
            }
        }
    }

    // Every slot was filled by the scan above.
    let ids = assigned.into_iter().flatten().collect::<Vec<ClusterId>>();
    Ok(ids.into())
}

/// Derive labels: token counts summed over each cluster's member
/// texts, against a vocabulary fit over all texts; top tokens by
/// count, ties broken alphabetically, joined with ", ".
fn label_clusters(texts: &[CanonicalText], assignments: &ClusterAssignments) -> ClusterLabels {
    let vocabulary = TokenVocabulary::fit(texts);

    let mut members: BTreeMap<ClusterId, Vec<&CanonicalText>> = BTreeMap::new();
    for (row, id) in assignments.iter().enumerate() {
        members.entry(*id).or_default().push(&texts[row]);
    }

    let labels = members
        .into_iter()
        .map(|(id, texts)| (id, vocabulary.top_tokens(&texts, LABEL_TOKENS)))
        .collect::<BTreeMap<ClusterId, String>>();
    ClusterLabels::from(labels)
}

/// Bag-of-words vocabulary over canonical texts: lowercased
/// alphanumeric tokens of length >= 2, English stop-words removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenVocabulary(BTreeSet<String>);

impl TokenVocabulary {
    pub fn fit(texts: &[CanonicalText]) -> Self {
        Self(
            texts
                .iter()
                .flat_map(|t| tokenize(t.as_ref()))
                .collect::<BTreeSet<String>>(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum token counts over the given texts and take the `top_n`
    /// most frequent in-vocabulary tokens, joined with ", ". An empty
    /// member set yields an empty string.
    pub fn top_tokens(&self, texts: &[&CanonicalText], top_n: usize) -> String {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for text in texts {
            for token in tokenize(text.as_ref()) {
                if let Some(known) = self.0.get(&token) {
                    *counts.entry(known.as_str()).or_default() += 1;
                }
            }
        }

        // BTreeMap iteration is alphabetical; the stable sort keeps
        // that order among equal counts.
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
        ranked
            .into_iter()
            .take(top_n)
            .map(|(token, _)| token)
            .collect::<Vec<&str>>()
            .join(", ")
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .filter(|w| !STOP_WORDS.contains(w))
        .map(|w| w.to_owned())
        .collect()
}

/// English stop words filtered out of cluster labels.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "it", "in", "on", "of", "to", "and", "or", "for", "with", "this",
    "that", "be", "are", "was", "were", "been", "being", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "can", "shall", "not", "no",
    "but", "if", "at", "by", "from", "as", "into", "about", "up", "out", "so", "its", "you",
    "your", "i", "my", "we", "our", "they", "them", "their", "he", "she", "his", "her", "all",
    "any", "each", "which", "what", "when", "where", "who", "how", "than", "then", "there",
    "these", "those", "only", "over", "under", "again", "more", "most", "other", "some", "such",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(v: Vec<f32>) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.into_iter().map(|x| x / norm).collect()
    }

    fn texts(texts: &[&str]) -> Vec<CanonicalText> {
        texts.iter().map(|t| CanonicalText::from(*t)).collect()
    }

    #[test]
    fn test_epsilon_checked() {
        assert!(DbscanEpsilon::try_new(1.0).is_ok());
        assert!(DbscanEpsilon::try_new(0.0).is_ok());
        assert!(DbscanEpsilon::try_new(-0.1).is_err());
        assert_eq!(DbscanEpsilon::default(), DbscanEpsilon::DEFAULT);
    }

    #[test]
    fn test_identical_rules_share_a_cluster() {
        let embeddings = Embeddings::from(vec![
            unit(vec![1.0, 0.0]),
            unit(vec![1.0, 0.0]),
            unit(vec![0.0, 1.0]),
        ]);
        let (assignments, _) = cluster(
            &texts(&["age:>18", "age:>18", "country:US"]),
            &embeddings,
            DbscanEpsilon::default(),
        )
        .unwrap();
        assert_eq!(assignments.get(0), assignments.get(1));
        assert_ne!(assignments.get(0), assignments.get(2));
        assert_eq!(assignments.num_clusters(), 2);
    }

    #[test]
    fn test_every_rule_gets_exactly_one_cluster() {
        let embeddings = Embeddings::from(vec![
            unit(vec![1.0, 0.0, 0.0]),
            unit(vec![0.0, 1.0, 0.0]),
            unit(vec![0.0, 0.0, 1.0]),
        ]);
        let (assignments, _) = cluster(
            &texts(&["a1 b1", "a2 b2", "a3 b3"]),
            &embeddings,
            DbscanEpsilon::default(),
        )
        .unwrap();
        assert_eq!(assignments.len(), 3);
        // Orthogonal vectors are all farther than epsilon apart, so
        // each point forms a singleton cluster instead of noise.
        assert_eq!(assignments.num_clusters(), 3);
    }

    #[test]
    fn test_ids_assigned_in_discovery_order() {
        let embeddings = Embeddings::from(vec![
            unit(vec![1.0, 0.0]),
            unit(vec![0.0, 1.0]),
            unit(vec![1.0, 0.0]),
        ]);
        let (assignments, _) = cluster(
            &texts(&["x", "y", "x"]),
            &embeddings,
            DbscanEpsilon::default(),
        )
        .unwrap();
        assert_eq!(assignments.get(0), Some(ClusterId::from(0)));
        assert_eq!(assignments.get(1), Some(ClusterId::from(1)));
        assert_eq!(assignments.get(2), Some(ClusterId::from(0)));
    }

    #[test]
    fn test_transitive_chains_merge() {
        // b is within epsilon of both a and c; a and c are not direct
        // neighbors but land in one component through b.
        let embeddings = Embeddings::from(vec![
            unit(vec![1.0, 0.0]),
            unit(vec![1.0, 0.55]),
            unit(vec![1.0, 1.15]),
        ]);
        let (assignments, _) = cluster(
            &texts(&["a", "b", "c"]),
            &embeddings,
            DbscanEpsilon::default(),
        )
        .unwrap();
        assert_eq!(assignments.num_clusters(), 1);
    }

    #[test]
    fn test_labels_use_top_tokens() {
        let embeddings = Embeddings::from(vec![
            unit(vec![1.0, 0.0]),
            unit(vec![1.0, 0.0]),
        ]);
        let (assignments, labels) = cluster(
            &texts(&["action:deny port:22", "action:deny port:443"]),
            &embeddings,
            DbscanEpsilon::default(),
        )
        .unwrap();
        assert_eq!(assignments.num_clusters(), 1);
        // "action", "deny" and "port" all appear twice; the tie breaks
        // alphabetically.
        assert_eq!(labels.label_of(ClusterId::from(0)), "action, deny, port");
    }

    #[test]
    fn test_label_of_unknown_cluster_is_empty() {
        let labels = ClusterLabels::default();
        assert_eq!(labels.label_of(ClusterId::from(7)), "");
    }

    #[test]
    fn test_stop_words_and_short_tokens_excluded() {
        let vocabulary = TokenVocabulary::fit(&texts(&["the user is in a group"]));
        let text = CanonicalText::from("the user is in a group");
        assert_eq!(vocabulary.top_tokens(&[&text], 3), "group, user");
    }

    #[test]
    fn test_empty_input_yields_empty_outputs() {
        let (assignments, labels) =
            cluster(&[], &Embeddings::default(), DbscanEpsilon::default()).unwrap();
        assert!(assignments.is_empty());
        assert!(labels.is_empty());
    }

    #[test]
    fn test_single_rule_forms_its_own_cluster() {
        let embeddings = Embeddings::from(vec![unit(vec![1.0, 0.0])]);
        let (assignments, labels) = cluster(
            &texts(&["age:>18"]),
            &embeddings,
            DbscanEpsilon::default(),
        )
        .unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments.get(0), Some(ClusterId::from(0)));
        assert_eq!(labels.label_of(ClusterId::from(0)), "18, age");
    }
}
