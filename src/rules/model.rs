use std::fmt::Display;

use derive_more::{AsRef, Deref, DerefMut, Display, From, FromStr, IntoIterator};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cluster::ClusterId;

/// The name identifying a rule within a dataset.
///
/// Uniqueness is assumed, not enforced: duplicate names make the
/// similarity matrix and neighbor report ambiguous to join against,
/// which is a documented limitation of the tool.
#[derive(
    Default,
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Hash,
    Display,
    Serialize,
    Deserialize,
    AsRef,
    From,
    FromStr,
)]
#[as_ref(str, [u8], String)]
#[serde(transparent)]
pub struct RuleName {
    inner: String,
}

impl From<&str> for RuleName {
    fn from(value: &str) -> Self {
        Self {
            inner: value.to_owned(),
        }
    }
}

/// A rule body: an arbitrary nested JSON-like value (object, array or
/// scalar), possibly supplied pre-serialized as a string. The wrapped
/// [`serde_json::Value`] is the closed tagged union the canonicalizer
/// recurses over; key order is preserved as parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(transparent)]
pub struct RuleBody {
    inner: Value,
}

impl RuleBody {
    pub fn value(&self) -> &Value {
        &self.inner
    }

    /// Render the body the way it appeared in the input: raw for a
    /// plain string, compact JSON for everything else.
    pub fn to_column_string(&self) -> String {
        match &self.inner {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl From<&str> for RuleBody {
    fn from(value: &str) -> Self {
        Self {
            inner: Value::String(value.to_owned()),
        }
    }
}

/// The flat, deterministic text derived from a rule body. This is the
/// unit of text handed to the embedding model and the token source for
/// cluster labels.
#[derive(
    Default, Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize, AsRef, From,
)]
#[as_ref(str, [u8], String)]
#[serde(transparent)]
pub struct CanonicalText {
    inner: String,
}

impl From<&str> for CanonicalText {
    fn from(value: &str) -> Self {
        Self {
            inner: value.to_owned(),
        }
    }
}

/// One named rule as ingested. `extras` carries any input columns
/// beyond the two required ones, in input order, so the augmented
/// export can reproduce them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: RuleName,
    pub body: RuleBody,
    #[serde(default)]
    pub extras: Vec<(String, Value)>,
}

impl Rule {
    pub fn new<N, B>(name: N, body: B) -> Self
    where
        N: Into<RuleName>,
        B: Into<RuleBody>,
    {
        Self {
            name: name.into(),
            body: body.into(),
            extras: Vec::new(),
        }
    }
}

/// An ingested rule dataset, in input row order.
#[derive(
    Debug, Clone, Serialize, Deserialize, Default, IntoIterator, From, AsRef, Deref, DerefMut,
    PartialEq,
)]
#[deref(forward)]
#[deref_mut(forward)]
#[as_ref(forward)]
pub struct Rules(Vec<Rule>);

impl Rules {
    pub fn push(&mut self, value: Rule) {
        self.0.push(value)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn names(&self) -> Vec<RuleName> {
        self.0.iter().map(|r| r.name.clone()).collect()
    }
}

/// A rule after the pipeline has run: the original record plus the
/// derived `text_rule`, `cluster_id` and `cluster_label` columns.
/// Stages build these fresh rather than mutating a shared table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedRule {
    pub name: RuleName,
    pub body: RuleBody,
    pub extras: Vec<(String, Value)>,
    pub text_rule: CanonicalText,
    pub cluster_id: ClusterId,
    pub cluster_label: String,
}

/// The augmented record set, aligned row-for-row with the input rules.
#[derive(
    Debug, Clone, Serialize, Deserialize, Default, IntoIterator, From, AsRef, Deref, PartialEq,
)]
#[deref(forward)]
#[as_ref(forward)]
pub struct AnalyzedRules(Vec<AnalyzedRule>);

impl AnalyzedRules {
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for AnalyzedRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for rule in &self.0 {
            writeln!(
                f,
                "{} [cluster {}: {}]",
                rule.name, rule.cluster_id, rule.cluster_label
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_rule_name_from_str() {
        let name = RuleName::from("R1");
        let as_str: &str = name.as_ref();
        assert_eq!(as_str, "R1");
        assert_eq!(format!("{}", name), "R1");
    }

    #[test]
    fn test_rule_body_column_string_raw_for_strings() {
        let body = RuleBody::from("{bad json");
        assert_eq!(body.to_column_string(), "{bad json");
    }

    #[test]
    fn test_rule_body_column_string_compact_json() {
        let body = RuleBody::from(json!({"age": ">18"}));
        assert_eq!(body.to_column_string(), r#"{"age":">18"}"#);
    }

    #[test]
    fn test_rules_collection() {
        let mut rules = Rules::default();
        rules.push(Rule::new("R1", json!({"a": 1})));
        rules.push(Rule::new("R2", json!({"b": 2})));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.names(), vec![RuleName::from("R1"), RuleName::from("R2")]);
    }
}
