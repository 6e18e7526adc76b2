use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::rules::model::AnalyzedRules;
use crate::rules::similarity::NeighborReport;

/// Write the augmented rule table: the original columns plus
/// `text_rule`, `cluster_id` and `cluster_label`, one row per rule.
pub fn write_rule_table(rules: &AnalyzedRules, output_path: PathBuf) -> Result<PathBuf> {
    let extra_columns = extra_columns(rules);

    let mut header = vec!["rulename".to_owned(), "rule_json".to_owned()];
    header.extend(extra_columns.iter().cloned());
    header.extend(
        ["text_rule", "cluster_id", "cluster_label"]
            .into_iter()
            .map(str::to_owned),
    );

    let rows = rules.iter().map(|rule| {
        let mut row = vec![
            rule.name.to_string(),
            rule.body.to_column_string(),
        ];
        for column in &extra_columns {
            row.push(
                rule.extras
                    .iter()
                    .find(|(k, _)| k == column)
                    .map(|(_, v)| value_to_cell(v))
                    .unwrap_or_default(),
            );
        }
        row.push(rule.text_rule.to_string());
        row.push(rule.cluster_id.to_string());
        row.push(rule.cluster_label.clone());
        row
    });

    write_delimited(&header, rows, &output_path).with_context(|| "write_rule_table()")?;
    Ok(output_path)
}

/// Write the `(rule, similar_rule, similarity)` neighbor table.
pub fn write_neighbor_report(report: &NeighborReport, output_path: PathBuf) -> Result<PathBuf> {
    let header = ["rule", "similar_rule", "similarity"].map(str::to_owned);
    let rows = report.iter().map(|n| {
        vec![
            n.rule.to_string(),
            n.similar_rule.to_string(),
            n.similarity.to_string(),
        ]
    });
    write_delimited(&header, rows, &output_path).with_context(|| "write_neighbor_report()")?;
    Ok(output_path)
}

/// Write the duplicate table: neighbor rows at or above `threshold`,
/// sorted by descending similarity.
pub fn write_duplicates(
    report: &NeighborReport,
    threshold: f32,
    output_path: PathBuf,
) -> Result<PathBuf> {
    write_neighbor_report(&report.at_least(threshold), output_path)
        .with_context(|| "write_duplicates()")
}

/// Union of extra-column names across rows, in first-seen order.
fn extra_columns(rules: &AnalyzedRules) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for rule in rules.iter() {
        for (key, _) in &rule.extras {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn value_to_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_delimited<R>(header: &[String], rows: R, output_path: &Path) -> Result<()>
where
    R: Iterator<Item = Vec<String>>,
{
    let file = File::create(output_path)
        .with_context(|| format!("write_delimited({})", output_path.display()))?;
    let mut out = BufWriter::new(file);

    writeln!(out, "{}", join_record(header))?;
    for row in rows {
        writeln!(out, "{}", join_record(&row))?;
    }
    out.flush()?;
    Ok(())
}

fn join_record(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| quote_field(f))
        .collect::<Vec<Cow<'_, str>>>()
        .join(",")
}

/// Quote a field when it contains the delimiter, a quote or a line
/// break, doubling embedded quotes.
fn quote_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::rules::cluster::ClusterId;
    use crate::rules::model::{AnalyzedRule, CanonicalText, RuleBody, RuleName};
    use crate::rules::similarity::Neighbor;

    fn analyzed(name: &str, body: serde_json::Value, cluster: usize) -> AnalyzedRule {
        AnalyzedRule {
            name: RuleName::from(name),
            body: RuleBody::from(body),
            extras: Vec::new(),
            text_rule: CanonicalText::from("age:>18"),
            cluster_id: ClusterId::from(cluster),
            cluster_label: "18, age".to_owned(),
        }
    }

    fn neighbors() -> NeighborReport {
        NeighborReport::from(vec![
            Neighbor {
                rule: RuleName::from("R1"),
                similar_rule: RuleName::from("R2"),
                similarity: 0.95,
            },
            Neighbor {
                rule: RuleName::from("R2"),
                similar_rule: RuleName::from("R3"),
                similarity: 0.88,
            },
            Neighbor {
                rule: RuleName::from("R3"),
                similar_rule: RuleName::from("R1"),
                similarity: 0.99,
            },
        ])
    }

    #[test]
    fn test_rule_table_layout() {
        let dir = tempfile::tempdir().unwrap();
        let rules = AnalyzedRules::from(vec![
            analyzed("R1", json!({"age": ">18"}), 0),
            analyzed("R2", json!({"age": ">18"}), 0),
        ]);
        let path = write_rule_table(&rules, dir.path().join("rules.csv")).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "rulename,rule_json,text_rule,cluster_id,cluster_label"
        );
        assert_eq!(lines[1], "R1,\"{\"\"age\"\":\"\">18\"\"}\",age:>18,0,\"18, age\"");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_rule_table_carries_extras() {
        let dir = tempfile::tempdir().unwrap();
        let mut rule = analyzed("R1", json!("x"), 0);
        rule.extras = vec![("owner".to_owned(), json!("ops"))];
        let rules = AnalyzedRules::from(vec![rule, analyzed("R2", json!("y"), 1)]);
        let path = write_rule_table(&rules, dir.path().join("rules.csv")).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "rulename,rule_json,owner,text_rule,cluster_id,cluster_label"
        );
        assert!(lines[1].starts_with("R1,x,ops,"));
        // The second row has no owner cell content.
        assert!(lines[2].starts_with("R2,y,,"));
    }

    #[test]
    fn test_neighbor_report_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_neighbor_report(&neighbors(), dir.path().join("report.csv")).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "rule,similar_rule,similarity");
        assert_eq!(lines[1], "R1,R2,0.95");
        assert_eq!(lines.len(), 4);
    }

    /// Scenario C: the 0.9 threshold keeps 0.95 and 0.99, descending.
    #[test]
    fn test_duplicates_filtered_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_duplicates(&neighbors(), 0.9, dir.path().join("dups.csv")).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "R3,R1,0.99");
        assert_eq!(lines[2], "R1,R2,0.95");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_field("plain"), "plain");
        assert_eq!(quote_field("a,b"), "\"a,b\"");
        assert_eq!(quote_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(quote_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_empty_report_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path =
            write_neighbor_report(&NeighborReport::default(), dir.path().join("empty.csv"))
                .unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content, "rule,similar_rule,similarity\n");
    }
}
