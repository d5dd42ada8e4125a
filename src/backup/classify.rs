// ABOUTME: Size-threshold table classification for the two dump phases
// ABOUTME: Splits tables into fully dumped and schema-only partitions

use std::collections::HashSet;
use std::future::Future;

use crate::error::Result;

/// Condition used when no always-empty predicate is configured.
///
/// Nothing matches it, so its negation leaves the size query unrestricted.
pub const NEVER_MATCHES: &str = "1=0";

/// Size metadata for one table, as reported by `information_schema`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSizeInfo {
    pub name: String,
    pub size_mb: f64,
}

impl TableSizeInfo {
    pub fn new(name: impl Into<String>, size_mb: f64) -> Self {
        Self {
            name: name.into(),
            size_mb,
        }
    }
}

/// Inputs deciding which tables keep their data.
#[derive(Debug, Clone, Default)]
pub struct ClassificationPolicy {
    /// Tables strictly larger than this are dumped schema-only.
    pub max_size_mb: f64,
    /// Tables exempt from the size threshold.
    pub force_include: HashSet<String>,
    /// SQL condition over `information_schema.TABLES` columns.
    ///
    /// Evaluated by the server and passed through verbatim. This is trusted
    /// operator input and is never parsed or sanitized.
    pub always_empty_predicate: Option<String>,
}

/// The two table partitions of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationResult {
    pub full_tables: Vec<String>,
    pub empty_tables: Vec<String>,
    pub total_full_size_mb: f64,
}

impl ClassificationResult {
    pub fn is_empty(&self) -> bool {
        self.full_tables.is_empty() && self.empty_tables.is_empty()
    }

    /// Estimated uncompressed size of the full partition, in bytes.
    pub fn total_full_size_bytes(&self) -> u64 {
        (self.total_full_size_mb * 1024.0 * 1024.0).round() as u64
    }
}

/// Table metadata queries the classifier needs from the server.
pub trait MetadataSource {
    /// List every table of `schema` for which `excluded_by` does not hold,
    /// with its data plus index size in MB.
    fn table_sizes(
        &self,
        schema: &str,
        excluded_by: &str,
    ) -> impl Future<Output = Result<Vec<TableSizeInfo>>> + Send;

    /// List the tables of `schema` for which `predicate` holds.
    fn tables_matching(
        &self,
        schema: &str,
        predicate: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// Partition `tables` by size alone.
///
/// A table goes to the schema-only set when it is strictly over the limit and
/// not force-included; a table exactly at the limit keeps its data.
pub fn classify(tables: &[TableSizeInfo], policy: &ClassificationPolicy) -> ClassificationResult {
    let mut result = ClassificationResult::default();

    for table in tables {
        if table.size_mb > policy.max_size_mb && !policy.force_include.contains(&table.name) {
            result.empty_tables.push(table.name.clone());
        } else {
            result.full_tables.push(table.name.clone());
            result.total_full_size_mb += table.size_mb;
        }
    }

    result
}

/// Classify every table of `schema`, letting the server evaluate the
/// always-empty predicate first.
///
/// Predicate matches are pre-seeded into the schema-only set and the size
/// query negates the same predicate, so no table is evaluated twice. Without a
/// predicate no match query is issued and the size query negates
/// [`NEVER_MATCHES`], which lists every table.
pub async fn classify_schema<M>(
    source: &M,
    schema: &str,
    policy: &ClassificationPolicy,
) -> Result<ClassificationResult>
where
    M: MetadataSource + Sync,
{
    let (predicate, forced_empty) = match policy.always_empty_predicate.as_deref() {
        Some(predicate) => {
            let matched = source.tables_matching(schema, predicate).await?;
            tracing::debug!(
                "{} table(s) match the always-empty predicate",
                matched.len()
            );
            (predicate, matched)
        }
        None => (NEVER_MATCHES, Vec::new()),
    };

    let seeded: HashSet<&str> = forced_empty.iter().map(String::as_str).collect();
    let remaining: Vec<TableSizeInfo> = source
        .table_sizes(schema, predicate)
        .await?
        .into_iter()
        .filter(|table| !seeded.contains(table.name.as_str()))
        .collect();

    let mut result = classify(&remaining, policy);
    let mut empty_tables = forced_empty;
    empty_tables.append(&mut result.empty_tables);
    result.empty_tables = empty_tables;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackupError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Stands in for the server: predicates are looked up instead of evaluated.
    #[derive(Default)]
    struct FakeSchema {
        tables: Vec<TableSizeInfo>,
        matches: HashMap<String, Vec<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSchema {
        fn new(tables: &[(&str, f64)]) -> Self {
            Self {
                tables: tables
                    .iter()
                    .map(|(name, size)| TableSizeInfo::new(*name, *size))
                    .collect(),
                ..Default::default()
            }
        }

        fn with_match(mut self, predicate: &str, names: &[&str]) -> Self {
            self.matches.insert(
                predicate.to_string(),
                names.iter().map(|n| n.to_string()).collect(),
            );
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl MetadataSource for FakeSchema {
        async fn table_sizes(&self, _schema: &str, excluded_by: &str) -> Result<Vec<TableSizeInfo>> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("sizes NOT ({})", excluded_by));
            let excluded = self.matches.get(excluded_by).cloned().unwrap_or_default();
            Ok(self
                .tables
                .iter()
                .filter(|t| !excluded.contains(&t.name))
                .cloned()
                .collect())
        }

        async fn tables_matching(&self, _schema: &str, predicate: &str) -> Result<Vec<String>> {
            self.calls.lock().unwrap().push(format!("match ({})", predicate));
            if predicate == "syntax error" {
                return Err(BackupError::query(
                    "Failed to list tables matching predicate",
                    sqlx::Error::Protocol("You have an error in your SQL syntax".into()),
                ));
            }
            Ok(self.matches.get(predicate).cloned().unwrap_or_default())
        }
    }

    fn policy(max_size_mb: f64, force: &[&str], predicate: Option<&str>) -> ClassificationPolicy {
        ClassificationPolicy {
            max_size_mb,
            force_include: force.iter().map(|s| s.to_string()).collect(),
            always_empty_predicate: predicate.map(str::to_string),
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classify_splits_on_threshold() {
        let tables = vec![
            TableSizeInfo::new("a", 10.0),
            TableSizeInfo::new("b", 600.0),
            TableSizeInfo::new("c", 5.0),
        ];
        let result = classify(&tables, &policy(512.0, &[], None));

        assert_eq!(result.full_tables, names(&["a", "c"]));
        assert_eq!(result.empty_tables, names(&["b"]));
        assert_eq!(result.total_full_size_mb, 15.0);
    }

    #[test]
    fn test_classify_threshold_is_inclusive() {
        let tables = vec![
            TableSizeInfo::new("at_limit", 512.0),
            TableSizeInfo::new("over", 512.01),
        ];
        let result = classify(&tables, &policy(512.0, &[], None));

        assert_eq!(result.full_tables, names(&["at_limit"]));
        assert_eq!(result.empty_tables, names(&["over"]));
    }

    #[test]
    fn test_classify_force_include_overrides_size() {
        let tables = vec![
            TableSizeInfo::new("a", 10.0),
            TableSizeInfo::new("b", 600.0),
            TableSizeInfo::new("c", 5.0),
        ];
        let result = classify(&tables, &policy(512.0, &["b"], None));

        assert_eq!(result.full_tables, names(&["a", "b", "c"]));
        assert!(result.empty_tables.is_empty());
        assert_eq!(result.total_full_size_mb, 615.0);
    }

    #[test]
    fn test_classify_empty_input() {
        let result = classify(&[], &policy(512.0, &["x"], None));
        assert!(result.is_empty());
        assert_eq!(result.total_full_size_mb, 0.0);
    }

    #[test]
    fn test_classify_partitions_exactly() {
        let sizes = [0.0, 1.5, 99.99, 100.0, 100.01, 2048.0, 7.25, 100.0];
        let tables: Vec<TableSizeInfo> = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| TableSizeInfo::new(format!("t{}", i), *size))
            .collect();

        for max in [0.0, 50.0, 100.0, 5000.0] {
            let result = classify(&tables, &policy(max, &["t5"], None));

            assert_eq!(
                result.full_tables.len() + result.empty_tables.len(),
                tables.len()
            );
            for table in &tables {
                let in_full = result.full_tables.contains(&table.name);
                let in_empty = result.empty_tables.contains(&table.name);
                assert!(in_full ^ in_empty, "{} must be in exactly one set", table.name);
            }

            let expected: f64 = tables
                .iter()
                .filter(|t| result.full_tables.contains(&t.name))
                .map(|t| t.size_mb)
                .sum();
            assert!((result.total_full_size_mb - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_total_full_size_bytes() {
        let result = ClassificationResult {
            full_tables: names(&["a"]),
            empty_tables: vec![],
            total_full_size_mb: 1.5,
        };
        assert_eq!(result.total_full_size_bytes(), 1_572_864);
    }

    #[tokio::test]
    async fn test_classify_schema_without_predicate_lists_every_table() {
        let schema = FakeSchema::new(&[("a", 10.0), ("b", 600.0), ("c", 5.0)]);
        let result = classify_schema(&schema, "shop", &policy(512.0, &[], None))
            .await
            .unwrap();

        // No match query, and the size query negates a condition nothing meets.
        assert_eq!(schema.calls(), vec!["sizes NOT (1=0)".to_string()]);
        assert_eq!(result.full_tables, names(&["a", "c"]));
        assert_eq!(result.empty_tables, names(&["b"]));
        assert_eq!(result.total_full_size_mb, 15.0);
    }

    #[tokio::test]
    async fn test_classify_schema_predicate_beats_size_and_force_include() {
        let predicate = "table_name LIKE 'log%'";
        let schema = FakeSchema::new(&[("log_tiny", 0.5), ("orders", 20.0), ("blob", 900.0)])
            .with_match(predicate, &["log_tiny"]);
        let result = classify_schema(&schema, "shop", &policy(512.0, &["log_tiny"], Some(predicate)))
            .await
            .unwrap();

        assert_eq!(
            schema.calls(),
            vec![
                format!("match ({})", predicate),
                format!("sizes NOT ({})", predicate),
            ]
        );
        assert_eq!(result.full_tables, names(&["orders"]));
        assert_eq!(result.empty_tables, names(&["log_tiny", "blob"]));
        assert_eq!(result.total_full_size_mb, 20.0);
    }

    #[tokio::test]
    async fn test_classify_schema_never_double_counts_seeded_tables() {
        // A source that ignores the negation must not put a table in both sets.
        struct Careless;
        impl MetadataSource for Careless {
            async fn table_sizes(&self, _: &str, _: &str) -> Result<Vec<TableSizeInfo>> {
                Ok(vec![TableSizeInfo::new("a", 1.0), TableSizeInfo::new("b", 1.0)])
            }
            async fn tables_matching(&self, _: &str, _: &str) -> Result<Vec<String>> {
                Ok(vec!["a".to_string()])
            }
        }

        let result = classify_schema(&Careless, "shop", &policy(512.0, &[], Some("x")))
            .await
            .unwrap();
        assert_eq!(result.full_tables, names(&["b"]));
        assert_eq!(result.empty_tables, names(&["a"]));
    }

    #[tokio::test]
    async fn test_classify_schema_propagates_query_failure() {
        let schema = FakeSchema::new(&[("a", 1.0)]);
        let result = classify_schema(&schema, "shop", &policy(512.0, &[], Some("syntax error"))).await;
        assert!(matches!(result, Err(BackupError::Query { .. })));
        // The size query never runs after the predicate fails.
        assert_eq!(schema.calls().len(), 1);
    }
}
