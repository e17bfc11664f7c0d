//! Tool dispatcher.
//!
//! Validates a proposed tool call against the session (capability, dataset,
//! column names, column types) and only then delegates to the analysis
//! library. Validation never touches the library; the dispatcher computes
//! nothing itself.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use tabula_analysis::{AggFn, AnalysisOp, Predicate, Stat, TabularLibrary, DEFAULT_OUTLIER_THRESHOLD};
use tabula_core::types::{DatasetRef, Session, ToolArgs, ToolErrorKind, ToolName};

use crate::registry::RoleRegistry;

/// A tool call proposed by the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: ToolName,
    #[serde(default)]
    pub args: ToolArgs,
}

impl ToolCall {
    pub fn new(name: ToolName) -> Self {
        Self {
            name,
            args: ToolArgs::new(),
        }
    }

    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }
}

/// Successful dispatch result.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub value: Value,
    /// Set by `load_dataset`; the caller replaces the session's dataset.
    pub loaded: Option<DatasetRef>,
}

impl ToolOutput {
    fn value(value: Value) -> Self {
        Self {
            value,
            loaded: None,
        }
    }
}

pub struct ToolDispatcher {
    registry: Arc<RoleRegistry>,
    library: Arc<dyn TabularLibrary>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<RoleRegistry>, library: Arc<dyn TabularLibrary>) -> Self {
        Self { registry, library }
    }

    /// Validate and run one tool call on behalf of the session's active role.
    pub fn invoke(&self, session: &Session, call: &ToolCall) -> Result<ToolOutput, ToolErrorKind> {
        let role = session.active_role;
        if !self.registry.can_invoke(role, call.name) {
            return Err(ToolErrorKind::CapabilityViolation {
                role,
                tool: call.name,
            });
        }

        match call.name {
            ToolName::ListDatasets => {
                let datasets = self.library.list_datasets().map_err(ToolErrorKind::from)?;
                return Ok(ToolOutput::value(json!({ "datasets": datasets })));
            }
            ToolName::LoadDataset => {
                let path = required_str(&call.args, "path")?;
                return self.load(Path::new(&path));
            }
            _ => {}
        }

        let dataset = session
            .dataset
            .as_ref()
            .ok_or(ToolErrorKind::DatasetNotLoaded)?;

        let op = build_op(call)?;
        validate_columns(dataset, call.name, &op)?;

        debug!(tool = %call.name, role = %role, "Dispatching tool call");
        self.library
            .run(dataset, &op)
            .map(ToolOutput::value)
            .map_err(ToolErrorKind::from)
    }

    /// Load a dataset without a role check, for the front end's direct path.
    pub fn load(&self, path: &Path) -> Result<ToolOutput, ToolErrorKind> {
        let dataset = self.library.load_dataset(path)?;
        let value = json!({
            "file_name": dataset.file_name(),
            "row_count": dataset.row_count,
            "columns": dataset.column_names(),
        });
        Ok(ToolOutput {
            value,
            loaded: Some(dataset),
        })
    }
}

// =============================================================================
// Argument parsing
// =============================================================================

fn invalid(message: String) -> ToolErrorKind {
    ToolErrorKind::InvalidArgument { message }
}

fn optional_str(args: &ToolArgs, key: &str) -> Result<Option<String>, ToolErrorKind> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(invalid(format!(
            "argument '{}' must be a string, got {}",
            key, other
        ))),
    }
}

fn required_str(args: &ToolArgs, key: &str) -> Result<String, ToolErrorKind> {
    optional_str(args, key)?
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| invalid(format!("missing argument '{}'", key)))
}

fn optional_f64(args: &ToolArgs, key: &str) -> Result<Option<f64>, ToolErrorKind> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| invalid(format!("argument '{}' must be a number", key))),
        Some(other) => Err(invalid(format!(
            "argument '{}' must be a number, got {}",
            key, other
        ))),
    }
}

fn optional_list(args: &ToolArgs, key: &str) -> Result<Vec<String>, ToolErrorKind> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(format!("argument '{}' must list strings", key)))
            })
            .collect(),
        Some(other) => Err(invalid(format!(
            "argument '{}' must be a list, got {}",
            key, other
        ))),
    }
}

fn parse_enum<T>(args: &ToolArgs, key: &str) -> Result<Option<T>, ToolErrorKind>
where
    T: FromStr<Err = tabula_analysis::AnalysisError>,
{
    optional_str(args, key)?
        .map(|s| T::from_str(&s).map_err(ToolErrorKind::from))
        .transpose()
}

fn build_op(call: &ToolCall) -> Result<AnalysisOp, ToolErrorKind> {
    let args = &call.args;
    let stat = |stat: Stat| -> Result<AnalysisOp, ToolErrorKind> {
        Ok(AnalysisOp::Stat {
            stat,
            column: required_str(args, "column")?,
        })
    };

    match call.name {
        ToolName::DescribeDataset => Ok(AnalysisOp::Describe),
        ToolName::SuggestQuestions => Ok(AnalysisOp::SuggestQuestions),
        ToolName::ColumnInfo => Ok(AnalysisOp::ColumnProfile {
            column: required_str(args, "column")?,
        }),
        ToolName::Mean => stat(Stat::Mean),
        ToolName::Median => stat(Stat::Median),
        ToolName::Min => stat(Stat::Min),
        ToolName::Max => stat(Stat::Max),
        ToolName::StdDev => stat(Stat::StdDev),
        ToolName::CountWhere => Ok(AnalysisOp::CountWhere {
            column: required_str(args, "column")?,
            predicate: parse_enum::<Predicate>(args, "op")?.unwrap_or_default(),
            value: optional_str(args, "value")?
                .ok_or_else(|| invalid("missing argument 'value'".to_string()))?,
        }),
        ToolName::CorrelationMatrix => Ok(AnalysisOp::CorrelationMatrix {
            columns: optional_list(args, "columns")?,
        }),
        ToolName::DetectOutliers => Ok(AnalysisOp::DetectOutliers {
            column: required_str(args, "column")?,
            threshold: optional_f64(args, "threshold")?.unwrap_or(DEFAULT_OUTLIER_THRESHOLD),
        }),
        ToolName::GroupBy => Ok(AnalysisOp::GroupBy {
            group_column: required_str(args, "group_column")?,
            agg_column: required_str(args, "agg_column")?,
            agg: parse_enum::<AggFn>(args, "agg")?.unwrap_or_default(),
        }),
        ToolName::ListDatasets | ToolName::LoadDataset => Err(invalid(format!(
            "{} does not operate on a dataset",
            call.name
        ))),
    }
}

// =============================================================================
// Schema validation
// =============================================================================

/// Column arguments of an operation, tagged with whether each must be numeric.
fn column_args(tool: ToolName, op: &AnalysisOp) -> Vec<(&str, bool)> {
    let numeric = tool.numeric_only();
    match op {
        AnalysisOp::Describe | AnalysisOp::SuggestQuestions => vec![],
        AnalysisOp::ColumnProfile { column }
        | AnalysisOp::Stat { column, .. }
        | AnalysisOp::CountWhere { column, .. }
        | AnalysisOp::DetectOutliers { column, .. } => vec![(column.as_str(), numeric)],
        AnalysisOp::CorrelationMatrix { columns } => {
            columns.iter().map(|c| (c.as_str(), numeric)).collect()
        }
        AnalysisOp::GroupBy {
            group_column,
            agg_column,
            ..
        } => vec![(group_column.as_str(), false), (agg_column.as_str(), true)],
    }
}

fn validate_columns(dataset: &DatasetRef, tool: ToolName, op: &AnalysisOp) -> Result<(), ToolErrorKind> {
    let columns = column_args(tool, op);

    for (column, _) in &columns {
        if dataset.column_type(column).is_none() {
            return Err(ToolErrorKind::ColumnNotFound {
                column: column.to_string(),
                available: dataset.column_names(),
            });
        }
    }

    for (column, must_be_numeric) in &columns {
        if let Some(actual) = dataset.column_type(column) {
            if *must_be_numeric && !actual.is_numeric() {
                return Err(ToolErrorKind::TypeMismatch {
                    column: column.to_string(),
                    actual,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tabula_analysis::{AnalysisError, CsvLibrary};
    use tabula_core::types::{ColumnSchema, ColumnType, RoleName, Timestamp};
    use uuid::Uuid;

    /// Library that counts delegations and echoes the operation back.
    #[derive(Default)]
    struct RecordingLibrary {
        runs: AtomicUsize,
    }

    impl TabularLibrary for RecordingLibrary {
        fn load_dataset(&self, path: &Path) -> tabula_analysis::error::Result<DatasetRef> {
            Err(AnalysisError::FileNotFound(path.to_path_buf()))
        }

        fn list_datasets(&self) -> tabula_analysis::error::Result<Vec<String>> {
            Ok(vec!["sales.csv".to_string()])
        }

        fn run(&self, _dataset: &DatasetRef, op: &AnalysisOp) -> tabula_analysis::error::Result<Value> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "op": format!("{:?}", op) }))
        }
    }

    fn sales() -> DatasetRef {
        let col = |name: &str, column_type| ColumnSchema {
            name: name.to_string(),
            column_type,
        };
        DatasetRef {
            path: PathBuf::from("/data/sales.csv"),
            schema: vec![
                col("product", ColumnType::Text),
                col("region", ColumnType::Text),
                col("price", ColumnType::Float),
                col("quantity", ColumnType::Integer),
            ],
            row_count: 4,
            loaded_at: Timestamp(0),
        }
    }

    fn session(role: RoleName, dataset: Option<DatasetRef>) -> Session {
        let mut s = Session::new(Uuid::new_v4(), role);
        s.dataset = dataset;
        s
    }

    fn dispatcher() -> (ToolDispatcher, Arc<RecordingLibrary>) {
        let lib = Arc::new(RecordingLibrary::default());
        let d = ToolDispatcher::new(Arc::new(RoleRegistry::builtin()), lib.clone());
        (d, lib)
    }

    #[test]
    fn test_capability_violation_checked_first() {
        let (d, lib) = dispatcher();
        let s = session(RoleName::Coordinator, None);
        let err = d
            .invoke(&s, &ToolCall::new(ToolName::Mean).arg("column", "price"))
            .unwrap_err();
        assert_eq!(
            err,
            ToolErrorKind::CapabilityViolation {
                role: RoleName::Coordinator,
                tool: ToolName::Mean
            }
        );
        assert_eq!(lib.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dataset_not_loaded() {
        let (d, _) = dispatcher();
        let s = session(RoleName::Analytics, None);
        let err = d
            .invoke(&s, &ToolCall::new(ToolName::Mean).arg("column", "price"))
            .unwrap_err();
        assert_eq!(err, ToolErrorKind::DatasetNotLoaded);
    }

    #[test]
    fn test_column_not_found_lists_schema() {
        let (d, lib) = dispatcher();
        let s = session(RoleName::Analytics, Some(sales()));
        let call = ToolCall::new(ToolName::GroupBy)
            .arg("group_column", "nonexistent_column")
            .arg("agg_column", "price")
            .arg("agg", "mean");
        match d.invoke(&s, &call).unwrap_err() {
            ToolErrorKind::ColumnNotFound { column, available } => {
                assert_eq!(column, "nonexistent_column");
                assert_eq!(available, vec!["product", "region", "price", "quantity"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(lib.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_type_mismatch_for_numeric_tools() {
        let (d, lib) = dispatcher();
        let s = session(RoleName::Analytics, Some(sales()));
        let err = d
            .invoke(&s, &ToolCall::new(ToolName::StdDev).arg("column", "region"))
            .unwrap_err();
        assert_eq!(
            err,
            ToolErrorKind::TypeMismatch {
                column: "region".to_string(),
                actual: ColumnType::Text
            }
        );
        assert_eq!(lib.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_group_by_needs_numeric_agg_column_only() {
        let (d, _) = dispatcher();
        let s = session(RoleName::Analytics, Some(sales()));
        let ok = ToolCall::new(ToolName::GroupBy)
            .arg("group_column", "region")
            .arg("agg_column", "price");
        assert!(d.invoke(&s, &ok).is_ok());

        let bad = ToolCall::new(ToolName::GroupBy)
            .arg("group_column", "price")
            .arg("agg_column", "region");
        assert!(matches!(
            d.invoke(&s, &bad).unwrap_err(),
            ToolErrorKind::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_count_where_accepts_text_column() {
        let (d, lib) = dispatcher();
        let s = session(RoleName::Analytics, Some(sales()));
        let call = ToolCall::new(ToolName::CountWhere)
            .arg("column", "region")
            .arg("value", "North");
        assert!(d.invoke(&s, &call).is_ok());
        assert_eq!(lib.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_argument_is_invalid() {
        let (d, _) = dispatcher();
        let s = session(RoleName::Analytics, Some(sales()));
        assert!(matches!(
            d.invoke(&s, &ToolCall::new(ToolName::Median)).unwrap_err(),
            ToolErrorKind::InvalidArgument { .. }
        ));
        let bad_agg = ToolCall::new(ToolName::GroupBy)
            .arg("group_column", "region")
            .arg("agg_column", "price")
            .arg("agg", "mode");
        assert!(matches!(
            d.invoke(&s, &bad_agg).unwrap_err(),
            ToolErrorKind::InvalidArgument { .. }
        ));
    }

    #[test]
    fn test_list_datasets_needs_no_dataset() {
        let (d, _) = dispatcher();
        let s = session(RoleName::DataLoader, None);
        let out = d.invoke(&s, &ToolCall::new(ToolName::ListDatasets)).unwrap();
        assert_eq!(out.value["datasets"], json!(["sales.csv"]));
        assert!(out.loaded.is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let (d, _) = dispatcher();
        let s = session(RoleName::DataLoader, None);
        let err = d
            .invoke(
                &s,
                &ToolCall::new(ToolName::LoadDataset).arg("path", "missing.csv"),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ToolErrorKind::FileNotFound {
                path: "missing.csv".to_string()
            }
        );
    }

    #[test]
    fn test_load_returns_dataset_ref() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sales.csv"), "product,price\nA,10\nB,15\n").unwrap();
        let d = ToolDispatcher::new(
            Arc::new(RoleRegistry::builtin()),
            Arc::new(CsvLibrary::new(dir.path())),
        );
        let s = session(RoleName::DataLoader, None);
        let out = d
            .invoke(&s, &ToolCall::new(ToolName::LoadDataset).arg("path", "sales.csv"))
            .unwrap();
        let ds = out.loaded.unwrap();
        assert_eq!(ds.row_count, 2);
        assert_eq!(out.value["columns"], json!(["product", "price"]));
    }

    #[test]
    fn test_same_call_same_result() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sales.csv"), "product,price\nA,10\nB,15\nC,11\n").unwrap();
        let lib: Arc<dyn TabularLibrary> = Arc::new(CsvLibrary::new(dir.path()));
        let ds = lib.load_dataset(Path::new("sales.csv")).unwrap();
        let d = ToolDispatcher::new(Arc::new(RoleRegistry::builtin()), lib);
        let s = session(RoleName::Analytics, Some(ds));
        let call = ToolCall::new(ToolName::Median).arg("column", "price");
        let first = d.invoke(&s, &call).unwrap();
        let second = d.invoke(&s, &call).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.value["median"], json!(11.0));
    }
}
