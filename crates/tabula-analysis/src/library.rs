//! The tabular-analysis library seam and its CSV implementation.
//!
//! Callers validate columns against the dataset schema first; the library
//! still reports domain errors for anything it cannot compute.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use tracing::{debug, info};

use tabula_core::types::{ColumnType, DatasetRef, Timestamp};

use crate::error::{AnalysisError, Result};
use crate::stats::{self, AggFn, Predicate, Stat};
use crate::suggest;
use crate::table::Table;

/// Default z-score cutoff for outlier detection.
pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 2.0;

/// One analysis request against a loaded dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOp {
    Describe,
    ColumnProfile {
        column: String,
    },
    Stat {
        stat: Stat,
        column: String,
    },
    CountWhere {
        column: String,
        predicate: Predicate,
        value: String,
    },
    /// Empty `columns` means every numeric column.
    CorrelationMatrix {
        columns: Vec<String>,
    },
    DetectOutliers {
        column: String,
        threshold: f64,
    },
    GroupBy {
        group_column: String,
        agg_column: String,
        agg: AggFn,
    },
    SuggestQuestions,
}

/// Dataset ingestion plus the analysis functions.
pub trait TabularLibrary: Send + Sync {
    /// Read and type a dataset, returning its reference.
    fn load_dataset(&self, path: &Path) -> Result<DatasetRef>;

    /// CSV files available for loading.
    fn list_datasets(&self) -> Result<Vec<String>>;

    /// Run one operation. Identical inputs on an unchanged file give
    /// identical outputs.
    fn run(&self, dataset: &DatasetRef, op: &AnalysisOp) -> Result<Value>;
}

/// Cache key: one table per load, so a reload never changes the table
/// behind an earlier [`DatasetRef`].
type SnapshotKey = (PathBuf, Timestamp);

/// CSV-backed [`TabularLibrary`] with a per-load table cache.
#[derive(Debug)]
pub struct CsvLibrary {
    data_dir: PathBuf,
    cache: Mutex<HashMap<SnapshotKey, Arc<Table>>>,
}

impl CsvLibrary {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Relative paths resolve against the data directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    fn lock_cache(&self) -> Result<MutexGuard<'_, HashMap<SnapshotKey, Arc<Table>>>> {
        self.cache
            .lock()
            .map_err(|e| AnalysisError::Parse(format!("Table cache poisoned: {}", e)))
    }

    /// Store a freshly read table and stamp it. Stamps are unique per path,
    /// so two loads within the same second still get separate snapshots.
    fn insert_snapshot(&self, path: PathBuf, table: Arc<Table>) -> Result<Timestamp> {
        let mut cache = self.lock_cache()?;
        let mut stamp = Timestamp::now();
        while cache.contains_key(&(path.clone(), stamp)) {
            stamp = Timestamp(stamp.0 + 1);
        }
        cache.insert((path, stamp), table);
        Ok(stamp)
    }

    fn table_for(&self, dataset: &DatasetRef) -> Result<Arc<Table>> {
        let key = (dataset.path.clone(), dataset.loaded_at);
        if let Some(table) = self.lock_cache()?.get(&key) {
            return Ok(Arc::clone(table));
        }

        // Sessions restored from storage reference loads made by an earlier
        // process. The file must still match the recorded schema.
        debug!(path = %dataset.path.display(), "Table cache miss");
        let table = Table::from_path(&dataset.path)?;
        if table.schema() != dataset.schema || table.row_count() as u64 != dataset.row_count {
            return Err(AnalysisError::Stale(dataset.path.clone()));
        }
        let table = Arc::new(table);
        self.lock_cache()?.insert(key, Arc::clone(&table));
        Ok(table)
    }
}

impl TabularLibrary for CsvLibrary {
    fn load_dataset(&self, path: &Path) -> Result<DatasetRef> {
        let resolved = self.resolve(path);
        let table = Table::from_path(&resolved)?;
        let schema = table.schema();
        let row_count = table.row_count() as u64;
        let loaded_at = self.insert_snapshot(resolved.clone(), Arc::new(table))?;
        let dataset = DatasetRef {
            path: resolved,
            schema,
            row_count,
            loaded_at,
        };
        info!(
            path = %dataset.path.display(),
            rows = dataset.row_count,
            columns = dataset.schema.len(),
            "Dataset loaded"
        );
        Ok(dataset)
    }

    fn list_datasets(&self) -> Result<Vec<String>> {
        if !self.data_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            let is_csv = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if is_csv && path.is_file() {
                if let Some(name) = path.file_name() {
                    names.push(name.to_string_lossy().to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn run(&self, dataset: &DatasetRef, op: &AnalysisOp) -> Result<Value> {
        match op {
            AnalysisOp::Describe => Ok(describe(dataset)),
            AnalysisOp::SuggestQuestions => {
                let suggestions = suggest::suggest_questions(dataset);
                Ok(json!({
                    "total_suggestions": suggestions.len(),
                    "suggestions": suggestions,
                }))
            }
            other => {
                let table = self.table_for(dataset)?;
                run_on_table(&table, other)
            }
        }
    }
}

fn describe(dataset: &DatasetRef) -> Value {
    let columns: Vec<Value> = dataset
        .schema
        .iter()
        .map(|c| json!({ "name": c.name, "type": c.column_type.to_string() }))
        .collect();
    json!({
        "file_name": dataset.file_name(),
        "path": dataset.path.display().to_string(),
        "row_count": dataset.row_count,
        "columns": columns,
    })
}

fn run_on_table(table: &Table, op: &AnalysisOp) -> Result<Value> {
    match op {
        AnalysisOp::ColumnProfile { column } => column_profile(table, column),
        AnalysisOp::Stat { stat, column } => {
            let col = table.numeric_column(column)?;
            let values = col.numbers();
            let value = stat.compute(&values)?;
            let mut out = json!({
                "column": column,
                "count": values.len(),
                "missing_values": col.missing(),
            });
            out[stat.to_string()] = json!(value);
            Ok(out)
        }
        AnalysisOp::CountWhere {
            column,
            predicate,
            value,
        } => count_where(table, column, *predicate, value),
        AnalysisOp::CorrelationMatrix { columns } => correlation_matrix(table, columns),
        AnalysisOp::DetectOutliers { column, threshold } => {
            detect_outliers(table, column, *threshold)
        }
        AnalysisOp::GroupBy {
            group_column,
            agg_column,
            agg,
        } => group_by(table, group_column, agg_column, *agg),
        AnalysisOp::Describe | AnalysisOp::SuggestQuestions => Err(AnalysisError::InvalidArgument(
            "operation does not read table data".to_string(),
        )),
    }
}

fn column_profile(table: &Table, column: &str) -> Result<Value> {
    let col = table.column(column)?;
    let mut profile = json!({
        "column": column,
        "type": col.column_type.to_string(),
        "total_values": col.len(),
        "missing_values": col.missing(),
        "unique_values": col.distinct().len(),
    });

    if col.column_type.is_numeric() {
        let values = col.numbers();
        if let Value::Object(map) = &mut profile {
            if !values.is_empty() {
                map.insert("min".into(), json!(stats::min(&values)?));
                map.insert("max".into(), json!(stats::max(&values)?));
                map.insert("mean".into(), json!(stats::mean(&values)?));
                map.insert("median".into(), json!(stats::median(&values)?));
            }
            if values.len() >= 2 {
                map.insert("std_dev".into(), json!(stats::std_dev(&values)?));
            }
        }
    } else if let Value::Object(map) = &mut profile {
        let samples: Vec<&str> = col.distinct().into_iter().take(5).collect();
        map.insert("sample_values".into(), json!(samples));
    }
    Ok(profile)
}

fn count_where(table: &Table, column: &str, predicate: Predicate, value: &str) -> Result<Value> {
    let col = table.column(column)?;
    let wanted = value.trim();
    let numeric_rhs = wanted.parse::<f64>().ok().filter(|_| col.column_type.is_numeric());

    if predicate.is_ordering() && numeric_rhs.is_none() {
        return Err(AnalysisError::InvalidArgument(format!(
            "'{}' comparison needs a numeric column and a numeric value",
            predicate
        )));
    }

    let matching = (0..col.len())
        .filter(|&row| match numeric_rhs {
            Some(rhs) => col
                .number(row)
                .map(|lhs| predicate.test_number(lhs, rhs))
                .unwrap_or(false),
            None => {
                let equal = match (col.cell(row), col.column_type) {
                    (Some(cell), ColumnType::Boolean) => cell.eq_ignore_ascii_case(wanted),
                    (Some(cell), _) => cell == wanted,
                    (None, _) => false,
                };
                equal == (predicate == Predicate::Eq)
            }
        })
        .count();

    let total = table.row_count();
    let percentage = if total == 0 {
        0.0
    } else {
        stats::round_to(matching as f64 / total as f64 * 100.0, 2)
    };

    Ok(json!({
        "column": column,
        "op": predicate.to_string(),
        "value": wanted,
        "matching_rows": matching,
        "total_rows": total,
        "percentage": percentage,
    }))
}

fn correlation_matrix(table: &Table, columns: &[String]) -> Result<Value> {
    let selected: Vec<&crate::table::Column> = if columns.is_empty() {
        table.numeric_columns()
    } else {
        columns
            .iter()
            .map(|c| table.numeric_column(c))
            .collect::<Result<_>>()?
    };

    if selected.len() < 2 {
        return Err(AnalysisError::InsufficientData(
            "need at least 2 numeric columns for correlation analysis".to_string(),
        ));
    }

    let mut pairs_out = Vec::new();
    for i in 0..selected.len() {
        for j in (i + 1)..selected.len() {
            let (a, b) = (selected[i], selected[j]);
            let pairs: Vec<(f64, f64)> = (0..table.row_count())
                .filter_map(|row| Some((a.number(row)?, b.number(row)?)))
                .collect();
            let r = stats::pearson(&pairs)?.map(|r| stats::round_to(r, 3));
            pairs_out.push(json!({
                "column1": a.name,
                "column2": b.name,
                "correlation": r,
            }));
        }
    }

    let names: Vec<&str> = selected.iter().map(|c| c.name.as_str()).collect();
    Ok(json!({
        "columns": names,
        "correlations": pairs_out,
    }))
}

fn detect_outliers(table: &Table, column: &str, threshold: f64) -> Result<Value> {
    if !(threshold.is_finite() && threshold > 0.0) {
        return Err(AnalysisError::InvalidArgument(format!(
            "threshold must be a positive number, got {}",
            threshold
        )));
    }
    let col = table.numeric_column(column)?;
    let rows: Vec<(usize, f64)> = (0..col.len())
        .filter_map(|row| col.number(row).map(|v| (row, v)))
        .collect();
    let values: Vec<f64> = rows.iter().map(|(_, v)| *v).collect();
    let scores = stats::z_scores(&values)?;

    let outliers: Vec<Value> = rows
        .iter()
        .zip(&scores)
        .filter(|(_, z)| **z > threshold)
        .map(|((row, value), z)| {
            json!({
                "row": row,
                "value": value,
                "z_score": stats::round_to(*z, 3),
            })
        })
        .collect();

    Ok(json!({
        "column": column,
        "method": "zscore",
        "threshold": threshold,
        "outlier_count": outliers.len(),
        "outliers": outliers,
        "total_values": values.len(),
    }))
}

fn group_by(table: &Table, group_column: &str, agg_column: &str, agg: AggFn) -> Result<Value> {
    let group = table.column(group_column)?;
    let target = table.numeric_column(agg_column)?;

    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for row in 0..table.row_count() {
        let Some(key) = group.cell(row) else {
            continue;
        };
        let bucket = groups.entry(key).or_default();
        if let Some(v) = target.number(row) {
            bucket.push(v);
        }
    }

    let mut results = serde_json::Map::new();
    for (key, values) in &groups {
        let value = if values.is_empty() && agg != AggFn::Count && agg != AggFn::Sum {
            Value::Null
        } else {
            json!(agg.apply(values)?)
        };
        results.insert(key.to_string(), value);
    }

    Ok(json!({
        "group_column": group_column,
        "agg_column": agg_column,
        "agg": agg.to_string(),
        "results": results,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EMPLOYEES: &str = "\
name,department,salary,years,remote
Ann,Engineering,120000,8,true
Bob,Sales,80000,3,false
Cid,Engineering,110000,6,true
Dee,Marketing,70000,2,false
Eve,Sales,90000,5,true
";

    fn library_with(files: &[(&str, &str)]) -> (tempfile::TempDir, CsvLibrary) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            f.write_all(content.as_bytes()).unwrap();
        }
        let lib = CsvLibrary::new(dir.path());
        (dir, lib)
    }

    #[test]
    fn test_load_relative_path() {
        let (_dir, lib) = library_with(&[("employees.csv", EMPLOYEES)]);
        let ds = lib.load_dataset(Path::new("employees.csv")).unwrap();
        assert_eq!(ds.row_count, 5);
        assert_eq!(ds.column_type("salary"), Some(ColumnType::Integer));
        assert!(ds.path.is_absolute());
        assert_eq!(ds.file_name(), "employees.csv");
    }

    #[test]
    fn test_load_missing_file() {
        let (_dir, lib) = library_with(&[]);
        let err = lib.load_dataset(Path::new("missing.csv")).unwrap_err();
        assert!(matches!(err, AnalysisError::FileNotFound(_)));
    }

    #[test]
    fn test_list_datasets_only_csv_sorted() {
        let (_dir, lib) = library_with(&[
            ("weather.csv", "a\n1\n"),
            ("employees.csv", EMPLOYEES),
            ("notes.txt", "hi"),
        ]);
        assert_eq!(
            lib.list_datasets().unwrap(),
            vec!["employees.csv".to_string(), "weather.csv".to_string()]
        );
    }

    #[test]
    fn test_list_datasets_missing_dir_is_empty() {
        let lib = CsvLibrary::new("/definitely/not/here");
        assert!(lib.list_datasets().unwrap().is_empty());
    }

    #[test]
    fn test_stat_mean() {
        let (_dir, lib) = library_with(&[("employees.csv", EMPLOYEES)]);
        let ds = lib.load_dataset(Path::new("employees.csv")).unwrap();
        let v = lib
            .run(
                &ds,
                &AnalysisOp::Stat {
                    stat: Stat::Mean,
                    column: "salary".to_string(),
                },
            )
            .unwrap();
        assert_eq!(v["mean"], json!(94000.0));
        assert_eq!(v["count"], json!(5));
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let (_dir, lib) = library_with(&[("employees.csv", EMPLOYEES)]);
        let ds = lib.load_dataset(Path::new("employees.csv")).unwrap();
        let op = AnalysisOp::GroupBy {
            group_column: "department".to_string(),
            agg_column: "salary".to_string(),
            agg: AggFn::Mean,
        };
        let first = lib.run(&ds, &op).unwrap();
        let second = lib.run(&ds, &op).unwrap();
        assert_eq!(first, second);
        assert_eq!(first["results"]["Engineering"], json!(115000.0));
        assert_eq!(first["results"]["Sales"], json!(85000.0));
    }

    #[test]
    fn test_group_by_unknown_column() {
        let (_dir, lib) = library_with(&[("employees.csv", EMPLOYEES)]);
        let ds = lib.load_dataset(Path::new("employees.csv")).unwrap();
        let err = lib
            .run(
                &ds,
                &AnalysisOp::GroupBy {
                    group_column: "nonexistent_column".to_string(),
                    agg_column: "salary".to_string(),
                    agg: AggFn::Mean,
                },
            )
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ColumnNotFound { .. }));
    }

    #[test]
    fn test_count_where_text_and_numeric() {
        let (_dir, lib) = library_with(&[("employees.csv", EMPLOYEES)]);
        let ds = lib.load_dataset(Path::new("employees.csv")).unwrap();

        let v = lib
            .run(
                &ds,
                &AnalysisOp::CountWhere {
                    column: "department".to_string(),
                    predicate: Predicate::Eq,
                    value: "Sales".to_string(),
                },
            )
            .unwrap();
        assert_eq!(v["matching_rows"], json!(2));
        assert_eq!(v["percentage"], json!(40.0));

        let v = lib
            .run(
                &ds,
                &AnalysisOp::CountWhere {
                    column: "years".to_string(),
                    predicate: Predicate::Ge,
                    value: "5".to_string(),
                },
            )
            .unwrap();
        assert_eq!(v["matching_rows"], json!(3));

        let err = lib
            .run(
                &ds,
                &AnalysisOp::CountWhere {
                    column: "department".to_string(),
                    predicate: Predicate::Gt,
                    value: "Sales".to_string(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidArgument(_)));
    }

    #[test]
    fn test_correlation_defaults_to_numeric_columns() {
        let (_dir, lib) = library_with(&[("employees.csv", EMPLOYEES)]);
        let ds = lib.load_dataset(Path::new("employees.csv")).unwrap();
        let v = lib
            .run(&ds, &AnalysisOp::CorrelationMatrix { columns: vec![] })
            .unwrap();
        assert_eq!(v["columns"], json!(["salary", "years"]));
        let r = v["correlations"][0]["correlation"].as_f64().unwrap();
        assert!(r > 0.9);
    }

    #[test]
    fn test_correlation_needs_two_columns() {
        let (_dir, lib) = library_with(&[("prices.csv", "item,price\na,1\nb,2\n")]);
        let ds = lib.load_dataset(Path::new("prices.csv")).unwrap();
        let err = lib
            .run(&ds, &AnalysisOp::CorrelationMatrix { columns: vec![] })
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData(_)));
    }

    #[test]
    fn test_detect_outliers() {
        let csv = "reading\n10\n11\n10\n12\n11\n10\n50\n";
        let (_dir, lib) = library_with(&[("sensor.csv", csv)]);
        let ds = lib.load_dataset(Path::new("sensor.csv")).unwrap();
        let v = lib
            .run(
                &ds,
                &AnalysisOp::DetectOutliers {
                    column: "reading".to_string(),
                    threshold: DEFAULT_OUTLIER_THRESHOLD,
                },
            )
            .unwrap();
        assert_eq!(v["outlier_count"], json!(1));
        assert_eq!(v["outliers"][0]["row"], json!(6));
        assert_eq!(v["outliers"][0]["value"], json!(50.0));
    }

    #[test]
    fn test_column_profile() {
        let (_dir, lib) = library_with(&[("employees.csv", EMPLOYEES)]);
        let ds = lib.load_dataset(Path::new("employees.csv")).unwrap();

        let v = lib
            .run(
                &ds,
                &AnalysisOp::ColumnProfile {
                    column: "years".to_string(),
                },
            )
            .unwrap();
        assert_eq!(v["min"], json!(2.0));
        assert_eq!(v["max"], json!(8.0));
        assert_eq!(v["unique_values"], json!(5));

        let v = lib
            .run(
                &ds,
                &AnalysisOp::ColumnProfile {
                    column: "department".to_string(),
                },
            )
            .unwrap();
        assert_eq!(v["sample_values"], json!(["Engineering", "Sales", "Marketing"]));
    }

    #[test]
    fn test_describe_and_suggest_need_no_table() {
        let (_dir, lib) = library_with(&[("employees.csv", EMPLOYEES)]);
        let ds = lib.load_dataset(Path::new("employees.csv")).unwrap();
        let described = lib.run(&ds, &AnalysisOp::Describe).unwrap();
        assert_eq!(described["row_count"], json!(5));
        assert_eq!(described["columns"][2]["type"], json!("integer"));

        let suggested = lib.run(&ds, &AnalysisOp::SuggestQuestions).unwrap();
        assert!(suggested["total_suggestions"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_cache_miss_rereads_file() {
        let (dir, lib) = library_with(&[("employees.csv", EMPLOYEES)]);
        let ds = lib.load_dataset(Path::new("employees.csv")).unwrap();

        let fresh = CsvLibrary::new(dir.path());
        let v = fresh
            .run(
                &ds,
                &AnalysisOp::Stat {
                    stat: Stat::Max,
                    column: "salary".to_string(),
                },
            )
            .unwrap();
        assert_eq!(v["max"], json!(120000.0));
    }

    #[test]
    fn test_reload_keeps_earlier_snapshot() {
        let (dir, lib) = library_with(&[("sales.csv", "product,price\nA,10\nB,20\n")]);
        let first = lib.load_dataset(Path::new("sales.csv")).unwrap();

        std::fs::write(dir.path().join("sales.csv"), "product,cost\nA,1\nB,2\nC,3\n").unwrap();
        let second = lib.load_dataset(Path::new("sales.csv")).unwrap();
        assert_ne!(first.loaded_at, second.loaded_at);
        assert_eq!(second.column_names(), vec!["product", "cost"]);

        let mean_price = AnalysisOp::Stat {
            stat: Stat::Mean,
            column: "price".to_string(),
        };
        let v = lib.run(&first, &mean_price).unwrap();
        assert_eq!(v["mean"], json!(15.0));

        let mean_cost = AnalysisOp::Stat {
            stat: Stat::Mean,
            column: "cost".to_string(),
        };
        let v = lib.run(&second, &mean_cost).unwrap();
        assert_eq!(v["mean"], json!(2.0));
    }

    #[test]
    fn test_cache_miss_rejects_changed_file() {
        let (dir, lib) = library_with(&[("sales.csv", "product,price\nA,10\nB,20\n")]);
        let ds = lib.load_dataset(Path::new("sales.csv")).unwrap();
        std::fs::write(dir.path().join("sales.csv"), "product,cost\nA,1\n").unwrap();

        let fresh = CsvLibrary::new(dir.path());
        let err = fresh
            .run(
                &ds,
                &AnalysisOp::Stat {
                    stat: Stat::Mean,
                    column: "price".to_string(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Stale(_)));
    }
}
