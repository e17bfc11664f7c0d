//! Tabula Analysis crate - dataset ingestion and tabular statistics.
//!
//! Reads CSV files into typed in-memory tables and runs the analysis
//! operations the chat tools delegate to: summary statistics, filtered
//! counts, correlations, z-score outliers and group-by aggregation.

pub mod error;
pub mod library;
pub mod stats;
pub mod suggest;
pub mod table;

pub use error::AnalysisError;
pub use library::{AnalysisOp, CsvLibrary, TabularLibrary, DEFAULT_OUTLIER_THRESHOLD};
pub use stats::{AggFn, Predicate, Stat};
pub use suggest::suggest_questions;
pub use table::Table;
