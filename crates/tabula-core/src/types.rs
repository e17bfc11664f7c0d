use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Identifier of one conversation session.
pub type SessionId = Uuid;

/// Named tool arguments as proposed by the inference service.
pub type ToolArgs = Map<String, Value>;

// =============================================================================
// Enums
// =============================================================================

/// Closed set of conversational roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleName {
    /// Default role for a fresh session; answers general questions.
    Coordinator,
    /// Lists, loads and describes CSV files.
    DataLoader,
    /// Statistical calculations over the loaded dataset.
    Analytics,
    /// Guidance, explanations and follow-up suggestions.
    Communication,
}

impl RoleName {
    pub const ALL: [RoleName; 4] = [
        RoleName::Coordinator,
        RoleName::DataLoader,
        RoleName::Analytics,
        RoleName::Communication,
    ];

    /// Human-readable label used in transition notices.
    pub fn label(&self) -> &'static str {
        match self {
            RoleName::Coordinator => "Coordinator",
            RoleName::DataLoader => "Data Loader",
            RoleName::Analytics => "Analytics",
            RoleName::Communication => "Communication",
        }
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleName::Coordinator => write!(f, "coordinator"),
            RoleName::DataLoader => write!(f, "data_loader"),
            RoleName::Analytics => write!(f, "analytics"),
            RoleName::Communication => write!(f, "communication"),
        }
    }
}

impl std::str::FromStr for RoleName {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coordinator" => Ok(RoleName::Coordinator),
            "data_loader" => Ok(RoleName::DataLoader),
            "analytics" => Ok(RoleName::Analytics),
            "communication" => Ok(RoleName::Communication),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Tools a role may be allowed to invoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ListDatasets,
    LoadDataset,
    DescribeDataset,
    ColumnInfo,
    Mean,
    Median,
    Min,
    Max,
    StdDev,
    CountWhere,
    CorrelationMatrix,
    DetectOutliers,
    GroupBy,
    SuggestQuestions,
}

impl ToolName {
    pub const ALL: [ToolName; 14] = [
        ToolName::ListDatasets,
        ToolName::LoadDataset,
        ToolName::DescribeDataset,
        ToolName::ColumnInfo,
        ToolName::Mean,
        ToolName::Median,
        ToolName::Min,
        ToolName::Max,
        ToolName::StdDev,
        ToolName::CountWhere,
        ToolName::CorrelationMatrix,
        ToolName::DetectOutliers,
        ToolName::GroupBy,
        ToolName::SuggestQuestions,
    ];

    /// Whether the tool can only run against a loaded dataset.
    pub fn requires_dataset(&self) -> bool {
        !matches!(self, ToolName::ListDatasets | ToolName::LoadDataset)
    }

    /// Whether every column argument of the tool must be numeric.
    pub fn numeric_only(&self) -> bool {
        matches!(
            self,
            ToolName::Mean
                | ToolName::Median
                | ToolName::Min
                | ToolName::Max
                | ToolName::StdDev
                | ToolName::CorrelationMatrix
                | ToolName::DetectOutliers
        )
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolName::ListDatasets => "list_datasets",
            ToolName::LoadDataset => "load_dataset",
            ToolName::DescribeDataset => "describe_dataset",
            ToolName::ColumnInfo => "column_info",
            ToolName::Mean => "mean",
            ToolName::Median => "median",
            ToolName::Min => "min",
            ToolName::Max => "max",
            ToolName::StdDev => "std_dev",
            ToolName::CountWhere => "count_where",
            ToolName::CorrelationMatrix => "correlation_matrix",
            ToolName::DetectOutliers => "detect_outliers",
            ToolName::GroupBy => "group_by",
            ToolName::SuggestQuestions => "suggest_questions",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ToolName {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .iter()
            .copied()
            .find(|t| t.to_string() == s)
            .ok_or_else(|| format!("Unknown tool: {}", s))
    }
}

/// Inferred type of a dataset column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Text => write!(f, "text"),
        }
    }
}

// =============================================================================
// Newtype Wrappers - Temporal
// =============================================================================

/// Unix timestamp in seconds since epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }

    pub fn to_rfc3339(&self) -> String {
        self.to_datetime().to_rfc3339()
    }
}

// =============================================================================
// Dataset reference
// =============================================================================

/// One column of a dataset schema, in file order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

/// Metadata for the dataset currently attached to a session.
///
/// Replaced wholesale on reload; never patched in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub path: PathBuf,
    pub schema: Vec<ColumnSchema>,
    pub row_count: u64,
    pub loaded_at: Timestamp,
}

impl DatasetRef {
    /// Type of the named column, if present.
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.schema
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.column_type)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema.iter().map(|c| c.name.clone()).collect()
    }

    pub fn numeric_columns(&self) -> Vec<String> {
        self.schema
            .iter()
            .filter(|c| c.column_type.is_numeric())
            .map(|c| c.name.clone())
            .collect()
    }

    /// File name component of the path, for display.
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

// =============================================================================
// Tool invocation outcomes
// =============================================================================

/// Error kinds recorded in a tool invocation outcome.
#[derive(Clone, Debug, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolErrorKind {
    #[error("no dataset loaded")]
    DatasetNotLoaded,
    #[error("column '{column}' not found")]
    ColumnNotFound {
        column: String,
        available: Vec<String>,
    },
    #[error("column '{column}' is {actual}, expected a numeric column")]
    TypeMismatch { column: String, actual: ColumnType },
    #[error("role {role} is not permitted to call {tool}")]
    CapabilityViolation { role: RoleName, tool: ToolName },
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("file not found: {path}")]
    FileNotFound { path: String },
    #[error("could not parse dataset: {message}")]
    ParseError { message: String },
    #[error("analysis failed: {message}")]
    AnalysisFailed { message: String },
}

impl ToolErrorKind {
    /// Validation failures that are shown to the user with schema guidance.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ToolErrorKind::DatasetNotLoaded
                | ToolErrorKind::ColumnNotFound { .. }
                | ToolErrorKind::TypeMismatch { .. }
        )
    }
}

/// One tool call and its outcome, as recorded in a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: ToolName,
    pub args: ToolArgs,
    pub outcome: Result<Value, ToolErrorKind>,
}

impl ToolInvocation {
    /// String value of a named argument.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }
}

// =============================================================================
// Sessions and turns
// =============================================================================

/// One user utterance and its full resolution. Never mutated once recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub index: u64,
    pub role: RoleName,
    pub user_text: String,
    pub assistant_text: String,
    pub tool_invocations: Vec<ToolInvocation>,
    pub handoff_from: Option<RoleName>,
    pub created_at: Timestamp,
}

/// Durable state of one conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub active_role: RoleName,
    pub dataset: Option<DatasetRef>,
    pub turns: Vec<Turn>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Session {
    /// Fresh session with the given initial role and no dataset.
    pub fn new(id: SessionId, initial_role: RoleName) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            active_role: initial_role,
            dataset: None,
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Index the next appended turn must carry.
    pub fn next_index(&self) -> u64 {
        self.turns.len() as u64
    }

    /// The last `n` turns, oldest first.
    pub fn recent_turns(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }
}

/// Lightweight listing entry for a stored session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub active_role: RoleName,
    pub dataset_path: Option<PathBuf>,
    pub turn_count: u64,
    pub updated_at: Timestamp,
}
