//! Offline inference service.
//!
//! `KeywordInference` turns an utterance into tool calls with regexes and the
//! active dataset's schema, then renders results as plain text. It is
//! deterministic, which makes it the default for the CLI and for tests.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use tabula_core::types::{DatasetRef, RoleName, ToolInvocation, ToolName, Turn};

use crate::classifier::tool_keyword;
use crate::context::FollowUpResolver;
use crate::dispatcher::ToolCall;
use crate::error::ChatError;
use crate::inference::{InferencePlan, InferenceRequest, InferenceService};
use crate::response::ResponseGenerator;

static CSV_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[\w./\\-]+\.csv\b").expect("Invalid csv path regex"));

static LOAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:load|import|open)\b").expect("Invalid load regex")
});

static GROUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:grouped\s+by|group\s+by|broken\s+down\s+by|break\s*down\s+by|by|per|for\s+each)\s+(?:the\s+|each\s+)?",
    )
    .expect("Invalid group regex")
});

static PREDICATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^\s*(>=|<=|!=|==|=|>|<|is\s+not\b|is\b|equals\b|greater\s+than\b|above\b|over\b|less\s+than\b|below\b|under\b)\s*['"]?([^'"?,]+?)['"]?\s*(?:[?,]|\.\s|\.$|$|\band\b)"#,
    )
    .expect("Invalid predicate regex")
});

static THRESHOLD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bthreshold\s*(?:of\s*|=\s*)?(\d+(?:\.\d+)?)").expect("Invalid threshold regex")
});

static TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:total|sum)\b").expect("Invalid total regex"));

/// Words skipped when taking "the word after a keyword" as a column name.
const FILLER: &[&str] = &[
    "a", "about", "all", "an", "and", "are", "by", "column", "data", "dataset", "field", "file",
    "for", "from", "in", "is", "it", "me", "my", "of", "on", "row", "rows", "that", "the", "this",
    "to", "value", "values", "what", "with",
];

const STAT_TOOLS: &[ToolName] = &[
    ToolName::Mean,
    ToolName::Median,
    ToolName::Min,
    ToolName::Max,
    ToolName::StdDev,
];

// =============================================================================
// Column mentions
// =============================================================================

/// A schema column named in the utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Mention {
    start: usize,
    end: usize,
    name: String,
    numeric: bool,
}

/// Schema columns named in the utterance, in utterance order. Underscores in
/// column names also match spaces; overlapping matches keep the longer name.
fn mentioned_columns(utterance: &str, dataset: Option<&DatasetRef>) -> Vec<Mention> {
    let Some(dataset) = dataset else {
        return Vec::new();
    };

    let mut found: Vec<Mention> = Vec::new();
    for col in &dataset.schema {
        let pattern = regex::escape(&col.name).replace(['_', ' '], "[_ ]");
        let Ok(re) = Regex::new(&format!(r"(?i)\b{}\b", pattern)) else {
            continue;
        };
        for m in re.find_iter(utterance) {
            found.push(Mention {
                start: m.start(),
                end: m.end(),
                name: col.name.clone(),
                numeric: col.column_type.is_numeric(),
            });
        }
    }

    found.sort_by(|a, b| a.start.cmp(&b.start).then((b.end - b.start).cmp(&(a.end - a.start))));
    let mut kept: Vec<Mention> = Vec::new();
    for m in found {
        if kept.last().map(|k| m.start < k.end).unwrap_or(false) {
            continue;
        }
        kept.push(m);
    }
    kept
}

/// First non-filler word of `rest`, with punctuation trimmed.
fn next_word(rest: &str) -> Option<String> {
    rest.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '.'))
        .map(|w| w.trim_end_matches('.'))
        .find(|w| !w.is_empty() && !FILLER.contains(&w.to_ascii_lowercase().as_str()))
        .map(str::to_string)
}

/// Word following the first match of `re`, skipping the rest of the matched word.
fn word_after(utterance: &str, re: &Regex) -> Option<String> {
    let m = re.find(utterance)?;
    let rest = &utterance[m.end()..];
    let rest = rest.trim_start_matches(|c: char| c.is_alphanumeric());
    next_word(rest)
}

// =============================================================================
// KeywordInference
// =============================================================================

/// Deterministic regex-driven inference service.
#[derive(Debug, Clone, Default)]
pub struct KeywordInference {
    responses: ResponseGenerator,
    follow_up: FollowUpResolver,
}

/// Calls planned for a request plus tools whose arguments could not be found.
#[derive(Debug, Default)]
struct Draft {
    calls: Vec<ToolCall>,
    unresolved: Vec<ToolName>,
}

impl KeywordInference {
    pub fn new(responses: ResponseGenerator) -> Self {
        Self {
            responses,
            follow_up: FollowUpResolver,
        }
    }

    fn draft(&self, req: &InferenceRequest) -> Draft {
        let utterance = req.utterance.as_str();
        let dataset = req.dataset.as_ref();
        let mentions = mentioned_columns(utterance, dataset);

        let mut tools: Vec<ToolName> = req
            .inferred_tools
            .iter()
            .copied()
            .filter(|t| req.capabilities.contains(t))
            .collect();

        if tools.is_empty() && self.follow_up.is_follow_up(utterance) {
            if let Some(tool) = last_column_tool(&req.history) {
                if req.capabilities.contains(&tool) {
                    tools.push(tool);
                }
            }
        }

        let mut draft = Draft::default();

        if tools.contains(&ToolName::GroupBy) {
            match self.group_by_call(req, &mentions, &tools) {
                Some(call) => {
                    let has_predicate = predicate_for(utterance, &mentions).is_some();
                    tools.retain(|t| {
                        !matches!(
                            t,
                            ToolName::Mean | ToolName::Median | ToolName::Min | ToolName::Max
                        ) && !(*t == ToolName::CountWhere && !has_predicate)
                    });
                    tools.retain(|t| *t != ToolName::GroupBy);
                    draft.calls.push(call);
                }
                None if tools.len() > 1 => tools.retain(|t| *t != ToolName::GroupBy),
                None => {
                    draft.unresolved.push(ToolName::GroupBy);
                    tools.clear();
                }
            }
        }

        let analytic = draft.calls.iter().any(|c| c.name == ToolName::GroupBy)
            || tools
                .iter()
                .any(|t| t.numeric_only() || matches!(t, ToolName::CountWhere | ToolName::ColumnInfo));
        if analytic {
            tools.retain(|t| *t != ToolName::DescribeDataset);
        }

        for tool in tools {
            match self.call_for(tool, req, &mentions) {
                Some(call) => draft.calls.push(call),
                None => draft.unresolved.push(tool),
            }
        }
        draft
    }

    fn call_for(&self, tool: ToolName, req: &InferenceRequest, mentions: &[Mention]) -> Option<ToolCall> {
        let utterance = req.utterance.as_str();
        match tool {
            ToolName::ListDatasets | ToolName::DescribeDataset | ToolName::SuggestQuestions => {
                Some(ToolCall::new(tool))
            }
            ToolName::LoadDataset => load_path(utterance).map(|p| ToolCall::new(tool).arg("path", p)),
            ToolName::ColumnInfo => mentions
                .first()
                .map(|m| m.name.clone())
                .or_else(|| self.implied(req))
                .map(|c| ToolCall::new(tool).arg("column", c)),
            ToolName::Mean
            | ToolName::Median
            | ToolName::Min
            | ToolName::Max
            | ToolName::StdDev
            | ToolName::DetectOutliers => {
                let column = self.stat_column(tool, req, mentions)?;
                let mut call = ToolCall::new(tool).arg("column", column);
                if tool == ToolName::DetectOutliers {
                    if let Some(t) = THRESHOLD_RE
                        .captures(utterance)
                        .and_then(|c| c[1].parse::<f64>().ok())
                    {
                        call = call.arg("threshold", t);
                    }
                }
                Some(call)
            }
            ToolName::CountWhere => {
                let (column, op, value) = predicate_for(utterance, mentions)?;
                Some(
                    ToolCall::new(tool)
                        .arg("column", column)
                        .arg("op", op)
                        .arg("value", value),
                )
            }
            ToolName::CorrelationMatrix => {
                let mut numeric: Vec<String> = Vec::new();
                for m in mentions.iter().filter(|m| m.numeric) {
                    if !numeric.contains(&m.name) {
                        numeric.push(m.name.clone());
                    }
                }
                let call = ToolCall::new(tool);
                if numeric.len() >= 2 {
                    Some(call.arg("columns", numeric))
                } else {
                    Some(call)
                }
            }
            // Handled before the per-tool pass.
            ToolName::GroupBy => None,
        }
    }

    /// Column for a single-column statistic: a numeric mention, any mention,
    /// the word after the keyword, then the column from recent turns.
    fn stat_column(&self, tool: ToolName, req: &InferenceRequest, mentions: &[Mention]) -> Option<String> {
        if let Some(m) = mentions.iter().find(|m| m.numeric).or(mentions.first()) {
            return Some(m.name.clone());
        }
        if let Some(word) = tool_keyword(tool).and_then(|re| word_after(&req.utterance, re)) {
            return Some(word);
        }
        self.implied(req)
    }

    fn implied(&self, req: &InferenceRequest) -> Option<String> {
        self.follow_up.implied_column(&req.history, req.dataset.as_ref())
    }

    fn group_by_call(&self, req: &InferenceRequest, mentions: &[Mention], tools: &[ToolName]) -> Option<ToolCall> {
        let utterance = req.utterance.as_str();

        let group_column = GROUP_RE.find_iter(utterance).find_map(|m| {
            mentions
                .iter()
                .find(|mention| mention.start == m.end())
                .map(|mention| mention.name.clone())
                .or_else(|| next_word(&utterance[m.end()..]))
        })?;

        let agg_column = mentions
            .iter()
            .find(|m| m.numeric && m.name != group_column)
            .map(|m| m.name.clone())
            .or_else(|| self.implied(req).filter(|c| *c != group_column))?;

        let agg = if tools.contains(&ToolName::Mean) {
            "mean"
        } else if tools.contains(&ToolName::Median) {
            "median"
        } else if tools.contains(&ToolName::Min) {
            "min"
        } else if tools.contains(&ToolName::Max) {
            "max"
        } else if TOTAL_RE.is_match(utterance) {
            "sum"
        } else if tools.contains(&ToolName::CountWhere) {
            "count"
        } else {
            "mean"
        };

        Some(
            ToolCall::new(ToolName::GroupBy)
                .arg("group_column", group_column)
                .arg("agg_column", agg_column)
                .arg("agg", agg),
        )
    }

    fn answer_without_tools(&self, req: &InferenceRequest, unresolved: &[ToolName]) -> String {
        let dataset = req.dataset.as_ref();
        if let Some(tool) = unresolved.first() {
            return self.ask_for_arguments(*tool, dataset);
        }

        match req.role {
            RoleName::Coordinator => {
                let mut out = "I coordinate a small team. The Data Loader finds and loads CSV \
                               files, Analytics runs statistics on them, and Communication \
                               explains results and suggests questions."
                    .to_string();
                match dataset {
                    Some(ds) => out.push_str(&format!(
                        "\nCurrently loaded: {} ({} rows).",
                        ds.file_name(),
                        ds.row_count
                    )),
                    None => out.push_str(
                        "\nNo dataset is loaded yet. Try \"which datasets are available?\" \
                         or \"load employee_data.csv\".",
                    ),
                }
                out
            }
            RoleName::DataLoader => {
                "I can list the CSV files in the data directory, load one, and describe its columns."
                    .to_string()
            }
            RoleName::Analytics => match dataset {
                Some(ds) => {
                    let mut out = format!("Ask me for a statistic about {}. For example:", ds.file_name());
                    for q in self.responses.suggestions(ds).into_iter().take(3) {
                        out.push_str(&format!("\n- {}", q));
                    }
                    out
                }
                None => "Load a dataset first, then ask for averages, counts, correlations or outliers."
                    .to_string(),
            },
            RoleName::Communication => {
                if let Some(tool) = last_successful_tool(&req.history) {
                    return explain(tool).to_string();
                }
                match dataset {
                    Some(ds) => {
                        let mut out = format!("Here are some questions you could ask about {}:", ds.file_name());
                        for q in self.responses.suggestions(ds) {
                            out.push_str(&format!("\n- {}", q));
                        }
                        out
                    }
                    None => "Start by loading a CSV file. Once a dataset is loaded I can suggest \
                             questions and explain the results."
                        .to_string(),
                }
            }
        }
    }

    fn ask_for_arguments(&self, tool: ToolName, dataset: Option<&DatasetRef>) -> String {
        match tool {
            ToolName::LoadDataset => {
                "Which file should I load? For example: \"load sales.csv\".".to_string()
            }
            ToolName::CountWhere => {
                let mut out = "Tell me what to count, for example: \"how many rows have region = North?\"."
                    .to_string();
                if let Some(ds) = dataset {
                    out.push_str(&format!(" {} has {} rows in total.", ds.file_name(), ds.row_count));
                }
                out
            }
            ToolName::GroupBy => "Tell me which numeric column to summarise and what to group it by, \
                                  for example: \"average price by region\"."
                .to_string(),
            other => {
                let mut out = format!("Which column should I use for {}?", other);
                if let Some(ds) = dataset {
                    let numeric = ds.numeric_columns();
                    if !numeric.is_empty() {
                        out.push_str(&format!(" Numeric columns: {}.", numeric.join(", ")));
                    }
                }
                out
            }
        }
    }
}

#[async_trait]
impl InferenceService for KeywordInference {
    async fn plan(&self, request: &InferenceRequest) -> Result<InferencePlan, ChatError> {
        let draft = self.draft(request);
        if draft.calls.is_empty() {
            return Ok(InferencePlan::Answer(
                self.answer_without_tools(request, &draft.unresolved),
            ));
        }
        Ok(InferencePlan::UseTools(draft.calls))
    }

    async fn synthesize(
        &self,
        _request: &InferenceRequest,
        invocations: &[ToolInvocation],
    ) -> Result<String, ChatError> {
        let parts: Vec<String> = invocations
            .iter()
            .filter_map(|inv| self.responses.render_invocation(inv))
            .collect();
        Ok(parts.join("\n\n"))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn load_path(utterance: &str) -> Option<String> {
    if let Some(m) = CSV_PATH_RE.find(utterance) {
        return Some(m.as_str().to_string());
    }
    let word = word_after(utterance, &LOAD_RE)?;
    if word.to_ascii_lowercase().ends_with(".csv") {
        Some(word)
    } else {
        Some(format!("{}.csv", word))
    }
}

/// `(column, op, value)` from "<column> <op> <value>".
fn predicate_for(utterance: &str, mentions: &[Mention]) -> Option<(String, String, String)> {
    mentions.iter().find_map(|m| {
        let caps = PREDICATE_RE.captures(&utterance[m.end..])?;
        let op = caps[1].to_ascii_lowercase();
        let op = op.split_whitespace().collect::<Vec<_>>().join(" ");
        let op = match op.as_str() {
            "is" | "equals" | "=" | "==" => "eq",
            "is not" | "!=" => "ne",
            "greater than" | "above" | "over" | ">" => "gt",
            ">=" => "ge",
            "less than" | "below" | "under" | "<" => "lt",
            "<=" => "le",
            _ => return None,
        };
        let value = caps[2].trim().to_string();
        (!value.is_empty()).then(|| (m.name.clone(), op.to_string(), value))
    })
}

/// Tool of the most recent successful column-bearing invocation.
fn last_column_tool(history: &[Turn]) -> Option<ToolName> {
    history.iter().rev().find_map(|turn| {
        turn.tool_invocations
            .iter()
            .rev()
            .find(|inv| inv.outcome.is_ok() && inv.arg_str("column").is_some())
            .map(|inv| inv.name)
            .filter(|t| STAT_TOOLS.contains(t) || *t == ToolName::DetectOutliers)
    })
}

fn last_successful_tool(history: &[Turn]) -> Option<ToolName> {
    history.last().and_then(|turn| {
        turn.tool_invocations
            .iter()
            .rev()
            .find(|inv| inv.outcome.is_ok())
            .map(|inv| inv.name)
    })
}

fn explain(tool: ToolName) -> &'static str {
    match tool {
        ToolName::Mean => {
            "The average (mean) adds up every value and divides by how many there are. \
             A few extreme values can pull it up or down."
        }
        ToolName::Median => {
            "The median is the middle value once the values are sorted, so extreme values barely move it."
        }
        ToolName::Min | ToolName::Max => {
            "The minimum and maximum are the smallest and largest values in the column."
        }
        ToolName::StdDev => {
            "The standard deviation measures how far values typically sit from the average. \
             A larger number means the values are more spread out."
        }
        ToolName::CountWhere => {
            "The count is the number of rows that match your condition; the percentage is \
             relative to all rows in the dataset."
        }
        ToolName::CorrelationMatrix => {
            "A correlation near 1 means two columns rise together and near -1 means one falls \
             as the other rises. Values near 0 mean there is no linear relationship."
        }
        ToolName::DetectOutliers => {
            "Outliers are values whose z-score, the distance from the mean measured in standard \
             deviations, is larger than the threshold."
        }
        ToolName::GroupBy => {
            "Grouping splits the rows by each distinct value of the grouping column and \
             summarises the numeric column within each group."
        }
        ToolName::DescribeDataset | ToolName::ColumnInfo => {
            "Column types are inferred from the values: whole numbers are integers, decimals \
             are floats, true/false are booleans, and anything else is text."
        }
        ToolName::ListDatasets | ToolName::LoadDataset | ToolName::SuggestQuestions => {
            "Once a dataset is loaded you can ask about averages, counts, groups, \
             correlations and outliers."
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use serde_json::json;
    use tabula_core::types::{ColumnSchema, ColumnType, Timestamp};

    use crate::classifier::infer_tools;
    use crate::registry::RoleRegistry;

    fn employees() -> DatasetRef {
        let col = |name: &str, column_type| ColumnSchema {
            name: name.to_string(),
            column_type,
        };
        DatasetRef {
            path: PathBuf::from("/data/employee_data.csv"),
            schema: vec![
                col("name", ColumnType::Text),
                col("department", ColumnType::Text),
                col("salary", ColumnType::Integer),
                col("years_experience", ColumnType::Integer),
                col("remote", ColumnType::Boolean),
            ],
            row_count: 5,
            loaded_at: Timestamp(0),
        }
    }

    fn request(role: RoleName, utterance: &str, dataset: Option<DatasetRef>) -> InferenceRequest {
        let registry = RoleRegistry::builtin();
        InferenceRequest {
            role,
            persona: String::new(),
            capabilities: registry
                .capability_set(role)
                .unwrap()
                .iter()
                .copied()
                .collect(),
            utterance: utterance.to_string(),
            history: vec![],
            dataset,
            inferred_tools: infer_tools(utterance),
        }
    }

    fn calls(plan: InferencePlan) -> Vec<ToolCall> {
        match plan {
            InferencePlan::UseTools(calls) => calls,
            InferencePlan::Answer(text) => panic!("expected tool calls, got answer: {text}"),
        }
    }

    fn answer(plan: InferencePlan) -> String {
        match plan {
            InferencePlan::Answer(text) => text,
            InferencePlan::UseTools(calls) => panic!("expected answer, got calls: {calls:?}"),
        }
    }

    // ---- Column mentions ----

    #[test]
    fn test_mentions_match_spaces_for_underscores() {
        let ds = employees();
        let found = mentioned_columns("average years experience by department", Some(&ds));
        let names: Vec<&str> = found.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["years_experience", "department"]);
        assert!(found[0].numeric);
    }

    #[test]
    fn test_word_after_skips_filler() {
        let re = tool_keyword(ToolName::Mean).unwrap();
        assert_eq!(word_after("what is the average of the cost?", re), Some("cost".to_string()));
        assert_eq!(word_after("what is the average?", re), None);
    }

    // ---- Planning ----

    #[tokio::test]
    async fn test_plan_mean_of_mentioned_column() {
        let ki = KeywordInference::default();
        let req = request(RoleName::Analytics, "What is the average salary?", Some(employees()));
        let calls = calls(ki.plan(&req).await.unwrap());
        assert_eq!(calls, vec![ToolCall::new(ToolName::Mean).arg("column", "salary")]);
    }

    #[tokio::test]
    async fn test_plan_unknown_column_passes_word_through() {
        let ki = KeywordInference::default();
        let req = request(RoleName::Analytics, "what is the average cost?", Some(employees()));
        let calls = calls(ki.plan(&req).await.unwrap());
        assert_eq!(calls[0].args["column"], json!("cost"));
    }

    #[tokio::test]
    async fn test_plan_load_path() {
        let ki = KeywordInference::default();
        let req = request(RoleName::DataLoader, "load sales.csv", None);
        assert_eq!(
            calls(ki.plan(&req).await.unwrap()),
            vec![ToolCall::new(ToolName::LoadDataset).arg("path", "sales.csv")]
        );

        let req = request(RoleName::DataLoader, "please load employee_data", None);
        assert_eq!(
            calls(ki.plan(&req).await.unwrap())[0].args["path"],
            json!("employee_data.csv")
        );
    }

    #[tokio::test]
    async fn test_plan_group_by_folds_stat() {
        let ki = KeywordInference::default();
        let req = request(
            RoleName::Analytics,
            "what is the average salary by department?",
            Some(employees()),
        );
        assert_eq!(
            calls(ki.plan(&req).await.unwrap()),
            vec![ToolCall::new(ToolName::GroupBy)
                .arg("group_column", "department")
                .arg("agg_column", "salary")
                .arg("agg", "mean")]
        );
    }

    #[tokio::test]
    async fn test_plan_group_by_unknown_group_column() {
        let ki = KeywordInference::default();
        let req = request(
            RoleName::Analytics,
            "average salary by nonexistent_column",
            Some(employees()),
        );
        let calls = calls(ki.plan(&req).await.unwrap());
        assert_eq!(calls[0].args["group_column"], json!("nonexistent_column"));
    }

    #[tokio::test]
    async fn test_plan_count_where() {
        let ki = KeywordInference::default();
        let req = request(
            RoleName::Analytics,
            "how many rows have department = 'Engineering'?",
            Some(employees()),
        );
        assert_eq!(
            calls(ki.plan(&req).await.unwrap()),
            vec![ToolCall::new(ToolName::CountWhere)
                .arg("column", "department")
                .arg("op", "eq")
                .arg("value", "Engineering")]
        );
    }

    #[tokio::test]
    async fn test_plan_count_where_words() {
        let ki = KeywordInference::default();
        let req = request(
            RoleName::Analytics,
            "how many employees have salary above 90000?",
            Some(employees()),
        );
        let calls = calls(ki.plan(&req).await.unwrap());
        assert_eq!(calls[0].args["op"], json!("gt"));
        assert_eq!(calls[0].args["value"], json!("90000"));
    }

    #[tokio::test]
    async fn test_plan_outliers_threshold() {
        let ki = KeywordInference::default();
        let req = request(
            RoleName::Analytics,
            "find outliers in salary with threshold 1.5",
            Some(employees()),
        );
        let calls = calls(ki.plan(&req).await.unwrap());
        assert_eq!(calls[0].name, ToolName::DetectOutliers);
        assert_eq!(calls[0].args["threshold"], json!(1.5));
    }

    #[tokio::test]
    async fn test_plan_ignores_tools_outside_capabilities() {
        let ki = KeywordInference::default();
        let req = request(RoleName::Coordinator, "what is the average salary?", Some(employees()));
        let text = answer(ki.plan(&req).await.unwrap());
        assert!(text.contains("Currently loaded: employee_data.csv"));
    }

    #[tokio::test]
    async fn test_plan_follow_up_uses_implied_column() {
        let ki = KeywordInference::default();
        let mut req = request(RoleName::Analytics, "what about the median?", Some(employees()));
        req.history = vec![Turn {
            index: 0,
            role: RoleName::Analytics,
            user_text: "what is the average salary?".to_string(),
            assistant_text: String::new(),
            tool_invocations: vec![ToolInvocation {
                name: ToolName::Mean,
                args: json!({"column": "salary"}).as_object().cloned().unwrap(),
                outcome: Ok(json!({"mean": 94000.0})),
            }],
            handoff_from: None,
            created_at: Timestamp(0),
        }];
        assert_eq!(
            calls(ki.plan(&req).await.unwrap()),
            vec![ToolCall::new(ToolName::Median).arg("column", "salary")]
        );

        // New column, same tool.
        req.utterance = "and years experience?".to_string();
        req.inferred_tools = infer_tools(&req.utterance);
        assert_eq!(
            calls(ki.plan(&req).await.unwrap()),
            vec![ToolCall::new(ToolName::Mean).arg("column", "years_experience")]
        );
    }

    #[tokio::test]
    async fn test_plan_asks_for_missing_column() {
        let ki = KeywordInference::default();
        let req = request(RoleName::Analytics, "what is the average?", Some(employees()));
        let text = answer(ki.plan(&req).await.unwrap());
        assert!(text.contains("Which column should I use for mean?"));
        assert!(text.contains("salary, years_experience"));
    }

    #[tokio::test]
    async fn test_communication_suggests_questions() {
        let ki = KeywordInference::default();
        let req = request(RoleName::Communication, "help me understand this data", Some(employees()));
        let text = answer(ki.plan(&req).await.unwrap());
        assert!(text.starts_with("Here are some questions"));
        assert!(text.contains("average salary"));
    }

    // ---- Synthesis ----

    #[tokio::test]
    async fn test_synthesize_skips_validation_errors() {
        let ki = KeywordInference::default();
        let req = request(RoleName::Analytics, "average cost", Some(employees()));
        let invocations = vec![ToolInvocation {
            name: ToolName::Mean,
            args: json!({"column": "cost"}).as_object().cloned().unwrap(),
            outcome: Err(tabula_core::types::ToolErrorKind::ColumnNotFound {
                column: "cost".to_string(),
                available: employees().column_names(),
            }),
        }];
        assert_eq!(ki.synthesize(&req, &invocations).await.unwrap(), "");
    }
}
