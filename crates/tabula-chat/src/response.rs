//! Response composition for chat turns.
//!
//! Renders tool results, validation guidance, capability gaps and follow-up
//! suggestions into plain text without requiring an LLM.

use serde_json::Value;

use tabula_core::types::{DatasetRef, RoleName, ToolErrorKind, ToolInvocation, ToolName};

/// Shown when a persisted write failed after retries.
pub const PERSISTENCE_WARNING: &str =
    "(Warning: this conversation may not be fully remembered; saving the last turn failed.)";

/// Shown instead of raw capability violations.
pub const CAPABILITY_FAULT: &str = "Part of that request could not be completed.";

/// Everything needed to render one turn's answer.
#[derive(Debug, Clone, Copy)]
pub struct TurnSummary<'a> {
    pub role: RoleName,
    /// Set when control moved to `role` this turn.
    pub handoff: bool,
    /// Text from the inference service.
    pub body: &'a str,
    pub invocations: &'a [ToolInvocation],
    pub capability_gap: &'a [ToolName],
    pub dataset: Option<&'a DatasetRef>,
}

// =============================================================================
// ResponseGenerator
// =============================================================================

/// Generates chat answers from tool results.
#[derive(Debug, Clone)]
pub struct ResponseGenerator {
    /// Maximum number of suggestions appended to guidance.
    pub max_suggestions: usize,
}

impl Default for ResponseGenerator {
    fn default() -> Self {
        Self::new(tabula_analysis::suggest::MAX_SUGGESTIONS)
    }
}

impl ResponseGenerator {
    pub fn new(max_suggestions: usize) -> Self {
        Self { max_suggestions }
    }

    /// Short notice naming the role that took over.
    pub fn transition_notice(&self, role: RoleName) -> String {
        format!("[→ {}]", role.label())
    }

    /// Assemble the final answer for a turn.
    pub fn compose(&self, turn: &TurnSummary<'_>) -> String {
        let mut sections: Vec<String> = Vec::new();

        if turn.handoff {
            sections.push(self.transition_notice(turn.role));
        }

        let body = turn.body.trim();
        if !body.is_empty() {
            sections.push(body.to_string());
        }

        let mut guidance: Vec<String> = Vec::new();
        for inv in turn.invocations {
            if let Err(err) = &inv.outcome {
                if err.is_validation() {
                    let text = self.schema_guidance(err, turn.dataset);
                    if !guidance.contains(&text) {
                        guidance.push(text);
                    }
                }
            }
        }
        sections.extend(guidance);

        let violated = turn
            .invocations
            .iter()
            .any(|inv| matches!(inv.outcome, Err(ToolErrorKind::CapabilityViolation { .. })));
        if violated {
            sections.push(CAPABILITY_FAULT.to_string());
        }

        if !turn.capability_gap.is_empty() {
            sections.push(self.capability_gap(turn.role, turn.capability_gap));
        }

        if sections.is_empty() || (sections.len() == 1 && turn.handoff) {
            sections.push("How can I help with your data?".to_string());
        }

        sections.join("\n\n")
    }

    /// Explain a validation failure using the current schema.
    pub fn schema_guidance(&self, err: &ToolErrorKind, dataset: Option<&DatasetRef>) -> String {
        let Some(dataset) = dataset else {
            return "No dataset is loaded yet. Load a CSV file first, for example: \
                    \"load employee_data.csv\"."
                .to_string();
        };

        let lead = match err {
            ToolErrorKind::ColumnNotFound { column, .. } => {
                format!("There is no column named '{}' in {}.", column, dataset.file_name())
            }
            ToolErrorKind::TypeMismatch { column, actual } => format!(
                "Column '{}' is {}, so that calculation needs a numeric column instead.",
                column, actual
            ),
            other => format!("{}.", capitalize(&other.to_string())),
        };

        format!("{}\n{}", lead, self.schema_listing(dataset))
    }

    /// Column list of a dataset, one per line.
    pub fn schema_listing(&self, dataset: &DatasetRef) -> String {
        let mut out = format!("Available columns in {}:", dataset.file_name());
        for col in &dataset.schema {
            out.push_str(&format!("\n- {} ({})", col.name, col.column_type));
        }
        out
    }

    /// Report tools the resolved role cannot run.
    pub fn capability_gap(&self, role: RoleName, tools: &[ToolName]) -> String {
        let names: Vec<String> = tools.iter().map(|t| t.to_string()).collect();
        format!(
            "The {} role can't run {} for this request. Ask again and it will be routed to a specialist that can.",
            role.label(),
            names.join(", ")
        )
    }

    /// Schema-derived follow-up questions.
    pub fn suggestions(&self, dataset: &DatasetRef) -> Vec<String> {
        let mut out = tabula_analysis::suggest_questions(dataset);
        out.truncate(self.max_suggestions);
        out
    }

    /// Plain-text rendering of one invocation. Validation failures and
    /// capability violations render as `None`; `compose` covers those.
    pub fn render_invocation(&self, inv: &ToolInvocation) -> Option<String> {
        match &inv.outcome {
            Ok(value) => Some(render_value(inv.name, value)),
            Err(err) if err.is_validation() => None,
            Err(ToolErrorKind::CapabilityViolation { .. }) => None,
            Err(err) => Some(format!("I couldn't run {}: {}.", inv.name, err)),
        }
    }
}

// =============================================================================
// Per-tool rendering
// =============================================================================

fn render_value(tool: ToolName, v: &Value) -> String {
    let rendered = match tool {
        ToolName::ListDatasets => render_list(v),
        ToolName::LoadDataset => render_loaded(v),
        ToolName::DescribeDataset => render_describe(v),
        ToolName::ColumnInfo => render_profile(v),
        ToolName::Mean => render_stat("The average", "mean", v),
        ToolName::Median => render_stat("The median", "median", v),
        ToolName::Min => render_stat("The minimum", "min", v),
        ToolName::Max => render_stat("The maximum", "max", v),
        ToolName::StdDev => render_stat("The standard deviation", "std_dev", v),
        ToolName::CountWhere => render_count(v),
        ToolName::CorrelationMatrix => render_correlations(v),
        ToolName::DetectOutliers => render_outliers(v),
        ToolName::GroupBy => render_group_by(v),
        ToolName::SuggestQuestions => render_suggestions(v),
    };
    rendered.unwrap_or_else(|| format!("{}: {}", tool, v))
}

fn text<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

/// Integers print as-is; other numbers with two decimals.
pub fn format_number(v: &Value) -> String {
    if let Some(i) = v.as_i64() {
        return i.to_string();
    }
    match v.as_f64() {
        Some(f) => format!("{:.2}", f),
        None if v.is_null() => "n/a".to_string(),
        None => v.to_string(),
    }
}

fn render_list(v: &Value) -> Option<String> {
    let names: Vec<&str> = v.get("datasets")?.as_array()?.iter().filter_map(Value::as_str).collect();
    if names.is_empty() {
        return Some("No CSV files were found in the data directory.".to_string());
    }
    Some(format!("Available datasets: {}", names.join(", ")))
}

fn render_loaded(v: &Value) -> Option<String> {
    let columns: Vec<&str> = v.get("columns")?.as_array()?.iter().filter_map(Value::as_str).collect();
    Some(format!(
        "Loaded {}: {} rows and {} columns ({}).",
        text(v, "file_name")?,
        format_number(v.get("row_count")?),
        columns.len(),
        columns.join(", ")
    ))
}

fn render_describe(v: &Value) -> Option<String> {
    let columns = v.get("columns")?.as_array()?;
    let mut out = format!(
        "{} has {} rows and {} columns:",
        text(v, "file_name")?,
        format_number(v.get("row_count")?),
        columns.len()
    );
    for col in columns {
        out.push_str(&format!("\n- {} ({})", text(col, "name")?, text(col, "type")?));
    }
    Some(out)
}

fn render_profile(v: &Value) -> Option<String> {
    let mut out = format!(
        "Column '{}' ({}): {} values, {} missing, {} unique.",
        text(v, "column")?,
        text(v, "type")?,
        format_number(v.get("total_values")?),
        format_number(v.get("missing_values")?),
        format_number(v.get("unique_values")?),
    );
    let stats: Vec<String> = ["min", "max", "mean", "median", "std_dev"]
        .iter()
        .filter_map(|k| v.get(*k).map(|x| format!("{} {}", k, format_number(x))))
        .collect();
    if !stats.is_empty() {
        out.push_str(&format!(" {}.", stats.join(", ")));
    }
    if let Some(samples) = v.get("sample_values").and_then(Value::as_array) {
        let samples: Vec<&str> = samples.iter().filter_map(Value::as_str).collect();
        out.push_str(&format!(" Sample values: {}.", samples.join(", ")));
    }
    Some(out)
}

fn render_stat(label: &str, key: &str, v: &Value) -> Option<String> {
    Some(format!(
        "{} of {} is {} (over {} values).",
        label,
        text(v, "column")?,
        format_number(v.get(key)?),
        format_number(v.get("count")?),
    ))
}

fn render_count(v: &Value) -> Option<String> {
    let op = match text(v, "op")? {
        "eq" => "=",
        "ne" => "!=",
        "gt" => ">",
        "ge" => ">=",
        "lt" => "<",
        "le" => "<=",
        other => other,
    };
    Some(format!(
        "{} of {} rows ({}%) have {} {} {}.",
        format_number(v.get("matching_rows")?),
        format_number(v.get("total_rows")?),
        format_number(v.get("percentage")?),
        text(v, "column")?,
        op,
        text(v, "value")?,
    ))
}

fn render_correlations(v: &Value) -> Option<String> {
    let mut out = "Correlations between numeric columns:".to_string();
    for pair in v.get("correlations")?.as_array()? {
        let r = pair.get("correlation")?;
        let r = match r.as_f64() {
            Some(f) => format!("{:.3}", f),
            None => "n/a".to_string(),
        };
        out.push_str(&format!(
            "\n- {} vs {}: {}",
            text(pair, "column1")?,
            text(pair, "column2")?,
            r
        ));
    }
    Some(out)
}

fn render_outliers(v: &Value) -> Option<String> {
    let column = text(v, "column")?;
    let threshold = format_number(v.get("threshold")?);
    let outliers = v.get("outliers")?.as_array()?;
    if outliers.is_empty() {
        return Some(format!(
            "No outliers found in {} (|z-score| > {}).",
            column, threshold
        ));
    }
    let listed: Vec<String> = outliers
        .iter()
        .filter_map(|o| {
            let row = o.get("row")?.as_u64()?;
            Some(format!("{} (row {})", format_number(o.get("value")?), row + 1))
        })
        .collect();
    Some(format!(
        "Found {} outlier(s) in {} (|z-score| > {}): {}.",
        outliers.len(),
        column,
        threshold,
        listed.join(", ")
    ))
}

fn render_group_by(v: &Value) -> Option<String> {
    let mut out = format!(
        "{} of {} by {}:",
        capitalize(text(v, "agg")?),
        text(v, "agg_column")?,
        text(v, "group_column")?
    );
    for (group, value) in v.get("results")?.as_object()? {
        out.push_str(&format!("\n- {}: {}", group, format_number(value)));
    }
    Some(out)
}

fn render_suggestions(v: &Value) -> Option<String> {
    let items: Vec<&str> = v.get("suggestions")?.as_array()?.iter().filter_map(Value::as_str).collect();
    if items.is_empty() {
        return Some("I don't have any suggestions for this dataset yet.".to_string());
    }
    let mut out = "You could ask:".to_string();
    for q in items {
        out.push_str(&format!("\n- {}", q));
    }
    Some(out)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// =============================================================================
// Tests
// =============================================================================
