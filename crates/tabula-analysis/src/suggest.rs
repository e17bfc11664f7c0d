use tabula_core::types::{ColumnType, DatasetRef};

/// Upper bound on suggestions returned for one dataset.
pub const MAX_SUGGESTIONS: usize = 8;

/// Follow-up questions derived from a dataset's schema alone.
pub fn suggest_questions(dataset: &DatasetRef) -> Vec<String> {
    let numeric = dataset.numeric_columns();
    let text: Vec<&str> = dataset
        .schema
        .iter()
        .filter(|c| c.column_type == ColumnType::Text)
        .map(|c| c.name.as_str())
        .collect();

    let mut suggestions = Vec::new();

    if let Some(col) = numeric.first() {
        suggestions.push(format!("what is the average {}?", col));
        suggestions.push(format!("what is the highest {}?", col));
        suggestions.push(format!("are there any outliers in {}?", col));
    }

    if let Some(col) = text.first() {
        suggestions.push(format!("how many rows have {} = 'some value'?", col));
        if let Some(num) = numeric.first() {
            suggestions.push(format!("what is the average {} by {}?", num, col));
        }
    }

    if numeric.len() >= 2 {
        suggestions.push("what are the correlations between numeric columns?".to_string());
        suggestions.push(format!("what is the median {}?", numeric[1]));
    }

    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}
