//! In-memory column store built from a CSV file.
//!
//! Cells are kept as trimmed strings; empty cells are missing values. Each
//! column's type is inferred once at load time from its non-missing cells.

use std::io::Read;
use std::path::Path;

use tabula_core::types::{ColumnSchema, ColumnType};

use crate::error::{AnalysisError, Result};

/// One named column.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    cells: Vec<Option<String>>,
}

impl Column {
    fn new(name: String, cells: Vec<Option<String>>) -> Self {
        let column_type = infer_type(&cells);
        Self {
            name,
            column_type,
            cells,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, row: usize) -> Option<&str> {
        self.cells.get(row).and_then(|c| c.as_deref())
    }

    pub fn missing(&self) -> usize {
        self.cells.iter().filter(|c| c.is_none()).count()
    }

    /// Numeric value at `row`, if the cell is present and parses.
    pub fn number(&self, row: usize) -> Option<f64> {
        self.cell(row).and_then(|s| s.parse::<f64>().ok())
    }

    /// All non-missing numeric values in row order.
    pub fn numbers(&self) -> Vec<f64> {
        (0..self.len()).filter_map(|row| self.number(row)).collect()
    }

    /// Distinct non-missing values in first-seen order.
    pub fn distinct(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for value in self.cells.iter().flatten() {
            if !seen.contains(&value.as_str()) {
                seen.push(value);
            }
        }
        seen
    }

    pub fn schema(&self) -> ColumnSchema {
        ColumnSchema {
            name: self.name.clone(),
            column_type: self.column_type,
        }
    }
}

/// A parsed dataset, columns in file order.
#[derive(Debug, Clone)]
pub struct Table {
    columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    /// Parse a CSV file with a header row.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(AnalysisError::FileNotFound(path.to_path_buf()));
        }
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
        if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
            return Err(AnalysisError::Parse("missing header row".to_string()));
        }
        for (i, name) in headers.iter().enumerate() {
            if name.is_empty() {
                return Err(AnalysisError::Parse(format!(
                    "column {} has an empty header",
                    i + 1
                )));
            }
            if headers[..i].contains(name) {
                return Err(AnalysisError::Parse(format!(
                    "duplicate column name '{}'",
                    name
                )));
            }
        }

        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        let mut row_count = 0;
        for record in rdr.records() {
            let record = record?;
            for (col, value) in record.iter().enumerate() {
                let value = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
                cells[col].push(value);
            }
            row_count += 1;
        }

        let columns = headers
            .into_iter()
            .zip(cells)
            .map(|(name, cells)| Column::new(name, cells))
            .collect();

        Ok(Self { columns, row_count })
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn schema(&self) -> Vec<ColumnSchema> {
        self.columns.iter().map(Column::schema).collect()
    }

    /// Look up a column by exact name.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| AnalysisError::ColumnNotFound {
                column: name.to_string(),
                available: self.column_names(),
            })
    }

    /// Look up a column that must hold numbers.
    pub fn numeric_column(&self, name: &str) -> Result<&Column> {
        let column = self.column(name)?;
        if !column.column_type.is_numeric() {
            return Err(AnalysisError::NotNumeric {
                column: name.to_string(),
                actual: column.column_type,
            });
        }
        Ok(column)
    }

    pub fn numeric_columns(&self) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| c.column_type.is_numeric())
            .collect()
    }
}

fn infer_type(cells: &[Option<String>]) -> ColumnType {
    let mut present = cells.iter().flatten().peekable();
    if present.peek().is_none() {
        return ColumnType::Text;
    }

    let values: Vec<&str> = present.map(|s| s.as_str()).collect();
    if values.iter().all(|v| v.parse::<i64>().is_ok()) {
        ColumnType::Integer
    } else if values.iter().all(|v| v.parse::<f64>().is_ok()) {
        ColumnType::Float
    } else if values
        .iter()
        .all(|v| v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("false"))
    {
        ColumnType::Boolean
    } else {
        ColumnType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPLOYEES: &str = "\
name,department,salary,rating,remote
Ann,Engineering,120000,4.5,true
Bob,Sales,80000,3.9,false
Cid,Engineering,110000,,true
Dee,Marketing,70000,4.1,false
";

    fn employees() -> Table {
        Table::from_reader(EMPLOYEES.as_bytes()).unwrap()
    }

    #[test]
    fn test_infers_column_types() {
        let table = employees();
        let types: Vec<ColumnType> = table.columns().iter().map(|c| c.column_type).collect();
        assert_eq!(
            types,
            vec![
                ColumnType::Text,
                ColumnType::Text,
                ColumnType::Integer,
                ColumnType::Float,
                ColumnType::Boolean,
            ]
        );
        assert_eq!(table.row_count(), 4);
    }

    #[test]
    fn test_missing_cells() {
        let table = employees();
        let rating = table.column("rating").unwrap();
        assert_eq!(rating.missing(), 1);
        assert_eq!(rating.numbers(), vec![4.5, 3.9, 4.1]);
        assert_eq!(rating.number(2), None);
    }

    #[test]
    fn test_column_not_found_lists_schema() {
        let table = employees();
        match table.column("nonexistent_column").unwrap_err() {
            AnalysisError::ColumnNotFound { column, available } => {
                assert_eq!(column, "nonexistent_column");
                assert_eq!(available.len(), 5);
                assert!(available.contains(&"salary".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_numeric_column_rejects_text() {
        let table = employees();
        assert!(matches!(
            table.numeric_column("department").unwrap_err(),
            AnalysisError::NotNumeric { .. }
        ));
        assert!(table.numeric_column("salary").is_ok());
        assert_eq!(table.numeric_columns().len(), 2);
    }

    #[test]
    fn test_distinct_preserves_first_seen_order() {
        let table = employees();
        let dept = table.column("department").unwrap();
        assert_eq!(dept.distinct(), vec!["Engineering", "Sales", "Marketing"]);
    }

    #[test]
    fn test_ragged_rows_are_parse_errors() {
        let err = Table::from_reader("a,b\n1,2\n3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, AnalysisError::Parse(_)));
    }

    #[test]
    fn test_duplicate_headers_rejected() {
        let err = Table::from_reader("a,a\n1,2\n".as_bytes()).unwrap_err();
        assert!(matches!(err, AnalysisError::Parse(_)));
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(Table::from_reader("".as_bytes()).is_err());
    }

    #[test]
    fn test_header_only_file_has_zero_rows() {
        let table = Table::from_reader("price,quantity\n".as_bytes()).unwrap();
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.columns()[0].column_type, ColumnType::Text);
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = Table::from_path(Path::new("/definitely/missing.csv")).unwrap_err();
        assert!(matches!(err, AnalysisError::FileNotFound(_)));
    }
}
