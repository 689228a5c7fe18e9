//! In-memory typed tables
//!
//! Student data arrives as whole delimited-text tables with a header row. This
//! module holds them in memory as rows of typed cells and provides the column
//! statistics the pipelines need (median, mode, kind inference), plus CSV
//! read/write and append.

use crate::error::{Result, ScholarError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// A single table cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    Missing,
}

impl Cell {
    /// Parse a raw CSV field. Empty and NA-style markers become `Missing`.
    pub fn parse(raw: &str) -> Cell {
        let trimmed = raw.trim();
        match trimmed {
            "" | "NA" | "N/A" | "NaN" | "nan" | "null" | "None" => Cell::Missing,
            _ => match trimmed.parse::<f64>() {
                Ok(value) if value.is_finite() => Cell::Number(value),
                _ => Cell::Text(trimmed.to_string()),
            },
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    /// Render the cell the way it is written back to CSV
    pub fn to_field(&self) -> String {
        match self {
            Cell::Number(value) => value.to_string(),
            Cell::Text(value) => value.clone(),
            Cell::Missing => String::new(),
        }
    }

    /// Total order used for mode tie-breaking: numbers before text, numbers by
    /// value, text lexicographically.
    fn total_cmp(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Number(a), Cell::Number(b)) => a.total_cmp(b),
            (Cell::Number(_), _) => Ordering::Less,
            (_, Cell::Number(_)) => Ordering::Greater,
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            (Cell::Text(_), Cell::Missing) => Ordering::Less,
            (Cell::Missing, Cell::Text(_)) => Ordering::Greater,
            (Cell::Missing, Cell::Missing) => Ordering::Equal,
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

/// A row keyed by column name
pub type FeatureRow = BTreeMap<String, Cell>;

/// Inferred kind of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// Column-named table of typed cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Create an empty table with the given header
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from a header and rows, checking row widths
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Read a CSV file. A missing file is reported as `DataNotFound`.
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScholarError::DataNotFound(path.to_path_buf()));
        }
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Parse CSV text from any reader
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut table = Self::new(columns);

        for record in reader.records() {
            let record = record?;
            table.rows.push(record.iter().map(Cell::parse).collect());
        }

        Ok(table)
    }

    /// Write the table as CSV to a file, replacing its contents
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        self.to_writer(file)
    }

    /// Write the table as CSV to any writer
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(Cell::to_field))?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell at (row, column name)
    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Row as a name-keyed map
    pub fn row_map(&self, row: usize) -> Option<FeatureRow> {
        let cells = self.rows.get(row)?;
        Some(
            self.columns
                .iter()
                .cloned()
                .zip(cells.iter().cloned())
                .collect(),
        )
    }

    /// All cells of a column, in row order
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Non-missing numeric values of a column
    pub fn numeric_values(&self, name: &str) -> Option<Vec<f64>> {
        let cells = self.column(name)?;
        Some(cells.into_iter().filter_map(Cell::as_f64).collect())
    }

    /// A column is numeric when none of its present cells is text
    pub fn column_kind(&self, name: &str) -> Option<ColumnKind> {
        let cells = self.column(name)?;
        if cells.iter().any(|c| matches!(c, Cell::Text(_))) {
            Some(ColumnKind::Categorical)
        } else {
            Some(ColumnKind::Numeric)
        }
    }

    /// Median of the present numeric values
    pub fn median(&self, name: &str) -> Option<f64> {
        let mut values = self.numeric_values(name)?;
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            Some((values[mid - 1] + values[mid]) / 2.0)
        } else {
            Some(values[mid])
        }
    }

    /// Mean of the present numeric values
    pub fn mean(&self, name: &str) -> Option<f64> {
        let values = self.numeric_values(name)?;
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Most frequent present value. Ties resolve to the smallest value.
    pub fn mode(&self, name: &str) -> Option<Cell> {
        let mut cells: Vec<&Cell> = self
            .column(name)?
            .into_iter()
            .filter(|c| !c.is_missing())
            .collect();
        if cells.is_empty() {
            return None;
        }
        cells.sort_by(|a, b| a.total_cmp(b));

        let mut best: Option<(&Cell, usize)> = None;
        let mut i = 0;
        while i < cells.len() {
            let mut j = i + 1;
            while j < cells.len() && cells[j].total_cmp(cells[i]) == Ordering::Equal {
                j += 1;
            }
            let run = j - i;
            if best.map_or(true, |(_, count)| run > count) {
                best = Some((cells[i], run));
            }
            i = j;
        }
        best.map(|(cell, _)| cell.clone())
    }

    /// Append a row; its width must match the header
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(ScholarError::SchemaMismatch(format!(
                "row has {} cells but table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append a name-keyed row; absent columns become `Missing`, unknown keys
    /// are ignored.
    pub fn push_row_map(&mut self, row: &FeatureRow) {
        let cells = self
            .columns
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or(Cell::Missing))
            .collect();
        self.rows.push(cells);
    }

    /// Append all rows of `other`, aligning by column name. Columns only
    /// present in `other` are added to this table, so the column count never
    /// decreases.
    pub fn append(&mut self, other: &Table) {
        for column in &other.columns {
            if !self.has_column(column) {
                self.columns.push(column.clone());
                for row in &mut self.rows {
                    row.push(Cell::Missing);
                }
            }
        }

        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| other.column_index(c))
            .collect();

        for row in &other.rows {
            let cells = mapping
                .iter()
                .map(|idx| idx.map_or(Cell::Missing, |i| row[i].clone()))
                .collect();
            self.rows.push(cells);
        }
    }

    /// Project onto the given columns, in the given order
    pub fn select(&self, columns: &[String]) -> Result<Table> {
        let indices = columns
            .iter()
            .map(|c| {
                self.column_index(c).ok_or_else(|| {
                    ScholarError::SchemaMismatch(format!("column '{c}' not present in table"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();

        Ok(Table {
            columns: columns.to_vec(),
            rows,
        })
    }

    /// Copy of the table without the named columns (absent names are ignored)
    pub fn drop_columns(&self, names: &[&str]) -> Table {
        let keep: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !names.contains(&c.as_str()))
            .cloned()
            .collect();
        // every kept column exists, so select cannot fail
        self.select(&keep).unwrap_or_default()
    }

    /// Rows for which `predicate` holds
    pub fn filter_rows<F>(&self, mut predicate: F) -> Table
    where
        F: FnMut(usize, &[Cell]) -> bool,
    {
        let rows = self
            .rows
            .iter()
            .enumerate()
            .filter(|(i, row)| predicate(*i, row))
            .map(|(_, row)| row.clone())
            .collect();
        Table {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Rename a column. Returns false, leaving the table unchanged, when
    /// `from` is absent or `to` already exists.
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        if self.has_column(to) {
            return false;
        }
        match self.column_index(from) {
            Some(idx) => {
                self.columns[idx] = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Replace a column's values, adding the column when absent
    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(ScholarError::SchemaMismatch(format!(
                "column '{name}' has {} values but table has {} rows",
                values.len(),
                self.rows.len()
            )));
        }
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_csv() -> &'static str {
        "Hours_Studied,Gender,Exam_Score\n\
         10,Male,70\n\
         20,Female,80\n\
         ,Female,75\n\
         30,Male,NA\n\
         40,Female,90\n"
    }

    #[test]
    fn test_parse_cells() {
        assert_eq!(Cell::parse(" 12.5 "), Cell::Number(12.5));
        assert_eq!(Cell::parse("Low"), Cell::Text("Low".to_string()));
        assert_eq!(Cell::parse(""), Cell::Missing);
        assert_eq!(Cell::parse("NaN"), Cell::Missing);
    }

    #[test]
    fn test_read_and_stats() {
        let table = Table::from_reader(sample_csv().as_bytes()).unwrap();
        assert_eq!(table.len(), 5);
        assert_eq!(table.column_kind("Hours_Studied"), Some(ColumnKind::Numeric));
        assert_eq!(table.column_kind("Gender"), Some(ColumnKind::Categorical));

        // 10, 20, 30, 40 -> 25
        assert_eq!(table.median("Hours_Studied"), Some(25.0));
        assert_eq!(table.mode("Gender"), Some(Cell::Text("Female".to_string())));
        assert_eq!(table.mean("Exam_Score"), Some(78.75));
    }

    #[test]
    fn test_mode_tie_picks_smallest() {
        let table = Table::from_reader("x\n3\n1\n3\n1\n".as_bytes()).unwrap();
        assert_eq!(table.mode("x"), Some(Cell::Number(1.0)));
    }

    #[test]
    fn test_append_unions_columns() {
        let mut base = Table::from_reader("a,b\n1,x\n".as_bytes()).unwrap();
        let other = Table::from_reader("b,c\ny,2\n".as_bytes()).unwrap();
        base.append(&other);

        assert_eq!(base.columns(), &["a", "b", "c"]);
        assert_eq!(base.len(), 2);
        assert_eq!(base.cell(0, "c"), Some(&Cell::Missing));
        assert_eq!(base.cell(1, "a"), Some(&Cell::Missing));
        assert_eq!(base.cell(1, "b"), Some(&Cell::Text("y".to_string())));
    }

    #[test]
    fn test_select_and_drop() {
        let table = Table::from_reader(sample_csv().as_bytes()).unwrap();
        let dropped = table.drop_columns(&["Exam_Score", "Not_There"]);
        assert_eq!(dropped.columns(), &["Hours_Studied", "Gender"]);

        let err = table.select(&["Missing_Column".to_string()]);
        assert!(matches!(err, Err(ScholarError::SchemaMismatch(_))));
    }

    #[test]
    fn test_csv_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("table.csv");
        let table = Table::from_reader(sample_csv().as_bytes()).unwrap();
        table.write_csv(&path).unwrap();

        let loaded = Table::read_csv(&path).unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn test_missing_file_is_data_not_found() {
        let result = Table::read_csv("/definitely/not/here.csv");
        assert!(matches!(result, Err(ScholarError::DataNotFound(_))));
    }
}
