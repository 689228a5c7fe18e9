//! Delimited-text (CSV) upload adapter
//!
//! Uploaded tables carry the raw student columns with a header row. Every row
//! is canonicalized up front so a malformed upload is rejected before anything
//! is written.

use super::{record_from_row, RecordAdapter, CATEGORICAL_ALIASES, NUMERIC_ALIASES};
use crate::error::{Result, ScholarError};
use crate::table::{Cell, Table};
use crate::types::{NumericField, RawStudentRecord};

/// Adapter for CSV student tables
pub struct CsvRecordAdapter;

impl CsvRecordAdapter {
    /// Parse CSV text into the raw table and its canonical records.
    ///
    /// Alias headers are renamed to canonical column names so the table can
    /// be appended to the reference table. Errors name the offending data row
    /// (1-based, header excluded).
    pub fn parse_table(input: &str) -> Result<(Table, Vec<RawStudentRecord>)> {
        let mut table = Table::from_reader(input.as_bytes())
            .map_err(|e| ScholarError::InvalidUpload(e.to_string()))?;

        let headers = table.columns().to_vec();
        for header in &headers {
            if let Some(canonical) = canonical_header(header) {
                if canonical != header.as_str() {
                    table.rename_column(header, canonical);
                }
            }
        }

        if table.columns().is_empty() {
            return Err(ScholarError::InvalidUpload("missing header row".to_string()));
        }

        let previous_column = NumericField::PreviousScores.column();
        let records = (0..table.len())
            .map(|i| -> Result<RawStudentRecord> {
                let row = table.row_map(i).unwrap_or_default();
                let mut record = record_from_row(&row)
                    .map_err(|e| ScholarError::InvalidUpload(format!("row {}: {e}", i + 1)))?;
                // in uploads the exam score never stands in for a previous score
                if row.get(previous_column).map_or(true, Cell::is_missing) {
                    record.previous_scores = None;
                }
                Ok(record)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((table, records))
    }
}

/// Canonical column for a header spelling
fn canonical_header(header: &str) -> Option<&'static str> {
    // reversed so that examScore names the target rather than the previous score
    NUMERIC_ALIASES
        .iter()
        .rev()
        .find(|(_, aliases)| aliases.contains(&header))
        .map(|(field, _)| field.column())
        .or_else(|| {
            CATEGORICAL_ALIASES
                .iter()
                .find(|(column, aliases)| *column == header || aliases.contains(&header))
                .map(|(column, _)| *column)
        })
}

impl RecordAdapter for CsvRecordAdapter {
    fn parse(&self, input: &str) -> Result<Vec<RawStudentRecord>> {
        Self::parse_table(input).map(|(_, records)| records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_upload() {
        let csv = "Hours_Studied,Attendance,Sleep_Hours,Previous_Scores,Tutoring_Sessions,Physical_Activity,Gender,Exam_Score\n\
                   23,84,7,73,0,3,Male,67\n\
                   19,64,8,59,2,4,Female,61\n";

        let (table, records) = CsvRecordAdapter::parse_table(csv).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].hours_studied, Some(23.0));
        assert_eq!(records[0].exam_score, Some(67.0));
        assert_eq!(records[1].categorical["Gender"], "Female");
    }

    #[test]
    fn test_alias_headers_canonicalized() {
        let csv = "hoursStudied,attendance,motivationLevel,examScore\n10,80,High,70\n";
        let (table, records) = CsvRecordAdapter::parse_table(csv).unwrap();
        assert_eq!(
            table.columns(),
            ["Hours_Studied", "Attendance", "Motivation_Level", "Exam_Score"]
        );
        assert_eq!(records[0].exam_score, Some(70.0));
    }

    #[test]
    fn test_exam_score_is_not_a_previous_score() {
        let csv = "Hours_Studied,Attendance,Exam_Score\n10,80,93\n";
        let (_, records) = CsvRecordAdapter::parse_table(csv).unwrap();
        assert_eq!(records[0].previous_scores, None);
        assert_eq!(records[0].exam_score, Some(93.0));

        let csv = "previousScores,examScore\n71,93\n,88\n";
        let (table, records) = CsvRecordAdapter::parse_table(csv).unwrap();
        assert_eq!(table.columns(), ["Previous_Scores", "Exam_Score"]);
        assert_eq!(records[0].previous_scores, Some(71.0));
        assert_eq!(records[1].previous_scores, None);
    }

    #[test]
    fn test_bad_numeric_cell_names_row() {
        let csv = "Hours_Studied,Attendance\n10,80\nten,90\n";
        let err = CsvRecordAdapter::parse_table(csv).unwrap_err();
        match err {
            ScholarError::InvalidUpload(msg) => assert!(msg.starts_with("row 2")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let csv = "Hours_Studied,Attendance\n10,80,5\n";
        assert!(matches!(
            CsvRecordAdapter.parse(csv),
            Err(ScholarError::InvalidUpload(_))
        ));
    }
}
