//! Column preprocessing
//!
//! Numeric columns are standardized (zero mean, unit variance, parameters
//! captured at fit time) and categorical columns are one-hot encoded. A
//! category never seen during fit encodes to all zeros rather than failing.
//! Both pipelines build their model input through a `ColumnTransformer`.

use crate::error::{Result, ScholarError};
use crate::table::{Cell, ColumnKind, FeatureRow, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Standard deviations below this are treated as constant columns
const MIN_SCALE: f64 = 1e-12;

/// Standardizes features by removing the mean and scaling to unit variance.
///
/// Missing values seen during fit are ignored when computing statistics; at
/// transform time they map to the column mean (zero after scaling).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit from column-major values
    pub fn fit(columns: &[Vec<Option<f64>>]) -> Self {
        let mut mean = Vec::with_capacity(columns.len());
        let mut scale = Vec::with_capacity(columns.len());

        for column in columns {
            let present: Vec<f64> = column.iter().flatten().copied().collect();
            if present.is_empty() {
                mean.push(0.0);
                scale.push(1.0);
                continue;
            }
            let n = present.len() as f64;
            let m = present.iter().sum::<f64>() / n;
            // population variance, as used for standardization
            let var = present.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            mean.push(m);
            scale.push(if std > MIN_SCALE { std } else { 1.0 });
        }

        Self { mean, scale }
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Standardize one value of feature `j`
    pub fn transform_value(&self, j: usize, value: Option<f64>) -> f64 {
        match value {
            Some(v) => (v - self.mean[j]) / self.scale[j],
            None => 0.0,
        }
    }
}

/// One-hot encoder with sorted category lists per column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    categories: Vec<Vec<String>>,
}

impl OneHotEncoder {
    /// Fit from column-major category values; missing values are not categories
    pub fn fit(columns: &[Vec<Option<String>>]) -> Self {
        let categories = columns
            .iter()
            .map(|column| {
                let mut cats: Vec<String> = column.iter().flatten().cloned().collect();
                cats.sort();
                cats.dedup();
                cats
            })
            .collect();
        Self { categories }
    }

    pub fn categories(&self) -> &[Vec<String>] {
        &self.categories
    }

    /// Total width of the encoding
    pub fn n_outputs(&self) -> usize {
        self.categories.iter().map(Vec::len).sum()
    }

    /// Append the encoding of column `j` to `out`
    pub fn encode_into(&self, j: usize, value: Option<&str>, out: &mut Vec<f64>) {
        let cats = &self.categories[j];
        let hit = value.and_then(|v| cats.binary_search_by(|c| c.as_str().cmp(v)).ok());
        out.extend((0..cats.len()).map(|k| if Some(k) == hit { 1.0 } else { 0.0 }));
    }
}

/// Numeric-standardize + categorical-one-hot transform over named columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTransformer {
    /// Input columns in training order (the training schema)
    input_columns: Vec<String>,
    /// Kind of each input column
    kinds: Vec<ColumnKind>,
    numeric_columns: Vec<String>,
    categorical_columns: Vec<String>,
    scaler: StandardScaler,
    encoder: OneHotEncoder,
}

impl ColumnTransformer {
    /// Fit on every column of `table`, inferring numeric vs categorical
    pub fn fit(table: &Table) -> Result<Self> {
        if table.is_empty() {
            return Err(ScholarError::Model(
                "cannot fit a transform on an empty table".to_string(),
            ));
        }

        let input_columns = table.columns().to_vec();
        let mut kinds = Vec::with_capacity(input_columns.len());
        let mut numeric_columns = Vec::new();
        let mut categorical_columns = Vec::new();
        let mut numeric_values: Vec<Vec<Option<f64>>> = Vec::new();
        let mut categorical_values: Vec<Vec<Option<String>>> = Vec::new();

        for column in &input_columns {
            let kind = table
                .column_kind(column)
                .unwrap_or(ColumnKind::Categorical);
            let cells = table.column(column).unwrap_or_default();
            match kind {
                ColumnKind::Numeric => {
                    numeric_columns.push(column.clone());
                    numeric_values.push(cells.iter().map(|c| c.as_f64()).collect());
                }
                ColumnKind::Categorical => {
                    categorical_columns.push(column.clone());
                    categorical_values.push(
                        cells
                            .iter()
                            .map(|c| (!c.is_missing()).then(|| c.to_field()))
                            .collect(),
                    );
                }
            }
            kinds.push(kind);
        }

        Ok(Self {
            input_columns,
            kinds,
            numeric_columns,
            categorical_columns,
            scaler: StandardScaler::fit(&numeric_values),
            encoder: OneHotEncoder::fit(&categorical_values),
        })
    }

    /// The ordered column set this transform was fitted on
    pub fn input_columns(&self) -> &[String] {
        &self.input_columns
    }

    pub fn column_kind(&self, column: &str) -> Option<ColumnKind> {
        self.input_columns
            .iter()
            .position(|c| c == column)
            .map(|i| self.kinds[i])
    }

    pub fn numeric_columns(&self) -> &[String] {
        &self.numeric_columns
    }

    pub fn categorical_columns(&self) -> &[String] {
        &self.categorical_columns
    }

    /// Width of the transformed vector
    pub fn n_features_out(&self) -> usize {
        self.numeric_columns.len() + self.encoder.n_outputs()
    }

    /// Output feature names: numeric columns, then `column=category` for every
    /// one-hot slot
    pub fn feature_names_out(&self) -> Vec<String> {
        let mut names = self.numeric_columns.clone();
        for (column, cats) in self
            .categorical_columns
            .iter()
            .zip(self.encoder.categories())
        {
            names.extend(cats.iter().map(|cat| format!("{column}={cat}")));
        }
        names
    }

    /// Transform one name-keyed row. Every input column must be present (the
    /// caller reconciles first); cells are coerced to the fitted column kind.
    pub fn transform_row(&self, row: &FeatureRow) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(self.n_features_out());

        for (j, column) in self.numeric_columns.iter().enumerate() {
            let cell = required(row, column)?;
            let value = coerce_numeric(column, cell)?;
            out.push(self.scaler.transform_value(j, value));
        }

        for (j, column) in self.categorical_columns.iter().enumerate() {
            let cell = required(row, column)?;
            let value = (!cell.is_missing()).then(|| cell.to_field());
            self.encoder.encode_into(j, value.as_deref(), &mut out);
        }

        Ok(out)
    }

    /// Transform every row of a table
    pub fn transform_table(&self, table: &Table) -> Result<Vec<Vec<f64>>> {
        (0..table.len())
            .map(|i| {
                let row = table.row_map(i).unwrap_or_default();
                self.transform_row(&row)
            })
            .collect()
    }
}

fn required<'a>(row: &'a FeatureRow, column: &str) -> Result<&'a Cell> {
    row.get(column).ok_or_else(|| {
        ScholarError::SchemaMismatch(format!("transform requires column '{column}'"))
    })
}

/// Fill values for a frozen schema: the mode of each column in `table`.
/// Columns without any present value are left out.
pub fn fill_values(table: &Table, schema: &[String]) -> BTreeMap<String, Cell> {
    schema
        .iter()
        .filter_map(|column| table.mode(column).map(|cell| (column.clone(), cell)))
        .collect()
}

/// Reconcile a row to a frozen schema: keep exactly the schema columns, fill
/// absent or missing cells from `fills`. A column that can be neither read nor
/// filled is a `SchemaMismatch`.
pub fn reconcile(
    row: &FeatureRow,
    schema: &[String],
    fills: &BTreeMap<String, Cell>,
) -> Result<FeatureRow> {
    schema
        .iter()
        .map(|column| {
            let cell = row
                .get(column)
                .filter(|cell| !cell.is_missing())
                .or_else(|| fills.get(column))
                .cloned()
                .ok_or_else(|| {
                    ScholarError::SchemaMismatch(format!(
                        "no value or fallback for column '{column}'"
                    ))
                })?;
            Ok((column.clone(), cell))
        })
        .collect()
}

/// Coerce a cell to the numeric kind of a training column
pub fn coerce_numeric(column: &str, cell: &Cell) -> Result<Option<f64>> {
    match cell {
        Cell::Number(v) => Ok(Some(*v)),
        Cell::Missing => Ok(None),
        Cell::Text(text) => text.trim().parse::<f64>().map(Some).map_err(|_| {
            ScholarError::SchemaMismatch(format!(
                "column '{column}' is numeric but got '{text}'"
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::from_reader(
            "x,income,y\n\
             1,Low,10\n\
             2,High,20\n\
             3,Low,30\n"
                .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn test_scaler_zero_mean_unit_variance() {
        let scaler = StandardScaler::fit(&[vec![Some(1.0), Some(2.0), Some(3.0)]]);
        assert_eq!(scaler.mean(), &[2.0]);
        let expected_std = (2.0_f64 / 3.0).sqrt();
        assert!((scaler.scale()[0] - expected_std).abs() < 1e-12);
        assert_eq!(scaler.transform_value(0, Some(2.0)), 0.0);
        assert_eq!(scaler.transform_value(0, None), 0.0);
    }

    #[test]
    fn test_constant_column_scale_is_one() {
        let scaler = StandardScaler::fit(&[vec![Some(5.0), Some(5.0)]]);
        assert_eq!(scaler.scale(), &[1.0]);
    }

    #[test]
    fn test_feature_names_expand_categories() {
        let transformer = ColumnTransformer::fit(&table()).unwrap();
        assert_eq!(
            transformer.feature_names_out(),
            vec!["x", "y", "income=High", "income=Low"]
        );
        assert_eq!(transformer.n_features_out(), 4);
    }

    #[test]
    fn test_unknown_category_encodes_to_zeros() {
        let transformer = ColumnTransformer::fit(&table()).unwrap();
        let row: FeatureRow = [
            ("x".to_string(), Cell::Number(2.0)),
            ("y".to_string(), Cell::from("20")),
            ("income".to_string(), Cell::from("Medium")),
        ]
        .into_iter()
        .collect();

        let out = transformer.transform_row(&row).unwrap();
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_missing_column_is_schema_mismatch() {
        let transformer = ColumnTransformer::fit(&table()).unwrap();
        let row: FeatureRow = [("x".to_string(), Cell::Number(2.0))].into_iter().collect();
        assert!(matches!(
            transformer.transform_row(&row),
            Err(ScholarError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_reconcile_fills_and_projects() {
        let table = table();
        let schema: Vec<String> = vec!["x".into(), "income".into()];
        let fills = fill_values(&table, &schema);

        let row: FeatureRow = [
            ("x".to_string(), Cell::Number(9.0)),
            ("extra".to_string(), Cell::Number(1.0)),
        ]
        .into_iter()
        .collect();
        let reconciled = reconcile(&row, &schema, &fills).unwrap();

        assert_eq!(reconciled.len(), 2);
        assert_eq!(reconciled["x"], Cell::Number(9.0));
        assert_eq!(reconciled["income"], Cell::from("Low"));

        let empty = BTreeMap::new();
        assert!(matches!(
            reconcile(&row, &schema, &empty),
            Err(ScholarError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_text_in_numeric_column_is_schema_mismatch() {
        let transformer = ColumnTransformer::fit(&table()).unwrap();
        let row: FeatureRow = [
            ("x".to_string(), Cell::from("two")),
            ("y".to_string(), Cell::Number(1.0)),
            ("income".to_string(), Cell::from("Low")),
        ]
        .into_iter()
        .collect();
        assert!(matches!(
            transformer.transform_row(&row),
            Err(ScholarError::SchemaMismatch(_))
        ));
    }
}
