//! Robust linear regression.
//!
//! `HuberRegressor` fits a linear model that is quadratic for small residuals
//! and linear for large ones, so a handful of outlier rows cannot drag the
//! coefficients. Fitting uses iteratively reweighted least squares: each pass
//! solves a weighted ridge problem, re-estimates the residual scale with the
//! median absolute deviation and down-weights rows beyond `epsilon` scales.

use crate::error::{Result, ScholarError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Consistency constant turning MAD into a normal-scale estimate
const MAD_TO_SIGMA: f64 = 0.674_489_75;
/// Smallest residual scale considered during reweighting
const MIN_SCALE: f64 = 1e-8;
/// Smallest pivot accepted by the linear solver
const MIN_PIVOT: f64 = 1e-12;

/// Huber-loss linear regressor.
///
/// # Examples
///
/// ```
/// use scholar_flux::regression::HuberRegressor;
///
/// let x = vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0], vec![5.0]];
/// let y = vec![3.0, 5.0, 7.0, 9.0, 11.0];
///
/// let mut model = HuberRegressor::new();
/// model.fit(&x, &y).expect("fit succeeds on clean data");
///
/// let pred = model.predict_one(&[6.0]).expect("model is fitted");
/// assert!((pred - 13.0).abs() < 0.01);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HuberRegressor {
    /// Residuals beyond `epsilon` scales are treated as outliers
    epsilon: f64,
    /// L2 penalty on the coefficients (not the intercept)
    alpha: f64,
    /// Maximum reweighting passes
    max_iter: usize,
    /// Convergence tolerance on the coefficient change
    tol: f64,
    /// Coefficients after fitting
    coefficients: Option<Vec<f64>>,
    intercept: f64,
    /// Residual scale estimate after fitting
    scale: f64,
    /// Number of passes run
    n_iter: usize,
}

impl Default for HuberRegressor {
    fn default() -> Self {
        Self::new()
    }
}

impl HuberRegressor {
    pub fn new() -> Self {
        Self {
            epsilon: 1.35,
            alpha: 1e-4,
            max_iter: 1000,
            tol: 1e-5,
            coefficients: None,
            intercept: 0.0,
            scale: 1.0,
            n_iter: 0,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn coefficients(&self) -> Option<&[f64]> {
        self.coefficients.as_deref()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn is_fitted(&self) -> bool {
        self.coefficients.is_some()
    }

    /// Fit the model on row-major features `x` and targets `y`
    pub fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        let n = x.len();
        if n == 0 {
            return Err(ScholarError::Model("no training rows".to_string()));
        }
        if n != y.len() {
            return Err(ScholarError::Model(format!(
                "{n} feature rows but {} targets",
                y.len()
            )));
        }
        let p = x[0].len();
        if x.iter().any(|row| row.len() != p) {
            return Err(ScholarError::Model("ragged feature matrix".to_string()));
        }
        if y.iter().chain(x.iter().flatten()).any(|v| !v.is_finite()) {
            return Err(ScholarError::Model("non-finite training value".to_string()));
        }

        // residual scale below this means the data is fitted exactly
        let negligible = 1e-9 * (1.0 + y.iter().map(|v| v.abs()).sum::<f64>() / n as f64);

        let mut weights = vec![1.0; n];
        let mut params = self.solve_weighted(x, y, &weights)?;
        let mut scale = 1.0;
        let mut n_iter = 1;

        while n_iter < self.max_iter {
            let residuals = residuals(x, y, &params);
            scale = mad_scale(&residuals);
            if scale <= negligible {
                break;
            }
            let threshold = self.epsilon * scale;
            for (w, r) in weights.iter_mut().zip(&residuals) {
                *w = if r.abs() <= threshold {
                    1.0
                } else {
                    threshold / r.abs()
                };
            }

            let next = self.solve_weighted(x, y, &weights)?;
            n_iter += 1;

            let largest = params.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            let change = params
                .iter()
                .zip(&next)
                .fold(0.0_f64, |m, (a, b)| m.max((a - b).abs()));
            params = next;

            if change <= self.tol * (1.0 + largest) {
                break;
            }
        }

        debug!(rows = n, features = p, iterations = n_iter, scale, "huber regressor fitted");

        self.intercept = params[0];
        self.coefficients = Some(params[1..].to_vec());
        self.scale = scale;
        self.n_iter = n_iter;
        Ok(())
    }

    /// Predict one transformed row
    pub fn predict_one(&self, row: &[f64]) -> Result<f64> {
        let coef = self
            .coefficients
            .as_ref()
            .ok_or(ScholarError::NotInitialized("regressor has not been fitted"))?;
        if coef.len() != row.len() {
            return Err(ScholarError::SchemaMismatch(format!(
                "model expects {} features, got {}",
                coef.len(),
                row.len()
            )));
        }
        Ok(self.intercept + dot(coef, row))
    }

    /// Predict every row
    pub fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        x.iter().map(|row| self.predict_one(row)).collect()
    }

    /// Solve the weighted ridge normal equations for [intercept, coef...]
    fn solve_weighted(&self, x: &[Vec<f64>], y: &[f64], w: &[f64]) -> Result<Vec<f64>> {
        let p = x[0].len();
        let dim = p + 1;
        let mut a = vec![vec![0.0; dim]; dim];
        let mut b = vec![0.0; dim];

        for ((row, &target), &weight) in x.iter().zip(y).zip(w) {
            a[0][0] += weight;
            b[0] += weight * target;
            for j in 0..p {
                let wx = weight * row[j];
                a[0][j + 1] += wx;
                b[j + 1] += wx * target;
                for k in j..p {
                    a[j + 1][k + 1] += wx * row[k];
                }
            }
        }

        for j in 0..dim {
            for k in 0..j {
                a[j][k] = a[k][j];
            }
        }
        // the penalty follows the total weight so down-weighting rows does not
        // strengthen the shrinkage
        let penalty = self.alpha * w.iter().sum::<f64>() / w.len() as f64;
        for j in 1..dim {
            a[j][j] += penalty;
        }

        solve_linear_system(a, b)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn residuals(x: &[Vec<f64>], y: &[f64], params: &[f64]) -> Vec<f64> {
    x.iter()
        .zip(y)
        .map(|(row, target)| target - params[0] - dot(&params[1..], row))
        .collect()
}

/// Residual scale from the median absolute residual
fn mad_scale(residuals: &[f64]) -> f64 {
    let mut abs: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();
    abs.sort_by(f64::total_cmp);
    let mid = abs.len() / 2;
    let median = if abs.len() % 2 == 0 {
        (abs[mid - 1] + abs[mid]) / 2.0
    } else {
        abs[mid]
    };
    (median / MAD_TO_SIGMA).max(MIN_SCALE)
}

/// Gaussian elimination with partial pivoting
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < MIN_PIVOT {
            return Err(ScholarError::Model(
                "normal equations are singular".to_string(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * solution[k]).sum();
        solution[row] = (b[row] - tail) / a[row][row];
    }
    Ok(solution)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_exact_line() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| 1.5 + 2.0 * r[0] - 0.5 * r[1]).collect();

        let mut model = HuberRegressor::new();
        model.fit(&x, &y).unwrap();

        let coef = model.coefficients().unwrap();
        assert!((coef[0] - 2.0).abs() < 1e-3);
        assert!((coef[1] + 0.5).abs() < 1e-3);
        assert!((model.intercept() - 1.5).abs() < 1e-2);
    }

    #[test]
    fn test_resists_outliers() {
        let mut x: Vec<Vec<f64>> = (0..30).map(|i| vec![i as f64]).collect();
        let mut y: Vec<f64> = x.iter().map(|r| 3.0 * r[0] + 1.0).collect();
        // two wild rows
        x.push(vec![10.0]);
        y.push(500.0);
        x.push(vec![20.0]);
        y.push(-400.0);

        let mut robust = HuberRegressor::new();
        robust.fit(&x, &y).unwrap();
        let slope = robust.coefficients().unwrap()[0];
        assert!((slope - 3.0).abs() < 0.2, "slope was {slope}");
    }

    #[test]
    fn test_collinear_dummies_are_solvable() {
        // two one-hot columns that always sum to one, plus the intercept
        let x: Vec<Vec<f64>> = (0..10)
            .map(|i| if i % 2 == 0 { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
            .collect();
        let y: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 10.0 } else { 20.0 }).collect();

        let mut model = HuberRegressor::new();
        model.fit(&x, &y).unwrap();
        let pred = model.predict(&x).unwrap();
        assert!((pred[0] - 10.0).abs() < 0.01);
        assert!((pred[1] - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_predict_before_fit() {
        let model = HuberRegressor::new();
        assert!(matches!(
            model.predict_one(&[1.0]),
            Err(ScholarError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_width_mismatch() {
        let mut model = HuberRegressor::new();
        model.fit(&[vec![1.0], vec![2.0]], &[1.0, 2.0]).unwrap();
        assert!(matches!(
            model.predict_one(&[1.0, 2.0]),
            Err(ScholarError::SchemaMismatch(_))
        ));
    }
}
