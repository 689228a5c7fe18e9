//! K-Means clustering.
//!
//! Fitting runs aprender's Lloyd k-means over an f32 copy of the samples,
//! once per seeded restart, and keeps the restart with the lowest inertia.
//! The kept centroids are stored as f64 rows so a fitted model persists with
//! its artifact and assigns new samples without refitting.

use crate::error::{Result, ScholarError};
use aprender::cluster::KMeans as LloydKMeans;
use aprender::primitives::Matrix;
use aprender::traits::UnsupervisedEstimator;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// K-Means clustering model.
///
/// Restart `i` seeds aprender's k-means++ initialization with `seed + i`, so
/// the same data and seed always produce the same centroids and the same
/// cluster ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeans {
    /// Number of clusters.
    n_clusters: usize,
    /// Maximum Lloyd iterations per run.
    max_iter: usize,
    /// Centroid shift below which a run has converged.
    tol: f32,
    /// Number of seeded restarts.
    n_init: usize,
    /// Random seed for initialization.
    seed: u64,
    /// Cluster centroids after fitting.
    centroids: Option<Vec<Vec<f64>>>,
    /// Sum of squared distances to the nearest centroid.
    inertia: f64,
    /// Iterations run by the kept restart.
    n_iter: usize,
}

impl KMeans {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            max_iter: 300,
            tol: 1e-4,
            n_init: 4,
            seed: 42,
            centroids: None,
            inertia: 0.0,
            n_iter: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init.max(1);
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    pub fn centroids(&self) -> Option<&[Vec<f64>]> {
        self.centroids.as_deref()
    }

    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn is_fitted(&self) -> bool {
        self.centroids.is_some()
    }

    /// Check that a fitted model has one centroid per cluster, all of the same
    /// width. Deserialized models are checked before use.
    pub fn validate(&self) -> Result<()> {
        let Some(centroids) = &self.centroids else {
            return Ok(());
        };
        if centroids.len() != self.n_clusters {
            return Err(ScholarError::Model(format!(
                "k-means has {} centroids for {} clusters",
                centroids.len(),
                self.n_clusters
            )));
        }
        let dim = centroids.first().map_or(0, Vec::len);
        if dim == 0 || centroids.iter().any(|c| c.len() != dim) {
            return Err(ScholarError::Model("k-means centroids are ragged or empty".to_string()));
        }
        Ok(())
    }

    /// Fit on row-major samples
    pub fn fit(&mut self, x: &[Vec<f64>]) -> Result<()> {
        if self.n_clusters == 0 {
            return Err(ScholarError::Model("n_clusters must be positive".to_string()));
        }
        if x.len() < self.n_clusters {
            return Err(ScholarError::Model(format!(
                "{} samples cannot form {} clusters",
                x.len(),
                self.n_clusters
            )));
        }
        let dim = x[0].len();
        if dim == 0 || x.iter().any(|row| row.len() != dim) {
            return Err(ScholarError::Model("ragged or empty feature matrix".to_string()));
        }
        let samples = to_matrix(x, dim)?;

        let mut best: Option<(Vec<Vec<f64>>, f64, usize)> = None;
        for restart in 0..self.n_init {
            let mut run = LloydKMeans::new(self.n_clusters)
                .with_max_iter(self.max_iter)
                .with_tol(self.tol)
                .with_random_state(self.seed.wrapping_add(restart as u64));
            run.fit(&samples)
                .map_err(|e| ScholarError::Model(format!("k-means fit failed: {e}")))?;

            let centroids = from_matrix(run.centroids());
            let inertia = x.iter().map(|row| nearest(row, &centroids).1).sum::<f64>();
            debug!(restart, inertia, iterations = run.n_iter(), "k-means restart");
            if best.as_ref().map_or(true, |(_, b, _)| inertia < *b) {
                best = Some((centroids, inertia, run.n_iter()));
            }
        }

        let (centroids, inertia, n_iter) =
            best.ok_or_else(|| ScholarError::Model("no k-means run completed".to_string()))?;
        debug!(
            samples = x.len(),
            clusters = self.n_clusters,
            inertia,
            iterations = n_iter,
            "k-means fitted"
        );

        self.centroids = Some(centroids);
        self.inertia = inertia;
        self.n_iter = n_iter;
        Ok(())
    }

    /// Nearest centroid for one sample
    pub fn predict_one(&self, row: &[f64]) -> Result<usize> {
        let centroids = self
            .centroids
            .as_ref()
            .ok_or(ScholarError::NotInitialized("k-means has not been fitted"))?;
        let dim = centroids
            .first()
            .map(Vec::len)
            .ok_or_else(|| ScholarError::Model("k-means has no centroids".to_string()))?;
        if dim != row.len() {
            return Err(ScholarError::SchemaMismatch(format!(
                "model expects {dim} features, got {}",
                row.len()
            )));
        }
        Ok(nearest(row, centroids).0)
    }

    /// Nearest centroid for every sample
    pub fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<usize>> {
        x.iter().map(|row| self.predict_one(row)).collect()
    }
}

fn to_matrix(x: &[Vec<f64>], dim: usize) -> Result<Matrix<f32>> {
    let data: Vec<f32> = x.iter().flatten().map(|v| *v as f32).collect();
    Matrix::from_vec(x.len(), dim, data)
        .map_err(|e| ScholarError::Model(format!("feature matrix: {e}")))
}

fn from_matrix(m: &Matrix<f32>) -> Vec<Vec<f64>> {
    let (rows, cols) = m.shape();
    (0..rows)
        .map(|i| (0..cols).map(|j| f64::from(m.get(i, j))).collect())
        .collect()
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Index and squared distance of the closest centroid; ties go to the lower id
fn nearest(row: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (k, centroid) in centroids.iter().enumerate() {
        let d = squared_distance(row, centroid);
        if d < best.1 {
            best = (k, d);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn blobs() -> Vec<Vec<f64>> {
        let centers = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (10.0, 10.0)];
        let mut data = Vec::new();
        for (cx, cy) in centers {
            for i in 0..10 {
                let dx = (i % 3) as f64 * 0.1;
                let dy = (i % 5) as f64 * 0.1;
                data.push(vec![cx + dx, cy + dy]);
            }
        }
        data
    }

    #[test]
    fn test_separates_blobs() {
        let data = blobs();
        let mut kmeans = KMeans::new(4);
        kmeans.fit(&data).unwrap();
        let labels = kmeans.predict(&data).unwrap();

        for blob in labels.chunks(10) {
            assert!(blob.iter().all(|l| *l == blob[0]));
        }
        let mut distinct: Vec<usize> = labels.chunks(10).map(|b| b[0]).collect();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn test_fit_is_reproducible() {
        let data = blobs();
        let mut a = KMeans::new(4).with_seed(7);
        let mut b = KMeans::new(4).with_seed(7);
        a.fit(&data).unwrap();
        b.fit(&data).unwrap();
        assert_eq!(a.centroids(), b.centroids());
        assert_eq!(a.predict(&data).unwrap(), b.predict(&data).unwrap());
    }

    #[test]
    fn test_too_few_samples() {
        let mut kmeans = KMeans::new(4);
        assert!(matches!(
            kmeans.fit(&[vec![1.0], vec![2.0]]),
            Err(ScholarError::Model(_))
        ));
    }

    #[test]
    fn test_predict_before_fit() {
        let kmeans = KMeans::new(4);
        assert!(matches!(
            kmeans.predict_one(&[0.0]),
            Err(ScholarError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_identical_points_still_fit() {
        let data = vec![vec![1.0, 1.0]; 8];
        let mut kmeans = KMeans::new(4);
        kmeans.fit(&data).unwrap();
        assert_eq!(kmeans.inertia(), 0.0);
    }

    #[test]
    fn test_validate_rejects_missing_centroids() {
        let mut kmeans = KMeans::new(4);
        kmeans.fit(&blobs()).unwrap();
        assert!(kmeans.validate().is_ok());

        let mut json: serde_json::Value = serde_json::to_value(&kmeans).unwrap();
        json["centroids"] = serde_json::json!([]);
        let emptied: KMeans = serde_json::from_value(json).unwrap();
        assert!(matches!(emptied.validate(), Err(ScholarError::Model(_))));
        assert!(emptied.predict_one(&[0.0, 0.0]).is_err());
    }
}
