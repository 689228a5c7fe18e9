//! Persona clustering
//!
//! Students are grouped with k-means (k = 4, seeded) over the clustering
//! table's feature columns, then each cluster id is given one of the four
//! persona labels from per-cluster means:
//! - highest mean `Burnout_Risk` is the Overworked Achiever
//! - of the rest, lowest mean `Engagement_Index` is the Disengaged Learner
//! - of the last two, higher mean `Exam_Score` is the Balanced Achiever and
//!   the other the Developing Learner
//!
//! The same transform, model and mapping label new or hypothetical records.

use crate::error::{Result, ScholarError};
use crate::kmeans::KMeans;
use crate::preprocess::{fill_values, reconcile, ColumnTransformer};
use crate::table::{Cell, FeatureRow, Table};
use crate::types::{PersonaLabel, CLASS_SECTION, EXAM_SCORE, PERSONA_COLUMN};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Number of persona clusters
pub const PERSONA_CLUSTERS: usize = 4;

/// Version of the persisted artifact layout
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Columns never used as clustering features
const NON_FEATURE_COLUMNS: [&str; 3] = [EXAM_SCORE, PERSONA_COLUMN, CLASS_SECTION];

const BURNOUT_COLUMN: &str = "Burnout_Risk";
const ENGAGEMENT_COLUMN: &str = "Engagement_Index";

/// Fitted transform + k-means model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaArtifact {
    pub format_version: u32,
    pub run_id: Uuid,
    pub fitted_at: DateTime<Utc>,
    /// Ordered feature columns the transform was fitted on
    pub schema: Vec<String>,
    pub transformer: ColumnTransformer,
    pub model: KMeans,
}

impl PersonaArtifact {
    /// Load an artifact from JSON, rejecting other format versions and models
    /// without exactly one centroid per persona cluster
    pub fn from_json(json: &str) -> Result<Self> {
        let artifact: Self = serde_json::from_str(json)?;
        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ScholarError::Model(format!(
                "unsupported persona artifact format {}",
                artifact.format_version
            )));
        }
        if !artifact.model.is_fitted() || artifact.model.n_clusters() != PERSONA_CLUSTERS {
            return Err(ScholarError::Model(format!(
                "persona artifact needs a fitted {PERSONA_CLUSTERS}-cluster model"
            )));
        }
        artifact.model.validate()?;
        Ok(artifact)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Per-cluster means used to name the clusters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClusterProfile {
    pub members: usize,
    pub exam_score: Option<f64>,
    pub burnout_risk: Option<f64>,
    pub engagement_index: Option<f64>,
}

/// K-means persona pipeline over the clustering table
#[derive(Debug, Clone)]
pub struct PersonaClusterer {
    artifact_path: Option<PathBuf>,
    /// Clustering table; `Persona_Cluster` is rewritten from the fitted mapping
    table: Table,
    seed: u64,
    n_init: usize,
    artifact: Option<PersonaArtifact>,
    mapping: BTreeMap<usize, PersonaLabel>,
    /// Table mode per schema column
    fills: BTreeMap<String, Cell>,
}

impl PersonaClusterer {
    /// Create an in-memory clusterer; nothing is persisted
    pub fn new(table: Table) -> Self {
        Self {
            artifact_path: None,
            table,
            seed: 42,
            n_init: 4,
            artifact: None,
            mapping: BTreeMap::new(),
            fills: BTreeMap::new(),
        }
    }

    /// Open a file-backed clusterer. The clustering table must exist.
    pub fn open<P: AsRef<Path>>(table_path: P, artifact_path: PathBuf) -> Result<Self> {
        let table = Table::read_csv(table_path.as_ref())?;
        info!(
            path = %table_path.as_ref().display(),
            rows = table.len(),
            "clustering table loaded"
        );
        let mut clusterer = Self::new(table);
        clusterer.artifact_path = Some(artifact_path);
        Ok(clusterer)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    pub fn is_fitted(&self) -> bool {
        self.artifact.is_some() && self.mapping.len() == PERSONA_CLUSTERS
    }

    pub fn artifact(&self) -> Option<&PersonaArtifact> {
        self.artifact.as_ref()
    }

    /// Cluster id to persona mapping of the current fit
    pub fn mapping(&self) -> &BTreeMap<usize, PersonaLabel> {
        &self.mapping
    }

    /// The clustering table with `Persona_Cluster` labels from this fit
    pub fn labeled_table(&self) -> &Table {
        &self.table
    }

    /// Load the persisted artifact unless `retrain` is set or it is missing or
    /// no longer matches the table; otherwise fit and persist. The label
    /// mapping is always rebuilt from the table.
    pub fn load_or_fit(&mut self, retrain: bool) -> Result<()> {
        if let Some(path) = self.artifact_path.clone().filter(|p| !retrain && p.exists()) {
            let loaded = std::fs::read_to_string(&path)
                .map_err(ScholarError::from)
                .and_then(|json| PersonaArtifact::from_json(&json))
                .and_then(|artifact| {
                    let assignments = assign(&artifact, &self.table)?;
                    Ok((artifact, assignments))
                });
            match loaded {
                Ok((artifact, assignments)) => {
                    info!(path = %path.display(), run_id = %artifact.run_id, "persona artifact loaded");
                    return self.install(artifact, &assignments);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "persona artifact unusable, refitting"),
            }
        }
        self.fit()
    }

    /// Fit transform and k-means on the clustering table, persist, and build
    /// the label mapping
    pub fn fit(&mut self) -> Result<()> {
        let features = self.table.drop_columns(&NON_FEATURE_COLUMNS);
        let transformer = ColumnTransformer::fit(&features)?;
        let x = transformer.transform_table(&features)?;

        let mut model = KMeans::new(PERSONA_CLUSTERS)
            .with_seed(self.seed)
            .with_n_init(self.n_init);
        model.fit(&x)?;
        let assignments = model.predict(&x)?;

        info!(
            rows = x.len(),
            encoded = transformer.n_features_out(),
            inertia = model.inertia(),
            "persona clusterer fitted"
        );

        let artifact = PersonaArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            run_id: Uuid::new_v4(),
            fitted_at: Utc::now(),
            schema: features.columns().to_vec(),
            transformer,
            model,
        };

        if let Some(path) = &self.artifact_path {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, artifact.to_json()?)?;
        }

        self.install(artifact, &assignments)
    }

    /// Persona for an engineered, name-keyed row.
    ///
    /// The row is reconciled to the clustering schema (absent columns take
    /// the table mode) and coerced to each column's fitted kind.
    pub fn predict_persona(&self, row: &FeatureRow) -> Result<PersonaLabel> {
        let artifact = self
            .artifact
            .as_ref()
            .ok_or(ScholarError::NotInitialized("persona clusterer has not been fitted"))?;
        let reconciled = reconcile(row, &artifact.schema, &self.fills)?;
        let x = artifact.transformer.transform_row(&reconciled)?;
        let cluster = artifact.model.predict_one(&x)?;
        self.mapping
            .get(&cluster)
            .copied()
            .ok_or(ScholarError::UnmappedCluster(cluster))
    }

    fn install(&mut self, artifact: PersonaArtifact, assignments: &[usize]) -> Result<()> {
        let mapping = build_label_mapping(&self.table, assignments, artifact.model.n_clusters())?;

        let labels = assignments
            .iter()
            .map(|id| {
                mapping
                    .get(id)
                    .map(|label| Cell::from(label.as_str()))
                    .ok_or(ScholarError::UnmappedCluster(*id))
            })
            .collect::<Result<Vec<_>>>()?;
        self.table.set_column(PERSONA_COLUMN, labels)?;

        for (id, label) in &mapping {
            debug!(cluster = id, persona = %label, "persona mapping");
        }

        self.fills = fill_values(&self.table, &artifact.schema);
        self.mapping = mapping;
        self.artifact = Some(artifact);
        Ok(())
    }
}

/// Cluster ids for every row of `table` under a fitted artifact
fn assign(artifact: &PersonaArtifact, table: &Table) -> Result<Vec<usize>> {
    let features = table.select(&artifact.schema)?;
    let x = artifact.transformer.transform_table(&features)?;
    artifact.model.predict(&x)
}

/// Member count and metric means per cluster
pub fn cluster_profiles(
    table: &Table,
    assignments: &[usize],
    n_clusters: usize,
) -> Result<Vec<ClusterProfile>> {
    if assignments.len() != table.len() {
        return Err(ScholarError::SchemaMismatch(format!(
            "{} assignments for {} rows",
            assignments.len(),
            table.len()
        )));
    }

    let metric = |column: &str| -> Result<Vec<Option<f64>>> {
        table
            .column(column)
            .map(|cells| cells.iter().map(|c| c.as_f64()).collect())
            .ok_or_else(|| {
                ScholarError::SchemaMismatch(format!("clustering table has no '{column}' column"))
            })
    };
    let exam = metric(EXAM_SCORE)?;
    let burnout = metric(BURNOUT_COLUMN)?;
    let engagement = metric(ENGAGEMENT_COLUMN)?;

    let mean_of = |values: &[Option<f64>], cluster: usize| -> Option<f64> {
        let members: Vec<f64> = assignments
            .iter()
            .zip(values)
            .filter(|(id, _)| **id == cluster)
            .filter_map(|(_, v)| *v)
            .collect();
        (!members.is_empty()).then(|| members.iter().sum::<f64>() / members.len() as f64)
    };

    Ok((0..n_clusters)
        .map(|cluster| ClusterProfile {
            members: assignments.iter().filter(|id| **id == cluster).count(),
            exam_score: mean_of(&exam, cluster),
            burnout_risk: mean_of(&burnout, cluster),
            engagement_index: mean_of(&engagement, cluster),
        })
        .collect())
}

/// Assign the four persona labels to the four cluster ids.
///
/// Clusters without members (or without values for a metric) rank last for
/// burnout, last for disengagement and lowest for score. Ties resolve to the
/// lowest cluster id.
pub fn build_label_mapping(
    table: &Table,
    assignments: &[usize],
    n_clusters: usize,
) -> Result<BTreeMap<usize, PersonaLabel>> {
    if n_clusters != PERSONA_CLUSTERS {
        return Err(ScholarError::Model(format!(
            "persona mapping needs {PERSONA_CLUSTERS} clusters, model has {n_clusters}"
        )));
    }
    let profiles = cluster_profiles(table, assignments, n_clusters)?;
    let mut remaining: Vec<usize> = (0..n_clusters).collect();
    let mut mapping = BTreeMap::new();

    let overworked = pick(&remaining, |id| {
        profiles[id].burnout_risk.unwrap_or(f64::NEG_INFINITY)
    });
    mapping.insert(overworked, PersonaLabel::OverworkedAchiever);
    remaining.retain(|id| *id != overworked);

    let disengaged = pick(&remaining, |id| {
        -profiles[id].engagement_index.unwrap_or(f64::INFINITY)
    });
    mapping.insert(disengaged, PersonaLabel::DisengagedLearner);
    remaining.retain(|id| *id != disengaged);

    let balanced = pick(&remaining, |id| {
        profiles[id].exam_score.unwrap_or(f64::NEG_INFINITY)
    });
    mapping.insert(balanced, PersonaLabel::BalancedAchiever);
    remaining.retain(|id| *id != balanced);

    for id in remaining {
        mapping.insert(id, PersonaLabel::DevelopingLearner);
    }

    Ok(mapping)
}

/// Id with the largest key; the first (lowest) id wins ties
fn pick<F: Fn(usize) -> f64>(ids: &[usize], key: F) -> usize {
    let mut best = ids[0];
    for &id in &ids[1..] {
        if key(id) > key(best) {
            best = id;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Four well separated groups: (burnout, engagement, momentum, exam)
    const GROUPS: [(f64, f64, f64, f64); 4] = [
        (20.0, 12.0, 80.0, 88.0), // balanced
        (100.0, 15.0, 60.0, 72.0), // overworked
        (20.0, 12.0, 40.0, 58.0), // developing
        (10.0, 2.0, 50.0, 61.0), // disengaged
    ];

    fn table() -> Table {
        let mut csv = String::from(
            "Burnout_Risk,Engagement_Index,Academic_Momentum,Gender,Exam_Score,Persona_Cluster\n",
        );
        for (group, (burnout, engagement, momentum, exam)) in GROUPS.into_iter().enumerate() {
            let gender = ["Male", "Female"][group % 2];
            for i in 0..10 {
                let jitter = (i % 5) as f64 * 0.2;
                csv.push_str(&format!(
                    "{},{},{},{gender},{},stale\n",
                    burnout + jitter,
                    engagement + jitter / 10.0,
                    momentum - jitter,
                    exam + jitter
                ));
            }
        }
        Table::from_reader(csv.as_bytes()).unwrap()
    }

    fn fitted() -> PersonaClusterer {
        let mut clusterer = PersonaClusterer::new(table());
        clusterer.fit().unwrap();
        clusterer
    }

    fn row(burnout: f64, engagement: f64, momentum: f64) -> FeatureRow {
        [
            (BURNOUT_COLUMN.to_string(), Cell::Number(burnout)),
            (ENGAGEMENT_COLUMN.to_string(), Cell::Number(engagement)),
            ("Academic_Momentum".to_string(), Cell::Number(momentum)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_groups_get_expected_personas() {
        let clusterer = fitted();
        let table = clusterer.labeled_table();
        let expected = [
            PersonaLabel::BalancedAchiever,
            PersonaLabel::OverworkedAchiever,
            PersonaLabel::DevelopingLearner,
            PersonaLabel::DisengagedLearner,
        ];
        for (group, persona) in expected.iter().enumerate() {
            for i in 0..10 {
                assert_eq!(
                    table.cell(group * 10 + i, PERSONA_COLUMN),
                    Some(&Cell::from(persona.as_str()))
                );
            }
        }
    }

    #[test]
    fn test_mapping_is_bijective_and_deterministic() {
        let first = fitted();
        let second = fitted();
        assert_eq!(first.mapping(), second.mapping());
        assert_eq!(first.labeled_table(), second.labeled_table());

        let mut labels: Vec<PersonaLabel> = first.mapping().values().copied().collect();
        labels.sort();
        assert_eq!(labels, PersonaLabel::ALL.to_vec());
    }

    #[test]
    fn test_predict_persona_for_new_rows() {
        let clusterer = fitted();
        assert_eq!(
            clusterer.predict_persona(&row(99.0, 15.0, 60.0)).unwrap(),
            PersonaLabel::OverworkedAchiever
        );
        assert_eq!(
            clusterer.predict_persona(&row(9.0, 2.0, 50.0)).unwrap(),
            PersonaLabel::DisengagedLearner
        );
    }

    #[test]
    fn test_predict_persona_coerces_and_fills() {
        let clusterer = fitted();
        let mut input = row(20.0, 12.0, 80.0);
        input.insert(BURNOUT_COLUMN.to_string(), Cell::from("20.5"));
        // Gender absent: filled from the table mode
        let persona = clusterer.predict_persona(&input).unwrap();
        assert!(PersonaLabel::ALL.contains(&persona));

        input.insert(BURNOUT_COLUMN.to_string(), Cell::from("lots"));
        assert!(matches!(
            clusterer.predict_persona(&input),
            Err(ScholarError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_predict_before_fit() {
        let clusterer = PersonaClusterer::new(table());
        assert!(matches!(
            clusterer.predict_persona(&row(1.0, 1.0, 1.0)),
            Err(ScholarError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_mapping_with_empty_cluster_is_total() {
        let table = table();
        // cluster 2 has no members
        let assignments: Vec<usize> = (0..table.len()).map(|i| [0, 1, 3, 3][i / 10]).collect();
        let mapping = build_label_mapping(&table, &assignments, 4).unwrap();

        assert_eq!(mapping.len(), 4);
        assert_eq!(mapping[&1], PersonaLabel::OverworkedAchiever);
        assert_eq!(mapping[&3], PersonaLabel::DisengagedLearner);
        assert_eq!(mapping[&0], PersonaLabel::BalancedAchiever);
        assert_eq!(mapping[&2], PersonaLabel::DevelopingLearner);
    }

    #[test]
    fn test_mapping_requires_metric_columns() {
        let table = Table::from_reader("Gender,Exam_Score\nMale,70\n".as_bytes()).unwrap();
        assert!(matches!(
            build_label_mapping(&table, &[0], 4),
            Err(ScholarError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_artifact_reload_keeps_assignments() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = dir.path().join("clusters.csv");
        let artifact_path = dir.path().join("persona_pipeline.json");
        table().write_csv(&table_path).unwrap();

        let mut first = PersonaClusterer::open(&table_path, artifact_path.clone()).unwrap();
        first.load_or_fit(false).unwrap();
        let mut second = PersonaClusterer::open(&table_path, artifact_path).unwrap();
        second.load_or_fit(false).unwrap();

        assert_eq!(
            first.artifact().unwrap().run_id,
            second.artifact().unwrap().run_id
        );
        assert_eq!(first.labeled_table(), second.labeled_table());
    }

    #[test]
    fn test_artifact_without_centroids_is_refitted() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = dir.path().join("clusters.csv");
        let artifact_path = dir.path().join("persona_pipeline.json");
        table().write_csv(&table_path).unwrap();

        let mut first = PersonaClusterer::open(&table_path, artifact_path.clone()).unwrap();
        first.load_or_fit(false).unwrap();
        let stale_run = first.artifact().unwrap().run_id;

        let mut json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&artifact_path).unwrap()).unwrap();
        json["model"]["centroids"] = serde_json::json!([]);
        let emptied = serde_json::to_string(&json).unwrap();
        std::fs::write(&artifact_path, &emptied).unwrap();
        assert!(matches!(
            PersonaArtifact::from_json(&emptied),
            Err(ScholarError::Model(_))
        ));

        let mut second = PersonaClusterer::open(&table_path, artifact_path).unwrap();
        second.load_or_fit(false).unwrap();
        assert!(second.is_fitted());
        assert!(second.artifact().unwrap().run_id != stale_run);
        assert_eq!(first.labeled_table(), second.labeled_table());
    }
}
