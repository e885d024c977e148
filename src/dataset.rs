//! Dataset accumulator and its JSON document form.
//!
//! The document has exactly three keys, in this order:
//! `mapping` (genre names), the feature key (`mfcc` or `melspec`) and
//! `labels` (indices into `mapping`, one per feature matrix).

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use serde_json::ser::PrettyFormatter;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::error::ExtractError;
use crate::transform::{FeatureKey, FeatureMatrix};

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("label {label} is not in the mapping ({mapping_len} genres)")]
    UnknownLabel { label: usize, mapping_len: usize },
    #[error("{features} feature matrices but {labels} labels")]
    LengthMismatch { features: usize, labels: usize },
    #[error("missing key: {0}")]
    MissingKey(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Three parallel containers: genre names, feature matrices and their labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    feature_key: FeatureKey,
    mapping: Vec<String>,
    features: Vec<FeatureMatrix>,
    labels: Vec<usize>,
}

impl Dataset {
    pub fn new(feature_key: FeatureKey) -> Self {
        Self {
            feature_key,
            mapping: Vec::new(),
            features: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn feature_key(&self) -> FeatureKey {
        self.feature_key
    }

    pub fn mapping(&self) -> &[String] {
        &self.mapping
    }

    pub fn features(&self) -> &[FeatureMatrix] {
        &self.features
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Register a genre name and return its label id.
    ///
    /// Re-registering the most recent name returns the same id; any other
    /// name is appended.
    pub fn register_label(&mut self, name: &str) -> usize {
        if self.mapping.last().map(String::as_str) != Some(name) {
            self.mapping.push(name.to_string());
        }
        self.mapping.len() - 1
    }

    /// Append one feature matrix with its label.
    ///
    /// Fails without modifying anything when `label` is not registered.
    pub fn add(&mut self, matrix: FeatureMatrix, label: usize) -> Result<(), DatasetError> {
        if label >= self.mapping.len() {
            return Err(DatasetError::UnknownLabel {
                label,
                mapping_len: self.mapping.len(),
            });
        }
        self.features.push(matrix);
        self.labels.push(label);
        Ok(())
    }

    /// Serialize with 4-space indentation and write in one go.
    pub fn write_json(&self, path: &Path) -> Result<(), ExtractError> {
        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;

        std::fs::write(path, buf).map_err(|source| ExtractError::Output {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a document written by [`Dataset::write_json`].
    pub fn read_json(path: &Path, feature_key: FeatureKey) -> Result<Self, DatasetError> {
        #[derive(Deserialize)]
        struct Document {
            mapping: Vec<String>,
            labels: Vec<usize>,
            #[serde(flatten)]
            features: BTreeMap<String, Vec<FeatureMatrix>>,
        }

        let bytes = std::fs::read(path)?;
        let mut doc: Document = serde_json::from_slice(&bytes)?;
        let features = doc
            .features
            .remove(feature_key.as_str())
            .ok_or_else(|| DatasetError::MissingKey(feature_key.as_str().to_string()))?;

        if features.len() != doc.labels.len() {
            return Err(DatasetError::LengthMismatch {
                features: features.len(),
                labels: doc.labels.len(),
            });
        }
        if let Some(&label) = doc.labels.iter().find(|&&l| l >= doc.mapping.len()) {
            return Err(DatasetError::UnknownLabel {
                label,
                mapping_len: doc.mapping.len(),
            });
        }

        Ok(Self {
            feature_key,
            mapping: doc.mapping,
            features,
            labels: doc.labels,
        })
    }
}

impl Serialize for Dataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("mapping", &self.mapping)?;
        map.serialize_entry(self.feature_key.as_str(), &self.features)?;
        map.serialize_entry("labels", &self.labels)?;
        map.end()
    }
}
