use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

use crate::retrieval::DuplicateKeyCollision;

/// Warning code for two records normalizing to one image path.
pub const PATH_COLLISION: &str = "path_collision";
/// Warning code for records stored without an image path.
pub const MISSING_PATH: &str = "missing_image_path";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    Info,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Warning {
    pub code: String,
    pub message: String,
    pub severity: WarningSeverity,
}

impl From<&DuplicateKeyCollision> for Warning {
    fn from(c: &DuplicateKeyCollision) -> Self {
        Self {
            code: PATH_COLLISION.into(),
            message: c.to_string(),
            severity: WarningSeverity::Warning,
        }
    }
}

/// Collects and manages non-fatal warnings.
#[derive(Default)]
pub struct WarningCollector {
    warnings: Vec<Warning>,
}

impl WarningCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    pub fn list(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn clear(&mut self, code: &str) {
        self.warnings.retain(|w| w.code != code);
    }

    /// Replace every warning under `code` with `warnings`.
    pub fn replace(&mut self, code: &str, warnings: impl IntoIterator<Item = Warning>) {
        self.clear(code);
        self.warnings.extend(warnings);
    }
}

/// Thread-safe warning collector shared between requests.
pub type SharedWarnings = Arc<RwLock<WarningCollector>>;

pub fn new_shared_warnings() -> SharedWarnings {
    Arc::new(RwLock::new(WarningCollector::new()))
}
