use chrono::{DateTime, Utc};
use pkg_constants::labels::{PROFILE_LABEL_KEY, PROFILE_LAST_UPDATE_LABEL_KEY};
use pkg_constants::state::NAMESPACES_PREFIX;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::resource::Resource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resource_version: u64,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: HashMap::new(),
            created_at: Utc::now(),
            resource_version: 0,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// The encoded governing-profile reference, if the namespace carries one.
    pub fn governing_reference(&self) -> Option<&str> {
        self.labels.get(PROFILE_LABEL_KEY).map(String::as_str)
    }

    /// A copy of this snapshot with `patch` applied.
    pub fn patched(&self, patch: &LabelPatch) -> Self {
        let mut next = self.clone();
        patch.apply(&mut next.labels);
        next
    }
}

impl Resource for Namespace {
    const PREFIX: &'static str = NAMESPACES_PREFIX;
    const KIND: &'static str = "Namespace";

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> Option<&str> {
        None
    }

    fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    fn resource_version(&self) -> u64 {
        self.resource_version
    }

    fn set_resource_version(&mut self, version: u64) {
        self.resource_version = version;
    }
}

/// A set of label additions and removals computed during a pass and
/// applied to a fresh snapshot just before the write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelPatch {
    set: Vec<(String, String)>,
    remove: Vec<String>,
}

impl LabelPatch {
    /// Point the namespace at `reference` and stamp the update time.
    pub fn govern(reference: &str, at: DateTime<Utc>) -> Self {
        Self {
            set: vec![
                (PROFILE_LABEL_KEY.to_string(), reference.to_string()),
                (
                    PROFILE_LAST_UPDATE_LABEL_KEY.to_string(),
                    at.timestamp_micros().to_string(),
                ),
            ],
            remove: Vec::new(),
        }
    }

    /// Drop both governing labels.
    pub fn retract() -> Self {
        Self {
            set: Vec::new(),
            remove: vec![
                PROFILE_LABEL_KEY.to_string(),
                PROFILE_LAST_UPDATE_LABEL_KEY.to_string(),
            ],
        }
    }

    pub fn apply(&self, labels: &mut HashMap<String, String>) {
        for key in &self.remove {
            labels.remove(key);
        }
        for (key, value) in &self.set {
            labels.insert(key.clone(), value.clone());
        }
    }
}
