use chrono::{DateTime, Utc};
use pkg_constants::state::{QUOTA_PROFILES_PREFIX, RESOURCE_QUOTAS_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::limit::LimitRangeSpec;
use crate::resource::Resource;

/// A declarative bundle of quota and limit constraints applied to every
/// namespace its selector picks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaProfile {
    pub name: String,
    pub namespace: String,
    pub spec: QuotaProfileSpec,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub finalizers: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resource_version: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaProfileSpec {
    pub namespace_selector: NamespaceSelector,
    /// Higher wins when several label selectors match the same namespace.
    #[serde(default)]
    pub precedence: u16,
    #[serde(default)]
    pub resource_quota_specs: Vec<ResourceQuotaSpec>,
    #[serde(default)]
    pub limit_range_specs: Vec<LimitRangeSpec>,
}

/// Exactly one of `match_labels` (with a single key) or `match_name` must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_name: Option<String>,
}

/// What a valid selector points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorTarget<'a> {
    Name(&'a str),
    Label { key: &'a str, value: &'a str },
}

impl NamespaceSelector {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            match_labels: None,
            match_name: Some(name.into()),
        }
    }

    pub fn by_label(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            match_labels: Some(HashMap::from([(key.into(), value.into())])),
            match_name: None,
        }
    }

    /// The selector's target, or `None` when the selector is malformed
    /// (both or neither field set, or a label map without exactly one key).
    pub fn target(&self) -> Option<SelectorTarget<'_>> {
        match (&self.match_name, &self.match_labels) {
            (Some(name), None) if !name.is_empty() => Some(SelectorTarget::Name(name)),
            (None, Some(labels)) if labels.len() == 1 => {
                let (key, value) = labels.iter().next()?;
                Some(SelectorTarget::Label { key, value })
            }
            _ => None,
        }
    }
}

impl QuotaProfile {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: QuotaProfileSpec,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            spec,
            labels: HashMap::new(),
            finalizers: Vec::new(),
            created_at: Utc::now(),
            deletion_timestamp: None,
            resource_version: 0,
        }
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns `true` if the finalizer was added.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns `true` if the finalizer was present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }
}

impl Resource for QuotaProfile {
    const PREFIX: &'static str = QUOTA_PROFILES_PREFIX;
    const KIND: &'static str = "QuotaProfile";

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
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

    fn finalizers(&self) -> &[String] {
        &self.finalizers
    }

    fn deletion_timestamp(&self) -> Option<DateTime<Utc>> {
        self.deletion_timestamp
    }

    fn mark_for_deletion(&mut self, at: DateTime<Utc>) -> bool {
        if self.deletion_timestamp.is_none() {
            self.deletion_timestamp = Some(at);
        }
        true
    }
}

/// Hard limits for a namespace, keyed by resource name (`cpu`, `memory`,
/// `pods`, ...). Quantities are kept as written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuotaSpec {
    #[serde(default)]
    pub hard: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl ResourceQuotaSpec {
    pub fn hard<'a>(limits: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            hard: limits
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            scopes: Vec::new(),
        }
    }
}

/// Resource quota for a namespace, materialized from a profile entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub spec: ResourceQuotaSpec,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resource_version: u64,
}

impl Resource for ResourceQuota {
    const PREFIX: &'static str = RESOURCE_QUOTAS_PREFIX;
    const KIND: &'static str = "ResourceQuota";

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
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
