use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// An object persisted under `/registry/<kind>/...`.
///
/// Cluster-scoped kinds return `None` from [`Resource::namespace`] and live at
/// `PREFIX + name`; namespaced kinds live at `PREFIX + namespace + "/" + name`.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Key prefix, including the trailing slash.
    const PREFIX: &'static str;
    /// Human readable kind, used in logs and errors.
    const KIND: &'static str;

    fn name(&self) -> &str;
    fn namespace(&self) -> Option<&str>;
    fn labels(&self) -> &HashMap<String, String>;
    fn resource_version(&self) -> u64;
    fn set_resource_version(&mut self, version: u64);

    fn finalizers(&self) -> &[String] {
        &[]
    }

    fn deletion_timestamp(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Stamp a deletion marker on the object.
    /// Returns `false` for kinds that are removed immediately.
    fn mark_for_deletion(&mut self, _at: DateTime<Utc>) -> bool {
        false
    }

    fn key(&self) -> String {
        object_key::<Self>(self.namespace(), self.name())
    }
}

/// Store key for an object of kind `R`.
pub fn object_key<R: Resource>(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{}{}/{}", R::PREFIX, ns, name),
        None => format!("{}{}", R::PREFIX, name),
    }
}

/// Key prefix covering every object of kind `R` inside `namespace`.
pub fn namespace_prefix<R: Resource>(namespace: &str) -> String {
    format!("{}{}/", R::PREFIX, namespace)
}

/// Split a store key into `(namespace, name)` for kind `R`.
/// Cluster-scoped keys yield `(None, name)`.
pub fn parse_key<R: Resource>(key: &str) -> Option<(Option<&str>, &str)> {
    let rest = key.strip_prefix(R::PREFIX)?;
    match rest.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Some((Some(ns), name))
        }
        Some(_) => None,
        None if !rest.is_empty() => Some((None, rest)),
        None => None,
    }
}
