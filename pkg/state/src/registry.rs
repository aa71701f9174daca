use chrono::Utc;
use pkg_types::resource::{Resource, namespace_prefix, object_key};
use tracing::{debug, warn};

use crate::client::{Mutation, StateStore};
use crate::error::StoreError;

/// Typed access to objects in the state store.
///
/// Writes use optimistic concurrency: every object carries a
/// `resource_version`, and a write made against a stale version fails with
/// [`StoreError::Conflict`] instead of overwriting. Objects with finalizers
/// are deleted gracefully: `delete` only stamps a deletion marker, and the
/// key is removed by the `update` that clears the last finalizer.
#[derive(Clone)]
pub struct Registry {
    store: StateStore,
}

impl Registry {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub async fn get<R: Resource>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<R>, StoreError> {
        let key = object_key::<R>(namespace, name);
        match self.store.get(&key).await? {
            Some(bytes) => decode(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Every object of kind `R`.
    pub async fn list<R: Resource>(&self) -> Result<Vec<R>, StoreError> {
        self.list_under(R::PREFIX).await
    }

    /// Every object of kind `R` in `namespace`.
    pub async fn list_in_namespace<R: Resource>(
        &self,
        namespace: &str,
    ) -> Result<Vec<R>, StoreError> {
        self.list_under(&namespace_prefix::<R>(namespace)).await
    }

    /// Objects of kind `R` in `namespace` carrying label `key`
    /// (and, if given, with exactly `value`).
    pub async fn list_labelled<R: Resource>(
        &self,
        namespace: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<Vec<R>, StoreError> {
        let objects = self.list_in_namespace::<R>(namespace).await?;
        Ok(objects
            .into_iter()
            .filter(|obj| match (obj.labels().get(key), value) {
                (Some(found), Some(wanted)) => found == wanted,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .collect())
    }

    /// Create `obj`; fails with `AlreadyExists` if the key is taken.
    /// Returns the stored object with its initial version.
    pub async fn create<R: Resource>(&self, obj: &R) -> Result<R, StoreError> {
        let key = obj.key();
        let mut created = obj.clone();
        created.set_resource_version(1);
        let bytes = encode(&key, &created)?;
        self.store
            .compare_and_mutate(&key, |current| match current {
                Some(_) => Err(StoreError::AlreadyExists {
                    kind: R::KIND,
                    key: key.clone(),
                }),
                None => Ok(Mutation::Put(bytes)),
            })
            .await?;
        debug!("Created {} {}", R::KIND, key);
        Ok(created)
    }

    /// Replace the stored object with `obj` if its version still matches.
    ///
    /// Returns the stored object with its new version, or `None` when the
    /// write completed a pending deletion (marker set, no finalizers left).
    pub async fn update<R: Resource>(&self, obj: &R) -> Result<Option<R>, StoreError> {
        let key = obj.key();
        let expected = obj.resource_version();
        let mut next = obj.clone();
        next.set_resource_version(expected + 1);
        let finalized = next.deletion_timestamp().is_some() && next.finalizers().is_empty();
        let bytes = encode(&key, &next)?;

        self.store
            .compare_and_mutate(&key, |current| {
                let stored: R = match current {
                    Some(raw) => decode(&key, raw)?,
                    None => {
                        return Err(StoreError::NotFound {
                            kind: R::KIND,
                            key: key.clone(),
                        });
                    }
                };
                check_version(&key, expected, stored.resource_version())?;
                if finalized {
                    Ok(Mutation::Delete)
                } else {
                    Ok(Mutation::Put(bytes))
                }
            })
            .await?;

        if finalized {
            debug!("Finalized {} {}", R::KIND, key);
            Ok(None)
        } else {
            Ok(Some(next))
        }
    }

    /// Delete `obj` if its version still matches.
    ///
    /// Objects holding finalizers are only marked for deletion; the marked
    /// object is written back with a bumped version.
    pub async fn delete<R: Resource>(&self, obj: &R) -> Result<(), StoreError> {
        let key = obj.key();
        let expected = obj.resource_version();
        self.store
            .compare_and_mutate(&key, |current| {
                let mut stored: R = match current {
                    Some(raw) => decode(&key, raw)?,
                    None => {
                        return Err(StoreError::NotFound {
                            kind: R::KIND,
                            key: key.clone(),
                        });
                    }
                };
                check_version(&key, expected, stored.resource_version())?;
                if !stored.finalizers().is_empty() && stored.mark_for_deletion(Utc::now()) {
                    stored.set_resource_version(expected + 1);
                    Ok(Mutation::Put(encode(&key, &stored)?))
                } else {
                    Ok(Mutation::Delete)
                }
            })
            .await?;
        debug!("Deleted {} {}", R::KIND, key);
        Ok(())
    }

    async fn list_under<R: Resource>(&self, prefix: &str) -> Result<Vec<R>, StoreError> {
        let entries = self.store.list_prefix(prefix).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| match decode::<R>(&key, &value) {
                Ok(obj) => Some(obj),
                Err(e) => {
                    warn!("Skipping undecodable {}: {}", R::KIND, e);
                    None
                }
            })
            .collect())
    }
}

fn check_version(key: &str, expected: u64, found: u64) -> Result<(), StoreError> {
    if expected == found {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            key: key.to_string(),
            expected,
            found,
        })
    }
}

fn encode<R: Resource>(key: &str, obj: &R) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(obj).map_err(|source| StoreError::Serialization {
        key: key.to_string(),
        source,
    })
}

fn decode<R: Resource>(key: &str, bytes: &[u8]) -> Result<R, StoreError> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Serialization {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::namespace::Namespace;
    use pkg_types::quota::{NamespaceSelector, QuotaProfile, QuotaProfileSpec};

    async fn registry() -> Registry {
        Registry::new(StateStore::in_memory().await.unwrap())
    }

    fn profile() -> QuotaProfile {
        QuotaProfile::new(
            "default",
            "small",
            QuotaProfileSpec {
                namespace_selector: NamespaceSelector::by_label("env", "dev"),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_create_assigns_version_and_rejects_duplicates() {
        let reg = registry().await;
        let created = reg.create(&Namespace::new("dev")).await.unwrap();
        assert_eq!(created.resource_version, 1);

        let err = reg.create(&Namespace::new("dev")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        let fetched: Namespace = reg.get(None, "dev").await.unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let reg = registry().await;
        let created = reg.create(&Namespace::new("dev")).await.unwrap();

        let first = created.clone().with_label("env", "dev");
        let updated = reg.update(&first).await.unwrap().unwrap();
        assert_eq!(updated.resource_version, 2);

        let stale = created.with_label("env", "prod");
        let err = reg.update(&stale).await.unwrap_err();
        assert!(err.is_conflict());

        let fetched: Namespace = reg.get(None, "dev").await.unwrap().unwrap();
        assert_eq!(fetched.labels.get("env").map(String::as_str), Some("dev"));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let reg = registry().await;
        let err = reg.update(&Namespace::new("ghost")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_with_finalizer_marks_then_update_removes() {
        let reg = registry().await;
        let mut p = profile();
        p.add_finalizer("quota.dev.operator/finalizer");
        let created = reg.create(&p).await.unwrap();

        reg.delete(&created).await.unwrap();
        let mut marked: QuotaProfile = reg
            .get(Some("default"), "small")
            .await
            .unwrap()
            .expect("marked profile is kept while finalizers remain");
        assert!(marked.is_marked_for_deletion());
        assert_eq!(marked.resource_version, 2);

        marked.remove_finalizer("quota.dev.operator/finalizer");
        assert!(reg.update(&marked).await.unwrap().is_none());
        let gone: Option<QuotaProfile> = reg.get(Some("default"), "small").await.unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn test_delete_without_finalizer_removes() {
        let reg = registry().await;
        let created = reg.create(&profile()).await.unwrap();
        reg.delete(&created).await.unwrap();
        let gone: Option<QuotaProfile> = reg.get(Some("default"), "small").await.unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn test_list_labelled_filters_by_key_and_value() {
        let reg = registry().await;
        reg.create(&Namespace::new("a").with_label("env", "dev"))
            .await
            .unwrap();
        reg.create(&Namespace::new("b").with_label("env", "prod"))
            .await
            .unwrap();
        reg.create(&Namespace::new("c")).await.unwrap();

        let all: Vec<Namespace> = reg.list().await.unwrap();
        assert_eq!(all.len(), 3);

        let mut p = profile();
        p.labels.insert("tier".to_string(), "gold".to_string());
        reg.create(&p).await.unwrap();
        let gold: Vec<QuotaProfile> = reg
            .list_labelled("default", "tier", Some("gold"))
            .await
            .unwrap();
        assert_eq!(gold.len(), 1);
        let silver: Vec<QuotaProfile> = reg
            .list_labelled("default", "tier", Some("silver"))
            .await
            .unwrap();
        assert!(silver.is_empty());
        let any_tier: Vec<QuotaProfile> =
            reg.list_labelled("default", "tier", None).await.unwrap();
        assert_eq!(any_tier.len(), 1);
    }
}
