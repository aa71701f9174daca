//! Reconciles a namespace's managed quota and limit objects against the
//! spec lists of its governing profile.
//!
//! Every create, update and delete is attempted independently: a failing
//! child is recorded in the [`SyncReport`] and the remaining children are
//! still processed.

use chrono::Utc;
use pkg_constants::labels::PROFILE_LABEL_KEY;
use pkg_state::Registry;
use pkg_types::limit::{LimitRange, LimitRangeSpec};
use pkg_types::quota::{QuotaProfile, ResourceQuota, ResourceQuotaSpec};
use pkg_types::resource::Resource;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::identity::{ChildKind, IdentityError, decode_child_index, encode_child_name, encode_profile_ref};

/// A child object kind materialized from one of a profile's spec lists.
pub trait ManagedChild: Resource {
    type Spec: Clone + PartialEq + Send + Sync;

    const CHILD_KIND: ChildKind;

    /// The profile's ordered spec list for this kind.
    fn specs(profile: &QuotaProfile) -> &[Self::Spec];

    fn spec(&self) -> &Self::Spec;

    fn set_spec(&mut self, spec: Self::Spec);

    fn build(
        name: String,
        namespace: &str,
        labels: HashMap<String, String>,
        spec: Self::Spec,
    ) -> Self;
}

impl ManagedChild for ResourceQuota {
    type Spec = ResourceQuotaSpec;

    const CHILD_KIND: ChildKind = ChildKind::ResourceQuota;

    fn specs(profile: &QuotaProfile) -> &[ResourceQuotaSpec] {
        &profile.spec.resource_quota_specs
    }

    fn spec(&self) -> &ResourceQuotaSpec {
        &self.spec
    }

    fn set_spec(&mut self, spec: ResourceQuotaSpec) {
        self.spec = spec;
    }

    fn build(
        name: String,
        namespace: &str,
        labels: HashMap<String, String>,
        spec: ResourceQuotaSpec,
    ) -> Self {
        ResourceQuota {
            name,
            namespace: namespace.to_string(),
            labels,
            spec,
            created_at: Utc::now(),
            resource_version: 0,
        }
    }
}

impl ManagedChild for LimitRange {
    type Spec = LimitRangeSpec;

    const CHILD_KIND: ChildKind = ChildKind::LimitRange;

    fn specs(profile: &QuotaProfile) -> &[LimitRangeSpec] {
        &profile.spec.limit_range_specs
    }

    fn spec(&self) -> &LimitRangeSpec {
        &self.spec
    }

    fn set_spec(&mut self, spec: LimitRangeSpec) {
        self.spec = spec;
    }

    fn build(
        name: String,
        namespace: &str,
        labels: HashMap<String, String>,
        spec: LimitRangeSpec,
    ) -> Self {
        LimitRange {
            name,
            namespace: namespace.to_string(),
            labels,
            spec,
            created_at: Utc::now(),
            resource_version: 0,
        }
    }
}

/// A child that could not be reconciled in this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildFailure {
    pub kind: &'static str,
    pub name: String,
    pub reason: String,
}

/// Tally of one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Managed children left as-is because their name could not be decoded.
    /// Re-running the pass does not fix these.
    pub malformed: Vec<ChildFailure>,
    /// Writes that failed and should be retried.
    pub failures: Vec<ChildFailure>,
}

impl SyncReport {
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    pub fn merge(&mut self, other: SyncReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.unchanged += other.unchanged;
        self.malformed.extend(other.malformed);
        self.failures.extend(other.failures);
    }

    /// Turn failed writes into an error so the namespace gets another pass.
    /// Malformed names alone do not fail the pass.
    pub fn into_result(self, namespace: &str) -> Result<(), ReconcileError> {
        if self.failures.is_empty() {
            return Ok(());
        }
        Err(ReconcileError::Incomplete {
            object: format!("namespace {namespace}"),
            total: self.failures.len() + self.writes(),
            failed: self.failures.into_iter().map(|f| f.name).collect(),
        })
    }

    fn fail<C: Resource>(&mut self, name: &str, reason: impl ToString) {
        self.failures.push(failure::<C>(name, reason));
    }
}

fn failure<C: Resource>(name: &str, reason: impl ToString) -> ChildFailure {
    ChildFailure {
        kind: C::KIND,
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Bring every managed child in `namespace` in line with `governor`.
///
/// With no governor every managed child is removed. Unmanaged objects are
/// never touched.
pub async fn sync_children(
    registry: &Registry,
    namespace: &str,
    governor: Option<&QuotaProfile>,
) -> Result<SyncReport, ReconcileError> {
    let mut report = sync_kind::<ResourceQuota>(registry, namespace, governor).await?;
    report.merge(sync_kind::<LimitRange>(registry, namespace, governor).await?);

    if report.writes() > 0 || !report.failures.is_empty() {
        info!(
            namespace = %namespace,
            "Synced managed children: {} created, {} updated, {} deleted, {} failed",
            report.created,
            report.updated,
            report.deleted,
            report.failures.len()
        );
    }
    Ok(report)
}

async fn sync_kind<C: ManagedChild>(
    registry: &Registry,
    namespace: &str,
    governor: Option<&QuotaProfile>,
) -> Result<SyncReport, ReconcileError> {
    let mut report = SyncReport::default();
    let existing = registry
        .list_labelled::<C>(namespace, PROFILE_LABEL_KEY, None)
        .await?;

    let governor_ref = governor
        .map(|p| encode_profile_ref(&p.namespace, &p.name))
        .transpose()?;
    let specs: &[C::Spec] = governor.map(C::specs).unwrap_or(&[]);
    let mut present = BTreeSet::new();

    for child in existing {
        let Some(label) = child.labels().get(PROFILE_LABEL_KEY) else {
            continue;
        };

        let (Some(profile), Some(current)) = (governor, governor_ref.as_deref()) else {
            delete_child(registry, &child, &mut report, "namespace is ungoverned").await;
            continue;
        };
        if label != current {
            delete_child(registry, &child, &mut report, "managed by another profile").await;
            continue;
        }

        let index = match owned_index::<C>(profile, child.name()) {
            Ok(index) => index,
            Err(e) => {
                warn!(namespace = %namespace, "Leaving {} in place: {}", C::KIND, e);
                report.malformed.push(failure::<C>(child.name(), e));
                continue;
            }
        };

        let Some(desired) = specs.get(index) else {
            delete_child(registry, &child, &mut report, "spec list shrank").await;
            continue;
        };
        present.insert(index);

        if child.spec() == desired {
            report.unchanged += 1;
            continue;
        }
        let mut next = child.clone();
        next.set_spec(desired.clone());
        match registry.update(&next).await {
            Ok(_) => {
                debug!(namespace = %namespace, "Updated {} {}", C::KIND, child.name());
                report.updated += 1;
            }
            Err(e) => {
                warn!(namespace = %namespace, "Failed to update {} {}: {}", C::KIND, child.name(), e);
                report.fail::<C>(child.name(), e);
            }
        }
    }

    // Missing indices are created one by one, so a partially present set
    // is completed rather than recreated from scratch.
    if let (Some(profile), Some(reference)) = (governor, governor_ref.as_deref()) {
        for (index, spec) in specs.iter().enumerate() {
            if present.contains(&index) {
                continue;
            }
            let name = encode_child_name(&profile.namespace, &profile.name, index, C::CHILD_KIND)?;
            let labels = HashMap::from([(PROFILE_LABEL_KEY.to_string(), reference.to_string())]);
            let child = C::build(name, namespace, labels, spec.clone());
            match registry.create(&child).await {
                Ok(_) => {
                    debug!(namespace = %namespace, "Created {} {}", C::KIND, child.name());
                    report.created += 1;
                }
                Err(e) => {
                    warn!(namespace = %namespace, "Failed to create {} {}: {}", C::KIND, child.name(), e);
                    report.fail::<C>(child.name(), e);
                }
            }
        }
    }

    Ok(report)
}

/// The spec index a child of `profile` stands for. The name must be exactly
/// the encoding of that index, so label and name can never disagree.
fn owned_index<C: ManagedChild>(profile: &QuotaProfile, name: &str) -> Result<usize, IdentityError> {
    let index = decode_child_index(name)?;
    let expected = encode_child_name(&profile.namespace, &profile.name, index, C::CHILD_KIND)?;
    if expected != name {
        return Err(IdentityError::MalformedChildName(name.to_string()));
    }
    Ok(index)
}

async fn delete_child<C: ManagedChild>(
    registry: &Registry,
    child: &C,
    report: &mut SyncReport,
    reason: &str,
) {
    match registry.delete(child).await {
        Ok(()) => {
            debug!("Deleted {} {} ({})", C::KIND, child.key(), reason);
            report.deleted += 1;
        }
        Err(e) if e.is_not_found() => {
            debug!("{} {} already gone", C::KIND, child.key());
        }
        Err(e) => {
            warn!("Failed to delete {} {}: {}", C::KIND, child.key(), e);
            report.fail::<C>(child.name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{container_max, cpu, label_profile, registry};

    fn profile_with(quotas: Vec<ResourceQuotaSpec>) -> QuotaProfile {
        let mut p = label_profile("p", "env", "dev", 10, 0);
        p.spec.resource_quota_specs = quotas;
        p
    }

    async fn quotas(reg: &Registry, ns: &str) -> Vec<ResourceQuota> {
        let mut all: Vec<ResourceQuota> = reg.list_in_namespace(ns).await.unwrap();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    fn managed(name: &str, ns: &str, reference: &str, spec: ResourceQuotaSpec) -> ResourceQuota {
        ResourceQuota::build(
            name.to_string(),
            ns,
            HashMap::from([(PROFILE_LABEL_KEY.to_string(), reference.to_string())]),
            spec,
        )
    }

    #[tokio::test]
    async fn test_creates_one_child_per_entry() {
        let reg = registry().await;
        let mut p = profile_with(vec![cpu("1"), cpu("2")]);
        p.spec.limit_range_specs = vec![container_max("1Gi")];

        let report = sync_children(&reg, "a", Some(&p)).await.unwrap();
        assert_eq!(report.created, 3);

        let rqs = quotas(&reg, "a").await;
        assert_eq!(
            rqs.iter().map(|q| q.name.as_str()).collect::<Vec<_>>(),
            vec!["default.p-0-rq", "default.p-1-rq"]
        );
        assert_eq!(rqs[1].spec, cpu("2"));
        assert_eq!(
            rqs[0].labels.get(PROFILE_LABEL_KEY).map(String::as_str),
            Some("default.p")
        );

        let lrs: Vec<LimitRange> = reg.list_in_namespace("a").await.unwrap();
        assert_eq!(lrs.len(), 1);
        assert_eq!(lrs[0].name, "default.p-0-lr");
        assert_eq!(lrs[0].spec, container_max("1Gi"));
    }

    #[tokio::test]
    async fn test_second_pass_writes_nothing() {
        let reg = registry().await;
        let mut p = profile_with(vec![cpu("1"), cpu("2")]);
        p.spec.limit_range_specs = vec![container_max("1Gi")];

        sync_children(&reg, "a", Some(&p)).await.unwrap();
        let seq = reg.store().event_log.current_seq().await;

        let again = sync_children(&reg, "a", Some(&p)).await.unwrap();
        assert_eq!(again.writes(), 0);
        assert_eq!(again.unchanged, 3);
        assert_eq!(reg.store().event_log.current_seq().await, seq);
    }

    #[tokio::test]
    async fn test_list_shrink_deletes_tail_and_updates_head() {
        let reg = registry().await;
        let p = profile_with(vec![cpu("1"), cpu("2"), cpu("3")]);
        sync_children(&reg, "a", Some(&p)).await.unwrap();
        assert_eq!(quotas(&reg, "a").await.len(), 3);

        let shrunk = profile_with(vec![cpu("4")]);
        let report = sync_children(&reg, "a", Some(&shrunk)).await.unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 0);

        let rqs = quotas(&reg, "a").await;
        assert_eq!(rqs.len(), 1);
        assert_eq!(rqs[0].name, "default.p-0-rq");
        assert_eq!(rqs[0].spec, cpu("4"));
    }

    #[tokio::test]
    async fn test_list_growth_creates_only_missing_indices() {
        let reg = registry().await;
        sync_children(&reg, "a", Some(&profile_with(vec![cpu("1")])))
            .await
            .unwrap();
        let first: ResourceQuota = reg
            .get(Some("a"), "default.p-0-rq")
            .await
            .unwrap()
            .unwrap();

        let grown = profile_with(vec![cpu("1"), cpu("2"), cpu("3")]);
        let report = sync_children(&reg, "a", Some(&grown)).await.unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.unchanged, 1);

        let kept: ResourceQuota = reg
            .get(Some("a"), "default.p-0-rq")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.resource_version, first.resource_version);
        assert_eq!(quotas(&reg, "a").await.len(), 3);
    }

    #[tokio::test]
    async fn test_children_of_other_profiles_are_deleted_and_unmanaged_kept() {
        let reg = registry().await;
        reg.create(&managed("default.old-0-rq", "a", "default.old", cpu("9")))
            .await
            .unwrap();
        let mut unmanaged = managed("hand-made", "a", "x", cpu("5"));
        unmanaged.labels.clear();
        reg.create(&unmanaged).await.unwrap();

        let p = profile_with(vec![cpu("1")]);
        let report = sync_children(&reg, "a", Some(&p)).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.created, 1);

        let names: Vec<String> = quotas(&reg, "a").await.into_iter().map(|q| q.name).collect();
        assert_eq!(names, vec!["default.p-0-rq", "hand-made"]);
    }

    #[tokio::test]
    async fn test_malformed_names_are_skipped_not_guessed() {
        let reg = registry().await;
        reg.create(&managed("default.p-zero-rq", "a", "default.p", cpu("9")))
            .await
            .unwrap();
        // decodes, but does not encode the governing profile
        reg.create(&managed("default.q-0-rq", "a", "default.p", cpu("9")))
            .await
            .unwrap();

        let p = profile_with(vec![cpu("1")]);
        let report = sync_children(&reg, "a", Some(&p)).await.unwrap();
        assert_eq!(report.malformed.len(), 2);
        assert!(report.failures.is_empty());
        assert_eq!(report.created, 1);
        assert_eq!(report.deleted, 0);

        let bad: ResourceQuota = reg
            .get(Some("a"), "default.p-zero-rq")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bad.spec, cpu("9"));
    }

    #[tokio::test]
    async fn test_ungoverned_namespace_loses_all_managed_children() {
        let reg = registry().await;
        let mut p = profile_with(vec![cpu("1"), cpu("2")]);
        p.spec.limit_range_specs = vec![container_max("1Gi")];
        sync_children(&reg, "a", Some(&p)).await.unwrap();

        let report = sync_children(&reg, "a", None).await.unwrap();
        assert_eq!(report.deleted, 3);
        assert!(quotas(&reg, "a").await.is_empty());
        let lrs: Vec<LimitRange> = reg.list_in_namespace("a").await.unwrap();
        assert!(lrs.is_empty());
    }

    #[tokio::test]
    async fn test_per_child_failure_does_not_stop_the_pass() {
        let reg = registry().await;
        // an unmanaged object squatting on the name of index 0
        let mut squatter = managed("default.p-0-rq", "a", "x", cpu("5"));
        squatter.labels.clear();
        reg.create(&squatter).await.unwrap();

        let p = profile_with(vec![cpu("1"), cpu("2")]);
        let report = sync_children(&reg, "a", Some(&p)).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "default.p-0-rq");
        assert_eq!(report.created, 1);

        let second: ResourceQuota = reg
            .get(Some("a"), "default.p-1-rq")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.spec, cpu("2"));
    }
}
