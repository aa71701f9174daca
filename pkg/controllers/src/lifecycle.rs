//! Finalizer handling for quota profiles.
//!
//! A profile goes `Active -> Draining -> Removed`. While it holds the
//! finalizer the store only marks it on delete; the finalizer is released
//! once every namespace pointing at it has been retracted.

use pkg_constants::labels::PROFILE_FINALIZER;
use pkg_state::Registry;
use pkg_types::namespace::{LabelPatch, Namespace};
use pkg_types::quota::QuotaProfile;
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::identity::{ProfileRef, decode_profile_ref};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilePhase {
    Active,
    Draining,
    /// Marked for deletion with nothing left holding it.
    Removed,
}

pub fn phase(profile: &QuotaProfile) -> ProfilePhase {
    match (
        profile.is_marked_for_deletion(),
        profile.has_finalizer(PROFILE_FINALIZER),
    ) {
        (false, _) => ProfilePhase::Active,
        (true, true) => ProfilePhase::Draining,
        (true, false) => ProfilePhase::Removed,
    }
}

/// Attach the finalizer if missing. Returns the stored profile.
pub async fn ensure_finalizer(
    registry: &Registry,
    profile: &QuotaProfile,
) -> Result<QuotaProfile, ReconcileError> {
    let mut next = profile.clone();
    if !next.add_finalizer(PROFILE_FINALIZER) {
        return Ok(next);
    }
    match registry.update(&next).await? {
        Some(stored) => {
            info!(profile = %ProfileRef::of(profile), "Attached finalizer");
            Ok(stored)
        }
        None => Ok(next),
    }
}

/// Whether `namespace` records `profile` as its governor.
pub fn references(namespace: &Namespace, profile: &QuotaProfile) -> bool {
    namespace
        .governing_reference()
        .and_then(|raw| decode_profile_ref(raw).ok())
        .is_some_and(|r| r.is(profile))
}

/// Retract every namespace governed by `profile`, then release the
/// finalizer. Returns the number of namespaces retracted.
///
/// If any retraction fails the finalizer stays and the pass reports
/// [`ReconcileError::Incomplete`]; already retracted namespaces keep their
/// new state and are simply not found again on the next attempt.
pub async fn drain(registry: &Registry, profile: &QuotaProfile) -> Result<usize, ReconcileError> {
    let namespaces = registry.list::<Namespace>().await?;
    retract_and_release(registry, profile, &namespaces).await
}

/// Retract `profile` from the governed namespaces among `namespaces`, each
/// written against the snapshot given, then release the finalizer.
async fn retract_and_release(
    registry: &Registry,
    profile: &QuotaProfile,
    namespaces: &[Namespace],
) -> Result<usize, ReconcileError> {
    let reference = ProfileRef::of(profile);
    let governed: Vec<&Namespace> = namespaces
        .iter()
        .filter(|ns| references(ns, profile))
        .collect();

    let mut failed = Vec::new();
    for ns in &governed {
        match registry.update(&ns.patched(&LabelPatch::retract())).await {
            Ok(_) => info!(
                namespace = %ns.name,
                "Retracted quota profile {} ahead of its deletion", reference
            ),
            Err(e) if e.is_not_found() => {
                debug!(namespace = %ns.name, "Namespace vanished during drain");
            }
            Err(e) => {
                warn!(namespace = %ns.name, "Failed to retract quota profile {}: {}", reference, e);
                failed.push(ns.name.clone());
            }
        }
    }

    if !failed.is_empty() {
        return Err(ReconcileError::Incomplete {
            object: reference.to_string(),
            failed,
            total: governed.len(),
        });
    }

    let mut released = profile.clone();
    if released.remove_finalizer(PROFILE_FINALIZER) {
        registry.update(&released).await?;
        info!(
            profile = %reference,
            "Released finalizer after retracting {} namespaces",
            governed.len()
        );
    }
    Ok(governed.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{PROFILE_NS, label_profile, registry};
    use pkg_constants::labels::{PROFILE_LABEL_KEY, PROFILE_LAST_UPDATE_LABEL_KEY};
    use pkg_state::StoreError;

    async fn governed_ns(reg: &Registry, name: &str, reference: &str) -> Namespace {
        let ns = Namespace::new(name).patched(&LabelPatch::govern(reference, chrono::Utc::now()));
        reg.create(&ns).await.unwrap()
    }

    #[test]
    fn test_phase_follows_marker_and_finalizer() {
        let mut p = label_profile("p", "env", "dev", 10, 0);
        assert_eq!(phase(&p), ProfilePhase::Active);
        p.add_finalizer(PROFILE_FINALIZER);
        assert_eq!(phase(&p), ProfilePhase::Active);
        p.deletion_timestamp = Some(chrono::Utc::now());
        assert_eq!(phase(&p), ProfilePhase::Draining);
        p.remove_finalizer(PROFILE_FINALIZER);
        assert_eq!(phase(&p), ProfilePhase::Removed);
    }

    #[tokio::test]
    async fn test_ensure_finalizer_is_written_once() {
        let reg = registry().await;
        let p = reg.create(&label_profile("p", "env", "dev", 10, 0)).await.unwrap();

        let stored = ensure_finalizer(&reg, &p).await.unwrap();
        assert!(stored.has_finalizer(PROFILE_FINALIZER));
        assert_eq!(stored.resource_version, p.resource_version + 1);

        let again = ensure_finalizer(&reg, &stored).await.unwrap();
        assert_eq!(again.resource_version, stored.resource_version);
    }

    #[tokio::test]
    async fn test_deletion_cascade_retracts_only_governed_namespaces() {
        let reg = registry().await;
        let p = reg.create(&label_profile("p", "env", "dev", 10, 0)).await.unwrap();
        let p = ensure_finalizer(&reg, &p).await.unwrap();

        governed_ns(&reg, "a", "default.p").await;
        governed_ns(&reg, "b", "default.p").await;
        governed_ns(&reg, "c", "default.other").await;

        reg.delete(&p).await.unwrap();
        let marked: QuotaProfile = reg.get(Some(PROFILE_NS), "p").await.unwrap().unwrap();
        assert_eq!(phase(&marked), ProfilePhase::Draining);

        assert_eq!(drain(&reg, &marked).await.unwrap(), 2);

        for name in ["a", "b"] {
            let ns: Namespace = reg.get(None, name).await.unwrap().unwrap();
            assert!(!ns.labels.contains_key(PROFILE_LABEL_KEY));
            assert!(!ns.labels.contains_key(PROFILE_LAST_UPDATE_LABEL_KEY));
        }
        let c: Namespace = reg.get(None, "c").await.unwrap().unwrap();
        assert_eq!(c.governing_reference(), Some("default.other"));

        let gone: Option<QuotaProfile> = reg.get(Some(PROFILE_NS), "p").await.unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn test_failed_retraction_keeps_finalizer() {
        let reg = registry().await;
        let p = reg.create(&label_profile("p", "env", "dev", 10, 0)).await.unwrap();
        let p = ensure_finalizer(&reg, &p).await.unwrap();
        let a = governed_ns(&reg, "a", "default.p").await;
        let b = governed_ns(&reg, "b", "default.p").await;

        reg.delete(&p).await.unwrap();
        let marked: QuotaProfile = reg.get(Some(PROFILE_NS), "p").await.unwrap().unwrap();

        // "b" is relabelled by someone else after it was listed.
        reg.update(&b.clone().with_label("owner", "someone"))
            .await
            .unwrap();

        let err = retract_and_release(&reg, &marked, &[a, b])
            .await
            .unwrap_err();
        match &err {
            ReconcileError::Incomplete { failed, total, .. } => {
                assert_eq!(failed, &vec!["b".to_string()]);
                assert_eq!(*total, 2);
            }
            other => panic!("expected an incomplete drain, got {other:?}"),
        }

        let a: Namespace = reg.get(None, "a").await.unwrap().unwrap();
        assert_eq!(a.governing_reference(), None);
        let b: Namespace = reg.get(None, "b").await.unwrap().unwrap();
        assert_eq!(b.governing_reference(), Some("default.p"));
        let held: QuotaProfile = reg.get(Some(PROFILE_NS), "p").await.unwrap().unwrap();
        assert!(held.has_finalizer(PROFILE_FINALIZER));
        assert_eq!(phase(&held), ProfilePhase::Draining);

        // a fresh listing picks up the remaining namespace and finishes
        assert_eq!(drain(&reg, &held).await.unwrap(), 1);
        let gone: Option<QuotaProfile> = reg.get(Some(PROFILE_NS), "p").await.unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn test_drain_fails_when_namespaces_cannot_be_listed() {
        let reg = registry().await;
        let p = reg.create(&label_profile("p", "env", "dev", 10, 0)).await.unwrap();
        let p = ensure_finalizer(&reg, &p).await.unwrap();
        governed_ns(&reg, "a", "default.p").await;
        reg.delete(&p).await.unwrap();
        let marked: QuotaProfile = reg.get(Some(PROFILE_NS), "p").await.unwrap().unwrap();

        let reader = reg.clone();
        reg.store().clone().close().await.unwrap();

        let err = drain(&reader, &marked).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Store(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn test_stale_profile_keeps_finalizer() {
        let reg = registry().await;
        let p = reg.create(&label_profile("p", "env", "dev", 10, 0)).await.unwrap();
        let p = ensure_finalizer(&reg, &p).await.unwrap();
        reg.delete(&p).await.unwrap();

        // `p` predates the deletion marker, so releasing from it must conflict.
        let err = drain(&reg, &p).await.unwrap_err();
        assert!(err.is_conflict());

        let still: QuotaProfile = reg.get(Some(PROFILE_NS), "p").await.unwrap().unwrap();
        assert_eq!(phase(&still), ProfilePhase::Draining);
    }
}
