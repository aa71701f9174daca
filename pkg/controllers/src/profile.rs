use async_trait::async_trait;
use pkg_state::Registry;
use pkg_state::watch::WatchEvent;
use pkg_types::namespace::Namespace;
use pkg_types::quota::QuotaProfile;
use pkg_types::resource::parse_key;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::assignment::{Refresh, assign_namespace};
use crate::children::sync_children;
use crate::error::ReconcileError;
use crate::identity::ProfileRef;
use crate::lifecycle::{ProfilePhase, drain, ensure_finalizer, phase, references};
use crate::runner::{Controller, ControllerSettings, Reconciler};
use crate::selector::selects;

/// Reconciles one quota profile, keyed `<namespace>/<name>`.
///
/// Live profiles get the finalizer and push their decision to every
/// namespace they select or currently govern. Deletion-marked profiles
/// are drained.
pub struct QuotaProfileReconciler {
    registry: Registry,
}

impl QuotaProfileReconciler {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    async fn propagate(&self, profile: &QuotaProfile) -> Result<(), ReconcileError> {
        let profiles = self.registry.list::<QuotaProfile>().await?;
        let namespaces = self.registry.list::<Namespace>().await?;
        let affected: Vec<&Namespace> = namespaces
            .iter()
            .filter(|ns| selects(profile, ns).is_some() || references(ns, profile))
            .collect();
        debug!(
            profile = %ProfileRef::of(profile),
            "{} namespaces affected", affected.len()
        );

        let mut failed = Vec::new();
        let mut relabelled = 0;
        for ns in &affected {
            match self.sync_namespace(ns, &profiles).await {
                Ok(true) => relabelled += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(namespace = %ns.name, "Failed to apply quota profile {}: {}", ProfileRef::of(profile), e);
                    failed.push(ns.name.clone());
                }
            }
        }
        if relabelled > 0 {
            info!(
                profile = %ProfileRef::of(profile),
                "Relabelled {} of {} affected namespaces", relabelled, affected.len()
            );
        }

        if !failed.is_empty() {
            return Err(ReconcileError::Incomplete {
                object: format!("quota profile {}", ProfileRef::of(profile)),
                failed,
                total: affected.len(),
            });
        }
        Ok(())
    }

    /// Apply the current decision to one namespace. Returns whether its
    /// labels were written. A namespace deleted since it was listed is
    /// skipped; the namespace controller cleans up after it.
    async fn sync_namespace(
        &self,
        namespace: &Namespace,
        profiles: &[QuotaProfile],
    ) -> Result<bool, ReconcileError> {
        let assignment = match assign_namespace(&self.registry, namespace, profiles, Refresh::Stamp).await {
            Ok(assignment) => assignment,
            Err(e) if e.is_not_found() => {
                debug!(namespace = %namespace.name, "Namespace vanished during propagation");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let report = sync_children(
            &self.registry,
            &namespace.name,
            assignment.governing_profile(profiles),
        )
        .await?;
        report.into_result(&namespace.name)?;
        Ok(assignment.written)
    }
}

#[async_trait]
impl Reconciler for QuotaProfileReconciler {
    const NAME: &'static str = "QuotaProfileController";

    fn key_for(&self, event: &WatchEvent) -> Option<String> {
        match parse_key::<QuotaProfile>(&event.key)? {
            (Some(ns), name) => Some(format!("{ns}/{name}")),
            (None, _) => None,
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, ReconcileError> {
        let profiles = self.registry.list::<QuotaProfile>().await?;
        Ok(profiles
            .into_iter()
            .map(|p| format!("{}/{}", p.namespace, p.name))
            .collect())
    }

    async fn reconcile(&self, key: &str) -> Result<(), ReconcileError> {
        let Some((ns, name)) = key.split_once('/') else {
            warn!("Ignoring malformed quota profile key {}", key);
            return Ok(());
        };
        let Some(profile) = self.registry.get::<QuotaProfile>(Some(ns), name).await? else {
            debug!("Quota profile {} gone, nothing to reconcile", key);
            return Ok(());
        };

        match phase(&profile) {
            ProfilePhase::Active => {
                let profile = ensure_finalizer(&self.registry, &profile).await?;
                self.propagate(&profile).await
            }
            ProfilePhase::Draining => {
                let retracted = drain(&self.registry, &profile).await?;
                info!(
                    profile = %ProfileRef::of(&profile),
                    "Quota profile drained ({} namespaces retracted)", retracted
                );
                Ok(())
            }
            ProfilePhase::Removed => {
                debug!("Quota profile {} awaiting removal", key);
                Ok(())
            }
        }
    }
}

/// Drives quota profiles through their lifecycle.
pub struct QuotaProfileController {
    inner: Controller<QuotaProfileReconciler>,
}

impl QuotaProfileController {
    pub fn new(registry: Registry, settings: ControllerSettings) -> Self {
        Self {
            inner: Controller::new(registry.clone(), QuotaProfileReconciler::new(registry), settings),
        }
    }

    pub fn start(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.inner.start(shutdown)
    }
}
