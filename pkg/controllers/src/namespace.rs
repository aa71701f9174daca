use async_trait::async_trait;
use pkg_state::Registry;
use pkg_state::watch::WatchEvent;
use pkg_types::limit::LimitRange;
use pkg_types::namespace::Namespace;
use pkg_types::quota::{QuotaProfile, ResourceQuota};
use pkg_types::resource::{Resource, parse_key};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::assignment::{Refresh, assign_namespace};
use crate::children::sync_children;
use crate::error::ReconcileError;
use crate::runner::{Controller, ControllerSettings, Reconciler};

/// Reconciles one namespace: its governing profile, then its managed
/// children.
pub struct NamespaceReconciler {
    registry: Registry,
}

impl NamespaceReconciler {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    fn child_namespace<R: Resource>(key: &str) -> Option<String> {
        match parse_key::<R>(key)? {
            (Some(ns), _) => Some(ns.to_string()),
            (None, _) => None,
        }
    }
}

#[async_trait]
impl Reconciler for NamespaceReconciler {
    const NAME: &'static str = "NamespaceController";

    fn key_for(&self, event: &WatchEvent) -> Option<String> {
        if event.key.starts_with(Namespace::PREFIX) {
            return parse_key::<Namespace>(&event.key).map(|(_, name)| name.to_string());
        }
        // A child changed or vanished behind our back.
        Self::child_namespace::<ResourceQuota>(&event.key)
            .or_else(|| Self::child_namespace::<LimitRange>(&event.key))
    }

    async fn list_keys(&self) -> Result<Vec<String>, ReconcileError> {
        let namespaces = self.registry.list::<Namespace>().await?;
        Ok(namespaces.into_iter().map(|ns| ns.name).collect())
    }

    async fn reconcile(&self, key: &str) -> Result<(), ReconcileError> {
        let Some(namespace) = self.registry.get::<Namespace>(None, key).await? else {
            debug!(namespace = %key, "Namespace gone, removing its managed children");
            return sync_children(&self.registry, key, None)
                .await?
                .into_result(key);
        };
        let profiles = self.registry.list::<QuotaProfile>().await?;

        let assignment = assign_namespace(&self.registry, &namespace, &profiles, Refresh::Skip).await?;
        let governor = assignment.governing_profile(&profiles);
        sync_children(&self.registry, &namespace.name, governor)
            .await?
            .into_result(&namespace.name)
    }
}

/// Keeps every namespace's governing profile and managed children current.
pub struct NamespaceController {
    inner: Controller<NamespaceReconciler>,
}

impl NamespaceController {
    pub fn new(registry: Registry, settings: ControllerSettings) -> Self {
        Self {
            inner: Controller::new(registry.clone(), NamespaceReconciler::new(registry), settings),
        }
    }

    pub fn start(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.inner.start(shutdown)
    }
}
