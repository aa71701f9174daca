use chrono::Utc;
use pkg_state::Registry;
use pkg_types::namespace::{LabelPatch, Namespace};
use pkg_types::quota::QuotaProfile;
use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::identity::ProfileRef;
use crate::precedence::{Resolution, resolve};
use crate::selector::match_profiles;

/// Whether a still-winning governing reference gets its timestamp rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Leave the namespace untouched (namespace-triggered passes).
    Skip,
    /// Re-stamp the timestamp label (profile-triggered passes).
    Stamp,
}

/// What the engine decided, and did, for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub namespace: String,
    pub resolution: Resolution,
    pub written: bool,
}

impl Assignment {
    pub fn governor(&self) -> Option<&ProfileRef> {
        self.resolution.governor()
    }

    /// The governing profile out of the snapshot the decision was made on.
    pub fn governing_profile<'a>(&self, profiles: &'a [QuotaProfile]) -> Option<&'a QuotaProfile> {
        let governor = self.governor()?;
        profiles.iter().find(|p| governor.is(p))
    }
}

/// The label patch that applies `resolution`, if any write is needed.
pub fn plan(resolution: &Resolution, refresh: Refresh) -> Result<Option<LabelPatch>, ReconcileError> {
    let patch = match resolution {
        Resolution::Ungoverned => None,
        Resolution::Retract => Some(LabelPatch::retract()),
        Resolution::Keep(_) if refresh == Refresh::Skip => None,
        Resolution::Keep(r) | Resolution::Assign(r) => Some(LabelPatch::govern(&r.encode()?, Utc::now())),
    };
    Ok(patch)
}

/// Decide the governing profile for `namespace` against `profiles` and
/// write the result back with a single conditional update.
///
/// A concurrent change to the namespace surfaces as a conflict for the
/// caller to re-schedule.
pub async fn assign_namespace(
    registry: &Registry,
    namespace: &Namespace,
    profiles: &[QuotaProfile],
    refresh: Refresh,
) -> Result<Assignment, ReconcileError> {
    let matches = match_profiles(namespace, profiles);
    let resolution = resolve(namespace.governing_reference(), &matches);

    let Some(patch) = plan(&resolution, refresh)? else {
        debug!(namespace = %namespace.name, "Governing profile unchanged: {:?}", resolution);
        return Ok(Assignment {
            namespace: namespace.name.clone(),
            resolution,
            written: false,
        });
    };

    registry.update(&namespace.patched(&patch)).await?;
    match &resolution {
        Resolution::Assign(r) => info!(
            namespace = %namespace.name,
            "Namespace now governed by quota profile {} (was {})",
            r,
            namespace.governing_reference().unwrap_or("none")
        ),
        Resolution::Retract => info!(
            namespace = %namespace.name,
            "Retracted governing quota profile {}",
            namespace.governing_reference().unwrap_or("none")
        ),
        Resolution::Keep(r) => debug!(
            namespace = %namespace.name,
            "Refreshed governing quota profile {}", r
        ),
        Resolution::Ungoverned => {}
    }

    Ok(Assignment {
        namespace: namespace.name.clone(),
        resolution,
        written: true,
    })
}
