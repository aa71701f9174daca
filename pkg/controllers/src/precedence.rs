use std::cmp::Ordering;
use tracing::debug;

use pkg_types::quota::QuotaProfile;

use crate::identity::{ProfileRef, decode_profile_ref};
use crate::selector::MatchSet;

/// Outcome of resolving one namespace's governing profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing matches and nothing is recorded.
    Ungoverned,
    /// Nothing matches any more; drop the recorded reference.
    Retract,
    /// The recorded profile still wins.
    Keep(ProfileRef),
    /// A different profile wins, or the namespace had none.
    Assign(ProfileRef),
}

impl Resolution {
    /// The profile governing the namespace once this resolution is applied.
    pub fn governor(&self) -> Option<&ProfileRef> {
        match self {
            Resolution::Keep(r) | Resolution::Assign(r) => Some(r),
            Resolution::Ungoverned | Resolution::Retract => None,
        }
    }
}

/// Decide which profile governs a namespace.
///
/// `current` is the raw governing-reference label, if any. The result is a
/// pure function of `(current, matches)`: candidates are put in creation
/// order, then ranked by higher precedence, earlier creation time, the
/// incumbent, and finally identity so that no two candidates ever tie.
/// A malformed `current` is treated as naming no candidate.
pub fn resolve(current: Option<&str>, matches: &MatchSet<'_>) -> Resolution {
    let incumbent = current.and_then(|raw| match decode_profile_ref(raw) {
        Ok(r) => Some(r),
        Err(e) => {
            debug!("Ignoring governing reference: {}", e);
            None
        }
    });

    let mut candidates: Vec<&QuotaProfile> = matches.candidates().to_vec();
    if candidates.is_empty() {
        return match current {
            Some(_) => Resolution::Retract,
            None => Resolution::Ungoverned,
        };
    }
    candidates.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| identity(a).cmp(&identity(b)))
    });

    let is_incumbent =
        |p: &QuotaProfile| incumbent.as_ref().is_some_and(|r| r.is(p));
    let winner = candidates
        .into_iter()
        .min_by(|a, b| rank(a, b, &is_incumbent))
        .map(ProfileRef::of);

    match (winner, incumbent) {
        (Some(w), Some(i)) if w == i => Resolution::Keep(w),
        (Some(w), _) => Resolution::Assign(w),
        (None, _) => Resolution::Ungoverned,
    }
}

fn identity(p: &QuotaProfile) -> (&str, &str) {
    (&p.namespace, &p.name)
}

/// `Less` means `a` beats `b`.
fn rank(
    a: &QuotaProfile,
    b: &QuotaProfile,
    is_incumbent: &impl Fn(&QuotaProfile) -> bool,
) -> Ordering {
    b.spec
        .precedence
        .cmp(&a.spec.precedence)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| is_incumbent(b).cmp(&is_incumbent(a)))
        .then_with(|| identity(a).cmp(&identity(b)))
}
