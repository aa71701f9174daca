use pkg_types::namespace::Namespace;
use pkg_types::quota::{QuotaProfile, SelectorTarget};
use tracing::{debug, warn};

use crate::identity::encode_profile_ref;

/// How a profile selects a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Name,
    Label,
}

/// The profiles that select one namespace.
///
/// Name matches always shadow label matches, whatever their precedence, so
/// a set never mixes the two.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MatchSet<'a> {
    #[default]
    Empty,
    ByName(Vec<&'a QuotaProfile>),
    ByLabel(Vec<&'a QuotaProfile>),
}

impl<'a> MatchSet<'a> {
    pub fn is_empty(&self) -> bool {
        self.candidates().is_empty()
    }

    pub fn kind(&self) -> Option<MatchKind> {
        match self {
            MatchSet::Empty => None,
            MatchSet::ByName(_) => Some(MatchKind::Name),
            MatchSet::ByLabel(_) => Some(MatchKind::Label),
        }
    }

    pub fn candidates(&self) -> &[&'a QuotaProfile] {
        match self {
            MatchSet::Empty => &[],
            MatchSet::ByName(profiles) | MatchSet::ByLabel(profiles) => profiles,
        }
    }
}

/// How `profile` selects `namespace`, if it does.
///
/// Profiles marked for deletion, profiles with a malformed selector, and
/// profiles whose identity cannot be encoded never match.
pub fn selects(profile: &QuotaProfile, namespace: &Namespace) -> Option<MatchKind> {
    if profile.is_marked_for_deletion() {
        return None;
    }
    let Some(target) = profile.spec.namespace_selector.target() else {
        warn!(
            "Ignoring quota profile {}/{}: invalid namespace selector",
            profile.namespace, profile.name
        );
        return None;
    };
    if let Err(e) = encode_profile_ref(&profile.namespace, &profile.name) {
        warn!("Ignoring quota profile {}/{}: {}", profile.namespace, profile.name, e);
        return None;
    }
    match target {
        SelectorTarget::Name(name) if name == namespace.name => Some(MatchKind::Name),
        SelectorTarget::Label { key, value } => match namespace.labels.get(key) {
            Some(found) if found == value => Some(MatchKind::Label),
            _ => None,
        },
        SelectorTarget::Name(_) => None,
    }
}

/// Every profile in `profiles` that selects `namespace`.
pub fn match_profiles<'a>(namespace: &Namespace, profiles: &'a [QuotaProfile]) -> MatchSet<'a> {
    let mut by_name = Vec::new();
    let mut by_label = Vec::new();
    for profile in profiles {
        match selects(profile, namespace) {
            Some(MatchKind::Name) => by_name.push(profile),
            Some(MatchKind::Label) => by_label.push(profile),
            None => {}
        }
    }

    if by_name.len() > 1 {
        warn!(
            namespace = %namespace.name,
            "{} quota profiles select the namespace by name",
            by_name.len()
        );
    }

    if !by_name.is_empty() {
        if !by_label.is_empty() {
            debug!(
                namespace = %namespace.name,
                "Name selector shadows {} label match(es)",
                by_label.len()
            );
        }
        MatchSet::ByName(by_name)
    } else if !by_label.is_empty() {
        MatchSet::ByLabel(by_label)
    } else {
        MatchSet::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{label_profile, name_profile};
    use chrono::Utc;

    #[test]
    fn test_name_selector_matches_exact_name_only() {
        let ns = Namespace::new("team-a");
        let profiles = vec![name_profile("p1", "team-a", 0), name_profile("p2", "team-b", 0)];
        let matched = match_profiles(&ns, &profiles);
        assert_eq!(matched.kind(), Some(MatchKind::Name));
        assert_eq!(matched.candidates().len(), 1);
        assert_eq!(matched.candidates()[0].name, "p1");
    }

    #[test]
    fn test_label_selector_requires_exact_pair() {
        let profiles = vec![label_profile("p1", "env", "dev", 10, 0)];
        let dev = Namespace::new("a").with_label("env", "dev");
        let prod = Namespace::new("b").with_label("env", "prod");
        let bare = Namespace::new("c");

        assert_eq!(match_profiles(&dev, &profiles).kind(), Some(MatchKind::Label));
        assert!(match_profiles(&prod, &profiles).is_empty());
        assert!(match_profiles(&bare, &profiles).is_empty());
    }

    #[test]
    fn test_profiles_marked_for_deletion_never_match() {
        let mut p = label_profile("p1", "env", "dev", 10, 0);
        p.deletion_timestamp = Some(Utc::now());
        let ns = Namespace::new("a").with_label("env", "dev");
        assert_eq!(selects(&p, &ns), None);
        assert!(match_profiles(&ns, &[p]).is_empty());
    }

    #[test]
    fn test_invalid_profiles_never_match() {
        let mut both = label_profile("p1", "env", "dev", 10, 0);
        both.spec.namespace_selector.match_name = Some("a".to_string());
        let mut dotted = label_profile("p2", "env", "dev", 10, 0);
        dotted.name = "p.2".to_string();

        let ns = Namespace::new("a").with_label("env", "dev");
        assert_eq!(selects(&both, &ns), None);
        assert_eq!(selects(&dotted, &ns), None);
    }

    #[test]
    fn test_name_match_shadows_label_matches() {
        let profiles = vec![
            label_profile("label-high", "env", "dev", 100, 0),
            name_profile("by-name", "a", 1),
        ];
        let ns = Namespace::new("a").with_label("env", "dev");
        let matched = match_profiles(&ns, &profiles);
        assert_eq!(matched.kind(), Some(MatchKind::Name));
        assert_eq!(matched.candidates().len(), 1);
        assert_eq!(matched.candidates()[0].name, "by-name");
    }

    #[test]
    fn test_duplicate_name_matches_are_passed_through() {
        let profiles = vec![name_profile("p1", "a", 0), name_profile("p2", "a", 1)];
        let matched = match_profiles(&Namespace::new("a"), &profiles);
        assert_eq!(matched.candidates().len(), 2);
    }
}
