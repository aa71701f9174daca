//! Deterministic identifiers linking namespaces and child objects back to
//! the profile that produced them.
//!
//! A profile reference is `<profileNamespace>.<profileName>`. A child name
//! is `<profileNamespace>.<profileName>-<index>-<suffix>`, where `index` is
//! the position of the originating entry in the profile's spec list. The
//! index is the child's identity: reordering a profile's list is
//! indistinguishable from replacing every entry.

use pkg_constants::labels::{
    CHILD_NAME_SEPARATOR, LIMIT_RANGE_SUFFIX, PROFILE_REF_SEPARATOR, RESOURCE_QUOTA_SUFFIX,
};
use pkg_types::quota::QuotaProfile;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("profile identity part '{0}' must be non-empty and free of '.'")]
    InvalidIdentity(String),

    #[error("malformed profile reference '{0}'")]
    MalformedReference(String),

    #[error("malformed child name '{0}'")]
    MalformedChildName(String),
}

/// The `(namespace, name)` identity of a quota profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfileRef {
    pub namespace: String,
    pub name: String,
}

impl ProfileRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(profile: &QuotaProfile) -> Self {
        Self::new(profile.namespace.clone(), profile.name.clone())
    }

    pub fn is(&self, profile: &QuotaProfile) -> bool {
        self.namespace == profile.namespace && self.name == profile.name
    }

    pub fn encode(&self) -> Result<String, IdentityError> {
        encode_profile_ref(&self.namespace, &self.name)
    }
}

impl fmt::Display for ProfileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The two kinds of managed child objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildKind {
    ResourceQuota,
    LimitRange,
}

impl ChildKind {
    pub const ALL: [ChildKind; 2] = [ChildKind::ResourceQuota, ChildKind::LimitRange];

    pub fn suffix(self) -> &'static str {
        match self {
            ChildKind::ResourceQuota => RESOURCE_QUOTA_SUFFIX,
            ChildKind::LimitRange => LIMIT_RANGE_SUFFIX,
        }
    }
}

fn check_part(part: &str) -> Result<(), IdentityError> {
    if part.is_empty() || part.contains(PROFILE_REF_SEPARATOR) {
        return Err(IdentityError::InvalidIdentity(part.to_string()));
    }
    Ok(())
}

pub fn encode_profile_ref(namespace: &str, name: &str) -> Result<String, IdentityError> {
    check_part(namespace)?;
    check_part(name)?;
    Ok(format!("{namespace}{PROFILE_REF_SEPARATOR}{name}"))
}

pub fn decode_profile_ref(reference: &str) -> Result<ProfileRef, IdentityError> {
    let mut parts = reference.split(PROFILE_REF_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => {
            Ok(ProfileRef::new(ns, name))
        }
        _ => Err(IdentityError::MalformedReference(reference.to_string())),
    }
}

pub fn encode_child_name(
    namespace: &str,
    name: &str,
    index: usize,
    kind: ChildKind,
) -> Result<String, IdentityError> {
    let reference = encode_profile_ref(namespace, name)?;
    Ok(format!(
        "{reference}{sep}{index}{sep}{suffix}",
        sep = CHILD_NAME_SEPARATOR,
        suffix = kind.suffix()
    ))
}

/// Recover the spec-list index from a child name produced by [`encode_child_name`].
pub fn decode_child_index(child_name: &str) -> Result<usize, IdentityError> {
    let malformed = || IdentityError::MalformedChildName(child_name.to_string());

    let stem = ChildKind::ALL
        .iter()
        .find_map(|kind| {
            child_name
                .strip_suffix(kind.suffix())
                .and_then(|rest| rest.strip_suffix(CHILD_NAME_SEPARATOR))
        })
        .ok_or_else(malformed)?;
    let (head, index) = stem.rsplit_once(CHILD_NAME_SEPARATOR).ok_or_else(malformed)?;

    // A head ending in the separator means the index was written as negative.
    if head.is_empty() || head.ends_with(CHILD_NAME_SEPARATOR) {
        return Err(malformed());
    }
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    index.parse().map_err(|_| malformed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_ref_round_trip() {
        let pairs = [
            ("default", "small"),
            ("team-a", "gold-tier"),
            ("q", "p"),
            ("kube-system", "x-1-2-3"),
        ];
        for (ns, name) in pairs {
            let encoded = encode_profile_ref(ns, name).unwrap();
            assert_eq!(decode_profile_ref(&encoded).unwrap(), ProfileRef::new(ns, name));
        }
        assert_eq!(encode_profile_ref("default", "small").unwrap(), "default.small");
    }

    #[test]
    fn test_encode_rejects_separator_and_empty_parts() {
        assert!(matches!(
            encode_profile_ref("a.b", "c"),
            Err(IdentityError::InvalidIdentity(_))
        ));
        assert!(encode_profile_ref("a", "b.c").is_err());
        assert!(encode_profile_ref("", "c").is_err());
        assert!(encode_profile_ref("a", "").is_err());
    }

    #[test]
    fn test_decode_malformed_references() {
        for bad in ["", "nodot", ".name", "ns.", "a.b.c", "."] {
            assert_eq!(
                decode_profile_ref(bad),
                Err(IdentityError::MalformedReference(bad.to_string())),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_child_index_round_trip() {
        for kind in ChildKind::ALL {
            for index in [0usize, 1, 2, 9, 10, 42, 1_000_000] {
                for (ns, name) in [("default", "small"), ("team-a", "p-1")] {
                    let child = encode_child_name(ns, name, index, kind).unwrap();
                    assert_eq!(decode_child_index(&child).unwrap(), index, "{child}");
                }
            }
        }
    }

    #[test]
    fn test_child_names_are_distinct_per_kind_and_index() {
        let rq0 = encode_child_name("default", "small", 0, ChildKind::ResourceQuota).unwrap();
        let rq1 = encode_child_name("default", "small", 1, ChildKind::ResourceQuota).unwrap();
        let lr0 = encode_child_name("default", "small", 0, ChildKind::LimitRange).unwrap();
        assert_eq!(rq0, "default.small-0-rq");
        assert_eq!(lr0, "default.small-0-lr");
        assert_ne!(rq0, rq1);
        assert_ne!(rq0, lr0);
    }

    #[test]
    fn test_decode_malformed_child_names() {
        for bad in [
            "",
            "default.small",
            "default.small-0",
            "default.small-x-rq",
            "default.small--rq",
            "default.small--1-rq",
            "default.small-+1-rq",
            "0-rq",
            "-0-rq",
            "default.small-0-xx",
        ] {
            assert_eq!(
                decode_child_index(bad),
                Err(IdentityError::MalformedChildName(bad.to_string())),
                "{bad:?} should be malformed"
            );
        }
    }
}
