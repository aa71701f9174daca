//! Label keys, finalizer names and child-name encoding tokens.
//!
//! These values are the persisted contract between passes: changing any of
//! them orphans every object written by a previous version.

/// Label naming the governing profile, as `<profileNamespace>.<profileName>`.
///
/// Set on namespaces (governing reference) and on every managed child object.
pub const PROFILE_LABEL_KEY: &str = "quota.dev.operator/profile";

/// Label holding the Unix-microsecond time the governing reference was last written.
pub const PROFILE_LAST_UPDATE_LABEL_KEY: &str = "quota.dev.operator/profile-last-update";

/// Finalizer attached to every profile the controller has observed.
pub const PROFILE_FINALIZER: &str = "quota.dev.operator/finalizer";

/// Separator between profile namespace and profile name in an encoded reference.
pub const PROFILE_REF_SEPARATOR: char = '.';

/// Separator between the segments of an encoded child name.
pub const CHILD_NAME_SEPARATOR: char = '-';

/// Name suffix for managed resource quotas.
pub const RESOURCE_QUOTA_SUFFIX: &str = "rq";

/// Name suffix for managed limit ranges.
pub const LIMIT_RANGE_SUFFIX: &str = "lr";
