//! State store key layout.

/// Key prefix for namespaces: `/registry/namespaces/<name>`.
pub const NAMESPACES_PREFIX: &str = "/registry/namespaces/";

/// Key prefix for quota profiles: `/registry/quotaprofiles/<ns>/<name>`.
pub const QUOTA_PROFILES_PREFIX: &str = "/registry/quotaprofiles/";

/// Key prefix for resource quotas: `/registry/resourcequotas/<ns>/<name>`.
pub const RESOURCE_QUOTAS_PREFIX: &str = "/registry/resourcequotas/";

/// Key prefix for limit ranges: `/registry/limitranges/<ns>/<name>`.
pub const LIMIT_RANGES_PREFIX: &str = "/registry/limitranges/";

/// Number of recent events retained by the in-memory event log.
pub const EVENT_LOG_CAPACITY: usize = 1024;

/// Capacity of the broadcast channel feeding watchers.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Namespaces created on start-up if they do not exist yet.
pub const SEED_NAMESPACES: [&str; 2] = ["default", "quota-system"];
