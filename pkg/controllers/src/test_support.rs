//! Fixtures shared by the controller tests.

use chrono::{DateTime, Duration, Utc};
use pkg_state::Registry;
use pkg_state::client::StateStore;
use pkg_types::limit::{LimitRangeItem, LimitRangeSpec, LimitType};
use pkg_types::quota::{NamespaceSelector, QuotaProfile, QuotaProfileSpec, ResourceQuotaSpec};
use std::collections::BTreeMap;

pub const PROFILE_NS: &str = "default";

pub fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn label_profile(
    name: &str,
    key: &str,
    value: &str,
    precedence: u16,
    created_offset_secs: i64,
) -> QuotaProfile {
    profile(
        name,
        NamespaceSelector::by_label(key, value),
        precedence,
        created_offset_secs,
    )
}

pub fn name_profile(name: &str, namespace: &str, created_offset_secs: i64) -> QuotaProfile {
    profile(
        name,
        NamespaceSelector::by_name(namespace),
        0,
        created_offset_secs,
    )
}

fn profile(
    name: &str,
    selector: NamespaceSelector,
    precedence: u16,
    created_offset_secs: i64,
) -> QuotaProfile {
    let mut p = QuotaProfile::new(
        PROFILE_NS,
        name,
        QuotaProfileSpec {
            namespace_selector: selector,
            precedence,
            ..Default::default()
        },
    );
    p.created_at = base_time() + Duration::seconds(created_offset_secs);
    p
}

pub fn cpu(quantity: &str) -> ResourceQuotaSpec {
    ResourceQuotaSpec::hard([("cpu", quantity)])
}

pub fn container_max(memory: &str) -> LimitRangeSpec {
    LimitRangeSpec {
        limits: vec![LimitRangeItem {
            limit_type: LimitType::Container,
            max: BTreeMap::from([("memory".to_string(), memory.to_string())]),
            min: BTreeMap::new(),
            default: BTreeMap::new(),
            default_request: BTreeMap::new(),
            max_limit_request_ratio: BTreeMap::new(),
        }],
    }
}

pub async fn registry() -> Registry {
    Registry::new(StateStore::in_memory().await.unwrap())
}
