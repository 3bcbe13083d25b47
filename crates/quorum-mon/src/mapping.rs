//! Monitor endpoint and ID bookkeeping
//!
//! Monitors are named with letters (`a`, `b`, ... `z`, `aa`, ...), so a name
//! maps onto an ordinal. The endpoints record keeps the current
//! `name=endpoint` list, the highest ordinal ever handed out and a JSON
//! placement mapping. Loading never decides anything for the resolver; it
//! only reports what was recorded.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{ENDPOINTS_DATA_KEY, MAPPING_KEY, MAX_MON_ID_KEY, MON_ENDPOINTS_NAME, MON_SECRET_NAME};
use quorum_common::{Error, Result};

/// `max_id` of a cluster that never had a monitor
pub const NO_MONS: i32 = -1;

/// Placement of one monitor
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonScheduleInfo {
    /// Monitor name
    pub name: String,
    /// Node the monitor is pinned to
    pub hostname: String,
    /// Address the monitor binds
    pub address: String,
}

/// Persisted form of the placement mapping
#[derive(Debug, Default, Deserialize)]
struct PersistedMapping {
    #[serde(rename = "node", default)]
    schedule: BTreeMap<String, MonScheduleInfo>,
}

/// Previously assigned monitors
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonMapping {
    /// Highest monitor ordinal ever assigned, [`NO_MONS`] for a new cluster
    pub max_id: i32,
    /// Monitor name -> endpoint
    pub mons: BTreeMap<String, String>,
    /// Monitor name -> placement
    pub schedule: BTreeMap<String, MonScheduleInfo>,
}

impl MonMapping {
    /// Mapping of a cluster with no monitors yet
    pub fn fresh() -> Self {
        Self {
            max_id: NO_MONS,
            mons: BTreeMap::new(),
            schedule: BTreeMap::new(),
        }
    }

    /// Whether no monitor was ever recorded
    pub fn is_fresh(&self) -> bool {
        self.max_id == NO_MONS
    }
}

/// Read access to the monitor endpoints record
#[async_trait]
pub trait EndpointSource: Send + Sync {
    /// Data of the endpoints record, `None` if it does not exist
    async fn get_endpoints(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>>;
}

/// Load the recorded monitor mapping for a namespace
pub async fn load_mon_mapping(source: &dyn EndpointSource, namespace: &str) -> Result<MonMapping> {
    match source.get_endpoints(namespace).await? {
        Some(data) => parse_mon_mapping(&data),
        None => {
            debug!(namespace = %namespace, "monitor endpoints not found, starting fresh");
            Ok(MonMapping::fresh())
        }
    }
}

/// Build a mapping from the endpoints record data
pub fn parse_mon_mapping(data: &BTreeMap<String, String>) -> Result<MonMapping> {
    let mons = data
        .get(ENDPOINTS_DATA_KEY)
        .map(|raw| parse_mon_endpoints(raw))
        .unwrap_or_default();

    let stored_max_id = match data.get(MAX_MON_ID_KEY) {
        Some(raw) => match raw.trim().parse::<i32>() {
            Ok(id) if id >= NO_MONS => id,
            Ok(_) => {
                warn!(value = %raw, "max mon id below {}, ignoring", NO_MONS);
                NO_MONS
            }
            Err(e) => {
                warn!(value = %raw, error = %e, "invalid max mon id");
                NO_MONS
            }
        },
        None => NO_MONS,
    };

    // The stored value can lag behind the monitors actually recorded
    let max_id = mons
        .keys()
        .filter_map(|name| mon_name_to_index(name))
        .fold(stored_max_id, i32::max);
    if max_id != stored_max_id {
        info!(
            stored = stored_max_id,
            actual = max_id,
            "updating obsolete max mon id"
        );
    }

    let schedule = match data.get(MAPPING_KEY).map(|s| s.trim()) {
        Some(raw) if !raw.is_empty() => {
            serde_json::from_str::<PersistedMapping>(raw)
                .map_err(|e| Error::serialization_for_record(MON_ENDPOINTS_NAME, e.to_string()))?
                .schedule
        }
        _ => BTreeMap::new(),
    };

    Ok(MonMapping {
        max_id,
        mons,
        schedule,
    })
}

/// Parse `a=10.0.0.1:6789,b=10.0.0.2:6789` into name -> endpoint
///
/// Malformed entries are skipped.
pub fn parse_mon_endpoints(input: &str) -> BTreeMap<String, String> {
    let mut mons = BTreeMap::new();
    for raw in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match raw.split('=').collect::<Vec<_>>().as_slice() {
            [name, endpoint] if !name.is_empty() && !endpoint.is_empty() => {
                mons.insert(name.to_string(), endpoint.to_string());
            }
            _ => warn!(entry = %raw, "ignoring invalid monitor"),
        }
    }
    mons
}

/// Ordinal of a monitor name (`a` = 0, `z` = 25, `aa` = 26)
///
/// Accepts the daemon name form `rook-ceph-mon-<name>` too.
pub fn mon_name_to_index(name: &str) -> Option<i32> {
    let prefix = format!("{}-", MON_SECRET_NAME);
    let letters = name.strip_prefix(prefix.as_str()).unwrap_or(name);
    if letters.is_empty() {
        return None;
    }

    let mut value: i32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_lowercase() {
            return None;
        }
        let digit = (c as u8 - b'a') as i32 + 1;
        value = value.checked_mul(26)?.checked_add(digit)?;
    }
    Some(value - 1)
}
