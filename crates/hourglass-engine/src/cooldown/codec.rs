//! Persistence Codec
//!
//! Converts live table entries to and from the persisted document:
//!
//! ```yaml
//! cooldowns:
//!   0b6f1c52-3c4e-4f43-9d0e-8b9a2f7c1d11:
//!     home: 1700000010000
//!     warp: 1700000600000
//! ```
//!
//! JSON uses the same layout. Expiries are absolute milliseconds since the
//! Unix epoch; entries lapsed at encode or decode time are dropped.

use std::collections::BTreeMap;
use std::path::Path;

use hourglass_common::{HourglassError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::model::ActionKey;
use super::table::TableSnapshot;

/// On-disk document format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFormat {
    #[default]
    Yaml,
    Json,
}

impl DataFormat {
    /// `.json` files are JSON; everything else is YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DataFormat::Json,
            _ => DataFormat::Yaml,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedCooldowns {
    #[serde(default)]
    cooldowns: Option<BTreeMap<String, BTreeMap<String, i64>>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PersistenceCodec {
    format: DataFormat,
}

impl PersistenceCodec {
    pub fn new(format: DataFormat) -> Self {
        Self { format }
    }

    pub fn for_path(path: &Path) -> Self {
        Self::new(DataFormat::from_path(path))
    }

    pub fn format(&self) -> DataFormat {
        self.format
    }

    /// Serialise every entry whose expiry lies after `now_ms`
    pub fn encode(&self, snapshot: &TableSnapshot, now_ms: i64) -> Result<Vec<u8>> {
        let cooldowns: BTreeMap<String, BTreeMap<String, i64>> = snapshot
            .iter()
            .filter_map(|(actor, actions)| {
                let live: BTreeMap<String, i64> = actions
                    .iter()
                    .filter(|(_, expiry)| **expiry > now_ms)
                    .map(|(action, expiry)| (action.to_string(), *expiry))
                    .collect();
                (!live.is_empty()).then(|| (actor.to_string(), live))
            })
            .collect();

        let document = PersistedCooldowns {
            cooldowns: Some(cooldowns),
        };

        match self.format {
            DataFormat::Yaml => serde_yaml::to_string(&document)
                .map(String::into_bytes)
                .map_err(|e| HourglassError::storage(format!("failed to encode cooldowns: {}", e))),
            DataFormat::Json => serde_json::to_vec_pretty(&document)
                .map_err(|e| HourglassError::storage(format!("failed to encode cooldowns: {}", e))),
        }
    }

    /// Parse a persisted document, keeping entries still live at `now_ms`.
    ///
    /// Empty input is an empty table. Unparseable documents are a storage
    /// error; individual entries with a malformed actor id or action key are
    /// skipped with a warning.
    pub fn decode(&self, bytes: &[u8], now_ms: i64) -> Result<TableSnapshot> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(TableSnapshot::new());
        }

        let document: PersistedCooldowns = match self.format {
            DataFormat::Yaml => serde_yaml::from_slice(bytes)
                .map_err(|e| HourglassError::storage(format!("corrupt cooldown data: {}", e)))?,
            DataFormat::Json => serde_json::from_slice(bytes)
                .map_err(|e| HourglassError::storage(format!("corrupt cooldown data: {}", e)))?,
        };

        let mut snapshot = TableSnapshot::new();
        for (actor, actions) in document.cooldowns.unwrap_or_default() {
            let actor_id = match Uuid::parse_str(&actor) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Skipping persisted cooldowns for invalid actor '{}': {}", actor, e);
                    continue;
                }
            };

            let live: BTreeMap<ActionKey, i64> = actions
                .into_iter()
                .filter(|(_, expiry)| *expiry > now_ms)
                .map(|(action, expiry)| (ActionKey::new(&action), expiry))
                .filter(|(action, _)| !action.is_empty())
                .collect();
            if !live.is_empty() {
                snapshot.entry(actor_id).or_default().extend(live);
            }
        }

        Ok(snapshot)
    }
}
