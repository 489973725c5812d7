//! Configuration store (C8, spec §3, §4.8).
//!
//! Owns every configuration record and hands out read-only [`ConfigSnapshot`]
//! handles. A reload replaces the snapshot atomically so every table —
//! including the auxiliary tables this crate does not interpret — changes
//! together (spec §6).

mod tree;
mod types;

pub use tree::parse_tree;
pub use types::*;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bus::{BusEvent, ConfigTable, EventBus};
use crate::error::ConfigError;

impl ConfigSnapshot {
    /// Parses a configuration snapshot from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Reads and parses a configuration snapshot from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content).map_err(|e| e.into())
    }

    /// Serializes this snapshot back to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Checks the cross-table invariants from spec §3: unique data point
    /// names, resolvable port references, required role keys present per
    /// equipment kind, and a well-formed interlock graph.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let port_ids: HashSet<&str> = self.ports.iter().map(|p| p.id.as_str()).collect();

        let mut seen_points = HashSet::new();
        for point in &self.data_points {
            if !seen_points.insert(point.name.as_str()) {
                return Err(ConfigError::DuplicateDataPoint(point.name.clone()));
            }
            if !port_ids.contains(point.port_id.as_str()) {
                return Err(ConfigError::UnknownPort(
                    point.name.clone(),
                    point.port_id.clone(),
                ));
            }
        }

        for equipment in &self.equipment {
            for key in equipment.kind.required_keys() {
                if !equipment.data_point_tree.contains_key(*key) {
                    return Err(ConfigError::MissingRequiredKey {
                        equipment: equipment.name.clone(),
                        kind: format!("{:?}", equipment.kind),
                        key: key.to_string(),
                    });
                }
            }
        }

        let mut seen_rules = HashSet::new();
        for rule in &self.interlock_rules {
            if rule.upstream_equipment == rule.downstream_equipment {
                return Err(ConfigError::SelfLoop(rule.upstream_equipment.clone()));
            }
            let key = (
                rule.upstream_equipment.clone(),
                rule.downstream_equipment.clone(),
            );
            if !seen_rules.insert(key) {
                return Err(ConfigError::DuplicateRule {
                    upstream: rule.upstream_equipment.clone(),
                    downstream: rule.downstream_equipment.clone(),
                });
            }
        }

        Ok(())
    }

    /// Index of data points by name, used at boot by every downstream
    /// component to resolve role-key references without re-scanning.
    pub fn data_point_index(&self) -> HashMap<&str, &DataPoint> {
        self.data_points
            .iter()
            .map(|p| (p.name.as_str(), p))
            .collect()
    }

    /// Index of ports by id.
    pub fn port_index(&self) -> HashMap<&str, &Port> {
        self.ports.iter().map(|p| (p.id.as_str(), p)).collect()
    }
}

/// Builds an [`Equipment`]'s role-keyed data point tree from the textual
/// grammar (spec §6), merging it into the equipment record in place.
pub fn attach_tree(equipment: &mut Equipment, text: &str) -> Result<(), ConfigError> {
    equipment.data_point_tree = tree::parse_tree(text)?;
    Ok(())
}

/// Shared, swappable handle to the current configuration snapshot.
///
/// Cloning a `ConfigStore` is cheap and shares the same underlying cell;
/// every reader sees the snapshot installed by the most recent [`Self::reload`].
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<RwLock<Arc<ConfigSnapshot>>>,
    bus: EventBus,
}

/// Every table a snapshot carries, in the order a reload announces them.
const ALL_TABLES: [ConfigTable; 6] = [
    ConfigTable::Ports,
    ConfigTable::DataPoints,
    ConfigTable::Equipment,
    ConfigTable::InterlockRules,
    ConfigTable::Environment,
    ConfigTable::Auxiliary,
];

impl ConfigStore {
    pub fn new(initial: ConfigSnapshot, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
            bus,
        }
    }

    /// Current snapshot. Cheap: an `Arc` clone, no copying of tables.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.inner.read().clone()
    }

    /// Validates and atomically installs a new snapshot, then publishes a
    /// `config_changed(table)` event per table (spec §4.8) — a reload
    /// replaces every table together, so every table is reported changed.
    pub fn reload(&self, next: ConfigSnapshot) -> Result<(), ConfigError> {
        next.validate()?;
        *self.inner.write() = Arc::new(next);
        for table in ALL_TABLES {
            self.bus.publish(BusEvent::ConfigReloaded { table });
        }
        Ok(())
    }
}
