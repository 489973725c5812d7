//! Interlock engine (C5, spec §4.5): dependency graph plus cascade stop.
//!
//! Holds adjacency lists built from the configured rules and a small
//! per-equipment index of the data points it needs (`running_feedback`,
//! `auto_manual`, `on_off_coil`) resolved once at boot, so the 500 ms poll
//! loop and `can_start` never touch the configuration store directly.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use log::warn;
use parking_lot::RwLock;
use tokio::sync::Notify;
use std::sync::Arc;

use crate::bus::{BusEvent, EventBus};
use crate::config::ConfigStore;
use crate::datapoint::{Cache, CacheOutcome, DataPointManager, Value};
use crate::error::EquipmentError;

#[derive(Debug, Clone, Default)]
struct RoleIndex {
    running_feedback: Option<String>,
    auto_manual: Option<String>,
    on_off_coil: Option<String>,
}

fn read_bool(cache: &Cache, name: &str) -> Option<bool> {
    match cache.get(name)?.outcome {
        CacheOutcome::Ok(v) => v.as_bool(),
        CacheOutcome::Error(_) => None,
    }
}

/// Consulted before a controller writes `on_off_coil = 1`, and runs its own
/// background cascade-stop poll. Absence of an engine (`None` held by a
/// caller) must default to allowed — fail-open is the caller's job, not
/// this type's.
pub struct InterlockEngine {
    config: ConfigStore,
    cache: Cache,
    bus: EventBus,
    /// upstream equipment name -> downstream equipment names.
    downstream_of: RwLock<HashMap<String, Vec<String>>>,
    /// upstream equipment name -> rule enabled flag per downstream.
    enabled: RwLock<HashMap<(String, String), bool>>,
    roles: RwLock<HashMap<String, RoleIndex>>,
    shutdown: Arc<Notify>,
}

impl InterlockEngine {
    pub fn new(config: ConfigStore, cache: Cache, bus: EventBus) -> Arc<Self> {
        let engine = Arc::new(Self {
            config,
            cache,
            bus,
            downstream_of: RwLock::new(HashMap::new()),
            enabled: RwLock::new(HashMap::new()),
            roles: RwLock::new(HashMap::new()),
            shutdown: Arc::new(Notify::new()),
        });
        engine.reload_rules();
        engine
    }

    /// Rebuilds the adjacency lists and role index from the current
    /// configuration snapshot. Safe to call again after a config reload.
    pub fn reload_rules(&self) {
        let snapshot = self.config.snapshot();

        let mut downstream_of: HashMap<String, Vec<String>> = HashMap::new();
        let mut enabled = HashMap::new();
        for rule in &snapshot.interlock_rules {
            downstream_of
                .entry(rule.upstream_equipment.clone())
                .or_default()
                .push(rule.downstream_equipment.clone());
            enabled.insert(
                (rule.upstream_equipment.clone(), rule.downstream_equipment.clone()),
                rule.enabled,
            );
        }
        *self.downstream_of.write() = downstream_of;
        *self.enabled.write() = enabled;

        let mut roles = HashMap::new();
        for equipment in &snapshot.equipment {
            let running_feedback = equipment
                .data_point_tree
                .get("running_feedback")
                .and_then(|v| v.as_scalar())
                .map(str::to_string);
            let auto_manual = equipment
                .data_point_tree
                .get("auto_manual")
                .and_then(|v| v.as_scalar())
                .map(str::to_string);
            let on_off_coil = equipment
                .data_point_tree
                .get("on_off_coil")
                .and_then(|v| v.as_scalar())
                .map(str::to_string);
            roles.insert(
                equipment.name.clone(),
                RoleIndex {
                    running_feedback,
                    auto_manual,
                    on_off_coil,
                },
            );
        }
        *self.roles.write() = roles;
    }

    pub fn get_rules(&self) -> Vec<(String, String, bool)> {
        self.enabled
            .read()
            .iter()
            .map(|((up, down), enabled)| (up.clone(), down.clone(), *enabled))
            .collect()
    }

    fn upstreams_of(&self, name: &str) -> Vec<String> {
        self.downstream_of
            .read()
            .iter()
            .filter(|(_, downs)| downs.iter().any(|d| d == name))
            .map(|(up, _)| up.clone())
            .collect()
    }

    fn mode_is_manual(&self, equipment: &str) -> bool {
        let roles = self.roles.read();
        match roles.get(equipment).and_then(|r| r.auto_manual.as_deref()) {
            Some(point) => read_bool(&self.cache, point) == Some(false),
            None => false,
        }
    }

    fn feedback(&self, equipment: &str) -> Option<bool> {
        let roles = self.roles.read();
        roles
            .get(equipment)
            .and_then(|r| r.running_feedback.as_deref())
            .and_then(|point| read_bool(&self.cache, point))
    }

    /// `Ok` if no enabled upstream rule blocks `name`'s start; otherwise
    /// names the first blocking upstream (spec §4.5).
    pub fn can_start(&self, name: &str) -> Result<(), EquipmentError> {
        for upstream in self.upstreams_of(name) {
            let rule_enabled = self
                .enabled
                .read()
                .get(&(upstream.clone(), name.to_string()))
                .copied()
                .unwrap_or(false);
            if !rule_enabled {
                continue;
            }
            if self.mode_is_manual(&upstream) {
                continue;
            }
            if self.feedback(&upstream) == Some(true) {
                continue;
            }
            return Err(EquipmentError::InterlockBlocked(upstream));
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Spawns the 500 ms cascade-stop poll loop (spec §4.5).
    pub fn spawn_poll_loop(self: &Arc<Self>, dp: Arc<DataPointManager>) {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut last_feedback: HashMap<String, bool> = HashMap::new();
            loop {
                let sleep = tokio::time::sleep(Duration::from_millis(500));
                tokio::select! {
                    _ = engine.shutdown.notified() => return,
                    _ = sleep => {}
                }

                let names: Vec<String> = engine.roles.read().keys().cloned().collect();
                for upstream in names {
                    let Some(current) = engine.feedback(&upstream) else {
                        continue;
                    };
                    let previous = last_feedback.insert(upstream.clone(), current);
                    if previous == Some(true) && !current {
                        engine.cascade_stop(&upstream, &dp).await;
                    }
                }
            }
        });
    }

    async fn cascade_stop(&self, upstream: &str, dp: &DataPointManager) {
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier = vec![upstream.to_string()];
        while let Some(node) = frontier.pop() {
            let Some(downs) = self.downstream_of.read().get(&node).cloned() else {
                continue;
            };
            for down in downs {
                let rule_enabled = self
                    .enabled
                    .read()
                    .get(&(node.clone(), down.clone()))
                    .copied()
                    .unwrap_or(false);
                if !rule_enabled || !visited.insert(down.clone()) {
                    continue;
                }
                let coil = self
                    .roles
                    .read()
                    .get(&down)
                    .and_then(|r| r.on_off_coil.clone());
                if let Some(coil) = coil {
                    if let Err(err) = dp.write(&coil, Value::Bool(false)).await {
                        warn!("interlock cascade stop of {down} failed: {err}");
                    }
                }
                self.bus.publish(BusEvent::InterlockCascadeStop {
                    upstream: node.clone(),
                    downstream: down.clone(),
                });
                frontier.push(down);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSnapshot, Equipment, EquipmentKind, InterlockRule, TreeValue};
    use crate::datapoint::{CacheEntry, CacheOutcome};
    use std::collections::HashMap as StdHashMap;

    fn equipment(name: &str, feedback_point: &str) -> Equipment {
        let mut tree = StdHashMap::new();
        tree.insert(
            "running_feedback".to_string(),
            TreeValue::Scalar(feedback_point.to_string()),
        );
        tree.insert(
            "on_off_coil".to_string(),
            TreeValue::Scalar(format!("{name}_coil")),
        );
        Equipment {
            name: name.to_string(),
            title: name.to_string(),
            kind: EquipmentKind::Dung,
            data_point_tree: tree,
            active: true,
            poll_interval_ms: None,
        }
    }

    fn set(cache: &Cache, name: &str, value: bool) {
        cache.set(
            name,
            CacheEntry {
                outcome: CacheOutcome::Ok(Value::Bool(value)),
                updated_at: chrono::Utc::now(),
            },
        );
    }

    fn snapshot() -> ConfigSnapshot {
        ConfigSnapshot {
            equipment: vec![
                equipment("dung_exit", "fb_exit"),
                equipment("dung_horz", "fb_horz"),
                equipment("dung", "fb_dung"),
            ],
            interlock_rules: vec![
                InterlockRule {
                    upstream_equipment: "dung_exit".to_string(),
                    downstream_equipment: "dung_horz".to_string(),
                    enabled: true,
                },
                InterlockRule {
                    upstream_equipment: "dung_horz".to_string(),
                    downstream_equipment: "dung".to_string(),
                    enabled: true,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn can_start_blocks_when_upstream_feedback_is_off() {
        let config = ConfigStore::new(snapshot(), EventBus::new());
        let cache = Cache::default();
        set(&cache, "fb_exit", false);
        let engine = InterlockEngine::new(config, cache, EventBus::new());
        assert!(engine.can_start("dung_horz").is_err());
    }

    #[test]
    fn can_start_allows_when_upstream_running() {
        let config = ConfigStore::new(snapshot(), EventBus::new());
        let cache = Cache::default();
        set(&cache, "fb_exit", true);
        let engine = InterlockEngine::new(config, cache, EventBus::new());
        assert!(engine.can_start("dung_horz").is_ok());
    }

    #[test]
    fn can_start_allows_when_upstream_in_manual() {
        let mut snap = snapshot();
        snap.equipment[0]
            .data_point_tree
            .insert("auto_manual".to_string(), TreeValue::Scalar("am_exit".to_string()));
        let config = ConfigStore::new(snap, EventBus::new());
        let cache = Cache::default();
        set(&cache, "fb_exit", false);
        set(&cache, "am_exit", false);
        let engine = InterlockEngine::new(config, cache, EventBus::new());
        assert!(engine.can_start("dung_horz").is_ok());
    }

    #[test]
    fn unrelated_equipment_has_no_upstreams() {
        let config = ConfigStore::new(snapshot(), EventBus::new());
        let cache = Cache::default();
        let engine = InterlockEngine::new(config, cache, EventBus::new());
        assert!(engine.can_start("dung_exit").is_ok());
    }
}
