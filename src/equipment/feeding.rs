//! Feeding directional motor state machine (spec §4.4.1).

use std::time::Duration;

use log::warn;

use crate::config::Equipment;
use crate::datapoint::{Cache, Value};
use crate::datapoint::DataPointManager;
use crate::error::EquipmentError;
use tokio::time::Instant;

use super::{Mode, RoleRefs};

/// Debounce window for the pulse-sensor stall detector: absence of ticks
/// this long while a direction coil is energized is a stall (spec §4.4.1).
const PULSE_STALL_DEBOUNCE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedingPhase {
    AtFront,
    AtBack,
    MovingToBack,
    MovingToFront,
    Fault,
}

pub struct FeedingController {
    pub name: String,
    roles: RoleRefs,
    phase: FeedingPhase,
    last_pulse: Option<Instant>,
    moving_since: Option<Instant>,
}

impl FeedingController {
    pub fn new(equipment: &Equipment, roles: RoleRefs) -> Self {
        Self {
            name: equipment.name.clone(),
            roles,
            phase: FeedingPhase::AtFront,
            last_pulse: None,
            moving_since: None,
        }
    }

    pub fn phase(&self) -> FeedingPhase {
        self.phase
    }

    fn mode(&self, cache: &Cache) -> Mode {
        match self.roles.role_scalar("auto_manual") {
            Some(name) => match cache.get(name).and_then(|e| value_bool(&e)) {
                Some(true) => Mode::Auto,
                Some(false) => Mode::Manual,
                None => Mode::Unknown,
            },
            None => Mode::Auto,
        }
    }

    fn limit(&self, cache: &Cache, role: &str) -> Option<bool> {
        self.roles
            .role_scalar(role)
            .and_then(|name| cache.get(name))
            .and_then(|e| value_bool(&e))
    }

    /// Re-evaluates position/fault state from current sensor readings.
    /// Called every poll tick regardless of a pending command.
    pub async fn refresh(&mut self, cache: &Cache, dp: &DataPointManager) {
        let front = self.limit(cache, "front_limit");
        let back = self.limit(cache, "back_limit");

        if let (Some(true), Some(true)) = (front, back) {
            self.enter_fault(dp).await;
            return;
        }

        match self.phase {
            FeedingPhase::MovingToBack => {
                if back == Some(true) {
                    self.phase = FeedingPhase::AtBack;
                    self.moving_since = None;
                } else if self.stalled(cache, "fwd_feedback") {
                    self.enter_fault(dp).await;
                }
            }
            FeedingPhase::MovingToFront => {
                if front == Some(true) {
                    self.phase = FeedingPhase::AtFront;
                    self.moving_since = None;
                } else if self.stalled(cache, "rev_feedback") {
                    self.enter_fault(dp).await;
                }
            }
            _ => {}
        }
    }

    /// Withdraws both direction coils on entry into `Fault` (spec §4.4.1).
    async fn enter_fault(&mut self, dp: &DataPointManager) {
        self.phase = FeedingPhase::Fault;
        if let Err(err) = self.write_coil(dp, "to_back_limit", false).await {
            warn!("feeding {}: failed withdrawing back coil on fault: {err}", self.name);
        }
        if let Err(err) = self.write_coil(dp, "to_front_limit", false).await {
            warn!("feeding {}: failed withdrawing front coil on fault: {err}", self.name);
        }
    }

    fn stalled(&mut self, cache: &Cache, feedback_role: &str) -> bool {
        let feedback_on = self
            .roles
            .role_scalar(feedback_role)
            .and_then(|name| cache.get(name))
            .and_then(|e| value_bool(&e))
            .unwrap_or(false);
        if !feedback_on {
            return false;
        }
        let pulsed = self
            .roles
            .role_scalar("pulse_sensor")
            .and_then(|name| cache.get(name))
            .and_then(|e| value_bool(&e))
            .unwrap_or(false);
        if pulsed {
            self.last_pulse = Some(Instant::now());
            return false;
        }
        match self.last_pulse {
            Some(t) => t.elapsed() >= PULSE_STALL_DEBOUNCE,
            None => false,
        }
    }

    /// Requests the directional move to the back limit. Accepted only when
    /// at the front limit, not at the back limit, and (if a feed-in bucket
    /// gate is configured) the bucket reads full.
    pub async fn move_to_back(
        &mut self,
        cache: &Cache,
        dp: &DataPointManager,
        bucket_full: bool,
    ) -> Result<(), EquipmentError> {
        if self.mode(cache) != Mode::Auto {
            return Err(EquipmentError::OnButNotRunning);
        }
        let front = self.limit(cache, "front_limit");
        let back = self.limit(cache, "back_limit");
        if front != Some(true) || back != Some(false) {
            return Err(EquipmentError::Disagreement);
        }
        if self.roles.role_scalar("full_switch").is_some() && !bucket_full {
            return Err(EquipmentError::Disagreement);
        }

        self.write_coil(dp, "to_back_limit", true).await?;
        self.write_coil(dp, "to_front_limit", false).await?;
        self.phase = FeedingPhase::MovingToBack;
        self.moving_since = Some(Instant::now());
        self.last_pulse = Some(Instant::now());
        Ok(())
    }

    /// Symmetric to [`Self::move_to_back`] with limits reversed.
    pub async fn move_to_front(
        &mut self,
        cache: &Cache,
        dp: &DataPointManager,
    ) -> Result<(), EquipmentError> {
        if self.mode(cache) != Mode::Auto {
            return Err(EquipmentError::OnButNotRunning);
        }
        let front = self.limit(cache, "front_limit");
        let back = self.limit(cache, "back_limit");
        if back != Some(true) || front != Some(false) {
            return Err(EquipmentError::Disagreement);
        }

        self.write_coil(dp, "to_front_limit", true).await?;
        self.write_coil(dp, "to_back_limit", false).await?;
        self.phase = FeedingPhase::MovingToFront;
        self.moving_since = Some(Instant::now());
        self.last_pulse = Some(Instant::now());
        Ok(())
    }

    /// Clears a fault, withdrawing both direction coils. Requires an
    /// explicit operator call (spec §9 open question (a)): no automatic
    /// recovery path is inferred from sensor state.
    pub async fn reset(&mut self, dp: &DataPointManager) -> Result<(), EquipmentError> {
        self.write_coil(dp, "to_back_limit", false).await?;
        self.write_coil(dp, "to_front_limit", false).await?;
        self.phase = FeedingPhase::AtFront;
        self.moving_since = None;
        Ok(())
    }

    async fn write_coil(
        &self,
        dp: &DataPointManager,
        role: &str,
        on: bool,
    ) -> Result<(), EquipmentError> {
        if let Some(name) = self.roles.role_scalar(role) {
            dp.write(name, Value::Bool(on)).await?;
        }
        Ok(())
    }
}

fn value_bool(entry: &crate::datapoint::CacheEntry) -> Option<bool> {
    match &entry.outcome {
        crate::datapoint::CacheOutcome::Ok(v) => v.as_bool(),
        crate::datapoint::CacheOutcome::Error(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::config::{ConfigSnapshot, ConfigStore};
    use std::collections::HashMap;

    fn roles_with(pairs: &[(&str, &str)]) -> RoleRefs {
        let mut map = HashMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), vec![v.to_string()]);
        }
        RoleRefs::from_map(map)
    }

    #[tokio::test]
    async fn both_limits_on_is_fault() {
        let roles = roles_with(&[
            ("front_limit", "fl"),
            ("back_limit", "bl"),
            ("to_back_limit", "tb"),
            ("to_front_limit", "tf"),
        ]);
        let mut controller = FeedingController {
            name: "feeder".to_string(),
            roles,
            phase: FeedingPhase::MovingToBack,
            last_pulse: None,
            moving_since: None,
        };
        let cache = Cache::default();
        cache_set_bool(&cache, "fl", true);
        cache_set_bool(&cache, "bl", true);
        let config = ConfigStore::new(ConfigSnapshot::default(), EventBus::new());
        let dp = DataPointManager::new(config, EventBus::new(), None);
        controller.refresh(&cache, &dp).await;
        assert_eq!(controller.phase(), FeedingPhase::Fault);
    }

    fn cache_set_bool(cache: &Cache, name: &str, value: bool) {
        use crate::datapoint::{CacheEntry, CacheOutcome};
        cache.set(
            name,
            CacheEntry {
                outcome: CacheOutcome::Ok(Value::Bool(value)),
                updated_at: chrono::Utc::now(),
            },
        );
    }
}
