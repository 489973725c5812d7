//! Equipment state machines (C4, spec §4.4).
//!
//! Per the sum-type design note (spec §9), equipment is represented as a
//! closed `EquipmentController` enum with per-variant state rather than
//! dynamic dispatch; the shared capability set (`status`, `turn_on`,
//! `turn_off`, `set_mode`) is a set of inherent methods matching on the
//! variant.

pub mod feeding;

use std::collections::HashMap;
use std::time::Duration;

use crate::config::{Equipment, EquipmentKind, TreeValue};
use crate::datapoint::{Cache, CacheOutcome, DataPointManager, Value};
use crate::error::EquipmentError;
use crate::interlock::InterlockEngine;
use tokio::time::Instant;

use feeding::{FeedingController, FeedingPhase};

/// Debounce window before `on_but_not_running`/`off_but_running` fire (spec
/// §4.4, §9 open question (b)): fixed crate-wide for now, flagged for a
/// future per-equipment override.
pub const ON_BUT_NOT_RUNNING_DEBOUNCE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Auto,
    Manual,
    Unknown,
}

/// Role-key -> one or more resolved data point names, built from an
/// equipment's data-point tree at boot.
#[derive(Debug, Clone, Default)]
pub struct RoleRefs {
    map: HashMap<String, Vec<String>>,
}

impl RoleRefs {
    pub fn from_map(map: HashMap<String, Vec<String>>) -> Self {
        Self { map }
    }

    pub fn from_tree(tree: &HashMap<String, TreeValue>) -> Self {
        let map = tree
            .iter()
            .map(|(key, value)| (key.clone(), value.as_list()))
            .collect();
        Self { map }
    }

    pub fn role_scalar(&self, key: &str) -> Option<&str> {
        self.map.get(key).and_then(|v| v.first()).map(|s| s.as_str())
    }

    pub fn role_list(&self, key: &str) -> Vec<String> {
        self.map.get(key).cloned().unwrap_or_default()
    }
}

fn read_bool(cache: &Cache, name: &str) -> Option<bool> {
    match cache.get(name)?.outcome {
        CacheOutcome::Ok(v) => v.as_bool(),
        CacheOutcome::Error(_) => None,
    }
}

fn read_error(cache: &Cache, name: &str) -> Option<crate::error::PortError> {
    match cache.get(name)?.outcome {
        CacheOutcome::Error(e) => Some(e),
        CacheOutcome::Ok(_) => None,
    }
}

/// Ephemeral per-equipment published value (spec §3 "Equipment status").
#[derive(Debug, Clone)]
pub struct EquipmentStatus {
    pub name: String,
    pub mode: Mode,
    pub commanded_on: bool,
    pub running_feedback: Option<bool>,
    pub error: Option<EquipmentError>,
    pub extras: StatusExtras,
}

#[derive(Debug, Clone)]
pub enum StatusExtras {
    None,
    Feeding {
        front_limit: Option<bool>,
        back_limit: Option<bool>,
        phase: FeedingPhase,
    },
    FeedIn {
        bucket_full: Option<bool>,
    },
    Sensor {
        value: Option<f64>,
    },
}

fn mode_from_roles(cache: &Cache, roles: &RoleRefs) -> Mode {
    match roles.role_scalar("auto_manual") {
        Some(name) => match read_bool(cache, name) {
            Some(true) => Mode::Auto,
            Some(false) => Mode::Manual,
            None => Mode::Unknown,
        },
        None => Mode::Auto,
    }
}

/// Standard start/stop actuator with optional feedback and auto/manual
/// (fan, pump, light, siren, egg, the three dung-belt kinds).
pub struct ActuatorController {
    pub name: String,
    pub kind: EquipmentKind,
    roles: RoleRefs,
    commanded_on: bool,
    on_since: Option<Instant>,
    off_since_running: Option<Instant>,
    manual_switch_seen_at: Option<Instant>,
}

impl ActuatorController {
    pub fn new(equipment: &Equipment, roles: RoleRefs) -> Self {
        Self {
            name: equipment.name.clone(),
            kind: equipment.kind,
            roles,
            commanded_on: false,
            on_since: None,
            off_since_running: None,
            manual_switch_seen_at: None,
        }
    }

    pub fn status(&self, cache: &Cache) -> EquipmentStatus {
        let mode = mode_from_roles(cache, &self.roles);
        let feedback_name = self.roles.role_scalar("running_feedback");
        let running_feedback = feedback_name.and_then(|name| read_bool(cache, name));
        let port_error = feedback_name.and_then(|name| read_error(cache, name));

        let error = port_error.map(EquipmentError::from).or_else(|| {
            if self.commanded_on && running_feedback == Some(false) {
                let debounced = self
                    .on_since
                    .map(|t| t.elapsed() >= ON_BUT_NOT_RUNNING_DEBOUNCE)
                    .unwrap_or(false);
                if debounced {
                    return Some(EquipmentError::OnButNotRunning);
                }
            }
            if !self.commanded_on && running_feedback == Some(true) {
                let debounced = self
                    .off_since_running
                    .map(|t| t.elapsed() >= ON_BUT_NOT_RUNNING_DEBOUNCE)
                    .unwrap_or(false);
                if debounced {
                    return Some(EquipmentError::OffButRunning);
                }
            }
            None
        });

        EquipmentStatus {
            name: self.name.clone(),
            mode,
            commanded_on: self.commanded_on,
            running_feedback,
            error,
            extras: StatusExtras::None,
        }
    }

    /// Re-derives debounce timer state from the latest feedback reading.
    /// Call once per poll tick before reading `status`.
    pub fn refresh(&mut self, cache: &Cache) {
        let feedback = self
            .roles
            .role_scalar("running_feedback")
            .and_then(|name| read_bool(cache, name));

        match feedback {
            Some(true) if !self.commanded_on => {
                self.off_since_running.get_or_insert(Instant::now());
            }
            _ => self.off_since_running = None,
        }
    }

    pub fn mode(&self, cache: &Cache) -> Mode {
        mode_from_roles(cache, &self.roles)
    }

    pub async fn turn_on(
        &mut self,
        cache: &Cache,
        dp: &DataPointManager,
        interlock: &InterlockEngine,
    ) -> Result<(), EquipmentError> {
        if self.mode(cache) != Mode::Auto {
            return Err(EquipmentError::OnButNotRunning);
        }
        interlock.can_start(&self.name)?;
        self.write_command(dp, true).await?;
        self.commanded_on = true;
        self.on_since = Some(Instant::now());
        Ok(())
    }

    pub async fn turn_off(&mut self, dp: &DataPointManager) -> Result<(), EquipmentError> {
        self.write_command(dp, false).await?;
        self.commanded_on = false;
        self.on_since = None;
        Ok(())
    }

    async fn write_command(&self, dp: &DataPointManager, on: bool) -> Result<(), EquipmentError> {
        if let Some(name) = self.roles.role_scalar("on_off_coil") {
            dp.write(name, Value::Bool(on)).await?;
        }
        Ok(())
    }
}

/// `feed_in`: a filling coil plus a full-switch and trip feedback.
pub struct FeedInController {
    pub name: String,
    roles: RoleRefs,
    commanded_on: bool,
    on_since: Option<Instant>,
}

impl FeedInController {
    pub fn new(equipment: &Equipment, roles: RoleRefs) -> Self {
        Self {
            name: equipment.name.clone(),
            roles,
            commanded_on: false,
            on_since: None,
        }
    }

    pub fn status(&self, cache: &Cache) -> EquipmentStatus {
        let mode = mode_from_roles(cache, &self.roles);
        let running_feedback = self
            .roles
            .role_scalar("running_feedback")
            .and_then(|name| read_bool(cache, name));
        let bucket_full = self
            .roles
            .role_scalar("full_switch")
            .and_then(|name| read_bool(cache, name));
        let tripped = self
            .roles
            .role_scalar("trip")
            .and_then(|name| read_bool(cache, name))
            .unwrap_or(false);

        let error = if tripped {
            Some(EquipmentError::Disagreement)
        } else if self.commanded_on && running_feedback == Some(false) {
            let debounced = self
                .on_since
                .map(|t| t.elapsed() >= ON_BUT_NOT_RUNNING_DEBOUNCE)
                .unwrap_or(false);
            debounced.then_some(EquipmentError::OnButNotRunning)
        } else {
            None
        };

        EquipmentStatus {
            name: self.name.clone(),
            mode,
            commanded_on: self.commanded_on,
            running_feedback,
            error,
            extras: StatusExtras::FeedIn { bucket_full },
        }
    }

    pub async fn turn_on(
        &mut self,
        cache: &Cache,
        dp: &DataPointManager,
        interlock: &InterlockEngine,
    ) -> Result<(), EquipmentError> {
        if mode_from_roles(cache, &self.roles) != Mode::Auto {
            return Err(EquipmentError::OnButNotRunning);
        }
        interlock.can_start(&self.name)?;
        if let Some(name) = self.roles.role_scalar("filling_coil") {
            dp.write(name, Value::Bool(true)).await?;
        }
        self.commanded_on = true;
        self.on_since = Some(Instant::now());
        Ok(())
    }

    pub async fn turn_off(&mut self, dp: &DataPointManager) -> Result<(), EquipmentError> {
        if let Some(name) = self.roles.role_scalar("filling_coil") {
            dp.write(name, Value::Bool(false)).await?;
        }
        self.commanded_on = false;
        self.on_since = None;
        Ok(())
    }
}

/// Read-through sensor equipment: temp/humidity/co2/nh3/water/power meters,
/// the computed `average_sensor`, and the `power_indicator` lamp relay.
pub struct SensorController {
    pub name: String,
    pub kind: EquipmentKind,
    roles: RoleRefs,
}

impl SensorController {
    pub fn new(equipment: &Equipment, roles: RoleRefs) -> Self {
        Self {
            name: equipment.name.clone(),
            kind: equipment.kind,
            roles,
        }
    }

    pub fn status(&self, cache: &Cache) -> EquipmentStatus {
        let value = if self.kind == EquipmentKind::AverageSensor {
            let sensors = self.roles.role_list("temp_sensors");
            let readings: Vec<f64> = sensors
                .iter()
                .filter_map(|name| match cache.get(name).map(|e| e.outcome) {
                    Some(CacheOutcome::Ok(v)) => v.as_f64(),
                    _ => None,
                })
                .collect();
            if readings.is_empty() {
                None
            } else {
                Some(readings.iter().sum::<f64>() / readings.len() as f64)
            }
        } else {
            self.roles
                .role_scalar("value")
                .or_else(|| self.roles.role_scalar("indicator"))
                .and_then(|name| match cache.get(name).map(|e| e.outcome) {
                    Some(CacheOutcome::Ok(v)) => v.as_f64(),
                    _ => None,
                })
        };

        EquipmentStatus {
            name: self.name.clone(),
            mode: Mode::Auto,
            commanded_on: false,
            running_feedback: None,
            error: None,
            extras: StatusExtras::Sensor { value },
        }
    }
}

/// Closed sum type over every equipment kind (spec §9 design note).
pub enum EquipmentController {
    Actuator(ActuatorController),
    Feeding(FeedingController),
    FeedIn(FeedInController),
    Sensor(SensorController),
}

impl EquipmentController {
    pub fn build(equipment: &Equipment) -> Self {
        let roles = RoleRefs::from_tree(&equipment.data_point_tree);
        match equipment.kind {
            EquipmentKind::Feeding => EquipmentController::Feeding(FeedingController::new(equipment, roles)),
            EquipmentKind::FeedIn => EquipmentController::FeedIn(FeedInController::new(equipment, roles)),
            EquipmentKind::TempSensor
            | EquipmentKind::HumiditySensor
            | EquipmentKind::Co2Sensor
            | EquipmentKind::Nh3Sensor
            | EquipmentKind::WaterMeter
            | EquipmentKind::PowerMeter
            | EquipmentKind::AverageSensor
            | EquipmentKind::PowerIndicator => {
                EquipmentController::Sensor(SensorController::new(equipment, roles))
            }
            _ => EquipmentController::Actuator(ActuatorController::new(equipment, roles)),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            EquipmentController::Actuator(c) => &c.name,
            EquipmentController::Feeding(c) => &c.name,
            EquipmentController::FeedIn(c) => &c.name,
            EquipmentController::Sensor(c) => &c.name,
        }
    }

    pub fn kind(&self) -> Option<EquipmentKind> {
        match self {
            EquipmentController::Actuator(c) => Some(c.kind),
            EquipmentController::Sensor(c) => Some(c.kind),
            EquipmentController::Feeding(_) => Some(EquipmentKind::Feeding),
            EquipmentController::FeedIn(_) => Some(EquipmentKind::FeedIn),
        }
    }

    pub fn status(&self, cache: &Cache) -> EquipmentStatus {
        match self {
            EquipmentController::Actuator(c) => c.status(cache),
            EquipmentController::FeedIn(c) => c.status(cache),
            EquipmentController::Sensor(c) => c.status(cache),
            EquipmentController::Feeding(c) => EquipmentStatus {
                name: c.name.clone(),
                mode: Mode::Auto,
                commanded_on: !matches!(c.phase(), FeedingPhase::AtFront),
                running_feedback: None,
                error: matches!(c.phase(), FeedingPhase::Fault).then_some(EquipmentError::Disagreement),
                extras: StatusExtras::Feeding {
                    front_limit: None,
                    back_limit: None,
                    phase: c.phase(),
                },
            },
        }
    }

    /// Refreshes debounce/position state from the latest cache readings.
    /// Called once per equipment poll tick, before `status`.
    pub async fn refresh(&mut self, cache: &Cache, dp: &DataPointManager) {
        match self {
            EquipmentController::Actuator(c) => c.refresh(cache),
            EquipmentController::Feeding(c) => c.refresh(cache, dp).await,
            EquipmentController::FeedIn(_) | EquipmentController::Sensor(_) => {}
        }
    }

    /// `Auto`/`Manual`/`Unknown` for kinds with mode; actuators-only, kinds
    /// without a mode concept report `Auto`.
    pub fn mode(&self, cache: &Cache) -> Mode {
        match self {
            EquipmentController::Actuator(c) => c.mode(cache),
            EquipmentController::FeedIn(c) => mode_from_roles(cache, &c.roles),
            EquipmentController::Feeding(_) | EquipmentController::Sensor(_) => Mode::Auto,
        }
    }

    pub async fn turn_on(
        &mut self,
        cache: &Cache,
        dp: &DataPointManager,
        interlock: &InterlockEngine,
    ) -> Result<(), EquipmentError> {
        match self {
            EquipmentController::Actuator(c) => c.turn_on(cache, dp, interlock).await,
            EquipmentController::FeedIn(c) => c.turn_on(cache, dp, interlock).await,
            EquipmentController::Feeding(_) | EquipmentController::Sensor(_) => Ok(()),
        }
    }

    pub async fn turn_off(&mut self, dp: &DataPointManager) -> Result<(), EquipmentError> {
        match self {
            EquipmentController::Actuator(c) => c.turn_off(dp).await,
            EquipmentController::FeedIn(c) => c.turn_off(dp).await,
            EquipmentController::Feeding(_) | EquipmentController::Sensor(_) => Ok(()),
        }
    }
}

/// Owns every equipment controller behind one lock (spec §5: "each
/// equipment... is a task"; controllers themselves are cheap state machines
/// driven by the schedulers/environment controller/interlock engine rather
/// than each running its own task).
#[derive(Clone)]
pub struct EquipmentRegistry {
    inner: std::sync::Arc<tokio::sync::Mutex<HashMap<String, EquipmentController>>>,
}

impl EquipmentRegistry {
    pub fn build(snapshot: &crate::config::ConfigSnapshot) -> Self {
        let mut map = HashMap::new();
        for equipment in &snapshot.equipment {
            map.insert(equipment.name.clone(), EquipmentController::build(equipment));
        }
        Self {
            inner: std::sync::Arc::new(tokio::sync::Mutex::new(map)),
        }
    }

    pub async fn names(&self) -> Vec<String> {
        self.inner.lock().await.keys().cloned().collect()
    }

    pub async fn names_of_kind(&self, kind: EquipmentKind) -> Vec<String> {
        self.inner
            .lock()
            .await
            .iter()
            .filter(|(_, c)| c.kind() == Some(kind))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub async fn status(&self, name: &str, cache: &Cache) -> Option<EquipmentStatus> {
        self.inner.lock().await.get(name).map(|c| c.status(cache))
    }

    pub async fn refresh_all(&self, cache: &Cache, dp: &DataPointManager) {
        for controller in self.inner.lock().await.values_mut() {
            controller.refresh(cache, dp).await;
        }
    }

    pub async fn mode(&self, name: &str, cache: &Cache) -> Option<Mode> {
        self.inner.lock().await.get(name).map(|c| c.mode(cache))
    }

    pub async fn turn_on(
        &self,
        name: &str,
        cache: &Cache,
        dp: &DataPointManager,
        interlock: &InterlockEngine,
    ) -> Result<(), EquipmentError> {
        let mut guard = self.inner.lock().await;
        let controller = guard.get_mut(name).ok_or(EquipmentError::Disagreement)?;
        controller.turn_on(cache, dp, interlock).await
    }

    pub async fn turn_off(&self, name: &str, dp: &DataPointManager) -> Result<(), EquipmentError> {
        let mut guard = self.inner.lock().await;
        let controller = guard.get_mut(name).ok_or(EquipmentError::Disagreement)?;
        controller.turn_off(dp).await
    }

    pub async fn move_feeder_to_back(
        &self,
        name: &str,
        cache: &Cache,
        dp: &DataPointManager,
        bucket_full: bool,
    ) -> Result<(), EquipmentError> {
        let mut guard = self.inner.lock().await;
        match guard.get_mut(name) {
            Some(EquipmentController::Feeding(feeder)) => {
                feeder.move_to_back(cache, dp, bucket_full).await
            }
            _ => Err(EquipmentError::Disagreement),
        }
    }

    pub async fn move_feeder_to_front(
        &self,
        name: &str,
        cache: &Cache,
        dp: &DataPointManager,
    ) -> Result<(), EquipmentError> {
        let mut guard = self.inner.lock().await;
        match guard.get_mut(name) {
            Some(EquipmentController::Feeding(feeder)) => feeder.move_to_front(cache, dp).await,
            _ => Err(EquipmentError::Disagreement),
        }
    }
}
