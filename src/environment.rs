//! Environment controller (C6, spec §4.6): closed-loop staircase regulator.
//!
//! Every cycle re-scans live equipment status rather than trusting a cached
//! notion of "which fans are on" (spec §9 design note: reality scanning over
//! intent caching), so a panel-switched fan or pump is noticed on the very
//! next cycle instead of drifting out of sync with the physical state.

use std::time::Duration;

use log::info;
use rand::seq::SliceRandom;
use tokio::sync::Notify;

use crate::bus::{BusEvent, EventBus};
use crate::config::{ConfigStore, EquipmentKind};
use crate::datapoint::{Cache, CacheOutcome, DataPointManager};
use crate::equipment::{EquipmentRegistry, Mode};
use crate::error::EquipmentError;
use crate::interlock::InterlockEngine;
use tokio::time::Instant;

fn read_f64(cache: &Cache, name: &str) -> Option<f64> {
    match cache.get(name)?.outcome {
        CacheOutcome::Ok(v) => v.as_f64(),
        CacheOutcome::Error(_) => None,
    }
}

struct RealityScan {
    auto_on: Vec<String>,
    auto_off: Vec<String>,
    manual_running: usize,
}

async fn scan(
    registry: &EquipmentRegistry,
    cache: &Cache,
    kind: EquipmentKind,
) -> RealityScan {
    let mut auto_on = Vec::new();
    let mut auto_off = Vec::new();
    let mut manual_running = 0usize;

    for name in registry.names_of_kind(kind).await {
        let Some(status) = registry.status(&name, cache).await else {
            continue;
        };
        match status.mode {
            Mode::Auto => {
                let healthy = !matches!(status.error, Some(EquipmentError::OnButNotRunning));
                if status.commanded_on && healthy {
                    auto_on.push(name);
                } else if !status.commanded_on && healthy {
                    auto_off.push(name);
                }
            }
            Mode::Manual => {
                if status.running_feedback == Some(true) {
                    manual_running += 1;
                }
            }
            Mode::Unknown => {}
        }
    }

    RealityScan {
        auto_on,
        auto_off,
        manual_running,
    }
}

/// Highest indexed step whose `temp` threshold is `<=` the reading, or step
/// 1 (the ventilation floor) if the reading is below every threshold.
fn step_for(steps: &[crate::config::TempStep], temp: f64) -> usize {
    let mut chosen = 0;
    for (idx, step) in steps.iter().enumerate() {
        if step.temp <= temp {
            chosen = idx;
        }
    }
    chosen
}

pub struct EnvironmentController {
    config: ConfigStore,
    cache: Cache,
    registry: EquipmentRegistry,
    bus: EventBus,
    interlock: std::sync::Arc<InterlockEngine>,
    shutdown: std::sync::Arc<Notify>,
}

impl EnvironmentController {
    pub fn new(
        config: ConfigStore,
        cache: Cache,
        registry: EquipmentRegistry,
        bus: EventBus,
        interlock: std::sync::Arc<InterlockEngine>,
    ) -> Self {
        Self {
            config,
            cache,
            registry,
            bus,
            interlock,
            shutdown: std::sync::Arc::new(Notify::new()),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// A cloneable shutdown trigger, taken before `spawn` consumes `self`.
    pub fn shutdown_handle(&self) -> Box<dyn Fn() + Send + Sync> {
        let shutdown = self.shutdown.clone();
        Box::new(move || shutdown.notify_waiters())
    }

    pub fn spawn(self, dp: std::sync::Arc<DataPointManager>) {
        tokio::spawn(async move {
            self.run(dp).await;
        });
    }

    async fn run(&self, dp: std::sync::Arc<DataPointManager>) {
        let mut pending_step: Option<(usize, Instant)> = None;
        let mut current_step = 0usize;
        let mut last_command_at: Option<Instant> = None;
        let mut was_boosting = false;

        loop {
            let env = self.config.snapshot().environment.clone();
            let tick = Duration::from_secs(env.poll_interval_seconds.max(1));
            let sleep = tokio::time::sleep(tick);
            tokio::select! {
                _ = self.shutdown.notified() => return,
                _ = sleep => {}
            }

            if !env.enabled {
                self.drive_all_off(&dp).await;
                continue;
            }
            if env.steps.is_empty() {
                continue;
            }

            let avg_temp = self.average_temp(&env).await;
            let avg_humidity = self.average_humidity().await;
            let temp_delta = self.temp_delta(&env);

            let Some(avg_temp) = avg_temp else {
                continue;
            };

            let mut target_step = step_for(&env.steps, avg_temp);
            let boosting = temp_delta
                .map(|d| d > env.max_temp_delta && avg_temp > env.steps[0].temp)
                .unwrap_or(false);

            if boosting {
                target_step = env.steps.len() - 1;
                pending_step = None;
                current_step = target_step;
            } else if was_boosting {
                // Boost just ended: returning to normal is immediate, with
                // no separate debounce (spec §4.6).
                pending_step = None;
                current_step = target_step;
                self.bus.publish(BusEvent::EnvironmentStepChanged {
                    step_index: current_step,
                });
            } else if target_step != current_step {
                match pending_step {
                    Some((step, since)) if step == target_step => {
                        if since.elapsed() >= Duration::from_secs(env.delay_between_step_seconds) {
                            current_step = target_step;
                            pending_step = None;
                            self.bus.publish(BusEvent::EnvironmentStepChanged {
                                step_index: current_step,
                            });
                        }
                    }
                    _ => pending_step = Some((target_step, Instant::now())),
                }
            } else {
                pending_step = None;
            }
            was_boosting = boosting;

            let stagger = Duration::from_secs(env.stagger_delay_seconds);
            let ready_to_command = last_command_at
                .map(|t| t.elapsed() >= stagger)
                .unwrap_or(true);
            if !ready_to_command {
                continue;
            }

            let fan_changed = self
                .reconcile_fans(&env, current_step, &dp)
                .await;
            if fan_changed {
                last_command_at = Some(Instant::now());
                continue;
            }

            let humidity_for_pumps = avg_humidity.unwrap_or(env.humidity_min);
            let pump_changed = self
                .reconcile_pumps(&env, current_step, humidity_for_pumps, &dp)
                .await;
            if pump_changed {
                last_command_at = Some(Instant::now());
            }
        }
    }

    async fn average_temp(&self, env: &crate::config::EnvironmentConfig) -> Option<f64> {
        if !env.temp_sensor_order.is_empty() {
            let readings: Vec<f64> = env
                .temp_sensor_order
                .iter()
                .filter_map(|name| read_f64(&self.cache, name))
                .collect();
            if !readings.is_empty() {
                return Some(readings.iter().sum::<f64>() / readings.len() as f64);
            }
        }
        let names = self.registry.names_of_kind(EquipmentKind::TempSensor).await;
        let readings: Vec<f64> = names
            .iter()
            .filter_map(|n| read_f64(&self.cache, n))
            .collect();
        if readings.is_empty() {
            None
        } else {
            Some(readings.iter().sum::<f64>() / readings.len() as f64)
        }
    }

    async fn average_humidity(&self) -> Option<f64> {
        let names = self
            .registry
            .names_of_kind(EquipmentKind::HumiditySensor)
            .await;
        let readings: Vec<f64> = names
            .iter()
            .filter_map(|n| read_f64(&self.cache, n))
            .collect();
        if readings.is_empty() {
            None
        } else {
            Some(readings.iter().sum::<f64>() / readings.len() as f64)
        }
    }

    fn temp_delta(&self, env: &crate::config::EnvironmentConfig) -> Option<f64> {
        let front = env.temp_sensor_order.first()?;
        let back = env.temp_sensor_order.last()?;
        let front_temp = read_f64(&self.cache, front)?;
        let back_temp = read_f64(&self.cache, back)?;
        Some(back_temp - front_temp)
    }

    /// Returns `true` if a fan command was issued this cycle.
    async fn reconcile_fans(
        &self,
        env: &crate::config::EnvironmentConfig,
        current_step: usize,
        dp: &DataPointManager,
    ) -> bool {
        let scan = scan(&self.registry, &self.cache, EquipmentKind::Fan).await;
        let step = &env.steps[current_step];

        self.bus.publish(BusEvent::FailsafeStatusChanged {
            manual_running: scan.manual_running as u32,
            configured: env.failsafe_fans_count,
        });

        let target_extra = if scan.manual_running as u32 > env.failsafe_fans_count {
            let surplus = scan.manual_running as u32 - env.failsafe_fans_count;
            step.extra_fans.saturating_sub(surplus)
        } else {
            step.extra_fans
        } as usize;

        if scan.auto_on.len() < target_extra {
            if let Some(name) = scan.auto_off.choose(&mut rand::rng()) {
                return self.command_on(name, dp).await;
            }
        } else if scan.auto_on.len() > target_extra {
            if let Some(name) = scan.auto_on.choose(&mut rand::rng()) {
                return self.command_off(name, dp).await;
            }
        }
        false
    }

    async fn reconcile_pumps(
        &self,
        env: &crate::config::EnvironmentConfig,
        current_step: usize,
        humidity: f64,
        dp: &DataPointManager,
    ) -> bool {
        let target: Vec<String> = if humidity >= env.humidity_max {
            Vec::new()
        } else if humidity <= env.humidity_min {
            let mut all: Vec<String> = env
                .steps
                .iter()
                .flat_map(|s| s.pumps.iter().cloned())
                .collect();
            all.sort();
            all.dedup();
            all
        } else {
            env.steps[current_step].pumps.clone()
        };

        let mut target_auto = Vec::new();
        for name in &target {
            if self.registry.mode(name, &self.cache).await == Some(Mode::Auto) {
                target_auto.push(name.clone());
            }
        }

        let scan = scan(&self.registry, &self.cache, EquipmentKind::Pump).await;
        for name in &scan.auto_off {
            if target_auto.contains(name) {
                return self.command_on(name, dp).await;
            }
        }
        for name in &scan.auto_on {
            if !target_auto.contains(name) {
                return self.command_off(name, dp).await;
            }
        }
        false
    }

    async fn command_on(&self, name: &str, dp: &DataPointManager) -> bool {
        match self
            .registry
            .turn_on(name, &self.cache, dp, self.interlock.as_ref())
            .await
        {
            Ok(()) => {
                info!("environment controller: commanding {name} on");
                true
            }
            Err(err) => {
                info!("environment controller: {name} on rejected: {err}");
                false
            }
        }
    }

    async fn command_off(&self, name: &str, dp: &DataPointManager) -> bool {
        match self.registry.turn_off(name, dp).await {
            Ok(()) => {
                info!("environment controller: commanding {name} off");
                true
            }
            Err(err) => {
                info!("environment controller: {name} off rejected: {err}");
                false
            }
        }
    }

    async fn drive_all_off(&self, dp: &DataPointManager) {
        for kind in [EquipmentKind::Fan, EquipmentKind::Pump] {
            for name in self.registry.names_of_kind(kind).await {
                if self.registry.mode(&name, &self.cache).await == Some(Mode::Auto) {
                    let _ = self.registry.turn_off(&name, dp).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TempStep;

    fn steps() -> Vec<TempStep> {
        vec![
            TempStep { temp: 24.0, extra_fans: 0, pumps: vec![] },
            TempStep { temp: 26.0, extra_fans: 2, pumps: vec![] },
            TempStep { temp: 28.0, extra_fans: 4, pumps: vec!["pump_1".to_string()] },
        ]
    }

    #[test]
    fn step_for_picks_floor_below_first_threshold() {
        assert_eq!(step_for(&steps(), 10.0), 0);
    }

    #[test]
    fn step_for_picks_highest_satisfied_threshold() {
        assert_eq!(step_for(&steps(), 27.0), 1);
        assert_eq!(step_for(&steps(), 29.0), 2);
    }
}
