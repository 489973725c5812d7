//! Scheduler framework (C7, spec §4.7).
//!
//! Schedule *tables* are an external collaborator's concern (spec §1): this
//! crate neither edits nor persists them. What lives here is the uniform
//! tick-loop *mechanism* that reads whatever rows the auxiliary config
//! carries and turns them into `turn_on`/`turn_off`/`move_to_back`/
//! `move_to_front` calls, gated on the target equipment being in AUTO mode.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{Local, NaiveTime, Timelike};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::config::ConfigStore;
use crate::datapoint::{Cache, CacheOutcome, DataPointManager};
use crate::equipment::{EquipmentRegistry, Mode};
use crate::interlock::InterlockEngine;

fn read_bool(cache: &Cache, name: &str) -> Option<bool> {
    match cache.get(name)?.outcome {
        CacheOutcome::Ok(v) => v.as_bool(),
        CacheOutcome::Error(_) => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightSchedule {
    pub equipment: String,
    pub on_time: NaiveTime,
    pub off_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EggSchedule {
    pub equipment: String,
    pub start_time: NaiveTime,
    pub stop_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedingSchedule {
    pub equipment: String,
    pub to_back_time: NaiveTime,
    pub to_front_time: NaiveTime,
    /// Data point name for the feed-in bucket's full switch, consulted
    /// before issuing `move_to_back` (spec §4.4.1 precondition).
    #[serde(default)]
    pub full_switch: Option<String>,
}

fn rows<T: for<'de> Deserialize<'de>>(config: &ConfigStore, key: &str) -> Vec<T> {
    let snapshot = config.snapshot();
    match snapshot.auxiliary.get(key) {
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|err| {
            warn!("scheduler: malformed {key} in auxiliary config: {err}");
            Vec::new()
        }),
        None => Vec::new(),
    }
}

/// `on_time > off_time` means the window crosses midnight (spec §4.7).
fn within_window(now: NaiveTime, on: NaiveTime, off: NaiveTime) -> bool {
    if on <= off {
        now >= on && now < off
    } else {
        now >= on || now < off
    }
}

pub struct Scheduler {
    config: ConfigStore,
    cache: Cache,
    registry: EquipmentRegistry,
    interlock: std::sync::Arc<InterlockEngine>,
    shutdown: std::sync::Arc<Notify>,
}

impl Scheduler {
    pub fn new(
        config: ConfigStore,
        cache: Cache,
        registry: EquipmentRegistry,
        interlock: std::sync::Arc<InterlockEngine>,
    ) -> Self {
        Self {
            config,
            cache,
            registry,
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
        let mut last_light_state: HashMap<String, bool> = HashMap::new();
        let mut last_egg_state: HashMap<String, bool> = HashMap::new();
        let mut last_feeding_minute: HashMap<String, u32> = HashMap::new();

        loop {
            let sleep = tokio::time::sleep(Duration::from_secs(1));
            tokio::select! {
                _ = self.shutdown.notified() => return,
                _ = sleep => {}
            }

            let now = Local::now().time();

            for row in rows::<LightSchedule>(&self.config, "light_schedules") {
                self.drive_window(
                    &row.equipment,
                    within_window(now, row.on_time, row.off_time),
                    &mut last_light_state,
                    &dp,
                )
                .await;
            }

            for row in rows::<EggSchedule>(&self.config, "egg_schedules") {
                self.drive_window(
                    &row.equipment,
                    within_window(now, row.start_time, row.stop_time),
                    &mut last_egg_state,
                    &dp,
                )
                .await;
            }

            for row in rows::<FeedingSchedule>(&self.config, "feeding_schedules") {
                self.drive_feeding(&row, now, &mut last_feeding_minute, &dp)
                    .await;
            }
        }
    }

    async fn drive_window(
        &self,
        equipment: &str,
        should_be_on: bool,
        last_state: &mut HashMap<String, bool>,
        dp: &DataPointManager,
    ) {
        if self.registry.mode(equipment, &self.cache).await != Some(Mode::Auto) {
            return;
        }
        if last_state.get(equipment).copied() == Some(should_be_on) {
            return;
        }
        let result = if should_be_on {
            self.registry
                .turn_on(equipment, &self.cache, dp, self.interlock.as_ref())
                .await
        } else {
            self.registry.turn_off(equipment, dp).await
        };
        match result {
            Ok(()) => {
                last_state.insert(equipment.to_string(), should_be_on);
            }
            Err(err) => warn!("scheduler: {equipment} command rejected: {err}"),
        }
    }

    async fn drive_feeding(
        &self,
        row: &FeedingSchedule,
        now: NaiveTime,
        last_minute: &mut HashMap<String, u32>,
        dp: &DataPointManager,
    ) {
        if self.registry.mode(&row.equipment, &self.cache).await != Some(Mode::Auto) {
            return;
        }
        let minute_of_day = now.num_seconds_from_midnight() / 60;
        let key_back = format!("{}_back", row.equipment);
        let key_front = format!("{}_front", row.equipment);

        if now.with_second(0).unwrap() == row.to_back_time.with_second(0).unwrap()
            && last_minute.get(&key_back).copied() != Some(minute_of_day)
        {
            last_minute.insert(key_back, minute_of_day);
            let bucket_full = match &row.full_switch {
                Some(name) => read_bool(&self.cache, name).unwrap_or(false),
                None => true,
            };
            if let Err(err) = self
                .registry
                .move_feeder_to_back(&row.equipment, &self.cache, dp, bucket_full)
                .await
            {
                warn!("scheduler: {} move_to_back rejected: {err}", row.equipment);
            }
        }

        if now.with_second(0).unwrap() == row.to_front_time.with_second(0).unwrap()
            && last_minute.get(&key_front).copied() != Some(minute_of_day)
        {
            last_minute.insert(key_front, minute_of_day);
            if let Err(err) = self
                .registry
                .move_feeder_to_front(&row.equipment, &self.cache, dp)
                .await
            {
                warn!("scheduler: {} move_to_front rejected: {err}", row.equipment);
            }
        }
    }
}
