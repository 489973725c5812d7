//! Boot/teardown ordering (spec §2, §6 "Process lifecycle").
//!
//! Boot wires components leaf-first: configuration store, then the
//! data-point manager and its port workers, then equipment controllers,
//! then the interlock engine, environment controller, and schedulers.
//! Shutdown reverses that order so nothing is left issuing commands to
//! a collaborator that has already torn down.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::sync::Notify;

use crate::bus::EventBus;
use crate::config::ConfigStore;
use crate::datapoint::DataPointManager;
use crate::environment::EnvironmentController;
use crate::equipment::EquipmentRegistry;
use crate::interlock::InterlockEngine;
use crate::scheduler::Scheduler;
use crate::transport::simulation::SimulationBus;

/// Refresh cadence for `EquipmentRegistry::refresh_all` (spec §4.4: feeding
/// phase transitions and actuator debounce timers need a live, recurring
/// caller). Matches the interlock engine's 500 ms cascade-stop poll.
const EQUIPMENT_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Owns every long-lived component and the order in which they're stopped.
pub struct Supervisor {
    pub config: ConfigStore,
    pub bus: EventBus,
    pub data_points: Arc<DataPointManager>,
    pub equipment: EquipmentRegistry,
    pub interlock: Arc<InterlockEngine>,
    environment_shutdown: Box<dyn Fn() + Send + Sync>,
    scheduler_shutdown: Box<dyn Fn() + Send + Sync>,
    equipment_refresh_shutdown: Box<dyn Fn() + Send + Sync>,
}

impl Supervisor {
    /// Boots every component against `config`, publishing on `bus`. When
    /// `simulate` is set, ports configured as `virtual` share one in-memory
    /// bus instead of opening real transports.
    pub async fn boot(config: ConfigStore, bus: EventBus, simulate: bool) -> Self {
        let simulation_bus = simulate.then(SimulationBus::new);

        let data_points = Arc::new(DataPointManager::new(
            config.clone(),
            bus.clone(),
            simulation_bus,
        ));
        data_points.boot().await;

        let snapshot = config.snapshot();
        let equipment = EquipmentRegistry::build(&snapshot);

        let interlock = InterlockEngine::new(config.clone(), data_points.cache(), bus.clone());
        interlock.spawn_poll_loop(data_points.clone());

        let environment = EnvironmentController::new(
            config.clone(),
            data_points.cache(),
            equipment.clone(),
            bus.clone(),
            interlock.clone(),
        );
        let environment_shutdown = environment.shutdown_handle();
        environment.spawn(data_points.clone());

        let scheduler = Scheduler::new(
            config.clone(),
            data_points.cache(),
            equipment.clone(),
            interlock.clone(),
        );
        let scheduler_shutdown = scheduler.shutdown_handle();
        scheduler.spawn(data_points.clone());

        let equipment_refresh_notify = Arc::new(Notify::new());
        let equipment_refresh_shutdown: Box<dyn Fn() + Send + Sync> = {
            let notify = equipment_refresh_notify.clone();
            Box::new(move || notify.notify_waiters())
        };
        spawn_equipment_refresh_loop(equipment.clone(), data_points.clone(), equipment_refresh_notify);

        info!("supervisor: boot complete");

        Self {
            config,
            bus,
            data_points,
            equipment,
            interlock,
            environment_shutdown,
            scheduler_shutdown,
            equipment_refresh_shutdown,
        }
    }

    /// Supervised shutdown order (spec §6): schedulers, then environment
    /// controller and interlock engine, then the data-point manager (which
    /// leaves port workers to close their transports once every handle is
    /// dropped). Equipment controllers hold no resources of their own and
    /// simply stop being driven once their callers above them exit.
    pub fn shutdown(&self) {
        info!("supervisor: shutdown starting");
        (self.scheduler_shutdown)();
        (self.environment_shutdown)();
        (self.equipment_refresh_shutdown)();
        self.interlock.shutdown();
        self.data_points.shutdown();
        info!("supervisor: shutdown signaled");
    }
}

/// Periodically re-derives every equipment controller's debounce/position
/// state from the latest cache readings (spec §4.4, §4.4.1): without a
/// recurring caller, a feeding equipment's phase would only ever move on an
/// explicit `move_to_back`/`move_to_front`/`reset` call, and an actuator's
/// `off_but_running` timer would never start.
fn spawn_equipment_refresh_loop(
    equipment: EquipmentRegistry,
    dp: Arc<DataPointManager>,
    shutdown: Arc<Notify>,
) {
    tokio::spawn(async move {
        loop {
            let sleep = tokio::time::sleep(EQUIPMENT_REFRESH_INTERVAL);
            tokio::select! {
                _ = shutdown.notified() => return,
                _ = sleep => {}
            }
            equipment.refresh_all(&dp.cache(), &dp).await;
        }
    });
}
