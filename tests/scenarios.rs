//! End-to-end scenarios wiring the public surface together: the data-point
//! manager and simulation bus feeding equipment controllers, the interlock
//! engine, and the feeding state machine, the way `supervisor::boot` wires
//! them in the real process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use coopctl::bus::{BusEvent, EventBus};
use coopctl::config::{
    ConfigSnapshot, ConfigStore, DataPoint, Equipment, EnvironmentConfig, EquipmentKind,
    InterlockRule, Port, PointDirection, PortProtocol, TempStep,
};
use coopctl::datapoint::DataPointManager;
use coopctl::environment::EnvironmentController;
use coopctl::equipment::feeding::FeedingPhase;
use coopctl::equipment::{EquipmentRegistry, StatusExtras};
use coopctl::error::{EquipmentError, PortError};
use coopctl::interlock::InterlockEngine;
use coopctl::transport::simulation::SimulationBus;
use tokio::sync::broadcast;

/// Drains the bus until the next cascade-stop event, ignoring the many
/// `DataPointUpdated` events the same pollers publish along the way.
async fn next_cascade_stop(events: &mut broadcast::Receiver<BusEvent>) -> BusEvent {
    loop {
        match events.recv().await.unwrap() {
            ev @ BusEvent::InterlockCascadeStop { .. } => return ev,
            _ => continue,
        }
    }
}

fn virtual_port(id: &str) -> Port {
    Port {
        id: id.to_string(),
        protocol: PortProtocol::Virtual,
        description: "simulated".to_string(),
        device_path: None,
        baud: None,
        parity: None,
        data_bits: None,
        stop_bits: None,
        ip_address: None,
        tcp_port: None,
        s7_rack: None,
        s7_slot: None,
    }
}

fn point(name: &str, port_id: &str, slave: u8, register: u16, direction: PointDirection) -> DataPoint {
    let (read_fn, write_fn) = match direction {
        PointDirection::Do => ("read_coil", "write_coil"),
        _ => ("read_digital_input", "write_coil"),
    };
    DataPoint {
        name: name.to_string(),
        direction,
        port_id: port_id.to_string(),
        slave_id: slave,
        register,
        channel: Some(1),
        read_fn: read_fn.to_string(),
        write_fn: write_fn.to_string(),
        value_type: None,
        byte_order: None,
        scale_factor: 1.0,
        offset: 0.0,
        unit: String::new(),
        min_valid: None,
        max_valid: None,
        log_interval: None,
        inverted: false,
        color_zones: Vec::new(),
        description: String::new(),
    }
}

fn equipment(name: &str, kind: EquipmentKind, tree: &str) -> Equipment {
    let mut equipment = Equipment {
        name: name.to_string(),
        title: name.to_string(),
        kind,
        data_point_tree: HashMap::new(),
        active: true,
        poll_interval_ms: None,
    };
    coopctl::config::attach_tree(&mut equipment, tree).unwrap();
    equipment
}

fn cached_bool(dp: &DataPointManager, name: &str) -> Option<bool> {
    match dp.cache().get(name)?.outcome {
        coopctl::datapoint::CacheOutcome::Ok(v) => v.as_bool(),
        coopctl::datapoint::CacheOutcome::Error(_) => None,
    }
}

/// An analog-input point, for temperature/humidity readings. `point` above
/// only covers digital directions.
fn analog_point(name: &str, port_id: &str, slave: u8, register: u16) -> DataPoint {
    DataPoint {
        name: name.to_string(),
        direction: PointDirection::Ai,
        port_id: port_id.to_string(),
        slave_id: slave,
        register,
        channel: None,
        read_fn: "read_analog_input".to_string(),
        write_fn: "write_analog_output".to_string(),
        value_type: None,
        byte_order: None,
        scale_factor: 1.0,
        offset: 0.0,
        unit: String::new(),
        min_valid: None,
        max_valid: None,
        log_interval: None,
        inverted: false,
        color_zones: Vec::new(),
        description: String::new(),
    }
}

/// Drains every currently queued bus event and returns the step indices
/// carried by any `EnvironmentStepChanged` events among them, in order.
fn drained_step_changes(events: &mut broadcast::Receiver<BusEvent>) -> Vec<usize> {
    let mut steps = Vec::new();
    loop {
        match events.try_recv() {
            Ok(BusEvent::EnvironmentStepChanged { step_index }) => steps.push(step_index),
            Ok(_) => continue,
            Err(_) => return steps,
        }
    }
}

/// S1 — a slave going offline surfaces as a timeout on the equipment whose
/// feedback lives there; reconnecting the port once the slave is back
/// online recovers it within one poll cycle.
#[tokio::test(start_paused = true)]
async fn slave_offline_then_reconnect_recovers() {
    let sim = SimulationBus::new();
    sim.set_offline(3, true);

    let snapshot = ConfigSnapshot {
        ports: vec![virtual_port("p1")],
        data_points: vec![point("fb1", "p1", 3, 0, PointDirection::Di)],
        equipment: vec![equipment(
            "fan_1",
            EquipmentKind::Fan,
            "on_off_coil: relay1\nrunning_feedback: fb1\nauto_manual: am1",
        )],
        interlock_rules: Vec::new(),
        environment: Default::default(),
        auxiliary: HashMap::new(),
    };
    let bus = EventBus::new();
    let config = ConfigStore::new(snapshot.clone(), bus.clone());
    let dp = Arc::new(DataPointManager::new(config, bus, Some(sim.clone())));
    dp.boot().await;
    let registry = EquipmentRegistry::build(&snapshot);

    tokio::time::advance(Duration::from_millis(600)).await;
    registry.refresh_all(&dp.cache(), &dp).await;
    let status = registry.status("fan_1", &dp.cache()).await.unwrap();
    assert_eq!(status.error, Some(EquipmentError::Port(PortError::Timeout)));

    // Stays timed out across further cycles, matching the skip-after-three
    // behavior verified at the port worker level.
    tokio::time::advance(Duration::from_secs(2)).await;
    registry.refresh_all(&dp.cache(), &dp).await;
    let status = registry.status("fan_1", &dp.cache()).await.unwrap();
    assert!(status.error.is_some());

    sim.set_offline(3, false);
    sim.set_input(3, 0, true);
    dp.reconnect_port("p1").await;

    tokio::time::advance(Duration::from_millis(600)).await;
    registry.refresh_all(&dp.cache(), &dp).await;
    let status = registry.status("fan_1", &dp.cache()).await.unwrap();
    assert_eq!(status.error, None);
    assert_eq!(status.running_feedback, Some(true));
}

/// S2 — an interlock cascade ripples from `dung_exit` through `dung_horz`
/// to `dung`, withdrawing each downstream coil in turn.
#[tokio::test(start_paused = true)]
async fn interlock_cascade_stops_downstream_equipment() {
    let snapshot = ConfigSnapshot {
        ports: vec![virtual_port("p1")],
        data_points: vec![
            point("fb_exit", "p1", 1, 0, PointDirection::Di),
            point("fb_horz", "p1", 1, 1, PointDirection::Di),
            point("fb_dung", "p1", 1, 2, PointDirection::Di),
            point("horz_coil", "p1", 1, 3, PointDirection::Do),
            point("dung_coil", "p1", 1, 4, PointDirection::Do),
        ],
        equipment: vec![
            equipment(
                "dung_exit",
                EquipmentKind::DungExit,
                "on_off_coil: exit_coil\nrunning_feedback: fb_exit",
            ),
            equipment(
                "dung_horz",
                EquipmentKind::DungHorz,
                "on_off_coil: horz_coil\nrunning_feedback: fb_horz",
            ),
            equipment(
                "dung",
                EquipmentKind::Dung,
                "on_off_coil: dung_coil\nrunning_feedback: fb_dung",
            ),
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
        environment: Default::default(),
        auxiliary: HashMap::new(),
    };
    let bus = EventBus::new();
    let config = ConfigStore::new(snapshot, bus.clone());
    let sim = SimulationBus::new();
    sim.set_input(1, 0, true);
    sim.set_input(1, 1, true);
    sim.set_input(1, 2, true);
    sim.set_coil(1, 3, true);
    sim.set_coil(1, 4, true);
    let dp = Arc::new(DataPointManager::new(config.clone(), bus.clone(), Some(sim.clone())));
    dp.boot().await;

    let interlock = InterlockEngine::new(config, dp.cache(), bus.clone());
    interlock.spawn_poll_loop(dp.clone());
    let mut events = bus.subscribe();

    // Give the data-point poller a cycle to observe the initial running state.
    tokio::time::advance(Duration::from_millis(600)).await;

    sim.set_input(1, 0, false);
    // Each hop needs: the poller to see the new feedback, then up to one
    // 500 ms interlock poll tick to act on it.
    tokio::time::advance(Duration::from_millis(600)).await;
    tokio::time::advance(Duration::from_millis(600)).await;

    let first = next_cascade_stop(&mut events).await;
    assert_eq!(
        first,
        BusEvent::InterlockCascadeStop {
            upstream: "dung_exit".to_string(),
            downstream: "dung_horz".to_string(),
        }
    );
    tokio::time::advance(Duration::from_millis(600)).await;
    assert_eq!(cached_bool(&dp, "horz_coil"), Some(false));

    // `dung_horz`'s own feedback drops in turn once its coil is withdrawn;
    // the simulator stands in for that physical delay here.
    sim.set_input(1, 1, false);
    tokio::time::advance(Duration::from_millis(600)).await;
    tokio::time::advance(Duration::from_millis(600)).await;

    let second = next_cascade_stop(&mut events).await;
    assert_eq!(
        second,
        BusEvent::InterlockCascadeStop {
            upstream: "dung_horz".to_string(),
            downstream: "dung".to_string(),
        }
    );
    tokio::time::advance(Duration::from_millis(600)).await;
    assert_eq!(cached_bool(&dp, "dung_coil"), Some(false));
}

/// S5 — a feeding move is accepted only with the bucket full, drives the
/// limit coils, and settles into `at_back` once the simulator reports the
/// limit switch; a repeat request is then rejected by the precondition.
#[tokio::test(start_paused = true)]
async fn feeding_move_to_back_requires_full_bucket_and_settles() {
    let snapshot = ConfigSnapshot {
        ports: vec![virtual_port("p1")],
        data_points: vec![
            point("front_limit", "p1", 1, 0, PointDirection::Di),
            point("back_limit", "p1", 1, 1, PointDirection::Di),
            point("pulse_sensor", "p1", 1, 2, PointDirection::Di),
            point("auto_manual", "p1", 1, 4, PointDirection::Di),
            point("to_back_limit", "p1", 1, 5, PointDirection::Do),
            point("to_front_limit", "p1", 1, 6, PointDirection::Do),
            point("fwd_feedback", "p1", 1, 7, PointDirection::Di),
            point("rev_feedback", "p1", 1, 8, PointDirection::Di),
        ],
        equipment: vec![equipment(
            "feeder_1",
            EquipmentKind::Feeding,
            "to_back_limit: to_back_limit\nto_front_limit: to_front_limit\n\
             fwd_feedback: fwd_feedback\nrev_feedback: rev_feedback\n\
             front_limit: front_limit\nback_limit: back_limit\n\
             pulse_sensor: pulse_sensor\nauto_manual: auto_manual\nfull_switch: full_switch",
        )],
        interlock_rules: Vec::new(),
        environment: Default::default(),
        auxiliary: HashMap::new(),
    };
    let bus = EventBus::new();
    let config = ConfigStore::new(snapshot.clone(), bus.clone());
    let sim = SimulationBus::new();
    sim.set_input(1, 0, true); // front_limit = 1
    sim.set_input(1, 1, false); // back_limit = 0
    sim.set_input(1, 4, true); // auto_manual = auto
    let dp = Arc::new(DataPointManager::new(config, bus, Some(sim.clone())));
    dp.boot().await;
    let registry = EquipmentRegistry::build(&snapshot);

    tokio::time::advance(Duration::from_millis(600)).await;

    let rejected = registry
        .move_feeder_to_back("feeder_1", &dp.cache(), &dp, false)
        .await;
    assert!(rejected.is_err());

    let accepted = registry
        .move_feeder_to_back("feeder_1", &dp.cache(), &dp, true)
        .await;
    assert!(accepted.is_ok());

    tokio::time::advance(Duration::from_millis(600)).await;
    assert_eq!(cached_bool(&dp, "to_back_limit"), Some(true));
    assert_eq!(cached_bool(&dp, "to_front_limit"), Some(false));

    // Simulator: the carriage leaves the front limit then arrives at back.
    sim.set_input(1, 0, false);
    tokio::time::advance(Duration::from_millis(600)).await;
    sim.set_input(1, 1, true);
    tokio::time::advance(Duration::from_millis(600)).await;

    registry.refresh_all(&dp.cache(), &dp).await;
    let status = registry.status("feeder_1", &dp.cache()).await.unwrap();
    match status.extras {
        StatusExtras::Feeding { phase, .. } => assert_eq!(phase, FeedingPhase::AtBack),
        other => panic!("expected feeding extras, got {other:?}"),
    }

    let repeat = registry
        .move_feeder_to_back("feeder_1", &dp.cache(), &dp, true)
        .await;
    assert!(repeat.is_err());
}

/// S3 — a sustained high reading only reaches the top step once it has held
/// for `delay_between_step_seconds`; the fan/pump staircase then ramps up
/// one actuator per stagger window rather than slamming every auto actuator
/// on at once.
#[tokio::test(start_paused = true)]
async fn environment_staircase_commits_after_dwell_and_ramps_staggered() {
    let steps = vec![
        TempStep { temp: 24.0, extra_fans: 0, pumps: vec![] },
        TempStep { temp: 26.0, extra_fans: 1, pumps: vec![] },
        TempStep { temp: 28.0, extra_fans: 2, pumps: vec!["pump_1".to_string()] },
        TempStep {
            temp: 30.0,
            extra_fans: 3,
            pumps: vec!["pump_1".to_string(), "pump_2".to_string()],
        },
    ];
    let environment = EnvironmentConfig {
        failsafe_fans_count: 0,
        steps,
        humidity_min: 10.0,
        humidity_max: 90.0,
        stagger_delay_seconds: 1,
        delay_between_step_seconds: 5,
        poll_interval_seconds: 1,
        temp_sensor_order: vec!["temp_1".to_string()],
        max_temp_delta: 100.0,
        enabled: true,
    };

    let fan_tree = |n: u8| {
        format!("on_off_coil: coil_a{n}\nrunning_feedback: fb_a{n}\nauto_manual: am_a{n}")
    };
    let pump_tree = |n: u8| {
        format!("on_off_coil: coil_p{n}\nrunning_feedback: fb_p{n}\nauto_manual: am_p{n}")
    };

    let snapshot = ConfigSnapshot {
        ports: vec![virtual_port("p1")],
        data_points: vec![
            analog_point("temp_1", "p1", 1, 0),
            analog_point("humidity_1", "p1", 1, 1),
            point("coil_a1", "p1", 1, 2, PointDirection::Do),
            point("coil_a2", "p1", 1, 3, PointDirection::Do),
            point("coil_a3", "p1", 1, 4, PointDirection::Do),
            point("am_a1", "p1", 1, 5, PointDirection::Di),
            point("am_a2", "p1", 1, 6, PointDirection::Di),
            point("am_a3", "p1", 1, 7, PointDirection::Di),
            point("coil_p1", "p1", 1, 8, PointDirection::Do),
            point("coil_p2", "p1", 1, 9, PointDirection::Do),
            point("am_p1", "p1", 1, 10, PointDirection::Di),
            point("am_p2", "p1", 1, 11, PointDirection::Di),
        ],
        equipment: vec![
            equipment("fan_a1", EquipmentKind::Fan, &fan_tree(1)),
            equipment("fan_a2", EquipmentKind::Fan, &fan_tree(2)),
            equipment("fan_a3", EquipmentKind::Fan, &fan_tree(3)),
            equipment("pump_1", EquipmentKind::Pump, &pump_tree(1)),
            equipment("pump_2", EquipmentKind::Pump, &pump_tree(2)),
            equipment("humidity_1", EquipmentKind::HumiditySensor, ""),
        ],
        interlock_rules: Vec::new(),
        environment,
        auxiliary: HashMap::new(),
    };
    let bus = EventBus::new();
    let config = ConfigStore::new(snapshot.clone(), bus.clone());
    let sim = SimulationBus::new();
    sim.set_register(1, 0, 31); // temp_1 = 31, straight into the top step
    sim.set_register(1, 1, 50); // humidity_1 = 50, strictly between min/max
    for reg in [5u16, 6, 7] {
        sim.set_input(1, reg, true); // auto mode for the three fans
    }
    for reg in [10u16, 11] {
        sim.set_input(1, reg, true); // auto mode for both pumps
    }
    let dp = Arc::new(DataPointManager::new(config.clone(), bus.clone(), Some(sim.clone())));
    dp.boot().await;

    let registry = EquipmentRegistry::build(&snapshot);
    let interlock = InterlockEngine::new(config.clone(), dp.cache(), bus.clone());
    let mut events = bus.subscribe();
    let env = EnvironmentController::new(
        config,
        dp.cache(),
        registry.clone(),
        bus.clone(),
        interlock,
    );
    env.spawn(dp.clone());

    // Populate the first reading of every data point.
    tokio::time::advance(Duration::from_millis(200)).await;

    let fan_names = ["fan_a1", "fan_a2", "fan_a3"];
    let count_fans_on = || async {
        let mut n = 0;
        for name in fan_names {
            if registry
                .status(name, &dp.cache())
                .await
                .unwrap()
                .commanded_on
            {
                n += 1;
            }
        }
        n
    };

    // Well within the 5 s dwell window: the target step has been sighted but
    // not yet held long enough to commit, so nothing has been switched on.
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(count_fans_on().await, 0);
    assert!(drained_step_changes(&mut events).is_empty());

    // Past the dwell window: the step commits and the ramp begins. Give it
    // several stagger windows to finish bringing every fan and pump on.
    tokio::time::advance(Duration::from_secs(8)).await;

    let committed = drained_step_changes(&mut events);
    assert_eq!(committed, vec![3]);
    assert_eq!(count_fans_on().await, 3);
    assert!(
        registry
            .status("pump_1", &dp.cache())
            .await
            .unwrap()
            .commanded_on
    );
    assert!(
        registry
            .status("pump_2", &dp.cache())
            .await
            .unwrap()
            .commanded_on
    );
}

/// S4 — a front/back temperature spread past `max_temp_delta` jumps straight
/// to the top step, bypassing the dwell that gates every other transition;
/// once the spread narrows, the controller reverts to the temp-indicated
/// step immediately, with no debounce of its own.
#[tokio::test(start_paused = true)]
async fn environment_delta_boost_bypasses_dwell_then_reverts_immediately() {
    let steps = vec![
        TempStep { temp: 24.0, extra_fans: 0, pumps: vec![] },
        TempStep { temp: 26.0, extra_fans: 1, pumps: vec![] },
        TempStep { temp: 28.0, extra_fans: 2, pumps: vec![] },
        TempStep { temp: 30.0, extra_fans: 3, pumps: vec![] },
    ];
    let environment = EnvironmentConfig {
        failsafe_fans_count: 0,
        steps,
        humidity_min: 0.0,
        humidity_max: 100.0,
        stagger_delay_seconds: 1,
        delay_between_step_seconds: 4,
        poll_interval_seconds: 1,
        temp_sensor_order: vec!["temp_front".to_string(), "temp_back".to_string()],
        max_temp_delta: 5.0,
        enabled: true,
    };

    let fan_tree =
        |n: u8| format!("on_off_coil: coil_{n}\nrunning_feedback: fb_{n}\nauto_manual: am_{n}");

    let snapshot = ConfigSnapshot {
        ports: vec![virtual_port("p1")],
        data_points: vec![
            analog_point("temp_front", "p1", 1, 0),
            analog_point("temp_back", "p1", 1, 1),
            point("coil_1", "p1", 1, 2, PointDirection::Do),
            point("coil_2", "p1", 1, 3, PointDirection::Do),
            point("coil_3", "p1", 1, 4, PointDirection::Do),
            point("am_1", "p1", 1, 5, PointDirection::Di),
            point("am_2", "p1", 1, 6, PointDirection::Di),
            point("am_3", "p1", 1, 7, PointDirection::Di),
        ],
        equipment: vec![
            equipment("fan_1", EquipmentKind::Fan, &fan_tree(1)),
            equipment("fan_2", EquipmentKind::Fan, &fan_tree(2)),
            equipment("fan_3", EquipmentKind::Fan, &fan_tree(3)),
        ],
        interlock_rules: Vec::new(),
        environment,
        auxiliary: HashMap::new(),
    };
    let bus = EventBus::new();
    let config = ConfigStore::new(snapshot.clone(), bus.clone());
    let sim = SimulationBus::new();
    sim.set_register(1, 0, 25); // temp_front = 25
    sim.set_register(1, 1, 31); // temp_back = 31, delta 6 > max_temp_delta
    for reg in [5u16, 6, 7] {
        sim.set_input(1, reg, true); // all three fans in auto
    }
    let dp = Arc::new(DataPointManager::new(config.clone(), bus.clone(), Some(sim.clone())));
    dp.boot().await;

    let registry = EquipmentRegistry::build(&snapshot);
    let interlock = InterlockEngine::new(config.clone(), dp.cache(), bus.clone());
    let mut events = bus.subscribe();
    let env = EnvironmentController::new(
        config,
        dp.cache(),
        registry.clone(),
        bus.clone(),
        interlock,
    );
    env.spawn(dp.clone());

    let fan_names = ["fan_1", "fan_2", "fan_3"];
    let count_fans_on = || async {
        let mut n = 0;
        for name in fan_names {
            if registry
                .status(name, &dp.cache())
                .await
                .unwrap()
                .commanded_on
            {
                n += 1;
            }
        }
        n
    };

    tokio::time::advance(Duration::from_millis(200)).await;

    // The boost path reassigns `current_step` straight to the top on the very
    // first cycle, long before the 4 s dwell could possibly have elapsed:
    // a fan is already moving after just two cycles.
    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(count_fans_on().await >= 1);

    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(count_fans_on().await, 3);

    // Narrow the spread: delta 4 stays under max_temp_delta, and the
    // temp-indicated step (27 average) drops to index 1. `temp_back` only
    // gets re-polled on its own 5 s cadence, so give it room to land.
    sim.set_register(1, 1, 29);
    tokio::time::advance(Duration::from_secs(5)).await;

    // One more cycle to notice the new reading: ending the boost reverts
    // straight to step 1 with no dwell of its own, then ramps fans back
    // down one per stagger window.
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(drained_step_changes(&mut events), vec![1]);

    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(count_fans_on().await, 1);
}

/// S6 — a `fan`'s data-point tree with every required role key resolves and
/// validates; dropping `auto_manual` is caught by `ConfigSnapshot::validate`
/// rather than `attach_tree` itself, since the tree grammar has no notion of
/// which keys a kind requires. A list-valued tree entry on an
/// `average_sensor` round-trips through `RoleRefs` as the expected elements.
#[test]
fn data_point_tree_parse_and_required_key_validation() {
    let fan = equipment(
        "fan_1",
        EquipmentKind::Fan,
        "on_off_coil: relay1\nrunning_feedback: fb1\nauto_manual: am1",
    );
    let mut snapshot = ConfigSnapshot {
        equipment: vec![fan],
        ..ConfigSnapshot::default()
    };
    assert!(snapshot.validate().is_ok());

    let mut incomplete = Equipment {
        name: "fan_2".to_string(),
        title: "fan_2".to_string(),
        kind: EquipmentKind::Fan,
        data_point_tree: HashMap::new(),
        active: true,
        poll_interval_ms: None,
    };
    coopctl::config::attach_tree(&mut incomplete, "on_off_coil: relay2\nrunning_feedback: fb2").unwrap();
    snapshot.equipment = vec![incomplete];
    match snapshot.validate() {
        Err(coopctl::error::ConfigError::MissingRequiredKey { equipment, key, .. }) => {
            assert_eq!(equipment, "fan_2");
            assert_eq!(key, "auto_manual");
        }
        other => panic!("expected MissingRequiredKey citing auto_manual, got {other:?}"),
    }

    let sensor = equipment(
        "temp_avg",
        EquipmentKind::AverageSensor,
        "temp_sensors: t1, t2, t3",
    );
    let roles = coopctl::equipment::RoleRefs::from_tree(&sensor.data_point_tree);
    assert_eq!(
        roles.role_list("temp_sensors"),
        vec!["t1".to_string(), "t2".to_string(), "t3".to_string()]
    );
}
