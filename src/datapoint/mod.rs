//! Data-point manager (C3, spec §4.3).
//!
//! Polls every configured data point on the cadence of the equipment that
//! references it, coalesced per port so one port worker round-robins its
//! pollers. Lookups are lock-free-ish reads of a `parking_lot::RwLock`
//! cache, matching the ∼1000:1 read:write ratio design note (spec §9).

mod convert;

pub use convert::{convert_analog, convert_digital};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::bus::{BusEvent, EventBus};
use crate::config::{ConfigStore, DataPoint, PointDirection};
use crate::error::PortError;
use crate::port_worker::{self, PortHandle};
use crate::transport::{simulation::SimulationBus, Address, RawValue, TransportAdapter, Verb};

/// A converted value as stored in the cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
}

impl Value {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(b),
            Value::Number(n) => Some(n != 0.0),
        }
    }

    pub fn as_f64(self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n),
            Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
        }
    }
}

/// The outcome of the most recent poll of a data point.
#[derive(Debug, Clone)]
pub enum CacheOutcome {
    Ok(Value),
    Error(PortError),
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub outcome: CacheOutcome,
    pub updated_at: DateTime<Utc>,
}

/// Process-wide cache of the latest converted value per data point name.
#[derive(Clone, Default)]
pub struct Cache {
    inner: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl Cache {
    pub fn get(&self, name: &str) -> Option<CacheEntry> {
        self.inner.read().get(name).cloned()
    }

    pub(crate) fn set(&self, name: &str, entry: CacheEntry) -> bool {
        let mut guard = self.inner.write();
        let changed = match guard.get(name) {
            None => true,
            Some(prev) => !outcomes_equal(&prev.outcome, &entry.outcome),
        };
        guard.insert(name.to_string(), entry);
        changed
    }
}

fn outcomes_equal(a: &CacheOutcome, b: &CacheOutcome) -> bool {
    match (a, b) {
        (CacheOutcome::Ok(x), CacheOutcome::Ok(y)) => x == y,
        (CacheOutcome::Error(x), CacheOutcome::Error(y)) => x == y,
        _ => false,
    }
}

/// Connectivity status of a configured port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStatus {
    Connected,
    Disconnected,
}

/// Owns every port worker and the shared cache; the only writer of cache
/// entries (spec §3 ownership rule).
pub struct DataPointManager {
    config: ConfigStore,
    cache: Cache,
    bus: EventBus,
    ports: Arc<RwLock<HashMap<String, PortHandle>>>,
    port_status: Arc<RwLock<HashMap<String, PortStatus>>>,
    points: Arc<RwLock<HashMap<String, DataPoint>>>,
    shutdown: Arc<Notify>,
    /// Present only in simulation/dry-run boots; `None` ports use real adapters.
    simulation_bus: Option<SimulationBus>,
}

impl DataPointManager {
    pub fn new(config: ConfigStore, bus: EventBus, simulation_bus: Option<SimulationBus>) -> Self {
        Self {
            config,
            cache: Cache::default(),
            bus,
            ports: Arc::new(RwLock::new(HashMap::new())),
            port_status: Arc::new(RwLock::new(HashMap::new())),
            points: Arc::new(RwLock::new(HashMap::new())),
            shutdown: Arc::new(Notify::new()),
            simulation_bus,
        }
    }

    pub fn cache(&self) -> Cache {
        self.cache.clone()
    }

    pub fn port_status(&self, port_id: &str) -> Option<PortStatus> {
        self.port_status.read().get(port_id).copied()
    }

    /// Tears down and reopens a port's transport, clearing its slave skip
    /// set (spec §4.3: "expose `reconnect_port(id)`... calls `reset` on
    /// the worker").
    pub async fn reconnect_port(&self, port_id: &str) {
        let handle = self.ports.read().get(port_id).cloned();
        if let Some(handle) = handle {
            handle.reset().await;
        }
    }

    /// Stops every port poller. Port workers themselves are torn down by
    /// the supervisor, which owns the `PortHandle`s' lifetime.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Writes a command value to the data point's `write_fn` verb, applying
    /// digital inversion or engineering-to-raw conversion as configured.
    pub async fn write(&self, name: &str, value: Value) -> Result<(), PortError> {
        let point = self
            .points
            .read()
            .get(name)
            .cloned()
            .ok_or(PortError::UnknownCmd)?;
        let handle = self
            .ports
            .read()
            .get(&point.port_id)
            .cloned()
            .ok_or(PortError::Disconnected)?;
        let verb = Verb::parse(&point.write_fn).ok_or(PortError::UnknownCmd)?;
        let address = Address {
            slave_id: point.slave_id,
            register: point.register,
            channel: point.channel,
        };
        let raw = match value {
            Value::Bool(b) => RawValue::Bit(convert_digital(b, point.inverted)),
            Value::Number(n) => convert::encode_analog(&point, n),
        };
        handle.write(verb, address, raw).await
    }

    /// Opens one transport connection and port worker per configured port,
    /// then spawns one poller task per port.
    pub async fn boot(&self) {
        let snapshot = self.config.snapshot();
        {
            let mut points = self.points.write();
            for point in &snapshot.data_points {
                points.insert(point.name.clone(), point.clone());
            }
        }
        for port in &snapshot.ports {
            let adapter: Box<dyn TransportAdapter> = match self.open_adapter(port).await {
                Ok(adapter) => {
                    self.port_status
                        .write()
                        .insert(port.id.clone(), PortStatus::Connected);
                    adapter
                }
                Err(_) => {
                    self.port_status
                        .write()
                        .insert(port.id.clone(), PortStatus::Disconnected);
                    continue;
                }
            };
            let handle = port_worker::spawn(port.id.clone(), adapter);
            self.ports.write().insert(port.id.clone(), handle.clone());
        }

        let points_by_port = self.points_by_port();
        for (port_id, points) in points_by_port {
            let Some(handle) = self.ports.read().get(&port_id).cloned() else {
                continue;
            };
            self.spawn_poller(port_id, handle, points);
        }
    }

    async fn open_adapter(
        &self,
        port: &crate::config::Port,
    ) -> Result<Box<dyn TransportAdapter>, PortError> {
        use crate::config::PortProtocol;
        match port.protocol {
            PortProtocol::Virtual => {
                let bus = self.simulation_bus.clone().unwrap_or_default();
                Ok(Box::new(crate::transport::simulation::SimulationAdapter::new(bus)))
            }
            PortProtocol::ModbusRtu => {
                let device = port.device_path.as_deref().ok_or(PortError::Disconnected)?;
                let adapter = crate::transport::modbus_rtu::ModbusRtuAdapter::open(
                    device,
                    port.baud.unwrap_or(9600),
                    port.parity.unwrap_or(crate::config::Parity::Even),
                    port.data_bits.unwrap_or(8),
                    port.stop_bits.unwrap_or(1),
                )?;
                Ok(Box::new(adapter))
            }
            PortProtocol::ModbusTcp => {
                let ip = port.ip_address.as_deref().ok_or(PortError::Disconnected)?;
                let adapter = crate::transport::modbus_tcp::ModbusTcpAdapter::connect(
                    ip,
                    port.tcp_port.unwrap_or(502),
                )
                .await?;
                Ok(Box::new(adapter))
            }
            PortProtocol::RtuOverTcp => {
                let ip = port.ip_address.as_deref().ok_or(PortError::Disconnected)?;
                let adapter = crate::transport::rtu_over_tcp::RtuOverTcpAdapter::connect(
                    ip,
                    port.tcp_port.unwrap_or(502),
                )
                .await?;
                Ok(Box::new(adapter))
            }
            PortProtocol::S7 => {
                let ip = port.ip_address.as_deref().ok_or(PortError::Disconnected)?;
                let adapter = crate::transport::s7::S7Adapter::connect(
                    ip,
                    port.tcp_port.unwrap_or(102),
                    port.s7_rack.unwrap_or(0),
                    port.s7_slot.unwrap_or(1),
                )
                .await?;
                Ok(Box::new(adapter))
            }
        }
    }

    fn points_by_port(&self) -> HashMap<String, Vec<(DataPoint, u32)>> {
        let snapshot = self.config.snapshot();
        let mut interval_by_point: HashMap<String, u32> = HashMap::new();
        for equipment in &snapshot.equipment {
            let interval = equipment.effective_poll_interval_ms();
            for value in equipment.data_point_tree.values() {
                for name in value.as_list() {
                    interval_by_point
                        .entry(name)
                        .and_modify(|v| *v = (*v).min(interval))
                        .or_insert(interval);
                }
            }
        }

        let mut grouped: HashMap<String, Vec<(DataPoint, u32)>> = HashMap::new();
        for point in &snapshot.data_points {
            let interval = interval_by_point
                .get(point.name.as_str())
                .copied()
                .unwrap_or(5000);
            grouped
                .entry(point.port_id.clone())
                .or_default()
                .push((point.clone(), interval));
        }
        grouped
    }

    fn spawn_poller(&self, port_id: String, handle: PortHandle, points: Vec<(DataPoint, u32)>) {
        let cache = self.cache.clone();
        let bus = self.bus.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut due: Vec<Instant> = points.iter().map(|_| Instant::now()).collect();
            info!("port {port_id}: polling {} data points", points.len());

            loop {
                let sleep = tokio::time::sleep(Duration::from_millis(50));
                tokio::select! {
                    _ = shutdown.notified() => return,
                    _ = sleep => {}
                }

                let now = Instant::now();
                for (idx, (point, interval_ms)) in points.iter().enumerate() {
                    if due[idx] > now {
                        continue;
                    }
                    due[idx] = now + Duration::from_millis(*interval_ms as u64);
                    poll_one(&handle, &cache, &bus, point).await;
                }
            }
        });
    }
}

async fn poll_one(handle: &PortHandle, cache: &Cache, bus: &EventBus, point: &DataPoint) {
    let Some(verb) = Verb::parse(&point.read_fn) else {
        debug!("data point {}: unknown read_fn {:?}", point.name, point.read_fn);
        return;
    };
    let address = Address {
        slave_id: point.slave_id,
        register: point.register,
        channel: point.channel,
    };
    let span = point
        .value_type
        .map(|t| t.register_span())
        .unwrap_or(1);

    let outcome = match handle.read(verb, address, span).await {
        Ok(raw) => match point.direction {
            PointDirection::Di | PointDirection::Do => {
                let bit = match raw {
                    RawValue::Bit(b) => b,
                    RawValue::Registers(words, _) => words[0] != 0,
                };
                CacheOutcome::Ok(Value::Bool(convert_digital(bit, point.inverted)))
            }
            PointDirection::Ai | PointDirection::Ao => {
                match convert_analog(point, raw.registers()) {
                    Ok(value) => CacheOutcome::Ok(Value::Number(value)),
                    Err(err) => CacheOutcome::Error(err),
                }
            }
        },
        Err(err) => CacheOutcome::Error(err),
    };

    let changed = cache.set(
        &point.name,
        CacheEntry {
            outcome: outcome.clone(),
            updated_at: Utc::now(),
        },
    );
    if changed {
        bus.publish(BusEvent::DataPointUpdated {
            name: point.name.clone(),
        });
    }
}
