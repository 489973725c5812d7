//! Configuration data model (spec §3, §6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Wire protocol spoken on a [`Port`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortProtocol {
    ModbusRtu,
    ModbusTcp,
    RtuOverTcp,
    S7,
    /// No live transport connection is opened; used in tests and dry-run.
    Virtual,
}

/// Parity setting for serial links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// A physical or virtual connection: serial bus, Modbus/TCP socket, S7 link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    /// Stable identifier: serial device path, `tcp://ip:port`, or `s7://ip`.
    pub id: String,
    pub protocol: PortProtocol,
    pub description: String,

    // Serial parameters (RTU / RTU-over-TCP).
    #[serde(default)]
    pub device_path: Option<String>,
    #[serde(default)]
    pub baud: Option<u32>,
    #[serde(default)]
    pub parity: Option<Parity>,
    #[serde(default)]
    pub data_bits: Option<u8>,
    #[serde(default)]
    pub stop_bits: Option<u8>,

    // TCP endpoint (Modbus TCP / RTU-over-TCP).
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub tcp_port: Option<u16>,

    // S7 addressing.
    #[serde(default)]
    pub s7_rack: Option<u16>,
    #[serde(default)]
    pub s7_slot: Option<u16>,
}

/// Direction tag for a [`DataPoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointDirection {
    /// Discrete input.
    Di,
    /// Coil (writable digital output).
    Do,
    /// Analog input.
    Ai,
    /// Analog output.
    Ao,
}

/// Numeric decoding for analog points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Uint64,
}

impl ValueType {
    /// Number of 16-bit registers this value type spans.
    pub fn register_span(self) -> u16 {
        match self {
            ValueType::Int16 | ValueType::Uint16 => 1,
            ValueType::Int32 | ValueType::Uint32 | ValueType::Float32 => 2,
            ValueType::Uint64 => 4,
        }
    }
}

/// Register byte ordering for multi-register analog values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    HighLow,
    LowHigh,
}

/// Logging cadence for a data point: `None` = on change, `Some(0)` = off,
/// `Some(n)` = every n seconds.
pub type LogInterval = Option<u32>;

/// A named atomic readable/writable value at a [`Port`] (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    pub name: String,
    pub direction: PointDirection,
    pub port_id: String,
    pub slave_id: u8,
    pub register: u16,
    #[serde(default)]
    pub channel: Option<u8>,
    pub read_fn: String,
    pub write_fn: String,

    #[serde(default)]
    pub value_type: Option<ValueType>,
    #[serde(default)]
    pub byte_order: Option<ByteOrder>,
    #[serde(default = "default_scale")]
    pub scale_factor: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub unit: String,

    #[serde(default)]
    pub min_valid: Option<f64>,
    #[serde(default)]
    pub max_valid: Option<f64>,

    #[serde(default)]
    pub log_interval: LogInterval,
    #[serde(default)]
    pub inverted: bool,
    #[serde(default)]
    pub color_zones: Vec<String>,
    #[serde(default)]
    pub description: String,
}

fn default_scale() -> f64 {
    1.0
}

/// Closed set of equipment kinds (spec §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentKind {
    Fan,
    Pump,
    Light,
    Siren,
    Feeding,
    FeedIn,
    Egg,
    Dung,
    DungHorz,
    DungExit,
    TempSensor,
    HumiditySensor,
    Co2Sensor,
    Nh3Sensor,
    WaterMeter,
    PowerMeter,
    AverageSensor,
    PowerIndicator,
}

impl EquipmentKind {
    /// Per-kind default poll interval (spec §3): 5000 ms for sensors/meters,
    /// 500 ms for actuators.
    pub fn default_poll_interval_ms(self) -> u32 {
        match self {
            EquipmentKind::TempSensor
            | EquipmentKind::HumiditySensor
            | EquipmentKind::Co2Sensor
            | EquipmentKind::Nh3Sensor
            | EquipmentKind::WaterMeter
            | EquipmentKind::PowerMeter
            | EquipmentKind::AverageSensor
            | EquipmentKind::PowerIndicator => 5000,
            _ => 500,
        }
    }

    /// Required data-point-tree role keys for this kind (spec §4.4 table).
    pub fn required_keys(self) -> &'static [&'static str] {
        match self {
            EquipmentKind::Fan | EquipmentKind::Pump => {
                &["on_off_coil", "running_feedback", "auto_manual"]
            }
            EquipmentKind::Light => &["on_off_coil", "auto_manual"],
            EquipmentKind::Siren => &["on_off_coil", "auto_manual", "running_feedback"],
            EquipmentKind::Egg => &[
                "on_off_coil",
                "running_feedback",
                "auto_manual",
                "manual_switch",
            ],
            EquipmentKind::Dung | EquipmentKind::DungHorz | EquipmentKind::DungExit => {
                &["on_off_coil", "running_feedback"]
            }
            EquipmentKind::Feeding => &[
                "to_back_limit",
                "to_front_limit",
                "fwd_feedback",
                "rev_feedback",
                "front_limit",
                "back_limit",
                "pulse_sensor",
                "auto_manual",
            ],
            EquipmentKind::FeedIn => {
                &["filling_coil", "running_feedback", "auto_manual", "full_switch", "trip"]
            }
            EquipmentKind::AverageSensor => &["temp_sensors"],
            EquipmentKind::PowerIndicator => &["indicator"],
            // Pure read-through sensor kinds: any role keys are accepted.
            EquipmentKind::TempSensor
            | EquipmentKind::HumiditySensor
            | EquipmentKind::Co2Sensor
            | EquipmentKind::Nh3Sensor
            | EquipmentKind::WaterMeter
            | EquipmentKind::PowerMeter => &[],
        }
    }
}

/// Raw, unresolved equipment row as read from the configuration boundary.
/// Role values are data-point *names*; resolution into a typed
/// [`crate::equipment::EquipmentKindState`] happens at boot in `equipment::build`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Equipment {
    pub name: String,
    pub title: String,
    pub kind: EquipmentKind,
    /// Role-name key -> either a single data-point name or a comma-separated
    /// list, per the data-point-tree grammar (spec §6).
    pub data_point_tree: HashMap<String, TreeValue>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub poll_interval_ms: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Equipment {
    pub fn effective_poll_interval_ms(&self) -> u32 {
        self.poll_interval_ms
            .unwrap_or_else(|| self.kind.default_poll_interval_ms())
    }
}

/// A value parsed out of the data-point-tree grammar (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeValue {
    Bool(bool),
    Scalar(String),
    List(Vec<String>),
}

impl TreeValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            TreeValue::Scalar(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Vec<String> {
        match self {
            TreeValue::List(v) => v.clone(),
            TreeValue::Scalar(s) => vec![s.clone()],
            TreeValue::Bool(b) => vec![b.to_string()],
        }
    }
}

/// A directed interlock edge (spec §3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterlockRule {
    pub upstream_equipment: String,
    pub downstream_equipment: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// One rung of the temperature staircase (spec §3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempStep {
    pub temp: f64,
    pub extra_fans: u32,
    #[serde(default)]
    pub pumps: Vec<String>,
}

/// Singleton environment-control configuration (spec §3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub failsafe_fans_count: u32,
    pub steps: Vec<TempStep>,
    pub humidity_min: f64,
    pub humidity_max: f64,
    pub stagger_delay_seconds: u64,
    pub delay_between_step_seconds: u64,
    pub poll_interval_seconds: u64,
    /// Comma-separated data-point names, front-to-back.
    pub temp_sensor_order: Vec<String>,
    pub max_temp_delta: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            failsafe_fans_count: 0,
            steps: Vec::new(),
            humidity_min: 0.0,
            humidity_max: 100.0,
            stagger_delay_seconds: 5,
            delay_between_step_seconds: 10,
            poll_interval_seconds: 5,
            temp_sensor_order: Vec::new(),
            max_temp_delta: f64::MAX,
            enabled: true,
        }
    }
}

/// Atomic, read-only snapshot of every configuration table (spec §6).
///
/// Auxiliary tables owned by external collaborators (schedules, alarms,
/// task templates) are carried as opaque JSON so a reload is genuinely
/// atomic across the whole boundary, even though this crate does not
/// interpret them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigSnapshot {
    pub ports: Vec<Port>,
    pub data_points: Vec<DataPoint>,
    pub equipment: Vec<Equipment>,
    pub interlock_rules: Vec<InterlockRule>,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub auxiliary: HashMap<String, serde_json::Value>,
}
