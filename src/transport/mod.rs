//! Transport adapters (C1, spec §4.1).
//!
//! An adapter speaks one fieldbus wire format and exposes the same verb set
//! regardless: named read/write functions operating on (slave, register,
//! channel) triples. The port worker (`crate::port_worker`) is the only
//! caller; it owns per-slave failure tracking, so adapters just report
//! [`PortError`] and otherwise stay stateless about retries.

pub mod modbus_rtu;
pub mod modbus_tcp;
pub mod rtu_over_tcp;
pub mod s7;
pub mod simulation;

use async_trait::async_trait;

use crate::error::PortError;

/// A single 16-bit register value, or a decoded wide value assembled from
/// several registers by the caller.
pub type RawWord = u16;

/// Addresses a single bit or register on a slave device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub slave_id: u8,
    pub register: u16,
    /// 1-indexed bit within the register, for packed digital values.
    pub channel: Option<u8>,
}

/// The verb named by a data point's `read_fn`/`write_fn` string (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    ReadDiscreteInput,
    ReadCoil,
    ReadInputRegister,
    ReadHoldingRegister,
    WriteCoil,
    WriteHoldingRegister,
    ReadS7Input,
    ReadS7Output,
    ReadS7DataBlock,
    WriteS7Output,
    WriteS7DataBlock,
}

impl Verb {
    /// Maps the configured function-name string onto a [`Verb`] (spec §3:
    /// `read_digital_input`, `write_analog_output`, etc). Unknown names are
    /// rejected at boot, not at poll time.
    pub fn parse(name: &str) -> Option<Verb> {
        match name {
            "read_digital_input" => Some(Verb::ReadDiscreteInput),
            "read_coil" => Some(Verb::ReadCoil),
            "read_input_register" => Some(Verb::ReadInputRegister),
            "read_holding_register" | "read_analog_input" => Some(Verb::ReadHoldingRegister),
            "write_coil" | "write_digital_output" => Some(Verb::WriteCoil),
            "write_holding_register" | "write_analog_output" => Some(Verb::WriteHoldingRegister),
            "read_s7_input" => Some(Verb::ReadS7Input),
            "read_s7_output" => Some(Verb::ReadS7Output),
            "read_s7_db" => Some(Verb::ReadS7DataBlock),
            "write_s7_output" => Some(Verb::WriteS7Output),
            "write_s7_db" => Some(Verb::WriteS7DataBlock),
            _ => None,
        }
    }
}

/// A decoded digital or raw-register result from a single transport call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    Bit(bool),
    Registers([u16; 4], u8),
}

impl RawValue {
    pub fn registers(&self) -> &[u16] {
        match self {
            RawValue::Bit(_) => &[],
            RawValue::Registers(words, len) => &words[..*len as usize],
        }
    }
}

/// One fieldbus connection's read/write surface (spec §4.1).
///
/// Implementors own exactly one live connection; the port worker is the
/// only caller and already serializes access, so methods may assume
/// exclusive use for their duration.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Performs a single read per the named verb, returning a raw
    /// (undecoded) value. `register_span` is the number of consecutive
    /// registers to read for wide analog values (spec §3 `value_type`).
    async fn read(
        &mut self,
        verb: Verb,
        address: Address,
        register_span: u16,
    ) -> Result<RawValue, PortError>;

    /// Performs a single write per the named verb.
    async fn write(
        &mut self,
        verb: Verb,
        address: Address,
        value: RawValue,
    ) -> Result<(), PortError>;

    /// Tears down and re-establishes the underlying connection.
    async fn reconnect(&mut self) -> Result<(), PortError>;
}
