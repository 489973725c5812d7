//! In-memory protocol-agnostic simulation adapter (C10, spec §4.10).
//!
//! Sits at the command boundary rather than the wire: it implements the same
//! verb set the real adapters do, so tests exercise the same port-worker and
//! equipment-controller code paths without framing a single Modbus byte.
//! Storage reuses the teacher's `rmodbus::server::storage::ModbusStorageSmall`
//! per slave, the same structure `extract_values_from_storage` reads from.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rmodbus::server::context::ModbusContext;
use rmodbus::server::storage::ModbusStorageSmall;

use crate::error::PortError;

use super::{Address, RawValue, TransportAdapter, Verb};

#[derive(Default)]
struct SlaveState {
    storage: ModbusStorageSmall,
    offline: bool,
}

/// Shared simulated fieldbus: several slaves, each with its own register
/// file, reachable from any number of cloned [`SimulationAdapter`] handles.
#[derive(Clone, Default)]
pub struct SimulationBus {
    slaves: Arc<Mutex<HashMap<u8, SlaveState>>>,
    s7_memory: Arc<Mutex<Vec<u8>>>,
}

impl SimulationBus {
    pub fn new() -> Self {
        Self {
            slaves: Arc::new(Mutex::new(HashMap::new())),
            s7_memory: Arc::new(Mutex::new(vec![0u8; 4096])),
        }
    }

    fn with_slave<R>(&self, slave_id: u8, f: impl FnOnce(&mut SlaveState) -> R) -> R {
        let mut slaves = self.slaves.lock();
        let state = slaves.entry(slave_id).or_default();
        f(state)
    }

    pub fn set_offline(&self, slave_id: u8, offline: bool) {
        self.with_slave(slave_id, |s| s.offline = offline);
    }

    pub fn set_coil(&self, slave_id: u8, address: u16, value: bool) {
        self.with_slave(slave_id, |s| {
            let _ = s.storage.set_coil(address, value);
        });
    }

    pub fn set_input(&self, slave_id: u8, address: u16, value: bool) {
        self.with_slave(slave_id, |s| {
            let _ = s.storage.set_discrete(address, value);
        });
    }

    pub fn set_register(&self, slave_id: u8, address: u16, value: u16) {
        self.with_slave(slave_id, |s| {
            let _ = s.storage.set_holding(address, value);
            let _ = s.storage.set_input(address, value);
        });
    }

    pub fn set_s7_bytes(&self, offset: usize, data: &[u8]) {
        let mut mem = self.s7_memory.lock();
        if offset + data.len() > mem.len() {
            mem.resize(offset + data.len(), 0);
        }
        mem[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn s7_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        let mem = self.s7_memory.lock();
        mem.get(offset..offset + len).map(|s| s.to_vec()).unwrap_or_else(|| vec![0u8; len])
    }

    /// Special holding register convention used by the slave-renumber test
    /// control (spec §4.10): writing to `phr` address `0xFFFF` moves the
    /// whole slave's state under a new slave id.
    const RENUMBER_REGISTER: u16 = 0xFFFF;

    fn renumber(&self, old_id: u8, new_id: u8) {
        let mut slaves = self.slaves.lock();
        if let Some(state) = slaves.remove(&old_id) {
            slaves.insert(new_id, state);
        }
    }
}

pub struct SimulationAdapter {
    bus: SimulationBus,
}

impl SimulationAdapter {
    pub fn new(bus: SimulationBus) -> Self {
        Self { bus }
    }
}

#[async_trait::async_trait]
impl TransportAdapter for SimulationAdapter {
    async fn read(
        &mut self,
        verb: Verb,
        address: Address,
        register_span: u16,
    ) -> Result<RawValue, PortError> {
        let mut slaves = self.bus.slaves.lock();
        let state = slaves.entry(address.slave_id).or_default();
        if state.offline {
            return Err(PortError::Timeout);
        }

        match verb {
            Verb::ReadDiscreteInput => {
                let channel = address.channel.unwrap_or(1).saturating_sub(1) as u16;
                let value = state
                    .storage
                    .get_discrete(address.register + channel)
                    .map_err(|_| PortError::Exception(2))?;
                Ok(RawValue::Bit(value))
            }
            Verb::ReadCoil => {
                let value = state
                    .storage
                    .get_coil(address.register)
                    .map_err(|_| PortError::Exception(2))?;
                Ok(RawValue::Bit(value))
            }
            Verb::ReadInputRegister => {
                let span = register_span.max(1).min(4);
                let mut words = [0u16; 4];
                for i in 0..span {
                    words[i as usize] = state
                        .storage
                        .get_input(address.register + i)
                        .map_err(|_| PortError::Exception(2))?;
                }
                Ok(RawValue::Registers(words, span as u8))
            }
            Verb::ReadHoldingRegister => {
                let span = register_span.max(1).min(4);
                let mut words = [0u16; 4];
                for i in 0..span {
                    words[i as usize] = state
                        .storage
                        .get_holding(address.register + i)
                        .map_err(|_| PortError::Exception(2))?;
                }
                Ok(RawValue::Registers(words, span as u8))
            }
            Verb::ReadS7Input | Verb::ReadS7Output | Verb::ReadS7DataBlock => {
                drop(slaves);
                let len = (register_span.max(1) * 2) as usize;
                let bytes = self.bus.s7_bytes(address.register as usize, len);
                let span = (len / 2).min(4);
                let mut words = [0u16; 4];
                for (i, chunk) in bytes.chunks_exact(2).take(span).enumerate() {
                    words[i] = u16::from_be_bytes([chunk[0], chunk[1]]);
                }
                Ok(RawValue::Registers(words, span as u8))
            }
            Verb::WriteS7Output | Verb::WriteS7DataBlock => Err(PortError::UnknownCmd),
        }
    }

    async fn write(
        &mut self,
        verb: Verb,
        address: Address,
        value: RawValue,
    ) -> Result<(), PortError> {
        {
            let slaves = self.bus.slaves.lock();
            if slaves.get(&address.slave_id).map(|s| s.offline).unwrap_or(false) {
                return Err(PortError::DeviceOfflineSkipped);
            }
        }

        match (verb, value) {
            (Verb::WriteCoil, RawValue::Bit(v)) => {
                self.bus.with_slave(address.slave_id, |s| {
                    let _ = s.storage.set_coil(address.register, v);
                });
                Ok(())
            }
            (Verb::WriteHoldingRegister, RawValue::Registers(words, len)) => {
                if address.register == SimulationBus::RENUMBER_REGISTER {
                    let new_id = words[0] as u8;
                    self.bus.renumber(address.slave_id, new_id);
                    return Ok(());
                }
                self.bus.with_slave(address.slave_id, |s| {
                    for (i, w) in words[..len as usize].iter().enumerate() {
                        let _ = s.storage.set_holding(address.register + i as u16, *w);
                    }
                });
                Ok(())
            }
            (Verb::WriteS7Output, RawValue::Bit(v)) | (Verb::WriteS7DataBlock, RawValue::Bit(v)) => {
                self.bus.set_s7_bytes(address.register as usize, &[v as u8]);
                Ok(())
            }
            (Verb::WriteS7Output, RawValue::Registers(words, len))
            | (Verb::WriteS7DataBlock, RawValue::Registers(words, len)) => {
                let mut bytes = Vec::with_capacity(len as usize * 2);
                for w in &words[..len as usize] {
                    bytes.extend_from_slice(&w.to_be_bytes());
                }
                self.bus.set_s7_bytes(address.register as usize, &bytes);
                Ok(())
            }
            _ => Err(PortError::UnknownCmd),
        }
    }

    async fn reconnect(&mut self) -> Result<(), PortError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offline_slave_times_out() {
        let bus = SimulationBus::new();
        bus.set_offline(3, true);
        let mut adapter = SimulationAdapter::new(bus);
        let address = Address {
            slave_id: 3,
            register: 0,
            channel: Some(1),
        };
        let result = adapter.read(Verb::ReadDiscreteInput, address, 1).await;
        assert_eq!(result, Err(PortError::Timeout));
    }

    #[tokio::test]
    async fn coil_write_then_read_round_trips() {
        let bus = SimulationBus::new();
        let mut adapter = SimulationAdapter::new(bus);
        let address = Address {
            slave_id: 1,
            register: 5,
            channel: None,
        };
        adapter
            .write(Verb::WriteCoil, address, RawValue::Bit(true))
            .await
            .unwrap();
        let value = adapter.read(Verb::ReadCoil, address, 1).await.unwrap();
        assert_eq!(value, RawValue::Bit(true));
    }

    #[tokio::test]
    async fn renumber_moves_slave_state() {
        let bus = SimulationBus::new();
        bus.set_register(1, 10, 42);
        let mut adapter = SimulationAdapter::new(bus.clone());
        let renumber_address = Address {
            slave_id: 1,
            register: SimulationBus::RENUMBER_REGISTER,
            channel: None,
        };
        adapter
            .write(
                Verb::WriteHoldingRegister,
                renumber_address,
                RawValue::Registers([9, 0, 0, 0], 1),
            )
            .await
            .unwrap();

        let moved_address = Address {
            slave_id: 9,
            register: 10,
            channel: None,
        };
        let value = adapter
            .read(Verb::ReadHoldingRegister, moved_address, 1)
            .await
            .unwrap();
        assert_eq!(value, RawValue::Registers([42, 0, 0, 0], 1));
    }
}
