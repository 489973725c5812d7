//! Modbus RTU transport over an RS-485 serial bus (spec §4.1, §6).
//!
//! Framing mirrors the teacher's serial daemon: a silent gap of 3.5 character
//! times closes a frame, derived from baud/data-bits/stop-bits the same way
//! `compute_gap` does. Encoding/decoding of the PDU itself is delegated to
//! `rmodbus::client::ModbusRequest`, matching the `pull_get_*`/`pull_set_*`
//! helpers the teacher's CLI uses.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use rmodbus::client::ModbusRequest;
use rmodbus::ModbusProto;
use serialport::SerialPort;

use crate::config::Parity as ConfigParity;
use crate::error::PortError;

use super::{Address, RawValue, TransportAdapter, Verb};

const READ_BUF_SIZE: usize = 256;
const MAX_ASSEMBLING_LEN: usize = 768;
const RESPONSE_DEADLINE: Duration = Duration::from_millis(3000);

pub struct ModbusRtuAdapter {
    device_path: String,
    baud: u32,
    parity: ConfigParity,
    data_bits: u8,
    stop_bits: u8,
    port: Box<dyn SerialPort>,
    inter_frame_gap: Duration,
}

impl ModbusRtuAdapter {
    pub fn open(
        device_path: &str,
        baud: u32,
        parity: ConfigParity,
        data_bits: u8,
        stop_bits: u8,
    ) -> Result<Self, PortError> {
        let port = build_port(device_path, baud, parity, data_bits, stop_bits)?;
        Ok(Self {
            device_path: device_path.to_string(),
            baud,
            parity,
            data_bits,
            stop_bits,
            port,
            inter_frame_gap: compute_gap(baud, data_bits, stop_bits),
        })
    }

    fn transact(&mut self, request: &[u8]) -> Result<Vec<u8>, PortError> {
        self.port
            .write_all(request)
            .map_err(|_| PortError::Disconnected)?;
        self.port.flush().map_err(|_| PortError::Disconnected)?;

        let mut assembling = Vec::with_capacity(READ_BUF_SIZE);
        let mut last_byte: Option<Instant> = None;
        let deadline = Instant::now() + RESPONSE_DEADLINE;

        loop {
            if Instant::now() >= deadline {
                return Err(PortError::Timeout);
            }
            if let Some(t) = last_byte {
                if !assembling.is_empty() && t.elapsed() >= self.inter_frame_gap {
                    return Ok(assembling);
                }
            }
            let mut buf = [0u8; READ_BUF_SIZE];
            match self.port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    assembling.extend_from_slice(&buf[..n]);
                    last_byte = Some(Instant::now());
                    if assembling.len() > MAX_ASSEMBLING_LEN {
                        return Ok(assembling);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(_) => return Err(PortError::Disconnected),
            }
        }
    }
}

fn build_port(
    device_path: &str,
    baud: u32,
    parity: ConfigParity,
    data_bits: u8,
    stop_bits: u8,
) -> Result<Box<dyn SerialPort>, PortError> {
    let data_bits = match data_bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    };
    let stop_bits = match stop_bits {
        2 => serialport::StopBits::Two,
        _ => serialport::StopBits::One,
    };
    let parity = match parity {
        ConfigParity::None => serialport::Parity::None,
        ConfigParity::Odd => serialport::Parity::Odd,
        ConfigParity::Even => serialport::Parity::Even,
    };
    serialport::new(device_path, baud)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .timeout(Duration::from_millis(50))
        .open()
        .map_err(|_| PortError::Disconnected)
}

/// 3.5 character-time silent gap, same derivation as the teacher's
/// `compute_gap`: bit time times bits-per-byte (start + data + stop), scaled
/// by 3.5.
fn compute_gap(baud: u32, data_bits: u8, stop_bits: u8) -> Duration {
    let bit_time_us = 1_000_000u64 / baud as u64;
    let bits_per_byte = data_bits as u64 + stop_bits as u64 + 1;
    let byte_time_us = bit_time_us * bits_per_byte;
    Duration::from_micros(byte_time_us.saturating_mul(35).saturating_div(10))
}

fn mb_request(slave_id: u8) -> ModbusRequest {
    ModbusRequest::new(slave_id, ModbusProto::Rtu)
}

#[async_trait::async_trait]
impl TransportAdapter for ModbusRtuAdapter {
    async fn read(
        &mut self,
        verb: Verb,
        address: Address,
        register_span: u16,
    ) -> Result<RawValue, PortError> {
        let mut request = mb_request(address.slave_id);
        let mut raw = Vec::with_capacity(8);

        match verb {
            Verb::ReadDiscreteInput => {
                request
                    .generate_get_discretes(address.register, 1, &mut raw)
                    .map_err(|_| PortError::EncodingFailed)?;
                let response = self.transact(&raw)?;
                request.parse_ok(&response).map_err(|_| PortError::Crc)?;
                let byte = *response.get(3).ok_or(PortError::Crc)?;
                let channel = address.channel.unwrap_or(1).saturating_sub(1);
                Ok(RawValue::Bit(byte & (1 << channel) != 0))
            }
            Verb::ReadCoil => {
                request
                    .generate_get_coils(address.register, 1, &mut raw)
                    .map_err(|_| PortError::EncodingFailed)?;
                let response = self.transact(&raw)?;
                request.parse_ok(&response).map_err(|_| PortError::Crc)?;
                let byte = *response.get(3).ok_or(PortError::Crc)?;
                Ok(RawValue::Bit(byte & 1 != 0))
            }
            Verb::ReadInputRegister => {
                request
                    .generate_get_inputs(address.register, register_span.max(1), &mut raw)
                    .map_err(|_| PortError::EncodingFailed)?;
                let response = self.transact(&raw)?;
                decode_registers(&mut request, response, register_span)
            }
            Verb::ReadHoldingRegister => {
                request
                    .generate_get_holdings(address.register, register_span.max(1), &mut raw)
                    .map_err(|_| PortError::EncodingFailed)?;
                let response = self.transact(&raw)?;
                decode_registers(&mut request, response, register_span)
            }
            Verb::ReadS7Input
            | Verb::ReadS7Output
            | Verb::ReadS7DataBlock
            | Verb::WriteS7Output
            | Verb::WriteS7DataBlock => Err(PortError::UnknownCmd),
        }
    }

    async fn write(
        &mut self,
        verb: Verb,
        address: Address,
        value: RawValue,
    ) -> Result<(), PortError> {
        let mut request = mb_request(address.slave_id);
        let mut raw = Vec::with_capacity(8);

        match (verb, value) {
            (Verb::WriteCoil, RawValue::Bit(v)) => {
                request
                    .generate_set_coil(address.register, v, &mut raw)
                    .map_err(|_| PortError::EncodingFailed)?;
            }
            (Verb::WriteHoldingRegister, RawValue::Registers(words, len)) => {
                if len == 1 {
                    request
                        .generate_set_holding(address.register, words[0], &mut raw)
                        .map_err(|_| PortError::EncodingFailed)?;
                } else {
                    request
                        .generate_set_holdings_bulk(address.register, &words[..len as usize], &mut raw)
                        .map_err(|_| PortError::EncodingFailed)?;
                }
            }
            _ => return Err(PortError::UnknownCmd),
        }

        let response = self.transact(&raw)?;
        request.parse_ok(&response).map_err(|_| PortError::Crc)
    }

    async fn reconnect(&mut self) -> Result<(), PortError> {
        self.port = build_port(
            &self.device_path,
            self.baud,
            self.parity,
            self.data_bits,
            self.stop_bits,
        )?;
        Ok(())
    }
}

fn decode_registers(
    request: &mut ModbusRequest,
    response: Vec<u8>,
    register_span: u16,
) -> Result<RawValue, PortError> {
    request.parse_ok(&response).map_err(|_| PortError::Crc)?;
    let span = register_span.max(1).min(4) as usize;
    let body = response.get(3..response.len().saturating_sub(2)).ok_or(PortError::Crc)?;
    let mut words = [0u16; 4];
    for (i, chunk) in body.chunks_exact(2).take(span).enumerate() {
        words[i] = u16::from_be_bytes([chunk[0], chunk[1]]);
    }
    Ok(RawValue::Registers(words, span as u8))
}
