//! Modbus RTU framing tunneled over a raw TCP byte stream (spec §4.1, §6).
//!
//! Many RS-485-to-Ethernet gateways forward the raw RTU byte stream rather
//! than wrapping it in MBAP. Framing is therefore the same silence-gap
//! assembly as [`super::modbus_rtu`], just read from a socket instead of a
//! physical UART.

use std::time::Duration;

use rmodbus::client::ModbusRequest;
use rmodbus::ModbusProto;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use crate::error::PortError;

use super::{Address, RawValue, TransportAdapter, Verb};

const READ_BUF_SIZE: usize = 256;
const MAX_ASSEMBLING_LEN: usize = 768;
const RESPONSE_DEADLINE: Duration = Duration::from_millis(3000);
/// Silence gap between bytes that closes a frame. Tunnels typically buffer
/// in larger chunks than a raw UART, so this is generous relative to the
/// 3.5-character-time figure used on the wire.
const INTER_BYTE_SILENCE: Duration = Duration::from_millis(20);

pub struct RtuOverTcpAdapter {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl RtuOverTcpAdapter {
    pub async fn connect(host: &str, port: u16) -> Result<Self, PortError> {
        let stream = dial(host, port).await?;
        Ok(Self {
            host: host.to_string(),
            port,
            stream: Some(stream),
        })
    }

    async fn transact(&mut self, request: &[u8]) -> Result<Vec<u8>, PortError> {
        let stream = self.stream.as_mut().ok_or(PortError::Disconnected)?;
        timeout(RESPONSE_DEADLINE, stream.write_all(request))
            .await
            .map_err(|_| PortError::Timeout)?
            .map_err(|_| PortError::Disconnected)?;

        let mut assembling = Vec::with_capacity(READ_BUF_SIZE);
        let mut last_byte: Option<Instant> = None;
        let deadline = Instant::now() + RESPONSE_DEADLINE;

        loop {
            if Instant::now() >= deadline {
                return Err(PortError::Timeout);
            }
            if let Some(t) = last_byte {
                if !assembling.is_empty() && t.elapsed() >= INTER_BYTE_SILENCE {
                    return Ok(assembling);
                }
            }
            let mut buf = [0u8; READ_BUF_SIZE];
            let remaining = deadline.saturating_duration_since(Instant::now());
            let poll_window = remaining.min(INTER_BYTE_SILENCE);
            match timeout(poll_window.max(Duration::from_millis(1)), stream.read(&mut buf)).await {
                Ok(Ok(0)) => return Err(PortError::Disconnected),
                Ok(Ok(n)) => {
                    assembling.extend_from_slice(&buf[..n]);
                    last_byte = Some(Instant::now());
                    if assembling.len() > MAX_ASSEMBLING_LEN {
                        return Ok(assembling);
                    }
                }
                Ok(Err(_)) => return Err(PortError::Disconnected),
                Err(_) => {
                    if !assembling.is_empty() {
                        return Ok(assembling);
                    }
                }
            }
        }
    }
}

async fn dial(host: &str, port: u16) -> Result<TcpStream, PortError> {
    timeout(Duration::from_millis(3000), TcpStream::connect((host, port)))
        .await
        .map_err(|_| PortError::Timeout)?
        .map_err(|_| PortError::Disconnected)
}

fn mb_request(slave_id: u8) -> ModbusRequest {
    ModbusRequest::new(slave_id, ModbusProto::Rtu)
}

#[async_trait::async_trait]
impl TransportAdapter for RtuOverTcpAdapter {
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
                let response = self.transact(&raw).await?;
                request.parse_ok(&response).map_err(|_| PortError::Crc)?;
                let byte = *response.get(3).ok_or(PortError::Crc)?;
                let channel = address.channel.unwrap_or(1).saturating_sub(1);
                Ok(RawValue::Bit(byte & (1 << channel) != 0))
            }
            Verb::ReadCoil => {
                request
                    .generate_get_coils(address.register, 1, &mut raw)
                    .map_err(|_| PortError::EncodingFailed)?;
                let response = self.transact(&raw).await?;
                request.parse_ok(&response).map_err(|_| PortError::Crc)?;
                let byte = *response.get(3).ok_or(PortError::Crc)?;
                Ok(RawValue::Bit(byte & 1 != 0))
            }
            Verb::ReadInputRegister => {
                request
                    .generate_get_inputs(address.register, register_span.max(1), &mut raw)
                    .map_err(|_| PortError::EncodingFailed)?;
                let response = self.transact(&raw).await?;
                decode_registers(&mut request, response, register_span)
            }
            Verb::ReadHoldingRegister => {
                request
                    .generate_get_holdings(address.register, register_span.max(1), &mut raw)
                    .map_err(|_| PortError::EncodingFailed)?;
                let response = self.transact(&raw).await?;
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

        let response = self.transact(&raw).await?;
        request.parse_ok(&response).map_err(|_| PortError::Crc)
    }

    async fn reconnect(&mut self) -> Result<(), PortError> {
        self.stream = None;
        self.stream = Some(dial(&self.host, self.port).await?);
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
    let body = response
        .get(3..response.len().saturating_sub(2))
        .ok_or(PortError::Crc)?;
    let mut words = [0u16; 4];
    for (i, chunk) in body.chunks_exact(2).take(span).enumerate() {
        words[i] = u16::from_be_bytes([chunk[0], chunk[1]]);
    }
    Ok(RawValue::Registers(words, span as u8))
}
