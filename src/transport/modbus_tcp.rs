//! Modbus TCP transport: MBAP header + PDU over a plain TCP socket (spec §4.1, §6).

use std::time::Duration;

use rmodbus::client::ModbusRequest;
use rmodbus::ModbusProto;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::PortError;

use super::{Address, RawValue, TransportAdapter, Verb};

const RESPONSE_DEADLINE: Duration = Duration::from_millis(3000);
const CONNECT_DEADLINE: Duration = Duration::from_millis(3000);

pub struct ModbusTcpAdapter {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl ModbusTcpAdapter {
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

        // MBAP header (6 bytes) carries the following-byte count at [4..6].
        let mut header = [0u8; 7];
        timeout(RESPONSE_DEADLINE, stream.read_exact(&mut header))
            .await
            .map_err(|_| PortError::Timeout)?
            .map_err(|_| PortError::Disconnected)?;
        let remaining_len = u16::from_be_bytes([header[4], header[5]]) as usize;
        let remaining_len = remaining_len.saturating_sub(1);

        let mut body = vec![0u8; remaining_len];
        if remaining_len > 0 {
            timeout(RESPONSE_DEADLINE, stream.read_exact(&mut body))
                .await
                .map_err(|_| PortError::Timeout)?
                .map_err(|_| PortError::Disconnected)?;
        }

        let mut frame = header.to_vec();
        frame.extend_from_slice(&body);
        Ok(frame)
    }
}

async fn dial(host: &str, port: u16) -> Result<TcpStream, PortError> {
    timeout(CONNECT_DEADLINE, TcpStream::connect((host, port)))
        .await
        .map_err(|_| PortError::Timeout)?
        .map_err(|_| PortError::Disconnected)
}

fn mb_request(slave_id: u8) -> ModbusRequest {
    ModbusRequest::new(slave_id, ModbusProto::Tcp)
}

#[async_trait::async_trait]
impl TransportAdapter for ModbusTcpAdapter {
    async fn read(
        &mut self,
        verb: Verb,
        address: Address,
        register_span: u16,
    ) -> Result<RawValue, PortError> {
        let mut request = mb_request(address.slave_id);
        let mut raw = Vec::with_capacity(12);

        match verb {
            Verb::ReadDiscreteInput => {
                request
                    .generate_get_discretes(address.register, 1, &mut raw)
                    .map_err(|_| PortError::EncodingFailed)?;
                let response = self.transact(&raw).await?;
                request.parse_ok(&response).map_err(|_| PortError::Crc)?;
                let byte = *response.get(response.len().saturating_sub(1)).ok_or(PortError::Crc)?;
                let channel = address.channel.unwrap_or(1).saturating_sub(1);
                Ok(RawValue::Bit(byte & (1 << channel) != 0))
            }
            Verb::ReadCoil => {
                request
                    .generate_get_coils(address.register, 1, &mut raw)
                    .map_err(|_| PortError::EncodingFailed)?;
                let response = self.transact(&raw).await?;
                request.parse_ok(&response).map_err(|_| PortError::Crc)?;
                let byte = *response.get(response.len().saturating_sub(1)).ok_or(PortError::Crc)?;
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
        let mut raw = Vec::with_capacity(12);

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
    let byte_count = (span * 2).min(response.len());
    let body = &response[response.len() - byte_count..];
    let mut words = [0u16; 4];
    for (i, chunk) in body.chunks_exact(2).take(span).enumerate() {
        words[i] = u16::from_be_bytes([chunk[0], chunk[1]]);
    }
    Ok(RawValue::Registers(words, span as u8))
}
