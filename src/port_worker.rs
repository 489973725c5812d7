//! Per-port I/O serialization (C2, spec §4.2).
//!
//! One task owns the transport adapter for its entire life, mirroring the
//! teacher's `boot_serial_loop`: every read and write for a port funnels
//! through a single mailbox, so requests hit the wire in submission order
//! with no interleaving. Callers get a cheap `PortHandle` clone and talk to
//! the task over a `flume` channel with a `oneshot` reply, the same split
//! the teacher uses between `RuntimeCommand`/`RuntimeEvent` and its UI.

use std::collections::HashMap;

use flume::{Receiver, Sender};
use log::warn;

use crate::error::PortError;
use crate::transport::{Address, RawValue, TransportAdapter, Verb};

const MAX_CONSECUTIVE_FAILURES: u32 = 3;

enum Command {
    Read {
        verb: Verb,
        address: Address,
        register_span: u16,
        reply: oneshot::Sender<Result<RawValue, PortError>>,
    },
    Write {
        verb: Verb,
        address: Address,
        value: RawValue,
        reply: oneshot::Sender<Result<(), PortError>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    SkipSlave {
        slave_id: u8,
        reply: oneshot::Sender<()>,
    },
    UnskipSlave {
        slave_id: u8,
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable handle to a running port worker.
#[derive(Clone)]
pub struct PortHandle {
    port_id: String,
    tx: Sender<Command>,
}

impl PortHandle {
    pub fn port_id(&self) -> &str {
        &self.port_id
    }

    pub async fn read(
        &self,
        verb: Verb,
        address: Address,
        register_span: u16,
    ) -> Result<RawValue, PortError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send_async(Command::Read {
                verb,
                address,
                register_span,
                reply,
            })
            .await
            .map_err(|_| PortError::Disconnected)?;
        rx.await.map_err(|_| PortError::Disconnected)?
    }

    pub async fn write(
        &self,
        verb: Verb,
        address: Address,
        value: RawValue,
    ) -> Result<(), PortError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send_async(Command::Write {
                verb,
                address,
                value,
                reply,
            })
            .await
            .map_err(|_| PortError::Disconnected)?;
        rx.await.map_err(|_| PortError::Disconnected)?
    }

    pub async fn reset(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send_async(Command::Reset { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn skip_slave(&self, slave_id: u8) {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send_async(Command::SkipSlave { slave_id, reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub async fn unskip_slave(&self, slave_id: u8) {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send_async(Command::UnskipSlave { slave_id, reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

#[derive(Default)]
struct FailureTracker {
    counters: HashMap<u8, u32>,
    skipped: std::collections::HashSet<u8>,
}

impl FailureTracker {
    fn record_success(&mut self, slave_id: u8) {
        self.counters.remove(&slave_id);
    }

    fn record_failure(&mut self, port_id: &str, slave_id: u8) {
        let count = self.counters.entry(slave_id).or_insert(0);
        *count += 1;
        if *count >= MAX_CONSECUTIVE_FAILURES && self.skipped.insert(slave_id) {
            warn!("port {port_id}: slave {slave_id} skipped after {count} consecutive timeouts");
        }
    }

    fn is_skipped(&self, slave_id: u8) -> bool {
        self.skipped.contains(&slave_id)
    }

    fn reset(&mut self) {
        self.counters.clear();
        self.skipped.clear();
    }
}

/// Spawns the worker task and returns a handle to it.
pub fn spawn(port_id: String, mut adapter: Box<dyn TransportAdapter>) -> PortHandle {
    let (tx, rx): (Sender<Command>, Receiver<Command>) = flume::unbounded();
    let handle = PortHandle {
        port_id: port_id.clone(),
        tx,
    };

    tokio::spawn(async move {
        let mut tracker = FailureTracker::default();
        while let Ok(cmd) = rx.recv_async().await {
            match cmd {
                Command::Read {
                    verb,
                    address,
                    register_span,
                    reply,
                } => {
                    let result = if tracker.is_skipped(address.slave_id) {
                        Err(PortError::Timeout)
                    } else {
                        let outcome = adapter.read(verb, address, register_span).await;
                        apply_outcome_to_tracker(&mut tracker, &port_id, address.slave_id, &outcome);
                        outcome
                    };
                    let _ = reply.send(result);
                }
                Command::Write {
                    verb,
                    address,
                    value,
                    reply,
                } => {
                    let result = if tracker.is_skipped(address.slave_id) {
                        Err(PortError::DeviceOfflineSkipped)
                    } else {
                        let outcome = adapter.write(verb, address, value).await;
                        apply_write_outcome_to_tracker(&mut tracker, &port_id, address.slave_id, &outcome);
                        outcome
                    };
                    let _ = reply.send(result);
                }
                Command::Reset { reply } => {
                    tracker.reset();
                    let _ = adapter.reconnect().await;
                    let _ = reply.send(());
                }
                Command::SkipSlave { slave_id, reply } => {
                    tracker.skipped.insert(slave_id);
                    let _ = reply.send(());
                }
                Command::UnskipSlave { slave_id, reply } => {
                    tracker.skipped.remove(&slave_id);
                    tracker.counters.remove(&slave_id);
                    let _ = reply.send(());
                }
            }
        }
    });

    handle
}

fn apply_outcome_to_tracker(
    tracker: &mut FailureTracker,
    port_id: &str,
    slave_id: u8,
    outcome: &Result<RawValue, PortError>,
) {
    match outcome {
        Ok(_) => tracker.record_success(slave_id),
        Err(err) if err.clone().normalize().counts_toward_skip() => {
            tracker.record_failure(port_id, slave_id)
        }
        Err(_) => {}
    }
}

fn apply_write_outcome_to_tracker(
    tracker: &mut FailureTracker,
    port_id: &str,
    slave_id: u8,
    outcome: &Result<(), PortError>,
) {
    match outcome {
        Ok(()) => tracker.record_success(slave_id),
        Err(err) if err.clone().normalize().counts_toward_skip() => {
            tracker.record_failure(port_id, slave_id)
        }
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::simulation::{SimulationAdapter, SimulationBus};

    #[tokio::test]
    async fn skips_slave_after_three_consecutive_timeouts() {
        let bus = SimulationBus::new();
        bus.set_offline(3, true);
        let handle = spawn("port-a".to_string(), Box::new(SimulationAdapter::new(bus)));
        let address = Address {
            slave_id: 3,
            register: 0,
            channel: Some(1),
        };

        for _ in 0..3 {
            let result = handle.read(Verb::ReadDiscreteInput, address, 1).await;
            assert_eq!(result, Err(PortError::Timeout));
        }
        // Fourth call must short-circuit without touching the adapter; the
        // simulator would return the same error either way, so this mainly
        // documents intended behavior rather than proving the short-circuit.
        let result = handle.read(Verb::ReadDiscreteInput, address, 1).await;
        assert_eq!(result, Err(PortError::Timeout));
    }

    #[tokio::test]
    async fn reset_clears_skip_set() {
        let bus = SimulationBus::new();
        bus.set_offline(5, true);
        let handle = spawn("port-b".to_string(), Box::new(SimulationAdapter::new(bus.clone())));
        let address = Address {
            slave_id: 5,
            register: 0,
            channel: Some(1),
        };
        for _ in 0..3 {
            let _ = handle.read(Verb::ReadDiscreteInput, address, 1).await;
        }
        handle.reset().await;
        bus.set_offline(5, false);
        bus.set_input(5, 0, true);
        let result = handle.read(Verb::ReadDiscreteInput, address, 1).await;
        assert_eq!(result, Ok(RawValue::Bit(true)));
    }
}
