//! Event bus (C9, spec §4.9).
//!
//! The teacher's `core::bus::Bus` is a one-to-one channel pair between a UI
//! thread and a core worker. This core has many independent subscribers
//! (schedulers, the environment controller, future UI/alarm collaborators)
//! watching the same status stream, so the underlying primitive is
//! `tokio::sync::broadcast` instead of `flume`: genuine one-to-many
//! publish/subscribe, with `RecvError::Lagged` giving the drop-oldest
//! backpressure behaviour spec §4.9 asks for.

use tokio::sync::broadcast;

/// Stable event topics/payloads carried on the bus (spec §6: "topics and
/// payload shapes are stable; the core neither offers nor assumes a wire
/// encoding"). Covers the six topics spec §4.9 names: `data_point_updated`,
/// `equipment_status`, `interlock_rules`, `environment_config`,
/// `failsafe_status`, `port_status`.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// A data point's cached value changed, or it crossed the ok/error
    /// boundary (spec §4.3). Topic `data_point_updated`.
    DataPointUpdated { name: String },
    /// An equipment controller's status changed in a way its kind surfaces
    /// (mode, commanded state, feedback, or error). Topic `equipment_status`.
    EquipmentStatusChanged { equipment: String },
    /// The interlock engine issued (or would have issued, had it not failed
    /// open) a cascade stop.
    InterlockCascadeStop {
        upstream: String,
        downstream: String,
    },
    /// The environment controller committed a new active step.
    EnvironmentStepChanged { step_index: usize },
    /// A configuration reload was applied. Topics `interlock_rules` /
    /// `environment_config` and the other tables share this variant,
    /// distinguished by `table`, since a reload replaces the whole snapshot
    /// atomically (spec §4.8).
    ConfigReloaded { table: ConfigTable },
    /// The count of MANUAL-mode fans standing in for the failsafe floor
    /// changed relative to what's configured. Topic `failsafe_status`.
    FailsafeStatusChanged { manual_running: u32, configured: u32 },
    /// A port's connectivity changed. Topic `port_status`.
    PortStatusChanged { port_id: String, connected: bool },
}

/// A configuration table, carried on [`BusEvent::ConfigReloaded`] so
/// subscribers watching one topic (e.g. `interlock_rules`) can ignore
/// reloads of tables they don't care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigTable {
    Ports,
    DataPoints,
    Equipment,
    InterlockRules,
    Environment,
    Auxiliary,
}

const CHANNEL_CAPACITY: usize = 1024;

/// Cloneable handle to the shared broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. Errors only when there are no subscribers, which
    /// is not a failure worth surfacing — the event is simply dropped.
    pub fn publish(&self, event: BusEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(BusEvent::ConfigReloaded {
            table: ConfigTable::Equipment,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            BusEvent::ConfigReloaded {
                table: ConfigTable::Equipment,
            }
        );
    }

    #[tokio::test]
    async fn multiple_subscribers_all_see_the_same_event() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(BusEvent::PortStatusChanged {
            port_id: "p1".to_string(),
            connected: true,
        });
        assert_eq!(a.recv().await.unwrap(), b.recv().await.unwrap());
    }
}
