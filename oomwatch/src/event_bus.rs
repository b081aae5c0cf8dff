use crate::report::OomReport;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 128;

#[derive(Clone, Debug)]
pub enum ProbeEvent {
    /// A record was read from the shared table.
    OomCaptured(OomReport),
    /// Live keys reached the configured share of table capacity; new pids
    /// will be dropped by the probe once it is full.
    TableNearCapacity { live: usize, capacity: usize },
}

pub fn create_event_sender() -> broadcast::Sender<ProbeEvent> {
    let (tx, _rx_initial) = broadcast::channel(CHANNEL_CAPACITY);
    tx
}
