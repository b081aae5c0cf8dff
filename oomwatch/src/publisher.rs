use crate::event_bus::ProbeEvent;
use tokio::sync::broadcast;

pub trait Publisher {
    fn publish(&self, event: ProbeEvent) -> Result<usize, broadcast::error::SendError<ProbeEvent>>;
}
