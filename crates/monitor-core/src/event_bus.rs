//! Broadcast bus for monitor events.
//!
//! Observers subscribe to receive per-poll status updates and terminal
//! outcomes. Publishing is fire-and-forget: a bus with no subscribers drops
//! events, and a slow subscriber misses events rather than exerting
//! backpressure on the poll tasks.

use monitor_types::MonitorEvent;
use tokio::sync::broadcast;

/// Cloneable handle to the monitor's event channel.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
	/// Creates an event bus buffering up to `capacity` events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Publishes an event to all current subscribers.
	///
	/// Returns an error when there are no subscribers; callers treat that
	/// as a non-event.
	pub fn publish(
		&self,
		event: MonitorEvent,
	) -> Result<usize, broadcast::error::SendError<MonitorEvent>> {
		self.sender.send(event)
	}

	/// Creates a new subscription receiving events published from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
		self.sender.subscribe()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1000)
	}
}
