//! Synchronous workspace event bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::host::{EventMask, ListenerFlow, SubscriptionToken, WorkspaceEvent, WorkspaceListener};

struct Registered {
	token: SubscriptionToken,
	mask: EventMask,
	listener: Arc<dyn WorkspaceListener>,
}

/// Dispatches [`WorkspaceEvent`]s to subscribed listeners.
///
/// Listeners run on the emitting thread, outside the bus lock, so they may
/// subscribe or unsubscribe while handling an event.
#[derive(Default)]
pub struct EventBus {
	listeners: Mutex<Vec<Registered>>,
	next_token: AtomicU64,
}

impl EventBus {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn subscribe(&self, mask: EventMask, listener: Arc<dyn WorkspaceListener>) -> SubscriptionToken {
		let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed) + 1);
		self.listeners.lock().push(Registered { token, mask, listener });
		token
	}

	pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
		let mut listeners = self.listeners.lock();
		let before = listeners.len();
		listeners.retain(|registered| registered.token != token);
		listeners.len() != before
	}

	/// Delivers `event` to every interested listener, dropping those that
	/// ask to unsubscribe. Returns the number of listeners notified.
	pub fn emit(&self, event: WorkspaceEvent) -> usize {
		let targets: Vec<_> = self
			.listeners
			.lock()
			.iter()
			.filter(|registered| registered.mask.wants(event))
			.map(|registered| (registered.token, Arc::clone(&registered.listener)))
			.collect();

		tracing::trace!(?event, listeners = targets.len(), "workspace.emit");

		let mut finished = Vec::new();
		for (token, listener) in &targets {
			if listener.on_event(event) == ListenerFlow::Unsubscribe {
				finished.push(*token);
			}
		}

		if !finished.is_empty() {
			self.listeners.lock().retain(|registered| !finished.contains(&registered.token));
		}
		targets.len()
	}

	pub fn len(&self) -> usize {
		self.listeners.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.listeners.lock().is_empty()
	}
}
