//! Workspace build sessions.
//!
//! A workspace build pass may build many projects of one language. They all
//! share one [`BuildSession`], keyed by the language's nature id, so the
//! console shows a single banner and a single transcript for the pass.
//!
//! The session is created by the first project build that needs it and torn
//! down by whichever of these happens first:
//!
//! 1. the next `PreBuild` or `PostBuild` workspace event, through a
//!    listener registered when the session was created;
//! 2. [`SessionRegistry::end`], called by the last project of the language
//!    in the pass.
//!
//! The other path then finds nothing to do.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use kiln_ops::text::header_very_big;
use kiln_ops::{CommonError, ToolOperationMonitor};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::host::{EventMask, Language, ListenerFlow, SubscriptionToken, ToolManager, Workspace, WorkspaceEvent, WorkspaceListener};

/// Identifies one session instance. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "session#{}", self.0)
	}
}

/// One active workspace build pass for a language.
#[derive(Debug)]
pub struct BuildSession {
	id: SessionId,
	language: String,
	console: Arc<dyn ToolOperationMonitor>,
	participants: AtomicUsize,
	subscription: Mutex<Option<SubscriptionToken>>,
}

impl BuildSession {
	fn new(id: SessionId, language: String, console: Arc<dyn ToolOperationMonitor>) -> Self {
		Self {
			id,
			language,
			console,
			participants: AtomicUsize::new(1),
			subscription: Mutex::new(None),
		}
	}

	pub fn id(&self) -> SessionId {
		self.id
	}

	/// Nature id of the language this session builds.
	pub fn language(&self) -> &str {
		&self.language
	}

	/// Console shared by every build in the session.
	pub fn console(&self) -> Arc<dyn ToolOperationMonitor> {
		Arc::clone(&self.console)
	}

	/// Number of project builds that created or joined this session.
	pub fn participants(&self) -> usize {
		self.participants.load(Ordering::Acquire)
	}

	fn join(&self) {
		self.participants.fetch_add(1, Ordering::AcqRel);
	}
}

/// What a session listener does in response to a workspace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Teardown {
	pub unsubscribe: bool,
	pub clear_session: bool,
}

impl Teardown {
	pub const KEEP: Self = Self {
		unsubscribe: false,
		clear_session: false,
	};
	pub const END: Self = Self {
		unsubscribe: true,
		clear_session: true,
	};
}

/// Decides how a session reacts to `event`.
///
/// Any build boundary ends the session: a `PreBuild` means a new pass is
/// starting and a `PostBuild` means this one is over.
pub fn teardown_for(event: WorkspaceEvent) -> Teardown {
	match event {
		WorkspaceEvent::PreBuild | WorkspaceEvent::PostBuild => Teardown::END,
		WorkspaceEvent::PreClean | WorkspaceEvent::PostChange => Teardown::KEEP,
	}
}

struct RegistryInner {
	sessions: RwLock<HashMap<String, Arc<BuildSession>>>,
	/// Serializes session creation per language key.
	gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
	workspace: Arc<dyn Workspace>,
	tools: Arc<dyn ToolManager>,
	next_id: AtomicU64,
}

impl RegistryInner {
	fn get(&self, key: &str) -> Option<Arc<BuildSession>> {
		self.sessions.read().get(key).cloned()
	}

	fn gate(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
		Arc::clone(self.gates.lock().entry(key.to_owned()).or_default())
	}

	/// Removes the session under `key` only if it is still instance `id`.
	fn remove_instance(&self, key: &str, id: SessionId) -> Option<Arc<BuildSession>> {
		let mut sessions = self.sessions.write();
		if sessions.get(key).is_some_and(|session| session.id == id) {
			sessions.remove(key)
		} else {
			None
		}
	}
}

/// Ends the session it was registered for at the next build boundary.
struct SessionTeardown {
	registry: Weak<RegistryInner>,
	key: String,
	session: SessionId,
}

impl WorkspaceListener for SessionTeardown {
	fn on_event(&self, event: WorkspaceEvent) -> ListenerFlow {
		let teardown = teardown_for(event);
		if teardown.clear_session
			&& let Some(registry) = self.registry.upgrade()
			&& let Some(session) = registry.remove_instance(&self.key, self.session)
		{
			session.subscription.lock().take();
			info!(language = %self.key, session = %self.session, ?event, participants = session.participants(), "build session ended by workspace event");
		}
		if teardown.unsubscribe { ListenerFlow::Unsubscribe } else { ListenerFlow::Continue }
	}
}

/// Registry of live build sessions, at most one per language.
///
/// Thread-safe; clones share the same registry.
///
/// # Concurrency
///
/// - `sessions`: `RwLock` for the common join path
/// - `gates`: one async mutex per key so exactly one caller starts the tool
///   operation while concurrent callers wait and then join the result
#[derive(Clone)]
pub struct SessionRegistry {
	inner: Arc<RegistryInner>,
}

impl SessionRegistry {
	pub fn new(workspace: Arc<dyn Workspace>, tools: Arc<dyn ToolManager>) -> Self {
		Self {
			inner: Arc::new(RegistryInner {
				sessions: RwLock::new(HashMap::new()),
				gates: Mutex::new(HashMap::new()),
				workspace,
				tools,
				next_id: AtomicU64::new(0),
			}),
		}
	}

	/// Returns the live session for the language, creating it if needed.
	///
	/// Creation starts a tool build operation, subscribes the session to the
	/// next build boundary event and writes the start banner to its console.
	///
	/// # Errors
	///
	/// Fails if the tool manager cannot start a build operation, in which
	/// case no session is registered.
	pub async fn begin_if_needed<L>(&self, language: &L) -> Result<Arc<BuildSession>, CommonError>
	where
		L: Language + ?Sized,
	{
		let key = language.nature_id();

		if let Some(session) = self.join_existing(key) {
			return Ok(session);
		}

		let gate = self.inner.gate(key);
		let _leader = gate.lock().await;

		// Another caller may have created it while we waited.
		if let Some(session) = self.join_existing(key) {
			return Ok(session);
		}

		let console = self.inner.tools.start_new_build_operation().await?;
		let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
		let session = Arc::new(BuildSession::new(id, key.to_owned(), console));
		self.inner.sessions.write().insert(key.to_owned(), Arc::clone(&session));

		let token = self.inner.workspace.subscribe(
			EventMask::PRE_BUILD | EventMask::POST_BUILD,
			Arc::new(SessionTeardown {
				registry: Arc::downgrade(&self.inner),
				key: key.to_owned(),
				session: id,
			}),
		);
		*session.subscription.lock() = Some(token);

		session
			.console
			.write_info_message(&header_very_big(&format!("Starting {} build", language.name())));
		info!(language = %key, session = %id, "build session started");
		Ok(session)
	}

	fn join_existing(&self, key: &str) -> Option<Arc<BuildSession>> {
		let session = self.inner.get(key)?;
		session.join();
		debug!(language = %key, session = %session.id, participants = session.participants(), "joined build session");
		Some(session)
	}

	/// Ends the live session for `key`, if any.
	pub fn end(&self, key: &str) -> Option<Arc<BuildSession>> {
		let session = self.inner.sessions.write().remove(key)?;
		if let Some(token) = session.subscription.lock().take() {
			self.inner.workspace.unsubscribe(token);
		}
		info!(language = %key, session = %session.id, participants = session.participants(), "build session ended");
		Some(session)
	}

	/// Returns the live session for `key` without joining it.
	pub fn current(&self, key: &str) -> Option<Arc<BuildSession>> {
		self.inner.get(key)
	}

	pub fn active_count(&self) -> usize {
		self.inner.sessions.read().len()
	}

	/// Ends every live session. Returns how many were ended.
	pub fn shutdown(&self) -> usize {
		let keys: Vec<String> = self.inner.sessions.read().keys().cloned().collect();
		keys.iter().filter(|key| self.end(key).is_some()).count()
	}
}

#[cfg(test)]
mod tests;
