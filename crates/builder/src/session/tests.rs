use std::time::Duration;

use super::*;
use crate::memory::MemoryWorkspace;
use crate::testing::{FakeLanguage, FakeTools, NATURE};

fn registry(tools: FakeTools) -> (Arc<MemoryWorkspace>, Arc<FakeTools>, SessionRegistry) {
	let workspace = Arc::new(MemoryWorkspace::new());
	let tools = Arc::new(tools);
	let registry = SessionRegistry::new(workspace.clone(), tools.clone());
	(workspace, tools, registry)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_begin_starts_once() {
	let (_workspace, tools, registry) = registry(FakeTools {
		start_delay: Some(Duration::from_millis(50)),
		..FakeTools::default()
	});

	let handles: Vec<_> = (0..8)
		.map(|_| {
			let registry = registry.clone();
			tokio::spawn(async move { registry.begin_if_needed(&FakeLanguage::default()).await })
		})
		.collect();

	let mut sessions = Vec::new();
	for handle in handles {
		sessions.push(handle.await.unwrap().unwrap());
	}

	assert_eq!(tools.starts(), 1);
	assert!(sessions.iter().all(|session| Arc::ptr_eq(session, &sessions[0])));
	assert_eq!(sessions[0].participants(), 8);
	assert_eq!(registry.active_count(), 1);
}

#[tokio::test]
async fn start_writes_banner_to_session_console() {
	let (_workspace, tools, registry) = registry(FakeTools::default());
	let session = registry.begin_if_needed(&FakeLanguage::default()).await.unwrap();

	assert_eq!(session.language(), NATURE);
	let transcript = tools.transcript(0);
	assert_eq!(transcript.len(), 3);
	assert!(transcript[1].contains("Starting Lang build"));
	assert!(transcript[0].chars().all(|c| c == '#'));
}

#[tokio::test]
async fn failed_start_registers_nothing() {
	let (workspace, tools, registry) = registry(FakeTools {
		fail_start: true,
		..FakeTools::default()
	});

	let err = registry.begin_if_needed(&FakeLanguage::default()).await.unwrap_err();

	assert!(err.message().contains("not found"));
	assert_eq!(tools.starts(), 1);
	assert_eq!(registry.active_count(), 0);
	assert_eq!(workspace.listener_count(), 0);
}

#[tokio::test]
async fn build_boundary_event_ends_session() {
	let (workspace, tools, registry) = registry(FakeTools::default());
	let first = registry.begin_if_needed(&FakeLanguage::default()).await.unwrap();
	assert_eq!(workspace.listener_count(), 1);

	// Clean and change events leave the session alone.
	workspace.emit(WorkspaceEvent::PreClean);
	workspace.emit(WorkspaceEvent::PostChange);
	assert!(registry.current(NATURE).is_some());

	workspace.emit(WorkspaceEvent::PostBuild);
	assert!(registry.current(NATURE).is_none());
	assert_eq!(workspace.listener_count(), 0);

	let second = registry.begin_if_needed(&FakeLanguage::default()).await.unwrap();
	assert_ne!(first.id(), second.id());
	assert_eq!(tools.starts(), 2);
}

#[tokio::test]
async fn end_is_idempotent_and_unsubscribes() {
	let (workspace, _tools, registry) = registry(FakeTools::default());
	let session = registry.begin_if_needed(&FakeLanguage::default()).await.unwrap();

	let ended = registry.end(NATURE).unwrap();
	assert_eq!(ended.id(), session.id());
	assert!(registry.end(NATURE).is_none());
	assert_eq!(workspace.listener_count(), 0);

	// Nothing left to tear down.
	assert_eq!(workspace.emit(WorkspaceEvent::PreBuild), 0);
}

#[tokio::test]
async fn listener_only_removes_its_own_session() {
	let (_workspace, _tools, registry) = registry(FakeTools::default());
	let stale = registry.begin_if_needed(&FakeLanguage::default()).await.unwrap();
	registry.end(NATURE);
	let current = registry.begin_if_needed(&FakeLanguage::default()).await.unwrap();

	let listener = SessionTeardown {
		registry: Arc::downgrade(&registry.inner),
		key: NATURE.to_owned(),
		session: stale.id(),
	};
	assert_eq!(listener.on_event(WorkspaceEvent::PreBuild), ListenerFlow::Unsubscribe);

	let live = registry.current(NATURE).unwrap();
	assert_eq!(live.id(), current.id());
}

#[tokio::test]
async fn shutdown_ends_everything() {
	let (workspace, _tools, registry) = registry(FakeTools::default());
	registry.begin_if_needed(&FakeLanguage::default()).await.unwrap();

	assert_eq!(registry.shutdown(), 1);
	assert_eq!(registry.active_count(), 0);
	assert_eq!(workspace.listener_count(), 0);
}

#[test]
fn only_build_boundaries_tear_down() {
	assert_eq!(teardown_for(WorkspaceEvent::PreBuild), Teardown::END);
	assert_eq!(teardown_for(WorkspaceEvent::PostBuild), Teardown::END);
	assert_eq!(teardown_for(WorkspaceEvent::PreClean), Teardown::KEEP);
	assert_eq!(teardown_for(WorkspaceEvent::PostChange), Teardown::KEEP);
}
