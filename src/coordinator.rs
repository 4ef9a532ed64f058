//! Inspection session coordination
//!
//! At most one session is live per top-level context. Starting a new one
//! stops the old one first; navigation stops it automatically and tells the
//! context it was cancelled.
//!
//! ```text
//! Idle -> Selecting -> Active -> (Stopped | Superseded | NavigatedAway) -> Idle
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::flatten;
use crate::host::{ContextId, FrameHost, InjectionHandle, ListenerId};
use crate::relay::install_relays;
use crate::script;
use crate::selector::{FrameSelector, MatchTier, SelectionPayload};
use crate::InspectorConfig;

/// Lifecycle phase of a context's session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Selecting,
    Active,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Stopped,
    Superseded,
    NavigatedAway,
}

/// Result of starting or stopping a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub frame_url: String,
}

/// A live inspection session
#[derive(Debug, Clone)]
pub struct InspectorSession {
    pub frame_id: String,
    /// Frame URL at the time the session started
    pub frame_url: Option<String>,
    pub requested_url: Option<String>,
    pub tier: MatchTier,
    pub overlay: InjectionHandle,
    pub listener: Option<ListenerId>,
}

/// Owns the session registry and drives the host through session transitions
pub struct Coordinator<H> {
    host: H,
    config: InspectorConfig,
    sessions: HashMap<ContextId, InspectorSession>,
    last_stop: HashMap<ContextId, StopReason>,
}

impl<H: FrameHost> Coordinator<H> {
    pub fn new(host: H, config: InspectorConfig) -> Self {
        Self {
            host,
            config,
            sessions: HashMap::new(),
            last_stop: HashMap::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    pub fn session(&self, context: &ContextId) -> Option<&InspectorSession> {
        self.sessions.get(context)
    }

    /// Why the context's most recent session ended
    pub fn last_stop(&self, context: &ContextId) -> Option<StopReason> {
        self.last_stop.get(context).copied()
    }

    /// Only `Idle` or `Active`: `Selecting` lasts as long as the mutable borrow
    /// held by [`start_session`](Self::start_session).
    /// [`PageInspector::state`](crate::PageInspector::state) reports it to
    /// concurrent callers.
    pub fn state(&self, context: &ContextId) -> SessionState {
        if self.sessions.contains_key(context) {
            SessionState::Active
        } else {
            SessionState::Idle
        }
    }

    /// Select a frame and start inspecting it.
    ///
    /// An existing session for the same context is stopped first.
    pub async fn start_session(
        &mut self,
        context: &ContextId,
        payload: &SelectionPayload,
    ) -> Result<SessionInfo> {
        if self.sessions.contains_key(context) {
            self.stop_with(context, StopReason::Superseded).await;
        }

        transition(context, SessionState::Idle, SessionState::Selecting);
        let arena = match self.host.frame_tree(context).await {
            Ok(arena) => arena,
            Err(e) => {
                transition(context, SessionState::Selecting, SessionState::Idle);
                return Err(e);
            }
        };
        let frames = flatten(&arena, arena.root());
        let selection = FrameSelector::new(&arena, &frames).select(payload);
        let Some((selection, target)) =
            selection.and_then(|s| arena.get(s.node).map(|node| (s, node)))
        else {
            transition(context, SessionState::Selecting, SessionState::Idle);
            return Err(Error::NoTarget);
        };

        // Relays carry overlay messages to the host, so they go in even when
        // screenshots are off
        let relay = script::relay(self.config.relay_screenshots)?;
        install_relays(&self.host, context, &arena, selection.node, &relay).await;

        let overlay = script::overlay(&self.config)?;
        let handle = match self.host.inject(context, &target.id, &overlay).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(context = %context, frame_id = %target.id, "Overlay injection failed: {}", e);
                transition(context, SessionState::Selecting, SessionState::Idle);
                return Err(e);
            }
        };

        let listener = if self.host.is_context_destroyed(context).await {
            None
        } else {
            Some(self.host.add_navigation_listener(context).await)
        };

        let frame_url = target
            .url
            .clone()
            .or_else(|| payload.frame_url.clone())
            .unwrap_or_default();

        self.sessions.insert(
            context.clone(),
            InspectorSession {
                frame_id: target.id.clone(),
                frame_url: target.url.clone(),
                requested_url: payload.frame_url.clone(),
                tier: selection.tier,
                overlay: handle,
                listener,
            },
        );
        transition(context, SessionState::Selecting, SessionState::Active);
        tracing::info!(context = %context, frame_id = %target.id, url = %frame_url, tier = ?selection.tier, "Inspector session started");

        Ok(SessionInfo { frame_url })
    }

    /// Stop the context's session. A no-op when none is active.
    pub async fn stop_session(&mut self, context: &ContextId) -> SessionInfo {
        self.stop_with(context, StopReason::Stopped).await
    }

    /// React to a navigation event delivered to `listener`.
    ///
    /// Events for listeners that no longer belong to the live session are
    /// ignored. Returns the stop result when the session was cancelled.
    pub async fn handle_navigation(
        &mut self,
        context: &ContextId,
        listener: ListenerId,
    ) -> Option<SessionInfo> {
        let session = self.sessions.get(context)?;
        if session.listener != Some(listener) {
            tracing::trace!(context = %context, ?listener, "Ignoring stale navigation listener");
            return None;
        }
        let fallback = session
            .frame_url
            .clone()
            .or_else(|| session.requested_url.clone())
            .unwrap_or_default();

        let outcome = self.stop_with(context, StopReason::NavigatedAway).await;
        let frame_url = if outcome.frame_url.is_empty() {
            fallback
        } else {
            outcome.frame_url.clone()
        };

        if !self.host.is_context_destroyed(context).await {
            self.host.notify_cancelled(context, &frame_url).await;
        }
        Some(SessionInfo { frame_url })
    }

    async fn stop_with(&mut self, context: &ContextId, reason: StopReason) -> SessionInfo {
        let Some(session) = self.sessions.remove(context) else {
            return SessionInfo::default();
        };

        if let Some(listener) = session.listener {
            if !self.host.is_context_destroyed(context).await {
                self.host.remove_navigation_listener(context, listener).await;
            }
        }

        let frame_url = self
            .host
            .frame_url(context, &session.frame_id)
            .await
            .or(session.frame_url)
            .unwrap_or_default();

        if let Err(e) = self.host.evaluate(&session.overlay, script::STOP_OVERLAY).await {
            tracing::debug!(context = %context, frame_id = %session.frame_id, "Overlay stop skipped: {}", e);
        }

        tracing::info!(context = %context, ?reason, url = %frame_url, "Inspector session stopped");
        self.last_stop.insert(context.clone(), reason);
        transition(context, SessionState::Active, SessionState::Idle);
        SessionInfo { frame_url }
    }
}

fn transition(context: &ContextId, from: SessionState, to: SessionState) {
    tracing::debug!(context = %context, ?from, ?to, "Inspector state");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameArena, FrameName};
    use crate::host::mock::MockHost;

    fn arena() -> FrameArena {
        let mut arena = FrameArena::new();
        let top = arena.push(None, "top", Some("http://host/"), FrameName::Unnamed);
        arena.push(Some(top), "app", Some("http://app/page"), FrameName::from_option(Some("app")));
        arena
    }

    fn coordinator() -> Coordinator<MockHost> {
        Coordinator::new(MockHost::with_arena(arena()), InspectorConfig::default())
    }

    fn by_name(name: &str) -> SelectionPayload {
        SelectionPayload {
            frame_name: Some(name.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_injects_relays_then_overlay() {
        let mut coordinator = coordinator();
        let ctx = ContextId::new("tab-1");

        let info = coordinator.start_session(&ctx, &by_name("app")).await.unwrap();
        assert_eq!(info.frame_url, "http://app/page");
        assert_eq!(coordinator.state(&ctx), SessionState::Active);

        let state = coordinator.host().state.lock().unwrap();
        let frames: Vec<_> = state.injections.iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(frames, ["top", "app", "app"]);
        assert!(state.injections[2].1.contains("__PINOKIO_INSPECTOR__"));
        assert_eq!(state.listeners.len(), 1);
    }

    #[tokio::test]
    async fn test_messages_reach_host_without_screenshots() {
        let mut coordinator = Coordinator::new(MockHost::with_arena(arena()), InspectorConfig::minimal());
        let ctx = ContextId::new("tab-1");
        coordinator.start_session(&ctx, &by_name("app")).await.unwrap();
        assert_eq!(coordinator.host().injected_frames(), ["top", "app", "app"]);

        let state = coordinator.host().state.lock().unwrap();
        let top_relay = &state.injections[0].1;
        assert!(top_relay.contains(script::BRIDGE_BINDING));
        assert!(top_relay.contains("const FORWARD_SCREENSHOTS = false;"));
    }

    #[tokio::test]
    async fn test_no_target_stays_idle() {
        let mut coordinator = Coordinator::new(MockHost::default(), InspectorConfig::default());
        let ctx = ContextId::new("tab-1");

        let err = coordinator.start_session(&ctx, &by_name("app")).await.unwrap_err();
        assert!(matches!(err, Error::NoTarget));
        assert_eq!(coordinator.state(&ctx), SessionState::Idle);
        assert!(coordinator.host().state.lock().unwrap().listeners.is_empty());
    }

    #[tokio::test]
    async fn test_overlay_injection_failure_is_fatal() {
        let host = MockHost::with_arena(arena());
        host.refuse("app");
        let mut coordinator = Coordinator::new(host, InspectorConfig::default());
        let ctx = ContextId::new("tab-1");

        let err = coordinator.start_session(&ctx, &by_name("app")).await.unwrap_err();
        assert!(matches!(err, Error::Injection { .. }));
        assert_eq!(coordinator.state(&ctx), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_stop_without_session_is_noop() {
        let mut coordinator = coordinator();
        let info = coordinator.stop_session(&ContextId::new("tab-1")).await;
        assert_eq!(info, SessionInfo::default());
        assert!(coordinator.host().state.lock().unwrap().evaluations.is_empty());
    }

    #[tokio::test]
    async fn test_stop_runs_overlay_stop_and_removes_listener() {
        let mut coordinator = coordinator();
        let ctx = ContextId::new("tab-1");
        coordinator.start_session(&ctx, &by_name("app")).await.unwrap();

        let info = coordinator.stop_session(&ctx).await;
        assert_eq!(info.frame_url, "http://app/page");
        assert_eq!(coordinator.state(&ctx), SessionState::Idle);

        let state = coordinator.host().state.lock().unwrap();
        assert!(state.listeners.is_empty());
        assert_eq!(state.evaluations.len(), 1);
        assert_eq!(state.evaluations[0].0.frame_id, "app");
        assert_eq!(state.evaluations[0].1, script::STOP_OVERLAY);
    }

    #[tokio::test]
    async fn test_stop_tolerates_destroyed_frame() {
        let mut coordinator = coordinator();
        let ctx = ContextId::new("tab-1");
        coordinator.start_session(&ctx, &by_name("app")).await.unwrap();
        coordinator.host().destroy("app");

        let info = coordinator.stop_session(&ctx).await;
        assert_eq!(info.frame_url, "http://app/page");
        assert_eq!(coordinator.state(&ctx), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_second_start_supersedes_first() {
        let mut coordinator = coordinator();
        let ctx = ContextId::new("tab-1");

        coordinator.start_session(&ctx, &by_name("app")).await.unwrap();
        let first = coordinator.session(&ctx).unwrap().listener.unwrap();

        coordinator
            .start_session(&ctx, &SelectionPayload::for_url("http://host/"))
            .await
            .unwrap();
        let second = coordinator.session(&ctx).unwrap().listener.unwrap();
        assert_ne!(first, second);
        assert_eq!(coordinator.session(&ctx).unwrap().frame_id, "top");

        let state = coordinator.host().state.lock().unwrap();
        assert_eq!(state.removed, [first]);
        assert_eq!(state.listeners, [second]);
        // The old overlay was told to stop
        assert_eq!(state.evaluations.len(), 1);
    }

    #[tokio::test]
    async fn test_navigation_cancels_exactly_once() {
        let mut coordinator = coordinator();
        let ctx = ContextId::new("tab-1");
        coordinator.start_session(&ctx, &by_name("app")).await.unwrap();
        let listener = coordinator.session(&ctx).unwrap().listener.unwrap();

        let outcome = coordinator.handle_navigation(&ctx, listener).await;
        assert_eq!(outcome.unwrap().frame_url, "http://app/page");
        assert!(coordinator.session(&ctx).is_none());

        // A duplicate event (e.g. in-page navigation right after) is ignored
        assert!(coordinator.handle_navigation(&ctx, listener).await.is_none());

        let state = coordinator.host().state.lock().unwrap();
        assert_eq!(state.cancelled, ["http://app/page"]);
        assert_eq!(state.removed, [listener]);
    }

    #[tokio::test]
    async fn test_stale_listener_is_ignored() {
        let mut coordinator = coordinator();
        let ctx = ContextId::new("tab-1");
        coordinator.start_session(&ctx, &by_name("app")).await.unwrap();
        let first = coordinator.session(&ctx).unwrap().listener.unwrap();
        coordinator.start_session(&ctx, &by_name("app")).await.unwrap();

        assert!(coordinator.handle_navigation(&ctx, first).await.is_none());
        assert_eq!(coordinator.state(&ctx), SessionState::Active);
        assert!(coordinator.host().state.lock().unwrap().cancelled.is_empty());
    }

    #[tokio::test]
    async fn test_last_stop_reason() {
        let mut coordinator = coordinator();
        let ctx = ContextId::new("tab-1");
        assert_eq!(coordinator.last_stop(&ctx), None);

        coordinator.start_session(&ctx, &by_name("app")).await.unwrap();
        coordinator.start_session(&ctx, &by_name("app")).await.unwrap();
        assert_eq!(coordinator.last_stop(&ctx), Some(StopReason::Superseded));

        let listener = coordinator.session(&ctx).unwrap().listener.unwrap();
        coordinator.handle_navigation(&ctx, listener).await.unwrap();
        assert_eq!(coordinator.last_stop(&ctx), Some(StopReason::NavigatedAway));

        coordinator.start_session(&ctx, &by_name("app")).await.unwrap();
        coordinator.stop_session(&ctx).await;
        assert_eq!(coordinator.last_stop(&ctx), Some(StopReason::Stopped));

        // A no-op stop leaves the record alone
        coordinator.stop_session(&ctx).await;
        assert_eq!(coordinator.last_stop(&ctx), Some(StopReason::Stopped));
    }

    #[tokio::test]
    async fn test_sessions_are_per_context() {
        let mut coordinator = coordinator();
        let a = ContextId::new("tab-a");
        let b = ContextId::new("tab-b");
        coordinator.start_session(&a, &by_name("app")).await.unwrap();
        coordinator.start_session(&b, &by_name("app")).await.unwrap();

        coordinator.stop_session(&a).await;
        assert_eq!(coordinator.state(&a), SessionState::Idle);
        assert_eq!(coordinator.state(&b), SessionState::Active);
    }

    #[tokio::test]
    async fn test_no_notification_when_context_destroyed() {
        let mut coordinator = coordinator();
        let ctx = ContextId::new("tab-1");
        coordinator.start_session(&ctx, &by_name("app")).await.unwrap();
        let listener = coordinator.session(&ctx).unwrap().listener.unwrap();
        *coordinator.host().context_destroyed.lock().unwrap() = true;

        assert!(coordinator.handle_navigation(&ctx, listener).await.is_some());
        let state = coordinator.host().state.lock().unwrap();
        assert!(state.cancelled.is_empty());
        assert!(state.removed.is_empty());
    }
}
