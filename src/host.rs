//! Host runtime seams
//!
//! The inspector never touches frames directly. Everything it needs from the
//! browser goes through [`FrameHost`]; pixel capture goes through
//! [`ScreenCapture`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::frame::FrameArena;
use crate::protocol::ScreenshotRequest;

/// Stable identity of a top-level browsing context
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registration token for a navigation listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Where a script was executed, so follow-up scripts can run in the same place
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionHandle {
    pub frame_id: String,
    /// Host execution context, when the host distinguishes them
    pub context_id: Option<i64>,
}

/// Browser-side operations the coordinator depends on
#[async_trait]
pub trait FrameHost: Send + Sync {
    /// Fresh snapshot of the context's frame tree
    async fn frame_tree(&self, context: &ContextId) -> Result<FrameArena>;

    /// Whether a frame has gone away since the last snapshot
    async fn is_frame_destroyed(&self, context: &ContextId, frame_id: &str) -> bool;

    /// Whether the top-level context itself is gone
    async fn is_context_destroyed(&self, context: &ContextId) -> bool;

    /// Current URL of a frame, if it still exists
    async fn frame_url(&self, context: &ContextId, frame_id: &str) -> Option<String>;

    /// Run a script inside a frame
    async fn inject(
        &self,
        context: &ContextId,
        frame_id: &str,
        script: &str,
    ) -> Result<InjectionHandle>;

    /// Run a follow-up script where an earlier injection ran
    async fn evaluate(&self, handle: &InjectionHandle, script: &str) -> Result<()>;

    /// Start receiving navigation events for the context
    async fn add_navigation_listener(&self, context: &ContextId) -> ListenerId;

    async fn remove_navigation_listener(&self, context: &ContextId, listener: ListenerId);

    /// Tell the context that its session was cancelled by navigation
    async fn notify_cancelled(&self, context: &ContextId, frame_url: &str);
}

/// Screen-capture capability of the host process
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Capture the region described by a relayed request, returning PNG bytes
    async fn capture(&self, request: &ScreenshotRequest) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: FrameHost + ?Sized> FrameHost for Arc<T> {
    async fn frame_tree(&self, context: &ContextId) -> Result<FrameArena> {
        (**self).frame_tree(context).await
    }

    async fn is_frame_destroyed(&self, context: &ContextId, frame_id: &str) -> bool {
        (**self).is_frame_destroyed(context, frame_id).await
    }

    async fn is_context_destroyed(&self, context: &ContextId) -> bool {
        (**self).is_context_destroyed(context).await
    }

    async fn frame_url(&self, context: &ContextId, frame_id: &str) -> Option<String> {
        (**self).frame_url(context, frame_id).await
    }

    async fn inject(
        &self,
        context: &ContextId,
        frame_id: &str,
        script: &str,
    ) -> Result<InjectionHandle> {
        (**self).inject(context, frame_id, script).await
    }

    async fn evaluate(&self, handle: &InjectionHandle, script: &str) -> Result<()> {
        (**self).evaluate(handle, script).await
    }

    async fn add_navigation_listener(&self, context: &ContextId) -> ListenerId {
        (**self).add_navigation_listener(context).await
    }

    async fn remove_navigation_listener(&self, context: &ContextId, listener: ListenerId) {
        (**self).remove_navigation_listener(context, listener).await
    }

    async fn notify_cancelled(&self, context: &ContextId, frame_url: &str) {
        (**self).notify_cancelled(context, frame_url).await
    }
}
