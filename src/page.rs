//! Page Abstraction
//!
//! A browser tab seen as an inspection host. Scripts run in a dedicated
//! isolated world per frame so page scripts can neither see nor clobber them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cdp::types::Viewport;
use crate::cdp::Session;
use crate::error::{Error, Result};
use crate::frame::FrameArena;
use crate::host::{ContextId, FrameHost, InjectionHandle, ListenerId, ScreenCapture};
use crate::protocol::{CancelledNotice, ScreenshotRequest};
use crate::script;

/// A browser tab
pub struct Page {
    session: Session,
    context: ContextId,
    /// Isolated world per frame id
    worlds: Mutex<HashMap<String, i64>>,
    listeners: std::sync::Mutex<Vec<ListenerId>>,
    next_listener: AtomicU64,
    closed: AtomicBool,
}

impl Page {
    /// Wrap an attached session, enabling the domains the inspector needs
    pub(crate) async fn attach(session: Session) -> Result<Self> {
        session.page_enable().await?;
        session.runtime_enable().await?;
        session
            .add_binding(script::BRIDGE_BINDING, Some(script::WORLD_NAME))
            .await?;

        let context = ContextId::new(session.target_id());
        Ok(Self {
            session,
            context,
            worlds: Mutex::new(HashMap::new()),
            listeners: std::sync::Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Get the underlying CDP session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Identity of this tab as an inspection context
    pub fn context(&self) -> &ContextId {
        &self.context
    }

    /// Navigate to a URL
    pub async fn goto(&self, url: &str) -> Result<()> {
        let result = self.session.navigate(url).await?;
        if let Some(error) = result.error_text {
            return Err(Error::cdp("Page.navigate", -1, error));
        }
        Ok(())
    }

    /// Poll `document.readyState` until the main document is loaded
    pub async fn wait_for_load(&self, timeout: std::time::Duration) -> Result<()> {
        let start = std::time::Instant::now();
        loop {
            if let Ok(result) = self.session.evaluate("document.readyState").await {
                if result.result.value.as_ref().and_then(|v| v.as_str()) == Some("complete") {
                    return Ok(());
                }
            }
            if start.elapsed() > timeout {
                return Err(Error::Timeout(format!(
                    "Page did not load within {}ms",
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    /// Currently registered navigation listeners
    pub fn listeners(&self) -> Vec<ListenerId> {
        self.listeners
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    /// Forget cached worlds for a frame whose document was replaced
    pub async fn forget_frame(&self, frame_id: &str) {
        self.worlds.lock().await.remove(frame_id);
    }

    /// Mark the tab as gone; later host calls treat the context as destroyed
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run a script in the isolated world of the execution context `context_id`
    pub async fn evaluate_in_context(&self, context_id: i64, script: &str) -> Result<()> {
        self.session.evaluate_in(script, Some(context_id)).await?;
        Ok(())
    }

    fn owns(&self, context: &ContextId) -> bool {
        *context == self.context
    }

    async fn world(&self, frame_id: &str) -> Result<i64> {
        if let Some(id) = self.worlds.lock().await.get(frame_id) {
            return Ok(*id);
        }
        let id = self
            .session
            .create_isolated_world(frame_id, script::WORLD_NAME)
            .await
            .map_err(|e| Error::injection(frame_id, e.to_string()))?;
        self.worlds.lock().await.insert(frame_id.to_string(), id);
        Ok(id)
    }

    async fn run_in_frame(&self, frame_id: &str, source: &str) -> Result<i64> {
        let id = self.world(frame_id).await?;
        match self.session.evaluate_in(source, Some(id)).await {
            Ok(_) => Ok(id),
            Err(e) if e.is_frame_gone() => {
                // The frame navigated and took its world with it
                tracing::debug!(frame_id, "Isolated world gone, recreating");
                self.forget_frame(frame_id).await;
                let id = self.world(frame_id).await?;
                self.session
                    .evaluate_in(source, Some(id))
                    .await
                    .map_err(|e| Error::injection(frame_id, e.to_string()))?;
                Ok(id)
            }
            Err(e) => Err(Error::injection(frame_id, e.to_string())),
        }
    }

    async fn snapshot(&self) -> Option<FrameArena> {
        if self.is_closed() {
            return None;
        }
        match self.session.get_frame_tree().await {
            Ok(tree) => Some(FrameArena::from_cdp(&tree)),
            Err(e) => {
                tracing::debug!("Frame tree unavailable: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl FrameHost for Page {
    async fn frame_tree(&self, context: &ContextId) -> Result<FrameArena> {
        if !self.owns(context) || self.is_closed() {
            return Ok(FrameArena::new());
        }
        let tree = self.session.get_frame_tree().await?;
        Ok(FrameArena::from_cdp(&tree))
    }

    async fn is_frame_destroyed(&self, context: &ContextId, frame_id: &str) -> bool {
        if !self.owns(context) {
            return true;
        }
        match self.snapshot().await {
            Some(arena) => arena.find_by_id(frame_id).is_none(),
            None => true,
        }
    }

    async fn is_context_destroyed(&self, context: &ContextId) -> bool {
        !self.owns(context) || self.is_closed()
    }

    async fn frame_url(&self, context: &ContextId, frame_id: &str) -> Option<String> {
        if !self.owns(context) {
            return None;
        }
        let arena = self.snapshot().await?;
        let index = arena.find_by_id(frame_id)?;
        arena.get(index).and_then(|node| node.url.clone())
    }

    async fn inject(
        &self,
        context: &ContextId,
        frame_id: &str,
        script: &str,
    ) -> Result<InjectionHandle> {
        if !self.owns(context) {
            return Err(Error::injection(frame_id, format!("unknown context {}", context)));
        }
        let id = self.run_in_frame(frame_id, script).await?;
        Ok(InjectionHandle {
            frame_id: frame_id.to_string(),
            context_id: Some(id),
        })
    }

    async fn evaluate(&self, handle: &InjectionHandle, script: &str) -> Result<()> {
        self.session
            .evaluate_in(script, handle.context_id)
            .await
            .map_err(|e| Error::injection(&handle.frame_id, e.to_string()))?;
        Ok(())
    }

    async fn add_navigation_listener(&self, _context: &ContextId) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(id);
        }
        id
    }

    async fn remove_navigation_listener(&self, _context: &ContextId, listener: ListenerId) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|l| *l != listener);
        }
    }

    async fn notify_cancelled(&self, context: &ContextId, frame_url: &str) {
        if !self.owns(context) {
            return;
        }
        let notice = CancelledNotice {
            frame_url: frame_url.to_string(),
        };
        let result = match script::cancelled_notice(&notice) {
            Ok(source) => self.session.evaluate(&source).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::debug!(context = %context, "Cancellation notice not delivered: {}", e);
        }
    }
}

#[async_trait]
impl ScreenCapture for Page {
    async fn capture(&self, request: &ScreenshotRequest) -> Result<Vec<u8>> {
        if request.bounds.is_empty() {
            return Err(Error::Capture("Empty capture region".into()));
        }
        let viewport = self.session.layout_metrics().await?;
        let clip = Viewport {
            x: request.bounds.x + viewport.page_x,
            y: request.bounds.y + viewport.page_y,
            width: request.bounds.width,
            height: request.bounds.height,
            scale: 1.0,
        };
        tracing::debug!(
            x = clip.x,
            y = clip.y,
            width = clip.width,
            height = clip.height,
            stage = request.relay_stage,
            "Capturing element"
        );
        self.session.capture_screenshot(Some(clip)).await
    }
}
