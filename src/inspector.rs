//! Page-level inspector driver
//!
//! Pumps CDP events for one tab and turns them into coordinator calls: frame
//! navigation ends the session, bridge calls from the top-frame relay become
//! screenshot captures or [`InspectorEvent::Frame`] messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::Engine;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::cdp::transport::CdpMessage;
use crate::cdp::types::{PageFrameDetachedEvent, PageFrameNavigatedEvent, RuntimeBindingCalledEvent};
use crate::coordinator::{Coordinator, SessionInfo, SessionState, StopReason};
use crate::error::Result;
use crate::host::ScreenCapture;
use crate::page::Page;
use crate::protocol::{Bounds, BridgeMessage, InspectorMessage, ScreenshotRequest, ScreenshotResponse};
use crate::script;
use crate::selector::SelectionPayload;
use crate::InspectorConfig;

/// What the inspector reports to its owner
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum InspectorEvent {
    /// A message posted by the overlay, relayed up to the top frame
    Frame { message: InspectorMessage },
    /// Navigation ended the session
    #[serde(rename_all = "camelCase")]
    Cancelled { frame_url: String },
    /// A relayed screenshot request was answered
    #[serde(rename_all = "camelCase")]
    Screenshot {
        message_id: String,
        success: bool,
        /// Capture rectangle in top-level viewport coordinates
        bounds: Bounds,
        /// Frame boundaries the request crossed
        relay_stage: u32,
    },
}

/// Drives inspection sessions on a single page.
///
/// The page's transport carries events for every attached target; events that
/// belong to other sessions are skipped, so run one `PageInspector` per browser
/// when pumping with [`next_event`](Self::next_event).
pub struct PageInspector {
    page: Arc<Page>,
    coordinator: Mutex<Coordinator<Arc<Page>>>,
    selecting: AtomicBool,
    config: InspectorConfig,
}

impl PageInspector {
    pub fn new(page: Arc<Page>, config: InspectorConfig) -> Self {
        Self {
            coordinator: Mutex::new(Coordinator::new(Arc::clone(&page), config.clone())),
            page,
            selecting: AtomicBool::new(false),
            config,
        }
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    /// Start inspecting the frame `payload` describes
    pub async fn start(&self, payload: &SelectionPayload) -> Result<SessionInfo> {
        // Navigation queued before this session must not cancel it
        while let Some(message) = self.page.session().transport().try_recv_event().await {
            if let Some(event) = self.process_event(&message).await {
                tracing::info!(
                    event = %serde_json::to_string(&event).unwrap_or_default(),
                    "Discarding event from before session start"
                );
            }
        }
        let context = self.page.context().clone();
        let mut coordinator = self.coordinator.lock().await;
        self.selecting.store(true, Ordering::SeqCst);
        let result = coordinator.start_session(&context, payload).await;
        self.selecting.store(false, Ordering::SeqCst);
        result
    }

    /// Stop the current session, if any
    pub async fn stop(&self) -> SessionInfo {
        let context = self.page.context().clone();
        self.coordinator.lock().await.stop_session(&context).await
    }

    /// Current phase. Reports `Selecting` without waiting while a start is in progress.
    pub async fn state(&self) -> SessionState {
        if self.selecting.load(Ordering::SeqCst) {
            return SessionState::Selecting;
        }
        self.coordinator.lock().await.state(self.page.context())
    }

    /// Why the last session ended, if one has
    pub async fn last_stop(&self) -> Option<StopReason> {
        self.coordinator.lock().await.last_stop(self.page.context())
    }

    /// Wait for the next inspector event. Returns `None` once the connection closes.
    pub async fn next_event(&self) -> Option<InspectorEvent> {
        loop {
            let message = self.page.session().transport().recv_event().await?;
            if let Some(event) = self.process_event(&message).await {
                return Some(event);
            }
        }
    }

    /// Handle one raw CDP event
    pub async fn process_event(&self, message: &CdpMessage) -> Option<InspectorEvent> {
        let CdpMessage::Event {
            method,
            params,
            session_id,
        } = message;
        if session_id.as_deref() != Some(self.page.session().session_id()) {
            return None;
        }

        match method.as_str() {
            "Page.frameNavigated" => {
                let event: PageFrameNavigatedEvent = serde_json::from_value(params.clone()).ok()?;
                self.page.forget_frame(&event.frame.id).await;
                if event.frame.parent_id.is_some() {
                    return None;
                }
                tracing::debug!(url = %event.frame.url, "Main frame navigated");
                self.on_navigation().await
            }
            "Page.navigatedWithinDocument" => self.on_navigation().await,
            "Page.frameDetached" => {
                let event: PageFrameDetachedEvent = serde_json::from_value(params.clone()).ok()?;
                self.page.forget_frame(&event.frame_id).await;
                None
            }
            "Inspector.detached" | "Inspector.targetCrashed" => {
                self.page.mark_closed();
                None
            }
            "Runtime.bindingCalled" => {
                let call: RuntimeBindingCalledEvent = serde_json::from_value(params.clone()).ok()?;
                if call.name != script::BRIDGE_BINDING {
                    return None;
                }
                self.on_bridge_call(call).await
            }
            _ => None,
        }
    }

    async fn on_navigation(&self) -> Option<InspectorEvent> {
        let context = self.page.context().clone();
        let mut coordinator = self.coordinator.lock().await;
        for listener in self.page.listeners() {
            if let Some(info) = coordinator.handle_navigation(&context, listener).await {
                return Some(InspectorEvent::Cancelled {
                    frame_url: info.frame_url,
                });
            }
        }
        None
    }

    async fn on_bridge_call(&self, call: RuntimeBindingCalledEvent) -> Option<InspectorEvent> {
        let message: BridgeMessage = match serde_json::from_str(&call.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Malformed bridge payload: {}", e);
                return None;
            }
        };

        match message {
            BridgeMessage::Inspector { message } => {
                tracing::debug!(url = message.frame_url(), terminal = message.is_terminal(), "Overlay message");
                Some(InspectorEvent::Frame { message })
            }
            BridgeMessage::Screenshot {
                message_id,
                request,
            } => {
                let success = self
                    .serve_screenshot(call.execution_context_id, &message_id, &request)
                    .await;
                Some(InspectorEvent::Screenshot {
                    message_id,
                    success,
                    bounds: request.bounds,
                    relay_stage: request.relay_stage,
                })
            }
        }
    }

    /// Capture the requested region and hand the result back to the top-frame relay
    async fn serve_screenshot(&self, relay_context: i64, message_id: &str, request: &ScreenshotRequest) -> bool {
        let capture = tokio::time::timeout(self.config.screenshot_timeout, self.page.capture(request)).await;
        let response = match capture {
            Ok(Ok(png)) => ScreenshotResponse::captured(
                message_id,
                format!(
                    "data:image/png;base64,{}",
                    base64::engine::general_purpose::STANDARD.encode(png)
                ),
            ),
            Ok(Err(e)) => {
                tracing::warn!(message_id, "Screenshot capture failed: {}", e);
                ScreenshotResponse::failed(message_id, e.to_string())
            }
            Err(_) => {
                tracing::warn!(message_id, "Screenshot capture timed out");
                ScreenshotResponse::failed(message_id, "Screenshot timeout")
            }
        };

        let delivered = match script::relay_response(&response) {
            Ok(source) => self.page.evaluate_in_context(relay_context, &source).await,
            Err(e) => Err(e),
        };
        if let Err(e) = delivered {
            // The requesting overlay falls back to its own timeout
            tracing::debug!(message_id, "Screenshot response not delivered: {}", e);
        }
        response.success
    }
}
