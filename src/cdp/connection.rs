//! CDP Connection/Session Management
//!
//! Manages browser and page sessions over the CDP transport.

use std::sync::Arc;

use base64::Engine;

use super::transport::Transport;
use super::types::*;
use crate::error::{Error, Result};

/// A CDP connection to Chrome
pub struct Connection {
    transport: Arc<Transport>,
}

impl Connection {
    /// Create a new connection wrapping a transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Get a reference to the transport
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Get browser version info
    pub async fn version(&self) -> Result<BrowserGetVersionResult> {
        self.transport
            .send("Browser.getVersion", &BrowserGetVersion {})
            .await
    }

    /// Create a new target (tab)
    pub async fn create_target(
        &self,
        url: &str,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<String> {
        let result: TargetCreateTargetResult = self
            .transport
            .send(
                "Target.createTarget",
                &TargetCreateTarget {
                    url: url.to_string(),
                    width,
                    height,
                },
            )
            .await?;
        Ok(result.target_id)
    }

    /// Attach to a target with a flattened session
    pub async fn attach_to_target(&self, target_id: &str) -> Result<Session> {
        let result: TargetAttachToTargetResult = self
            .transport
            .send(
                "Target.attachToTarget",
                &TargetAttachToTarget {
                    target_id: target_id.to_string(),
                    flatten: Some(true),
                },
            )
            .await?;

        Ok(Session {
            transport: Arc::clone(&self.transport),
            session_id: result.session_id,
            target_id: target_id.to_string(),
        })
    }

    /// Close a target
    pub async fn close_target(&self, target_id: &str) -> Result<bool> {
        let result: TargetCloseTargetResult = self
            .transport
            .send(
                "Target.closeTarget",
                &TargetCloseTarget {
                    target_id: target_id.to_string(),
                },
            )
            .await?;
        Ok(result.success)
    }

    /// Close the browser
    pub async fn close(&self) -> Result<()> {
        let _ = self
            .transport
            .send::<_, serde_json::Value>("Browser.close", &BrowserClose {})
            .await;
        self.transport.close().await
    }
}

/// A CDP session attached to a specific target
#[derive(Clone)]
pub struct Session {
    transport: Arc<Transport>,
    session_id: String,
    target_id: String,
}

impl Session {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Send a command to this session
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        self.transport
            .send_to_session(&self.session_id, method, params)
            .await
    }

    /// Enable page events (frame tree and navigation)
    pub async fn page_enable(&self) -> Result<()> {
        self.send::<_, serde_json::Value>("Page.enable", &PageEnable {})
            .await?;
        Ok(())
    }

    /// Enable runtime events, needed for `Runtime.bindingCalled`
    pub async fn runtime_enable(&self) -> Result<()> {
        self.send::<_, serde_json::Value>("Runtime.enable", &RuntimeEnable {})
            .await?;
        Ok(())
    }

    /// Navigate to a URL
    pub async fn navigate(&self, url: &str) -> Result<PageNavigateResult> {
        self.send(
            "Page.navigate",
            &PageNavigate {
                url: url.to_string(),
            },
        )
        .await
    }

    /// Get the frame tree
    pub async fn get_frame_tree(&self) -> Result<FrameTree> {
        let result: PageGetFrameTreeResult =
            self.send("Page.getFrameTree", &PageGetFrameTree {}).await?;
        Ok(result.frame_tree)
    }

    /// Create an isolated world in a frame, returning its execution context id
    pub async fn create_isolated_world(&self, frame_id: &str, world_name: &str) -> Result<i64> {
        let result: PageCreateIsolatedWorldResult = self
            .send(
                "Page.createIsolatedWorld",
                &PageCreateIsolatedWorld {
                    frame_id: frame_id.to_string(),
                    world_name: Some(world_name.to_string()),
                    grant_univeral_access: Some(true),
                },
            )
            .await?;
        Ok(result.execution_context_id)
    }

    /// Expose `window[name](payload)` to every context with the given world name
    pub async fn add_binding(&self, name: &str, world_name: Option<&str>) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Runtime.addBinding",
            &RuntimeAddBinding {
                name: name.to_string(),
                execution_context_name: world_name.map(String::from),
            },
        )
        .await?;
        Ok(())
    }

    /// Evaluate an expression, optionally inside a specific execution context.
    ///
    /// A thrown exception is reported as an error rather than a result.
    pub async fn evaluate_in(
        &self,
        expression: &str,
        context_id: Option<i64>,
    ) -> Result<RuntimeEvaluateResult> {
        let result: RuntimeEvaluateResult = self
            .send(
                "Runtime.evaluate",
                &RuntimeEvaluate {
                    expression: expression.to_string(),
                    context_id,
                    return_by_value: Some(true),
                    await_promise: Some(false),
                },
            )
            .await?;
        if let Some(details) = &result.exception_details {
            return Err(Error::cdp("Runtime.evaluate", -1, details.message()));
        }
        Ok(result)
    }

    /// Evaluate in the page's main world
    pub async fn evaluate(&self, expression: &str) -> Result<RuntimeEvaluateResult> {
        self.evaluate_in(expression, None).await
    }

    /// Current scroll offset and viewport size in CSS pixels
    pub async fn layout_metrics(&self) -> Result<VisualViewport> {
        let result: PageGetLayoutMetricsResult = self
            .send("Page.getLayoutMetrics", &PageGetLayoutMetrics {})
            .await?;
        Ok(result.css_visual_viewport)
    }

    /// Capture a PNG, optionally clipped to a document region
    pub async fn capture_screenshot(&self, clip: Option<Viewport>) -> Result<Vec<u8>> {
        let result: PageCaptureScreenshotResult = self
            .send(
                "Page.captureScreenshot",
                &PageCaptureScreenshot {
                    format: Some("png".to_string()),
                    clip,
                    ..Default::default()
                },
            )
            .await?;

        base64::engine::general_purpose::STANDARD
            .decode(&result.data)
            .map_err(|e| Error::Decode(e.to_string()))
    }
}
