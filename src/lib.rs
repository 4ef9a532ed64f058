//! # Pinokio Inspector
//!
//! Point-and-click element inspection inside nested browser frames.
//!
//! The inspector picks one frame out of a page's frame tree from a loosely
//! specified target (frame name, URL, ordinal), injects a hover-highlight
//! overlay into it and relays the picked element's markup, path and
//! screenshot back to the host. Screenshots are captured by the host and
//! routed hop by hop through every enclosing frame.
//!
//! ## Features
//!
//! - **Tiered frame selection** - identifier, URL, ordinal, then default, with every decision traced
//! - **Cross-frame screenshot relay** - bounds translated into top-level coordinates at each hop
//! - **Session lifecycle** - one session per tab, superseded on restart, cancelled on navigation
//! - **Minimal CDP client** - hand-written transport and types, no generated bindings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pinokio_inspector::{Browser, InspectorConfig, InspectorEvent, PageInspector, SelectionPayload};
//!
//! #[tokio::main]
//! async fn main() -> pinokio_inspector::Result<()> {
//!     let browser = Browser::launch().await?;
//!     let page = Arc::new(browser.new_page("https://example.com").await?);
//!
//!     let inspector = PageInspector::new(page, InspectorConfig::default());
//!     let info = inspector.start(&SelectionPayload::for_url("https://example.com")).await?;
//!     println!("inspecting {}", info.frame_url);
//!
//!     while let Some(event) = inspector.next_event().await {
//!         if let InspectorEvent::Frame { message } = &event {
//!             if message.is_terminal() {
//!                 break;
//!             }
//!         }
//!     }
//!
//!     browser.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use std::time::Duration;
//! use pinokio_inspector::InspectorConfig;
//!
//! let config = InspectorConfig {
//!     screenshot_timeout: Duration::from_secs(5),
//!     relay_screenshots: false,
//!     ..Default::default()
//! };
//! assert_eq!(config.path_depth, 8);
//! ```

use std::time::Duration;

pub mod browser;
pub mod cdp;
pub mod coordinator;
pub mod error;
pub mod frame;
pub mod frame_url;
pub mod host;
pub mod inspector;
pub mod logging;
pub mod page;
pub mod protocol;
pub mod relay;
pub mod script;
pub mod selector;

// Re-exports
pub use browser::Browser;
pub use coordinator::{Coordinator, SessionInfo, SessionState, StopReason};
pub use error::{Error, Result};
pub use frame::{FrameArena, FrameName, NodeIndex};
pub use host::{ContextId, FrameHost, ScreenCapture};
pub use inspector::{InspectorEvent, PageInspector};
pub use logging::LogConfig;
pub use page::Page;
pub use protocol::{Bounds, InspectorMessage, ScreenshotRequest, ScreenshotResponse};
pub use selector::{FrameSelector, MatchTier, Selection, SelectionEvent, SelectionPayload};

/// Overlay behaviour
#[derive(Debug, Clone)]
pub struct InspectorConfig {
    /// How long a screenshot request may wait for the host
    pub screenshot_timeout: Duration,
    /// Pause between hiding the highlight and requesting a screenshot
    pub capture_delay: Duration,
    /// Maximum number of ancestors reported in `pathKeys`
    pub path_depth: usize,
    /// Forward screenshot requests to the host. Overlay messages are relayed either way
    pub relay_screenshots: bool,
    /// CSS border of the highlight box
    pub highlight_border: String,
    /// CSS background of the highlight box
    pub highlight_fill: String,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            screenshot_timeout: Duration::from_secs(3),
            capture_delay: Duration::from_millis(50),
            path_depth: 8,
            relay_screenshots: true,
            highlight_border: "2px solid rgba(77, 163, 255, 0.9)".to_string(),
            highlight_fill: "rgba(77, 163, 255, 0.2)".to_string(),
        }
    }
}

impl InspectorConfig {
    /// No screenshots: picks complete with a `null` image straight away
    pub fn minimal() -> Self {
        Self {
            relay_screenshots: false,
            ..Default::default()
        }
    }
}

/// How Chrome is started
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Headless mode
    pub headless: bool,
    /// Path to Chrome/Chromium binary
    pub chrome_path: Option<String>,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Extra command-line switches passed through verbatim
    pub extra_args: Vec<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            viewport_width: 1280,
            viewport_height: 800,
            extra_args: Vec::new(),
        }
    }
}

impl LaunchConfig {
    /// Create a visible (non-headless) config
    pub fn visible() -> Self {
        Self {
            headless: false,
            ..Default::default()
        }
    }
}
