//! Cross-frame message envelopes
//!
//! These mirror the objects the injected scripts exchange with
//! `window.postMessage` and hand to the host through the bridge binding.

use serde::{Deserialize, Serialize};

/// Element rectangle in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Shift into the coordinate space of an enclosing document
    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

fn screenshot_type() -> String {
    "screenshot".to_string()
}

/// Request to capture the pixels of an inspected element.
///
/// Travels up the parent chain one hop at a time. `relay_stage` counts hops and
/// `relay_complete` turns true once the top frame has seen the request, which
/// says nothing about whether the capture itself succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRequest {
    #[serde(rename = "type", default = "screenshot_type")]
    pub kind: String,
    pub bounds: Bounds,
    #[serde(default = "default_pixel_ratio")]
    pub device_pixel_ratio: f64,
    #[serde(default)]
    pub frame_url: String,
    #[serde(rename = "__pinokioRelayStage", default)]
    pub relay_stage: u32,
    #[serde(rename = "__pinokioRelayComplete", default)]
    pub relay_complete: bool,
}

fn default_pixel_ratio() -> f64 {
    1.0
}

impl ScreenshotRequest {
    /// A fresh request as issued by the overlay inside the inspected frame
    pub fn new(bounds: Bounds, device_pixel_ratio: f64, frame_url: impl Into<String>, is_top: bool) -> Self {
        Self {
            kind: screenshot_type(),
            bounds,
            device_pixel_ratio,
            frame_url: frame_url.into(),
            relay_stage: 0,
            relay_complete: is_top,
        }
    }

    /// The request as the parent forwards it after one hop.
    ///
    /// `offset` is the position of the child's frame element inside the parent.
    pub fn forwarded(&self, offset: (f64, f64), parent_is_top: bool) -> Self {
        Self {
            bounds: self.bounds.translate(offset.0, offset.1),
            relay_stage: self.relay_stage + 1,
            relay_complete: self.relay_complete || parent_is_top,
            ..self.clone()
        }
    }
}

/// `{ pinokioScreenshotRequest: {...}, messageId }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotEnvelope {
    pub pinokio_screenshot_request: ScreenshotRequest,
    pub message_id: String,
}

/// Reply routed back down to the requesting frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotResponse {
    pub pinokio_screenshot_response: bool,
    pub message_id: String,
    pub success: bool,
    /// `data:image/png;base64,...`
    #[serde(default)]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ScreenshotResponse {
    pub fn captured(message_id: impl Into<String>, data_url: impl Into<String>) -> Self {
        Self {
            pinokio_screenshot_response: true,
            message_id: message_id.into(),
            success: true,
            screenshot: Some(data_url.into()),
            error: None,
        }
    }

    pub fn failed(message_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            pinokio_screenshot_response: true,
            message_id: message_id.into(),
            success: false,
            screenshot: None,
            error: Some(error.into()),
        }
    }
}

/// Messages the overlay posts upward, tagged with the frame that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InspectorMessage {
    #[serde(rename_all = "camelCase")]
    Started { frame_url: String },
    #[serde(rename_all = "camelCase")]
    Update {
        frame_url: String,
        node_name: String,
        path_keys: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        frame_url: String,
        #[serde(rename = "outerHTML")]
        outer_html: String,
        path_keys: Vec<String>,
        #[serde(default)]
        screenshot: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Cancelled { frame_url: String },
    #[serde(rename_all = "camelCase")]
    Error { frame_url: String, message: String },
}

impl InspectorMessage {
    pub fn frame_url(&self) -> &str {
        match self {
            InspectorMessage::Started { frame_url }
            | InspectorMessage::Update { frame_url, .. }
            | InspectorMessage::Complete { frame_url, .. }
            | InspectorMessage::Cancelled { frame_url }
            | InspectorMessage::Error { frame_url, .. } => frame_url,
        }
    }

    /// Whether the overlay deactivated itself after sending this
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InspectorMessage::Complete { .. }
                | InspectorMessage::Cancelled { .. }
                | InspectorMessage::Error { .. }
        )
    }
}

/// `{ pinokioInspector: { type, frameUrl, ... } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMessage {
    pub pinokio_inspector: InspectorMessage,
}

/// Payload the top-frame relay passes to the host binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BridgeMessage {
    #[serde(rename_all = "camelCase")]
    Screenshot {
        message_id: String,
        request: ScreenshotRequest,
    },
    Inspector { message: InspectorMessage },
}

/// Notification sent to the owning context when navigation ends a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledNotice {
    pub frame_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_forwarding_counts_hops() {
        let request = ScreenshotRequest::new(Bounds::new(10.0, 20.0, 30.0, 40.0), 2.0, "http://inner/", false);
        assert_eq!(request.relay_stage, 0);
        assert!(!request.relay_complete);

        let middle = request.forwarded((100.0, 50.0), false);
        assert_eq!(middle.relay_stage, 1);
        assert!(!middle.relay_complete);
        assert_eq!(middle.bounds, Bounds::new(110.0, 70.0, 30.0, 40.0));

        let top = middle.forwarded((5.0, 5.0), true);
        assert_eq!(top.relay_stage, 2);
        assert!(top.relay_complete);
        assert_eq!(top.bounds.x, 115.0);
        assert_eq!(top.frame_url, "http://inner/");
    }

    #[test]
    fn test_request_wire_names() {
        let request = ScreenshotRequest::new(Bounds::new(1.0, 2.0, 3.0, 4.0), 1.0, "http://a/", true);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "screenshot");
        assert_eq!(value["devicePixelRatio"], 1.0);
        assert_eq!(value["__pinokioRelayStage"], 0);
        assert_eq!(value["__pinokioRelayComplete"], true);
    }

    #[test]
    fn test_parse_complete_message() {
        let raw = json!({
            "pinokioInspector": {
                "type": "complete",
                "frameUrl": "http://a/b",
                "outerHTML": "<button>Go</button>",
                "pathKeys": ["html", "body", "button.primary"],
                "screenshot": null
            }
        });
        let message: FrameMessage = serde_json::from_value(raw).unwrap();
        match &message.pinokio_inspector {
            InspectorMessage::Complete {
                outer_html,
                path_keys,
                screenshot,
                ..
            } => {
                assert_eq!(outer_html, "<button>Go</button>");
                assert_eq!(path_keys.len(), 3);
                assert!(screenshot.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(message.pinokio_inspector.frame_url(), "http://a/b");
        assert!(message.pinokio_inspector.is_terminal());
    }

    #[test]
    fn test_parse_bridge_screenshot() {
        let raw = json!({
            "kind": "screenshot",
            "messageId": "screenshot_1_abc",
            "request": {
                "type": "screenshot",
                "bounds": { "x": 0, "y": 0, "width": 10, "height": 10 },
                "devicePixelRatio": 2,
                "frameUrl": "http://a/",
                "__pinokioRelayStage": 1,
                "__pinokioRelayComplete": true
            }
        });
        let message: BridgeMessage = serde_json::from_value(raw).unwrap();
        let BridgeMessage::Screenshot { message_id, request } = message else {
            panic!("expected screenshot bridge message");
        };
        assert_eq!(message_id, "screenshot_1_abc");
        assert_eq!(request.relay_stage, 1);
        assert_eq!(request.device_pixel_ratio, 2.0);
    }

    #[test]
    fn test_response_shape() {
        let value = serde_json::to_value(ScreenshotResponse::failed("m1", "Screenshot timeout")).unwrap();
        assert_eq!(value["pinokioScreenshotResponse"], true);
        assert_eq!(value["messageId"], "m1");
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "Screenshot timeout");
    }
}
