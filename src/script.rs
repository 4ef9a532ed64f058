//! Injectable script templates
//!
//! The scripts are authored here as static text. Runtime values are spliced in
//! through `__NAME__` placeholders, always as JSON literals.

use serde::Serialize;

use crate::error::Result;
use crate::protocol::{CancelledNotice, ScreenshotResponse};
use crate::InspectorConfig;

/// Name of the host binding the top-frame relay reports to
pub const BRIDGE_BINDING: &str = "__pinokioInspectorBridge";

/// Execution world the scripts run in
pub const WORLD_NAME: &str = "pinokio-inspector";

/// DOM event dispatched in the top frame when navigation ends a session
pub const CANCELLED_EVENT: &str = "pinokio:inspector-cancelled";

/// Stops the overlay if one is active in the frame
pub const STOP_OVERLAY: &str =
    "window.__PINOKIO_INSPECTOR__ && window.__PINOKIO_INSPECTOR__.stop && window.__PINOKIO_INSPECTOR__.stop()";

const OVERLAY_TEMPLATE: &str = r#"
(() => {
    const CAPTURE_DELAY_MS = __CAPTURE_DELAY_MS__;
    const SCREENSHOT_TIMEOUT_MS = __SCREENSHOT_TIMEOUT_MS__;
    const PATH_DEPTH = __PATH_DEPTH__;
    const HIGHLIGHT_BORDER = __HIGHLIGHT_BORDER__;
    const HIGHLIGHT_FILL = __HIGHLIGHT_FILL__;

    const post = (type, fields) => {
        try {
            const message = Object.assign({ type, frameUrl: window.location.href }, fields || {});
            window.parent.postMessage({ pinokioInspector: message }, '*');
        } catch (_) {}
    };

    try {
        const previous = window.__PINOKIO_INSPECTOR__;
        if (previous && typeof previous.stop === 'function') {
            previous.stop();
        }

        const box = document.createElement('div');
        box.style.position = 'fixed';
        box.style.pointerEvents = 'none';
        box.style.border = HIGHLIGHT_BORDER;
        box.style.background = HIGHLIGHT_FILL;
        box.style.zIndex = '2147483647';
        box.style.display = 'none';
        document.documentElement.appendChild(box);

        let active = true;

        const hide = () => { box.style.display = 'none'; };

        const highlight = (target) => {
            if (!active || !target || typeof target.getBoundingClientRect !== 'function') {
                hide();
                return;
            }
            const rect = target.getBoundingClientRect();
            if (!rect || rect.width <= 0 || rect.height <= 0) {
                hide();
                return;
            }
            box.style.display = 'block';
            box.style.left = rect.left + 'px';
            box.style.top = rect.top + 'px';
            box.style.width = rect.width + 'px';
            box.style.height = rect.height + 'px';
        };

        const pathKeys = (node) => {
            const keys = [];
            let current = node;
            while (current && current.nodeType === Node.ELEMENT_NODE && keys.length < PATH_DEPTH) {
                let key = current.tagName ? current.tagName.toLowerCase() : 'element';
                if (current.id) {
                    key += '#' + current.id;
                } else if (current.classList && current.classList.length) {
                    key += '.' + Array.from(current.classList).slice(0, 2).join('.');
                }
                keys.push(key);
                current = current.parentElement;
            }
            return keys.reverse();
        };

        const requestScreenshot = (target) => new Promise((resolve, reject) => {
            const rect = target.getBoundingClientRect();
            const messageId = 'screenshot_' + Date.now() + '_' + Math.random().toString(36).slice(2, 11);
            const request = {
                type: 'screenshot',
                bounds: {
                    x: Math.round(rect.left),
                    y: Math.round(rect.top),
                    width: Math.max(1, Math.round(rect.width)),
                    height: Math.max(1, Math.round(rect.height))
                },
                devicePixelRatio: window.devicePixelRatio || 1,
                frameUrl: window.location.href,
                __pinokioRelayStage: 0,
                __pinokioRelayComplete: window === window.top
            };
            let timer = null;
            const onResponse = (event) => {
                const data = event.data;
                if (!data || !data.pinokioScreenshotResponse || data.messageId !== messageId) return;
                window.removeEventListener('message', onResponse);
                clearTimeout(timer);
                if (data.success) {
                    resolve(data.screenshot);
                } else {
                    reject(new Error(data.error || 'Screenshot failed'));
                }
            };
            window.addEventListener('message', onResponse);
            timer = setTimeout(() => {
                window.removeEventListener('message', onResponse);
                reject(new Error('Screenshot timeout'));
            }, SCREENSHOT_TIMEOUT_MS);
            window.parent.postMessage({ pinokioScreenshotRequest: request, messageId }, '*');
        });

        const onMove = (event) => {
            if (!active) return;
            const target = event.target;
            highlight(target);
            post('update', {
                nodeName: target && target.tagName ? target.tagName.toLowerCase() : '',
                pathKeys: pathKeys(target)
            });
        };

        const swallow = (event) => {
            if (!active) return;
            event.preventDefault();
            event.stopPropagation();
        };

        const onClick = async (event) => {
            if (!active) return;
            event.preventDefault();
            event.stopPropagation();

            const target = event.target;
            const outerHTML = target && target.outerHTML ? target.outerHTML : '';
            hide();
            await new Promise((resolve) => setTimeout(resolve, CAPTURE_DELAY_MS));

            let screenshot = null;
            try {
                screenshot = await requestScreenshot(target);
            } catch (_) {
                screenshot = null;
            }

            post('complete', { outerHTML, pathKeys: pathKeys(target), screenshot });
            stop();
        };

        const onKey = (event) => {
            if (!active) return;
            if (event.key === 'Escape') {
                post('cancelled', {});
                stop();
            }
        };

        const stop = () => {
            if (!active) return;
            active = false;
            document.removeEventListener('mousemove', onMove, true);
            document.removeEventListener('mouseover', onMove, true);
            document.removeEventListener('mousedown', swallow, true);
            document.removeEventListener('click', onClick, true);
            window.removeEventListener('keydown', onKey, true);
            if (box.parentNode) {
                box.parentNode.removeChild(box);
            }
            window.__PINOKIO_INSPECTOR__ = null;
        };

        document.addEventListener('mousemove', onMove, true);
        document.addEventListener('mouseover', onMove, true);
        document.addEventListener('mousedown', swallow, true);
        document.addEventListener('click', onClick, true);
        window.addEventListener('keydown', onKey, true);

        window.__PINOKIO_INSPECTOR__ = { stop };
        post('started', {});
        return true;
    } catch (error) {
        post('error', { message: error && error.message ? error.message : String(error) });
        return false;
    }
})()
"#;

const RELAY_TEMPLATE: &str = r#"
(() => {
    if (window.__PINOKIO_RELAY__) return false;

    const BRIDGE = __BRIDGE_BINDING__;
    const FORWARD_SCREENSHOTS = __FORWARD_SCREENSHOTS__;
    const isTop = window === window.top;
    const pending = new Map();

    const bridge = (message) => {
        const fn = window[BRIDGE];
        if (typeof fn !== 'function') return false;
        try {
            fn(JSON.stringify(message));
            return true;
        } catch (_) {
            return false;
        }
    };

    const frameOffset = (source) => {
        if (!source || source === window) return { x: 0, y: 0 };
        const frames = document.querySelectorAll('iframe, frame');
        for (const el of frames) {
            if (el.contentWindow === source) {
                const rect = el.getBoundingClientRect();
                return { x: rect.left + (el.clientLeft || 0), y: rect.top + (el.clientTop || 0) };
            }
        }
        return { x: 0, y: 0 };
    };

    const deliver = (messageId, response) => {
        const source = pending.get(messageId);
        if (!source) return false;
        pending.delete(messageId);
        try {
            source.postMessage(Object.assign({}, response, { pinokioScreenshotResponse: true, messageId }), '*');
        } catch (_) {}
        return true;
    };

    window.addEventListener('message', (event) => {
        const data = event.data;
        if (!data || typeof data !== 'object') return;

        if (data.pinokioScreenshotRequest && data.messageId) {
            if (!FORWARD_SCREENSHOTS) {
                pending.set(data.messageId, event.source || window);
                deliver(data.messageId, { success: false, error: 'Screenshots disabled' });
                return;
            }
            const incoming = data.pinokioScreenshotRequest;
            const offset = frameOffset(event.source);
            const request = Object.assign({}, incoming, {
                bounds: {
                    x: incoming.bounds.x + offset.x,
                    y: incoming.bounds.y + offset.y,
                    width: incoming.bounds.width,
                    height: incoming.bounds.height
                },
                __pinokioRelayStage: (incoming.__pinokioRelayStage || 0) + (event.source === window ? 0 : 1),
                __pinokioRelayComplete: incoming.__pinokioRelayComplete || isTop
            });
            pending.set(data.messageId, event.source || window);
            if (isTop) {
                const handed = bridge({ kind: 'screenshot', messageId: data.messageId, request });
                if (!handed) {
                    deliver(data.messageId, { success: false, error: 'Screenshot capture unavailable' });
                }
            } else {
                window.parent.postMessage({ pinokioScreenshotRequest: request, messageId: data.messageId }, '*');
            }
            return;
        }

        if (data.pinokioScreenshotResponse && data.messageId) {
            deliver(data.messageId, data);
            return;
        }

        if (data.pinokioInspector && typeof data.pinokioInspector === 'object') {
            if (isTop) {
                bridge({ kind: 'inspector', message: data.pinokioInspector });
            } else {
                window.parent.postMessage({ pinokioInspector: data.pinokioInspector }, '*');
            }
        }
    });

    window.__PINOKIO_RELAY__ = {
        respond: (messageId, response) => deliver(messageId, response || {})
    };
    return true;
})()
"#;

const RESPOND_TEMPLATE: &str =
    "window.__PINOKIO_RELAY__ ? window.__PINOKIO_RELAY__.respond(__MESSAGE_ID__, __RESPONSE__) : false";

const CANCELLED_TEMPLATE: &str =
    "window.dispatchEvent(new CustomEvent(__EVENT_NAME__, { detail: __DETAIL__ }))";

fn literal<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Build the overlay script for the configured timings and colours
pub fn overlay(config: &InspectorConfig) -> Result<String> {
    Ok(OVERLAY_TEMPLATE
        .replace("__CAPTURE_DELAY_MS__", &config.capture_delay.as_millis().to_string())
        .replace(
            "__SCREENSHOT_TIMEOUT_MS__",
            &config.screenshot_timeout.as_millis().to_string(),
        )
        .replace("__PATH_DEPTH__", &config.path_depth.to_string())
        .replace("__HIGHLIGHT_BORDER__", &literal(&config.highlight_border)?)
        .replace("__HIGHLIGHT_FILL__", &literal(&config.highlight_fill)?))
}

/// Build the relay script.
///
/// Overlay messages are always forwarded to the host. With
/// `forward_screenshots` off, screenshot requests are refused at the first hop.
pub fn relay(forward_screenshots: bool) -> Result<String> {
    Ok(RELAY_TEMPLATE
        .replace("__BRIDGE_BINDING__", &literal(BRIDGE_BINDING)?)
        .replace("__FORWARD_SCREENSHOTS__", &literal(&forward_screenshots)?))
}

/// Script handing a capture result to the top-frame relay for delivery
pub fn relay_response(response: &ScreenshotResponse) -> Result<String> {
    Ok(RESPOND_TEMPLATE
        .replace("__MESSAGE_ID__", &literal(&response.message_id)?)
        .replace("__RESPONSE__", &literal(response)?))
}

/// Script announcing a navigation-cancelled session to the page
pub fn cancelled_notice(notice: &CancelledNotice) -> Result<String> {
    Ok(CANCELLED_TEMPLATE
        .replace("__EVENT_NAME__", &literal(CANCELLED_EVENT)?)
        .replace("__DETAIL__", &literal(notice)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn placeholders_left(script: &str) -> bool {
        ["__CAPTURE_DELAY_MS__", "__SCREENSHOT_TIMEOUT_MS__", "__PATH_DEPTH__", "__HIGHLIGHT_", "__BRIDGE_BINDING__", "__FORWARD_SCREENSHOTS__", "__MESSAGE_ID__", "__RESPONSE__", "__EVENT_NAME__", "__DETAIL__"]
            .iter()
            .any(|p| script.contains(p))
    }

    #[test]
    fn test_overlay_substitution() {
        let config = InspectorConfig {
            screenshot_timeout: Duration::from_millis(1500),
            capture_delay: Duration::from_millis(20),
            path_depth: 5,
            ..Default::default()
        };
        let script = overlay(&config).unwrap();
        assert!(!placeholders_left(&script));
        assert!(script.contains("const SCREENSHOT_TIMEOUT_MS = 1500;"));
        assert!(script.contains("const CAPTURE_DELAY_MS = 20;"));
        assert!(script.contains("const PATH_DEPTH = 5;"));
        assert!(script.contains(&format!("const HIGHLIGHT_BORDER = \"{}\";", config.highlight_border)));
    }

    #[test]
    fn test_overlay_protocol_markers() {
        let script = overlay(&InspectorConfig::default()).unwrap();
        for marker in [
            "window.__PINOKIO_INSPECTOR__",
            "pinokioInspector",
            "pinokioScreenshotRequest",
            "pinokioScreenshotResponse",
            "'started'",
            "'update'",
            "'complete'",
            "'cancelled'",
            "'error'",
            "'Escape'",
            "pointerEvents = 'none'",
        ] {
            assert!(script.contains(marker), "overlay missing {marker}");
        }
    }

    #[test]
    fn test_relay_uses_bridge() {
        let script = relay(true).unwrap();
        assert!(!placeholders_left(&script));
        assert!(script.contains("const BRIDGE = \"__pinokioInspectorBridge\";"));
        assert!(script.contains("const FORWARD_SCREENSHOTS = true;"));
        assert!(script.contains("window.__PINOKIO_RELAY__"));
    }

    #[test]
    fn test_relay_without_screenshots_still_bridges_messages() {
        let script = relay(false).unwrap();
        assert!(!placeholders_left(&script));
        assert!(script.contains("const FORWARD_SCREENSHOTS = false;"));
        assert!(script.contains("bridge({ kind: 'inspector', message: data.pinokioInspector })"));
        assert!(script.contains("'Screenshots disabled'"));
    }

    #[test]
    fn test_relay_response_escapes() {
        let response = ScreenshotResponse::failed("id\"'1", "boom");
        let script = relay_response(&response).unwrap();
        assert!(!placeholders_left(&script));
        assert!(script.contains(r#"respond("id\"'1", "#));
        assert!(script.contains(r#""success":false"#));
    }

    #[test]
    fn test_cancelled_notice() {
        let script = cancelled_notice(&CancelledNotice {
            frame_url: "http://a/".into(),
        })
        .unwrap();
        assert!(script.contains("\"pinokio:inspector-cancelled\""));
        assert!(script.contains(r#"{"frameUrl":"http://a/"}"#));
    }
}
