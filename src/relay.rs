//! Relay installation
//!
//! Only the top frame can reach the host bridge, so every frame in the tree
//! gets a small forwarding script. Screenshot requests and overlay messages
//! climb one parent per hop until the top frame hands them to the host.

use crate::frame::{flatten, FrameArena, NodeIndex};
use crate::host::{ContextId, FrameHost};

/// Outcome of one installation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub installed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Install `script` into every frame of the tree containing `from`.
///
/// Frames are visited top-down, strictly one after another. Destroyed frames
/// are skipped and per-frame failures are logged, never propagated: sandboxed
/// or cross-origin frames may refuse injection.
pub async fn install_relays<H>(
    host: &H,
    context: &ContextId,
    arena: &FrameArena,
    from: NodeIndex,
    script: &str,
) -> RelayReport
where
    H: FrameHost + ?Sized,
{
    let top = arena.top_of(from);
    let mut report = RelayReport::default();

    for entry in flatten(arena, Some(top)) {
        let Some(node) = arena.get(entry.node) else {
            continue;
        };
        if host.is_frame_destroyed(context, &node.id).await {
            tracing::debug!(frame_id = %node.id, "Skipping relay for destroyed frame");
            report.skipped += 1;
            continue;
        }
        match host.inject(context, &node.id, script).await {
            Ok(_) => report.installed += 1,
            Err(e) => {
                tracing::warn!(
                    frame_id = %node.id,
                    url = node.url.as_deref().unwrap_or(""),
                    depth = entry.depth,
                    "Screenshot relay injection failed: {}",
                    e
                );
                report.failed += 1;
            }
        }
    }

    tracing::debug!(
        context = %context,
        installed = report.installed,
        skipped = report.skipped,
        failed = report.failed,
        "Screenshot relays installed"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameName;
    use crate::host::mock::MockHost;

    fn nested() -> FrameArena {
        let mut arena = FrameArena::new();
        let top = arena.push(None, "top", Some("http://host/"), FrameName::Unnamed);
        let app = arena.push(Some(top), "app", Some("http://app/"), FrameName::from_option(Some("app")));
        arena.push(Some(app), "widget", Some("http://widget/"), FrameName::Unnamed);
        arena.push(Some(top), "ads", Some("http://ads/"), FrameName::Unnamed);
        arena
    }

    #[tokio::test]
    async fn test_installs_top_down_from_any_frame() {
        let arena = nested();
        let host = MockHost::with_arena(arena.clone());
        let widget = arena.find_by_id("widget").unwrap();

        let report = install_relays(&host, &ContextId::new("tab"), &arena, widget, "relay()").await;
        assert_eq!(report, RelayReport { installed: 4, skipped: 0, failed: 0 });
        assert_eq!(host.injected_frames(), ["top", "app", "widget", "ads"]);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort() {
        let arena = nested();
        let host = MockHost::with_arena(arena.clone());
        host.refuse("app");
        host.destroy("ads");

        let report = install_relays(&host, &ContextId::new("tab"), &arena, NodeIndex(0), "relay()").await;
        assert_eq!(report, RelayReport { installed: 2, skipped: 1, failed: 1 });
        assert_eq!(host.injected_frames(), ["top", "widget"]);
    }
}
