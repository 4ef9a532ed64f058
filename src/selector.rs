//! Target frame selection
//!
//! Picks exactly one frame out of a flattened tree using a tiered strategy:
//!
//! 1. identifiers (`frameNodeId`, then `frameName`), optionally redirected to a
//!    descendant whose URL matches `frameUrl`
//! 2. URL prefix match, optionally indexed by `candidateRelativeOrdinal`
//! 3. global ordinal (`frameIndex`)
//! 4. the first frame
//!
//! Selection is heuristic, so every tier decision is recorded as a
//! [`SelectionEvent`] and logged under the `pinokio_inspector::select` target.
//! Matching under adversarial nesting is best-effort.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::frame::{find_descendant_by_url, FlattenedFrame, FrameArena, NodeIndex};
use crate::frame_url::{normalize, roughly_match};

/// Number of frame names included in the identifier-search diagnostic
const LOGGED_NAMES: usize = 12;

/// Inbound request describing which frame to inspect
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub frame_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub frame_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub frame_node_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_ordinal")]
    pub candidate_relative_ordinal: Option<i64>,
    #[serde(default, deserialize_with = "lenient_ordinal")]
    pub frame_index: Option<i64>,
}

impl SelectionPayload {
    /// Parse a payload from JSON, ignoring fields of the wrong type
    pub fn from_json(value: Value) -> crate::Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| crate::Error::InvalidPayload(e.to_string()))
    }

    /// Target a frame by URL only
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            frame_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Normalized `frameUrl`
    pub fn canonical_url(&self) -> Option<String> {
        normalize(self.frame_url.as_deref())
    }

    /// Trimmed `frameName`, `None` when blank
    pub fn canonical_name(&self) -> Option<&str> {
        trimmed(self.frame_name.as_deref())
    }

    /// Trimmed `frameNodeId`, `None` when blank
    pub fn canonical_node_id(&self) -> Option<&str> {
        trimmed(self.frame_node_id.as_deref())
    }
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

fn lenient_ordinal<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        _ => None,
    }))
}

/// Which rule produced the selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchTier {
    IdentifierNode,
    IdentifierNodeDescendant,
    IdentifierName,
    IdentifierNameDescendant,
    RelativeOrdinal,
    UrlFallback,
    GlobalOrdinal,
    Default,
}

/// The chosen frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub node: NodeIndex,
    pub tier: MatchTier,
}

/// Frame summary attached to match diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedFrame {
    pub index: Option<usize>,
    pub name: Option<String>,
    pub url: Option<String>,
}

/// A single selection decision
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SelectionEvent {
    NoFrames,
    #[serde(rename_all = "camelCase")]
    Incoming {
        frame_url: Option<String>,
        frame_name: Option<String>,
        frame_node_id: Option<String>,
        frame_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    IdentifierSearch {
        frame_name: Option<String>,
        frame_node_id: Option<String>,
        names: Vec<Option<String>>,
    },
    #[serde(rename_all = "camelCase")]
    IdentifierMatch {
        tier: MatchTier,
        #[serde(flatten)]
        frame: MatchedFrame,
        descendant_url: Option<String>,
    },
    IdentifierMiss,
    RelativeOrdinalMatch(MatchedFrame),
    FallbackMatch(MatchedFrame),
    GlobalOrdinalMatch(MatchedFrame),
    DefaultMatch(MatchedFrame),
}

impl SelectionEvent {
    /// Short label used as the log message
    pub fn label(&self) -> &'static str {
        match self {
            SelectionEvent::NoFrames => "no-frames",
            SelectionEvent::Incoming { .. } => "incoming",
            SelectionEvent::IdentifierSearch { .. } => "identifier-search",
            SelectionEvent::IdentifierMatch { tier, .. } => match tier {
                MatchTier::IdentifierNode => "identifier-match-node",
                MatchTier::IdentifierNodeDescendant => "identifier-match-node-descendant",
                MatchTier::IdentifierName => "identifier-match-name",
                _ => "identifier-match-name-descendant",
            },
            SelectionEvent::IdentifierMiss => "identifier-miss",
            SelectionEvent::RelativeOrdinalMatch(_) => "relative-ordinal-match",
            SelectionEvent::FallbackMatch(_) => "fallback-match",
            SelectionEvent::GlobalOrdinalMatch(_) => "global-ordinal-match",
            SelectionEvent::DefaultMatch(_) => "default-match",
        }
    }

    fn emit(&self) {
        let details = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(
            target: "pinokio_inspector::select",
            event = self.label(),
            %details,
            "frame selection"
        );
    }
}

/// Runs selection over one flattened snapshot and keeps a trace of decisions
pub struct FrameSelector<'a> {
    arena: &'a FrameArena,
    frames: &'a [FlattenedFrame],
    trace: Vec<SelectionEvent>,
}

impl<'a> FrameSelector<'a> {
    pub fn new(arena: &'a FrameArena, frames: &'a [FlattenedFrame]) -> Self {
        Self {
            arena,
            frames,
            trace: Vec::new(),
        }
    }

    /// Decisions recorded so far
    pub fn trace(&self) -> &[SelectionEvent] {
        &self.trace
    }

    /// Pick a frame. Returns `None` only when the snapshot is empty.
    pub fn select(&mut self, payload: &SelectionPayload) -> Option<Selection> {
        if self.frames.is_empty() {
            self.record(SelectionEvent::NoFrames);
            return None;
        }

        self.record(SelectionEvent::Incoming {
            frame_url: payload.frame_url.clone(),
            frame_name: payload.frame_name.clone(),
            frame_node_id: payload.frame_node_id.clone(),
            frame_count: self.frames.len(),
        });

        let canonical_url = payload.canonical_url();

        if let Some(selection) = self.by_identifier(payload, canonical_url.as_deref()) {
            return Some(selection);
        }
        if let Some(selection) = self.by_url(canonical_url.as_deref(), payload.candidate_relative_ordinal) {
            return Some(selection);
        }
        if let Some(selection) = self.by_global_ordinal(payload.frame_index) {
            return Some(selection);
        }

        let frames = self.frames;
        let first = &frames[0];
        self.record(SelectionEvent::DefaultMatch(MatchedFrame {
            index: None,
            name: first.name.clone(),
            url: first.normalized_url.clone(),
        }));
        Some(Selection {
            node: first.node,
            tier: MatchTier::Default,
        })
    }

    fn by_identifier(
        &mut self,
        payload: &SelectionPayload,
        canonical_url: Option<&str>,
    ) -> Option<Selection> {
        let node_id = payload.canonical_node_id();
        let name = payload.canonical_name();
        if node_id.is_none() && name.is_none() {
            return None;
        }

        self.record(SelectionEvent::IdentifierSearch {
            frame_name: name.map(String::from),
            frame_node_id: node_id.map(String::from),
            names: self
                .frames
                .iter()
                .take(LOGGED_NAMES)
                .map(|f| f.name.clone())
                .collect(),
        });

        let attempts = [
            (node_id, MatchTier::IdentifierNode, MatchTier::IdentifierNodeDescendant),
            (name, MatchTier::IdentifierName, MatchTier::IdentifierNameDescendant),
        ];
        for (identifier, direct, descendant) in attempts {
            let Some(identifier) = identifier else {
                continue;
            };
            let Some(index) = self
                .frames
                .iter()
                .position(|f| f.name.as_deref() == Some(identifier))
            else {
                continue;
            };
            return Some(self.resolve_identifier_match(index, canonical_url, direct, descendant));
        }

        self.record(SelectionEvent::IdentifierMiss);
        None
    }

    /// A named frame may have navigated to an inner document; prefer the
    /// descendant that carries the requested URL.
    fn resolve_identifier_match(
        &mut self,
        index: usize,
        canonical_url: Option<&str>,
        direct: MatchTier,
        descendant: MatchTier,
    ) -> Selection {
        let frames = self.frames;
        let entry = &frames[index];
        let frame = MatchedFrame {
            index: Some(index),
            name: entry.name.clone(),
            url: entry.normalized_url.clone(),
        };

        if let Some(expected) = canonical_url {
            let own_matches = entry
                .normalized_url
                .as_deref()
                .is_some_and(|url| roughly_match(Some(expected), Some(url)));
            if !own_matches {
                if let Some(found) = find_descendant_by_url(self.arena, entry.node, expected) {
                    let descendant_url = self
                        .arena
                        .get(found)
                        .and_then(|n| normalize(n.url.as_deref()));
                    self.record(SelectionEvent::IdentifierMatch {
                        tier: descendant,
                        frame,
                        descendant_url,
                    });
                    return Selection {
                        node: found,
                        tier: descendant,
                    };
                }
            }
        }

        let node = entry.node;
        self.record(SelectionEvent::IdentifierMatch {
            tier: direct,
            frame,
            descendant_url: None,
        });
        Selection { node, tier: direct }
    }

    fn by_url(&mut self, canonical_url: Option<&str>, relative_ordinal: Option<i64>) -> Option<Selection> {
        let mut matches: Vec<usize> = self
            .frames
            .iter()
            .enumerate()
            .filter(|(_, f)| roughly_match(canonical_url, f.normalized_url.as_deref()))
            .map(|(i, _)| i)
            .collect();
        if matches.is_empty() {
            return None;
        }

        if let Some(ordinal) = relative_ordinal {
            matches.sort_by_key(|&i| (self.frames[i].depth, i));
            let clamped = ordinal.clamp(0, matches.len() as i64 - 1) as usize;
            let index = matches[clamped];
            self.record(SelectionEvent::RelativeOrdinalMatch(self.describe(index)));
            return Some(Selection {
                node: self.frames[index].node,
                tier: MatchTier::RelativeOrdinal,
            });
        }

        let index = matches[0];
        self.record(SelectionEvent::FallbackMatch(self.describe(index)));
        Some(Selection {
            node: self.frames[index].node,
            tier: MatchTier::UrlFallback,
        })
    }

    fn by_global_ordinal(&mut self, frame_index: Option<i64>) -> Option<Selection> {
        let index = usize::try_from(frame_index?).ok()?;
        let entry = self.frames.get(index)?;
        let node = entry.node;
        self.record(SelectionEvent::GlobalOrdinalMatch(self.describe(index)));
        Some(Selection {
            node,
            tier: MatchTier::GlobalOrdinal,
        })
    }

    fn describe(&self, index: usize) -> MatchedFrame {
        let entry = &self.frames[index];
        MatchedFrame {
            index: Some(index),
            name: entry.name.clone(),
            url: entry.normalized_url.clone(),
        }
    }

    fn record(&mut self, event: SelectionEvent) {
        event.emit();
        self.trace.push(event);
    }
}

/// One-shot selection over a flattened snapshot
pub fn select(
    arena: &FrameArena,
    frames: &[FlattenedFrame],
    payload: &SelectionPayload,
) -> Option<Selection> {
    FrameSelector::new(arena, frames).select(payload)
}
