//! Frame tree snapshot and flattening
//!
//! The host runtime owns the real frames. Each selection works on a fresh
//! [`FrameArena`] snapshot: nodes live in a `Vec` and refer to each other by
//! [`NodeIndex`], so nothing here borrows into the host's object graph.

use serde::Serialize;

use crate::cdp::types::FrameTree;
use crate::frame_url::{normalize, roughly_match};

/// Index of a node inside a [`FrameArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeIndex(pub usize);

/// Name exposed by a frame
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FrameName {
    /// The frame has a non-empty name
    Named(String),
    /// The frame has no name
    #[default]
    Unnamed,
    /// The frame belongs to another security origin and refused to expose it
    Inaccessible,
}

impl FrameName {
    /// Build from an optional host value (empty counts as unnamed)
    pub fn from_option(name: Option<&str>) -> Self {
        match name {
            Some(n) if !n.is_empty() => FrameName::Named(n.to_string()),
            _ => FrameName::Unnamed,
        }
    }

    /// The usable name, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FrameName::Named(n) => Some(n),
            FrameName::Unnamed | FrameName::Inaccessible => None,
        }
    }
}

/// A node in the browsing-context tree
#[derive(Debug, Clone)]
pub struct FrameNode {
    /// Host identifier (CDP frame id)
    pub id: String,
    /// Current URL, if the host reported one
    pub url: Option<String>,
    pub name: FrameName,
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
}

/// Snapshot of one top-level context's frame tree
#[derive(Debug, Clone, Default)]
pub struct FrameArena {
    nodes: Vec<FrameNode>,
}

impl FrameArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node under `parent` (or as the root when `None`) and return its index
    pub fn push(
        &mut self,
        parent: Option<NodeIndex>,
        id: impl Into<String>,
        url: Option<&str>,
        name: FrameName,
    ) -> NodeIndex {
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(FrameNode {
            id: id.into(),
            url: url.filter(|u| !u.is_empty()).map(String::from),
            name,
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            if let Some(node) = self.nodes.get_mut(parent.0) {
                node.children.push(index);
            }
        }
        index
    }

    /// Build an arena from a CDP `Page.getFrameTree` result
    pub fn from_cdp(tree: &FrameTree) -> Self {
        fn visit(arena: &mut FrameArena, parent: Option<NodeIndex>, tree: &FrameTree) {
            let index = arena.push(
                parent,
                tree.frame.id.clone(),
                Some(tree.frame.url.as_str()),
                FrameName::from_option(tree.frame.name.as_deref()),
            );
            for child in &tree.child_frames {
                visit(arena, Some(index), child);
            }
        }

        let mut arena = FrameArena::new();
        visit(&mut arena, None, tree);
        arena
    }

    /// The root node, if the snapshot is non-empty
    pub fn root(&self) -> Option<NodeIndex> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(NodeIndex(0))
        }
    }

    pub fn get(&self, index: NodeIndex) -> Option<&FrameNode> {
        self.nodes.get(index.0)
    }

    /// Look a node up by host frame id
    pub fn find_by_id(&self, id: &str) -> Option<NodeIndex> {
        self.nodes.iter().position(|n| n.id == id).map(NodeIndex)
    }

    /// Walk from `index` to the root of its tree
    pub fn top_of(&self, index: NodeIndex) -> NodeIndex {
        let mut current = index;
        while let Some(parent) = self.get(current).and_then(|n| n.parent) {
            current = parent;
        }
        current
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// One entry of a flattened frame tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlattenedFrame {
    pub node: NodeIndex,
    pub depth: usize,
    pub normalized_url: Option<String>,
    pub name: Option<String>,
}

/// Flatten the subtree rooted at `root` in depth-first pre-order.
///
/// Siblings keep document order and every node contributes exactly one entry
/// before its children.
pub fn flatten(arena: &FrameArena, root: Option<NodeIndex>) -> Vec<FlattenedFrame> {
    let mut out = Vec::with_capacity(arena.len());
    if let Some(root) = root {
        flatten_into(arena, root, 0, &mut out);
    }
    out
}

fn flatten_into(arena: &FrameArena, index: NodeIndex, depth: usize, out: &mut Vec<FlattenedFrame>) {
    let Some(node) = arena.get(index) else {
        return;
    };
    out.push(FlattenedFrame {
        node: index,
        depth,
        normalized_url: normalize(node.url.as_deref()),
        name: node.name.as_str().map(String::from),
    });
    for &child in &node.children {
        flatten_into(arena, child, depth + 1, out);
    }
}

/// Search the descendants of `start` for a frame whose URL roughly matches `target_url`.
///
/// Iterative LIFO traversal seeded with `start`'s children; `start` itself is
/// never returned.
pub fn find_descendant_by_url(
    arena: &FrameArena,
    start: NodeIndex,
    target_url: &str,
) -> Option<NodeIndex> {
    let target = normalize(Some(target_url))?;
    let mut stack: Vec<NodeIndex> = arena
        .get(start)
        .map(|node| node.children.clone())
        .unwrap_or_default();
    while let Some(current) = stack.pop() {
        let Some(node) = arena.get(current) else {
            continue;
        };
        if let Some(url) = normalize(node.url.as_deref()) {
            if roughly_match(Some(&target), Some(&url)) {
                return Some(current);
            }
        }
        stack.extend(node.children.iter().copied());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::types::Frame;

    fn sample() -> FrameArena {
        // parent
        // ├── child1
        // │   └── grandchild
        // └── child2
        let mut arena = FrameArena::new();
        let root = arena.push(None, "root", Some("http://parent.com"), FrameName::from_option(Some("parent")));
        let c1 = arena.push(Some(root), "c1", Some("http://child1.com"), FrameName::from_option(Some("child1")));
        arena.push(Some(c1), "gc", Some("http://child1.com/inner"), FrameName::Unnamed);
        arena.push(Some(root), "c2", Some("http://child2.com"), FrameName::from_option(Some("child2")));
        arena
    }

    #[test]
    fn test_flatten_empty() {
        let arena = FrameArena::new();
        assert!(flatten(&arena, arena.root()).is_empty());
        assert!(flatten(&arena, None).is_empty());
    }

    #[test]
    fn test_flatten_single() {
        let mut arena = FrameArena::new();
        arena.push(None, "main", Some("http://example.com"), FrameName::from_option(Some("main")));
        let flat = flatten(&arena, arena.root());
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].name.as_deref(), Some("main"));
        assert_eq!(flat[0].depth, 0);
        assert_eq!(flat[0].normalized_url.as_deref(), Some("http://example.com/"));
    }

    #[test]
    fn test_flatten_preorder() {
        let arena = sample();
        let flat = flatten(&arena, arena.root());
        assert_eq!(flat.len(), arena.len());

        let ids: Vec<_> = flat.iter().map(|e| arena.get(e.node).unwrap().id.as_str()).collect();
        assert_eq!(ids, ["root", "c1", "gc", "c2"]);

        let depths: Vec<_> = flat.iter().map(|e| e.depth).collect();
        assert_eq!(depths, [0, 1, 2, 1]);
        for pair in depths.windows(2) {
            assert!(pair[1] <= pair[0] + 1);
        }
    }

    #[test]
    fn test_flatten_inaccessible_name() {
        let mut arena = FrameArena::new();
        let root = arena.push(None, "root", Some("http://a/"), FrameName::Unnamed);
        arena.push(Some(root), "x", Some("http://other/"), FrameName::Inaccessible);
        arena.push(Some(root), "y", Some("http://a/y"), FrameName::from_option(Some("")));

        let flat = flatten(&arena, arena.root());
        assert_eq!(flat.len(), 3);
        assert!(flat.iter().all(|e| e.name.is_none()));
    }

    #[test]
    fn test_find_descendant_by_url() {
        let arena = sample();
        let c1 = arena.find_by_id("c1").unwrap();
        let found = find_descendant_by_url(&arena, c1, "http://child1.com/inner").unwrap();
        assert_eq!(arena.get(found).unwrap().id, "gc");

        // Siblings of the start node are outside the subtree
        assert_eq!(find_descendant_by_url(&arena, c1, "http://child2.com"), None);
        assert_eq!(find_descendant_by_url(&arena, c1, ""), None);
    }

    #[test]
    fn test_find_descendant_skips_start() {
        let arena = sample();
        let c1 = arena.find_by_id("c1").unwrap();
        // Matches c1 exactly, but c1 is not its own descendant
        let found = find_descendant_by_url(&arena, c1, "http://child1.com/").unwrap();
        assert_eq!(arena.get(found).unwrap().id, "gc");

        let gc = arena.find_by_id("gc").unwrap();
        assert_eq!(find_descendant_by_url(&arena, gc, "http://child1.com/inner"), None);
    }

    #[test]
    fn test_top_of() {
        let arena = sample();
        let gc = arena.find_by_id("gc").unwrap();
        assert_eq!(arena.top_of(gc), NodeIndex(0));
    }

    #[test]
    fn test_from_cdp() {
        let tree = FrameTree {
            frame: Frame {
                id: "main".into(),
                name: None,
                url: "https://host.test/".into(),
                ..Default::default()
            },
            child_frames: vec![FrameTree {
                frame: Frame {
                    id: "child".into(),
                    name: Some("app".into()),
                    url: "https://app.test/".into(),
                    parent_id: Some("main".into()),
                },
                child_frames: vec![],
            }],
        };
        let arena = FrameArena::from_cdp(&tree);
        assert_eq!(arena.len(), 2);
        let child = arena.find_by_id("child").unwrap();
        assert_eq!(arena.get(child).unwrap().parent, Some(NodeIndex(0)));
        assert_eq!(arena.get(child).unwrap().name.as_str(), Some("app"));
    }
}
