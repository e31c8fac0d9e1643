//! Read-only browsing of conversations persisted by the backend.
//!
//! The backend ships each conversation as a flat node list; [`reconstruct_tree`]
//! nests it with a two-pass build. Nothing here touches the live store.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::message::{now_millis, Attachment, CostInfo, Message, MessageSource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatNode {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub cost_info: Option<CostInfo>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: String,
    pub text: String,
    pub parent_id: Option<String>,
    pub source: Option<String>,
    pub timestamp: Option<i64>,
    pub cost_info: Option<CostInfo>,
    pub attachments: Option<Vec<Attachment>>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn from_flat(node: &FlatNode) -> Self {
        Self {
            id: node.id.clone(),
            text: node.text.clone(),
            parent_id: node.parent_id.clone(),
            source: node.source.clone(),
            timestamp: node.timestamp,
            cost_info: node.cost_info.clone(),
            attachments: node.attachments.clone(),
            children: Vec::new(),
        }
    }

    fn to_flat(&self) -> FlatNode {
        FlatNode {
            id: self.id.clone(),
            parent_id: self.parent_id.clone(),
            text: self.text.clone(),
            source: self.source.clone(),
            timestamp: self.timestamp,
            cost_info: self.cost_info.clone(),
            attachments: self.attachments.clone(),
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(&node.children);
        }
        count
    }
}

// Long linear histories nest deeper than the thread stack allows for the
// default recursive drop glue.
impl Drop for TreeNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// Nests a flat node list into a tree.
///
/// Pass one indexes every node; pass two links each node under its parent.
/// Dangling parent references are logged and skipped. The entry point is the
/// first node without a parent, or the first node of the list.
pub fn reconstruct_tree(nodes: &[FlatNode]) -> Option<TreeNode> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    for (position, node) in nodes.iter().enumerate() {
        index.insert(node.id.as_str(), position);
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut root = None;
    for (position, node) in nodes.iter().enumerate() {
        match node.parent_id.as_deref() {
            None => {
                if root.is_none() {
                    root = Some(position);
                } else {
                    warn!(node_id = %node.id, "ignoring additional root node");
                }
            }
            Some(parent_id) => match index.get(parent_id) {
                Some(&parent) => children[parent].push(position),
                None => warn!(node_id = %node.id, parent_id, "skipping node with dangling parent"),
            },
        }
    }

    let entry = root.or(if nodes.is_empty() { None } else { Some(0) })?;
    let tree = assemble(entry, nodes, &children);
    Some(tree)
}

/// Builds the subtree under `entry` without recursion: a pre-order walk
/// records each node's parent, then nodes are attached bottom-up.
fn assemble(entry: usize, nodes: &[FlatNode], children: &[Vec<usize>]) -> TreeNode {
    let mut visited = HashSet::from([entry]);
    let mut parent_of: Vec<Option<usize>> = vec![None; nodes.len()];
    let mut order = Vec::new();
    let mut stack = vec![entry];
    while let Some(position) = stack.pop() {
        order.push(position);
        for &child in children[position].iter().rev() {
            if !visited.insert(child) {
                warn!(node_id = %nodes[child].id, "cycle in history tree; skipping edge");
                continue;
            }
            parent_of[child] = Some(position);
            stack.push(child);
        }
    }
    debug!(nodes = nodes.len(), reachable = order.len(), "reconstructed history tree");

    // Reverse pre-order finishes every child before its parent; siblings
    // arrive last-first and are flipped when their parent is finished.
    let mut built: Vec<Option<TreeNode>> = (0..nodes.len()).map(|_| None).collect();
    for &position in order.iter().skip(1).rev() {
        let mut node = built[position]
            .take()
            .unwrap_or_else(|| TreeNode::from_flat(&nodes[position]));
        node.children.reverse();
        if let Some(parent) = parent_of[position] {
            built[parent]
                .get_or_insert_with(|| TreeNode::from_flat(&nodes[parent]))
                .children
                .push(node);
        }
    }
    let mut tree = built[entry]
        .take()
        .unwrap_or_else(|| TreeNode::from_flat(&nodes[entry]));
    tree.children.reverse();
    tree
}

/// Pre-order flattening of a tree.
pub fn flatten_tree(tree: &TreeNode) -> Vec<FlatNode> {
    let mut flat = Vec::with_capacity(tree.size());
    let mut stack = vec![tree];
    while let Some(node) = stack.pop() {
        flat.push(node.to_flat());
        stack.extend(node.children.iter().rev());
    }
    flat
}

/// Turns backend nodes into store messages.
pub fn flat_nodes_to_messages(nodes: Vec<FlatNode>) -> Vec<Message> {
    nodes
        .into_iter()
        .map(|node| {
            let source = node
                .source
                .as_deref()
                .and_then(|source| MessageSource::try_from(source).ok())
                .unwrap_or_else(|| {
                    if node.id.contains("user") {
                        MessageSource::User
                    } else {
                        MessageSource::Ai
                    }
                });
            Message {
                id: node.id,
                content: node.text,
                source,
                parent_id: node.parent_id,
                timestamp: node.timestamp.unwrap_or_else(now_millis),
                cost_info: node.cost_info,
                attachments: node.attachments,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalConversation {
    #[serde(alias = "conversationId", alias = "convGuid")]
    pub id: String,
    #[serde(default = "untitled")]
    pub summary: String,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub highlight_colour: Option<String>,
}

fn untitled() -> String {
    "Untitled Conversation".to_string()
}

/// Index of persisted conversations shown by the history browser.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalConversations {
    entries: Vec<HistoricalConversation>,
    is_loading: bool,
    error: Option<String>,
}

impl HistoricalConversations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[HistoricalConversation] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&HistoricalConversation> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_loading(&mut self) {
        self.is_loading = true;
        self.error = None;
    }

    pub fn replace_all(&mut self, entries: Vec<HistoricalConversation>) {
        self.entries = entries;
        self.is_loading = false;
    }

    /// Replaces an entry with the same id in place; new entries go first.
    pub fn add_or_update(&mut self, conversation: HistoricalConversation) {
        match self.entries.iter_mut().find(|entry| entry.id == conversation.id) {
            Some(existing) => *existing = conversation,
            None => self.entries.insert(0, conversation),
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.is_loading = false;
        self.entries.len() != before
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.is_loading = false;
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, parent: Option<&str>) -> FlatNode {
        FlatNode {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            text: format!("text of {id}"),
            source: None,
            timestamp: None,
            cost_info: None,
            attachments: None,
        }
    }

    fn edges(tree: &TreeNode) -> Vec<(String, String)> {
        let mut collected = Vec::new();
        let mut stack = vec![tree];
        while let Some(node) = stack.pop() {
            for child in &node.children {
                collected.push((node.id.clone(), child.id.clone()));
                stack.push(child);
            }
        }
        collected.sort();
        collected
    }

    #[test]
    fn two_pass_build_nests_children_in_list_order() {
        let nodes = vec![
            node("a2", Some("root")),
            node("root", None),
            node("u2", Some("a2")),
            node("a3", Some("root")),
        ];
        let tree = reconstruct_tree(&nodes).expect("non-empty");
        assert_eq!(tree.id, "root");
        let ids: Vec<_> = tree.children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["a2", "a3"]);
        assert_eq!(tree.children[0].children[0].id, "u2");
        assert_eq!(tree.size(), 4);
    }

    #[test]
    fn dangling_parents_are_skipped() {
        let nodes = vec![node("root", None), node("orphan", Some("missing"))];
        let tree = reconstruct_tree(&nodes).expect("non-empty");
        assert_eq!(tree.size(), 1);
    }

    #[test]
    fn falls_back_to_first_node_without_explicit_root() {
        let nodes = vec![node("x", Some("y")), node("y", Some("x"))];
        let tree = reconstruct_tree(&nodes).expect("non-empty");
        assert_eq!(tree.id, "x");
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].id, "y");
        assert!(tree.children[0].children.is_empty());
    }

    #[test]
    fn first_root_candidate_wins() {
        let nodes = vec![node("r1", None), node("r2", None)];
        assert_eq!(reconstruct_tree(&nodes).map(|t| t.id.clone()), Some("r1".to_string()));
        assert_eq!(reconstruct_tree(&[]), None);
    }

    #[test]
    fn flatten_then_rebuild_preserves_edges() {
        let nodes = vec![
            node("root", None),
            node("a1", Some("root")),
            node("a2", Some("root")),
            node("u1", Some("a1")),
            node("u2", Some("a2")),
            node("a4", Some("u2")),
        ];
        let original = reconstruct_tree(&nodes).expect("non-empty");
        let flat = flatten_tree(&original);
        let ids: Vec<_> = flat.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["root", "a1", "u1", "a2", "u2", "a4"]);

        let rebuilt = reconstruct_tree(&flat).expect("non-empty");
        assert_eq!(edges(&rebuilt), edges(&original));
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn deep_linear_history_builds_without_recursion() {
        const DEPTH: usize = 100_000;
        let mut nodes = vec![node("n0", None)];
        for i in 1..DEPTH {
            nodes.push(node(&format!("n{i}"), Some(&format!("n{}", i - 1))));
        }

        let tree = reconstruct_tree(&nodes).expect("non-empty");
        assert_eq!(tree.size(), DEPTH);

        let mut deepest = &tree;
        while let Some(child) = deepest.children.first() {
            deepest = child;
        }
        assert_eq!(deepest.id, format!("n{}", DEPTH - 1));

        let flat = flatten_tree(&tree);
        assert_eq!(flat.len(), DEPTH);
        assert_eq!(flat[DEPTH - 1].parent_id.as_deref(), Some("n99998"));
    }

    #[test]
    fn flat_nodes_become_messages_with_inferred_sources() {
        let mut with_source = node("msg-7", Some("user-1"));
        with_source.source = Some("assistant".to_string());
        with_source.timestamp = Some(99);
        let messages = flat_nodes_to_messages(vec![node("user-1", None), with_source, node("x", None)]);
        assert_eq!(messages[0].source, MessageSource::User);
        assert_eq!(messages[1].source, MessageSource::Ai);
        assert_eq!(messages[1].timestamp, 99);
        assert_eq!(messages[1].content, "text of msg-7");
        assert_eq!(messages[2].source, MessageSource::Ai);
    }

    #[test]
    fn list_updates_in_place_and_prepends_new_entries() {
        let entry = |id: &str, summary: &str| HistoricalConversation {
            id: id.to_string(),
            summary: summary.to_string(),
            last_modified: None,
            highlight_colour: None,
        };
        let mut list = HistoricalConversations::new();
        list.set_loading();
        list.replace_all(vec![entry("c1", "first"), entry("c2", "second")]);
        assert!(!list.is_loading());

        list.add_or_update(entry("c2", "renamed"));
        list.add_or_update(entry("c3", "newest"));
        let ids: Vec<_> = list.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["c3", "c1", "c2"]);
        assert_eq!(list.get("c2").map(|e| e.summary.as_str()), Some("renamed"));

        assert!(list.remove("c1"));
        assert!(!list.remove("c1"));
        list.set_error("offline");
        assert_eq!(list.error(), Some("offline"));
        list.clear_error();
        assert_eq!(list.error(), None);
    }

    #[test]
    fn summaries_accept_backend_id_aliases() {
        let parsed: HistoricalConversation = serde_json::from_str(
            r#"{"conversationId":"c1","lastModified":"2024-05-01T10:00:00Z"}"#,
        )
        .expect("valid");
        assert_eq!(parsed.id, "c1");
        assert_eq!(parsed.summary, "Untitled Conversation");
        assert!(parsed.last_modified.is_some());
    }
}
