//! Plain-text rendering of conversation trees for the command line.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::core::history::TreeNode;
use crate::core::message::Message;
use crate::core::store::Conversation;

const PREVIEW_CHARS: usize = 48;

fn preview(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() <= PREVIEW_CHARS {
        first_line.to_string()
    } else {
        format!("{}...", first_line.chars().take(PREVIEW_CHARS).collect::<String>())
    }
}

/// Renders a live conversation. Messages on the path to `selected` are
/// marked with `*`.
pub fn render_conversation(conversation: &Conversation, selected: Option<&str>) -> String {
    let graph = conversation.graph();
    let active: HashSet<&str> = selected
        .and_then(|id| graph.get_message_path(id).ok())
        .map(|path| path.iter().map(|m| m.id.as_str()).collect())
        .unwrap_or_default();

    let mut out = String::new();
    let _ = writeln!(out, "{} ({} messages)", conversation.id(), conversation.len());

    let mut visited = HashSet::new();
    let mut stack: Vec<(&Message, usize)> = graph
        .get_root_messages()
        .into_iter()
        .rev()
        .map(|m| (m, 0))
        .collect();
    while let Some((message, depth)) = stack.pop() {
        if !visited.insert(message.id.as_str()) {
            continue;
        }
        let marker = if active.contains(message.id.as_str()) { '*' } else { ' ' };
        let _ = writeln!(
            out,
            "{marker} {:indent$}[{}] {}: {}",
            "",
            message.source.as_str(),
            message.id,
            preview(&message.content),
            indent = depth * 2,
        );
        for child in graph.get_children(&message.id).into_iter().rev() {
            stack.push((child, depth + 1));
        }
    }
    out
}

/// Renders a reconstructed history tree.
pub fn render_tree(tree: &TreeNode) -> String {
    let mut out = String::new();
    let mut stack = vec![(tree, 0usize)];
    while let Some((node, depth)) = stack.pop() {
        let source = node.source.as_deref().unwrap_or("?");
        let _ = writeln!(
            out,
            "{:indent$}[{source}] {}: {}",
            "",
            node.id,
            preview(&node.text),
            indent = depth * 2,
        );
        for child in node.children.iter().rev() {
            stack.push((child, depth + 1));
        }
    }
    out
}
