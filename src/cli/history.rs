//! `forkchat history`: browse conversations stored by the backend.

use std::error::Error;
use std::fmt::Write as _;

use crate::core::history::{reconstruct_tree, HistoricalConversations};
use crate::core::outline::render_tree;
use crate::core::persistence::{ConversationBackend, PersistenceError};

pub async fn list_conversations(
    backend: &dyn ConversationBackend,
) -> Result<HistoricalConversations, PersistenceError> {
    let mut history = HistoricalConversations::new();
    history.set_loading();
    match backend.list_historical_conversations().await {
        Ok(entries) => {
            history.replace_all(entries);
            Ok(history)
        }
        Err(err) => {
            history.set_error(err.to_string());
            Err(err)
        }
    }
}

pub fn format_listing(history: &HistoricalConversations) -> String {
    if history.entries().is_empty() {
        return "No stored conversations.\n".to_string();
    }
    let mut out = String::new();
    for entry in history.entries() {
        let modified = entry
            .last_modified
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "{}  {modified:<16}  {}", entry.id, entry.summary);
    }
    out
}

/// Fetches one conversation and renders it as an indented tree.
pub async fn show_conversation(
    backend: &dyn ConversationBackend,
    conversation_id: &str,
) -> Result<String, Box<dyn Error>> {
    let tree = backend
        .fetch_historical_conversation_tree(conversation_id)
        .await?;
    let root = reconstruct_tree(&tree.flat_nodes)
        .ok_or_else(|| format!("Conversation {conversation_id} has no messages"))?;

    let mut out = String::new();
    if let Some(summary) = tree.summary.as_deref() {
        let _ = writeln!(out, "{summary}");
    }
    out.push_str(&render_tree(&root));
    Ok(out)
}

pub async fn delete_conversation(
    backend: &dyn ConversationBackend,
    conversation_id: &str,
) -> Result<(), PersistenceError> {
    backend.delete_historical_conversation(conversation_id).await
}
