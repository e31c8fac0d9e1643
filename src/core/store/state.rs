use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use super::StoreCommand;
use crate::core::graph::MessageGraph;
use crate::core::message::{Attachment, CostInfo, Message};
use crate::core::parent::ParentResolver;
use crate::utils::ids::generate_conversation_id;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    id: String,
    messages: Vec<Message>,
}

impl Conversation {
    pub(crate) fn with_root(id: String, mut root: Message) -> Self {
        root.parent_id = None;
        Self {
            id,
            messages: vec![root],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Messages in insertion order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.messages.iter().any(|message| message.id == message_id)
    }

    pub fn get_message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == message_id)
    }

    pub fn root(&self) -> Option<&Message> {
        self.messages.iter().find(|message| message.is_root())
    }

    pub fn first_message(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn graph(&self) -> MessageGraph<'_> {
        MessageGraph::new(&self.messages)
    }

    fn get_message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|message| message.id == message_id)
    }

    fn latest_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .fold(None, |latest: Option<&Message>, candidate| match latest {
                Some(current) if current.timestamp >= candidate.timestamp => Some(current),
                _ => Some(candidate),
            })
    }
}

/// Plain data behind [`super::ConversationStore`]. Every mutation is total:
/// unknown ids are logged and leave the state untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    conversations: HashMap<String, Conversation>,
    creation_order: Vec<String>,
    // Most recently activated last.
    activation_history: Vec<String>,
    active_conversation_id: Option<String>,
    selected_message_id: Option<String>,
    editing_message_id: Option<String>,
    error: Option<String>,
}

impl StoreState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.get(conversation_id)
    }

    pub fn get_active_conversation(&self) -> Option<&Conversation> {
        self.active_conversation_id
            .as_deref()
            .and_then(|id| self.conversations.get(id))
    }

    /// Conversations in creation order.
    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.creation_order
            .iter()
            .filter_map(|id| self.conversations.get(id))
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    pub fn active_conversation_id(&self) -> Option<&str> {
        self.active_conversation_id.as_deref()
    }

    pub fn selected_message_id(&self) -> Option<&str> {
        self.selected_message_id.as_deref()
    }

    pub fn editing_message_id(&self) -> Option<&str> {
        self.editing_message_id.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Creates (or replaces) a conversation holding only `root_message`,
    /// makes it active and returns its id.
    pub fn create_conversation(
        &mut self,
        root_message: Message,
        id: Option<String>,
        selected_message_id: Option<String>,
    ) -> String {
        let id = id.unwrap_or_else(generate_conversation_id);
        if root_message.parent_id.is_some() {
            debug!(message_id = %root_message.id, "dropping parent reference from root message");
        }
        let conversation = Conversation::with_root(id.clone(), root_message);
        let selected = selected_message_id
            .filter(|selected| conversation.contains(selected))
            .or_else(|| conversation.first_message().map(|m| m.id.clone()));

        self.install_conversation(conversation);
        self.mark_active(&id);
        self.selected_message_id = selected;
        id
    }

    /// Inserts a fully built conversation in one step, replacing any
    /// conversation with the same id. Does not change the active pointer.
    pub(crate) fn install_conversation(&mut self, conversation: Conversation) -> Option<Conversation> {
        let id = conversation.id.clone();
        let replaced = self.conversations.insert(id.clone(), conversation);
        if replaced.is_some() {
            debug!(conversation_id = %id, "replacing existing conversation");
            self.creation_order.retain(|existing| existing != &id);
        }
        self.creation_order.push(id);
        replaced
    }

    /// Appends `message`, resolving its parent when absent. Returns the
    /// resolved parent id (`Some(None)` for a new root), or `None` when the
    /// message was not added.
    pub fn add_message(
        &mut self,
        conversation_id: &str,
        mut message: Message,
        selected_message_id: Option<String>,
    ) -> Option<Option<String>> {
        let is_active = self.active_conversation_id.as_deref() == Some(conversation_id);
        let current_leaf = self.selected_message_id.as_deref();

        let Some(conversation) = self.conversations.get_mut(conversation_id) else {
            warn!(conversation_id, "no conversation found for new message");
            return None;
        };
        if conversation.contains(&message.id) {
            warn!(conversation_id, message_id = %message.id, "message already exists; ignoring append");
            return None;
        }

        if conversation.is_empty() {
            message.parent_id = None;
        } else {
            let explicit_parent_is_valid = match message.parent_id.as_deref() {
                Some(parent_id) if conversation.contains(parent_id) => true,
                Some(parent_id) => {
                    warn!(
                        conversation_id,
                        message_id = %message.id,
                        parent_id,
                        "parent reference does not exist in conversation; resolving a new parent"
                    );
                    false
                }
                None => false,
            };
            if !explicit_parent_is_valid {
                let leaf = if is_active { current_leaf } else { None };
                let resolution = ParentResolver::new(&conversation.messages, leaf).resolve(message.source);
                debug!(
                    conversation_id,
                    message_id = %message.id,
                    parent_id = ?resolution.parent_id,
                    rule = ?resolution.rule,
                    "resolved message parent"
                );
                message.parent_id = resolution.parent_id;
            }
        }

        let parent_id = message.parent_id.clone();
        conversation.messages.push(message);

        if let Some(selected) = selected_message_id {
            if is_active && conversation.contains(&selected) {
                self.selected_message_id = Some(selected);
            } else {
                debug!(conversation_id, selected = %selected, "ignoring leaf update outside the active conversation");
            }
        }

        Some(parent_id)
    }

    pub fn set_active_conversation(
        &mut self,
        conversation_id: &str,
        selected_message_id: Option<String>,
    ) -> bool {
        let Some(conversation) = self.conversations.get(conversation_id) else {
            warn!(conversation_id, "trying to set active conversation that does not exist");
            return false;
        };

        let requested = selected_message_id.filter(|selected| {
            let known = conversation.contains(selected);
            if !known {
                warn!(conversation_id, selected = %selected, "requested leaf is not in conversation");
            }
            known
        });
        let kept = self
            .selected_message_id
            .clone()
            .filter(|current| conversation.contains(current));
        let leaf = requested
            .or(kept)
            .or_else(|| conversation.latest_message().map(|m| m.id.clone()));

        self.mark_active(conversation_id);
        self.selected_message_id = leaf;
        true
    }

    /// Activates `conversation_id` and moves the leaf to `message_id`.
    pub fn select_message(&mut self, conversation_id: &str, message_id: &str) -> bool {
        let Some(conversation) = self.conversations.get(conversation_id) else {
            warn!(conversation_id, "cannot select message in unknown conversation");
            return false;
        };
        if !conversation.contains(message_id) {
            warn!(conversation_id, message_id, "cannot select unknown message");
            return false;
        }

        self.mark_active(conversation_id);
        self.selected_message_id = Some(message_id.to_string());
        true
    }

    pub fn update_message(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        content: impl Into<String>,
    ) -> Option<StoreCommand> {
        let Some(message) = self.message_mut(conversation_id, message_id) else {
            warn!(conversation_id, message_id, "cannot update unknown message");
            return None;
        };
        let content = content.into();
        message.content = content.clone();

        Some(StoreCommand::PersistMessageContent {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
            content,
        })
    }

    /// Replaces the payload of an existing message without touching the tree.
    pub(crate) fn refresh_message(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        content: String,
        cost_info: Option<CostInfo>,
        attachments: Option<Vec<Attachment>>,
    ) -> bool {
        let Some(message) = self.message_mut(conversation_id, message_id) else {
            return false;
        };
        message.content = content;
        if cost_info.is_some() {
            message.cost_info = cost_info;
        }
        if attachments.is_some() {
            message.attachments = attachments;
        }
        true
    }

    /// Removes `message_id` together with every message below it and returns
    /// the removed messages.
    pub fn delete_message(&mut self, conversation_id: &str, message_id: &str) -> Vec<Message> {
        let Some(conversation) = self.conversations.get_mut(conversation_id) else {
            warn!(conversation_id, "cannot delete message from unknown conversation");
            return Vec::new();
        };

        let doomed: HashSet<String> = conversation
            .graph()
            .subtree_ids(message_id)
            .into_iter()
            .map(str::to_string)
            .collect();
        if doomed.is_empty() {
            warn!(conversation_id, message_id, "cannot delete unknown message");
            return Vec::new();
        }

        let (removed, kept): (Vec<Message>, Vec<Message>) = std::mem::take(&mut conversation.messages)
            .into_iter()
            .partition(|message| doomed.contains(&message.id));
        conversation.messages = kept;
        let fallback = conversation.last_message().map(|m| m.id.clone());

        if self
            .selected_message_id
            .as_ref()
            .is_some_and(|selected| doomed.contains(selected))
        {
            self.selected_message_id = fallback;
        }
        if self
            .editing_message_id
            .as_ref()
            .is_some_and(|editing| doomed.contains(editing))
        {
            self.editing_message_id = None;
        }

        debug!(conversation_id, message_id, removed = removed.len(), "deleted message subtree");
        removed
    }

    /// Prunes a conversation down to its root and returns the pruned messages.
    pub fn clear_conversation(&mut self, conversation_id: &str) -> Option<Vec<Message>> {
        let is_active = self.active_conversation_id.as_deref() == Some(conversation_id);
        let Some(conversation) = self.conversations.get_mut(conversation_id) else {
            warn!(conversation_id, "cannot clear unknown conversation");
            return None;
        };
        let Some(root_position) = conversation.messages.iter().position(Message::is_root) else {
            warn!(conversation_id, "conversation has no root message; leaving it untouched");
            return None;
        };

        let root = conversation.messages.remove(root_position);
        let root_id = root.id.clone();
        let pruned = std::mem::replace(&mut conversation.messages, vec![root]);

        if is_active {
            self.selected_message_id = Some(root_id);
        }
        if self
            .editing_message_id
            .as_ref()
            .is_some_and(|editing| pruned.iter().any(|m| &m.id == editing))
        {
            self.editing_message_id = None;
        }
        Some(pruned)
    }

    /// Drops a conversation. When it was active, the most recently active
    /// remaining conversation takes over with its first message selected.
    pub(crate) fn remove_conversation(&mut self, conversation_id: &str) -> Option<Conversation> {
        let Some(removed) = self.conversations.remove(conversation_id) else {
            warn!(conversation_id, "cannot delete unknown conversation");
            return None;
        };
        self.creation_order.retain(|id| id != conversation_id);
        self.activation_history.retain(|id| id != conversation_id);

        if self.active_conversation_id.as_deref() == Some(conversation_id) {
            let replacement = self
                .activation_history
                .last()
                .or_else(|| self.creation_order.last())
                .cloned();
            self.selected_message_id = replacement
                .as_deref()
                .and_then(|id| self.conversations.get(id))
                .and_then(Conversation::first_message)
                .map(|m| m.id.clone());
            match replacement {
                Some(id) => self.mark_active(&id),
                None => self.active_conversation_id = None,
            }
            debug!(
                conversation_id,
                replacement = ?self.active_conversation_id,
                "active conversation deleted"
            );
        }
        if self
            .editing_message_id
            .as_ref()
            .is_some_and(|editing| removed.contains(editing))
        {
            self.editing_message_id = None;
        }
        Some(removed)
    }

    pub fn edit_message(&mut self, message_id: Option<String>) {
        self.editing_message_id = message_id;
    }

    pub fn cancel_edit_message(&mut self) {
        self.editing_message_id = None;
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    fn mark_active(&mut self, conversation_id: &str) {
        self.activation_history.retain(|id| id != conversation_id);
        self.activation_history.push(conversation_id.to_string());
        self.active_conversation_id = Some(conversation_id.to_string());
    }

    fn message_mut(&mut self, conversation_id: &str, message_id: &str) -> Option<&mut Message> {
        self.conversations
            .get_mut(conversation_id)?
            .get_message_mut(message_id)
    }
}
