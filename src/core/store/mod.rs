//! Stateful core of the conversation tree.
//!
//! [`ConversationStore`] owns every loaded conversation, the active
//! conversation pointer and the active leaf. Mutations are synchronous and
//! never perform I/O: anything that has to reach the backend comes back as a
//! [`StoreCommand`] for the caller to dispatch. Observers subscribe to
//! [`StoreChange`] notifications over an unbounded channel.

mod state;


pub use state::{Conversation, StoreState};

use tokio::sync::mpsc;
use tracing::debug;

use crate::core::attachments::AttachmentRegistry;
use crate::core::message::{Attachment, CostInfo, Message};

/// Outbound effect produced by a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    PersistMessageContent {
        conversation_id: String,
        message_id: String,
        content: String,
    },
    FetchConversation {
        conversation_id: String,
    },
}

/// Notification sent to subscribers after a mutation took effect.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    ConversationCreated { conversation_id: String },
    MessageAdded { conversation_id: String, message_id: String },
    MessageUpdated { conversation_id: String, message_id: String },
    MessagesDeleted { conversation_id: String, message_ids: Vec<String> },
    ConversationCleared { conversation_id: String },
    ConversationDeleted { conversation_id: String },
    ActiveChanged {
        conversation_id: Option<String>,
        selected_message_id: Option<String>,
    },
    EditingChanged { message_id: Option<String> },
    ErrorChanged { error: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Result of [`ConversationStore::load_or_get_conversation`].
#[derive(Debug)]
pub enum LoadOutcome<'a> {
    Local(&'a Conversation),
    Fetch(StoreCommand),
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    state: StoreState,
    attachments: AttachmentRegistry,
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<StoreChange>)>,
    next_subscription: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    pub fn attachments(&self) -> &AttachmentRegistry {
        &self.attachments
    }

    pub fn subscribe(&mut self) -> (SubscriptionId, mpsc::UnboundedReceiver<StoreChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, tx));
        (id, rx)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.subscribers.len() != before
    }

    /// Drops every subscriber; their receivers observe a closed channel.
    pub fn teardown(&mut self) {
        debug!(subscribers = self.subscribers.len(), "tearing down conversation store");
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Option<&Conversation> {
        self.state.get_conversation(conversation_id)
    }

    pub fn get_active_conversation(&self) -> Option<&Conversation> {
        self.state.get_active_conversation()
    }

    pub fn active_conversation_id(&self) -> Option<&str> {
        self.state.active_conversation_id()
    }

    pub fn selected_message_id(&self) -> Option<&str> {
        self.state.selected_message_id()
    }

    pub fn editing_message_id(&self) -> Option<&str> {
        self.state.editing_message_id()
    }

    pub fn error(&self) -> Option<&str> {
        self.state.error()
    }

    pub fn create_conversation(
        &mut self,
        root_message: Message,
        id: Option<String>,
        selected_message_id: Option<String>,
    ) -> String {
        if let Some(existing) = id.as_deref().filter(|id| self.state.get_conversation(id).is_some()) {
            self.attachments.release_for_conversation(existing);
        }
        let root_id = root_message.id.clone();
        let attachments = root_message.attachments.clone();

        let conversation_id = self.state.create_conversation(root_message, id, selected_message_id);
        if let Some(attachments) = attachments {
            self.attachments
                .add_for_message(&conversation_id, &root_id, &attachments);
        }

        self.notify(StoreChange::ConversationCreated {
            conversation_id: conversation_id.clone(),
        });
        self.notify_active();
        conversation_id
    }

    /// Appends a message. Returns `false` when the conversation is unknown or
    /// the id is already taken.
    pub fn add_message(
        &mut self,
        conversation_id: &str,
        message: Message,
        selected_message_id: Option<String>,
    ) -> bool {
        let message_id = message.id.clone();
        let attachments = message.attachments.clone();
        let leaf_before = self.state.selected_message_id().map(str::to_string);

        if self
            .state
            .add_message(conversation_id, message, selected_message_id)
            .is_none()
        {
            return false;
        }
        if let Some(attachments) = attachments {
            self.attachments
                .add_for_message(conversation_id, &message_id, &attachments);
        }

        self.notify(StoreChange::MessageAdded {
            conversation_id: conversation_id.to_string(),
            message_id,
        });
        if self.state.selected_message_id() != leaf_before.as_deref() {
            self.notify_active();
        }
        true
    }

    pub fn set_active_conversation(
        &mut self,
        conversation_id: &str,
        selected_message_id: Option<String>,
    ) -> bool {
        let applied = self
            .state
            .set_active_conversation(conversation_id, selected_message_id);
        if applied {
            self.notify_active();
        }
        applied
    }

    pub fn select_message(&mut self, conversation_id: &str, message_id: &str) -> bool {
        let applied = self.state.select_message(conversation_id, message_id);
        if applied {
            self.notify_active();
        }
        applied
    }

    /// Replaces the content of a message locally and returns the write the
    /// backend should receive. The local edit stands even if that write fails.
    pub fn update_message(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        content: impl Into<String>,
    ) -> Option<StoreCommand> {
        let command = self.state.update_message(conversation_id, message_id, content)?;
        self.notify(StoreChange::MessageUpdated {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
        });
        Some(command)
    }

    /// Refreshes the payload of a message that was re-sent by the backend.
    pub(crate) fn refresh_message(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        content: String,
        cost_info: Option<CostInfo>,
        attachments: Option<Vec<Attachment>>,
    ) -> bool {
        let registered = attachments.clone();
        let applied =
            self.state
                .refresh_message(conversation_id, message_id, content, cost_info, attachments);
        if applied {
            if let Some(attachments) = registered {
                self.attachments
                    .release_for_message(conversation_id, message_id);
                self.attachments
                    .add_for_message(conversation_id, message_id, &attachments);
            }
            self.notify(StoreChange::MessageUpdated {
                conversation_id: conversation_id.to_string(),
                message_id: message_id.to_string(),
            });
        }
        applied
    }

    /// Deletes a message and its whole subtree.
    pub fn delete_message(&mut self, conversation_id: &str, message_id: &str) -> Vec<String> {
        let leaf_before = self.state.selected_message_id().map(str::to_string);
        let editing_before = self.state.editing_message_id().map(str::to_string);
        let removed = self.state.delete_message(conversation_id, message_id);
        if removed.is_empty() {
            return Vec::new();
        }

        let removed_ids: Vec<String> = removed.into_iter().map(|m| m.id).collect();
        self.release_attachments(conversation_id, removed_ids.iter().map(String::as_str));
        self.notify(StoreChange::MessagesDeleted {
            conversation_id: conversation_id.to_string(),
            message_ids: removed_ids.clone(),
        });
        self.notify_pointer_changes(leaf_before, editing_before);
        removed_ids
    }

    pub fn clear_conversation(&mut self, conversation_id: &str) -> bool {
        let leaf_before = self.state.selected_message_id().map(str::to_string);
        let editing_before = self.state.editing_message_id().map(str::to_string);
        let Some(pruned) = self.state.clear_conversation(conversation_id) else {
            return false;
        };

        self.release_attachments(conversation_id, pruned.iter().map(|m| m.id.as_str()));
        self.notify(StoreChange::ConversationCleared {
            conversation_id: conversation_id.to_string(),
        });
        self.notify_pointer_changes(leaf_before, editing_before);
        true
    }

    /// Removes a conversation. Attachment blobs owned by its messages are
    /// released before the entry leaves the map.
    pub fn delete_conversation(&mut self, conversation_id: &str) -> bool {
        if self.state.get_conversation(conversation_id).is_none() {
            self.state.remove_conversation(conversation_id);
            return false;
        }
        self.attachments.release_for_conversation(conversation_id);

        let was_active = self.state.active_conversation_id() == Some(conversation_id);
        let editing_before = self.state.editing_message_id().map(str::to_string);
        self.state.remove_conversation(conversation_id);

        self.notify(StoreChange::ConversationDeleted {
            conversation_id: conversation_id.to_string(),
        });
        if was_active {
            self.notify_active();
        }
        if self.state.editing_message_id() != editing_before.as_deref() {
            self.notify_editing();
        }
        true
    }

    /// Installs a conversation built elsewhere (bulk replay) in one step.
    pub(crate) fn install_conversation(&mut self, conversation: Conversation) {
        let conversation_id = conversation.id().to_string();
        self.attachments.release_for_conversation(&conversation_id);
        for message in conversation.messages() {
            if let Some(attachments) = message.attachments.as_deref() {
                self.attachments
                    .add_for_message(&conversation_id, &message.id, attachments);
            }
        }
        self.state.install_conversation(conversation);
        self.notify(StoreChange::ConversationCreated { conversation_id });
    }

    /// Returns the local copy of a conversation, or the command that fetches it.
    pub fn load_or_get_conversation(&self, conversation_id: &str) -> LoadOutcome<'_> {
        match self.state.get_conversation(conversation_id) {
            Some(conversation) => LoadOutcome::Local(conversation),
            None => LoadOutcome::Fetch(StoreCommand::FetchConversation {
                conversation_id: conversation_id.to_string(),
            }),
        }
    }

    pub fn edit_message(&mut self, message_id: Option<String>) {
        self.state.edit_message(message_id);
        self.notify_editing();
    }

    pub fn cancel_edit_message(&mut self) {
        self.state.cancel_edit_message();
        self.notify_editing();
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.state.set_error(error);
        self.notify(StoreChange::ErrorChanged {
            error: self.state.error().map(str::to_string),
        });
    }

    pub fn clear_error(&mut self) {
        self.state.clear_error();
        self.notify(StoreChange::ErrorChanged { error: None });
    }

    fn release_attachments<'a>(
        &mut self,
        conversation_id: &str,
        message_ids: impl IntoIterator<Item = &'a str>,
    ) {
        for message_id in message_ids {
            self.attachments
                .release_for_message(conversation_id, message_id);
        }
    }

    fn notify_pointer_changes(&mut self, leaf_before: Option<String>, editing_before: Option<String>) {
        if self.state.selected_message_id() != leaf_before.as_deref() {
            self.notify_active();
        }
        if self.state.editing_message_id() != editing_before.as_deref() {
            self.notify_editing();
        }
    }

    fn notify_active(&mut self) {
        self.notify(StoreChange::ActiveChanged {
            conversation_id: self.state.active_conversation_id().map(str::to_string),
            selected_message_id: self.state.selected_message_id().map(str::to_string),
        });
    }

    fn notify_editing(&mut self) {
        self.notify(StoreChange::EditingChanged {
            message_id: self.state.editing_message_id().map(str::to_string),
        });
    }

    fn notify(&mut self, change: StoreChange) {
        self.subscribers
            .retain(|(_, tx)| tx.send(change.clone()).is_ok());
    }
}
