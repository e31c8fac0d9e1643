//! `forkchat open` and `forkchat edit`.

use std::error::Error;

use crate::core::events::apply_outcome;
use crate::core::persistence::{dispatch_command, ConversationBackend};
use crate::core::store::{ConversationStore, LoadOutcome};

/// Makes `conversation_id` the active conversation, fetching it from the
/// backend when it is not loaded yet.
pub async fn open_conversation(
    store: &mut ConversationStore,
    backend: &dyn ConversationBackend,
    conversation_id: &str,
) -> Result<(), Box<dyn Error>> {
    let command = match store.load_or_get_conversation(conversation_id) {
        LoadOutcome::Local(_) => {
            store.set_active_conversation(conversation_id, None);
            return Ok(());
        }
        LoadOutcome::Fetch(command) => command,
    };

    let outcome = dispatch_command(backend, command).await;
    apply_outcome(store, outcome);
    if let Some(error) = store.error() {
        return Err(error.to_string().into());
    }
    if store.get_conversation(conversation_id).is_none() {
        return Err(format!("Conversation {conversation_id} has no messages").into());
    }
    Ok(())
}

/// Rewrites one message and persists the new content. The local edit stays
/// in place when the backend refuses it.
pub async fn edit_message(
    store: &mut ConversationStore,
    backend: &dyn ConversationBackend,
    conversation_id: &str,
    message_id: &str,
    content: &str,
) -> Result<(), Box<dyn Error>> {
    open_conversation(store, backend, conversation_id).await?;

    store.edit_message(Some(message_id.to_string()));
    let command = store.update_message(conversation_id, message_id, content);
    store.cancel_edit_message();
    let command =
        command.ok_or_else(|| format!("Message {message_id} not found in {conversation_id}"))?;

    let outcome = dispatch_command(backend, command).await;
    apply_outcome(store, outcome);
    match store.error() {
        Some(error) => Err(error.to_string().into()),
        None => Ok(()),
    }
}
