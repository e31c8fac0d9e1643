use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::history::{FlatNode, HistoricalConversation};
use crate::core::message::Message;
use crate::core::persistence::{ConversationBackend, HistoricalTree, PersistenceError};
use crate::core::store::{Conversation, ConversationStore};

/// Store holding one active conversation `c1` with two sibling replies:
///
/// ```text
/// u1 "hello"
/// ├── a1 "first answer"
/// └── a2 "second answer"
///     └── u3 "and then?"   <- selected
/// ```
pub fn branching_store() -> ConversationStore {
    let mut store = ConversationStore::new();
    store.create_conversation(
        Message::user("u1", "hello").with_timestamp(1),
        Some("c1".into()),
        None,
    );
    store.add_message(
        "c1",
        Message::ai("a1", "first answer").with_parent("u1").with_timestamp(2),
        Some("a1".into()),
    );
    store.add_message(
        "c1",
        Message::ai("a2", "second answer").with_parent("u1").with_timestamp(3),
        Some("a2".into()),
    );
    store.add_message(
        "c1",
        Message::user("u3", "and then?").with_parent("a2").with_timestamp(4),
        Some("u3".into()),
    );
    store
}

pub fn count_roots(conversation: &Conversation) -> usize {
    conversation
        .messages()
        .iter()
        .filter(|message| message.is_root())
        .count()
}

pub fn flat_node(id: &str, parent: Option<&str>, source: &str, timestamp: i64) -> FlatNode {
    FlatNode {
        id: id.to_string(),
        parent_id: parent.map(str::to_string),
        text: id.to_uppercase(),
        source: Some(source.to_string()),
        timestamp: Some(timestamp),
        cost_info: None,
        attachments: None,
    }
}

/// In-memory [`ConversationBackend`] that records writes and deletions.
#[derive(Default)]
pub struct FakeBackend {
    pub writes: Mutex<Vec<(String, String, String)>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_writes: bool,
    pub listing: Vec<HistoricalConversation>,
    pub trees: Vec<(String, Vec<FlatNode>)>,
}

#[async_trait]
impl ConversationBackend for FakeBackend {
    async fn update_message_content(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), PersistenceError> {
        if self.fail_writes {
            return Err(PersistenceError::Rejected {
                endpoint: "api/updateMessage".to_string(),
                message: "disk full".to_string(),
            });
        }
        self.writes.lock().unwrap().push((
            conversation_id.to_string(),
            message_id.to_string(),
            content.to_string(),
        ));
        Ok(())
    }

    async fn list_historical_conversations(
        &self,
    ) -> Result<Vec<HistoricalConversation>, PersistenceError> {
        Ok(self.listing.clone())
    }

    async fn fetch_historical_conversation_tree(
        &self,
        conversation_id: &str,
    ) -> Result<HistoricalTree, PersistenceError> {
        self.trees
            .iter()
            .find(|(id, _)| id == conversation_id)
            .map(|(_, nodes)| HistoricalTree {
                flat_nodes: nodes.clone(),
                summary: Some("stored".to_string()),
            })
            .ok_or_else(|| PersistenceError::Rejected {
                endpoint: "api/historicalConversationTree".to_string(),
                message: "not found".to_string(),
            })
    }

    async fn delete_historical_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<(), PersistenceError> {
        self.deleted.lock().unwrap().push(conversation_id.to_string());
        Ok(())
    }
}
