//! Push-channel event ingestion.
//!
//! Payloads are validated into [`ChatEvent`] at the boundary; only typed
//! events reach the store. Events are applied strictly in arrival order.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::graph::MessageGraph;
use crate::core::message::{now_millis, Attachment, CostInfo, Message, MessageSource};
use crate::core::persistence::CommandOutcome;
use crate::core::store::{ConversationStore, StoreState};
use crate::utils::ids::generate_conversation_id;

/// A single message pushed by the backend, possibly without a parent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub id: String,
    #[serde(default)]
    pub content: String,
    pub source: MessageSource,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub cost_info: Option<CostInfo>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl IncomingMessage {
    fn into_message(self) -> Message {
        Message {
            id: self.id,
            content: self.content,
            source: self.source,
            parent_id: self.parent_id,
            timestamp: self.timestamp.unwrap_or_else(now_millis),
            cost_info: self.cost_info,
            attachments: self.attachments,
        }
    }
}

/// Full history of one conversation, replayed in bulk.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationLoad {
    pub conversation_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub selected_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    #[serde(rename = "conversation-new")]
    ConversationNew(IncomingMessage),
    #[serde(rename = "conversation-load")]
    ConversationLoad(ConversationLoad),
}

#[derive(Debug)]
pub enum EventError {
    /// The payload does not match any known event shape.
    Decode(serde_json::Error),

    /// A required identifier was present but empty.
    EmptyField(&'static str),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::Decode(source) => write!(f, "invalid event payload: {source}"),
            EventError::EmptyField(field) => write!(f, "event field `{field}` must not be empty"),
        }
    }
}

impl StdError for EventError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            EventError::Decode(source) => Some(source),
            EventError::EmptyField(_) => None,
        }
    }
}

impl From<serde_json::Error> for EventError {
    fn from(source: serde_json::Error) -> Self {
        EventError::Decode(source)
    }
}

impl ChatEvent {
    pub fn from_value(value: serde_json::Value) -> Result<Self, EventError> {
        let event: ChatEvent = serde_json::from_value(value)?;
        event.validate()?;
        Ok(event)
    }

    pub fn parse(payload: &str) -> Result<Self, EventError> {
        let event: ChatEvent = serde_json::from_str(payload)?;
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), EventError> {
        match self {
            ChatEvent::ConversationNew(message) => {
                if message.id.trim().is_empty() {
                    return Err(EventError::EmptyField("id"));
                }
                if message.conversation_id.as_deref().is_some_and(str::is_empty) {
                    return Err(EventError::EmptyField("conversationId"));
                }
            }
            ChatEvent::ConversationLoad(load) => {
                if load.conversation_id.trim().is_empty() {
                    return Err(EventError::EmptyField("conversationId"));
                }
                if load.messages.iter().any(|m| m.id.trim().is_empty()) {
                    return Err(EventError::EmptyField("messages[].id"));
                }
            }
        }
        Ok(())
    }
}

/// Applies one event. Returns `false` when the event left the store unchanged.
pub fn apply_event(store: &mut ConversationStore, event: ChatEvent) -> bool {
    match event {
        ChatEvent::ConversationNew(message) => append_incoming(store, message),
        ChatEvent::ConversationLoad(load) => replay_conversation(
            store,
            &load.conversation_id,
            load.messages,
            load.selected_message_id,
        ),
    }
}

pub fn apply_events(store: &mut ConversationStore, events: impl IntoIterator<Item = ChatEvent>) -> usize {
    events
        .into_iter()
        .map(|event| apply_event(store, event))
        .filter(|applied| *applied)
        .count()
}

/// Applies events in arrival order until every sender is dropped.
pub async fn drain_events(
    store: &mut ConversationStore,
    events: &mut mpsc::UnboundedReceiver<ChatEvent>,
) -> usize {
    let mut applied = 0;
    while let Some(event) = events.recv().await {
        if apply_event(store, event) {
            applied += 1;
        }
    }
    applied
}

/// Feeds the result of a dispatched command back into the store.
pub fn apply_outcome(store: &mut ConversationStore, outcome: CommandOutcome) -> bool {
    match outcome {
        CommandOutcome::Persisted {
            conversation_id,
            message_id,
        } => {
            debug!(%conversation_id, %message_id, "message content persisted");
            true
        }
        CommandOutcome::Fetched {
            conversation_id,
            messages,
            ..
        } => replay_conversation(store, &conversation_id, messages, None),
        CommandOutcome::Failed { command, error } => {
            warn!(?command, "backend command failed: {error}");
            store.set_error(error);
            true
        }
    }
}

fn append_incoming(store: &mut ConversationStore, incoming: IncomingMessage) -> bool {
    let target = incoming
        .conversation_id
        .clone()
        .filter(|id| store.get_conversation(id).is_some())
        .or_else(|| store.active_conversation_id().map(str::to_string));

    let Some(conversation_id) = target else {
        let conversation_id = incoming
            .conversation_id
            .clone()
            .unwrap_or_else(generate_conversation_id);
        let message = incoming.into_message();
        let root_id = message.id.clone();
        info!(%conversation_id, message_id = %root_id, "starting conversation from pushed message");
        store.create_conversation(message, Some(conversation_id.clone()), Some(root_id.clone()));
        return store.set_active_conversation(&conversation_id, Some(root_id));
    };

    let already_present = store
        .get_conversation(&conversation_id)
        .is_some_and(|conversation| conversation.contains(&incoming.id));
    if already_present {
        return store.refresh_message(
            &conversation_id,
            &incoming.id,
            incoming.content,
            incoming.cost_info,
            incoming.attachments,
        );
    }

    let message = incoming.into_message();
    // Model replies move the active leaf; user turns leave it to the caller.
    let leaf = message.source.is_ai().then(|| message.id.clone());
    store.add_message(&conversation_id, message, leaf)
}

/// Rebuilds a conversation from its flat message list and makes it active.
///
/// The conversation is assembled off to the side and installed with a single
/// insert, so observers never see a partially replayed tree.
pub fn replay_conversation(
    store: &mut ConversationStore,
    conversation_id: &str,
    messages: Vec<Message>,
    selected_message_id: Option<String>,
) -> bool {
    let Some(last_id) = messages.last().map(|m| m.id.clone()) else {
        warn!(conversation_id, "ignoring load event without messages");
        return false;
    };

    let graph = MessageGraph::new(&messages);
    let root = match graph.canonical_root() {
        Some(root) => root,
        None => {
            warn!(conversation_id, "no root found in replayed messages; using the first message");
            &messages[0]
        }
    };
    let root_id = root.id.clone();

    let mut scratch = StoreState::new();
    scratch.create_conversation(root.clone(), Some(conversation_id.to_string()), None);

    let mut pending: Vec<&Message> = messages
        .iter()
        .filter(|message| {
            if message.id == root_id {
                return false;
            }
            if message.parent_id.is_none() {
                warn!(conversation_id, message_id = %message.id, "dropping extra root message");
                return false;
            }
            true
        })
        .collect();
    pending.sort_by_key(|message| message.timestamp);

    for message in order_parents_first(pending) {
        scratch.add_message(conversation_id, message.clone(), None);
    }

    let Some(conversation) = scratch.remove_conversation(conversation_id) else {
        return false;
    };
    let message_count = conversation.len();
    store.install_conversation(conversation);
    let leaf = selected_message_id.or(Some(last_id));
    store.set_active_conversation(conversation_id, leaf);
    info!(conversation_id, message_count, "replayed conversation");
    true
}

/// Keeps timestamp order but holds back a message until its parent has been
/// emitted. Messages whose parent never shows up (dangling or cyclic) follow
/// at the end in their original order.
fn order_parents_first(pending: Vec<&Message>) -> Vec<&Message> {
    let known: HashSet<&str> = pending.iter().map(|m| m.id.as_str()).collect();
    let mut emitted: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());
    let mut waiting = pending;

    loop {
        let before = waiting.len();
        let mut still_waiting = Vec::new();
        for message in waiting {
            let ready = match message.parent_id.as_deref() {
                Some(parent) if known.contains(parent) => emitted.contains(parent),
                _ => true,
            };
            if ready {
                emitted.insert(message.id.as_str());
                ordered.push(message);
            } else {
                still_waiting.push(message);
            }
        }
        waiting = still_waiting;
        if waiting.is_empty() || waiting.len() == before {
            break;
        }
    }

    ordered.extend(waiting);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_payload_shapes_at_the_boundary() {
        let event = ChatEvent::from_value(json!({
            "type": "conversation-new",
            "id": "m1",
            "content": "hi",
            "source": "user"
        }))
        .expect("valid event");
        assert!(matches!(event, ChatEvent::ConversationNew(ref m) if m.id == "m1"));

        assert!(matches!(
            ChatEvent::from_value(json!({"type": "conversation-new", "id": " ", "source": "user"})),
            Err(EventError::EmptyField("id"))
        ));
        assert!(matches!(
            ChatEvent::from_value(json!({"type": "conversation-new", "id": "m1", "source": "robot"})),
            Err(EventError::Decode(_))
        ));
        assert!(matches!(
            ChatEvent::parse(r#"{"type": "conversation-drop", "id": "m1"}"#),
            Err(EventError::Decode(_))
        ));
    }

    #[test]
    fn first_push_without_active_conversation_creates_one() {
        let mut store = ConversationStore::new();
        let event = ChatEvent::parse(
            r#"{"type":"conversation-new","id":"m1","content":"hello","source":"user","parentId":"ghost"}"#,
        )
        .expect("valid");
        assert!(apply_event(&mut store, event));

        let conversation = store.get_active_conversation().expect("created");
        assert!(conversation.id().starts_with("conv_"));
        assert_eq!(conversation.messages()[0].parent_id, None);
        assert_eq!(store.selected_message_id(), Some("m1"));
    }

    #[test]
    fn ai_push_advances_leaf_and_user_push_does_not() {
        let mut store = ConversationStore::new();
        store.create_conversation(Message::system("root", "sys").with_timestamp(0), Some("c1".into()), None);

        let user = ChatEvent::ConversationNew(IncomingMessage {
            id: "u1".into(),
            content: "question".into(),
            source: MessageSource::User,
            parent_id: None,
            timestamp: Some(1),
            cost_info: None,
            attachments: None,
            conversation_id: None,
        });
        assert!(apply_event(&mut store, user));
        assert_eq!(store.selected_message_id(), Some("root"));

        let reply = ChatEvent::parse(
            r#"{"type":"conversation-new","id":"a1","content":"answer","source":"assistant","timestamp":2}"#,
        )
        .expect("valid");
        assert!(apply_event(&mut store, reply));
        let conversation = store.get_conversation("c1").expect("exists");
        assert_eq!(
            conversation.get_message("a1").and_then(|m| m.parent_id.as_deref()),
            Some("u1")
        );
        assert_eq!(store.selected_message_id(), Some("a1"));
    }

    #[test]
    fn repeated_push_refreshes_payload_in_place() {
        let mut store = ConversationStore::new();
        store.create_conversation(Message::user("u1", "q").with_timestamp(1), Some("c1".into()), None);
        let first = ChatEvent::parse(
            r#"{"type":"conversation-new","id":"a1","content":"","source":"ai","timestamp":2}"#,
        )
        .expect("valid");
        let second = ChatEvent::parse(
            r#"{"type":"conversation-new","id":"a1","content":"done","source":"ai","costInfo":{"totalCost":1.5}}"#,
        )
        .expect("valid");
        assert_eq!(apply_events(&mut store, [first, second]), 2);

        let conversation = store.get_conversation("c1").expect("exists");
        assert_eq!(conversation.len(), 2);
        let reply = conversation.get_message("a1").expect("present");
        assert_eq!(reply.content, "done");
        assert_eq!(reply.parent_id.as_deref(), Some("u1"));
        assert_eq!(reply.cost_info.as_ref().map(|c| c.total_cost), Some(1.5));
    }

    #[test]
    fn bulk_replay_inserts_parents_before_children() {
        let mut store = ConversationStore::new();
        // m3 claims an earlier timestamp than its parent m2.
        let messages = vec![
            Message::user("m1", "root").with_timestamp(10),
            Message::user("m3", "child").with_parent("m2").with_timestamp(15),
            Message::ai("m2", "reply").with_parent("m1").with_timestamp(20),
            Message::ai("m4", "sibling").with_parent("m1").with_timestamp(30),
        ];
        assert!(replay_conversation(&mut store, "c9", messages, None));

        let conversation = store.get_conversation("c9").expect("installed");
        let graph = conversation.graph();
        assert_eq!(graph.get_root_messages().len(), 1);
        let path: Vec<_> = graph
            .get_message_path("m3")
            .expect("acyclic")
            .iter()
            .map(|m| m.id.clone())
            .collect();
        assert_eq!(path, ["m1", "m2", "m3"]);
        assert_eq!(store.active_conversation_id(), Some("c9"));
        assert_eq!(store.selected_message_id(), Some("m4"));
    }

    #[test]
    fn bulk_replay_breaks_cycles_and_drops_extra_roots() {
        let mut store = ConversationStore::new();
        let messages = vec![
            Message::system("root", "sys").with_timestamp(0),
            Message::user("x", "1").with_parent("y").with_timestamp(1),
            Message::ai("y", "2").with_parent("x").with_timestamp(2),
            Message::user("stray", "3").with_timestamp(3),
        ];
        let event = ChatEvent::ConversationLoad(ConversationLoad {
            conversation_id: "c1".into(),
            messages,
            selected_message_id: Some("x".into()),
        });
        assert!(apply_event(&mut store, event));

        let conversation = store.get_conversation("c1").expect("installed");
        assert!(!conversation.contains("stray"));
        let graph = conversation.graph();
        assert_eq!(graph.get_root_messages().len(), 1);
        assert!(graph.get_message_path("y").is_ok());
        assert_eq!(store.selected_message_id(), Some("x"));
    }

    #[test]
    fn empty_load_is_a_no_op() {
        let mut store = ConversationStore::new();
        let event = ChatEvent::parse(r#"{"type":"conversation-load","conversationId":"c1","messages":[]}"#)
            .expect("valid");
        assert!(!apply_event(&mut store, event));
        assert_eq!(store.state().conversation_count(), 0);
    }

    #[test]
    fn failed_outcome_sets_error_without_touching_tree() {
        let mut store = ConversationStore::new();
        store.create_conversation(Message::user("m1", "hi"), Some("c1".into()), None);
        store.update_message("c1", "m1", "edited");
        let before = store.get_conversation("c1").cloned();

        apply_outcome(
            &mut store,
            CommandOutcome::Failed {
                command: crate::core::store::StoreCommand::PersistMessageContent {
                    conversation_id: "c1".into(),
                    message_id: "m1".into(),
                    content: "edited".into(),
                },
                error: "backend unavailable".into(),
            },
        );
        assert_eq!(store.error(), Some("backend unavailable"));
        assert_eq!(store.get_conversation("c1").cloned(), before);
    }

    #[tokio::test]
    async fn drain_applies_events_in_arrival_order() {
        let mut store = ConversationStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for (id, source, ts) in [("u1", "user", 1), ("a1", "ai", 2), ("u2", "user", 3)] {
            let payload = json!({"type": "conversation-new", "id": id, "source": source, "timestamp": ts});
            tx.send(ChatEvent::from_value(payload).expect("valid")).expect("open");
        }
        drop(tx);

        assert_eq!(drain_events(&mut store, &mut rx).await, 3);
        let conversation = store.get_active_conversation().expect("created");
        let ids: Vec<_> = conversation.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["u1", "a1", "u2"]);
        assert_eq!(
            conversation.get_message("u2").and_then(|m| m.parent_id.as_deref()),
            Some("a1")
        );
    }
}
