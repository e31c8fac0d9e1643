//! Backend collaborator and command dispatch.
//!
//! Store mutations hand back [`StoreCommand`]s; this module executes them
//! against a [`ConversationBackend`] and reports a [`CommandOutcome`] that the
//! caller feeds into [`crate::core::events::apply_outcome`].

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::history::{
    flat_nodes_to_messages, flatten_tree, reconstruct_tree, FlatNode, HistoricalConversation,
};
use crate::core::message::Message;
use crate::core::store::StoreCommand;
use crate::utils::url::construct_api_url;

#[derive(Debug)]
pub enum PersistenceError {
    /// The request never produced a usable response.
    Transport {
        endpoint: String,
        source: reqwest::Error,
    },

    /// The backend answered with a non-success HTTP status.
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },

    /// The backend answered `success: false`.
    Rejected { endpoint: String, message: String },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Transport { endpoint, source } => {
                write!(f, "Request to {endpoint} failed: {source}")
            }
            PersistenceError::Status { endpoint, status } => {
                write!(f, "Request to {endpoint} returned {status}")
            }
            PersistenceError::Rejected { endpoint, message } => {
                write!(f, "Backend rejected {endpoint}: {message}")
            }
        }
    }
}

impl StdError for PersistenceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            PersistenceError::Transport { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A historical conversation as fetched from the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalTree {
    pub flat_nodes: Vec<FlatNode>,
    pub summary: Option<String>,
}

#[async_trait]
pub trait ConversationBackend: Send + Sync {
    async fn update_message_content(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), PersistenceError>;

    async fn list_historical_conversations(
        &self,
    ) -> Result<Vec<HistoricalConversation>, PersistenceError>;

    async fn fetch_historical_conversation_tree(
        &self,
        conversation_id: &str,
    ) -> Result<HistoricalTree, PersistenceError>;

    async fn delete_historical_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<(), PersistenceError>;
}

#[derive(Debug, Deserialize)]
struct Acknowledgement {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    conversations: Vec<HistoricalConversation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TreeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, alias = "treeData")]
    flat_nodes: Vec<FlatNode>,
    #[serde(default)]
    summary: Option<String>,
}

fn ensure_success(endpoint: &str, success: bool, error: Option<String>) -> Result<(), PersistenceError> {
    if success {
        Ok(())
    } else {
        Err(PersistenceError::Rejected {
            endpoint: endpoint.to_string(),
            message: error.unwrap_or_else(|| "request was not successful".to_string()),
        })
    }
}

/// JSON-over-HTTP backend. Every call is a POST identified by `X-Client-Id`.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PersistenceError> {
        let base_url = base_url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| PersistenceError::Transport {
                endpoint: base_url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            base_url,
            client_id: client_id.into(),
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<T, PersistenceError> {
        let url = construct_api_url(&self.base_url, endpoint);
        debug!(%url, "backend request");
        let transport = |source| PersistenceError::Transport {
            endpoint: endpoint.to_string(),
            source,
        };

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Client-Id", &self.client_id)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PersistenceError::Status {
                endpoint: endpoint.to_string(),
                status,
            });
        }
        response.json::<T>().await.map_err(transport)
    }
}

#[async_trait]
impl ConversationBackend for HttpBackend {
    async fn update_message_content(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), PersistenceError> {
        let endpoint = "api/updateMessage";
        let ack: Acknowledgement = self
            .post(
                endpoint,
                json!({
                    "conversationId": conversation_id,
                    "messageId": message_id,
                    "content": content,
                }),
            )
            .await?;
        ensure_success(endpoint, ack.success, ack.error)
    }

    async fn list_historical_conversations(
        &self,
    ) -> Result<Vec<HistoricalConversation>, PersistenceError> {
        let endpoint = "api/getAllHistoricalConversationTrees";
        let response: ListResponse = self.post(endpoint, json!({})).await?;
        ensure_success(endpoint, response.success, response.error)?;
        Ok(response.conversations)
    }

    async fn fetch_historical_conversation_tree(
        &self,
        conversation_id: &str,
    ) -> Result<HistoricalTree, PersistenceError> {
        let endpoint = "api/historicalConversationTree";
        let response: TreeResponse = self
            .post(endpoint, json!({ "conversationId": conversation_id }))
            .await?;
        ensure_success(endpoint, response.success, response.error)?;
        Ok(HistoricalTree {
            flat_nodes: response.flat_nodes,
            summary: response.summary,
        })
    }

    async fn delete_historical_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<(), PersistenceError> {
        let endpoint = "api/deleteConversation";
        let ack: Acknowledgement = self
            .post(endpoint, json!({ "conversationId": conversation_id }))
            .await?;
        ensure_success(endpoint, ack.success, ack.error)
    }
}

/// What happened to a dispatched [`StoreCommand`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Persisted {
        conversation_id: String,
        message_id: String,
    },
    Fetched {
        conversation_id: String,
        messages: Vec<Message>,
        summary: Option<String>,
    },
    Failed {
        command: StoreCommand,
        error: String,
    },
}

pub async fn dispatch_command(
    backend: &dyn ConversationBackend,
    command: StoreCommand,
) -> CommandOutcome {
    let result = match &command {
        StoreCommand::PersistMessageContent {
            conversation_id,
            message_id,
            content,
        } => backend
            .update_message_content(conversation_id, message_id, content)
            .await
            .map(|()| CommandOutcome::Persisted {
                conversation_id: conversation_id.clone(),
                message_id: message_id.clone(),
            }),
        StoreCommand::FetchConversation { conversation_id } => backend
            .fetch_historical_conversation_tree(conversation_id)
            .await
            .map(|tree| {
                // Only nodes reachable from the entry point make it into the store.
                let flat = reconstruct_tree(&tree.flat_nodes)
                    .map(|root| flatten_tree(&root))
                    .unwrap_or_default();
                CommandOutcome::Fetched {
                    conversation_id: conversation_id.clone(),
                    messages: flat_nodes_to_messages(flat),
                    summary: tree.summary,
                }
            }),
    };

    result.unwrap_or_else(|err| CommandOutcome::Failed {
        command,
        error: err.to_string(),
    })
}

/// Runs a batch of commands concurrently, returning outcomes in input order.
pub async fn dispatch_all(
    backend: &dyn ConversationBackend,
    commands: impl IntoIterator<Item = StoreCommand>,
) -> Vec<CommandOutcome> {
    join_all(
        commands
            .into_iter()
            .map(|command| dispatch_command(backend, command)),
    )
    .await
}

/// Fire-and-forget dispatch on the tokio runtime. Outcomes arrive on the
/// receiver returned by [`CommandDispatcher::new`].
#[derive(Clone)]
pub struct CommandDispatcher {
    backend: Arc<dyn ConversationBackend>,
    tx: mpsc::UnboundedSender<CommandOutcome>,
    cancel: CancellationToken,
}

impl CommandDispatcher {
    pub fn new(
        backend: Arc<dyn ConversationBackend>,
    ) -> (Self, mpsc::UnboundedReceiver<CommandOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                backend,
                tx,
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    pub fn dispatch(&self, command: StoreCommand) {
        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(?command, "command dropped during shutdown");
                }
                outcome = dispatch_command(backend.as_ref(), command.clone()) => {
                    let _ = tx.send(outcome);
                }
            }
        });
    }

    pub fn dispatch_many<I>(&self, commands: I)
    where
        I: IntoIterator<Item = StoreCommand>,
    {
        for command in commands {
            self.dispatch(command);
        }
    }

    /// Cancels in-flight commands; their outcomes are never delivered.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
