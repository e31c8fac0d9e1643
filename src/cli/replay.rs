//! `forkchat replay`: rebuild conversations from a recorded event stream.

use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::events::{drain_events, ChatEvent};
use crate::core::outline::render_conversation;
use crate::core::store::ConversationStore;
use crate::utils::transcript::{active_path, write_transcript};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub skipped: usize,
    pub changes: usize,
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Applied {} event(s), skipped {}, {} store change(s).",
            self.applied, self.skipped, self.changes
        )
    }
}

/// Feeds every line of a JSON Lines file through the event pipeline.
/// Blank lines are ignored; lines that fail validation are logged and
/// counted as skipped.
pub async fn replay_reader(
    reader: impl BufRead,
) -> Result<(ConversationStore, ReplaySummary), io::Error> {
    let mut store = ConversationStore::new();
    let (_subscription, mut changes) = store.subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut summary = ReplaySummary::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match ChatEvent::parse(&line) {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(err) => {
                warn!(line = index + 1, "skipping invalid event: {err}");
                summary.skipped += 1;
            }
        }
    }
    drop(tx);

    summary.applied = drain_events(&mut store, &mut rx).await;
    while changes.try_recv().is_ok() {
        summary.changes += 1;
    }
    store.teardown();
    debug!(?summary, "replay finished");
    Ok((store, summary))
}

pub async fn run_replay(events: &Path, transcript: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let file = File::open(events)?;
    let (store, summary) = replay_reader(BufReader::new(file)).await?;

    for conversation in store.state().conversations() {
        let selected = (store.active_conversation_id() == Some(conversation.id()))
            .then(|| store.selected_message_id())
            .flatten();
        println!("{}", render_conversation(conversation, selected));
    }
    println!("{summary}");

    if let Some(target) = transcript {
        let (Some(conversation), Some(leaf)) =
            (store.get_active_conversation(), store.selected_message_id())
        else {
            eprintln!("⚠️  No active conversation; transcript not written");
            return Ok(());
        };
        let path = active_path(conversation, leaf)?;
        write_transcript(target, &path, "You")?;
        println!("✅ Wrote {} message(s) to {}", path.len(), target.display());
    }
    Ok(())
}
