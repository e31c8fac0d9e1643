//! Plain-text transcripts of the active branch.

use std::error::Error;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::core::graph::GraphError;
use crate::core::message::{Message, MessageSource};
use crate::core::store::Conversation;

/// Formats one message the way it appears in a transcript: user turns carry
/// a display-name prefix, system notes a `## ` prefix, replies stay bare.
fn format_entry(message: &Message, user_display_name: &str) -> Option<String> {
    match message.source {
        MessageSource::User => Some(format!("{user_display_name}: {}", message.content)),
        MessageSource::Ai if !message.content.is_empty() => Some(message.content.clone()),
        MessageSource::Ai => None,
        MessageSource::System => Some(format!("## {}", message.content)),
    }
}

/// Collects the root-to-leaf path ending at `leaf_id`.
pub fn active_path<'a>(
    conversation: &'a Conversation,
    leaf_id: &str,
) -> Result<Vec<&'a Message>, GraphError> {
    conversation.graph().get_message_path(leaf_id)
}

/// Writes `path` (root first) to `file_path`, replacing any previous
/// transcript only once the new one is fully on disk.
pub fn write_transcript(
    file_path: &Path,
    path: &[&Message],
    user_display_name: &str,
) -> Result<(), Box<dyn Error>> {
    let parent = file_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp_file = NamedTempFile::new_in(parent)?;

    for message in path {
        let Some(entry) = format_entry(message, user_display_name) else {
            continue;
        };
        for line in entry.lines() {
            writeln!(temp_file, "{line}")?;
        }
        writeln!(temp_file)?;
    }

    temp_file.flush()?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(file_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::branching_store;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn writes_only_the_selected_branch() {
        let store = branching_store();
        let conversation = store.get_conversation("c1").expect("exists");
        let path = active_path(conversation, "u3").expect("acyclic");

        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("chat.log");
        write_transcript(&file, &path, "You").expect("write");

        let written = fs::read_to_string(&file).expect("read");
        assert_eq!(written, "You: hello\n\nsecond answer\n\nYou: and then?\n\n");
        assert!(!written.contains("first answer"));
    }

    #[test]
    fn rewriting_replaces_previous_contents() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("chat.log");
        fs::write(&file, "stale\n").expect("seed");

        let note = Message::system("s1", "session resumed");
        let empty_reply = Message::ai("a1", "");
        write_transcript(&file, &[&note, &empty_reply], "You").expect("write");

        assert_eq!(fs::read_to_string(&file).expect("read"), "## session resumed\n\n");
    }

    #[test]
    fn unknown_leaf_is_an_error() {
        let store = branching_store();
        let conversation = store.get_conversation("c1").expect("exists");
        assert!(matches!(
            active_path(conversation, "missing"),
            Err(GraphError::UnknownMessage(_))
        ));
    }
}
