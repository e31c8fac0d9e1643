use std::collections::HashMap;

use base64::Engine as _;
use tracing::{debug, warn};

use crate::core::message::Attachment;

/// Decoded attachment payload held on behalf of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentBlob {
    pub attachment_id: String,
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl AttachmentBlob {
    fn decode(attachment: &Attachment) -> Self {
        let bytes = match attachment.content.as_deref() {
            Some(encoded) => base64::engine::general_purpose::STANDARD
                .decode(strip_data_url_prefix(encoded))
                .unwrap_or_else(|err| {
                    warn!(attachment_id = %attachment.id, "attachment payload is not valid base64: {err}");
                    Vec::new()
                }),
            None => Vec::new(),
        };

        Self {
            attachment_id: attachment.id.clone(),
            name: attachment.name.clone(),
            mime_type: attachment.mime_type.clone(),
            bytes,
        }
    }
}

fn strip_data_url_prefix(encoded: &str) -> &str {
    match encoded.find(";base64,") {
        Some(position) if encoded.starts_with("data:") => &encoded[position + ";base64,".len()..],
        _ => encoded,
    }
}

type BlobKey = (String, String);

/// Blobs owned by messages, keyed by `(conversation id, message id)`. Message
/// ids are only unique inside one conversation. Entries must be released
/// before the owning conversation is dropped.
#[derive(Debug, Default)]
pub struct AttachmentRegistry {
    blobs: HashMap<BlobKey, Vec<AttachmentBlob>>,
}

impl AttachmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_for_message(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        attachments: &[Attachment],
    ) {
        if attachments.is_empty() {
            return;
        }
        let decoded = attachments.iter().map(AttachmentBlob::decode).collect();
        self.blobs
            .insert((conversation_id.to_string(), message_id.to_string()), decoded);
        debug!(conversation_id, message_id, count = attachments.len(), "registered attachments");
    }

    pub fn get(&self, conversation_id: &str, message_id: &str) -> Option<&[AttachmentBlob]> {
        self.blobs
            .get(&(conversation_id.to_string(), message_id.to_string()))
            .map(Vec::as_slice)
    }

    /// Drops the blobs owned by one message, returning how many were freed.
    pub fn release_for_message(&mut self, conversation_id: &str, message_id: &str) -> usize {
        let released = self
            .blobs
            .remove(&(conversation_id.to_string(), message_id.to_string()))
            .map(|blobs| blobs.len())
            .unwrap_or(0);
        if released > 0 {
            debug!(conversation_id, message_id, released, "released attachments");
        }
        released
    }

    /// Drops every blob owned by messages of `conversation_id`.
    pub fn release_for_conversation(&mut self, conversation_id: &str) -> usize {
        let mut released = 0;
        self.blobs.retain(|(owner, _), blobs| {
            if owner == conversation_id {
                released += blobs.len();
                false
            } else {
                true
            }
        });
        if released > 0 {
            debug!(conversation_id, released, "released conversation attachments");
        }
        released
    }

    pub fn len(&self) -> usize {
        self.blobs.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(id: &str, content: Option<&str>) -> Attachment {
        Attachment {
            id: id.to_string(),
            name: format!("{id}.txt"),
            mime_type: "text/plain".to_string(),
            size: None,
            content: content.map(str::to_string),
        }
    }

    #[test]
    fn decodes_plain_and_data_url_payloads() {
        let mut registry = AttachmentRegistry::new();
        registry.add_for_message(
            "c1",
            "m1",
            &[
                attachment("a", Some("aGVsbG8=")),
                attachment("b", Some("data:text/plain;base64,aGk=")),
            ],
        );
        let blobs = registry.get("c1", "m1").expect("registered");
        assert_eq!(blobs[0].bytes, b"hello");
        assert_eq!(blobs[1].bytes, b"hi");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn invalid_payload_keeps_an_empty_blob() {
        let mut registry = AttachmentRegistry::new();
        registry.add_for_message("c1", "m1", &[attachment("a", Some("%%%"))]);
        assert!(registry.get("c1", "m1").expect("registered")[0].bytes.is_empty());
    }

    #[test]
    fn release_drops_blobs() {
        let mut registry = AttachmentRegistry::new();
        registry.add_for_message("c1", "m1", &[attachment("a", None)]);
        assert_eq!(registry.release_for_message("c1", "m1"), 1);
        assert_eq!(registry.release_for_message("c1", "m1"), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn same_message_id_in_two_conversations_keeps_separate_blobs() {
        let mut registry = AttachmentRegistry::new();
        registry.add_for_message("c1", "m1", &[attachment("a", Some("aGVsbG8="))]);
        registry.add_for_message("c2", "m1", &[attachment("a", Some("aGk="))]);

        assert_eq!(registry.get("c1", "m1").expect("c1 blob")[0].bytes, b"hello");
        assert_eq!(registry.get("c2", "m1").expect("c2 blob")[0].bytes, b"hi");

        assert_eq!(registry.release_for_conversation("c1"), 1);
        assert!(registry.get("c1", "m1").is_none());
        assert_eq!(registry.get("c2", "m1").expect("c2 blob")[0].bytes, b"hi");
    }
}
