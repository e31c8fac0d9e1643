use crate::core::message::{Message, MessageSource};

/// Which rule picked the parent of an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRule {
    /// The conversation was empty, so the message becomes its root.
    Root,
    /// Continues the branch ending at the selected leaf.
    ActiveLeaf,
    /// Replies to the newest user turn.
    LatestUserMessage,
    /// Nothing better was available; attaches to the last message inserted.
    LastMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentResolution {
    pub parent_id: Option<String>,
    pub rule: ParentRule,
}

impl ParentResolution {
    fn new(parent_id: Option<&str>, rule: ParentRule) -> Self {
        Self {
            parent_id: parent_id.map(str::to_string),
            rule,
        }
    }
}

/// Infers the parent of a message that arrived without one.
pub struct ParentResolver<'a> {
    messages: &'a [Message],
    selected_message_id: Option<&'a str>,
}

impl<'a> ParentResolver<'a> {
    pub fn new(messages: &'a [Message], selected_message_id: Option<&'a str>) -> Self {
        Self {
            messages,
            selected_message_id,
        }
    }

    pub fn resolve(&self, source: MessageSource) -> ParentResolution {
        let Some(last) = self.messages.last() else {
            return ParentResolution::new(None, ParentRule::Root);
        };

        match source {
            MessageSource::Ai => match self.latest_user_message() {
                Some(user) => ParentResolution::new(Some(&user.id), ParentRule::LatestUserMessage),
                None => ParentResolution::new(Some(&last.id), ParentRule::LastMessage),
            },
            MessageSource::User | MessageSource::System => match self.selected_in_conversation() {
                Some(selected) => ParentResolution::new(Some(selected), ParentRule::ActiveLeaf),
                None => ParentResolution::new(Some(&last.id), ParentRule::LastMessage),
            },
        }
    }

    // The selected leaf belongs to the active conversation, which is not
    // necessarily the one being appended to.
    fn selected_in_conversation(&self) -> Option<&'a str> {
        let selected = self.selected_message_id?;
        self.messages
            .iter()
            .any(|message| message.id == selected)
            .then_some(selected)
    }

    /// Newest user message by timestamp; on ties the earliest inserted wins.
    fn latest_user_message(&self) -> Option<&'a Message> {
        self.messages
            .iter()
            .filter(|message| message.source.is_user())
            .fold(None, |best: Option<&Message>, candidate| match best {
                Some(current) if current.timestamp >= candidate.timestamp => Some(current),
                _ => Some(candidate),
            })
    }
}
