//! Read-only index over the flat message list of one conversation.
//!
//! The graph borrows the messages it was built from: an id lookup plus a
//! parent → children adjacency list, both built in a single pass. All walks
//! are bounded by a visited set so cyclic `parent_id` chains in malformed
//! data are reported instead of looping.

use std::collections::{HashMap, HashSet, VecDeque};
use std::error::Error as StdError;
use std::fmt;

use tracing::warn;

use crate::core::message::Message;

/// Malformed-data conditions detected while walking parent links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The requested id is not part of the graph.
    UnknownMessage(String),

    /// Following `parent_id` links from `start` revisited `repeated`.
    Cycle { start: String, repeated: String },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::UnknownMessage(id) => write!(f, "message {id} is not in the graph"),
            GraphError::Cycle { start, repeated } => write!(
                f,
                "cycle in parent links: walking up from {start} revisited {repeated}"
            ),
        }
    }
}

impl StdError for GraphError {}

pub struct MessageGraph<'a> {
    messages: &'a [Message],
    index: HashMap<&'a str, usize>,
    children: HashMap<&'a str, Vec<usize>>,
}

impl<'a> MessageGraph<'a> {
    pub fn new(messages: &'a [Message]) -> Self {
        let mut index = HashMap::with_capacity(messages.len());
        let mut children: HashMap<&'a str, Vec<usize>> = HashMap::new();

        for (position, message) in messages.iter().enumerate() {
            if index.insert(message.id.as_str(), position).is_some() {
                warn!(message_id = %message.id, "duplicate message id in graph input; keeping the later entry");
            }
            if let Some(parent_id) = message.parent_id.as_deref() {
                children.entry(parent_id).or_default().push(position);
            }
        }

        Self {
            messages,
            index,
            children,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&'a Message> {
        self.index.get(id).map(|&position| &self.messages[position])
    }

    /// Messages with no parent, or whose parent is not part of this graph,
    /// in insertion order.
    pub fn get_root_messages(&self) -> Vec<&'a Message> {
        self.messages
            .iter()
            .filter(|message| match message.parent_id.as_deref() {
                None => true,
                Some(parent_id) => !self.index.contains_key(parent_id),
            })
            .collect()
    }

    /// The root to use when several candidates exist: the first message with
    /// no parent at all, else the first one whose parent is dangling.
    pub fn canonical_root(&self) -> Option<&'a Message> {
        let roots = self.get_root_messages();
        if roots.len() > 1 {
            warn!(
                root_count = roots.len(),
                roots = %roots.iter().map(|m| m.id.as_str()).collect::<Vec<_>>().join(", "),
                "conversation has more than one root"
            );
        }
        roots
            .iter()
            .find(|message| message.parent_id.is_none())
            .or_else(|| roots.first())
            .copied()
    }

    /// Direct children of `id`, in insertion order.
    pub fn get_children(&self, id: &str) -> Vec<&'a Message> {
        self.children
            .get(id)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&position| &self.messages[position])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Path from the root down to `id`, inclusive on both ends.
    pub fn get_message_path(&self, id: &str) -> Result<Vec<&'a Message>, GraphError> {
        let mut current = self
            .get(id)
            .ok_or_else(|| GraphError::UnknownMessage(id.to_string()))?;
        let mut visited: HashSet<&str> = HashSet::new();
        let mut path = Vec::new();

        loop {
            if !visited.insert(current.id.as_str()) {
                return Err(GraphError::Cycle {
                    start: id.to_string(),
                    repeated: current.id.clone(),
                });
            }
            path.push(current);

            match current.parent_id.as_deref().and_then(|parent| self.get(parent)) {
                Some(parent) => current = parent,
                None => break,
            }
        }

        path.reverse();
        Ok(path)
    }

    pub fn depth(&self, id: &str) -> Result<usize, GraphError> {
        self.get_message_path(id).map(|path| path.len() - 1)
    }

    /// `id` and every message below it, breadth first.
    pub fn subtree_ids(&self, id: &str) -> HashSet<&'a str> {
        let mut collected = HashSet::new();
        let Some(start) = self.get(id) else {
            return collected;
        };

        let mut queue = VecDeque::from([start]);
        while let Some(message) = queue.pop_front() {
            if !collected.insert(message.id.as_str()) {
                continue;
            }
            queue.extend(self.get_children(&message.id));
        }
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branching_messages() -> Vec<Message> {
        vec![
            Message::user("m1", "hello").with_timestamp(1),
            Message::ai("m2", "hi").with_parent("m1").with_timestamp(2),
            Message::ai("m3", "hey").with_parent("m1").with_timestamp(3),
            Message::user("m4", "more").with_parent("m3").with_timestamp(4),
        ]
    }

    #[test]
    fn children_follow_insertion_order() {
        let messages = branching_messages();
        let graph = MessageGraph::new(&messages);
        let ids: Vec<_> = graph.get_children("m1").iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m2", "m3"]);
        assert!(graph.get_children("m2").is_empty());
    }

    #[test]
    fn path_runs_from_root_to_leaf() {
        let messages = branching_messages();
        let graph = MessageGraph::new(&messages);
        let path = graph.get_message_path("m4").expect("acyclic");
        let ids: Vec<_> = path.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m3", "m4"]);
        assert_eq!(graph.depth("m4"), Ok(2));
        assert_eq!(graph.depth("m1"), Ok(0));
    }

    #[test]
    fn dangling_parent_counts_as_root() {
        let messages = vec![
            Message::user("a", "x"),
            Message::ai("b", "y").with_parent("missing"),
        ];
        let graph = MessageGraph::new(&messages);
        let roots: Vec<_> = graph.get_root_messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(roots, ["a", "b"]);
        assert_eq!(graph.canonical_root().map(|m| m.id.as_str()), Some("a"));
    }

    #[test]
    fn canonical_root_falls_back_to_first_dangling_message() {
        let messages = vec![
            Message::ai("b", "y").with_parent("gone"),
            Message::user("c", "z").with_parent("b"),
        ];
        let graph = MessageGraph::new(&messages);
        assert_eq!(graph.canonical_root().map(|m| m.id.as_str()), Some("b"));
    }

    #[test]
    fn cycles_are_reported_instead_of_looping() {
        let messages = vec![
            Message::user("x", "1").with_parent("z"),
            Message::ai("y", "2").with_parent("x"),
            Message::user("z", "3").with_parent("y"),
        ];
        let graph = MessageGraph::new(&messages);
        assert!(graph.get_root_messages().is_empty());
        assert!(matches!(
            graph.get_message_path("y"),
            Err(GraphError::Cycle { ref repeated, .. }) if repeated == "y"
        ));
        assert_eq!(graph.subtree_ids("x").len(), 3);
    }

    #[test]
    fn unknown_ids_are_errors() {
        let messages = branching_messages();
        let graph = MessageGraph::new(&messages);
        assert_eq!(
            graph.get_message_path("nope"),
            Err(GraphError::UnknownMessage("nope".to_string()))
        );
    }

    #[test]
    fn subtree_collects_all_descendants() {
        let messages = branching_messages();
        let graph = MessageGraph::new(&messages);
        let subtree = graph.subtree_ids("m3");
        assert_eq!(subtree.len(), 2);
        assert!(subtree.contains("m3") && subtree.contains("m4"));
    }
}
