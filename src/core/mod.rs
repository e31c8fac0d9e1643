pub mod attachments;
pub mod config;
pub mod events;
pub mod graph;
pub mod history;
pub mod message;
pub mod outline;
pub mod parent;
pub mod persistence;
pub mod store;
