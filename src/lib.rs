//! Forkchat keeps chat conversations as message trees so that edits and
//! regenerated replies become sibling branches instead of overwriting history.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core::store`] owns loaded conversations, the active conversation and
//!   the selected leaf. Mutations are synchronous and hand back
//!   [`core::store::StoreCommand`]s for anything that needs the backend.
//! - [`core::graph`] and [`core::parent`] answer structural questions about a
//!   conversation and decide where a message without a parent belongs.
//! - [`core::events`] validates pushed chat events and feeds them into the store.
//! - [`core::history`] and [`core::persistence`] rebuild stored conversations
//!   and talk to the backend.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod cli;
pub mod core;
pub mod utils;
