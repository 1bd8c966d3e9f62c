//! Raft consensus algorithm implementation: the deterministic core.
//!
//! Based on:
//! - "In Search of an Understandable Consensus Algorithm" (Ongaro & Ousterhout)
//! - Diego Ongaro's PhD dissertation
//! - The TLA+ specification at github.com/ongardie/raft.tla
//!
//! The core never performs I/O and never reads a clock. The embedder feeds
//! it logical time through [`Raft::tick`] and inbound traffic through
//! [`Raft::step`], then drains a [`Ready`] bundle: messages to put on the
//! wire, entries and hard state to persist, committed entries to apply.
//! Once those are done, [`Raft::advance`] tells the node so. Given the
//! same starting state, seed, and inputs, every run is bit-identical.

pub mod cluster;
pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod progress;
pub mod raft;
pub mod storage;
pub mod unstable;

pub use config::Config;
pub use error::{Error, Result};
pub use log::RaftLog;
pub use message::{
    ConfState, Entry, EntryType, HardState, Message, MessageType, Snapshot, SnapshotMetadata,
    INVALID_ID, INVALID_INDEX,
};
pub use progress::Progress;
pub use raft::{Candidate, Leader, Raft, Ready, Role, RoleKind};
pub use storage::{MemoryStorage, Storage, NO_LIMIT};
pub use unstable::Unstable;
