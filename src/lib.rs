//! Mindflow library crate
//!
//! A small personal planner: a scripted discovery dialogue that turns a vague
//! feeling into one concrete task, and a persistent task list with completion,
//! deletion and breakdown into subtasks.

pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod dialogue;
pub mod models;
pub mod script;
pub mod store;

pub use app::{Core, CoreError, Snapshot, Update};
pub use dialogue::{DialogueError, DialogueSession, SessionToken};
pub use models::{DialogueOption, Task, TaskId, View};
pub use store::{FileSlot, MemorySlot, Slot, StoreError, TaskStore};
