//! Chat message pipeline: command handling, staged uploads, commit-gated
//! event fan-out and keyset-paginated history.

pub mod commands;
pub mod effects;
pub mod error;
pub mod janitor;
pub mod query;
pub mod rooms;
pub mod service;
pub mod staging;
pub mod storage;
pub mod upload;

#[cfg(test)]
mod testing;

pub use commands::{Accepted, ResendAttachment, SendMessage};
pub use error::{ChatError, Missing, UploadError};
pub use service::ChatService;
pub use staging::{IncomingFile, StagedFile, Stager};
pub use storage::{HttpObjectStore, LocalObjectStore, ObjectStore};
