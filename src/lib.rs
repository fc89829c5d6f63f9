//! Filegate Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod downloads;
pub mod mime_types;
pub mod server;
pub mod sqlite_persistence;
pub mod user;

// Re-export commonly used types for convenience
pub use downloads::{
    Declaration, DownloadStore, Registrar, SqliteDownloadStore, TokenSecret,
};
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig};
pub use user::{SqliteUserStore, UserManager, UserStore};
