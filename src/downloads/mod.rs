mod models;
mod registrar;
mod render;
mod sqlite_download_store;
mod store;
pub mod token;

pub use models::{Declaration, DownloadRecord};
pub use registrar::Registrar;
pub use render::{render_download_link, RenderError};
pub use sqlite_download_store::SqliteDownloadStore;
pub use store::{DownloadCounterStore, DownloadRecordStore, DownloadStore};
pub use token::{derive_token, TokenSecret};
