use axum::extract::FromRef;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::downloads::{DownloadStore, Registrar};
use crate::user::UserManager;

use super::ServerConfig;

pub type SharedDownloadStore = Arc<dyn DownloadStore>;
pub type SharedRegistrar = Arc<Registrar>;
pub type GuardedUserManager = Arc<Mutex<UserManager>>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub download_store: SharedDownloadStore,
    pub registrar: SharedRegistrar,
    pub user_manager: GuardedUserManager,
}

impl FromRef<ServerState> for SharedDownloadStore {
    fn from_ref(input: &ServerState) -> Self {
        input.download_store.clone()
    }
}

impl FromRef<ServerState> for SharedRegistrar {
    fn from_ref(input: &ServerState) -> Self {
        input.registrar.clone()
    }
}

impl FromRef<ServerState> for GuardedUserManager {
    fn from_ref(input: &ServerState) -> Self {
        input.user_manager.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
