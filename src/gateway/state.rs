//! Shared gateway state

use std::sync::Arc;

use crate::auth::AuthService;
use crate::db::Database;
use crate::transfer::TransferService;

pub struct AppState {
    pub service: Arc<TransferService>,
    pub auth: AuthService,
    pub db: Database,
}

impl AppState {
    pub fn new(service: Arc<TransferService>, auth: AuthService, db: Database) -> Self {
        Self { service, auth, db }
    }
}
