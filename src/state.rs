use sqlx::SqlitePool;
use std::sync::Arc;

pub struct AppState {
    pub pool: SqlitePool,
    pub session_key: Vec<u8>,
}

pub type SharedState = Arc<AppState>;
