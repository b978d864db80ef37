use std::sync::Arc;

use sqlx::{Pool, Postgres};
use tokio::sync::Semaphore;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Postgres>,
    pub config: Arc<Config>,
    /// Bounds total concurrently-bridged calls (spec §5). One permit is held
    /// for the lifetime of each media-stream session.
    pub call_semaphore: Arc<Semaphore>,
}
