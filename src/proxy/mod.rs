pub mod backoff;
pub mod cache;
pub mod http;
pub mod listener;
mod resolver;
pub mod session;
pub mod transport;
pub mod upstream;

use anyhow::Result;
use std::sync::Arc;

use crate::settings::Settings;

#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub cache: Arc<cache::CellCache>,
}

impl AppContext {
    pub fn new(settings: Arc<Settings>, cache: Arc<cache::CellCache>) -> Self {
        Self { settings, cache }
    }
}

pub async fn run(app: AppContext) -> Result<()> {
    listener::start_listener(app).await
}
