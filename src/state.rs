use std::sync::Arc;

use crate::config::Config;
use crate::session::SessionController;

pub struct AppState {
    pub controller: SessionController,
    pub config: Arc<Config>,
}

pub type SharedState = Arc<AppState>;
