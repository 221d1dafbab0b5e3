use std::sync::Arc;

use crate::config::Config;
use crate::gateway::Gateway;
use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub gateway: Gateway,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config, gateway: Gateway) -> Self {
        let sessions = Arc::new(SessionRegistry::new(
            gateway.clone(),
            config.stale_time(),
            config.debounce_delay(),
        ));
        Self {
            config,
            gateway,
            sessions,
        }
    }
}
