use std::sync::Arc;

use crate::config::AppConfig;
use crate::generator::Generator;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub generator: Arc<Generator>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let generator = Generator::new(Arc::clone(&config)).await?;
        Ok(Self {
            config,
            generator: Arc::new(generator),
        })
    }
}
