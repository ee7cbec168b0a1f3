use std::sync::Arc;

use crate::ai::create_provider;
use crate::builder::{ChunkGenerator, IncrementalBuilder, ProviderGenerator};
use crate::config::AppConfig;
use crate::error::AppError;

/// Shared application state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub builder: Arc<IncrementalBuilder>,
    pub generator: Arc<dyn ChunkGenerator>,
}

impl AppState {
    /// Wire the configured AI provider into a live application state.
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let provider = create_provider(config)?;
        let generator = ProviderGenerator::new(provider, Some(config.max_response_tokens));
        Ok(Self {
            builder: Arc::new(IncrementalBuilder::new()),
            generator: Arc::new(generator),
        })
    }

    /// State with an injected generator, used by tests.
    pub fn with_generator(generator: Arc<dyn ChunkGenerator>) -> Self {
        Self {
            builder: Arc::new(IncrementalBuilder::new()),
            generator,
        }
    }
}
