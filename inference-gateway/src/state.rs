//! Shared application state.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::router::{ModelRouter, Route, RouterError};

/// Shared application state passed to all handlers.
pub struct AppState {
    pub config: Config,
    pub router: ModelRouter,
}

impl AppState {
    pub fn new(config: Config, router: ModelRouter) -> Self {
        Self { config, router }
    }

    /// Build the route table described by `config`.
    pub fn from_config(config: Config) -> std::result::Result<Self, RouterError> {
        let router = ModelRouter::from_config(&config.models)?;
        Ok(Self::new(config, router))
    }

    /// Look up `model`, mapping absence to `model_not_found`.
    pub fn route(&self, model: &str) -> Result<&Route> {
        self.router
            .route_for_model(model)
            .ok_or_else(|| Error::ModelNotFound(model.to_string()))
    }
}
