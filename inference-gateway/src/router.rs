//! Model router mapping public model IDs onto engines.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ModelConfig;
use crate::engine::{self, Engine, EngineError};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("duplicate model id \"{0}\"")]
    DuplicateModel(String),

    #[error("model \"{model}\": failed to build engine: {source}")]
    Engine {
        model: String,
        #[source]
        source: EngineError,
    },
}

/// Immutable binding of a public ID to an upstream name and engine.
#[derive(Clone)]
pub struct Route {
    pub public_id: String,
    pub upstream_model: String,
    pub engine: Arc<dyn Engine>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("public_id", &self.public_id)
            .field("upstream_model", &self.upstream_model)
            .field("engine", &self.engine.kind())
            .finish()
    }
}

/// Route table built once at startup.
///
/// Never mutated after construction, so lookups need no locking.
#[derive(Debug, Default)]
pub struct ModelRouter {
    routes: HashMap<String, Route>,
    /// Public IDs in sorted order.
    ids: Vec<String>,
}

impl ModelRouter {
    /// Build one engine per configured model.
    pub fn from_config(models: &[ModelConfig]) -> Result<Self, RouterError> {
        let mut routes = Vec::with_capacity(models.len());
        for model in models {
            let engine = engine::from_config(&model.engine).map_err(|source| {
                RouterError::Engine {
                    model: model.id.clone(),
                    source,
                }
            })?;
            tracing::info!(
                model = %model.id,
                upstream_model = %model.upstream_model(),
                engine = %engine.kind(),
                "Registered model"
            );
            routes.push(Route {
                public_id: model.id.clone(),
                upstream_model: model.upstream_model().to_string(),
                engine,
            });
        }
        Self::from_routes(routes)
    }

    /// Build from ready-made routes.
    pub fn from_routes(routes: impl IntoIterator<Item = Route>) -> Result<Self, RouterError> {
        let mut table = HashMap::new();
        for route in routes {
            if table.contains_key(&route.public_id) {
                return Err(RouterError::DuplicateModel(route.public_id));
            }
            table.insert(route.public_id.clone(), route);
        }

        let mut ids: Vec<String> = table.keys().cloned().collect();
        ids.sort();

        Ok(Self { routes: table, ids })
    }

    /// All public model IDs, sorted.
    pub fn list_models(&self) -> &[String] {
        &self.ids
    }

    pub fn route_for_model(&self, id: &str) -> Option<&Route> {
        self.routes.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, EngineKind};
    use crate::engine::MockEngine;

    fn mock_model(id: &str, upstream: Option<&str>) -> ModelConfig {
        ModelConfig {
            id: id.to_string(),
            upstream_model: upstream.map(str::to_string),
            engine: EngineConfig {
                kind: Some(EngineKind::Mock),
                ..EngineConfig::default()
            },
        }
    }

    #[test]
    fn test_models_are_listed_sorted() {
        let router = ModelRouter::from_config(&[
            mock_model("zeta", None),
            mock_model("alpha", None),
            mock_model("mid", None),
        ])
        .unwrap();
        assert_eq!(router.list_models(), ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_route_upstream_defaults_to_public_id() {
        let router = ModelRouter::from_config(&[
            mock_model("chat-a", Some("llama-3")),
            mock_model("mock-1", None),
        ])
        .unwrap();

        let route = router.route_for_model("chat-a").unwrap();
        assert_eq!(route.upstream_model, "llama-3");
        assert_eq!(route.engine.kind(), EngineKind::Mock);

        let route = router.route_for_model("mock-1").unwrap();
        assert_eq!(route.upstream_model, "mock-1");

        assert!(router.route_for_model("missing").is_none());
    }

    #[test]
    fn test_duplicate_ids_are_fatal() {
        let route = |id: &str| Route {
            public_id: id.to_string(),
            upstream_model: id.to_string(),
            engine: Arc::new(MockEngine::new()),
        };
        let err = ModelRouter::from_routes([route("a"), route("a")]).unwrap_err();
        assert!(matches!(err, RouterError::DuplicateModel(id) if id == "a"));
    }

    #[test]
    fn test_missing_engine_kind_fails() {
        let mut model = mock_model("x", None);
        model.engine.kind = None;
        let err = ModelRouter::from_config(&[model]).unwrap_err();
        assert!(matches!(err, RouterError::Engine { .. }));
    }
}
