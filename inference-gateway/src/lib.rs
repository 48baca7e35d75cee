//! Inference gateway - serves public model IDs from mock or
//! OpenAI-compatible upstream engines behind a native `/v1` API and an
//! optional OpenAI-style compatibility surface.

pub mod api;
pub mod compat;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod router;
pub mod server;
pub mod state;
pub mod stream;

pub use config::Config;
pub use router::{ModelRouter, Route};
pub use server::{app, run, Server, ServerError};
pub use state::AppState;
