//! JWT bearer authentication gate for HTTP APIs backed by a Keycloak realm

pub mod auth;
pub mod config;
mod error;
pub mod handlers;
pub mod observability;
pub mod pipeline;
pub mod server;

pub use auth::{AuthConfig, AuthError, AuthenticatedPrincipal, AuthorizationPolicy};
pub use config::{Config, ConfigBuilder, ServerConfig, TelemetryConfig};
pub use error::{Error, Result};
pub use pipeline::{Flow, Pipeline, Stage};
pub use server::{Gate, build_router, run_http};
