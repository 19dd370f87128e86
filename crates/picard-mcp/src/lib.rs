//! Picard MCP Server
//!
//! An OAuth 2.0 protected memory server. Users store short text memories,
//! encrypted at rest and embedded for semantic search, and query them (or
//! another user's public memories) through MCP tools. An embedded
//! authorization server issues PKCE-bound authorization codes and rotating
//! refresh tokens; a client integration layer shows a consuming application's
//! side of the flow.
//!
//! # Features
//!
//! - **8 MCP Tools**: memory CRUD, permission changes, self and persona queries
//! - **OAuth 2.0**: authorization code + PKCE (S256), refresh rotation with
//!   reuse detection, revocation, introspection, dynamic registration
//! - **Storage**: in-memory or SQLite behind repository traits
//! - **LLM provider**: OpenAI-compatible embeddings and completions with retries
//!   and a cached embedding lookup
//!
//! # Example
//!
//! ```no_run
//! use picard_mcp::{config::Config, server::PicardServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = PicardServer::from_config(&config).await?;
//!     server.run_http().await
//! }
//! ```

pub mod client;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod integration;
pub mod memory;
pub mod models;
pub mod server;
pub mod tools;
pub mod users;

pub use client::LlmClient;
pub use config::Config;
pub use error::{AuthError, ClientError, IntegrationError, OAuthError, StoreError, ToolError};
pub use server::{PicardServer, Repositories};
