//! Idempotent Cloudflare provisioning and deployment.
//!
//! flarelaunch takes a project configuration and brings up everything
//! a static site with an edge backend needs on Cloudflare: a D1
//! database, an R2 bucket, a Pages project with its build uploaded,
//! custom domains, the `www` DNS record and a Cloudflare Access
//! policy in front of the admin path. Re-running it against an
//! already provisioned project reuses what exists.
//!
//! # Overview
//!
//! A run is driven by a [`Pipeline`] that wires together:
//!
//! - A [`LaunchConfig`] describing the project (usually read from
//!   `flarelaunch.yaml`)
//! - A [`CloudflareApi`](api::CloudflareApi) client authenticated as
//!   the operator (e.g. [`HttpApi`])
//! - A [`DeployTool`](wrangler::DeployTool) driving the `wrangler`
//!   CLI (e.g. [`Wrangler`])
//!
//! # Credentials
//!
//! The operator's credential is only used to find the account, mint
//! a short-lived token scoped to the enabled features, and revoke
//! that token afterwards. Every provisioning call and every wrangler
//! invocation runs with the scoped token. The token is revoked
//! exactly once, whether the run succeeds, fails or panics.
//!
//! # Example
//!
//! ```rust,no_run
//! use flarelaunch::{HttpApi, Identity, LaunchConfig, Pipeline, Wrangler};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LaunchConfig::new("demo")
//!         .source_dir("./dist")
//!         .database(true)
//!         .storage(true)
//!         .schema_file("schema.sql");
//!
//!     let api = HttpApi::new(Identity::from_env()?)?;
//!     let wrangler = Wrangler::new(false);
//!
//!     let report = Pipeline::new(&config, &api, &wrangler).run()?;
//!     println!("{} created, {} reused", report.created(), report.reused());
//!     println!("{}", report.url);
//!     Ok(())
//! }
//! ```
//!
//! ## Custom domain and Access
//!
//! ```rust,no_run
//! use flarelaunch::LaunchConfig;
//!
//! let config = LaunchConfig::new("shop")
//!     .domain("shop.example.com")
//!     .access(&["owner@example.com"])
//!     .admin_path("/admin");
//! assert!(config.validate().is_ok());
//! ```

// Allow noisy pedantic lints that don't add value for a
// deployment tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod api;
pub mod broker;
pub mod cmd;
pub mod config;
pub mod deploy;
pub mod discovery;
pub mod dns;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod provision;
pub mod wrangler;

pub use api::http::HttpApi;
pub use broker::{CredentialBroker, ScopedCredential};
pub use config::{Identity, LaunchConfig};
pub use error::{LaunchError, LaunchResult};
pub use pipeline::{Pipeline, PipelineReport};
pub use wrangler::Wrangler;
