//! Secret synchronization library.
//!
//! This library reconciles a local `.env` file with a remote secret store, in
//! either direction. It diffs the two sides, plans the writes and deletes, and
//! applies them, keeping the local file's layout intact.
//!
//! # Features
//!
//! - **Lossless env-file codec**: comments, blank lines and quoting survive a
//!   parse/format round trip byte for byte
//! - **Two remote layouts**: one JSON secret holding every entry, or one
//!   parameter per entry under a shared path
//! - **Safe by default**: additive unless prune is requested, deletions need
//!   an acknowledgement, sensitive values are masked in output
//! - **Atomic local writes**: owner-only temporary file renamed into place
//! - **Optional tracing**: detailed logging when the `tracing` feature is enabled
//! - **AWS clients**: Secrets Manager and Parameter Store behind the `aws` feature
//!
//! # Example
//!
//! ```rust,no_run
//! use secret_sync::backend::{KeyPolicy, PathPrefixedBackend, memory::MemoryParameterClient};
//! use secret_sync::model::Direction;
//! use secret_sync::render::{RenderOptions, render};
//! use secret_sync::sync::SecretSync;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = PathPrefixedBackend::new(
//!     MemoryParameterClient::default(),
//!     "/myapp/dev",
//!     KeyPolicy::Lenient,
//! );
//! let report = SecretSync::new(&backend, ".env").diff(Direction::Pull).await?;
//! print!("{}", render(&report, &RenderOptions::default())?.body);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod diff;
pub mod error;
pub mod mask;
pub mod model;
pub mod parse;
pub mod persist;
pub mod render;
pub mod sync;

pub use backend::{Backend, BackendSnapshot, KeyPolicy};
pub use config::Config;
pub use diff::DiffReport;
pub use error::SyncError;
pub use model::{Direction, SyncPlan, WriteReport};
pub use sync::{SecretSync, SyncOptions, SyncOutcome};
