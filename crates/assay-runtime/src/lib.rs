//! # assay-runtime
//!
//! Async external-grader coordination for `assay-core`.
//!
//! The core engine is synchronous and never touches the network. Submissions
//! to queued graders come back from `submit` as work items; this crate
//! delivers them to the grading queue, records the replies with the engine,
//! and routes queue callbacks back in.
//!
//! ## Components
//!
//! - [`ExternalGrader`]: trait for a queue that accepts submissions
//! - [`XQueueClient`]: HTTP implementation (feature `xqueue`, on by default)
//! - [`ExternalGraderCoordinator`]: `submit → dispatch → settle` and callbacks
//! - [`RuntimeConfig`]: queue endpoint, credentials, and logging
//! - [`telemetry::init_tracing`]: subscriber setup
//!
//! ## Example
//!
//! ```rust,ignore
//! use assay_runtime::{ExternalGraderCoordinator, RuntimeConfig, XQueueClient};
//!
//! let config = RuntimeConfig::load("runtime.yaml")?;
//! assay_runtime::telemetry::init_tracing(&config.logging)?;
//!
//! let coordinator = ExternalGraderCoordinator::new(Arc::new(XQueueClient::new(config.xqueue)?));
//! let result = coordinator.submit(&mut engine, &answers).await?;
//!
//! // Later, when the queue calls back:
//! coordinator.handle_callback(&mut engine, CallbackKind::ScoreUpdate, &payload)?;
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod grader;
pub mod telemetry;

#[cfg(feature = "xqueue")]
pub mod xqueue;

pub use config::{LogFormat, LoggingConfig, RuntimeConfig, XQueueConfig};
pub use coordinator::ExternalGraderCoordinator;
pub use error::{QueueError, RuntimeError};
pub use grader::ExternalGrader;

#[cfg(feature = "xqueue")]
pub use xqueue::XQueueClient;
