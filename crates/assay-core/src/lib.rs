//! # assay-core
//!
//! Deterministic problem lifecycle engine.
//!
//! This crate owns everything that happens between a learner opening an
//! authored problem and a grade being published:
//! - Which variant of the problem does this learner see?
//! - Is this submission right, and how many points is it worth?
//! - What may the learner see or do right now?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same definition, seed and answers always grade the same
//! 2. **Append-only history**: Every graded attempt is recorded; reset never erases it
//! 3. **Optimistic writes**: Concurrent submits for one learner cannot both land
//! 4. **Pluggable collaborators**: Storage, rendering, analytics, script
//!    execution and time are traits supplied by the host
//!
//! ## Example
//!
//! ```rust,ignore
//! use assay_core::{EngineConfig, LearnerContext, ProblemDefinition, ProblemLifecycleEngine};
//!
//! let definition = Arc::new(ProblemDefinition::from_yaml_file("problem.yaml")?);
//! let mut engine = ProblemLifecycleEngine::new(
//!     definition,
//!     Arc::new(EngineConfig::default()),
//!     LearnerContext::new("learner-42", "anon-42"),
//!     services,
//! )?;
//!
//! let result = engine.submit(&answers)?;
//! println!("{}: {}", result.success, result.score);
//! ```

pub mod calc;
pub mod config;
pub mod correctness;
pub mod disclosure;
pub mod duration_secs;
pub mod engine;
pub mod error;
pub mod graders;
pub mod grading_method;
pub mod problem;
pub mod queue;
pub mod script;
pub mod seed;
pub mod services;
pub mod settings;
pub mod types;

// Re-export main types at crate root
pub use config::{ConfigError, EngineConfig, LearnerContext, QueueSettings, ScriptCacheSettings};
pub use correctness::{Correctness, CorrectnessEntry, CorrectnessMap, QueueState};
pub use disclosure::{AttemptView, Disclosure, DisclosurePolicy};
pub use engine::{
    AnswerResult, AttemptState, EngineServices, HintResult, ProblemLifecycleEngine, RescoreResult,
    ResetResult, SaveResult, SubmitResult,
};
pub use error::{EngineError, GradingError, ProblemError, SandboxError};
pub use graders::{Grader, GradingContext, QueueContext, ResponseGrader};
pub use grading_method::GradingMethod;
pub use problem::{AuthoredProblem, ProblemDefinition};
pub use queue::{CallbackKind, CallbackMessage, QueueHeader, QueueReply, QueueSubmission};
pub use script::{ScriptCache, ScriptContext};
pub use seed::SeedManager;
pub use services::{
    Clock, EventPublisher, FieldStore, RenderError, RenderService, Sandbox, StoreError,
};
pub use settings::{ProblemSettings, Rerandomize, ShowAnswer, ShowCorrectness};
pub use types::{AnswerValue, FileHandle, Score, StudentAnswers};
