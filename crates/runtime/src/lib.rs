//! Environment orchestrator: wires a scenario's clock, backend servers and
//! tools together and drives tool-call batches, prompts and scoring.

mod environment;
pub mod evaluation;
pub mod logging;

pub use environment::{Environment, EnvironmentError, EnvironmentOptions, InvokeError};
pub use evaluation::{
    EvaluationContext, EvaluationError, EvaluationReport, Evaluator, EvaluatorRegistry, Score,
    TaskEvaluation,
};
