use serde::{Deserialize, Serialize};
use std::fmt;

/// Strongly-typed SDK enum.
/// The set of SDKs a deployment actually accepts is narrowed by config,
/// not by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sdk {
    Java,
    Go,
    Python,
    Scio,
}

impl Sdk {
    /// Returns all SDK variants.
    /// Single source of truth for the supported set - new SDKs added here
    /// propagate to config parsing and the CLI automatically.
    pub fn all_variants() -> &'static [Sdk] {
        &[Sdk::Java, Sdk::Go, Sdk::Python, Sdk::Scio]
    }

    /// Parse an SDK from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Sdk> {
        match s.to_lowercase().as_str() {
            "java" => Some(Sdk::Java),
            "go" => Some(Sdk::Go),
            "python" => Some(Sdk::Python),
            "scio" => Some(Sdk::Scio),
            _ => None,
        }
    }

    /// Source file extension for this SDK
    pub fn file_extension(&self) -> &'static str {
        match self {
            Sdk::Java => "java",
            Sdk::Go => "go",
            Sdk::Python => "py",
            Sdk::Scio => "scala",
        }
    }
}

impl fmt::Display for Sdk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sdk::Java => write!(f, "java"),
            Sdk::Go => write!(f, "go"),
            Sdk::Python => write!(f, "python"),
            Sdk::Scio => write!(f, "scio"),
        }
    }
}

/// Job State Machine
/// One authoritative value per job, written by the pipeline and read by
/// pollers through the state store.
///
/// Transitions walk Validating → Preparing → Compiling → Executing →
/// Finished; each phase can divert to its error variant, and RunTimeout,
/// Canceled and Error absorb from anywhere. Terminal states never
/// transition further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Validating,
    Preparing,
    Compiling,
    Executing,
    Finished,
    ValidationError,
    PreparationError,
    CompileError,
    RunError,
    RunTimeout,
    Canceled,
    Error,
}

impl Status {
    /// Name used as the stored representation; `parse` is its inverse.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Validating => "validating",
            Status::Preparing => "preparing",
            Status::Compiling => "compiling",
            Status::Executing => "executing",
            Status::Finished => "finished",
            Status::ValidationError => "validation_error",
            Status::PreparationError => "preparation_error",
            Status::CompileError => "compile_error",
            Status::RunError => "run_error",
            Status::RunTimeout => "run_timeout",
            Status::Canceled => "canceled",
            Status::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "validating" => Some(Status::Validating),
            "preparing" => Some(Status::Preparing),
            "compiling" => Some(Status::Compiling),
            "executing" => Some(Status::Executing),
            "finished" => Some(Status::Finished),
            "validation_error" => Some(Status::ValidationError),
            "preparation_error" => Some(Status::PreparationError),
            "compile_error" => Some(Status::CompileError),
            "run_error" => Some(Status::RunError),
            "run_timeout" => Some(Status::RunTimeout),
            "canceled" => Some(Status::Canceled),
            "error" => Some(Status::Error),
            _ => None,
        }
    }

    /// True for states that never transition further
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Finished
                | Status::ValidationError
                | Status::PreparationError
                | Status::CompileError
                | Status::RunError
                | Status::RunTimeout
                | Status::Canceled
                | Status::Error
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
