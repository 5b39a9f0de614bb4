//! Engine-wide error taxonomy.
//!
//! Every library-level failure is an explicit [`EngineError`] value returned
//! up the call chain; process termination is reserved for the top-level
//! driver.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::bytecode::ContainerError;
use crate::parser::ParseError;

/// Errors produced by module sources, registration, symbol resolution,
/// lookup, and teardown.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A module file could not be read.
    #[error("failed to read `{path}`: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Malformed textual IR.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Malformed binary container.
    #[error("malformed module container: {0}")]
    Container(#[from] ContainerError),

    /// The backend rejected an otherwise well-formed module (duplicate
    /// symbol, signature clash, lowering failure). The bundle has already
    /// been disposed by the registry.
    #[error("module registration failed: {reason}")]
    Registration {
        /// Backend diagnostic.
        reason: String,
    },

    /// A redirect binding collided with an existing binding for the same
    /// name at a different address.
    #[error("definition of `{name}` collides with existing binding at {existing:#x} (new address {new:#x})")]
    Definition {
        /// Symbol name as originally requested.
        name: String,
        /// Address of the binding already installed.
        existing: u64,
        /// Address of the rejected installation attempt.
        new: u64,
    },

    /// One or more requested symbols never became defined.
    #[error("lookup failed: undefined symbols: {names:?}")]
    Lookup {
        /// The names that stayed unresolved after all resolvers ran.
        names: Vec<String>,
    },

    /// A precondition the engine assumes can never be violated was violated.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Backend or target setup failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// Instance teardown failed (a teardown function reported failure or
    /// could not be finalized).
    #[error("instance teardown failed: {0}")]
    Teardown(String),
}
