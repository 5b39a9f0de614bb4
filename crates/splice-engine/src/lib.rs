//! Splice JIT engine.
//!
//! A minimal just-in-time execution engine: IR modules — built
//! programmatically, parsed from text, or loaded from a binary container —
//! are compiled to native code via Cranelift, with any symbols a module
//! references but does not define redirected to host-process functions
//! through a pluggable resolver stack.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use splice_engine::{build_sum_module, BoundModule, Context, JitEngine};
//!
//! let ctx = Arc::new(Context::new());
//! let module = build_sum_module(&ctx);
//!
//! let mut engine = JitEngine::new()?;
//! engine.add_module(BoundModule::new(module, ctx))?;
//!
//! let addr = engine.lookup("sum")?;
//! let sum: extern "C" fn(i32, i32) -> i32 = unsafe { std::mem::transmute(addr) };
//! assert_eq!(sum(1, 2), 3);
//!
//! engine.close()?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Binary module container (`.sbc`).
pub mod bytecode;

/// Compilation contexts and module ownership bundling.
pub mod context;

/// Error taxonomy.
pub mod error;

/// The intermediate representation.
pub mod ir;

/// JIT engine, execution units, and symbol resolution.
pub mod jit;

/// Textual IR parsing.
pub mod parser;

pub use context::{BoundModule, Context, Symbol};
pub use error::EngineError;
pub use ir::{build_sum_module, Module};
pub use jit::{
    strip_mangle_prefix, ExecutionUnit, HostAddr, JitConfig, JitEngine, ProcessSymbols,
    SymbolBinding, SymbolResolver, Visibility,
};
pub use parser::{parse_module, ParseError};
