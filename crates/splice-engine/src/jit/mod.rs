//! JIT compilation and execution: engine, execution units, and symbol
//! resolution.

pub mod engine;
pub mod lowering;
pub mod resolver;
pub mod unit;

pub use engine::{JitConfig, JitEngine};
pub use resolver::{strip_mangle_prefix, HostAddr, ProcessSymbols, SymbolResolver, MANGLE_PREFIX};
pub use unit::{ExecutionUnit, SymbolBinding, Visibility};
