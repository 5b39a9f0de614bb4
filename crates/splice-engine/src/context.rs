//! Compilation contexts and module ownership bundling.
//!
//! A [`Context`] is the interning domain a module is built against: every
//! function, extern, and data name in a module is a [`Symbol`] that can only
//! be resolved through the context that produced it. Contexts are shared via
//! `Arc`; the JIT engine retains the context of every module it accepts.

use std::num::NonZeroU32;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::ir::Module;

/// An interned string symbol (32-bit index).
///
/// Symbols are small and can be copied cheaply. Use [`Context::resolve`] to
/// get the actual string back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(NonZeroU32);

impl Symbol {
    #[inline]
    fn from_raw(raw: u32) -> Self {
        // Add 1 because NonZeroU32 cannot be 0
        Symbol(NonZeroU32::new(raw + 1).unwrap())
    }

    #[inline]
    fn to_raw(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// String interner that deduplicates strings.
#[derive(Default)]
struct Interner {
    map: FxHashMap<String, Symbol>,
    strings: Vec<String>,
}

impl Interner {
    fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.map.get(s) {
            return sym;
        }

        let sym = Symbol::from_raw(self.strings.len() as u32);
        self.strings.push(s.to_string());
        self.map.insert(s.to_string(), sym);
        sym
    }

    fn resolve(&self, sym: Symbol) -> &str {
        &self.strings[sym.to_raw()]
    }
}

/// An isolation domain for module construction.
///
/// Exactly one context is associated with a given module. The interner lives
/// behind a mutex so the context can be shared, but callers must not construct
/// two modules against the same context concurrently.
#[derive(Default)]
pub struct Context {
    interner: Mutex<Interner>,
}

impl Context {
    /// Create a fresh, empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its symbol.
    pub fn intern(&self, s: &str) -> Symbol {
        self.interner.lock().intern(s)
    }

    /// Resolve a symbol back to its string.
    ///
    /// # Panics
    ///
    /// Panics if the symbol did not come from this context.
    pub fn resolve(&self, sym: Symbol) -> String {
        self.interner.lock().resolve(sym).to_string()
    }
}

/// A module paired with the context it was built against.
///
/// This is the transfer currency between module sources and the engine:
/// [`crate::jit::JitEngine::add_module`] consumes the bundle by value, so on
/// every path — success or failure — exactly one owner is responsible for
/// disposal, enforced by the compiler rather than by convention.
pub struct BoundModule {
    module: Module,
    ctx: Arc<Context>,
}

impl BoundModule {
    /// Bundle a module with its context.
    pub fn new(module: Module, ctx: Arc<Context>) -> Self {
        BoundModule { module, ctx }
    }

    /// The wrapped module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// The context the module is bound to.
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub(crate) fn into_parts(self) -> (Module, Arc<Context>) {
        (self.module, self.ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_deduplicates() {
        let ctx = Context::new();

        let a = ctx.intern("sum");
        let b = ctx.intern("hello");
        let c = ctx.intern("sum");

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(ctx.resolve(a), "sum");
        assert_eq!(ctx.resolve(b), "hello");
    }

    #[test]
    fn symbols_are_per_context() {
        let ctx = Context::new();
        let other = Context::new();

        let a = ctx.intern("x");
        let b = other.intern("y");

        // Same raw index, different domains — resolution goes through the
        // owning context.
        assert_eq!(ctx.resolve(a), "x");
        assert_eq!(other.resolve(b), "y");
    }
}
