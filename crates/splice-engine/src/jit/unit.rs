//! Execution units: named symbol namespaces inside the engine.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::EngineError;

use super::resolver::{HostAddr, SymbolResolver};

/// Visibility of a symbol binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// A definitive definition; a later module-compiled definition of the
    /// same name is a collision.
    Strong,
    /// A fallback that yields to any module-compiled definition of the same
    /// name.
    Weak,
}

/// An immutable `(name, address, visibility)` binding installed into an
/// execution unit. Once installed for a name it is permanent for the life of
/// the unit.
#[derive(Debug, Clone)]
pub struct SymbolBinding {
    name: String,
    addr: HostAddr,
    visibility: Visibility,
}

impl SymbolBinding {
    /// The bound name, as originally requested (unnormalized).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bound host address.
    pub fn addr(&self) -> HostAddr {
        self.addr
    }

    /// The binding's visibility.
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }
}

/// A named symbol namespace: accumulates bindings (host redirects) and holds
/// the resolver stack consulted for undefined names.
///
/// Binding installation is atomic and collision-detecting; the table may be
/// read and written from multiple threads at once.
pub struct ExecutionUnit {
    name: String,
    bindings: DashMap<String, SymbolBinding>,
    resolvers: RwLock<Vec<Arc<dyn SymbolResolver>>>,
    process_fallback: bool,
}

impl std::fmt::Debug for ExecutionUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionUnit")
            .field("name", &self.name)
            .field("bindings", &self.bindings)
            .field("resolvers", &self.resolvers.read().len())
            .field("process_fallback", &self.process_fallback)
            .finish()
    }
}

impl ExecutionUnit {
    pub(crate) fn new(name: &str, process_fallback: bool) -> Self {
        ExecutionUnit {
            name: name.to_string(),
            bindings: DashMap::new(),
            resolvers: RwLock::new(Vec::new()),
            process_fallback,
        }
    }

    /// The unit's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a resolver. Resolvers are consulted in attach order, before
    /// the process-symbol fallback.
    pub fn add_resolver(&self, resolver: Arc<dyn SymbolResolver>) {
        self.resolvers.write().push(resolver);
    }

    /// The binding installed for `name`, if any.
    pub fn binding(&self, name: &str) -> Option<SymbolBinding> {
        self.bindings.get(name).map(|entry| entry.value().clone())
    }

    /// Install a binding for `name`.
    ///
    /// Installing the same address again is a no-op; a different address for
    /// an already-bound name fails with [`EngineError::Definition`] — a
    /// binding is never silently overwritten.
    pub fn install(
        &self,
        name: &str,
        addr: HostAddr,
        visibility: Visibility,
    ) -> Result<(), EngineError> {
        match self.bindings.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                let existing = entry.get().addr();
                if existing == addr {
                    Ok(())
                } else {
                    Err(EngineError::Definition {
                        name: name.to_string(),
                        existing: existing.0,
                        new: addr.0,
                    })
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(SymbolBinding {
                    name: name.to_string(),
                    addr,
                    visibility,
                });
                Ok(())
            }
        }
    }

    /// Offer `bare` (an already-normalized name) to the resolver stack, then
    /// to the process-symbol fallback when enabled.
    pub(crate) fn resolve_with_stack(&self, bare: &str) -> Option<HostAddr> {
        // Snapshot so no lock is held while resolvers run.
        let stack: Vec<Arc<dyn SymbolResolver>> = self.resolvers.read().clone();
        if let Some(addr) = stack.iter().find_map(|resolver| resolver.resolve(bare)) {
            return Some(addr);
        }

        if self.process_fallback {
            if let Some(addr) = super::resolver::ProcessSymbols.resolve(bare) {
                tracing::debug!(symbol = bare, addr = %addr, "resolved from process image");
                return Some(addr);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn install_is_permanent_and_idempotent() {
        let unit = ExecutionUnit::new("main", false);

        unit.install("sum", HostAddr(0x10), Visibility::Weak).unwrap();
        // Same address: fine.
        unit.install("sum", HostAddr(0x10), Visibility::Weak).unwrap();
        assert_eq!(unit.binding("sum").unwrap().addr(), HostAddr(0x10));
    }

    #[test]
    fn conflicting_install_fails_without_overwriting() {
        let unit = ExecutionUnit::new("main", false);
        unit.install("sum", HostAddr(0x10), Visibility::Weak).unwrap();

        let err = unit.install("sum", HostAddr(0x20), Visibility::Weak).unwrap_err();
        match err {
            EngineError::Definition { name, existing, new } => {
                assert_eq!(name, "sum");
                assert_eq!(existing, 0x10);
                assert_eq!(new, 0x20);
            }
            other => panic!("expected Definition error, got {other:?}"),
        }

        // The original binding survives.
        assert_eq!(unit.binding("sum").unwrap().addr(), HostAddr(0x10));
    }

    #[test]
    fn concurrent_installs_agree_on_one_binding() {
        let unit = Arc::new(ExecutionUnit::new("main", false));

        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let unit = unit.clone();
                thread::spawn(move || unit.install("shared", HostAddr(0x1000 + i), Visibility::Weak))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok_count = results.iter().filter(|r| r.is_ok()).count();

        // Exactly one install wins; every loser gets a collision error.
        assert_eq!(ok_count, 1);
        let winner = unit.binding("shared").unwrap().addr();
        assert!((0x1000..0x1008).contains(&winner.0));
    }
}
