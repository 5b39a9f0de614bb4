//! Symbol resolution: mangled-name normalization, the resolver trait, and
//! the lookup-episode driver.
//!
//! When the engine needs to link and one or more extern names have no
//! definition, it runs a lookup episode: each name is normalized, offered to
//! the unit's resolver stack, and — if any resolver returns an address — a
//! permanent weak binding is installed under the original name. Names nobody
//! resolves are left for the surrounding lookup machinery to report.

use std::fmt;

use crate::error::EngineError;

use super::unit::{ExecutionUnit, Visibility};

/// The platform mangling prefix stripped before names reach resolvers.
pub const MANGLE_PREFIX: char = '_';

/// A host code address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostAddr(pub u64);

impl HostAddr {
    /// Address of a code pointer.
    pub fn from_ptr(ptr: *const u8) -> Self {
        HostAddr(ptr as u64)
    }

    /// The address as a code pointer.
    pub fn as_ptr(self) -> *const u8 {
        self.0 as *const u8
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Resolves normalized symbol names to host addresses.
///
/// This is the engine's extension point for making host functions available
/// to JIT'd code. Implementations receive names with the mangling prefix
/// already stripped, may be invoked from multiple threads, and must not rely
/// on invocation order. Returning `None` is not an error — it just means
/// this resolver does not provide the symbol.
pub trait SymbolResolver: Send + Sync {
    /// Resolve `name` to a host address, or `None` if unknown here.
    fn resolve(&self, name: &str) -> Option<HostAddr>;
}

/// Resolver that searches the process image via `dlsym`.
///
/// Attached after the embedder's resolvers as the default fallback, mirroring
/// a dynamic-library search: anything the process itself exports (libc and
/// friends) resolves without explicit redirection.
pub struct ProcessSymbols;

impl SymbolResolver for ProcessSymbols {
    fn resolve(&self, name: &str) -> Option<HostAddr> {
        process_lookup(name)
    }
}

#[cfg(unix)]
fn process_lookup(name: &str) -> Option<HostAddr> {
    let symbol = std::ffi::CString::new(name).ok()?;
    let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, symbol.as_ptr()) };
    if addr.is_null() {
        None
    } else {
        Some(HostAddr(addr as u64))
    }
}

#[cfg(not(unix))]
fn process_lookup(_name: &str) -> Option<HostAddr> {
    None
}

/// Strip the platform mangling prefix from a linker-visible name.
///
/// Removes leading prefix characters until the remainder no longer starts
/// with one. A name that is empty, or consists entirely of prefix
/// characters, can never name a well-formed symbol and is an invariant
/// violation.
pub fn strip_mangle_prefix(name: &str) -> Result<&str, EngineError> {
    let bare = name.trim_start_matches(MANGLE_PREFIX);
    if bare.is_empty() {
        return Err(EngineError::InvariantViolation(format!(
            "symbol name `{name}` has no characters besides the mangling prefix"
        )));
    }
    Ok(bare)
}

/// Run one lookup episode over `names` against `unit`.
///
/// Names are treated as a set: already-bound names are skipped without
/// re-invoking any resolver. Each successful redirect installs a permanent
/// weak binding under the original name; installation collisions abort the
/// episode. Unresolved names are left alone.
pub(crate) fn run_episode(unit: &ExecutionUnit, names: &[String]) -> Result<(), EngineError> {
    for name in names {
        if unit.binding(name).is_some() {
            continue;
        }

        let bare = strip_mangle_prefix(name)?;
        let Some(addr) = unit.resolve_with_stack(bare) else {
            // Reported as an ordinary lookup failure by the caller once all
            // resolvers have had their chance.
            continue;
        };

        unit.install(name, addr, Visibility::Weak)?;
        tracing::info!(
            symbol = %name,
            addr = %addr,
            unit = unit.name(),
            "redirecting undefined symbol to host function"
        );
    }

    Ok(())
}
