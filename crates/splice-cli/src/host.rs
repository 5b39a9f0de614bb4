//! Host runtime: the engine cell, redirect targets, and process shutdown.

use std::process;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use splice_engine::{EngineError, HostAddr, JitEngine, SymbolResolver};

/// Mangled-name prefix (normalized) of the language runtime's panic entry
/// points, e.g. `_ZN4core9panicking5panic17h…E`.
const PANIC_PREFIX: &str = "ZN4core9panicking";

/// The one process-wide cell. The panic redirect target must be a plain
/// `extern "C"` function and cannot capture an engine handle, so the driver
/// parks the engine here; the library itself carries no global state.
static ENGINE: OnceCell<Mutex<Option<JitEngine>>> = OnceCell::new();

/// Park the engine for the panic trampoline and final shutdown.
pub fn install_engine(engine: JitEngine) {
    if ENGINE.set(Mutex::new(Some(engine))).is_err() {
        unreachable!("engine installed twice");
    }
}

/// Run `f` against the parked engine.
pub fn with_engine<T>(f: impl FnOnce(&mut JitEngine) -> T) -> T {
    let cell = ENGINE.get().expect("engine not installed");
    let mut guard = cell.lock();
    f(guard.as_mut().expect("engine already closed"))
}

/// Tear down the engine (if created) and terminate the process.
///
/// A teardown failure becomes the exit code only when `code` is already
/// zero: a late infrastructure failure never masks an earlier, more
/// specific one.
pub fn shutdown(code: i32) -> ! {
    let result = match ENGINE.get().and_then(|cell| cell.lock().take()) {
        Some(engine) => engine.close(),
        None => Ok(()),
    };
    process::exit(merge_exit_code(code, result));
}

fn merge_exit_code(code: i32, result: Result<(), EngineError>) -> i32 {
    match result {
        Ok(()) => code,
        Err(err) => {
            eprintln!("error: {err}");
            if code == 0 {
                1
            } else {
                code
            }
        }
    }
}

/// Resolver exposing the driver's host functions to JIT'd code: a `hello`
/// ping callback, and the runtime panic entry redirected to
/// [`host_panic`].
pub struct HostFunctions;

impl SymbolResolver for HostFunctions {
    fn resolve(&self, name: &str) -> Option<HostAddr> {
        if name.starts_with("hello") {
            Some(HostAddr(host_hello as usize as u64))
        } else if name.starts_with(PANIC_PREFIX) {
            Some(HostAddr(host_panic as usize as u64))
        } else {
            None
        }
    }
}

/// No-op ping proving JIT'd code can call back into the host.
pub extern "C" fn host_hello() {
    println!("hello from the host runtime");
}

/// Panic entry point for JIT'd code: print the runtime-supplied message,
/// tear the instance down cleanly, and terminate nonzero.
pub extern "C" fn host_panic(msg: *const u8, len: u64) -> ! {
    if msg.is_null() {
        eprintln!("panic in jit code");
    } else {
        let bytes = unsafe { std::slice::from_raw_parts(msg, len as usize) };
        eprintln!("panic in jit code: {}", String::from_utf8_lossy(bytes));
    }
    shutdown(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_successful_code() {
        assert_eq!(merge_exit_code(0, Ok(())), 0);
        assert_eq!(merge_exit_code(3, Ok(())), 3);
    }

    #[test]
    fn merge_surfaces_teardown_failure_only_when_clean() {
        let failing = || Err(EngineError::Teardown("dtor returned 3".to_string()));
        assert_eq!(merge_exit_code(0, failing()), 1);
        // An earlier, more specific failure is never masked.
        assert_eq!(merge_exit_code(7, failing()), 7);
    }

    #[test]
    fn resolver_matches_hello_and_panic_prefixes() {
        let resolver = HostFunctions;
        assert!(resolver.resolve("hello").is_some());
        assert!(resolver.resolve("hello_world").is_some());
        assert!(resolver
            .resolve("ZN4core9panicking5panic17h0f4e07ab05d0a3f1E")
            .is_some());
        assert!(resolver.resolve("sum").is_none());
    }
}
