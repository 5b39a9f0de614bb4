//! The JIT engine: module registry, lookup driver, and lifecycle.

use std::mem;
use std::sync::Arc;

use cranelift_codegen::settings::{self, Configurable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module as _};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::context::{BoundModule, Context};
use crate::error::EngineError;
use crate::ir::Signature;

use super::lowering;
use super::resolver::run_episode;
use super::unit::{ExecutionUnit, Visibility};

/// Configuration for the JIT engine.
pub struct JitConfig {
    /// Name of the default execution unit.
    pub unit_name: String,
    /// Whether unresolved names fall back to a process-image search
    /// (`dlsym`) after the attached resolvers.
    pub process_symbols: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            unit_name: "main".to_string(),
            process_symbols: true,
        }
    }
}

/// The engine instance: holds the machine code, target configuration, and
/// the default execution unit.
///
/// Modules are registered with [`add_module`](Self::add_module), entry
/// points resolved with [`lookup`](Self::lookup), and the instance is torn
/// down exactly once with [`close`](Self::close).
pub struct JitEngine {
    module: JITModule,
    unit: Arc<ExecutionUnit>,
    /// Every declared name (functions and externs) by `FuncId`.
    func_ids: FxHashMap<String, FuncId>,
    data_ids: FxHashMap<String, DataId>,
    /// Declared IR signatures, for call validation during lowering.
    sigs: FxHashMap<String, Signature>,
    /// Names with a compiled definition in this instance.
    defined: FxHashSet<String>,
    /// Import names awaiting resolution, in declaration order.
    pending_imports: Vec<String>,
    /// Teardown functions, in registration order.
    teardowns: Vec<String>,
    /// Contexts of accepted modules; released at close.
    contexts: Vec<Arc<Context>>,
    /// Whether definitions were added since the last successful link.
    dirty: bool,
}

impl JitEngine {
    /// Create an engine targeting the host machine with the default
    /// configuration.
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(JitConfig::default())
    }

    /// Create an engine targeting the host machine.
    pub fn with_config(config: JitConfig) -> Result<Self, EngineError> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|err| EngineError::Backend(format!("failed to set opt_level: {err}")))?;
        flag_builder
            .set("is_pic", "false")
            .map_err(|err| EngineError::Backend(format!("failed to set is_pic: {err}")))?;
        let flags = settings::Flags::new(flag_builder);

        let isa = cranelift_native::builder()
            .map_err(|err| EngineError::Backend(format!("host ISA unavailable: {err}")))?
            .finish(flags)
            .map_err(|err| EngineError::Backend(format!("failed to finish ISA: {err}")))?;

        let unit = Arc::new(ExecutionUnit::new(&config.unit_name, config.process_symbols));

        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        let lookup_unit = unit.clone();
        builder.symbol_lookup_fn(Box::new(move |name| {
            lookup_unit.binding(name).map(|binding| binding.addr().as_ptr())
        }));

        Ok(JitEngine {
            module: JITModule::new(builder),
            unit,
            func_ids: FxHashMap::default(),
            data_ids: FxHashMap::default(),
            sigs: FxHashMap::default(),
            defined: FxHashSet::default(),
            pending_imports: Vec::new(),
            teardowns: Vec::new(),
            contexts: Vec::new(),
            dirty: false,
        })
    }

    /// The default execution unit.
    pub fn unit(&self) -> &Arc<ExecutionUnit> {
        &self.unit
    }

    /// Register a module: transfer it into the default execution unit.
    ///
    /// The bundle is consumed. On success the engine owns the module's
    /// machine code and retains its context until [`close`](Self::close).
    /// On failure the bundle — module and context both — is disposed here,
    /// exactly once; the caller has nothing left to release.
    pub fn add_module(&mut self, bound: BoundModule) -> Result<Arc<ExecutionUnit>, EngineError> {
        let (module, ctx) = bound.into_parts();
        let module_name = ctx.resolve(module.name);

        // Validate teardown functions and strong-binding collisions before
        // touching backend state.
        for func in &module.funcs {
            let name = ctx.resolve(func.name);
            if func.is_teardown && (!func.sig.params.is_empty() || func.sig.ret != Some(crate::ir::IrType::I32)) {
                return Err(EngineError::Registration {
                    reason: format!("teardown function `{name}` must have signature () -> i32"),
                });
            }
            if let Some(binding) = self.unit.binding(&name) {
                if binding.visibility() == Visibility::Strong {
                    return Err(EngineError::Registration {
                        reason: format!(
                            "`{name}` is already strongly bound in unit `{}`",
                            self.unit.name()
                        ),
                    });
                }
            }
        }

        let reject = |err: cranelift_module::ModuleError| EngineError::Registration {
            reason: err.to_string(),
        };

        for data in &module.data {
            let name = ctx.resolve(data.name);
            let id = self
                .module
                .declare_data(&name, Linkage::Local, false, false)
                .map_err(reject)?;
            let mut description = DataDescription::new();
            description.define(data.bytes.clone().into_boxed_slice());
            self.module.define_data(id, &description).map_err(reject)?;
            self.data_ids.insert(name, id);
        }

        for ext in &module.externs {
            let name = ctx.resolve(ext.name);
            let sig = lowering::make_signature(&self.module, &ext.sig);
            let id = self
                .module
                .declare_function(&name, Linkage::Import, &sig)
                .map_err(reject)?;
            self.func_ids.insert(name.clone(), id);
            self.sigs.entry(name.clone()).or_insert_with(|| ext.sig.clone());
            if !self.defined.contains(&name) && !self.pending_imports.contains(&name) {
                self.pending_imports.push(name);
            }
        }

        // Declare every function before defining any, so intra-module calls
        // resolve regardless of order.
        for func in &module.funcs {
            let name = ctx.resolve(func.name);
            let sig = lowering::make_signature(&self.module, &func.sig);
            let id = self
                .module
                .declare_function(&name, Linkage::Export, &sig)
                .map_err(reject)?;
            self.func_ids.insert(name.clone(), id);
            self.sigs.insert(name.clone(), func.sig.clone());
        }

        for func in &module.funcs {
            let name = ctx.resolve(func.name);
            lowering::define_function(
                &mut self.module,
                func,
                &ctx,
                &self.func_ids,
                &self.data_ids,
                &self.sigs,
            )?;
            self.defined.insert(name.clone());
            if func.is_teardown {
                self.teardowns.push(name);
            }
        }

        tracing::debug!(
            module = %module_name,
            unit = self.unit.name(),
            functions = module.funcs.len(),
            "module registered"
        );

        self.contexts.push(ctx);
        self.dirty = true;
        Ok(self.unit.clone())
    }

    /// Resolve `entry` to executable native code.
    ///
    /// Runs a lookup episode for any import names still unresolved, links,
    /// and returns the entry's address: a compiled definition wins over a
    /// weak host redirect of the same name.
    ///
    /// The caller must reinterpret the address with the function's actual
    /// signature; a mismatch is undefined behavior.
    pub fn lookup(&mut self, entry: &str) -> Result<*const u8, EngineError> {
        self.link()?;

        if self.defined.contains(entry) {
            return Ok(self.module.get_finalized_function(self.func_ids[entry]));
        }
        if let Some(binding) = self.unit.binding(entry) {
            return Ok(binding.addr().as_ptr());
        }
        Err(EngineError::Lookup {
            names: vec![entry.to_string()],
        })
    }

    /// Tear the instance down: run teardown functions, then release the
    /// executable memory and the retained contexts.
    ///
    /// Consuming `self` makes a double close impossible. A teardown function
    /// returning nonzero (or a failure finalizing one) is reported as
    /// [`EngineError::Teardown`]; memory is released either way.
    pub fn close(mut self) -> Result<(), EngineError> {
        let mut failure: Option<EngineError> = None;

        if !self.teardowns.is_empty() {
            match self.link() {
                Ok(()) => {
                    for name in &self.teardowns {
                        let ptr = self.module.get_finalized_function(self.func_ids[name]);
                        // Registration validated the () -> i32 signature.
                        let teardown: extern "C" fn() -> i32 = unsafe { mem::transmute(ptr) };
                        let code = teardown();
                        tracing::debug!(function = %name, code, "teardown function ran");
                        if code != 0 && failure.is_none() {
                            failure = Some(EngineError::Teardown(format!(
                                "teardown function `{name}` returned {code}"
                            )));
                        }
                    }
                }
                Err(err) => {
                    failure = Some(EngineError::Teardown(format!(
                        "could not finalize teardown functions: {err}"
                    )));
                }
            }
        }

        let JitEngine { module, contexts, .. } = self;
        // Outstanding function pointers into this instance are dangling from
        // here on; close() consuming the engine is what makes that sound.
        unsafe { module.free_memory() };
        drop(contexts);

        match failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Resolve pending imports and finalize definitions.
    fn link(&mut self) -> Result<(), EngineError> {
        if !self.dirty {
            return Ok(());
        }

        let names: Vec<String> = self
            .pending_imports
            .iter()
            .filter(|name| !self.defined.contains(*name))
            .cloned()
            .collect();

        run_episode(&self.unit, &names)?;

        let unresolved: Vec<String> = names
            .into_iter()
            .filter(|name| self.unit.binding(name).is_none())
            .collect();
        if !unresolved.is_empty() {
            // Leave the pending list intact: attaching another resolver and
            // retrying is allowed.
            return Err(EngineError::Lookup { names: unresolved });
        }

        self.module
            .finalize_definitions()
            .map_err(|err| EngineError::Backend(err.to_string()))?;
        self.pending_imports.clear();
        self.dirty = false;
        Ok(())
    }
}

// The engine's mutating API takes &mut self, and finalized code is immutable;
// the binding table is internally synchronized.
unsafe impl Send for JitEngine {}
unsafe impl Sync for JitEngine {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_creation() {
        let engine = JitEngine::new().unwrap();
        assert_eq!(engine.unit().name(), "main");
    }

    #[test]
    fn engine_with_config() {
        let config = JitConfig {
            unit_name: "scratch".to_string(),
            process_symbols: false,
        };
        let engine = JitEngine::with_config(config).unwrap();
        assert_eq!(engine.unit().name(), "scratch");
    }

    #[test]
    fn lookup_on_empty_engine_fails() {
        let mut engine = JitEngine::new().unwrap();
        let err = engine.lookup("nothing").unwrap_err();
        assert!(matches!(err, EngineError::Lookup { .. }));
    }

    #[test]
    fn close_without_modules_is_clean() {
        let engine = JitEngine::new().unwrap();
        engine.close().unwrap();
    }
}
