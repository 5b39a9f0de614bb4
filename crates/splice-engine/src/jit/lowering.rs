//! IR → Cranelift lowering.
//!
//! Translates one IR function at a time into Cranelift IR and defines it in
//! the engine's `JITModule`. Registers become typed Cranelift variables;
//! Cranelift's SSA construction resolves cross-block uses when blocks are
//! sealed.

use cranelift_codegen::ir::{self as clif, condcodes::IntCC, types, AbiParam, InstBuilder};
use cranelift_codegen::Context as ClifContext;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_jit::JITModule;
use cranelift_module::{DataId, FuncId, Module as _};
use rustc_hash::FxHashMap;

use crate::context::Context;
use crate::error::EngineError;
use crate::ir::{BlockId, CondCode, Function, Instr, IrType, Reg, Signature, Terminator};

/// Build the Cranelift signature for an IR signature.
pub(crate) fn make_signature(module: &JITModule, sig: &Signature) -> clif::Signature {
    let ptr = module.target_config().pointer_type();
    let mut out = module.make_signature();
    for &param in &sig.params {
        out.params.push(AbiParam::new(clif_type(param, ptr)));
    }
    if let Some(ret) = sig.ret {
        out.returns.push(AbiParam::new(clif_type(ret, ptr)));
    }
    out
}

fn clif_type(ty: IrType, ptr: clif::Type) -> clif::Type {
    match ty {
        IrType::I32 => types::I32,
        IrType::I64 => types::I64,
        IrType::Ptr => ptr,
    }
}

fn intcc(cc: CondCode) -> IntCC {
    match cc {
        CondCode::Eq => IntCC::Equal,
        CondCode::Ne => IntCC::NotEqual,
        CondCode::Lt => IntCC::SignedLessThan,
        CondCode::Le => IntCC::SignedLessThanOrEqual,
        CondCode::Gt => IntCC::SignedGreaterThan,
        CondCode::Ge => IntCC::SignedGreaterThanOrEqual,
    }
}

fn reject(reason: String) -> EngineError {
    EngineError::Registration { reason }
}

/// Lower `func` and define it under its declared `FuncId`.
pub(crate) fn define_function(
    module: &mut JITModule,
    func: &Function,
    ctx: &Context,
    func_ids: &FxHashMap<String, FuncId>,
    data_ids: &FxHashMap<String, DataId>,
    sigs: &FxHashMap<String, Signature>,
) -> Result<(), EngineError> {
    let name = ctx.resolve(func.name);
    let id = func_ids[&name];
    let ptr_type = module.target_config().pointer_type();

    let mut clif_ctx = ClifContext::new();
    clif_ctx.func.signature = make_signature(module, &func.sig);
    clif_ctx.func.name = clif::UserFuncName::user(0, id.as_u32());

    {
        let mut builder_ctx = FunctionBuilderContext::new();
        let builder = FunctionBuilder::new(&mut clif_ctx.func, &mut builder_ctx);
        let lowering = Lowering {
            module: &mut *module,
            func,
            ctx,
            func_ids,
            data_ids,
            sigs,
            reg_vars: FxHashMap::default(),
            block_map: FxHashMap::default(),
            ptr_type,
        };
        lowering.lower(builder)?;
    }

    module
        .define_function(id, &mut clif_ctx)
        .map_err(|err| reject(format!("defining `{name}` failed: {err}")))
}

/// State maintained while lowering a single function.
struct Lowering<'a> {
    module: &'a mut JITModule,
    func: &'a Function,
    ctx: &'a Context,
    func_ids: &'a FxHashMap<String, FuncId>,
    data_ids: &'a FxHashMap<String, DataId>,
    sigs: &'a FxHashMap<String, Signature>,
    reg_vars: FxHashMap<Reg, Variable>,
    block_map: FxHashMap<BlockId, clif::Block>,
    ptr_type: clif::Type,
}

impl Lowering<'_> {
    /// Lower the whole function. Takes ownership of the builder since
    /// `finalize()` consumes it.
    fn lower(mut self, mut builder: FunctionBuilder<'_>) -> Result<(), EngineError> {
        let func = self.func;

        for block in &func.blocks {
            self.block_map.insert(block.id, builder.create_block());
        }

        let entry = self.block_map[&func.entry];
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);

        // All registers become typed variables up front.
        for idx in 0..func.num_regs() {
            let reg = Reg(idx as u32);
            let var = builder.declare_var(clif_type(func.reg_type(reg), self.ptr_type));
            self.reg_vars.insert(reg, var);
        }

        // Parameter registers take their values from the entry block params.
        let params: Vec<clif::Value> = builder.block_params(entry).to_vec();
        for (index, &value) in params.iter().enumerate() {
            self.def_reg(&mut builder, Reg(index as u32), value);
        }

        // Entry first, then the remaining blocks in order.
        let order = std::iter::once(func.entry)
            .chain(func.blocks.iter().map(|b| b.id).filter(|&id| id != func.entry));
        for (index, block_id) in order.enumerate() {
            if index > 0 {
                builder.switch_to_block(self.block_map[&block_id]);
            }
            let block = func.block(block_id);
            for instr in &block.instrs {
                self.lower_instr(instr, &mut builder)?;
            }
            self.lower_terminator(&block.terminator, block_id, &mut builder)?;
        }

        builder.seal_all_blocks();
        builder.finalize();
        Ok(())
    }

    fn lower_instr(
        &mut self,
        instr: &Instr,
        builder: &mut FunctionBuilder<'_>,
    ) -> Result<(), EngineError> {
        match instr {
            Instr::Const { dest, ty, value } => {
                let imm = match ty {
                    IrType::I32 => *value as i32 as i64,
                    _ => *value,
                };
                let val = builder.ins().iconst(clif_type(*ty, self.ptr_type), imm);
                self.def_reg(builder, *dest, val);
            }
            Instr::Iadd { dest, lhs, rhs } => {
                let l = self.use_reg(builder, *lhs);
                let r = self.use_reg(builder, *rhs);
                let result = builder.ins().iadd(l, r);
                self.def_reg(builder, *dest, result);
            }
            Instr::Isub { dest, lhs, rhs } => {
                let l = self.use_reg(builder, *lhs);
                let r = self.use_reg(builder, *rhs);
                let result = builder.ins().isub(l, r);
                self.def_reg(builder, *dest, result);
            }
            Instr::Imul { dest, lhs, rhs } => {
                let l = self.use_reg(builder, *lhs);
                let r = self.use_reg(builder, *rhs);
                let result = builder.ins().imul(l, r);
                self.def_reg(builder, *dest, result);
            }
            Instr::Icmp { dest, cc, lhs, rhs } => {
                let l = self.use_reg(builder, *lhs);
                let r = self.use_reg(builder, *rhs);
                let flag = builder.ins().icmp(intcc(*cc), l, r);
                let result = builder.ins().uextend(types::I32, flag);
                self.def_reg(builder, *dest, result);
            }
            Instr::Call { dest, callee, args } => {
                let callee_name = self.ctx.resolve(*callee);
                let Some(&callee_id) = self.func_ids.get(&callee_name) else {
                    return Err(reject(format!(
                        "call to `{callee_name}`, which is neither defined nor declared extern"
                    )));
                };
                if let Some(callee_sig) = self.sigs.get(&callee_name) {
                    if callee_sig.params.len() != args.len()
                        || callee_sig.ret.is_some() != dest.is_some()
                    {
                        return Err(reject(format!(
                            "call to `{callee_name}` does not match its declared signature"
                        )));
                    }
                }

                let local = self.module.declare_func_in_func(callee_id, builder.func);
                let arg_vals: Vec<clif::Value> =
                    args.iter().map(|&arg| self.use_reg(builder, arg)).collect();
                let call = builder.ins().call(local, &arg_vals);
                if let Some(dest) = dest {
                    let result = builder.inst_results(call)[0];
                    self.def_reg(builder, *dest, result);
                }
            }
            Instr::DataAddr { dest, name } => {
                let data_name = self.ctx.resolve(*name);
                let Some(&data_id) = self.data_ids.get(&data_name) else {
                    return Err(reject(format!("unknown data object `{data_name}`")));
                };
                let gv = self.module.declare_data_in_func(data_id, builder.func);
                let val = builder.ins().symbol_value(self.ptr_type, gv);
                self.def_reg(builder, *dest, val);
            }
        }
        Ok(())
    }

    fn lower_terminator(
        &mut self,
        term: &Terminator,
        block: BlockId,
        builder: &mut FunctionBuilder<'_>,
    ) -> Result<(), EngineError> {
        match term {
            Terminator::None => {
                return Err(reject(format!(
                    "block {block} of `{}` has no terminator",
                    self.ctx.resolve(self.func.name)
                )));
            }
            Terminator::Ret(value) => {
                if value.is_some() != self.func.sig.ret.is_some() {
                    return Err(reject(format!(
                        "return in `{}` does not match the function signature",
                        self.ctx.resolve(self.func.name)
                    )));
                }
                match value {
                    Some(reg) => {
                        let val = self.use_reg(builder, *reg);
                        builder.ins().return_(&[val]);
                    }
                    None => {
                        builder.ins().return_(&[]);
                    }
                }
            }
            Terminator::Jmp(target) => {
                builder.ins().jump(self.block_map[target], &[]);
            }
            Terminator::Br {
                cond,
                then_block,
                else_block,
            } => {
                let cond_val = self.use_reg(builder, *cond);
                let then_cl = self.block_map[then_block];
                let else_cl = self.block_map[else_block];
                builder.ins().brif(cond_val, then_cl, &[], else_cl, &[]);
            }
        }
        Ok(())
    }

    fn use_reg(&self, builder: &mut FunctionBuilder<'_>, reg: Reg) -> clif::Value {
        builder.use_var(self.reg_vars[&reg])
    }

    fn def_reg(&self, builder: &mut FunctionBuilder<'_>, reg: Reg, value: clif::Value) {
        builder.def_var(self.reg_vars[&reg], value);
    }
}
