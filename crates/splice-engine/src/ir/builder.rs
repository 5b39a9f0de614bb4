//! Builder helpers for programmatic module construction.

use crate::context::{Context, Symbol};

use super::instr::{BlockId, CondCode, Function, Instr, Reg, Terminator};
use super::types::IrType;
use super::{Module, Signature};

/// Builder that simplifies function construction.
///
/// Emits into a current block; registers are allocated typed, parameters are
/// pre-allocated as `r0..r(n-1)`.
pub struct FuncBuilder {
    func: Function,
    current: BlockId,
}

impl FuncBuilder {
    /// Start building a function with the given name and signature.
    pub fn new(name: Symbol, sig: Signature) -> Self {
        let func = Function::new(name, sig);
        let current = func.entry;
        FuncBuilder { func, current }
    }

    /// Mark the function as a teardown function (run at engine close).
    pub fn teardown(mut self) -> Self {
        self.func.is_teardown = true;
        self
    }

    /// The register holding the `index`-th parameter.
    pub fn param(&self, index: usize) -> Reg {
        self.func.param(index)
    }

    /// Create a new basic block.
    pub fn create_block(&mut self) -> BlockId {
        self.func.add_block()
    }

    /// Switch to emitting into a different block.
    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current = block;
    }

    /// Emit an integer constant.
    pub fn iconst(&mut self, ty: IrType, value: i64) -> Reg {
        let dest = self.func.alloc_reg(ty);
        self.emit(Instr::Const { dest, ty, value });
        dest
    }

    /// Emit a wrapping addition.
    pub fn iadd(&mut self, lhs: Reg, rhs: Reg) -> Reg {
        let dest = self.func.alloc_reg(self.func.reg_type(lhs));
        self.emit(Instr::Iadd { dest, lhs, rhs });
        dest
    }

    /// Emit a wrapping subtraction.
    pub fn isub(&mut self, lhs: Reg, rhs: Reg) -> Reg {
        let dest = self.func.alloc_reg(self.func.reg_type(lhs));
        self.emit(Instr::Isub { dest, lhs, rhs });
        dest
    }

    /// Emit a wrapping multiplication.
    pub fn imul(&mut self, lhs: Reg, rhs: Reg) -> Reg {
        let dest = self.func.alloc_reg(self.func.reg_type(lhs));
        self.emit(Instr::Imul { dest, lhs, rhs });
        dest
    }

    /// Emit a signed comparison (result is `i32` 0 or 1).
    pub fn icmp(&mut self, cc: CondCode, lhs: Reg, rhs: Reg) -> Reg {
        let dest = self.func.alloc_reg(IrType::I32);
        self.emit(Instr::Icmp { dest, cc, lhs, rhs });
        dest
    }

    /// Emit a call. Returns the destination register when `ret` is given.
    pub fn call(&mut self, callee: Symbol, args: &[Reg], ret: Option<IrType>) -> Option<Reg> {
        let dest = ret.map(|ty| self.func.alloc_reg(ty));
        self.emit(Instr::Call {
            dest,
            callee,
            args: args.to_vec(),
        });
        dest
    }

    /// Emit the address of a data object.
    pub fn data_addr(&mut self, name: Symbol) -> Reg {
        let dest = self.func.alloc_reg(IrType::Ptr);
        self.emit(Instr::DataAddr { dest, name });
        dest
    }

    /// Terminate the current block with a return.
    pub fn ret(&mut self, value: Option<Reg>) {
        self.terminate(Terminator::Ret(value));
    }

    /// Terminate the current block with an unconditional jump.
    pub fn jmp(&mut self, target: BlockId) {
        self.terminate(Terminator::Jmp(target));
    }

    /// Terminate the current block with a conditional branch.
    pub fn br(&mut self, cond: Reg, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::Br {
            cond,
            then_block,
            else_block,
        });
    }

    /// Finish and return the function.
    pub fn finish(self) -> Function {
        self.func
    }

    fn emit(&mut self, instr: Instr) {
        self.func.block_mut(self.current).instrs.push(instr);
    }

    fn terminate(&mut self, term: Terminator) {
        self.func.block_mut(self.current).terminator = term;
    }
}

/// Build the demo module: a single `sum(i32, i32) -> i32` returning the
/// wrapping signed sum of its arguments. Always succeeds given a context.
pub fn build_sum_module(ctx: &Context) -> Module {
    let mut module = Module::new(ctx.intern("demo"));

    let sig = Signature::new(vec![IrType::I32, IrType::I32], Some(IrType::I32));
    let mut b = FuncBuilder::new(ctx.intern("sum"), sig);
    let (a0, a1) = (b.param(0), b.param(1));
    let r = b.iadd(a0, a1);
    b.ret(Some(r));

    module.funcs.push(b.finish());
    module
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Terminator;

    #[test]
    fn sum_module_shape() {
        let ctx = Context::new();
        let module = build_sum_module(&ctx);

        assert_eq!(ctx.resolve(module.name), "demo");
        assert_eq!(module.funcs.len(), 1);
        assert!(module.externs.is_empty());

        let sum = &module.funcs[0];
        assert_eq!(ctx.resolve(sum.name), "sum");
        assert_eq!(sum.sig.params, vec![IrType::I32, IrType::I32]);
        assert_eq!(sum.sig.ret, Some(IrType::I32));
        assert_eq!(sum.num_regs(), 3);
        assert!(matches!(
            sum.block(sum.entry).terminator,
            Terminator::Ret(Some(Reg(2)))
        ));
    }

    #[test]
    fn builder_blocks_and_branches() {
        let ctx = Context::new();
        let sig = Signature::new(vec![IrType::I32], Some(IrType::I32));
        let mut b = FuncBuilder::new(ctx.intern("clamp"), sig);

        let zero = b.iconst(IrType::I32, 0);
        let neg = b.icmp(CondCode::Lt, b.param(0), zero);
        let then_block = b.create_block();
        let else_block = b.create_block();
        b.br(neg, then_block, else_block);

        b.switch_to_block(then_block);
        b.ret(Some(zero));

        b.switch_to_block(else_block);
        let p = b.param(0);
        b.ret(Some(p));

        let func = b.finish();
        assert_eq!(func.blocks.len(), 3);
        assert!(matches!(
            func.block(func.entry).terminator,
            Terminator::Br { .. }
        ));
    }
}
