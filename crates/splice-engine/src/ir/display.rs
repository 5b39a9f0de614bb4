//! Pretty-printing for IR modules.
//!
//! Prints the same textual syntax the parser accepts, so a dumped module can
//! be parsed back.

use std::fmt;

use crate::context::Context;

use super::instr::{Block, Function, Instr, Terminator};
use super::Module;

impl Module {
    /// Displayable view of the module; names are resolved through `ctx`.
    pub fn display<'a>(&'a self, ctx: &'a Context) -> ModuleDisplay<'a> {
        ModuleDisplay { module: self, ctx }
    }
}

/// Borrowed view implementing [`fmt::Display`] for a module.
pub struct ModuleDisplay<'a> {
    module: &'a Module,
    ctx: &'a Context,
}

impl fmt::Display for ModuleDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.ctx.resolve(self.module.name))?;

        for ext in &self.module.externs {
            write!(f, "\nextern fn {}(", self.ctx.resolve(ext.name))?;
            fmt_types(f, &ext.sig.params)?;
            write!(f, ")")?;
            if let Some(ret) = ext.sig.ret {
                write!(f, " -> {ret}")?;
            }
            writeln!(f)?;
        }

        for data in &self.module.data {
            write!(f, "\ndata {} = \"", self.ctx.resolve(data.name))?;
            for &byte in &data.bytes {
                match byte {
                    b'"' => write!(f, "\\\"")?,
                    b'\\' => write!(f, "\\\\")?,
                    b'\n' => write!(f, "\\n")?,
                    b'\t' => write!(f, "\\t")?,
                    0x20..=0x7e => write!(f, "{}", byte as char)?,
                    _ => write!(f, "\\x{byte:02x}")?,
                }
            }
            writeln!(f, "\"")?;
        }

        for func in &self.module.funcs {
            writeln!(f)?;
            fmt_function(f, func, self.ctx)?;
        }

        Ok(())
    }
}

fn fmt_types(f: &mut fmt::Formatter<'_>, types: &[super::IrType]) -> fmt::Result {
    for (i, ty) in types.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{ty}")?;
    }
    Ok(())
}

fn fmt_function(f: &mut fmt::Formatter<'_>, func: &Function, ctx: &Context) -> fmt::Result {
    if func.is_teardown {
        write!(f, "dtor ")?;
    }
    write!(f, "fn {}(", ctx.resolve(func.name))?;
    fmt_types(f, &func.sig.params)?;
    write!(f, ")")?;
    if let Some(ret) = func.sig.ret {
        write!(f, " -> {ret}")?;
    }
    writeln!(f, " {{")?;

    for block in &func.blocks {
        fmt_block(f, block, func, ctx)?;
    }

    writeln!(f, "}}")
}

fn fmt_block(
    f: &mut fmt::Formatter<'_>,
    block: &Block,
    func: &Function,
    ctx: &Context,
) -> fmt::Result {
    writeln!(f, "{}:", block.id)?;

    for instr in &block.instrs {
        write!(f, "    ")?;
        fmt_instr(f, instr, func, ctx)?;
        writeln!(f)?;
    }

    match &block.terminator {
        Terminator::None => writeln!(f, "    ; no terminator"),
        Terminator::Ret(None) => writeln!(f, "    ret"),
        Terminator::Ret(Some(reg)) => writeln!(f, "    ret {reg}"),
        Terminator::Jmp(target) => writeln!(f, "    jmp {target}"),
        Terminator::Br {
            cond,
            then_block,
            else_block,
        } => writeln!(f, "    br {cond}, {then_block}, {else_block}"),
    }
}

fn fmt_instr(
    f: &mut fmt::Formatter<'_>,
    instr: &Instr,
    func: &Function,
    ctx: &Context,
) -> fmt::Result {
    match instr {
        Instr::Const { dest, ty, value } => write!(f, "{dest} = const.{ty} {value}"),
        Instr::Iadd { dest, lhs, rhs } => write!(f, "{dest} = iadd {lhs}, {rhs}"),
        Instr::Isub { dest, lhs, rhs } => write!(f, "{dest} = isub {lhs}, {rhs}"),
        Instr::Imul { dest, lhs, rhs } => write!(f, "{dest} = imul {lhs}, {rhs}"),
        Instr::Icmp { dest, cc, lhs, rhs } => write!(f, "{dest} = icmp.{cc} {lhs}, {rhs}"),
        Instr::Call { dest, callee, args } => {
            if let Some(dest) = dest {
                let ty = func.reg_type(*dest);
                write!(f, "{dest} = call.{ty} {}(", ctx.resolve(*callee))?;
            } else {
                write!(f, "call {}(", ctx.resolve(*callee))?;
            }
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{arg}")?;
            }
            write!(f, ")")
        }
        Instr::DataAddr { dest, name } => write!(f, "{dest} = addr {}", ctx.resolve(*name)),
    }
}
