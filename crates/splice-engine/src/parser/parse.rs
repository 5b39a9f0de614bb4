//! Recursive-descent parser over the token stream.

use rustc_hash::FxHashMap;

use crate::context::Context;
use crate::ir::{
    BlockId, CondCode, DataDef, ExternDecl, Function, Instr, IrType, Module, Reg, Signature,
    Terminator,
};

use super::lexer::{lex, Token};
use super::ParseError;

/// Parse a complete textual IR document into a module bound to `ctx`.
pub fn parse_module(source: &str, ctx: &Context) -> Result<Module, ParseError> {
    let tokens = lex(source)?;
    Parser {
        tokens,
        pos: 0,
        ctx,
    }
    .module()
}

struct Parser<'a> {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    ctx: &'a Context,
}

/// Per-function label bookkeeping. Labels may be referenced before they are
/// defined; anything still pending at `}` is an error.
#[derive(Default)]
struct Labels {
    ids: FxHashMap<String, BlockId>,
    pending: FxHashMap<String, usize>,
    any_defined: bool,
}

impl Labels {
    fn define(
        &mut self,
        func: &mut Function,
        label: &str,
        line: usize,
    ) -> Result<BlockId, ParseError> {
        if let Some(&id) = self.ids.get(label) {
            if self.pending.remove(label).is_none() {
                return Err(ParseError::DuplicateLabel {
                    line,
                    label: label.to_string(),
                });
            }
            return Ok(id);
        }

        // The first defined label names the pre-created entry block.
        let id = if self.any_defined {
            func.add_block()
        } else {
            func.entry
        };
        self.any_defined = true;
        self.ids.insert(label.to_string(), id);
        Ok(id)
    }

    fn reference(&mut self, func: &mut Function, label: &str, line: usize) -> BlockId {
        if let Some(&id) = self.ids.get(label) {
            return id;
        }
        let id = func.add_block();
        self.ids.insert(label.to_string(), id);
        self.pending.insert(label.to_string(), line);
        id
    }

    fn check_resolved(self) -> Result<(), ParseError> {
        // Report the earliest unresolved reference for determinism.
        match self.pending.into_iter().min_by_key(|(_, line)| *line) {
            None => Ok(()),
            Some((label, line)) => Err(ParseError::UndefinedLabel { line, label }),
        }
    }
}

impl Parser<'_> {
    fn module(mut self) -> Result<Module, ParseError> {
        self.expect_token(Token::Module, "`module` header")?;
        let (name, _) = self.expect_ident("module name")?;
        let mut module = Module::new(self.ctx.intern(&name));

        loop {
            match self.peek() {
                None => break,
                Some(Token::Extern) => module.externs.push(self.extern_decl()?),
                Some(Token::Data) => module.data.push(self.data_decl()?),
                Some(Token::Fn | Token::Dtor) => module.funcs.push(self.function()?),
                Some(_) => return Err(self.unexpected("`extern`, `data`, or `fn`")),
            }
        }

        Ok(module)
    }

    fn extern_decl(&mut self) -> Result<ExternDecl, ParseError> {
        self.expect_token(Token::Extern, "`extern`")?;
        self.expect_token(Token::Fn, "`fn`")?;
        let (name, _) = self.expect_ident("extern name")?;
        let sig = self.signature()?;
        Ok(ExternDecl {
            name: self.ctx.intern(&name),
            sig,
        })
    }

    fn data_decl(&mut self) -> Result<DataDef, ParseError> {
        self.expect_token(Token::Data, "`data`")?;
        let (name, _) = self.expect_ident("data name")?;
        self.expect_token(Token::Assign, "`=`")?;
        let bytes = match self.advance() {
            Some((Token::Str(bytes), _)) => bytes,
            other => return Err(Self::unexpected_at(other, "a string literal")),
        };
        Ok(DataDef {
            name: self.ctx.intern(&name),
            bytes,
        })
    }

    fn function(&mut self) -> Result<Function, ParseError> {
        let is_teardown = self.eat(&Token::Dtor);
        self.expect_token(Token::Fn, "`fn`")?;
        let (name, _) = self.expect_ident("function name")?;
        let sig = self.signature()?;
        self.expect_token(Token::LBrace, "`{`")?;

        let mut func = Function::new(self.ctx.intern(&name), sig);
        func.is_teardown = is_teardown;

        let mut labels = Labels::default();
        while !self.eat(&Token::RBrace) {
            self.block(&mut func, &mut labels)?;
        }
        labels.check_resolved()?;

        Ok(func)
    }

    fn signature(&mut self) -> Result<Signature, ParseError> {
        self.expect_token(Token::LParen, "`(`")?;
        let mut params = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                params.push(self.ty()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect_token(Token::RParen, "`)` or `,`")?;
                break;
            }
        }
        let ret = if self.eat(&Token::Arrow) {
            Some(self.ty()?)
        } else {
            None
        };
        Ok(Signature::new(params, ret))
    }

    fn ty(&mut self) -> Result<IrType, ParseError> {
        match self.advance() {
            Some((Token::TyI32, _)) => Ok(IrType::I32),
            Some((Token::TyI64, _)) => Ok(IrType::I64),
            Some((Token::TyPtr, _)) => Ok(IrType::Ptr),
            other => Err(Self::unexpected_at(other, "a type (`i32`, `i64`, `ptr`)")),
        }
    }

    fn block(&mut self, func: &mut Function, labels: &mut Labels) -> Result<(), ParseError> {
        let (label, line) = self.expect_ident("block label")?;
        self.expect_token(Token::Colon, "`:`")?;
        let id = labels.define(func, &label, line)?;

        loop {
            match self.peek() {
                Some(Token::Reg(_)) => self.assignment(func, id)?,
                Some(Token::Call) => {
                    self.advance();
                    let (callee, args) = self.call_tail(func)?;
                    func.block_mut(id).instrs.push(Instr::Call {
                        dest: None,
                        callee,
                        args,
                    });
                }
                Some(Token::Ret) => {
                    self.advance();
                    let value = match self.peek() {
                        Some(Token::Reg(_)) => Some(self.operand(func)?),
                        _ => None,
                    };
                    func.block_mut(id).terminator = Terminator::Ret(value);
                    return Ok(());
                }
                Some(Token::Jmp) => {
                    self.advance();
                    let (target, tline) = self.expect_ident("block label")?;
                    let target = labels.reference(func, &target, tline);
                    func.block_mut(id).terminator = Terminator::Jmp(target);
                    return Ok(());
                }
                Some(Token::Br) => {
                    self.advance();
                    let cond = self.operand(func)?;
                    self.expect_token(Token::Comma, "`,`")?;
                    let (then_label, tline) = self.expect_ident("block label")?;
                    self.expect_token(Token::Comma, "`,`")?;
                    let (else_label, eline) = self.expect_ident("block label")?;
                    let then_block = labels.reference(func, &then_label, tline);
                    let else_block = labels.reference(func, &else_label, eline);
                    func.block_mut(id).terminator = Terminator::Br {
                        cond,
                        then_block,
                        else_block,
                    };
                    return Ok(());
                }
                _ => return Err(self.unexpected("an instruction or terminator")),
            }
        }
    }

    fn assignment(&mut self, func: &mut Function, block: BlockId) -> Result<(), ParseError> {
        let (dest_idx, dest_line) = self.expect_reg()?;
        self.expect_token(Token::Assign, "`=`")?;

        let instr = match self.advance() {
            Some((Token::Const, line)) => {
                self.expect_token(Token::Dot, "`.`")?;
                let ty = self.ty()?;
                if !ty.is_integer() {
                    return Err(ParseError::BadConstType { line });
                }
                let (value, _) = self.expect_int()?;
                let dest = Self::def_reg(func, dest_idx, ty, dest_line)?;
                Instr::Const { dest, ty, value }
            }
            Some((op @ (Token::Iadd | Token::Isub | Token::Imul), line)) => {
                let lhs = self.operand(func)?;
                self.expect_token(Token::Comma, "`,`")?;
                let rhs = self.operand(func)?;

                let ty = func.reg_type(lhs);
                if !ty.is_integer() || func.reg_type(rhs) != ty {
                    return Err(ParseError::TypeMismatch {
                        line,
                        op: mnemonic(&op),
                    });
                }
                let dest = Self::def_reg(func, dest_idx, ty, dest_line)?;
                match op {
                    Token::Iadd => Instr::Iadd { dest, lhs, rhs },
                    Token::Isub => Instr::Isub { dest, lhs, rhs },
                    _ => Instr::Imul { dest, lhs, rhs },
                }
            }
            Some((Token::Icmp, line)) => {
                self.expect_token(Token::Dot, "`.`")?;
                let (cc_name, cc_line) = self.expect_ident("comparison condition")?;
                let cc = match cc_name.as_str() {
                    "eq" => CondCode::Eq,
                    "ne" => CondCode::Ne,
                    "lt" => CondCode::Lt,
                    "le" => CondCode::Le,
                    "gt" => CondCode::Gt,
                    "ge" => CondCode::Ge,
                    _ => {
                        return Err(ParseError::UnknownCondition {
                            line: cc_line,
                            cc: cc_name,
                        })
                    }
                };
                let lhs = self.operand(func)?;
                self.expect_token(Token::Comma, "`,`")?;
                let rhs = self.operand(func)?;

                let ty = func.reg_type(lhs);
                if !ty.is_integer() || func.reg_type(rhs) != ty {
                    return Err(ParseError::TypeMismatch { line, op: "icmp" });
                }
                let dest = Self::def_reg(func, dest_idx, IrType::I32, dest_line)?;
                Instr::Icmp { dest, cc, lhs, rhs }
            }
            Some((Token::Call, _)) => {
                self.expect_token(Token::Dot, "`.`")?;
                let ty = self.ty()?;
                let (callee, args) = self.call_tail(func)?;
                let dest = Self::def_reg(func, dest_idx, ty, dest_line)?;
                Instr::Call {
                    dest: Some(dest),
                    callee,
                    args,
                }
            }
            Some((Token::Addr, _)) => {
                let (name, _) = self.expect_ident("data name")?;
                let dest = Self::def_reg(func, dest_idx, IrType::Ptr, dest_line)?;
                Instr::DataAddr {
                    dest,
                    name: self.ctx.intern(&name),
                }
            }
            other => return Err(Self::unexpected_at(other, "an instruction")),
        };

        func.block_mut(block).instrs.push(instr);
        Ok(())
    }

    fn call_tail(&mut self, func: &Function) -> Result<(crate::Symbol, Vec<Reg>), ParseError> {
        let (callee, _) = self.expect_ident("callee name")?;
        self.expect_token(Token::LParen, "`(`")?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.operand(func)?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect_token(Token::RParen, "`)` or `,`")?;
                break;
            }
        }
        Ok((self.ctx.intern(&callee), args))
    }

    /// A register read; must already be defined.
    fn operand(&mut self, func: &Function) -> Result<Reg, ParseError> {
        let (idx, line) = self.expect_reg()?;
        if (idx as usize) >= func.num_regs() {
            return Err(ParseError::UndefinedRegister { line, reg: idx });
        }
        Ok(Reg(idx))
    }

    /// A register write; registers are defined densely and in order.
    fn def_reg(
        func: &mut Function,
        idx: u32,
        ty: IrType,
        line: usize,
    ) -> Result<Reg, ParseError> {
        let expected = func.num_regs() as u32;
        if idx != expected {
            return Err(ParseError::RegisterOrder {
                line,
                found: idx,
                expected,
            });
        }
        Ok(func.alloc_reg(ty))
    }

    // ===== Token helpers =====

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn advance(&mut self) -> Option<(Token, usize)> {
        let entry = self.tokens.get(self.pos).cloned();
        if entry.is_some() {
            self.pos += 1;
        }
        entry
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_token(&mut self, token: Token, expected: &'static str) -> Result<(), ParseError> {
        match self.advance() {
            Some((found, _)) if found == token => Ok(()),
            other => Err(Self::unexpected_at(other, expected)),
        }
    }

    fn expect_ident(&mut self, expected: &'static str) -> Result<(String, usize), ParseError> {
        match self.advance() {
            Some((Token::Ident(name), line)) => Ok((name, line)),
            other => Err(Self::unexpected_at(other, expected)),
        }
    }

    fn expect_reg(&mut self) -> Result<(u32, usize), ParseError> {
        match self.advance() {
            Some((Token::Reg(idx), line)) => Ok((idx, line)),
            other => Err(Self::unexpected_at(other, "a register")),
        }
    }

    fn expect_int(&mut self) -> Result<(i64, usize), ParseError> {
        match self.advance() {
            Some((Token::Int(value), line)) => Ok((value, line)),
            other => Err(Self::unexpected_at(other, "an integer literal")),
        }
    }

    fn unexpected(&mut self, expected: &'static str) -> ParseError {
        let entry = self.advance();
        Self::unexpected_at(entry, expected)
    }

    fn unexpected_at(entry: Option<(Token, usize)>, expected: &'static str) -> ParseError {
        match entry {
            Some((found, line)) => ParseError::Unexpected {
                line,
                expected,
                found: describe(&found),
            },
            None => ParseError::UnexpectedEof { expected },
        }
    }
}

fn mnemonic(token: &Token) -> &'static str {
    match token {
        Token::Iadd => "iadd",
        Token::Isub => "isub",
        Token::Imul => "imul",
        _ => "call",
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => format!("identifier `{name}`"),
        Token::Reg(idx) => format!("register r{idx}"),
        Token::Int(value) => format!("integer {value}"),
        Token::Str(_) => "a string literal".to_string(),
        other => format!("{other:?}").to_lowercase(),
    }
}
