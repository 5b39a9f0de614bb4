//! IR instructions, blocks, and functions.
//!
//! Instructions operate on virtual registers (`Reg`) and are grouped into
//! basic blocks with explicit terminators.

use crate::context::Symbol;

use super::types::IrType;
use super::Signature;

/// Virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(pub u32);

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Basic block identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Integer comparison condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondCode {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Signed less than.
    Lt,
    /// Signed less than or equal.
    Le,
    /// Signed greater than.
    Gt,
    /// Signed greater than or equal.
    Ge,
}

impl std::fmt::Display for CondCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CondCode::Eq => "eq",
            CondCode::Ne => "ne",
            CondCode::Lt => "lt",
            CondCode::Le => "le",
            CondCode::Gt => "gt",
            CondCode::Ge => "ge",
        };
        write!(f, "{s}")
    }
}

/// An IR instruction.
#[derive(Debug, Clone)]
pub enum Instr {
    /// Integer constant.
    Const {
        /// Destination register.
        dest: Reg,
        /// Constant type (`I32` or `I64`).
        ty: IrType,
        /// Constant value (truncated to the type's width).
        value: i64,
    },
    /// Wrapping integer addition.
    Iadd {
        /// Destination register.
        dest: Reg,
        /// Left operand.
        lhs: Reg,
        /// Right operand.
        rhs: Reg,
    },
    /// Wrapping integer subtraction.
    Isub {
        /// Destination register.
        dest: Reg,
        /// Left operand.
        lhs: Reg,
        /// Right operand.
        rhs: Reg,
    },
    /// Wrapping integer multiplication.
    Imul {
        /// Destination register.
        dest: Reg,
        /// Left operand.
        lhs: Reg,
        /// Right operand.
        rhs: Reg,
    },
    /// Signed integer comparison producing 0 or 1 as `i32`.
    Icmp {
        /// Destination register.
        dest: Reg,
        /// Condition.
        cc: CondCode,
        /// Left operand.
        lhs: Reg,
        /// Right operand.
        rhs: Reg,
    },
    /// Call a function or extern by name.
    Call {
        /// Destination register, `None` for void calls.
        dest: Option<Reg>,
        /// Callee name (module function or extern).
        callee: Symbol,
        /// Argument registers.
        args: Vec<Reg>,
    },
    /// Address of a data object.
    DataAddr {
        /// Destination register (`Ptr`).
        dest: Reg,
        /// Data object name.
        name: Symbol,
    },
}

/// A block terminator.
#[derive(Debug, Clone, Default)]
pub enum Terminator {
    /// Not yet set; rejected at registration time.
    #[default]
    None,
    /// Return, optionally with a value.
    Ret(Option<Reg>),
    /// Unconditional jump.
    Jmp(BlockId),
    /// Conditional branch: nonzero condition takes `then_block`.
    Br {
        /// Condition register.
        cond: Reg,
        /// Taken when the condition is nonzero.
        then_block: BlockId,
        /// Taken when the condition is zero.
        else_block: BlockId,
    },
}

/// A basic block.
#[derive(Debug, Clone)]
pub struct Block {
    /// Block identifier.
    pub id: BlockId,
    /// Instructions, in order.
    pub instrs: Vec<Instr>,
    /// Terminator.
    pub terminator: Terminator,
}

/// A function definition.
///
/// The first `sig.params.len()` registers are the function parameters.
#[derive(Debug, Clone)]
pub struct Function {
    /// Function name.
    pub name: Symbol,
    /// Signature.
    pub sig: Signature,
    /// Whether this function runs at engine teardown (must be `() -> i32`,
    /// nonzero return means teardown failure).
    pub is_teardown: bool,
    /// Entry block.
    pub entry: BlockId,
    /// Basic blocks, indexed by `BlockId`.
    pub blocks: Vec<Block>,
    /// Register types, indexed by `Reg`.
    pub reg_types: Vec<IrType>,
}

impl Function {
    /// Create a function with its entry block and parameter registers
    /// pre-allocated.
    pub fn new(name: Symbol, sig: Signature) -> Self {
        let reg_types = sig.params.clone();
        let mut func = Function {
            name,
            sig,
            is_teardown: false,
            entry: BlockId(0),
            blocks: Vec::new(),
            reg_types,
        };
        func.add_block();
        func
    }

    /// Allocate a new virtual register with the given type.
    pub fn alloc_reg(&mut self, ty: IrType) -> Reg {
        let reg = Reg(self.reg_types.len() as u32);
        self.reg_types.push(ty);
        reg
    }

    /// The type of a register.
    ///
    /// # Panics
    ///
    /// Panics if the register was not allocated in this function.
    pub fn reg_type(&self, reg: Reg) -> IrType {
        self.reg_types[reg.0 as usize]
    }

    /// Number of allocated registers.
    pub fn num_regs(&self) -> usize {
        self.reg_types.len()
    }

    /// The register holding the `index`-th parameter.
    pub fn param(&self, index: usize) -> Reg {
        debug_assert!(index < self.sig.params.len());
        Reg(index as u32)
    }

    /// Append a new empty block.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            id,
            instrs: Vec::new(),
            terminator: Terminator::None,
        });
        id
    }

    /// Borrow a block.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    /// Borrow a block mutably.
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }
}
