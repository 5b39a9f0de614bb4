//! Binary module container encoding and decoding.
//!
//! Layout: a 48-byte header (magic, version, flags, CRC32, SHA-256) followed
//! by the payload (name, extern table, data table, function table). Both
//! checksums cover the payload and are verified on decode.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::context::Context;
use crate::ir::{
    Block, BlockId, CondCode, DataDef, ExternDecl, Function, Instr, IrType, Module, Reg,
    Signature, Terminator,
};

use super::encoder::{ByteReader, ByteWriter, DecodeError};

/// Magic number for splice containers.
pub const MAGIC: [u8; 4] = *b"SPLC";

/// Current container version.
pub const VERSION: u32 = 1;

/// Function flag: runs at engine teardown.
const FLAG_TEARDOWN: u32 = 1 << 0;

/// Size of the fixed header: magic + version + flags + crc32 + sha256.
const HEADER_LEN: usize = 4 + 4 + 4 + 4 + 32;

/// Container decoding errors, distinct from file-read errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContainerError {
    /// Low-level decode error.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The file does not start with the container magic.
    #[error("invalid magic number: expected SPLC, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// The container was written by an unsupported format version.
    #[error("unsupported container version {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// The payload CRC32 does not match the header.
    #[error("payload checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum stored in the header.
        expected: u32,
        /// Checksum of the payload as read.
        actual: u32,
    },

    /// The payload SHA-256 digest does not match the header.
    #[error("payload digest mismatch")]
    DigestMismatch,
}

// ===== Encoding =====

/// Encode a module into container bytes.
pub fn encode_module(module: &Module, ctx: &Context) -> Vec<u8> {
    let mut writer = ByteWriter::new();

    writer.emit_bytes(&MAGIC);
    writer.emit_u32(VERSION);
    writer.emit_u32(0); // flags, reserved
    let crc_offset = writer.offset();
    writer.emit_u32(0); // CRC32, patched below
    let sha_offset = writer.offset();
    writer.emit_bytes(&[0u8; 32]); // SHA-256, patched below

    writer.emit_str(&ctx.resolve(module.name));

    writer.emit_u32(module.externs.len() as u32);
    for ext in &module.externs {
        writer.emit_str(&ctx.resolve(ext.name));
        encode_signature(&mut writer, &ext.sig);
    }

    writer.emit_u32(module.data.len() as u32);
    for data in &module.data {
        writer.emit_str(&ctx.resolve(data.name));
        writer.emit_u32(data.bytes.len() as u32);
        writer.emit_bytes(&data.bytes);
    }

    writer.emit_u32(module.funcs.len() as u32);
    for func in &module.funcs {
        encode_function(&mut writer, func, ctx);
    }

    let payload_crc = crc32fast::hash(&writer.buffer[HEADER_LEN..]);
    let payload_sha: [u8; 32] = Sha256::digest(&writer.buffer[HEADER_LEN..]).into();
    writer.patch_u32(crc_offset, payload_crc);
    writer.buffer[sha_offset..sha_offset + 32].copy_from_slice(&payload_sha);

    writer.into_bytes()
}

fn encode_signature(writer: &mut ByteWriter, sig: &Signature) {
    writer.emit_u32(sig.params.len() as u32);
    for &ty in &sig.params {
        writer.emit_u8(type_tag(ty));
    }
    writer.emit_u8(sig.ret.map_or(0, type_tag));
}

fn encode_function(writer: &mut ByteWriter, func: &Function, ctx: &Context) {
    writer.emit_str(&ctx.resolve(func.name));
    encode_signature(writer, &func.sig);
    writer.emit_u32(if func.is_teardown { FLAG_TEARDOWN } else { 0 });
    writer.emit_u32(func.entry.0);

    writer.emit_u32(func.reg_types.len() as u32);
    for &ty in &func.reg_types {
        writer.emit_u8(type_tag(ty));
    }

    writer.emit_u32(func.blocks.len() as u32);
    for block in &func.blocks {
        writer.emit_u32(block.instrs.len() as u32);
        for instr in &block.instrs {
            encode_instr(writer, instr, ctx);
        }
        encode_terminator(writer, &block.terminator);
    }
}

fn encode_instr(writer: &mut ByteWriter, instr: &Instr, ctx: &Context) {
    match instr {
        Instr::Const { dest, ty, value } => {
            writer.emit_u8(1);
            writer.emit_u32(dest.0);
            writer.emit_u8(type_tag(*ty));
            writer.emit_i64(*value);
        }
        Instr::Iadd { dest, lhs, rhs } => encode_binop(writer, 2, *dest, *lhs, *rhs),
        Instr::Isub { dest, lhs, rhs } => encode_binop(writer, 3, *dest, *lhs, *rhs),
        Instr::Imul { dest, lhs, rhs } => encode_binop(writer, 4, *dest, *lhs, *rhs),
        Instr::Icmp { dest, cc, lhs, rhs } => {
            writer.emit_u8(5);
            writer.emit_u32(dest.0);
            writer.emit_u8(*cc as u8);
            writer.emit_u32(lhs.0);
            writer.emit_u32(rhs.0);
        }
        Instr::Call { dest, callee, args } => {
            writer.emit_u8(6);
            match dest {
                Some(dest) => {
                    writer.emit_u8(1);
                    writer.emit_u32(dest.0);
                }
                None => writer.emit_u8(0),
            }
            writer.emit_str(&ctx.resolve(*callee));
            writer.emit_u32(args.len() as u32);
            for arg in args {
                writer.emit_u32(arg.0);
            }
        }
        Instr::DataAddr { dest, name } => {
            writer.emit_u8(7);
            writer.emit_u32(dest.0);
            writer.emit_str(&ctx.resolve(*name));
        }
    }
}

fn encode_binop(writer: &mut ByteWriter, tag: u8, dest: Reg, lhs: Reg, rhs: Reg) {
    writer.emit_u8(tag);
    writer.emit_u32(dest.0);
    writer.emit_u32(lhs.0);
    writer.emit_u32(rhs.0);
}

fn encode_terminator(writer: &mut ByteWriter, term: &Terminator) {
    match term {
        Terminator::None => writer.emit_u8(0),
        Terminator::Ret(None) => writer.emit_u8(1),
        Terminator::Ret(Some(reg)) => {
            writer.emit_u8(2);
            writer.emit_u32(reg.0);
        }
        Terminator::Jmp(target) => {
            writer.emit_u8(3);
            writer.emit_u32(target.0);
        }
        Terminator::Br {
            cond,
            then_block,
            else_block,
        } => {
            writer.emit_u8(4);
            writer.emit_u32(cond.0);
            writer.emit_u32(then_block.0);
            writer.emit_u32(else_block.0);
        }
    }
}

fn type_tag(ty: IrType) -> u8 {
    match ty {
        IrType::I32 => 1,
        IrType::I64 => 2,
        IrType::Ptr => 3,
    }
}

// ===== Decoding =====

/// Decode container bytes into a module bound to `ctx`.
pub fn decode_module(bytes: &[u8], ctx: &Context) -> Result<Module, ContainerError> {
    let mut reader = ByteReader::new(bytes);

    let magic: [u8; 4] = reader.read_bytes(4)?.try_into().unwrap();
    if magic != MAGIC {
        return Err(ContainerError::InvalidMagic(magic));
    }

    let version = reader.read_u32()?;
    if version != VERSION {
        return Err(ContainerError::UnsupportedVersion(version));
    }

    let _flags = reader.read_u32()?;
    let stored_crc = reader.read_u32()?;
    let stored_sha = reader.read_bytes(32)?;

    let payload = bytes
        .get(HEADER_LEN..)
        .ok_or(DecodeError::UnexpectedEnd(bytes.len()))?;
    let actual_crc = crc32fast::hash(payload);
    if stored_crc != actual_crc {
        return Err(ContainerError::ChecksumMismatch {
            expected: stored_crc,
            actual: actual_crc,
        });
    }
    if Sha256::digest(payload).as_slice() != stored_sha {
        return Err(ContainerError::DigestMismatch);
    }

    let name = ctx.intern(reader.read_str()?);
    let mut module = Module::new(name);

    let extern_count = reader.read_u32()? as usize;
    for _ in 0..extern_count {
        let name = ctx.intern(reader.read_str()?);
        let sig = decode_signature(&mut reader)?;
        module.externs.push(ExternDecl { name, sig });
    }

    let data_count = reader.read_u32()? as usize;
    for _ in 0..data_count {
        let name = ctx.intern(reader.read_str()?);
        let len = reader.read_u32()? as usize;
        let bytes = reader.read_bytes(len)?.to_vec();
        module.data.push(DataDef { name, bytes });
    }

    let func_count = reader.read_u32()? as usize;
    for _ in 0..func_count {
        module.funcs.push(decode_function(&mut reader, ctx)?);
    }

    Ok(module)
}

fn decode_signature(reader: &mut ByteReader<'_>) -> Result<Signature, ContainerError> {
    let param_count = reader.read_u32()? as usize;
    let mut params = Vec::with_capacity(param_count);
    for _ in 0..param_count {
        params.push(decode_type(reader)?);
    }

    let at = reader.offset();
    let ret = match reader.read_u8()? {
        0 => None,
        tag => Some(type_from_tag(tag, at)?),
    };
    Ok(Signature::new(params, ret))
}

fn decode_function(reader: &mut ByteReader<'_>, ctx: &Context) -> Result<Function, ContainerError> {
    let name = ctx.intern(reader.read_str()?);
    let sig = decode_signature(reader)?;
    let flags = reader.read_u32()?;
    let entry = BlockId(reader.read_u32()?);

    let reg_count = reader.read_u32()? as usize;
    let mut reg_types = Vec::with_capacity(reg_count);
    for _ in 0..reg_count {
        reg_types.push(decode_type(reader)?);
    }

    let block_count = reader.read_u32()? as usize;
    let mut blocks = Vec::with_capacity(block_count);
    for index in 0..block_count {
        let instr_count = reader.read_u32()? as usize;
        let mut instrs = Vec::with_capacity(instr_count);
        for _ in 0..instr_count {
            instrs.push(decode_instr(reader, ctx)?);
        }
        let terminator = decode_terminator(reader)?;
        blocks.push(Block {
            id: BlockId(index as u32),
            instrs,
            terminator,
        });
    }

    Ok(Function {
        name,
        sig,
        is_teardown: flags & FLAG_TEARDOWN != 0,
        entry,
        blocks,
        reg_types,
    })
}

fn decode_instr(reader: &mut ByteReader<'_>, ctx: &Context) -> Result<Instr, ContainerError> {
    let at = reader.offset();
    let instr = match reader.read_u8()? {
        1 => {
            let dest = Reg(reader.read_u32()?);
            let ty = decode_type(reader)?;
            let value = reader.read_i64()?;
            Instr::Const { dest, ty, value }
        }
        2 => {
            let (dest, lhs, rhs) = decode_binop(reader)?;
            Instr::Iadd { dest, lhs, rhs }
        }
        3 => {
            let (dest, lhs, rhs) = decode_binop(reader)?;
            Instr::Isub { dest, lhs, rhs }
        }
        4 => {
            let (dest, lhs, rhs) = decode_binop(reader)?;
            Instr::Imul { dest, lhs, rhs }
        }
        5 => {
            let dest = Reg(reader.read_u32()?);
            let cc_at = reader.offset();
            let cc = match reader.read_u8()? {
                0 => CondCode::Eq,
                1 => CondCode::Ne,
                2 => CondCode::Lt,
                3 => CondCode::Le,
                4 => CondCode::Gt,
                5 => CondCode::Ge,
                tag => return Err(DecodeError::InvalidTag(tag, cc_at).into()),
            };
            let lhs = Reg(reader.read_u32()?);
            let rhs = Reg(reader.read_u32()?);
            Instr::Icmp { dest, cc, lhs, rhs }
        }
        6 => {
            let dest = match reader.read_u8()? {
                0 => None,
                _ => Some(Reg(reader.read_u32()?)),
            };
            let callee = ctx.intern(reader.read_str()?);
            let arg_count = reader.read_u32()? as usize;
            let mut args = Vec::with_capacity(arg_count);
            for _ in 0..arg_count {
                args.push(Reg(reader.read_u32()?));
            }
            Instr::Call { dest, callee, args }
        }
        7 => {
            let dest = Reg(reader.read_u32()?);
            let name = ctx.intern(reader.read_str()?);
            Instr::DataAddr { dest, name }
        }
        tag => return Err(DecodeError::InvalidTag(tag, at).into()),
    };
    Ok(instr)
}

fn decode_binop(reader: &mut ByteReader<'_>) -> Result<(Reg, Reg, Reg), ContainerError> {
    Ok((
        Reg(reader.read_u32()?),
        Reg(reader.read_u32()?),
        Reg(reader.read_u32()?),
    ))
}

fn decode_terminator(reader: &mut ByteReader<'_>) -> Result<Terminator, ContainerError> {
    let at = reader.offset();
    let term = match reader.read_u8()? {
        0 => Terminator::None,
        1 => Terminator::Ret(None),
        2 => Terminator::Ret(Some(Reg(reader.read_u32()?))),
        3 => Terminator::Jmp(BlockId(reader.read_u32()?)),
        4 => Terminator::Br {
            cond: Reg(reader.read_u32()?),
            then_block: BlockId(reader.read_u32()?),
            else_block: BlockId(reader.read_u32()?),
        },
        tag => return Err(DecodeError::InvalidTag(tag, at).into()),
    };
    Ok(term)
}

fn decode_type(reader: &mut ByteReader<'_>) -> Result<IrType, ContainerError> {
    let at = reader.offset();
    let tag = reader.read_u8()?;
    type_from_tag(tag, at)
}

fn type_from_tag(tag: u8, at: usize) -> Result<IrType, ContainerError> {
    match tag {
        1 => Ok(IrType::I32),
        2 => Ok(IrType::I64),
        3 => Ok(IrType::Ptr),
        _ => Err(DecodeError::InvalidTag(tag, at).into()),
    }
}
