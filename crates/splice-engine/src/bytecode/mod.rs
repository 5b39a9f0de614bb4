//! Binary module container (`.sbc`): encoding, decoding, and file I/O.

pub mod container;
pub mod encoder;

pub use container::{decode_module, encode_module, ContainerError, MAGIC, VERSION};
pub use encoder::{ByteReader, ByteWriter, DecodeError};

use std::fs;
use std::path::Path;

use crate::context::Context;
use crate::error::EngineError;
use crate::ir::Module;

/// Read and decode a container file into a module bound to `ctx`.
///
/// A file that cannot be read and a file that cannot be decoded are distinct
/// failures ([`EngineError::Io`] vs [`EngineError::Container`]).
pub fn load_module(path: &Path, ctx: &Context) -> Result<Module, EngineError> {
    let bytes = fs::read(path).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(decode_module(&bytes, ctx)?)
}

/// Encode a module and write it to `path`.
pub fn save_module(path: &Path, module: &Module, ctx: &Context) -> Result<(), EngineError> {
    let bytes = encode_module(module, ctx);
    fs::write(path, bytes).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })
}
