//! Byte-exact encoder
//!
//! Layout: header, prototypes children-first (each prefixed by its encoded
//! length), then a zero terminator. Prototype bodies are encoded into a
//! scratch buffer so the variable-length size prefix is known before it is
//! written.

use std::io::Write;

use crate::bytecode::{Bytecode, BytecodeVersion};
use crate::constant::{Constant, ConstantTable, NumberConstant, TableConstant};
use crate::error::{BytecodeError, Result};
use crate::instruction::{Instruction, OperandShape};
use crate::leb128::{uleb128_size, write_uleb128, write_uleb128_len};
use crate::operand::ProtoIndex;
use crate::prototype::{DebugInfo, Prototype, VarInfo};

/// Encode an image to bytes
pub fn encode(bytecode: &Bytecode) -> Result<Vec<u8>> {
    BytecodeWriter::new(bytecode).finish()
}

/// Encode an image and write it to `writer`
///
/// Nothing is written unless encoding succeeds as a whole.
pub fn write_to<W: Write>(bytecode: &Bytecode, writer: &mut W) -> Result<()> {
    let bytes = encode(bytecode)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Streaming encoder over one image
#[derive(Debug)]
pub struct BytecodeWriter<'a> {
    bytecode: &'a Bytecode,
    out: Vec<u8>,
}

impl<'a> BytecodeWriter<'a> {
    /// Create a writer for `bytecode`
    pub fn new(bytecode: &'a Bytecode) -> Self {
        Self {
            bytecode,
            out: Vec::new(),
        }
    }

    /// Encode the whole image
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let order = self.bytecode.emission_order()?;
        self.write_header()?;
        for index in order {
            self.write_prototype(index)?;
        }
        write_uleb128(&mut self.out, 0);

        tracing::debug!(
            target: "ljbc::encode",
            prototypes = self.bytecode.prototypes.len(),
            bytes = self.out.len(),
            "image encoded"
        );
        Ok(self.out)
    }

    fn write_header(&mut self) -> Result<()> {
        let header = &self.bytecode.header;
        if !header.is_consistent() {
            let (state, name) = if header.is_stripped() {
                ("stripped", "present")
            } else {
                ("not stripped", "missing")
            };
            return Err(BytecodeError::InconsistentHeader { state, name });
        }
        self.out.extend_from_slice(&header.version.magic());
        self.out.push(header.version.code());
        self.out.push(header.flags.bits());

        // An empty name still carries its zero length
        if let Some(name) = header.chunk_name.as_deref() {
            write_bytes(&mut self.out, name.as_bytes(), "chunk name bytes")?;
        }
        Ok(())
    }

    fn write_prototype(&mut self, index: ProtoIndex) -> Result<()> {
        let proto = &self.bytecode.prototypes[index.as_usize()];
        let body = self.encode_body(index, proto)?;
        let size = u32::try_from(body.len()).map_err(|_| BytecodeError::CountOverflow {
            what: "prototype bytes",
            count: body.len(),
        })?;
        self.out.reserve(uleb128_size(size) + body.len());
        write_uleb128(&mut self.out, size);
        self.out.extend_from_slice(&body);

        tracing::trace!(
            target: "ljbc::encode",
            proto = index.index(),
            bytes = body.len(),
            "prototype written"
        );
        Ok(())
    }

    fn encode_body(&self, index: ProtoIndex, proto: &Prototype) -> Result<Vec<u8>> {
        let stripped = self.bytecode.header.is_stripped();
        let debug = match (&proto.debug, stripped) {
            (Some(debug), false) => Some((debug, encode_debug(index, proto, debug)?)),
            (Some(_), true) => {
                tracing::debug!(
                    target: "ljbc::encode",
                    proto = index.index(),
                    "dropping debug info from stripped image"
                );
                None
            }
            (None, _) => None,
        };

        let mut body = Vec::new();
        body.push(proto.flags.bits());
        body.push(proto.param_count);
        body.push(proto.frame_size);
        let upvalue_count =
            u8::try_from(proto.upvalues.len()).map_err(|_| BytecodeError::CountOverflow {
                what: "upvalues",
                count: proto.upvalues.len(),
            })?;
        body.push(upvalue_count);
        write_count(&mut body, proto.constants.len(), "constants")?;
        write_count(&mut body, proto.number_constants.len(), "number constants")?;
        write_count(&mut body, proto.instructions.len(), "instructions")?;

        if !stripped {
            match &debug {
                Some((info, block)) => {
                    write_count(&mut body, block.len(), "debug bytes")?;
                    write_uleb128(&mut body, info.first_line);
                    write_uleb128(&mut body, info.line_count);
                }
                None => write_uleb128(&mut body, 0),
            }
        }

        let version = self.bytecode.header.version;
        for instruction in &proto.instructions {
            write_instruction(&mut body, instruction, version)?;
        }
        for slot in &proto.upvalues {
            body.extend_from_slice(&slot.to_le_bytes());
        }
        // Loader fills the pool from the top, so the wire order is reversed.
        for constant in proto.constants.iter().rev() {
            write_constant(&mut body, constant)?;
        }
        for number in &proto.number_constants {
            write_number(&mut body, number);
        }
        if let Some((_, block)) = debug {
            body.extend_from_slice(&block);
        }
        Ok(body)
    }
}

fn write_count(out: &mut Vec<u8>, count: usize, what: &'static str) -> Result<()> {
    write_uleb128_len(out, count).ok_or(BytecodeError::CountOverflow { what, count })
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8], what: &'static str) -> Result<()> {
    write_count(out, bytes.len(), what)?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn write_instruction(
    out: &mut Vec<u8>,
    instruction: &Instruction,
    version: BytecodeVersion,
) -> Result<()> {
    let opcode = instruction
        .op
        .encode_for(version)
        .ok_or(BytecodeError::UnsupportedOpcode {
            opcode: instruction.op.name(),
            version,
        })?;
    out.push(opcode);
    out.push(instruction.a);
    match instruction.shape() {
        OperandShape::Abc => {
            out.push(instruction.c);
            out.push(instruction.b);
        }
        OperandShape::Ad => out.extend_from_slice(&instruction.d.to_le_bytes()),
    }
    Ok(())
}

fn write_constant(out: &mut Vec<u8>, constant: &Constant) -> Result<()> {
    write_uleb128(out, constant.kind().tag());
    match constant {
        // Linked to the most recently written prototype by the loader.
        Constant::Child(_) => {}
        Constant::Table(table) => write_table(out, table)?,
        Constant::Wide { payload, .. } => out.extend_from_slice(&payload.to_le_bytes()),
        Constant::String(bytes) => write_bytes(out, bytes, "string constant bytes")?,
    }
    Ok(())
}

fn write_table(out: &mut Vec<u8>, table: &ConstantTable) -> Result<()> {
    write_count(out, table.array.len(), "table array entries")?;
    write_count(out, table.hash.len(), "table hash entries")?;
    for entry in &table.array {
        write_table_entry(out, entry)?;
    }
    for (key, value) in &table.hash {
        write_table_entry(out, key)?;
        write_table_entry(out, value)?;
    }
    Ok(())
}

fn write_table_entry(out: &mut Vec<u8>, entry: &TableConstant) -> Result<()> {
    out.push(entry.tag());
    match entry {
        TableConstant::Nil | TableConstant::False | TableConstant::True => {}
        TableConstant::Int(value) => out.extend_from_slice(&value.to_le_bytes()),
        TableConstant::Num(value) => out.extend_from_slice(&value.to_bits().to_le_bytes()),
        TableConstant::Str(bytes) => write_bytes(out, bytes, "table string bytes")?,
    }
    Ok(())
}

fn write_number(out: &mut Vec<u8>, number: &NumberConstant) {
    out.push(number.tag());
    match number {
        NumberConstant::Int(value) => out.extend_from_slice(&value.to_le_bytes()),
        NumberConstant::Num(value) => out.extend_from_slice(&value.to_bits().to_le_bytes()),
    }
}

fn encode_debug(index: ProtoIndex, proto: &Prototype, debug: &DebugInfo) -> Result<Vec<u8>> {
    if debug.line_map.len() != proto.instructions.len() {
        return Err(BytecodeError::LineMapMismatch {
            proto: index.index(),
            lines: debug.line_map.len(),
            instructions: proto.instructions.len(),
        });
    }

    let mut out = Vec::new();
    for line in &debug.line_map {
        write_uleb128(&mut out, *line);
    }
    for name in &debug.upvalue_names {
        write_bytes(&mut out, name.as_bytes(), "upvalue name bytes")?;
    }
    for var in &debug.variables {
        write_uleb128(&mut out, var.tag());
        if let VarInfo::Named {
            name,
            is_parameter,
            scope_begin,
            scope_end,
        } = var
        {
            write_bytes(&mut out, name.as_bytes(), "variable name bytes")?;
            out.push(u8::from(*is_parameter));
            write_uleb128(&mut out, *scope_begin);
            write_uleb128(&mut out, *scope_end);
        }
    }
    write_uleb128(&mut out, VarInfo::END_TAG);
    Ok(out)
}
