use crate::instruction::{Instruction, Opcode};
use crate::program::{Constant, ConstantKind, Program};
use thiserror::Error;
use tracing::debug;

/// `C0:)` followed by version 1.
pub const MAGIC: [u8; 4] = [0x43, 0x30, 0x3a, 0x29];
pub const VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("unexpected end of object file")]
    UnexpectedEof,
    #[error("bad magic number")]
    BadMagic,
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid utf8 in constant {0}")]
    InvalidUtf8(usize),
    #[error("unknown constant tag 0x{0:02x}")]
    UnknownConstant(u8),
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("{what} count {count} does not fit in u16")]
    TooLarge { what: &'static str, count: usize },
    #[error("instruction offsets of run {run} are not consecutive")]
    InconsistentOffsets { run: usize },
    #[error("program has {runs} function runs but {entries} function entries")]
    FunctionCountMismatch { runs: usize, entries: usize },
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFunction {
    pub name_index: u16,
    pub param_count: u16,
    pub level: u16,
    pub code: Vec<Instruction>,
}

/// A program laid out the way the c0 VM loads it: constants, the start
/// run and one code run per function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectModule {
    pub constants: Vec<Constant>,
    pub start: Vec<Instruction>,
    pub functions: Vec<ObjectFunction>,
}

impl ObjectModule {
    pub fn from_program(program: &Program) -> Result<Self, ObjectError> {
        let runs = program.runs();
        for (run, code) in runs.iter().enumerate() {
            let consecutive = code
                .iter()
                .enumerate()
                .all(|(i, instr)| instr.offset as usize == i);
            if !consecutive {
                return Err(ObjectError::InconsistentOffsets { run });
            }
        }
        let start = runs.first().copied().unwrap_or(&[]);
        let bodies = runs.get(1..).unwrap_or(&[]);
        if bodies.len() != program.functions.len() {
            return Err(ObjectError::FunctionCountMismatch {
                runs: bodies.len(),
                entries: program.functions.len(),
            });
        }
        let functions = program
            .functions
            .iter()
            .zip(bodies)
            .map(|(f, code)| ObjectFunction {
                name_index: f.name_index,
                param_count: f.param_count,
                level: f.level,
                code: code.to_vec(),
            })
            .collect();
        Ok(Self {
            constants: program.constants.clone(),
            start: start.to_vec(),
            functions,
        })
    }

    pub fn function_name(&self, index: usize) -> Option<&str> {
        let f = self.functions.get(index)?;
        self.constants
            .get(f.name_index as usize)
            .map(|c| c.value.as_str())
    }

    /// Index of the function whose name constant equals `name`.
    pub fn find_function(&self, name: &str) -> Option<usize> {
        (0..self.functions.len()).find(|&i| self.function_name(i) == Some(name))
    }
}

pub fn encode(module: &ObjectModule) -> Result<Vec<u8>, ObjectError> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    write_u32_be(&mut out, VERSION);

    write_count(&mut out, "constant", module.constants.len())?;
    for c in &module.constants {
        out.push(c.kind.byte());
        write_count(&mut out, "constant length", c.value.len())?;
        out.extend_from_slice(c.value.as_bytes());
    }

    write_code(&mut out, &module.start)?;

    write_count(&mut out, "function", module.functions.len())?;
    for f in &module.functions {
        write_u16_be(&mut out, f.name_index);
        write_u16_be(&mut out, f.param_count);
        write_u16_be(&mut out, f.level);
        write_code(&mut out, &f.code)?;
    }
    debug!(
        bytes = out.len(),
        functions = module.functions.len(),
        "encoded object"
    );
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<ObjectModule, ObjectError> {
    let mut i = 0usize;
    if read_bytes(bytes, &mut i, MAGIC.len())? != MAGIC {
        return Err(ObjectError::BadMagic);
    }
    let version = read_u32_be(bytes, &mut i)?;
    if version != VERSION {
        return Err(ObjectError::UnsupportedVersion(version));
    }

    let count = read_u16_be(bytes, &mut i)? as usize;
    let mut constants = Vec::with_capacity(count);
    for idx in 0..count {
        let tag = read_u8(bytes, &mut i)?;
        let kind = ConstantKind::from_byte(tag).ok_or(ObjectError::UnknownConstant(tag))?;
        let len = read_u16_be(bytes, &mut i)? as usize;
        let raw = read_bytes(bytes, &mut i, len)?;
        let value = std::str::from_utf8(raw)
            .map_err(|_| ObjectError::InvalidUtf8(idx))?
            .to_string();
        constants.push(Constant { kind, value });
    }

    let start = read_code(bytes, &mut i)?;

    let count = read_u16_be(bytes, &mut i)? as usize;
    let mut functions = Vec::with_capacity(count);
    for _ in 0..count {
        let name_index = read_u16_be(bytes, &mut i)?;
        let param_count = read_u16_be(bytes, &mut i)?;
        let level = read_u16_be(bytes, &mut i)?;
        let code = read_code(bytes, &mut i)?;
        functions.push(ObjectFunction {
            name_index,
            param_count,
            level,
            code,
        });
    }

    if i != bytes.len() {
        return Err(ObjectError::TrailingBytes(bytes.len() - i));
    }
    debug!(bytes = bytes.len(), functions = functions.len(), "decoded object");
    Ok(ObjectModule {
        constants,
        start,
        functions,
    })
}

fn write_code(out: &mut Vec<u8>, code: &[Instruction]) -> Result<(), ObjectError> {
    write_count(out, "instruction", code.len())?;
    for instr in code {
        out.extend_from_slice(&instr.binary);
    }
    Ok(())
}

fn read_code(bytes: &[u8], i: &mut usize) -> Result<Vec<Instruction>, ObjectError> {
    let count = read_u16_be(bytes, i)? as usize;
    let mut code = Vec::with_capacity(count);
    for offset in 0..count {
        let byte = read_u8(bytes, i)?;
        let opcode = Opcode::from_byte(byte).ok_or(ObjectError::UnknownOpcode(byte))?;
        let mut operands = Vec::with_capacity(opcode.operand_widths().len());
        for width in opcode.operand_widths() {
            operands.push(read_operand(bytes, i, *width)?);
        }
        code.push(Instruction::new(opcode, operands, offset as u32));
    }
    Ok(code)
}

/// One- and two-byte operands are unsigned, four-byte operands signed.
fn read_operand(bytes: &[u8], i: &mut usize, width: usize) -> Result<i32, ObjectError> {
    let raw = read_bytes(bytes, i, width)?;
    let value = match width {
        1 => i32::from(raw[0]),
        2 => i32::from(u16::from_be_bytes([raw[0], raw[1]])),
        _ => i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
    };
    Ok(value)
}

fn write_count(out: &mut Vec<u8>, what: &'static str, count: usize) -> Result<(), ObjectError> {
    let v = u16::try_from(count).map_err(|_| ObjectError::TooLarge { what, count })?;
    write_u16_be(out, v);
    Ok(())
}

pub fn write_u16_be(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn write_u32_be(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn read_u8(bytes: &[u8], i: &mut usize) -> Result<u8, ObjectError> {
    Ok(read_bytes(bytes, i, 1)?[0])
}

pub fn read_u16_be(bytes: &[u8], i: &mut usize) -> Result<u16, ObjectError> {
    let b = read_bytes(bytes, i, 2)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

pub fn read_u32_be(bytes: &[u8], i: &mut usize) -> Result<u32, ObjectError> {
    let b = read_bytes(bytes, i, 4)?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_bytes<'a>(bytes: &'a [u8], i: &mut usize, len: usize) -> Result<&'a [u8], ObjectError> {
    if *i + len > bytes.len() {
        return Err(ObjectError::UnexpectedEof);
    }
    let out = &bytes[*i..*i + len];
    *i += len;
    Ok(out)
}
