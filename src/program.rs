use crate::instruction::{Instruction, Opcode};
use serde::Serialize;

/// Function table entries always sit one level below the global frame.
pub const FUNCTION_LEVEL: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConstantKind {
    String,
}

impl ConstantKind {
    /// Tag used by the assembly text form.
    pub fn tag(self) -> char {
        match self {
            ConstantKind::String => 'S',
        }
    }

    /// Tag byte used by the binary object form.
    pub fn byte(self) -> u8 {
        match self {
            ConstantKind::String => 0x00,
        }
    }

    pub fn from_byte(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(ConstantKind::String),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Constant {
    pub kind: ConstantKind,
    pub value: String,
}

impl Constant {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            kind: ConstantKind::String,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionEntry {
    pub name_index: u16,
    pub param_count: u16,
    pub level: u16,
    /// Index of the first instruction of the function in `Program::instructions`.
    pub entry: usize,
}

/// Result of a successful analysis.
///
/// `instructions` holds the global-initializer run followed by one run per
/// function, each function run preceded by an `Opcode::Boundary` sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub functions: Vec<FunctionEntry>,
}

impl Program {
    /// The start run followed by every function run, sentinels removed.
    pub fn runs(&self) -> Vec<&[Instruction]> {
        self.instructions
            .split(|i| i.opcode == Opcode::Boundary)
            .collect()
    }

    pub fn start(&self) -> &[Instruction] {
        self.runs().first().copied().unwrap_or(&[])
    }

    pub fn function_code(&self, index: usize) -> Option<&[Instruction]> {
        self.runs().get(index + 1).copied()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        Program {
            instructions: vec![
                Instruction::new(Opcode::Ipush, vec![3], 0),
                Instruction::new(Opcode::Boundary, vec![], 0),
                Instruction::new(Opcode::Ret, vec![], 0),
                Instruction::new(Opcode::Boundary, vec![], 0),
                Instruction::new(Opcode::Ipush, vec![0], 0),
                Instruction::new(Opcode::Iret, vec![], 1),
            ],
            constants: vec![Constant::string("f"), Constant::string("main")],
            functions: vec![
                FunctionEntry {
                    name_index: 0,
                    param_count: 0,
                    level: FUNCTION_LEVEL,
                    entry: 2,
                },
                FunctionEntry {
                    name_index: 1,
                    param_count: 0,
                    level: FUNCTION_LEVEL,
                    entry: 4,
                },
            ],
        }
    }

    #[test]
    fn runs_split_at_sentinels() {
        let p = sample();
        assert_eq!(p.runs().len(), 3);
        assert_eq!(p.start().len(), 1);
        assert_eq!(p.function_code(1).map(|c| c.len()), Some(2));
        assert!(p.function_code(2).is_none());
    }

    #[test]
    fn json_dump_names_opcodes() {
        let json = sample().to_json().expect("json");
        assert!(json.contains("\"Iret\""));
        assert!(json.contains("\"main\""));
        assert!(!json.contains("binary"));
    }
}
