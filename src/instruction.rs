use serde::Serialize;
use tracing::trace;

/// c0 VM opcodes emitted by the analyzer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Opcode {
    Bipush = 0x01,
    Ipush = 0x02,
    Pop = 0x04,
    Popn = 0x06,
    Loada = 0x0a,
    Snew = 0x0c,
    Iload = 0x10,
    Istore = 0x20,
    Iadd = 0x30,
    Isub = 0x34,
    Imul = 0x38,
    Idiv = 0x3c,
    Ineg = 0x40,
    Icmp = 0x44,
    Jmp = 0x70,
    Je = 0x71,
    Jne = 0x72,
    Jl = 0x73,
    Jge = 0x74,
    Jg = 0x75,
    Jle = 0x76,
    Call = 0x80,
    Ret = 0x88,
    Iret = 0x89,
    Iprint = 0xa0,
    Cprint = 0xa2,
    Printl = 0xaf,
    Iscan = 0xb0,
    /// Separates instruction runs; never serialized.
    Boundary = 0xff,
}

const ALL: [Opcode; 28] = [
    Opcode::Bipush,
    Opcode::Ipush,
    Opcode::Pop,
    Opcode::Popn,
    Opcode::Loada,
    Opcode::Snew,
    Opcode::Iload,
    Opcode::Istore,
    Opcode::Iadd,
    Opcode::Isub,
    Opcode::Imul,
    Opcode::Idiv,
    Opcode::Ineg,
    Opcode::Icmp,
    Opcode::Jmp,
    Opcode::Je,
    Opcode::Jne,
    Opcode::Jl,
    Opcode::Jge,
    Opcode::Jg,
    Opcode::Jle,
    Opcode::Call,
    Opcode::Ret,
    Opcode::Iret,
    Opcode::Iprint,
    Opcode::Cprint,
    Opcode::Printl,
    Opcode::Iscan,
];

impl Opcode {
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Decodes a serialized opcode. The boundary sentinel has no encoding.
    pub fn from_byte(v: u8) -> Option<Self> {
        ALL.iter().copied().find(|op| op.byte() == v)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Bipush => "bipush",
            Opcode::Ipush => "ipush",
            Opcode::Pop => "pop",
            Opcode::Popn => "popn",
            Opcode::Loada => "loada",
            Opcode::Snew => "snew",
            Opcode::Iload => "iload",
            Opcode::Istore => "istore",
            Opcode::Iadd => "iadd",
            Opcode::Isub => "isub",
            Opcode::Imul => "imul",
            Opcode::Idiv => "idiv",
            Opcode::Ineg => "ineg",
            Opcode::Icmp => "icmp",
            Opcode::Jmp => "jmp",
            Opcode::Je => "je",
            Opcode::Jne => "jne",
            Opcode::Jl => "jl",
            Opcode::Jge => "jge",
            Opcode::Jg => "jg",
            Opcode::Jle => "jle",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::Iret => "iret",
            Opcode::Iprint => "iprint",
            Opcode::Cprint => "cprint",
            Opcode::Printl => "printl",
            Opcode::Iscan => "iscan",
            Opcode::Boundary => "boundary",
        }
    }

    /// Byte width of each operand, in order.
    pub fn operand_widths(self) -> &'static [usize] {
        match self {
            Opcode::Bipush => &[1],
            Opcode::Ipush | Opcode::Popn | Opcode::Snew => &[4],
            Opcode::Loada => &[2, 4],
            Opcode::Jmp
            | Opcode::Je
            | Opcode::Jne
            | Opcode::Jl
            | Opcode::Jge
            | Opcode::Jg
            | Opcode::Jle
            | Opcode::Call => &[2],
            _ => &[],
        }
    }

    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jmp
                | Opcode::Je
                | Opcode::Jne
                | Opcode::Jl
                | Opcode::Jge
                | Opcode::Jg
                | Opcode::Jle
        )
    }

    pub fn is_return(self) -> bool {
        matches!(self, Opcode::Ret | Opcode::Iret)
    }

    /// Serialized size of the instruction including operands.
    pub fn encoded_len(self) -> usize {
        1 + self.operand_widths().iter().sum::<usize>()
    }
}

/// Big-endian two's complement of `value`, truncated to `width` bytes.
pub fn encode_be(value: i64, width: usize) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let width = width.min(bytes.len());
    bytes[bytes.len() - width..].to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<i32>,
    /// Opcode byte followed by the encoded operands. Empty for the
    /// boundary sentinel.
    #[serde(skip)]
    pub binary: Vec<u8>,
    /// Position inside the owning run, counted from zero.
    pub offset: u32,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<i32>, offset: u32) -> Self {
        let mut binary = Vec::with_capacity(opcode.encoded_len());
        if opcode != Opcode::Boundary {
            binary.push(opcode.byte());
            for (value, width) in operands.iter().zip(opcode.operand_widths()) {
                binary.extend(encode_be(i64::from(*value), *width));
            }
        }
        Self {
            opcode,
            operands,
            binary,
            offset,
        }
    }

    /// A jump without its target yet.
    pub fn is_pending(&self) -> bool {
        self.opcode.is_jump() && self.operands.is_empty()
    }

    fn resolve(&mut self, target: u32) {
        self.operands.push(target as i32);
        self.binary.extend(encode_be(i64::from(target), 2));
    }
}

/// Refers to a jump emitted without a target. Must be patched exactly once.
#[must_use = "a pending jump has to be patched"]
#[derive(Debug, PartialEq, Eq)]
pub struct PatchHandle(usize);

/// The instruction list being emitted, with per-run offsets.
#[derive(Debug, Clone, Default)]
pub struct CodeBuffer {
    instructions: Vec<Instruction>,
    next_offset: u32,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, opcode: Opcode, operands: &[i32]) -> u32 {
        debug_assert_eq!(
            operands.len(),
            opcode.operand_widths().len(),
            "operand count for {}",
            opcode.mnemonic()
        );
        let offset = self.next_offset;
        self.instructions
            .push(Instruction::new(opcode, operands.to_vec(), offset));
        self.next_offset += 1;
        offset
    }

    /// Emits a jump whose target is filled in later through the handle.
    pub fn emit_jump(&mut self, opcode: Opcode) -> PatchHandle {
        debug_assert!(opcode.is_jump(), "{} is not a jump", opcode.mnemonic());
        let handle = PatchHandle(self.instructions.len());
        self.instructions
            .push(Instruction::new(opcode, Vec::new(), self.next_offset));
        self.next_offset += 1;
        handle
    }

    pub fn patch(&mut self, handle: PatchHandle, target: u32) {
        let instr = &mut self.instructions[handle.0];
        assert!(
            instr.is_pending(),
            "jump at offset {} is already resolved",
            instr.offset
        );
        trace!(offset = instr.offset, target, op = instr.opcode.mnemonic(), "patch jump");
        instr.resolve(target);
    }

    /// Closes the current run with a sentinel and restarts offsets at zero.
    /// Returns the index the next run starts at.
    pub fn begin_function(&mut self) -> usize {
        self.instructions
            .push(Instruction::new(Opcode::Boundary, Vec::new(), 0));
        self.next_offset = 0;
        self.instructions.len()
    }

    pub fn next_offset(&self) -> u32 {
        self.next_offset
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Instructions emitted since index `start`.
    pub fn since(&self, start: usize) -> &[Instruction] {
        self.instructions.get(start..).unwrap_or(&[])
    }

    pub fn finish(self) -> Vec<Instruction> {
        if let Some(pending) = self.instructions.iter().find(|i| i.is_pending()) {
            panic!(
                "unresolved {} at offset {}",
                pending.opcode.mnemonic(),
                pending.offset
            );
        }
        self.instructions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_be_truncates_twos_complement() {
        assert_eq!(encode_be(1, 4), vec![0, 0, 0, 1]);
        assert_eq!(encode_be(-1, 2), vec![0xff, 0xff]);
        assert_eq!(encode_be(0x1234, 2), vec![0x12, 0x34]);
        assert_eq!(encode_be(0x1_0002, 2), vec![0x00, 0x02]);
        assert_eq!(encode_be(32, 1), vec![0x20]);
    }

    #[test]
    fn instruction_binary_includes_all_operands() {
        let i = Instruction::new(Opcode::Loada, vec![1, 3], 0);
        assert_eq!(i.binary, vec![0x0a, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03]);
        assert_eq!(i.binary.len(), Opcode::Loada.encoded_len());
        assert!(Instruction::new(Opcode::Boundary, vec![], 0).binary.is_empty());
    }

    #[test]
    fn opcode_bytes_roundtrip_except_sentinel() {
        for op in ALL {
            assert_eq!(Opcode::from_byte(op.byte()), Some(op));
        }
        assert_eq!(Opcode::from_byte(0xff), None);
        assert_eq!(Opcode::from_byte(0x03), None);
    }

    #[test]
    fn jump_is_patched_through_its_handle() {
        let mut code = CodeBuffer::new();
        code.emit(Opcode::Ipush, &[0]);
        let h = code.emit_jump(Opcode::Je);
        code.emit(Opcode::Ipush, &[7]);
        let target = code.next_offset();
        code.patch(h, target);
        let out = code.finish();
        assert_eq!(out[1].operands, vec![3]);
        assert_eq!(out[1].binary, vec![0x71, 0x00, 0x03]);
    }

    #[test]
    fn offsets_restart_after_boundary() {
        let mut code = CodeBuffer::new();
        code.emit(Opcode::Ipush, &[1]);
        code.emit(Opcode::Ipush, &[2]);
        let entry = code.begin_function();
        assert_eq!(entry, 3);
        assert_eq!(code.emit(Opcode::Ret, &[]), 0);
        let out = code.finish();
        assert_eq!(out[2].opcode, Opcode::Boundary);
        assert_eq!(out[3].offset, 0);
    }

    #[test]
    #[should_panic(expected = "unresolved jmp")]
    fn finishing_with_pending_jump_panics() {
        let mut code = CodeBuffer::new();
        let _ = code.emit_jump(Opcode::Jmp);
        let _ = code.finish();
    }

    #[test]
    #[should_panic(expected = "already resolved")]
    fn patching_twice_panics() {
        let mut code = CodeBuffer::new();
        let h = code.emit_jump(Opcode::Jmp);
        let dup = PatchHandle(h.0);
        code.patch(h, 0);
        code.patch(dup, 1);
    }
}
