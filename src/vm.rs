use crate::assembly;
use crate::instruction::{Instruction, Opcode};
use crate::object::{decode, ObjectError, ObjectModule};
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use thiserror::Error;
use tracing::{debug, trace};

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error("no main function")]
    NoMain,
    #[error("unknown function index {0}")]
    UnknownFunction(usize),
    #[error("invalid jump address {target} in '{func}'")]
    InvalidJumpAddress { func: String, target: usize },
    #[error("control reached the end of '{0}' without a return")]
    MissingReturn(String),
    #[error("stack underflow")]
    StackUnderflow,
    #[error("call depth exceeds {0}")]
    StackOverflow(usize),
    #[error("invalid address {0}")]
    InvalidAddress(i64),
    #[error("invalid level difference {0}")]
    InvalidLevel(i32),
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid integer input '{0}'")]
    InvalidInput(String),
    #[error("input exhausted")]
    InputExhausted,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    /// `None` for the global frame running the start code.
    function: Option<usize>,
    pc: usize,
    base: usize,
    level: u16,
}

/// Stack machine executing an [`ObjectModule`].
pub struct Vm<'m, R, W> {
    module: &'m ObjectModule,
    stack: Vec<i32>,
    frames: Vec<Frame>,
    input: R,
    output: W,
    pending_input: VecDeque<String>,
    max_call_depth: usize,
}

impl<'m, R: BufRead, W: Write> Vm<'m, R, W> {
    pub fn new(module: &'m ObjectModule, input: R, output: W) -> Self {
        Self {
            module,
            stack: Vec::new(),
            frames: Vec::new(),
            input,
            output,
            pending_input: VecDeque::new(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Runs the start code in the global frame, then `main`.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        let main = self.module.find_function("main").ok_or(RuntimeError::NoMain)?;
        debug!(main, functions = self.module.functions.len(), "vm start");
        self.stack.clear();
        self.frames.clear();
        self.frames.push(Frame {
            function: None,
            pc: 0,
            base: 0,
            level: 0,
        });
        let mut entered_main = false;

        loop {
            let Some(frame) = self.frames.last().copied() else {
                break;
            };
            let code = self.code(frame.function)?;
            let Some(instr) = code.get(frame.pc) else {
                match frame.function {
                    None if !entered_main => {
                        entered_main = true;
                        self.call(main)?;
                        continue;
                    }
                    None => break,
                    Some(f) => return Err(RuntimeError::MissingReturn(self.name(f))),
                }
            };
            if let Some(top) = self.frames.last_mut() {
                top.pc += 1;
            }
            self.execute(instr, code.len())?;
        }
        self.output.flush()?;
        Ok(())
    }

    fn execute(&mut self, instr: &Instruction, code_len: usize) -> Result<(), RuntimeError> {
        let a = instr.operands.first().copied().unwrap_or(0);
        let b = instr.operands.get(1).copied().unwrap_or(0);
        match instr.opcode {
            Opcode::Bipush | Opcode::Ipush => self.stack.push(a),
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Popn => {
                for _ in 0..a {
                    self.pop()?;
                }
            }
            Opcode::Loada => {
                let base = self.frame_base(a)?;
                let addr = base as i64 + i64::from(b);
                self.stack.push(addr as i32);
            }
            Opcode::Snew => self.stack.extend(std::iter::repeat(0).take(a.max(0) as usize)),
            Opcode::Iload => {
                let addr = self.address()?;
                self.stack.push(self.stack[addr]);
            }
            Opcode::Istore => {
                let value = self.pop()?;
                let addr = self.address()?;
                self.stack[addr] = value;
            }
            Opcode::Iadd | Opcode::Isub | Opcode::Imul | Opcode::Idiv => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let out = match instr.opcode {
                    Opcode::Iadd => lhs.wrapping_add(rhs),
                    Opcode::Isub => lhs.wrapping_sub(rhs),
                    Opcode::Imul => lhs.wrapping_mul(rhs),
                    _ => {
                        if rhs == 0 {
                            return Err(RuntimeError::DivisionByZero);
                        }
                        lhs.wrapping_div(rhs)
                    }
                };
                self.stack.push(out);
            }
            Opcode::Ineg => {
                let v = self.pop()?;
                self.stack.push(v.wrapping_neg());
            }
            Opcode::Icmp => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.stack.push(lhs.cmp(&rhs) as i32);
            }
            Opcode::Jmp => self.jump(a, code_len)?,
            Opcode::Je | Opcode::Jne | Opcode::Jl | Opcode::Jge | Opcode::Jg | Opcode::Jle => {
                let v = self.pop()?;
                let taken = match instr.opcode {
                    Opcode::Je => v == 0,
                    Opcode::Jne => v != 0,
                    Opcode::Jl => v < 0,
                    Opcode::Jge => v >= 0,
                    Opcode::Jg => v > 0,
                    _ => v <= 0,
                };
                if taken {
                    self.jump(a, code_len)?;
                }
            }
            Opcode::Call => self.call(a as usize)?,
            Opcode::Ret => {
                self.leave()?;
            }
            Opcode::Iret => {
                let v = self.pop()?;
                self.leave()?;
                self.stack.push(v);
            }
            Opcode::Iprint => {
                let v = self.pop()?;
                write!(self.output, "{}", v)?;
            }
            Opcode::Cprint => {
                let v = self.pop()?;
                let c = char::from_u32(v as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
                write!(self.output, "{}", c)?;
            }
            Opcode::Printl => writeln!(self.output)?,
            Opcode::Iscan => {
                let word = self.next_word()?;
                let v = word
                    .parse::<i32>()
                    .map_err(|_| RuntimeError::InvalidInput(word))?;
                self.stack.push(v);
            }
            Opcode::Boundary => {}
        }
        Ok(())
    }

    fn call(&mut self, index: usize) -> Result<(), RuntimeError> {
        let f = self
            .module
            .functions
            .get(index)
            .ok_or(RuntimeError::UnknownFunction(index))?;
        if self.frames.len() > self.max_call_depth {
            return Err(RuntimeError::StackOverflow(self.max_call_depth));
        }
        let params = f.param_count as usize;
        let base = self
            .stack
            .len()
            .checked_sub(params)
            .ok_or(RuntimeError::StackUnderflow)?;
        trace!(function = index, base, depth = self.frames.len(), "call");
        self.frames.push(Frame {
            function: Some(index),
            pc: 0,
            base,
            level: f.level,
        });
        Ok(())
    }

    fn leave(&mut self) -> Result<(), RuntimeError> {
        let frame = self.frames.pop().ok_or(RuntimeError::StackUnderflow)?;
        trace!(function = ?frame.function, "return");
        self.stack.truncate(frame.base);
        Ok(())
    }

    fn jump(&mut self, target: i32, code_len: usize) -> Result<(), RuntimeError> {
        let target = target as usize;
        let frame = self.frames.last().copied().ok_or(RuntimeError::StackUnderflow)?;
        if target > code_len {
            let func = match frame.function {
                Some(f) => self.name(f),
                None => ".start".to_string(),
            };
            return Err(RuntimeError::InvalidJumpAddress { func, target });
        }
        if let Some(top) = self.frames.last_mut() {
            top.pc = target;
        }
        Ok(())
    }

    /// Base of the frame `level_diff` static levels above the current one.
    fn frame_base(&self, level_diff: i32) -> Result<usize, RuntimeError> {
        let current = self.frames.last().ok_or(RuntimeError::StackUnderflow)?;
        let wanted = i32::from(current.level) - level_diff;
        if level_diff < 0 || wanted < 0 {
            return Err(RuntimeError::InvalidLevel(level_diff));
        }
        self.frames
            .iter()
            .rev()
            .find(|f| i32::from(f.level) == wanted)
            .map(|f| f.base)
            .ok_or(RuntimeError::InvalidLevel(level_diff))
    }

    fn address(&mut self) -> Result<usize, RuntimeError> {
        let addr = self.pop()?;
        if addr < 0 || addr as usize >= self.stack.len() {
            return Err(RuntimeError::InvalidAddress(i64::from(addr)));
        }
        Ok(addr as usize)
    }

    fn pop(&mut self) -> Result<i32, RuntimeError> {
        let floor = self.frames.last().map(|f| f.base).unwrap_or(0);
        if self.stack.len() <= floor {
            return Err(RuntimeError::StackUnderflow);
        }
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn next_word(&mut self) -> Result<String, RuntimeError> {
        loop {
            if let Some(word) = self.pending_input.pop_front() {
                return Ok(word);
            }
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(RuntimeError::InputExhausted);
            }
            self.pending_input
                .extend(line.split_whitespace().map(str::to_string));
        }
    }

    fn code(&self, function: Option<usize>) -> Result<&'m [Instruction], RuntimeError> {
        let module: &'m ObjectModule = self.module;
        match function {
            None => Ok(&module.start),
            Some(i) => module
                .functions
                .get(i)
                .map(|f| f.code.as_slice())
                .ok_or(RuntimeError::UnknownFunction(i)),
        }
    }

    fn name(&self, index: usize) -> String {
        self.module
            .function_name(index)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{}", index))
    }
}

/// Runs a module with in-memory input and returns everything it printed.
pub fn run_module(module: &ObjectModule, input: &str) -> Result<String, RuntimeError> {
    run_module_with_depth(module, input, DEFAULT_MAX_CALL_DEPTH)
}

pub fn run_module_with_depth(
    module: &ObjectModule,
    input: &str,
    max_call_depth: usize,
) -> Result<String, RuntimeError> {
    let mut vm = Vm::new(module, input.as_bytes(), Vec::new()).with_max_call_depth(max_call_depth);
    vm.run()?;
    Ok(String::from_utf8_lossy(&vm.into_output()).into_owned())
}

pub fn run_object<R: BufRead, W: Write>(
    bytes: &[u8],
    input: R,
    output: W,
    max_call_depth: usize,
) -> Result<(), RuntimeError> {
    let module = decode(bytes)?;
    Vm::new(&module, input, output)
        .with_max_call_depth(max_call_depth)
        .run()
}

pub fn disasm_object(bytes: &[u8]) -> Result<String, RuntimeError> {
    let module = decode(bytes)?;
    Ok(assembly::render(&module))
}
