//! Text form of an object module, as read by the c0 assembler.

use crate::instruction::Instruction;
use crate::object::ObjectModule;
use std::fmt::Write as _;

pub fn render(module: &ObjectModule) -> String {
    let mut out = String::new();
    out.push_str(".constants:\n");
    for (i, c) in module.constants.iter().enumerate() {
        let _ = writeln!(out, "{} {} \"{}\"", i, c.kind.tag(), c.value);
    }

    out.push_str(".start:\n");
    for instr in &module.start {
        let _ = writeln!(out, "{}", render_instruction(instr));
    }

    out.push_str(".functions:\n");
    for (i, f) in module.functions.iter().enumerate() {
        let _ = writeln!(out, "{} {} {} {}", i, f.name_index, f.param_count, f.level);
    }

    for (i, f) in module.functions.iter().enumerate() {
        match module.function_name(i) {
            Some(name) => {
                let _ = writeln!(out, ".F{}: #{}", i, name);
            }
            None => {
                let _ = writeln!(out, ".F{}:", i);
            }
        }
        for instr in &f.code {
            let _ = writeln!(out, "{}", render_instruction(instr));
        }
    }
    out
}

/// `offset mnemonic op1, op2`
pub fn render_instruction(instr: &Instruction) -> String {
    let mut line = format!("{} {}", instr.offset, instr.opcode.mnemonic());
    if !instr.operands.is_empty() {
        let ops: Vec<String> = instr.operands.iter().map(|v| v.to_string()).collect();
        line.push(' ');
        line.push_str(&ops.join(", "));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_source;

    #[test]
    fn renders_all_sections() {
        let program =
            compile_source("const int k = 2; int sq(int x) { return x * x; } void main() { print(sq(k)); }")
                .expect("compile");
        let module = ObjectModule::from_program(&program).expect("module");
        let text = render(&module);
        let expected = "\
.constants:
0 S \"sq\"
1 S \"main\"
.start:
0 ipush 2
.functions:
0 0 1 1
1 1 0 1
.F0: #sq
0 loada 0, 0
1 iload
2 loada 0, 0
3 iload
4 imul
5 iret
.F1: #main
0 loada 1, 0
1 iload
2 call 0
3 iprint
4 printl
5 ret
";
        assert_eq!(text, expected);
    }
}
