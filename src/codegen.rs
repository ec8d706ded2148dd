//! Code generation
//!
//! Translates an [IrProgram] into x86-64 NASM assembly for Windows. The main interface is
//! [emit].
//!
//! The IR operand stack lives in the `exec_stack` region: `r15` holds its base and `r14` the
//! number of entries. Frames, return addresses and `ALLOC` slots live on the native stack and
//! are addressed relative to `rbp`. Every IR instruction gets its own `.IROP_<index>` label so
//! relative jumps translate one to one.

use crate::builtin::Builtin;
use crate::ir::{Instruction, IrFunction, IrProgram, Opcode, Operand};

/// Operand stack capacity in words
const EXEC_STACK_WORDS: usize = 65536;
/// Allocations above this size go through the stack probe
const PAGE_SIZE: u64 = 4096;
const INIT_LABEL: &str = "solum_init";
const ARGUMENT_REGISTERS: [&str; 4] = ["rcx", "rdx", "r8", "r9"];

/// Render the whole program as one assembly file
#[tracing::instrument(level = "debug", skip_all)]
pub fn emit(program: &IrProgram) -> String {
    let mut emitter = Emitter {
        program,
        asm: String::new(),
    };
    emitter.header();
    emitter.data();
    emitter.text();
    tracing::debug!(bytes = emitter.asm.len(), "emitted assembly");
    emitter.asm
}

fn function_label(name: &str) -> String {
    format!("fn_{name}")
}

struct Emitter<'p> {
    program: &'p IrProgram,
    asm: String,
}

impl Emitter<'_> {
    fn line(&mut self, text: &str) {
        self.asm.push_str(text);
        self.asm.push('\n');
    }

    fn instr(&mut self, text: &str) {
        self.asm.push_str("    ");
        self.line(text);
    }

    fn label(&mut self, name: &str) {
        self.asm.push_str(name);
        self.asm.push_str(":\n");
    }

    fn push_rax(&mut self) {
        self.instr("mov [r15 + r14*8], rax");
        self.instr("inc r14");
    }

    fn pop(&mut self, register: &str) {
        self.instr("dec r14");
        self.instr(&format!("mov {register}, [r15 + r14*8]"));
    }

    fn header(&mut self) {
        self.line("bits 64");
        self.line("default rel");
        self.line("");
        self.line("extern GetStdHandle");
        self.line("extern WriteConsoleA");
        self.line("extern ExitProcess");
        let externals: Vec<_> = self
            .program
            .functions
            .values()
            .filter(|function| function.is_external)
            .map(|function| function.name.clone())
            .collect();
        for name in externals {
            self.line(&format!("extern {name}"));
        }
        self.line("");
        self.line("global mainCRTStartup");
        self.line("");
    }

    fn data(&mut self) {
        self.line("section .bss");
        self.line(&format!("exec_stack: resq {EXEC_STACK_WORDS}"));
        self.line("write_count: resd 1");
        self.line("char_buffer: resb 8");
        self.line("");

        let program = self.program;
        self.line("section .data");
        self.label("globals");
        if program.globals.is_empty() {
            self.instr("dq 0");
        }
        for value in &program.globals {
            self.instr(&format!("dq {value}"));
        }
        for (label, bytes) in program.strings.iter() {
            let bytes: Vec<_> = bytes.iter().map(u8::to_string).collect();
            self.line(&format!("{label}: db {}", bytes.join(", ")));
        }
        self.line("");
    }

    fn text(&mut self) {
        self.line("section .text");
        self.entry_point();
        self.putchar_routine();
        self.probe_routine();

        let program = self.program;
        self.function(INIT_LABEL, &program.init);
        for function in program.functions.values() {
            if !function.is_external {
                self.function(&function_label(&function.name), function);
            }
        }
    }

    fn entry_point(&mut self) {
        self.label("mainCRTStartup");
        self.instr("and rsp, -16");
        self.instr(&format!("call {INIT_LABEL}"));
        self.instr("xor ecx, ecx");

        let main = self
            .program
            .functions
            .get("main")
            .filter(|main| !main.is_external);
        if main.is_some() {
            self.instr(&format!("call {}", function_label("main")));
            self.instr("xor ecx, ecx");
            self.instr("test r14, r14");
            self.instr("jz .exit");
            self.pop("rcx");
            self.label(".exit");
        }

        self.instr("and rsp, -16");
        self.instr("sub rsp, 32");
        self.instr("call ExitProcess");
        self.line("");
    }

    /// Pops one value and writes its low byte to stdout
    fn putchar_routine(&mut self) {
        self.label("solum_putchar");
        self.pop("rax");
        self.instr("mov [char_buffer], al");
        self.instr("push r12");
        self.instr("mov r12, rsp");
        self.instr("and rsp, -16");
        self.instr("sub rsp, 48");
        self.instr("mov ecx, -11");
        self.instr("call GetStdHandle");
        self.instr("mov rcx, rax");
        self.instr("lea rdx, [char_buffer]");
        self.instr("mov r8d, 1");
        self.instr("lea r9, [write_count]");
        self.instr("mov qword [rsp + 32], 0");
        self.instr("call WriteConsoleA");
        self.instr("mov rsp, r12");
        self.instr("pop r12");
        self.instr("ret");
        self.line("");
    }

    /// Touches every page of the `rax` bytes below the caller's stack pointer
    fn probe_routine(&mut self) {
        self.label("solum_probe");
        self.instr("push rcx");
        self.instr("push rdx");
        self.instr("lea rcx, [rsp + 24]");
        self.instr("mov rdx, rcx");
        self.instr("sub rdx, rax");
        self.label(".next_page");
        self.instr(&format!("sub rcx, {PAGE_SIZE}"));
        self.instr("cmp rcx, rdx");
        self.instr("jb .last_page");
        self.instr("test [rcx], rcx");
        self.instr("jmp .next_page");
        self.label(".last_page");
        self.instr("test [rdx], rdx");
        self.instr("pop rdx");
        self.instr("pop rcx");
        self.instr("ret");
        self.line("");
    }

    fn function(&mut self, label: &str, function: &IrFunction) {
        tracing::trace!(name = %function.name, len = function.len(), "emitting function");
        self.line(&format!("; {}", function.name));
        self.label(label);
        for instr in &function.code {
            self.label(&format!(".IROP_{}", instr.index));
            self.instruction(function, instr);
        }
        self.label(&format!(".IROP_{}", function.len()));
        self.instr("ret");
        self.line("");
    }

    fn instruction(&mut self, function: &IrFunction, instr: &Instruction) {
        match (instr.op, &instr.operand) {
            (Opcode::Nop, _) => self.instr("nop"),
            (Opcode::SetupGlobal, _) => {
                self.instr("lea r15, [exec_stack]");
                self.instr("xor r14, r14");
            }
            (Opcode::PushSign, Operand::Signed(value)) => {
                self.instr(&format!("mov rax, {value}"));
                self.push_rax();
            }
            (Opcode::PushUnsign, Operand::Unsigned(value)) => {
                if *value > i64::MAX as u64 {
                    self.instr(&format!("mov rax, 0x{value:x}"));
                } else {
                    self.instr(&format!("mov rax, {value}"));
                }
                self.push_rax();
            }
            (Opcode::PushStack, Operand::Unsigned(offset)) => {
                self.instr(&format!("mov rax, [rbp - {offset}]"));
                self.push_rax();
            }
            (Opcode::PushGlobal, Operand::Unsigned(offset)) => {
                self.instr(&format!("mov rax, [globals + {offset}]"));
                self.push_rax();
            }
            (Opcode::PushGea, Operand::Unsigned(offset)) => {
                self.instr(&format!("lea rax, [globals + {offset}]"));
                self.push_rax();
            }
            (Opcode::PushGea, Operand::Str(label)) => match self.resolve_label(label) {
                Some(target) => {
                    self.instr(&format!("lea rax, [{target}]"));
                    self.push_rax();
                }
                None => self.instr("ud2"),
            },
            (Opcode::PushSea, Operand::Unsigned(offset)) => {
                self.instr(&format!("lea rax, [rbp - {offset}]"));
                self.push_rax();
            }
            (Opcode::Pop, _) => self.instr("dec r14"),
            (Opcode::Clone, _) => {
                self.instr("mov rax, [r15 + r14*8 - 8]");
                self.push_rax();
            }
            (Opcode::StackFramePush, _) => {
                self.instr("push rbp");
                self.instr("mov rbp, rsp");
            }
            (Opcode::StackFramePop, _) => {
                self.instr("mov rsp, rbp");
                self.instr("pop rbp");
            }
            (Opcode::Alloc, Operand::Unsigned(bytes)) => {
                if *bytes > PAGE_SIZE {
                    self.instr(&format!("mov rax, {bytes}"));
                    self.instr("call solum_probe");
                }
                self.instr(&format!("sub rsp, {bytes}"));
            }
            (Opcode::Free, Operand::Unsigned(bytes)) => self.instr(&format!("add rsp, {bytes}")),
            (Opcode::Load, _) => {
                self.pop("rax");
                self.instr("mov rax, [rax]");
                self.push_rax();
            }
            (Opcode::Store, _) => {
                self.pop("rax");
                self.pop("rcx");
                self.instr("mov [rax], rcx");
            }
            (Opcode::Neg | Opcode::BitNot | Opcode::LogNot, _) => {
                self.pop("rax");
                match instr.op {
                    Opcode::Neg => self.instr("neg rax"),
                    Opcode::BitNot => self.instr("not rax"),
                    _ => {
                        self.instr("test rax, rax");
                        self.instr("mov edx, 1");
                        self.instr("mov eax, 0");
                        self.instr("cmovz rax, rdx");
                    }
                }
                self.push_rax();
            }
            (op, _) if binary_instruction(op).is_some() => {
                self.pop("rax");
                self.pop("rcx");
                for line in binary_instruction(op).unwrap_or_default() {
                    self.instr(line);
                }
                self.push_rax();
            }
            (Opcode::Jump | Opcode::JumpIf | Opcode::JumpIfNot, _) => {
                let target = function
                    .jump_target(instr.index)
                    .filter(|&target| target <= function.len());
                let Some(target) = target else {
                    self.instr("ud2");
                    return;
                };
                let jump = match instr.op {
                    Opcode::Jump => "jmp",
                    Opcode::JumpIf => "jnz",
                    _ => "jz",
                };
                if instr.op != Opcode::Jump {
                    self.pop("rax");
                    self.instr("test rax, rax");
                }
                self.instr(&format!("{jump} .IROP_{target}"));
            }
            (Opcode::Ret, _) => self.instr("ret"),
            (Opcode::Call, Operand::Str(name)) => self.call(name),
            (Opcode::Brk, _) => self.instr("int3"),
            _ => self.instr("ud2"),
        }
    }

    /// Address a `PUSH_GEA` label refers to
    fn resolve_label(&self, label: &str) -> Option<String> {
        if self.program.strings.lookup(label).is_some() {
            return Some(label.to_string());
        }
        match self.program.functions.get(label) {
            Some(function) if function.is_external => Some(function.name.clone()),
            Some(function) => Some(function_label(&function.name)),
            None => Builtin::from_name(label).map(|_| String::from("solum_putchar")),
        }
    }

    fn call(&mut self, name: &str) {
        let program = self.program;
        match program.functions.get(name) {
            Some(function) if function.is_external => self.external_call(function),
            Some(function) => self.instr(&format!("call {}", function_label(&function.name))),
            None => match Builtin::from_name(name) {
                Some(Builtin::Putchar) => self.instr("call solum_putchar"),
                None => self.instr("ud2"),
            },
        }
    }

    /// Windows x64 calling convention: four register arguments, shadow space, aligned stack
    fn external_call(&mut self, function: &IrFunction) {
        for register in ARGUMENT_REGISTERS.iter().take(function.params) {
            self.pop(register);
        }
        let stacked = function.params.saturating_sub(ARGUMENT_REGISTERS.len());
        let reserve = (32 + 8 * stacked as u64).next_multiple_of(16);

        self.instr("mov r12, rsp");
        self.instr("and rsp, -16");
        self.instr(&format!("sub rsp, {reserve}"));
        for slot in 0..stacked {
            self.pop("rax");
            self.instr(&format!("mov [rsp + {}], rax", 32 + 8 * slot));
        }
        self.instr(&format!("call {}", function.name));
        self.instr("mov rsp, r12");
        if function.returns > 0 {
            self.push_rax();
        }
    }
}

/// Instructions combining `rax` (left) and `rcx` (right) into `rax`
fn binary_instruction(op: Opcode) -> Option<&'static [&'static str]> {
    let lines: &'static [&'static str] = match op {
        Opcode::Add => &["add rax, rcx"],
        Opcode::Sub => &["sub rax, rcx"],
        Opcode::Mul => &["imul rax, rcx"],
        Opcode::Div => &["cqo", "idiv rcx"],
        Opcode::Mod => &["cqo", "idiv rcx", "mov rax, rdx"],
        Opcode::BitAnd => &["and rax, rcx"],
        Opcode::BitOr => &["or rax, rcx"],
        Opcode::BitXor => &["xor rax, rcx"],
        Opcode::ShiftLeft => &["shl rax, cl"],
        Opcode::ShiftRight => &["shr rax, cl"],
        Opcode::CmpEq => &["mov edx, 1", "cmp rax, rcx", "mov eax, 0", "cmove rax, rdx"],
        Opcode::CmpNeq => &["mov edx, 1", "cmp rax, rcx", "mov eax, 0", "cmovne rax, rdx"],
        Opcode::CmpLt => &["mov edx, 1", "cmp rax, rcx", "mov eax, 0", "cmovl rax, rdx"],
        Opcode::CmpGt => &["mov edx, 1", "cmp rax, rcx", "mov eax, 0", "cmovg rax, rdx"],
        Opcode::CmpLte => &["mov edx, 1", "cmp rax, rcx", "mov eax, 0", "cmovle rax, rdx"],
        Opcode::CmpGte => &["mov edx, 1", "cmp rax, rcx", "mov eax, 0", "cmovge rax, rdx"],
        _ => return None,
    };
    Some(lines)
}
