//! IR interpreter
//!
//! Executes an [IrProgram] directly, following the same machine model as the generated
//! assembly: a word-sized operand stack, a byte addressed memory holding the globals, the
//! string literals and a downward growing native stack, and `rbp`/`rsp` registers for frames.
//! Used by the test suite and by `--mode run`.

use thiserror::Error;

use crate::builtin::Builtin;
use crate::ir::{Instruction, IrFunction, IrProgram, Opcode, Operand};

/// Address of the first byte of memory, keeps small integers from being valid pointers
const MEMORY_BASE: u64 = 0x1000;
const STACK_SIZE: usize = 1 << 20;
/// Functions live outside of data memory
const FUNCTION_BASE: u64 = 0x7f00_0000_0000;
/// Stands in for the return address pushed by `call`
const RETURN_MARKER: u64 = 0x5e1f_0000_0000_0000;
const DEFAULT_FUEL: u64 = 10_000_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("operand stack underflow in `{function}` at instruction {index}")]
    StackUnderflow { function: String, index: usize },

    #[error("`{op}` trapped in `{function}` at instruction {index}")]
    Trap {
        function: String,
        index: usize,
        op: Opcode,
    },

    #[error("bad memory access at {address:#x}")]
    BadAddress { address: u64 },

    #[error("jump out of bounds in `{function}` at instruction {index}")]
    BadJump { function: String, index: usize },

    #[error("native stack overflow")]
    StackOverflow,

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("external function `{0}` cannot be interpreted")]
    External(String),

    #[error("division by zero in `{function}` at instruction {index}")]
    DivisionByZero { function: String, index: usize },

    #[error("out of fuel after {0} instructions")]
    OutOfFuel(u64),
}

type Result<T> = std::result::Result<T, VmError>;

#[derive(Debug, Clone, Copy)]
struct Frame<'p> {
    function: &'p IrFunction,
    pc: usize,
}

pub struct Vm<'p> {
    program: &'p IrProgram,
    memory: Vec<u8>,
    /// Address of each string literal
    strings: Vec<u64>,
    stack: Vec<u64>,
    rsp: u64,
    rbp: u64,
    stack_limit: u64,
    stack_top: u64,
    fuel: u64,
    steps: u64,
    initialized: bool,
    output: Vec<u8>,
    /// Function and instruction being executed, for error reports
    location: (&'p str, usize),
}

impl<'p> Vm<'p> {
    pub fn new(program: &'p IrProgram) -> Self {
        let mut memory: Vec<u8> = program
            .globals
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect();

        let mut strings = Vec::with_capacity(program.strings.len());
        for (_, bytes) in program.strings.iter() {
            strings.push(MEMORY_BASE + memory.len() as u64);
            memory.extend(bytes);
        }

        memory.resize(memory.len().next_multiple_of(16), 0);
        let stack_limit = MEMORY_BASE + memory.len() as u64;
        memory.resize(memory.len() + STACK_SIZE, 0);
        let stack_top = MEMORY_BASE + memory.len() as u64;

        Self {
            program,
            memory,
            strings,
            stack: Vec::new(),
            rsp: stack_top,
            rbp: stack_top,
            stack_limit,
            stack_top,
            fuel: DEFAULT_FUEL,
            steps: 0,
            initialized: false,
            output: Vec::new(),
            location: ("", 0),
        }
    }

    /// Limit the number of instructions executed over the lifetime of the machine
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    /// Bytes written through `putchar`
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Read the global slot at `offset` bytes
    pub fn global(&self, offset: u64) -> Result<u64> {
        self.load(MEMORY_BASE + offset)
    }

    /// Run `name` and return whatever it left on the operand stack
    ///
    /// The init function runs before the first call.
    pub fn call(&mut self, name: &str) -> Result<Vec<u64>> {
        let program = self.program;
        if !self.initialized {
            self.initialized = true;
            self.run(&program.init)?;
        }

        let function = program
            .functions
            .get(name)
            .ok_or_else(|| VmError::UnknownFunction(name.to_string()))?;
        if function.is_external {
            return Err(VmError::External(name.to_string()));
        }

        self.stack.clear();
        self.run(function)?;
        tracing::debug!(function = name, steps = self.steps, "vm call finished");
        Ok(std::mem::take(&mut self.stack))
    }

    fn run(&mut self, entry: &'p IrFunction) -> Result<()> {
        let program = self.program;
        self.rsp = self.stack_top;
        self.rbp = self.stack_top;
        self.push_native(RETURN_MARKER)?;

        let mut callers: Vec<Frame<'p>> = Vec::new();
        let mut frame = Frame {
            function: entry,
            pc: 0,
        };

        loop {
            if self.fuel == 0 {
                return Err(VmError::OutOfFuel(self.steps));
            }

            // falling off the end behaves like RET
            let function = frame.function;
            let Some(instr) = function.code.get(frame.pc) else {
                self.pop_native()?;
                match callers.pop() {
                    Some(caller) => {
                        frame = caller;
                        continue;
                    }
                    None => return Ok(()),
                }
            };

            self.fuel -= 1;
            self.steps += 1;
            self.location = (function.name.as_str(), instr.index);
            frame.pc += 1;

            match (instr.op, &instr.operand) {
                (Opcode::Nop, _) => {}
                (Opcode::SetupGlobal, _) => self.stack.clear(),
                (Opcode::PushSign, &Operand::Signed(value)) => self.stack.push(value as u64),
                (Opcode::PushUnsign, &Operand::Unsigned(value)) => self.stack.push(value),
                (Opcode::PushStack, &Operand::Unsigned(offset)) => {
                    let value = self.load(self.rbp.wrapping_sub(offset))?;
                    self.stack.push(value);
                }
                (Opcode::PushGlobal, &Operand::Unsigned(offset)) => {
                    let value = self.load(MEMORY_BASE + offset)?;
                    self.stack.push(value);
                }
                (Opcode::PushGea, &Operand::Unsigned(offset)) => self.stack.push(MEMORY_BASE + offset),
                (Opcode::PushGea, Operand::Str(label)) => {
                    let address = self.label_address(label)?;
                    self.stack.push(address);
                }
                (Opcode::PushSea, &Operand::Unsigned(offset)) => self.stack.push(self.rbp.wrapping_sub(offset)),
                (Opcode::Pop, _) => {
                    self.pop()?;
                }
                (Opcode::Clone, _) => {
                    let value = self.pop()?;
                    self.stack.push(value);
                    self.stack.push(value);
                }
                (Opcode::StackFramePush, _) => {
                    self.push_native(self.rbp)?;
                    self.rbp = self.rsp;
                }
                (Opcode::StackFramePop, _) => {
                    self.rsp = self.rbp;
                    self.rbp = self.pop_native()?;
                }
                (Opcode::Alloc, &Operand::Unsigned(bytes)) => {
                    self.rsp = self
                        .rsp
                        .checked_sub(bytes)
                        .filter(|&rsp| rsp >= self.stack_limit)
                        .ok_or(VmError::StackOverflow)?;
                }
                (Opcode::Free, &Operand::Unsigned(bytes)) => {
                    self.rsp = self
                        .rsp
                        .checked_add(bytes)
                        .filter(|&rsp| rsp <= self.stack_top)
                        .ok_or(VmError::BadAddress { address: self.rsp })?;
                }
                (Opcode::Load, _) => {
                    let address = self.pop()?;
                    let value = self.load(address)?;
                    self.stack.push(value);
                }
                (Opcode::Store, _) => {
                    let address = self.pop()?;
                    let value = self.pop()?;
                    self.store(address, value)?;
                }
                (Opcode::Neg | Opcode::BitNot | Opcode::LogNot, _) => {
                    let value = self.pop()?;
                    let result = match instr.op {
                        Opcode::Neg => value.wrapping_neg(),
                        Opcode::BitNot => !value,
                        _ => u64::from(value == 0),
                    };
                    self.stack.push(result);
                }
                (Opcode::Jump | Opcode::JumpIf | Opcode::JumpIfNot, _) => {
                    let taken = match instr.op {
                        Opcode::Jump => true,
                        Opcode::JumpIf => self.pop()? != 0,
                        _ => self.pop()? == 0,
                    };
                    if taken {
                        frame.pc = frame
                            .function
                            .jump_target(instr.index)
                            .filter(|&target| target <= frame.function.len())
                            .ok_or_else(|| VmError::BadJump {
                                function: frame.function.name.clone(),
                                index: instr.index,
                            })?;
                    }
                }
                (Opcode::Ret, _) => {
                    self.pop_native()?;
                    match callers.pop() {
                        Some(caller) => frame = caller,
                        None => return Ok(()),
                    }
                }
                (Opcode::Call, Operand::Str(name)) => match program.functions.get(name) {
                    Some(function) if function.is_external => {
                        return Err(VmError::External(name.clone()));
                    }
                    Some(function) => {
                        self.push_native(RETURN_MARKER)?;
                        callers.push(frame);
                        frame = Frame { function, pc: 0 };
                    }
                    None => match Builtin::from_name(name) {
                        Some(Builtin::Putchar) => {
                            let value = self.pop()?;
                            self.output.push(value as u8);
                        }
                        None => return Err(VmError::UnknownFunction(name.clone())),
                    },
                },
                (op, _) => match binary(op) {
                    Some(apply) => {
                        let left = self.pop()?;
                        let right = self.pop()?;
                        let result = apply(left, right).ok_or_else(|| VmError::DivisionByZero {
                            function: frame.function.name.clone(),
                            index: instr.index,
                        })?;
                        self.stack.push(result);
                    }
                    None => return Err(self.trap(instr)),
                },
            }
        }
    }

    fn trap(&self, instr: &Instruction) -> VmError {
        VmError::Trap {
            function: self.location.0.to_string(),
            index: instr.index,
            op: instr.op,
        }
    }

    fn pop(&mut self) -> Result<u64> {
        self.stack.pop().ok_or_else(|| VmError::StackUnderflow {
            function: self.location.0.to_string(),
            index: self.location.1,
        })
    }

    fn push_native(&mut self, value: u64) -> Result<()> {
        let rsp = self
            .rsp
            .checked_sub(8)
            .filter(|&rsp| rsp >= self.stack_limit)
            .ok_or(VmError::StackOverflow)?;
        self.rsp = rsp;
        self.store(rsp, value)
    }

    fn pop_native(&mut self) -> Result<u64> {
        let value = self.load(self.rsp)?;
        self.rsp += 8;
        Ok(value)
    }

    fn offset(&self, address: u64) -> Result<usize> {
        address
            .checked_sub(MEMORY_BASE)
            .and_then(|offset| usize::try_from(offset).ok())
            .filter(|&offset| offset.checked_add(8).is_some_and(|end| end <= self.memory.len()))
            .ok_or(VmError::BadAddress { address })
    }

    fn load(&self, address: u64) -> Result<u64> {
        let offset = self.offset(address)?;
        let mut bytes = [0; 8];
        bytes.copy_from_slice(&self.memory[offset..offset + 8]);
        Ok(u64::from_le_bytes(bytes))
    }

    fn store(&mut self, address: u64, value: u64) -> Result<()> {
        let offset = self.offset(address)?;
        self.memory[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn label_address(&self, label: &str) -> Result<u64> {
        if let Some(index) = self.program.strings.lookup(label) {
            return Ok(self.strings[index]);
        }
        if let Some(position) = self.program.functions.keys().position(|name| name == label) {
            return Ok(FUNCTION_BASE + 16 * position as u64);
        }
        match Builtin::from_name(label) {
            Some(_) => Ok(FUNCTION_BASE - 16),
            None => Err(VmError::UnknownFunction(label.to_string())),
        }
    }
}

/// `left OP right` on machine words, `None` on division by zero
fn binary(op: Opcode) -> Option<fn(u64, u64) -> Option<u64>> {
    let apply: fn(u64, u64) -> Option<u64> = match op {
        Opcode::Add => |l, r| Some(l.wrapping_add(r)),
        Opcode::Sub => |l, r| Some(l.wrapping_sub(r)),
        Opcode::Mul => |l, r| Some(l.wrapping_mul(r)),
        Opcode::Div => |l, r| (r != 0).then(|| (l as i64).wrapping_div(r as i64) as u64),
        Opcode::Mod => |l, r| (r != 0).then(|| (l as i64).wrapping_rem(r as i64) as u64),
        Opcode::BitAnd => |l, r| Some(l & r),
        Opcode::BitOr => |l, r| Some(l | r),
        Opcode::BitXor => |l, r| Some(l ^ r),
        Opcode::ShiftLeft => |l, r| Some(l << (r & 63)),
        Opcode::ShiftRight => |l, r| Some(l >> (r & 63)),
        Opcode::CmpEq => |l, r| Some(u64::from(l == r)),
        Opcode::CmpNeq => |l, r| Some(u64::from(l != r)),
        Opcode::CmpLt => |l, r| Some(u64::from((l as i64) < (r as i64))),
        Opcode::CmpGt => |l, r| Some(u64::from((l as i64) > (r as i64))),
        Opcode::CmpLte => |l, r| Some(u64::from((l as i64) <= (r as i64))),
        Opcode::CmpGte => |l, r| Some(u64::from((l as i64) >= (r as i64))),
        _ => return None,
    };
    Some(apply)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Span;

    fn program(code: &[(Opcode, Operand)]) -> IrProgram {
        let mut main = IrFunction::new("main", 0, 1);
        for (op, operand) in code {
            main.emit(*op, operand.clone(), Span::default());
        }
        let mut program = IrProgram::default();
        program.functions.insert(String::from("main"), main);
        program
    }

    #[test]
    fn left_operand_is_on_top() {
        let program = program(&[
            (Opcode::PushUnsign, Operand::Unsigned(3)),
            (Opcode::PushUnsign, Operand::Unsigned(10)),
            (Opcode::Sub, Operand::None),
            (Opcode::Ret, Operand::None),
        ]);
        assert_eq!(Vm::new(&program).call("main"), Ok(vec![7]));
    }

    #[test]
    fn signed_semantics() {
        let program = program(&[
            (Opcode::PushUnsign, Operand::Unsigned(2)),
            (Opcode::PushSign, Operand::Signed(-7)),
            (Opcode::Div, Operand::None),
            (Opcode::PushUnsign, Operand::Unsigned(0)),
            (Opcode::PushSign, Operand::Signed(-1)),
            (Opcode::CmpLt, Operand::None),
        ]);
        assert_eq!(Vm::new(&program).call("main"), Ok(vec![-3i64 as u64, 1]));
    }

    #[test]
    fn locals_live_below_the_frame() {
        let program = program(&[
            (Opcode::StackFramePush, Operand::None),
            (Opcode::Alloc, Operand::Unsigned(8)),
            (Opcode::PushUnsign, Operand::Unsigned(42)),
            (Opcode::PushSea, Operand::Unsigned(8)),
            (Opcode::Store, Operand::None),
            (Opcode::PushStack, Operand::Unsigned(8)),
            (Opcode::StackFramePop, Operand::None),
            (Opcode::Ret, Operand::None),
        ]);
        assert_eq!(Vm::new(&program).call("main"), Ok(vec![42]));
    }

    #[test]
    fn putchar_collects_output() {
        let program = program(&[
            (Opcode::PushUnsign, Operand::Unsigned(u64::from(b'h'))),
            (Opcode::Call, Operand::Str(String::from("putchar"))),
            (Opcode::PushUnsign, Operand::Unsigned(u64::from(b'i'))),
            (Opcode::Call, Operand::Str(String::from("putchar"))),
        ]);
        let mut vm = Vm::new(&program);
        assert_eq!(vm.call("main"), Ok(vec![]));
        assert_eq!(vm.output_string(), "hi");
    }

    #[test]
    fn runtime_errors() {
        let divide = program(&[
            (Opcode::PushUnsign, Operand::Unsigned(0)),
            (Opcode::PushUnsign, Operand::Unsigned(1)),
            (Opcode::Div, Operand::None),
        ]);
        assert!(matches!(Vm::new(&divide).call("main"), Err(VmError::DivisionByZero { .. })));

        let trap = program(&[(Opcode::Invalid, Operand::None)]);
        assert!(matches!(
            Vm::new(&trap).call("main"),
            Err(VmError::Trap {
                op: Opcode::Invalid,
                ..
            })
        ));

        let underflow = program(&[(Opcode::Add, Operand::None)]);
        assert!(matches!(Vm::new(&underflow).call("main"), Err(VmError::StackUnderflow { .. })));

        let wild = program(&[(Opcode::PushUnsign, Operand::Unsigned(8)), (Opcode::Load, Operand::None)]);
        assert_eq!(Vm::new(&wild).call("main"), Err(VmError::BadAddress { address: 8 }));

        assert_eq!(
            Vm::new(&trap).call("missing"),
            Err(VmError::UnknownFunction(String::from("missing")))
        );
    }

    #[test]
    fn fuel_stops_endless_loops() {
        let mut main = IrFunction::new("main", 0, 0);
        main.emit_jump_to(Opcode::Jump, 0, Span::default());
        let mut program = IrProgram::default();
        program.functions.insert(String::from("main"), main);

        let result = Vm::new(&program).with_fuel(100).call("main");
        assert_eq!(result, Err(VmError::OutOfFuel(100)));
    }
}
