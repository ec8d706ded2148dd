//! Stack machine IR
//!
//! Every function is a flat array of [Instruction]s for an abstract operand stack machine.
//! All values are 64-bit words. Binary operators pop their left operand first (it is on
//! top) and then the right operand. Jumps are relative: a jump at index `i` with operand `d`
//! continues at `i + 1 + d`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thiserror::Error;

use crate::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Nop,
    SetupGlobal,
    PushSign,
    PushUnsign,
    PushStack,
    PushGlobal,
    /// Push an address inside the globals area, or of a string or function label
    PushGea,
    /// Push an address below the current frame base
    PushSea,
    Pop,
    Clone,
    StackFramePush,
    StackFramePop,
    Alloc,
    Free,
    Load,
    /// Pops an address, then the value to write
    Store,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    ShiftLeft,
    ShiftRight,
    CmpEq,
    CmpNeq,
    CmpLt,
    CmpGt,
    CmpLte,
    CmpGte,
    LogNot,
    Jump,
    JumpIf,
    JumpIfNot,
    Ret,
    Call,
    Brk,
    Invalid,
}

impl Opcode {
    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIf | Opcode::JumpIfNot)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::SetupGlobal => "SETUP_GLOBAL",
            Opcode::PushSign => "PUSH_SIGN",
            Opcode::PushUnsign => "PUSH_UNSIGN",
            Opcode::PushStack => "PUSH_STACK",
            Opcode::PushGlobal => "PUSH_GLOBAL",
            Opcode::PushGea => "PUSH_GEA",
            Opcode::PushSea => "PUSH_SEA",
            Opcode::Pop => "POP",
            Opcode::Clone => "CLONE",
            Opcode::StackFramePush => "STACK_FRAME_PUSH",
            Opcode::StackFramePop => "STACK_FRAME_POP",
            Opcode::Alloc => "ALLOC",
            Opcode::Free => "FREE",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Neg => "NEG",
            Opcode::BitAnd => "BIT_AND",
            Opcode::BitOr => "BIT_OR",
            Opcode::BitXor => "BIT_XOR",
            Opcode::BitNot => "BIT_NOT",
            Opcode::ShiftLeft => "SHIFT_LEFT",
            Opcode::ShiftRight => "SHIFT_RIGHT",
            Opcode::CmpEq => "CMP_EQ",
            Opcode::CmpNeq => "CMP_NEQ",
            Opcode::CmpLt => "CMP_LT",
            Opcode::CmpGt => "CMP_GT",
            Opcode::CmpLte => "CMP_LTE",
            Opcode::CmpGte => "CMP_GTE",
            Opcode::LogNot => "LOG_NOT",
            Opcode::Jump => "JUMP",
            Opcode::JumpIf => "JUMP_IF",
            Opcode::JumpIfNot => "JUMP_IF_NOT",
            Opcode::Ret => "RET",
            Opcode::Call => "CALL",
            Opcode::Brk => "BRK",
            Opcode::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Operand {
    #[default]
    None,
    Signed(i64),
    Unsigned(u64),
    Str(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Signed(value) => write!(f, "{value:+}"),
            Operand::Unsigned(value) => write!(f, "{value}"),
            Operand::Str(label) => write!(f, "{label}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Opcode,
    pub operand: Operand,
    pub span: Span,
    /// Position inside the owning function's code
    pub index: usize,
}

/// Handle to an already emitted instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrRef(usize);

impl InstrRef {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What an lvalue conversion should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LvalueMode {
    /// Leave the address on the stack
    Address,
    /// Write the value below the address into it
    Store,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{0}` does not produce an lvalue")]
pub struct NotAnLvalue(pub Opcode);

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IrFunction {
    pub name: String,
    pub code: Vec<Instruction>,
    /// Next free byte below the frame base
    pub stack_index: u64,
    /// Largest `stack_index` seen
    pub frame_size: u64,
    pub params: usize,
    pub returns: usize,
    pub is_external: bool,
}

impl IrFunction {
    pub fn new(name: impl Into<String>, params: usize, returns: usize) -> Self {
        Self {
            name: name.into(),
            params,
            returns,
            ..Self::default()
        }
    }

    pub fn external(name: impl Into<String>, params: usize, returns: usize) -> Self {
        Self {
            is_external: true,
            ..Self::new(name, params, returns)
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn emit(&mut self, op: Opcode, operand: Operand, span: Span) -> InstrRef {
        let index = self.code.len();
        self.code.push(Instruction {
            op,
            operand,
            span,
            index,
        });
        InstrRef(index)
    }

    pub fn emit_op(&mut self, op: Opcode, span: Span) -> InstrRef {
        self.emit(op, Operand::None, span)
    }

    pub fn last(&self) -> Option<InstrRef> {
        self.code.len().checked_sub(1).map(InstrRef)
    }

    pub fn get(&self, handle: InstrRef) -> &Instruction {
        &self.code[handle.0]
    }

    pub fn get_mut(&mut self, handle: InstrRef) -> &mut Instruction {
        &mut self.code[handle.0]
    }

    /// Reserve `bytes` on the native stack, returns the frame offset of the new slot range
    pub fn alloc(&mut self, bytes: u64, span: Span) -> u64 {
        self.emit(Opcode::Alloc, Operand::Unsigned(bytes), span);
        self.stack_index += bytes;
        self.frame_size = self.frame_size.max(self.stack_index);
        self.stack_index
    }

    /// Emit a jump whose target is filled in later
    pub fn emit_jump(&mut self, op: Opcode, span: Span) -> InstrRef {
        self.emit(op, Operand::Signed(0), span)
    }

    /// Point the jump at `handle` to the instruction at `target`
    pub fn patch_jump(&mut self, handle: InstrRef, target: usize) {
        let offset = target as i64 - (handle.0 as i64 + 1);
        self.code[handle.0].operand = Operand::Signed(offset);
    }

    /// Emit a jump to an already known target
    pub fn emit_jump_to(&mut self, op: Opcode, target: usize, span: Span) -> InstrRef {
        let handle = self.emit_jump(op, span);
        self.patch_jump(handle, target);
        handle
    }

    /// Rewrite a value producing instruction into its lvalue form
    ///
    /// In [LvalueMode::Store] the returned handle refers to the `STORE` that performs the
    /// write, which is either the rewritten instruction itself or a newly appended one.
    pub fn to_lvalue(&mut self, handle: InstrRef, mode: LvalueMode) -> Result<InstrRef, NotAnLvalue> {
        let instr = &mut self.code[handle.0];
        let needs_store = match (instr.op, mode) {
            (Opcode::PushStack, _) => {
                instr.op = Opcode::PushSea;
                mode == LvalueMode::Store
            }
            (Opcode::PushGlobal, _) => {
                instr.op = Opcode::PushGea;
                mode == LvalueMode::Store
            }
            (Opcode::Load, LvalueMode::Address) => {
                instr.op = Opcode::Nop;
                false
            }
            (Opcode::Load, LvalueMode::Store) => {
                instr.op = Opcode::Store;
                false
            }
            // arrays and functions already evaluate to their address
            (Opcode::PushSea | Opcode::PushGea, LvalueMode::Address) => false,
            (op, _) => return Err(NotAnLvalue(op)),
        };

        if needs_store {
            let span = instr.span;
            return Ok(self.emit_op(Opcode::Store, span));
        }
        Ok(handle)
    }

    /// Target index of the jump at `index`
    pub fn jump_target(&self, index: usize) -> Option<usize> {
        let instr = self.code.get(index)?;
        match (instr.op.is_jump(), &instr.operand) {
            (true, Operand::Signed(offset)) => usize::try_from(index as i64 + 1 + offset).ok(),
            _ => None,
        }
    }
}

/// Interned string literals
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringTable {
    data: Vec<String>,
    labels: HashMap<String, usize>,
}

impl StringTable {
    pub fn label(index: usize) -> String {
        format!("str_{index}")
    }

    /// Label of the literal, interning it on first use
    pub fn intern(&mut self, text: &str) -> String {
        let index = match self.labels.get(text) {
            Some(&index) => index,
            None => {
                let index = self.data.len();
                self.data.push(text.to_string());
                self.labels.insert(text.to_string(), index);
                index
            }
        };
        Self::label(index)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Label and NUL terminated bytes of every literal
    pub fn iter(&self) -> impl Iterator<Item = (String, Vec<u8>)> + '_ {
        self.data.iter().enumerate().map(|(index, text)| {
            let mut bytes = text.as_bytes().to_vec();
            bytes.push(0);
            (Self::label(index), bytes)
        })
    }

    /// Index of the literal behind a label
    pub fn lookup(&self, label: &str) -> Option<usize> {
        let index: usize = label.strip_prefix("str_")?.parse().ok()?;
        (index < self.data.len()).then_some(index)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IrProgram {
    pub functions: BTreeMap<String, IrFunction>,
    /// Global initialization code
    pub init: IrFunction,
    /// Initial values of the 8-byte global slots
    pub globals: Vec<u64>,
    pub strings: StringTable,
}

impl IrProgram {
    pub const INIT_NAME: &'static str = "<init>";
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_external {
            return writeln!(f, "extern {} (params {}, returns {})", self.name, self.params, self.returns);
        }
        writeln!(
            f,
            "fn {} (params {}, returns {}, frame {}):",
            self.name, self.params, self.returns, self.frame_size
        )?;
        for instr in &self.code {
            write!(f, "{:>6}  {}", instr.index, instr.op)?;
            if instr.operand != Operand::None {
                write!(f, " {}", instr.operand)?;
            }
            if let Some(target) = self.jump_target(instr.index) {
                write!(f, "  -> {target}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Display for IrProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "globals: {:?}", self.globals)?;
        for (label, bytes) in self.strings.iter() {
            writeln!(f, "{label}: {:?}", String::from_utf8_lossy(&bytes[..bytes.len() - 1]))?;
        }
        writeln!(f)?;
        write!(f, "{}", self.init)?;
        for function in self.functions.values() {
            writeln!(f)?;
            write!(f, "{function}")?;
        }
        Ok(())
    }
}
