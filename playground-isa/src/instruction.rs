use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

use arbitrary::Arbitrary;
use num_traits::ConstZero;
use serde::Deserialize;
use serde::Serialize;
use strum::EnumCount;
use strum::EnumIter;
use twenty_first::prelude::*;

use crate::op_stack::NumberOfElements;
use crate::op_stack::OpStackElement;
use crate::op_stack::WordIndex;

/// An `Instruction` has jump and `exec` targets encoded as absolute addresses.
pub type Instruction = AnInstruction<usize>;

pub const ALL_INSTRUCTIONS: [Instruction; Instruction::COUNT] = [
    Instruction::Add,
    Instruction::AddImm(BFieldElement::ZERO),
    Instruction::Sub,
    Instruction::SubImm(BFieldElement::ZERO),
    Instruction::Mul,
    Instruction::MulImm(BFieldElement::ZERO),
    Instruction::Div,
    Instruction::DivImm(BFieldElement::ZERO),
    Instruction::Neg,
    Instruction::Inv,
    Instruction::Incr,
    Instruction::Pow2,
    Instruction::Exp,
    Instruction::Eq,
    Instruction::EqImm(BFieldElement::ZERO),
    Instruction::Neq,
    Instruction::NeqImm(BFieldElement::ZERO),
    Instruction::Lt,
    Instruction::Lte,
    Instruction::Gt,
    Instruction::Gte,
    Instruction::IsOdd,
    Instruction::EqW,
    Instruction::Not,
    Instruction::And,
    Instruction::Or,
    Instruction::Xor,
    Instruction::Drop,
    Instruction::DropW,
    Instruction::PadW,
    Instruction::Dup(OpStackElement::ST0),
    Instruction::DupW(WordIndex::W0),
    Instruction::Swap(OpStackElement::ST0),
    Instruction::SwapW(WordIndex::W0),
    Instruction::SwapDW,
    Instruction::MovUp(OpStackElement::ST0),
    Instruction::MovDn(OpStackElement::ST0),
    Instruction::MovUpW(WordIndex::W0),
    Instruction::MovDnW(WordIndex::W0),
    Instruction::CSwap,
    Instruction::CSwapW,
    Instruction::CDrop,
    Instruction::CDropW,
    Instruction::Push(BFieldElement::ZERO),
    Instruction::MemLoad,
    Instruction::MemLoadImm(0),
    Instruction::MemLoadW,
    Instruction::MemLoadWImm(0),
    Instruction::MemStore,
    Instruction::MemStoreImm(0),
    Instruction::MemStoreW,
    Instruction::MemStoreWImm(0),
    Instruction::AdvPush(NumberOfElements::ONE),
    Instruction::AdvLoadW,
    Instruction::AdvPushMapVal,
    Instruction::AdvPushMtNode,
    Instruction::SDepth,
    Instruction::Clk,
    Instruction::Hash,
    Instruction::HMerge,
    Instruction::HPerm,
    Instruction::MTreeGet,
    Instruction::MTreeSet,
    Instruction::MTreeCwm,
    Instruction::MTreeMerge,
    Instruction::MTreeVerify,
    Instruction::Assert,
    Instruction::AssertZ,
    Instruction::AssertEq,
    Instruction::AssertEqW,
    Instruction::Nop,
    Instruction::Branch(0),
    Instruction::Jump(0),
    Instruction::Exec(0),
    Instruction::Return,
];

/// The names of all instructions. Instructions with an immediate share the name
/// of their stack-only counterpart, so some names appear more than once.
pub const ALL_INSTRUCTION_NAMES: [&str; Instruction::COUNT] = {
    let mut names = [""; Instruction::COUNT];
    let mut i = 0;
    while i < Instruction::COUNT {
        names[i] = ALL_INSTRUCTIONS[i].name();
        i += 1;
    }
    names
};

/// A `LabelledInstruction` has jump and `exec` targets encoded as label names.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum LabelledInstruction {
    Instruction(AnInstruction<String>),

    /// Labels are translated into absolute addresses when building a
    /// [`Program`](crate::program::Program).
    Label(String),

    /// Marks the next instruction as a breakpoint. Does not occupy an address.
    Breakpoint,
}

impl Display for LabelledInstruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            LabelledInstruction::Instruction(instruction) => write!(f, "{instruction}"),
            LabelledInstruction::Label(label) => write!(f, "{label}:"),
            LabelledInstruction::Breakpoint => write!(f, "breakpoint"),
        }
    }
}

/// An instruction of the playground's stack machine.
///
/// Structured control flow of the source language (`if.true`, `while.true`,
/// `repeat.N`) is lowered into [`Branch`](Self::Branch) and
/// [`Jump`](Self::Jump); procedure calls into [`Exec`](Self::Exec) and
/// [`Return`](Self::Return). The type parameter `Dest` describes the type of
/// those targets (absolute addresses or labels).
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    EnumCount,
    EnumIter,
    Serialize,
    Deserialize,
    Arbitrary,
)]
pub enum AnInstruction<Dest: PartialEq + Default> {
    // Field arithmetic
    Add,
    AddImm(BFieldElement),
    Sub,
    SubImm(BFieldElement),
    Mul,
    MulImm(BFieldElement),
    Div,
    DivImm(BFieldElement),
    Neg,
    Inv,
    Incr,
    Pow2,
    Exp,

    // Comparison
    Eq,
    EqImm(BFieldElement),
    Neq,
    NeqImm(BFieldElement),
    Lt,
    Lte,
    Gt,
    Gte,
    IsOdd,
    EqW,

    // Boolean
    Not,
    And,
    Or,
    Xor,

    // Stack manipulation
    Drop,
    DropW,
    PadW,
    Dup(OpStackElement),
    DupW(WordIndex),
    Swap(OpStackElement),
    SwapW(WordIndex),
    SwapDW,
    MovUp(OpStackElement),
    MovDn(OpStackElement),
    MovUpW(WordIndex),
    MovDnW(WordIndex),
    CSwap,
    CSwapW,
    CDrop,
    CDropW,

    // Constants
    Push(BFieldElement),

    // Random access memory
    MemLoad,
    MemLoadImm(u32),
    MemLoadW,
    MemLoadWImm(u32),
    MemStore,
    MemStoreImm(u32),
    MemStoreW,
    MemStoreWImm(u32),

    // Non-deterministic input
    AdvPush(NumberOfElements),
    AdvLoadW,
    AdvPushMapVal,
    AdvPushMtNode,

    // Environment
    SDepth,
    Clk,

    // Hashing and Merkle trees
    Hash,
    HMerge,
    HPerm,
    MTreeGet,
    MTreeSet,
    MTreeCwm,
    MTreeMerge,
    MTreeVerify,

    // Assertions
    Assert,
    AssertZ,
    AssertEq,
    AssertEqW,

    // Control flow
    Nop,
    Branch(Dest),
    Jump(Dest),
    Exec(Dest),
    Return,
}

impl<Dest: PartialEq + Default> AnInstruction<Dest> {
    /// Assign a unique integer to each `Instruction`.
    pub const fn opcode(&self) -> u32 {
        match self {
            AnInstruction::Add => 0,
            AnInstruction::AddImm(_) => 1,
            AnInstruction::Sub => 2,
            AnInstruction::SubImm(_) => 3,
            AnInstruction::Mul => 4,
            AnInstruction::MulImm(_) => 5,
            AnInstruction::Div => 6,
            AnInstruction::DivImm(_) => 7,
            AnInstruction::Neg => 8,
            AnInstruction::Inv => 9,
            AnInstruction::Incr => 10,
            AnInstruction::Pow2 => 11,
            AnInstruction::Exp => 12,
            AnInstruction::Eq => 13,
            AnInstruction::EqImm(_) => 14,
            AnInstruction::Neq => 15,
            AnInstruction::NeqImm(_) => 16,
            AnInstruction::Lt => 17,
            AnInstruction::Lte => 18,
            AnInstruction::Gt => 19,
            AnInstruction::Gte => 20,
            AnInstruction::IsOdd => 21,
            AnInstruction::EqW => 22,
            AnInstruction::Not => 23,
            AnInstruction::And => 24,
            AnInstruction::Or => 25,
            AnInstruction::Xor => 26,
            AnInstruction::Drop => 27,
            AnInstruction::DropW => 28,
            AnInstruction::PadW => 29,
            AnInstruction::Dup(_) => 30,
            AnInstruction::DupW(_) => 31,
            AnInstruction::Swap(_) => 32,
            AnInstruction::SwapW(_) => 33,
            AnInstruction::SwapDW => 34,
            AnInstruction::MovUp(_) => 35,
            AnInstruction::MovDn(_) => 36,
            AnInstruction::MovUpW(_) => 37,
            AnInstruction::MovDnW(_) => 38,
            AnInstruction::CSwap => 39,
            AnInstruction::CSwapW => 40,
            AnInstruction::CDrop => 41,
            AnInstruction::CDropW => 42,
            AnInstruction::Push(_) => 43,
            AnInstruction::MemLoad => 44,
            AnInstruction::MemLoadImm(_) => 45,
            AnInstruction::MemLoadW => 46,
            AnInstruction::MemLoadWImm(_) => 47,
            AnInstruction::MemStore => 48,
            AnInstruction::MemStoreImm(_) => 49,
            AnInstruction::MemStoreW => 50,
            AnInstruction::MemStoreWImm(_) => 51,
            AnInstruction::AdvPush(_) => 52,
            AnInstruction::AdvLoadW => 53,
            AnInstruction::AdvPushMapVal => 54,
            AnInstruction::AdvPushMtNode => 55,
            AnInstruction::SDepth => 56,
            AnInstruction::Clk => 57,
            AnInstruction::Hash => 58,
            AnInstruction::HMerge => 59,
            AnInstruction::HPerm => 60,
            AnInstruction::MTreeGet => 61,
            AnInstruction::MTreeSet => 62,
            AnInstruction::MTreeCwm => 63,
            AnInstruction::MTreeMerge => 64,
            AnInstruction::MTreeVerify => 65,
            AnInstruction::Assert => 66,
            AnInstruction::AssertZ => 67,
            AnInstruction::AssertEq => 68,
            AnInstruction::AssertEqW => 69,
            AnInstruction::Nop => 70,
            AnInstruction::Branch(_) => 71,
            AnInstruction::Jump(_) => 72,
            AnInstruction::Exec(_) => 73,
            AnInstruction::Return => 74,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            AnInstruction::Add | AnInstruction::AddImm(_) => "add",
            AnInstruction::Sub | AnInstruction::SubImm(_) => "sub",
            AnInstruction::Mul | AnInstruction::MulImm(_) => "mul",
            AnInstruction::Div | AnInstruction::DivImm(_) => "div",
            AnInstruction::Neg => "neg",
            AnInstruction::Inv => "inv",
            AnInstruction::Incr => "incr",
            AnInstruction::Pow2 => "pow2",
            AnInstruction::Exp => "exp",
            AnInstruction::Eq | AnInstruction::EqImm(_) => "eq",
            AnInstruction::Neq | AnInstruction::NeqImm(_) => "neq",
            AnInstruction::Lt => "lt",
            AnInstruction::Lte => "lte",
            AnInstruction::Gt => "gt",
            AnInstruction::Gte => "gte",
            AnInstruction::IsOdd => "is_odd",
            AnInstruction::EqW => "eqw",
            AnInstruction::Not => "not",
            AnInstruction::And => "and",
            AnInstruction::Or => "or",
            AnInstruction::Xor => "xor",
            AnInstruction::Drop => "drop",
            AnInstruction::DropW => "dropw",
            AnInstruction::PadW => "padw",
            AnInstruction::Dup(_) => "dup",
            AnInstruction::DupW(_) => "dupw",
            AnInstruction::Swap(_) => "swap",
            AnInstruction::SwapW(_) => "swapw",
            AnInstruction::SwapDW => "swapdw",
            AnInstruction::MovUp(_) => "movup",
            AnInstruction::MovDn(_) => "movdn",
            AnInstruction::MovUpW(_) => "movupw",
            AnInstruction::MovDnW(_) => "movdnw",
            AnInstruction::CSwap => "cswap",
            AnInstruction::CSwapW => "cswapw",
            AnInstruction::CDrop => "cdrop",
            AnInstruction::CDropW => "cdropw",
            AnInstruction::Push(_) => "push",
            AnInstruction::MemLoad | AnInstruction::MemLoadImm(_) => "mem_load",
            AnInstruction::MemLoadW | AnInstruction::MemLoadWImm(_) => "mem_loadw",
            AnInstruction::MemStore | AnInstruction::MemStoreImm(_) => "mem_store",
            AnInstruction::MemStoreW | AnInstruction::MemStoreWImm(_) => "mem_storew",
            AnInstruction::AdvPush(_) => "adv_push",
            AnInstruction::AdvLoadW => "adv_loadw",
            AnInstruction::AdvPushMapVal => "adv.push_mapval",
            AnInstruction::AdvPushMtNode => "adv.push_mtnode",
            AnInstruction::SDepth => "sdepth",
            AnInstruction::Clk => "clk",
            AnInstruction::Hash => "hash",
            AnInstruction::HMerge => "hmerge",
            AnInstruction::HPerm => "hperm",
            AnInstruction::MTreeGet => "mtree_get",
            AnInstruction::MTreeSet => "mtree_set",
            AnInstruction::MTreeCwm => "mtree_cwm",
            AnInstruction::MTreeMerge => "mtree_merge",
            AnInstruction::MTreeVerify => "mtree_verify",
            AnInstruction::Assert => "assert",
            AnInstruction::AssertZ => "assertz",
            AnInstruction::AssertEq => "assert_eq",
            AnInstruction::AssertEqW => "assert_eqw",
            AnInstruction::Nop => "nop",
            AnInstruction::Branch(_) => "branch",
            AnInstruction::Jump(_) => "jump",
            AnInstruction::Exec(_) => "exec",
            AnInstruction::Return => "return",
        }
    }

    pub const fn opcode_b(&self) -> BFieldElement {
        BFieldElement::new(self.opcode() as u64)
    }

    /// The net change in operand stack depth caused by executing the
    /// instruction, ignoring the minimum depth of the stack.
    pub const fn op_stack_size_influence(&self) -> i32 {
        match self {
            AnInstruction::Add | AnInstruction::Sub => -1,
            AnInstruction::Mul | AnInstruction::Div => -1,
            AnInstruction::AddImm(_) | AnInstruction::SubImm(_) => 0,
            AnInstruction::MulImm(_) | AnInstruction::DivImm(_) => 0,
            AnInstruction::Neg | AnInstruction::Inv => 0,
            AnInstruction::Incr | AnInstruction::Pow2 => 0,
            AnInstruction::Exp => -1,
            AnInstruction::Eq | AnInstruction::Neq => -1,
            AnInstruction::EqImm(_) | AnInstruction::NeqImm(_) => 0,
            AnInstruction::Lt | AnInstruction::Lte => -1,
            AnInstruction::Gt | AnInstruction::Gte => -1,
            AnInstruction::IsOdd => 0,
            AnInstruction::EqW => 1,
            AnInstruction::Not => 0,
            AnInstruction::And | AnInstruction::Or | AnInstruction::Xor => -1,
            AnInstruction::Drop => -1,
            AnInstruction::DropW => -4,
            AnInstruction::PadW => 4,
            AnInstruction::Dup(_) => 1,
            AnInstruction::DupW(_) => 4,
            AnInstruction::Swap(_) | AnInstruction::SwapW(_) | AnInstruction::SwapDW => 0,
            AnInstruction::MovUp(_) | AnInstruction::MovDn(_) => 0,
            AnInstruction::MovUpW(_) | AnInstruction::MovDnW(_) => 0,
            AnInstruction::CSwap => -1,
            AnInstruction::CSwapW => -1,
            AnInstruction::CDrop => -2,
            AnInstruction::CDropW => -5,
            AnInstruction::Push(_) => 1,
            AnInstruction::MemLoad => 0,
            AnInstruction::MemLoadImm(_) => 1,
            AnInstruction::MemLoadW => -1,
            AnInstruction::MemLoadWImm(_) => 0,
            AnInstruction::MemStore => -2,
            AnInstruction::MemStoreImm(_) => -1,
            AnInstruction::MemStoreW => -1,
            AnInstruction::MemStoreWImm(_) => 0,
            AnInstruction::AdvPush(n) => n.num_elements() as i32,
            AnInstruction::AdvLoadW => 0,
            AnInstruction::AdvPushMapVal => 0,
            AnInstruction::AdvPushMtNode => 0,
            AnInstruction::SDepth | AnInstruction::Clk => 1,
            AnInstruction::Hash => 0,
            AnInstruction::HMerge => -4,
            AnInstruction::HPerm => 0,
            AnInstruction::MTreeGet => 2,
            AnInstruction::MTreeSet => -2,
            AnInstruction::MTreeCwm => 2,
            AnInstruction::MTreeMerge => -4,
            AnInstruction::MTreeVerify => 0,
            AnInstruction::Assert | AnInstruction::AssertZ => -1,
            AnInstruction::AssertEq => -2,
            AnInstruction::AssertEqW => -8,
            AnInstruction::Nop => 0,
            AnInstruction::Branch(_) => -1,
            AnInstruction::Jump(_) | AnInstruction::Exec(_) | AnInstruction::Return => 0,
        }
    }

    /// Whether the instruction changes the instruction pointer in any way other
    /// than advancing it by one.
    pub const fn is_control_flow(&self) -> bool {
        matches!(
            self,
            AnInstruction::Branch(_)
                | AnInstruction::Jump(_)
                | AnInstruction::Exec(_)
                | AnInstruction::Return
        )
    }

    pub fn map_call_address<F, NewDest>(&self, f: F) -> AnInstruction<NewDest>
    where
        F: FnOnce(&Dest) -> NewDest,
        NewDest: PartialEq + Default,
    {
        match self {
            AnInstruction::Add => AnInstruction::Add,
            AnInstruction::AddImm(x) => AnInstruction::AddImm(*x),
            AnInstruction::Sub => AnInstruction::Sub,
            AnInstruction::SubImm(x) => AnInstruction::SubImm(*x),
            AnInstruction::Mul => AnInstruction::Mul,
            AnInstruction::MulImm(x) => AnInstruction::MulImm(*x),
            AnInstruction::Div => AnInstruction::Div,
            AnInstruction::DivImm(x) => AnInstruction::DivImm(*x),
            AnInstruction::Neg => AnInstruction::Neg,
            AnInstruction::Inv => AnInstruction::Inv,
            AnInstruction::Incr => AnInstruction::Incr,
            AnInstruction::Pow2 => AnInstruction::Pow2,
            AnInstruction::Exp => AnInstruction::Exp,
            AnInstruction::Eq => AnInstruction::Eq,
            AnInstruction::EqImm(x) => AnInstruction::EqImm(*x),
            AnInstruction::Neq => AnInstruction::Neq,
            AnInstruction::NeqImm(x) => AnInstruction::NeqImm(*x),
            AnInstruction::Lt => AnInstruction::Lt,
            AnInstruction::Lte => AnInstruction::Lte,
            AnInstruction::Gt => AnInstruction::Gt,
            AnInstruction::Gte => AnInstruction::Gte,
            AnInstruction::IsOdd => AnInstruction::IsOdd,
            AnInstruction::EqW => AnInstruction::EqW,
            AnInstruction::Not => AnInstruction::Not,
            AnInstruction::And => AnInstruction::And,
            AnInstruction::Or => AnInstruction::Or,
            AnInstruction::Xor => AnInstruction::Xor,
            AnInstruction::Drop => AnInstruction::Drop,
            AnInstruction::DropW => AnInstruction::DropW,
            AnInstruction::PadW => AnInstruction::PadW,
            AnInstruction::Dup(x) => AnInstruction::Dup(*x),
            AnInstruction::DupW(x) => AnInstruction::DupW(*x),
            AnInstruction::Swap(x) => AnInstruction::Swap(*x),
            AnInstruction::SwapW(x) => AnInstruction::SwapW(*x),
            AnInstruction::SwapDW => AnInstruction::SwapDW,
            AnInstruction::MovUp(x) => AnInstruction::MovUp(*x),
            AnInstruction::MovDn(x) => AnInstruction::MovDn(*x),
            AnInstruction::MovUpW(x) => AnInstruction::MovUpW(*x),
            AnInstruction::MovDnW(x) => AnInstruction::MovDnW(*x),
            AnInstruction::CSwap => AnInstruction::CSwap,
            AnInstruction::CSwapW => AnInstruction::CSwapW,
            AnInstruction::CDrop => AnInstruction::CDrop,
            AnInstruction::CDropW => AnInstruction::CDropW,
            AnInstruction::Push(x) => AnInstruction::Push(*x),
            AnInstruction::MemLoad => AnInstruction::MemLoad,
            AnInstruction::MemLoadImm(x) => AnInstruction::MemLoadImm(*x),
            AnInstruction::MemLoadW => AnInstruction::MemLoadW,
            AnInstruction::MemLoadWImm(x) => AnInstruction::MemLoadWImm(*x),
            AnInstruction::MemStore => AnInstruction::MemStore,
            AnInstruction::MemStoreImm(x) => AnInstruction::MemStoreImm(*x),
            AnInstruction::MemStoreW => AnInstruction::MemStoreW,
            AnInstruction::MemStoreWImm(x) => AnInstruction::MemStoreWImm(*x),
            AnInstruction::AdvPush(x) => AnInstruction::AdvPush(*x),
            AnInstruction::AdvLoadW => AnInstruction::AdvLoadW,
            AnInstruction::AdvPushMapVal => AnInstruction::AdvPushMapVal,
            AnInstruction::AdvPushMtNode => AnInstruction::AdvPushMtNode,
            AnInstruction::SDepth => AnInstruction::SDepth,
            AnInstruction::Clk => AnInstruction::Clk,
            AnInstruction::Hash => AnInstruction::Hash,
            AnInstruction::HMerge => AnInstruction::HMerge,
            AnInstruction::HPerm => AnInstruction::HPerm,
            AnInstruction::MTreeGet => AnInstruction::MTreeGet,
            AnInstruction::MTreeSet => AnInstruction::MTreeSet,
            AnInstruction::MTreeCwm => AnInstruction::MTreeCwm,
            AnInstruction::MTreeMerge => AnInstruction::MTreeMerge,
            AnInstruction::MTreeVerify => AnInstruction::MTreeVerify,
            AnInstruction::Assert => AnInstruction::Assert,
            AnInstruction::AssertZ => AnInstruction::AssertZ,
            AnInstruction::AssertEq => AnInstruction::AssertEq,
            AnInstruction::AssertEqW => AnInstruction::AssertEqW,
            AnInstruction::Nop => AnInstruction::Nop,
            AnInstruction::Branch(label) => AnInstruction::Branch(f(label)),
            AnInstruction::Jump(label) => AnInstruction::Jump(f(label)),
            AnInstruction::Exec(label) => AnInstruction::Exec(f(label)),
            AnInstruction::Return => AnInstruction::Return,
        }
    }
}

impl<Dest: Display + PartialEq + Default> Display for AnInstruction<Dest> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.name())?;
        match self {
            AnInstruction::AddImm(arg)
            | AnInstruction::SubImm(arg)
            | AnInstruction::MulImm(arg)
            | AnInstruction::DivImm(arg)
            | AnInstruction::EqImm(arg)
            | AnInstruction::NeqImm(arg)
            | AnInstruction::Push(arg) => write!(f, ".{}", arg.value()),
            AnInstruction::Dup(arg)
            | AnInstruction::Swap(arg)
            | AnInstruction::MovUp(arg)
            | AnInstruction::MovDn(arg) => write!(f, ".{arg}"),
            AnInstruction::DupW(arg)
            | AnInstruction::SwapW(arg)
            | AnInstruction::MovUpW(arg)
            | AnInstruction::MovDnW(arg) => write!(f, ".{arg}"),
            AnInstruction::MemLoadImm(arg)
            | AnInstruction::MemLoadWImm(arg)
            | AnInstruction::MemStoreImm(arg)
            | AnInstruction::MemStoreWImm(arg) => write!(f, ".{arg}"),
            AnInstruction::AdvPush(arg) => write!(f, ".{arg}"),
            AnInstruction::Branch(arg) | AnInstruction::Jump(arg) | AnInstruction::Exec(arg) => {
                write!(f, ".{arg}")
            }
            _ => Ok(()),
        }
    }
}

impl Instruction {
    /// Get the argument of the instruction, if it has one.
    pub fn arg(&self) -> Option<BFieldElement> {
        match self {
            AnInstruction::AddImm(arg)
            | AnInstruction::SubImm(arg)
            | AnInstruction::MulImm(arg)
            | AnInstruction::DivImm(arg)
            | AnInstruction::EqImm(arg)
            | AnInstruction::NeqImm(arg)
            | AnInstruction::Push(arg) => Some(*arg),
            AnInstruction::Dup(arg)
            | AnInstruction::Swap(arg)
            | AnInstruction::MovUp(arg)
            | AnInstruction::MovDn(arg) => Some((*arg).into()),
            AnInstruction::DupW(arg)
            | AnInstruction::SwapW(arg)
            | AnInstruction::MovUpW(arg)
            | AnInstruction::MovDnW(arg) => Some((*arg).into()),
            AnInstruction::MemLoadImm(arg)
            | AnInstruction::MemLoadWImm(arg)
            | AnInstruction::MemStoreImm(arg)
            | AnInstruction::MemStoreWImm(arg) => Some(bfe!(*arg)),
            AnInstruction::AdvPush(arg) => Some((*arg).into()),
            AnInstruction::Branch(arg) | AnInstruction::Jump(arg) | AnInstruction::Exec(arg) => {
                Some(bfe!(*arg as u64))
            }
            _ => None,
        }
    }

    /// Number of field elements required to represent the instruction.
    pub fn size(&self) -> usize {
        if self.arg().is_some() { 2 } else { 1 }
    }
}
