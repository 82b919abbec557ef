use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::sync::Arc;

use arbitrary::Arbitrary;
use isa::instruction::AnInstruction;
use isa::instruction::Instruction;
use isa::op_stack::NUM_OP_STACK_REGISTERS;
use isa::op_stack::WORD_SIZE;
use isa::program::Program;
use itertools::Itertools;
use num_traits::ConstOne;
use num_traits::ConstZero;
use serde::Deserialize;
use serde::Serialize;
use strum::Display as StrumDisplay;
use tracing::info;
use tracing::warn;
use twenty_first::prelude::*;

use crate::Word;
use crate::advice::AdviceProvider;
use crate::error::AdviceError;
use crate::error::AssertionError;
use crate::error::ExecutionError;
use crate::field;
use crate::field::ZERO_WORD;
use crate::hash;
use crate::memory::Memory;
use crate::stack::INITIAL_OVERFLOW_ADDRESS;
use crate::stack::OpStack;

type Result<T> = std::result::Result<T, ExecutionError>;

/// The number of field elements in one row of the execution trace, as
/// produced by [`VMState::to_trace_row`].
pub const TRACE_ROW_WIDTH: usize = 3 + NUM_OP_STACK_REGISTERS;

/// Limits imposed on a single execution.
#[derive(
    Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Arbitrary,
)]
pub struct ExecutionOptions {
    /// The maximal number of instructions to execute. Unlimited if `None`.
    pub max_cycles: Option<u32>,
}

#[derive(
    Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, StrumDisplay,
)]
pub enum RunStatus {
    #[default]
    Ready,
    Running,
    Halted,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Halted | Self::Failed)
    }
}

/// The complete state of a machine. Owned by whoever drives the execution;
/// advanced one instruction at a time through [`step`](Self::step).
#[derive(Debug, Clone, PartialEq)]
pub struct VMState {
    /// The program being executed. Read-only, and shared between all states
    /// derived from the same initial state.
    pub program: Arc<Program>,

    pub op_stack: OpStack,

    pub memory: Memory,

    /// Source of all non-deterministic input.
    pub advice: AdviceProvider,

    /// Return addresses of the procedures currently being executed.
    pub call_stack: Vec<usize>,

    /// The number of instructions executed so far.
    pub cycle_count: u32,

    /// Address of the next instruction to execute.
    pub instruction_pointer: usize,

    pub status: RunStatus,

    pub options: ExecutionOptions,
}

impl VMState {
    /// A machine ready to execute the given program. The first element of the
    /// initial stack ends up on top.
    pub fn new(
        program: impl Into<Arc<Program>>,
        initial_stack: &[BFieldElement],
        advice: AdviceProvider,
    ) -> Self {
        let program = program.into();
        let instruction_pointer = program.entry_point();
        let mut state = Self {
            program,
            op_stack: OpStack::new(initial_stack),
            memory: Memory::default(),
            advice,
            call_stack: vec![],
            cycle_count: 0,
            instruction_pointer,
            status: RunStatus::Ready,
            options: ExecutionOptions::default(),
        };
        if state.current_instruction().is_none() {
            state.status = RunStatus::Halted;
        }
        state
    }

    #[must_use]
    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn current_instruction(&self) -> Option<Instruction> {
        self.program.instruction(self.instruction_pointer)
    }

    /// Execute instructions until the machine halts or fails.
    pub fn run(&mut self) -> Result<()> {
        while !self.is_terminal() {
            self.step()?;
        }
        Ok(())
    }

    /// Execute exactly one instruction, advancing the clock by one.
    ///
    /// Any error is terminal: the machine transitions to
    /// [`Failed`](RunStatus::Failed) and refuses to execute anything else.
    pub fn step(&mut self) -> Result<()> {
        if self.is_terminal() {
            return Err(ExecutionError::MachineStopped);
        }
        let Some(instruction) = self.current_instruction() else {
            self.halt();
            return Ok(());
        };
        if let Err(err) = self.guarded_execute(instruction) {
            warn!(
                cycle_count = self.cycle_count,
                instruction = %instruction,
                "execution failed: {err}"
            );
            self.status = RunStatus::Failed;
            return Err(err);
        }

        self.cycle_count += 1;
        if self.instruction_pointer >= self.program.len() {
            self.halt();
        }
        Ok(())
    }

    fn halt(&mut self) {
        self.status = RunStatus::Halted;
        info!(cycle_count = self.cycle_count, "program halted");
    }

    fn guarded_execute(&mut self, instruction: Instruction) -> Result<()> {
        let max_cycles = self.options.max_cycles.unwrap_or(u32::MAX);
        if self.cycle_count >= max_cycles {
            return Err(ExecutionError::CycleLimitExceeded(max_cycles));
        }

        self.status = RunStatus::Running;
        self.op_stack.set_clock(u64::from(self.cycle_count) + 1);
        self.execute(instruction)?;
        if !instruction.is_control_flow() {
            self.instruction_pointer += 1;
        }
        Ok(())
    }

    fn execute(&mut self, instruction: Instruction) -> Result<()> {
        match instruction {
            AnInstruction::Add => self.binary_op(|a, b| Ok(a + b))?,
            AnInstruction::AddImm(x) => self.unary_op(|a| Ok(a + x))?,
            AnInstruction::Sub => self.binary_op(|a, b| Ok(a - b))?,
            AnInstruction::SubImm(x) => self.unary_op(|a| Ok(a - x))?,
            AnInstruction::Mul => self.binary_op(|a, b| Ok(a * b))?,
            AnInstruction::MulImm(x) => self.unary_op(|a| Ok(a * x))?,
            AnInstruction::Div => self.binary_op(|a, b| Ok(field::div(a, b)?))?,
            AnInstruction::DivImm(x) => self.unary_op(|a| Ok(field::div(a, x)?))?,
            AnInstruction::Neg => self.unary_op(|a| Ok(-a))?,
            AnInstruction::Inv => self.unary_op(|a| Ok(field::inverse(a)?))?,
            AnInstruction::Incr => self.unary_op(|a| Ok(a + BFieldElement::ONE))?,
            AnInstruction::Pow2 => self.unary_op(|a| Ok(field::pow2(a)?))?,
            AnInstruction::Exp => self.binary_op(|base, exp| Ok(field::exp(base, exp)))?,
            AnInstruction::Eq => self.binary_op(|a, b| Ok(field::from_bool(a == b)))?,
            AnInstruction::EqImm(x) => self.unary_op(|a| Ok(field::from_bool(a == x)))?,
            AnInstruction::Neq => self.binary_op(|a, b| Ok(field::from_bool(a != b)))?,
            AnInstruction::NeqImm(x) => self.unary_op(|a| Ok(field::from_bool(a != x)))?,
            AnInstruction::Lt => self.binary_op(|a, b| Ok(field::from_bool(field::lt(a, b))))?,
            AnInstruction::Lte => self.binary_op(|a, b| Ok(field::from_bool(!field::lt(b, a))))?,
            AnInstruction::Gt => self.binary_op(|a, b| Ok(field::from_bool(field::lt(b, a))))?,
            AnInstruction::Gte => self.binary_op(|a, b| Ok(field::from_bool(!field::lt(a, b))))?,
            AnInstruction::IsOdd => self.unary_op(|a| Ok(field::from_bool(field::is_odd(a))))?,
            AnInstruction::EqW => self.eqw()?,
            AnInstruction::Not => self.unary_op(|a| Ok(field::from_bool(!field::to_bool(a)?)))?,
            AnInstruction::And => self.boolean_op(|a, b| a && b)?,
            AnInstruction::Or => self.boolean_op(|a, b| a || b)?,
            AnInstruction::Xor => self.boolean_op(|a, b| a ^ b)?,
            AnInstruction::Drop => {
                self.op_stack.pop();
            }
            AnInstruction::DropW => {
                self.op_stack.pop_word();
            }
            AnInstruction::PadW => self.op_stack.push_word(ZERO_WORD),
            AnInstruction::Dup(st) => self.op_stack.dup(st.index())?,
            AnInstruction::DupW(w) => self.op_stack.dup_word(w.index())?,
            AnInstruction::Swap(st) => self.op_stack.swap(st.index())?,
            AnInstruction::SwapW(w) => self.op_stack.swap_words(0, w.index())?,
            AnInstruction::SwapDW => self.swapdw()?,
            AnInstruction::MovUp(st) => self.op_stack.move_up(st.index())?,
            AnInstruction::MovDn(st) => self.op_stack.move_down(st.index())?,
            AnInstruction::MovUpW(w) => self.op_stack.move_up_word(w.index())?,
            AnInstruction::MovDnW(w) => self.op_stack.move_down_word(w.index())?,
            AnInstruction::CSwap => self.cswap()?,
            AnInstruction::CSwapW => self.cswapw()?,
            AnInstruction::CDrop => self.cdrop()?,
            AnInstruction::CDropW => self.cdropw()?,
            AnInstruction::Push(x) => self.op_stack.push(x),
            AnInstruction::MemLoad => self.mem_load(None)?,
            AnInstruction::MemLoadImm(address) => self.mem_load(Some(address))?,
            AnInstruction::MemLoadW => self.mem_loadw(None)?,
            AnInstruction::MemLoadWImm(address) => self.mem_loadw(Some(address))?,
            AnInstruction::MemStore => self.mem_store(None)?,
            AnInstruction::MemStoreImm(address) => self.mem_store(Some(address))?,
            AnInstruction::MemStoreW => self.mem_storew(None)?,
            AnInstruction::MemStoreWImm(address) => self.mem_storew(Some(address))?,
            AnInstruction::AdvPush(n) => self.adv_push(n.num_elements())?,
            AnInstruction::AdvLoadW => self.adv_loadw()?,
            AnInstruction::AdvPushMapVal => self.adv_push_mapval()?,
            AnInstruction::AdvPushMtNode => self.adv_push_mtnode()?,
            AnInstruction::SDepth => self.op_stack.push(bfe!(self.op_stack.depth() as u64)),
            AnInstruction::Clk => self.op_stack.push(bfe!(self.cycle_count)),
            AnInstruction::Hash => self.hash(),
            AnInstruction::HMerge => self.hmerge(),
            AnInstruction::HPerm => self.hperm()?,
            AnInstruction::MTreeGet => self.mtree_get()?,
            AnInstruction::MTreeSet => self.mtree_set()?,
            AnInstruction::MTreeCwm => self.mtree_cwm()?,
            AnInstruction::MTreeMerge => self.mtree_merge(),
            AnInstruction::MTreeVerify => self.mtree_verify()?,
            AnInstruction::Assert => self.assert_top(BFieldElement::ONE)?,
            AnInstruction::AssertZ => self.assert_top(BFieldElement::ZERO)?,
            AnInstruction::AssertEq => self.assert_eq()?,
            AnInstruction::AssertEqW => self.assert_eqw()?,
            AnInstruction::Nop => (),
            AnInstruction::Branch(address) => self.branch(address)?,
            AnInstruction::Jump(address) => self.instruction_pointer = address,
            AnInstruction::Exec(address) => self.exec(address),
            AnInstruction::Return => self.return_from_procedure()?,
        }
        Ok(())
    }

    /// Pops `a` and pushes `f(a)`.
    fn unary_op<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(BFieldElement) -> Result<BFieldElement>,
    {
        let a = self.op_stack.pop();
        self.op_stack.push(f(a)?);
        Ok(())
    }

    /// Pops `b`, then `a`, and pushes `f(a, b)`.
    fn binary_op<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(BFieldElement, BFieldElement) -> Result<BFieldElement>,
    {
        let [b, a] = self.op_stack.pop_multiple();
        self.op_stack.push(f(a, b)?);
        Ok(())
    }

    fn boolean_op(&mut self, f: impl FnOnce(bool, bool) -> bool) -> Result<()> {
        self.binary_op(|a, b| {
            let (a, b) = (field::to_bool(a)?, field::to_bool(b)?);
            Ok(field::from_bool(f(a, b)))
        })
    }

    fn pop_bool(&mut self) -> Result<bool> {
        Ok(field::to_bool(self.op_stack.pop())?)
    }

    fn pop_u64(&mut self) -> u64 {
        self.op_stack.pop().value()
    }

    fn eqw(&mut self) -> Result<()> {
        let b = self.op_stack.peek_word(0)?;
        let a = self.op_stack.peek_word(1)?;
        self.op_stack.push(field::from_bool(a == b));
        Ok(())
    }

    fn swapdw(&mut self) -> Result<()> {
        self.op_stack.swap_words(0, 2)?;
        self.op_stack.swap_words(1, 3)?;
        Ok(())
    }

    fn cswap(&mut self) -> Result<()> {
        if self.pop_bool()? {
            self.op_stack.swap(1)?;
        }
        Ok(())
    }

    fn cswapw(&mut self) -> Result<()> {
        if self.pop_bool()? {
            self.op_stack.swap_words(0, 1)?;
        }
        Ok(())
    }

    fn cdrop(&mut self) -> Result<()> {
        let condition = self.pop_bool()?;
        let [b, a] = self.op_stack.pop_multiple();
        self.op_stack.push(if condition { b } else { a });
        Ok(())
    }

    fn cdropw(&mut self) -> Result<()> {
        let condition = self.pop_bool()?;
        let b = self.op_stack.pop_word();
        let a = self.op_stack.pop_word();
        self.op_stack.push_word(if condition { b } else { a });
        Ok(())
    }

    fn address(&mut self, immediate: Option<u32>) -> u64 {
        match immediate {
            Some(address) => u64::from(address),
            None => self.pop_u64(),
        }
    }

    fn mem_load(&mut self, immediate: Option<u32>) -> Result<()> {
        let address = self.address(immediate);
        let element = self.memory.load_element(address)?;
        self.op_stack.push(element);
        Ok(())
    }

    /// Overwrites the top word with the word loaded from memory.
    fn mem_loadw(&mut self, immediate: Option<u32>) -> Result<()> {
        let address = self.address(immediate);
        let word = self.memory.load_word(address)?;
        self.op_stack.pop_word();
        self.op_stack.push_word(word);
        Ok(())
    }

    fn mem_store(&mut self, immediate: Option<u32>) -> Result<()> {
        let address = self.address(immediate);
        let element = self.op_stack.pop();
        self.memory.store_element(address, element)?;
        Ok(())
    }

    /// Stores the top word in memory, leaving it on the stack.
    fn mem_storew(&mut self, immediate: Option<u32>) -> Result<()> {
        let address = self.address(immediate);
        let word = self.op_stack.peek_word(0)?;
        self.memory.store_word(address, word)?;
        Ok(())
    }

    fn adv_push(&mut self, num_elements: usize) -> Result<()> {
        let available = self.advice.tape_len();
        if available < num_elements {
            let requested = num_elements;
            let err = AdviceError::TapeExhausted {
                requested,
                available,
            };
            return Err(err.into());
        }
        for _ in 0..num_elements {
            let element = self.advice.pop_tape()?;
            self.op_stack.push(element);
        }
        Ok(())
    }

    fn adv_loadw(&mut self) -> Result<()> {
        let word = self.advice.pop_tape_word()?;
        self.op_stack.pop_word();
        self.op_stack.push_word(word);
        Ok(())
    }

    fn adv_push_mapval(&mut self) -> Result<()> {
        let key = self.op_stack.peek_word(0)?;
        let values = self.advice.get_mapped_values(key)?.to_vec();
        self.advice.push_front_tape(&values);
        Ok(())
    }

    fn adv_push_mtnode(&mut self) -> Result<()> {
        let depth = self.op_stack.peek(0)?.value();
        let index = self.op_stack.peek(1)?.value();
        let root = self.peek_word_at(2)?;
        let node = self.advice.get_node(root, depth, index)?;
        self.advice.push_front_tape(&node);
        Ok(())
    }

    /// The word starting at the given stack position, which need not be
    /// aligned to a word boundary.
    fn peek_word_at(&self, first_index: usize) -> Result<Word> {
        let mut word = ZERO_WORD;
        for (i, element) in word.iter_mut().enumerate() {
            *element = self.op_stack.peek(first_index + i)?;
        }
        Ok(word)
    }

    fn hash(&mut self) {
        let word = self.op_stack.pop_word();
        self.op_stack.push_word(hash::hash1(word));
    }

    fn hmerge(&mut self) {
        let b = self.op_stack.pop_word();
        let a = self.op_stack.pop_word();
        self.op_stack.push_word(hash::hash2(a, b));
    }

    fn hperm(&mut self) -> Result<()> {
        let state = std::array::from_fn(|i| self.op_stack[i]);
        for (i, element) in hash::permute(state).into_iter().enumerate() {
            self.op_stack.set(i, element)?;
        }
        Ok(())
    }

    fn pop_merkle_coordinates(&mut self) -> (u64, u64) {
        let depth = self.pop_u64();
        let index = self.pop_u64();
        (depth, index)
    }

    fn mtree_get(&mut self) -> Result<()> {
        let (depth, index) = self.pop_merkle_coordinates();
        let root = self.op_stack.peek_word(0)?;
        let node = self.advice.get_node(root, depth, index)?;
        self.op_stack.push_word(node);
        Ok(())
    }

    fn mtree_set(&mut self) -> Result<()> {
        let (depth, index) = self.pop_merkle_coordinates();
        let root = self.op_stack.pop_word();
        let new_node = self.op_stack.pop_word();
        let (old_node, new_root) = self.advice.set_node(root, depth, index, new_node)?;
        self.op_stack.push_word(new_root);
        self.op_stack.push_word(old_node);
        Ok(())
    }

    fn mtree_cwm(&mut self) -> Result<()> {
        let (depth, index) = self.pop_merkle_coordinates();
        let root = self.op_stack.pop_word();
        let new_node = self.op_stack.pop_word();
        let (old_node, new_root) = self
            .advice
            .copy_and_set_node(root, depth, index, new_node)?;
        self.op_stack.push_word(root);
        self.op_stack.push_word(new_root);
        self.op_stack.push_word(old_node);
        Ok(())
    }

    fn mtree_merge(&mut self) {
        let right_root = self.op_stack.pop_word();
        let left_root = self.op_stack.pop_word();
        let root = self.advice.merge_roots(left_root, right_root);
        self.op_stack.push_word(root);
    }

    fn mtree_verify(&mut self) -> Result<()> {
        let expected = self.op_stack.peek_word(0)?;
        let depth = self.op_stack.peek(WORD_SIZE)?.value();
        let index = self.op_stack.peek(WORD_SIZE + 1)?.value();
        let root = self.peek_word_at(WORD_SIZE + 2)?;
        let node = self.advice.get_node(root, depth, index)?;
        if node != expected {
            let err = AdviceError::LeafMismatch {
                depth,
                index,
                expected,
            };
            return Err(err.into());
        }
        Ok(())
    }

    fn assert_top(&mut self, expected: BFieldElement) -> Result<()> {
        let actual = self.op_stack.pop();
        if actual != expected {
            return Err(AssertionError::new(expected, actual).into());
        }
        Ok(())
    }

    fn assert_eq(&mut self) -> Result<()> {
        let [b, a] = self.op_stack.pop_multiple();
        if a != b {
            return Err(AssertionError::new(b, a).into());
        }
        Ok(())
    }

    fn assert_eqw(&mut self) -> Result<()> {
        let b = self.op_stack.pop_word();
        let a = self.op_stack.pop_word();
        let mismatch = a.into_iter().zip(b).find(|(actual, expected)| actual != expected);
        if let Some((actual, expected)) = mismatch {
            return Err(AssertionError::new(expected, actual).into());
        }
        Ok(())
    }

    /// Pops the condition. Falls through if it is 1, jumps if it is 0.
    fn branch(&mut self, address: usize) -> Result<()> {
        if self.pop_bool()? {
            self.instruction_pointer += 1;
        } else {
            self.instruction_pointer = address;
        }
        Ok(())
    }

    fn exec(&mut self, address: usize) {
        self.call_stack.push(self.instruction_pointer + 1);
        self.instruction_pointer = address;
    }

    fn return_from_procedure(&mut self) -> Result<()> {
        let return_address = self
            .call_stack
            .pop()
            .ok_or(ExecutionError::CallStackEmpty)?;
        self.instruction_pointer = return_address;
        Ok(())
    }

    /// The entire operand stack, top first.
    pub fn stack_output(&self) -> Vec<BFieldElement> {
        self.op_stack.to_vec()
    }

    /// Addresses of the overflow table entries that back the part of the
    /// stack deeper than the register window. The first entry marks the
    /// bottom of the table and is always 0.
    pub fn overflow_addresses(&self) -> Vec<u64> {
        let live_addresses = self.op_stack.overflow_addresses().iter().copied();
        std::iter::once(INITIAL_OVERFLOW_ADDRESS)
            .chain(live_addresses)
            .collect()
    }

    /// The number of rows in the execution trace: one per executed
    /// instruction plus the initial state.
    pub fn trace_len(&self) -> u64 {
        u64::from(self.cycle_count) + 1
    }

    /// The clock, the instruction pointer, the stack depth, and the stack's
    /// register window.
    pub fn to_trace_row(&self) -> [BFieldElement; TRACE_ROW_WIDTH] {
        let mut row = [BFieldElement::ZERO; TRACE_ROW_WIDTH];
        row[0] = bfe!(self.cycle_count);
        row[1] = bfe!(self.instruction_pointer as u64);
        row[2] = bfe!(self.op_stack.depth() as u64);
        for (i, element) in row[3..].iter_mut().enumerate() {
            *element = self.op_stack[i];
        }
        row
    }
}

impl Display for VMState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let instruction = self
            .current_instruction()
            .map_or_else(|| "-".to_string(), |instruction| instruction.to_string());
        writeln!(f, "status:      {}", self.status)?;
        writeln!(f, "clk:         {}", self.cycle_count)?;
        writeln!(f, "ip:          {}", self.instruction_pointer)?;
        writeln!(f, "instruction: {instruction}")?;
        let stack = (0..NUM_OP_STACK_REGISTERS)
            .map(|i| self.op_stack[i].value())
            .join(" ");
        write!(f, "stack:       {stack}")?;
        if self.op_stack.depth() > NUM_OP_STACK_REGISTERS {
            let num_hidden = self.op_stack.depth() - NUM_OP_STACK_REGISTERS;
            write!(f, " (+{num_hidden} more)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use assert2::assert;
    use assert2::let_assert;
    use isa::instruction::ALL_INSTRUCTIONS;
    use isa::instruction::LabelledInstruction;
    use isa::playground_program;
    use proptest::collection::vec;
    use proptest::prelude::*;
    use proptest_arbitrary_interop::arb;
    use test_strategy::proptest;

    use super::*;
    use crate::error::ArithmeticError;
    use crate::merkle::root_from_path;

    fn run_program(program: Program, stack: &[u64]) -> (VMState, Result<()>) {
        let stack = stack.iter().map(|&e| bfe!(e)).collect_vec();
        let mut state = VMState::new(program, &stack, AdviceProvider::default());
        let result = state.run();
        (state, result)
    }

    fn top_of_stack(state: &VMState, n: usize) -> Vec<u64> {
        (0..n).map(|i| state.op_stack[i].value()).collect()
    }

    #[test]
    fn adding_two_numbers_gives_their_sum() {
        let program = playground_program!("begin push.1 push.2 add end");
        let (state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        assert!(RunStatus::Halted == state.status);
        let mut expected = vec![bfe!(3)];
        expected.extend([BFieldElement::ZERO; NUM_OP_STACK_REGISTERS]);
        assert!(expected == state.stack_output());
        assert!(3 == state.cycle_count);
        assert!(4 == state.trace_len());
    }

    #[test]
    fn failing_assertion_moves_machine_into_failed_state() {
        let program = playground_program!("begin push.0 assert push.1 end");
        let (mut state, result) = run_program(program, &[]);
        let_assert!(Err(ExecutionError::Assertion(err)) = result);
        assert!(BFieldElement::ONE == err.expected);
        assert!(BFieldElement::ZERO == err.actual);
        assert!(RunStatus::Failed == state.status);
        assert!(Err(ExecutionError::MachineStopped) == state.step());
    }

    #[test]
    fn empty_main_block_is_halted_from_the_start() {
        let program = playground_program!("begin end");
        let mut state = VMState::new(program, &[], AdviceProvider::default());
        assert!(RunStatus::Halted == state.status);
        assert!(Err(ExecutionError::MachineStopped) == state.step());
        assert!(0 == state.cycle_count);
        let_assert!(Ok(()) = state.run());
    }

    #[test]
    fn non_empty_program_starts_ready() {
        let program = playground_program!("begin nop end");
        let state = VMState::new(program, &[], AdviceProvider::default());
        assert!(RunStatus::Ready == state.status);
    }

    #[test]
    fn exhausted_clock_fails_instead_of_wrapping_around() {
        let program = playground_program!("begin nop nop end");
        let mut state = VMState::new(program, &[], AdviceProvider::default());
        state.cycle_count = u32::MAX;
        let_assert!(Err(ExecutionError::CycleLimitExceeded(u32::MAX)) = state.step());
        assert!(RunStatus::Failed == state.status);
        assert!(u32::MAX == state.cycle_count);
    }

    #[test]
    fn halted_machine_refuses_to_step() {
        let program = playground_program!("begin nop end");
        let (mut state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        assert!(Err(ExecutionError::MachineStopped) == state.step());
    }

    #[proptest]
    fn execution_is_deterministic(
        #[strategy(vec(arb(), 0..20))] stack: Vec<BFieldElement>,
        #[strategy(vec(arb(), 0..20))] tape: Vec<BFieldElement>,
    ) {
        let program = playground_program!(
            "begin
                dup.1 dup.1 mul swap.2 add
                repeat.3 adv_push.1 end
                push.7 mem_store.3 mem_load.3 hash
            end"
        );
        let program = Arc::new(program);
        let mut state_0 = VMState::new(program.clone(), &stack, AdviceProvider::new(tape.clone()));
        let mut state_1 = VMState::new(program, &stack, AdviceProvider::new(tape));
        let result_0 = state_0.run();
        let result_1 = state_1.run();
        prop_assert_eq!(result_0, result_1);
        prop_assert_eq!(state_0, state_1);
    }

    #[test]
    fn subtraction_and_division_take_the_deeper_element_as_left_operand() {
        let program = playground_program!("begin push.10 push.4 sub push.12 push.3 div end");
        let (state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        assert!(vec![4, 6] == top_of_stack(&state, 2));
    }

    #[test]
    fn division_by_zero_fails() {
        let program = playground_program!("begin push.1 push.0 div end");
        let (_, result) = run_program(program, &[]);
        let_assert!(Err(ExecutionError::Arithmetic(ArithmeticError::DivisionByZero)) = result);
    }

    #[test]
    fn comparisons_use_canonical_representatives() {
        let program = playground_program!(
            "begin
                push.2 push.3 lt
                push.3 push.3 lte
                push.3 push.2 gt
                push.2 push.3 gte
                push.18446744069414584320 push.1 gt
            end"
        );
        let (state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        assert!(vec![1, 0, 1, 1, 1] == top_of_stack(&state, 5));
    }

    #[test]
    fn boolean_operations_reject_non_binary_operands() {
        let program = playground_program!("begin push.1 push.2 and end");
        let (_, result) = run_program(program, &[]);
        let_assert!(Err(ExecutionError::Arithmetic(ArithmeticError::NotBinary(_))) = result);

        let program = playground_program!("begin push.1 push.0 xor push.1 or not end");
        let (state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        assert!(vec![0] == top_of_stack(&state, 1));
    }

    #[test]
    fn exp_raises_deeper_element_to_power_of_top_element() {
        let program = playground_program!("begin push.3 push.4 exp push.5 pow2 end");
        let (state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        assert!(vec![32, 81] == top_of_stack(&state, 2));
    }

    #[test]
    fn conditional_drop_and_swap_follow_the_condition() {
        let program = playground_program!(
            "begin
                push.7 push.8 push.1 cdrop
                push.7 push.8 push.0 cdrop
                push.5 push.6 push.1 cswap
            end"
        );
        let (state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        assert!(vec![5, 6, 7, 8] == top_of_stack(&state, 4));
    }

    #[test]
    fn memory_word_instructions_move_words_between_stack_and_memory() {
        let program = playground_program!(
            "begin
                push.4 push.3 push.2 push.1
                mem_storew.10
                dropw
                push.10 mem_loadw
            end"
        );
        let (state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        assert!(vec![1, 2, 3, 4, 0] == top_of_stack(&state, 5));
    }

    #[test]
    fn memory_element_instructions_use_first_element_of_word() {
        let program = playground_program!("begin push.5 push.0 mem_store mem_load.0 push.0 mem_load end");
        let (state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        assert!(vec![5, 5] == top_of_stack(&state, 2));
    }

    #[test]
    fn advice_instructions_read_the_tape_in_order() {
        let program = playground_program!("begin adv_push.2 padw adv_loadw end");
        let tape = (1..=6).map(|e| bfe!(e)).collect_vec();
        let mut state = VMState::new(program, &[], AdviceProvider::new(tape));
        let_assert!(Ok(()) = state.run());
        let top = (0..6).map(|i| state.op_stack[i].value()).collect_vec();
        assert!(vec![3, 4, 5, 6, 2, 1] == top);
    }

    #[test]
    fn exhausted_advice_tape_fails() {
        let program = playground_program!("begin adv_push.3 end");
        let tape = vec![bfe!(1), bfe!(2)];
        let mut state = VMState::new(program, &[], AdviceProvider::new(tape));
        let_assert!(Err(ExecutionError::Advice(AdviceError::TapeExhausted { .. })) = state.run());
    }

    #[test]
    fn mapped_values_are_pushed_to_the_front_of_the_tape() {
        let key = [bfe!(1), bfe!(2), bfe!(3), bfe!(4)];
        let mut advice = AdviceProvider::new(vec![bfe!(99)]);
        advice.insert_into_map(key, vec![bfe!(7), bfe!(8)]);
        let program = playground_program!(
            "begin push.4 push.3 push.2 push.1 adv.push_mapval adv_push.3 end"
        );
        let mut state = VMState::new(program, &[], advice);
        let_assert!(Ok(()) = state.run());
        assert!(vec![99, 8, 7, 1] == top_of_stack(&state, 4));
    }

    /// A machine whose stack holds the given prefix, followed by the
    /// coordinates `(2, 1)` and the root of a tree with four leaves.
    fn state_with_merkle_tree(program: Program, prefix: &[BFieldElement]) -> (VMState, Vec<Word>, Word) {
        let leaves = (0..4_u64).map(|i| [bfe!(i + 10); 4]).collect_vec();
        let mut advice = AdviceProvider::default();
        let root = advice.merkle_store_mut().add_merkle_tree(&leaves).unwrap();
        let mut stack = prefix.to_vec();
        stack.extend([bfe!(2), bfe!(1)]);
        stack.extend(root);
        let state = VMState::new(program, &stack, advice);
        (state, leaves, root)
    }

    #[test]
    fn mtree_get_pushes_the_requested_leaf() {
        let program = playground_program!("begin mtree_get end");
        let (mut state, leaves, root) = state_with_merkle_tree(program, &[]);
        let_assert!(Ok(()) = state.run());
        let_assert!(Ok(leaf) = state.op_stack.peek_word(0));
        let_assert!(Ok(root_again) = state.op_stack.peek_word(1));
        assert!(leaves[1] == leaf);
        assert!(root == root_again);
    }

    #[test]
    fn mtree_set_returns_old_leaf_and_new_root() {
        let program = playground_program!("begin mtree_set end");
        let new_leaf = [bfe!(42); 4];
        let (state, leaves, root) = state_with_merkle_tree(program, &[]);
        let mut stack = vec![bfe!(2), bfe!(1)];
        stack.extend(root);
        stack.extend(new_leaf);
        let mut state = VMState::new(state.program, &stack, state.advice);
        let_assert!(Ok(()) = state.run());
        let_assert!(Ok(old_leaf) = state.op_stack.peek_word(0));
        let_assert!(Ok(new_root) = state.op_stack.peek_word(1));
        assert!(leaves[1] == old_leaf);
        let_assert!(Ok(path) = state.advice.get_merkle_path(new_root, 2, 1));
        assert!(new_root == root_from_path(new_leaf, 1, &path));
        assert!(Ok(leaves[1]) == state.advice.get_node(root, 2, 1));
    }

    #[test]
    fn mtree_get_with_unknown_root_fails() {
        let program = playground_program!("begin push.0 push.1 mtree_get end");
        let (_, result) = run_program(program, &[]);
        let_assert!(Err(ExecutionError::Advice(AdviceError::UnknownMerkleRoot(_))) = result);
    }

    #[test]
    fn mtree_verify_checks_the_leaf() {
        let program = playground_program!("begin mtree_verify end");
        let leaf = [bfe!(11); 4];
        let (mut state, _, _) = state_with_merkle_tree(program.clone(), &leaf);
        let_assert!(Ok(()) = state.run());
        assert!(Ok(leaf) == state.op_stack.peek_word(0));

        let wrong_leaf = [bfe!(12); 4];
        let (mut state, _, _) = state_with_merkle_tree(program, &wrong_leaf);
        let_assert!(Err(ExecutionError::Advice(AdviceError::LeafMismatch { .. })) = state.run());
    }

    #[test]
    fn hmerge_equals_hash2_of_deeper_and_top_word() {
        let program = playground_program!("begin push.1 push.2 push.3 push.4 padw hmerge end");
        let (state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        let a = [bfe!(4), bfe!(3), bfe!(2), bfe!(1)];
        let expected = hash::hash2(a, ZERO_WORD);
        let_assert!(Ok(top_word) = state.op_stack.peek_word(0));
        assert!(expected == top_word);
    }

    #[test]
    fn procedures_return_to_their_call_site() {
        let program = playground_program!(
            "proc.double dup.0 add end
            begin push.3 exec.double exec.double end"
        );
        let (state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        assert!(vec![12] == top_of_stack(&state, 1));
        assert!(state.call_stack.is_empty());
    }

    #[test]
    fn while_loop_counts_down() {
        let program = playground_program!(
            "begin
                push.5 push.1
                while.true
                    sub.1 dup.0 neq.0
                end
            end"
        );
        let (state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        assert!(vec![0, 0] == top_of_stack(&state, 2));
    }

    #[test]
    fn if_else_picks_the_branch_by_condition() {
        let program = playground_program!(
            "begin
                push.1 if.true push.10 else push.20 end
                push.0 if.true push.30 else push.40 end
            end"
        );
        let (state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        assert!(vec![40, 10] == top_of_stack(&state, 2));
    }

    #[test]
    fn cycle_limit_is_enforced() {
        let program = playground_program!("begin repeat.10 nop end end");
        let options = ExecutionOptions {
            max_cycles: Some(5),
        };
        let mut state =
            VMState::new(program, &[], AdviceProvider::default()).with_options(options);
        let_assert!(Err(ExecutionError::CycleLimitExceeded(5)) = state.run());
        assert!(5 == state.cycle_count);
    }

    #[test]
    fn deep_stacks_produce_overflow_addresses() {
        let program = playground_program!("begin push.1 push.2 drop end");
        let (state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        assert!(17 == state.stack_output().len());
        assert!(vec![0, 1] == state.overflow_addresses());
    }

    #[test]
    fn sdepth_and_clk_report_the_machine_state() {
        let program = playground_program!("begin nop push.1 sdepth clk end");
        let (state, result) = run_program(program, &[]);
        let_assert!(Ok(()) = result);
        assert!(vec![3, 17, 1] == top_of_stack(&state, 3));
    }

    #[test]
    fn instructions_change_stack_depth_as_declared() {
        let ones = vec![BFieldElement::ONE; 40];
        for instruction in ALL_INSTRUCTIONS {
            if instruction.is_control_flow() {
                continue;
            }
            let labelled_instruction =
                LabelledInstruction::Instruction(instruction.map_call_address(|_| String::new()));
            let program = Program::new(&[labelled_instruction]).unwrap();
            let advice = AdviceProvider::new(ones.clone());
            let mut state = VMState::new(program, &ones, advice);
            if state.step().is_err() {
                continue;
            }
            let expected_depth = 40 + instruction.op_stack_size_influence();
            assert!(expected_depth == state.op_stack.depth() as i32, "{instruction}");
        }
    }

    #[test]
    fn displaying_a_state_shows_the_next_instruction() {
        let program = playground_program!("begin push.1 push.2 end");
        let state = VMState::new(program, &[], AdviceProvider::default());
        let display = state.to_string();
        assert!(display.contains("instruction: push.1"));
        assert!(display.contains("status:      Ready"));
    }
}
