use std::ops::Index;

use isa::op_stack::NUM_OP_STACK_REGISTERS;
use isa::op_stack::OpStackElement;
use isa::op_stack::WORD_SIZE;
use num_traits::ConstZero;
use serde::Deserialize;
use serde::Serialize;
use twenty_first::prelude::*;

use crate::Word;
use crate::error::StackError;

type Result<T> = std::result::Result<T, StackError>;

/// The address given to elements that were already deeper than the register
/// window when execution started.
pub const INITIAL_OVERFLOW_ADDRESS: u64 = 0;

/// An element that was pushed out of the register window, together with the
/// clock cycle in which that happened.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct OverflowEntry {
    pub address: u64,
    pub value: BFieldElement,
}

/// The operand stack. Its depth never drops below [`NUM_OP_STACK_REGISTERS`]:
/// popping at minimum depth yields the top element and shifts a zero in at
/// the bottom.
///
/// Every element pushed below position 15 is recorded in the overflow log.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OpStack {
    /// The underlying, actual stack. Be aware of reversed indexing: while
    /// `op_stack[0]` is the top of the stack, `op_stack.stack[0]` is the lowest
    /// element in the stack.
    stack: Vec<BFieldElement>,

    /// Addresses of the elements below the register window, lowest element
    /// first.
    overflow_addresses: Vec<u64>,

    overflow_log: Vec<OverflowEntry>,
    clock: u64,
}

impl Default for OpStack {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl OpStack {
    /// A stack holding the given elements, the first of which ends up on top.
    /// Missing elements are zeros.
    pub fn new(initial_elements: &[BFieldElement]) -> Self {
        let num_padding_elements = NUM_OP_STACK_REGISTERS.saturating_sub(initial_elements.len());
        let mut stack = vec![BFieldElement::ZERO; num_padding_elements];
        stack.extend(initial_elements.iter().rev());

        let num_overflowing = stack.len() - NUM_OP_STACK_REGISTERS;
        let overflow_log = stack[..num_overflowing]
            .iter()
            .map(|&value| OverflowEntry {
                address: INITIAL_OVERFLOW_ADDRESS,
                value,
            })
            .collect();

        Self {
            stack,
            overflow_addresses: vec![INITIAL_OVERFLOW_ADDRESS; num_overflowing],
            overflow_log,
            clock: 0,
        }
    }

    /// Set the clock cycle used to address elements that overflow from now on.
    pub fn set_clock(&mut self, clock: u64) {
        self.clock = clock;
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push(&mut self, element: BFieldElement) {
        if self.depth() >= NUM_OP_STACK_REGISTERS {
            let displaced = self.stack[self.depth() - NUM_OP_STACK_REGISTERS];
            self.overflow_log.push(OverflowEntry {
                address: self.clock,
                value: displaced,
            });
            self.overflow_addresses.push(self.clock);
        }
        self.stack.push(element);
    }

    pub fn pop(&mut self) -> BFieldElement {
        let top = self.stack.pop().unwrap_or_default();
        if self.depth() >= NUM_OP_STACK_REGISTERS {
            self.overflow_addresses.pop();
        } else {
            self.stack.insert(0, BFieldElement::ZERO);
        }
        top
    }

    pub fn pop_multiple<const N: usize>(&mut self) -> [BFieldElement; N] {
        std::array::from_fn(|_| self.pop())
    }

    pub fn peek(&self, index: usize) -> Result<BFieldElement> {
        self.check_index(index, self.depth())?;
        Ok(self[index])
    }

    /// Overwrite the element at the given index.
    pub fn set(&mut self, index: usize, element: BFieldElement) -> Result<()> {
        self.check_index(index, self.depth())?;
        let position = self.position(index);
        self.stack[position] = element;
        Ok(())
    }

    /// Push a copy of the element at the given index.
    pub fn dup(&mut self, index: usize) -> Result<()> {
        let element = self.peek(index)?;
        self.push(element);
        Ok(())
    }

    /// Swap the top of the stack with the element at the given index.
    pub fn swap(&mut self, index: usize) -> Result<()> {
        self.check_index(index, self.depth())?;
        let top = self.position(0);
        let other = self.position(index);
        self.stack.swap(top, other);
        Ok(())
    }

    /// Move the element at the given index to the top of the stack, shifting
    /// the elements above it down by one.
    pub fn move_up(&mut self, index: usize) -> Result<()> {
        self.check_index(index, NUM_OP_STACK_REGISTERS)?;
        let element = self.stack.remove(self.position(index));
        self.stack.push(element);
        Ok(())
    }

    /// Move the top of the stack to the given index, shifting the elements
    /// above that position up by one.
    pub fn move_down(&mut self, index: usize) -> Result<()> {
        self.check_index(index, NUM_OP_STACK_REGISTERS)?;
        let element = self.stack.pop().unwrap_or_default();
        let position = self.depth() - index;
        self.stack.insert(position, element);
        Ok(())
    }

    /// The word at the given word index. Its first element is the shallowest.
    pub fn peek_word(&self, word_index: usize) -> Result<Word> {
        let last_index = Self::last_element_of_word(word_index);
        self.check_index(last_index, self.depth())?;
        let first_index = word_index * WORD_SIZE;
        Ok(std::array::from_fn(|i| self[first_index + i]))
    }

    /// Push a word such that its first element ends up on top.
    pub fn push_word(&mut self, word: Word) {
        for &element in word.iter().rev() {
            self.push(element);
        }
    }

    pub fn pop_word(&mut self) -> Word {
        self.pop_multiple()
    }

    pub fn dup_word(&mut self, word_index: usize) -> Result<()> {
        let word = self.peek_word(word_index)?;
        self.push_word(word);
        Ok(())
    }

    pub fn swap_words(&mut self, word_index: usize, other_word_index: usize) -> Result<()> {
        let last_index = Self::last_element_of_word(word_index.max(other_word_index));
        self.check_index(last_index, self.depth())?;
        for i in 0..WORD_SIZE {
            let position = self.position(word_index * WORD_SIZE + i);
            let other_position = self.position(other_word_index * WORD_SIZE + i);
            self.stack.swap(position, other_position);
        }
        Ok(())
    }

    pub fn move_up_word(&mut self, word_index: usize) -> Result<()> {
        let last_index = Self::last_element_of_word(word_index);
        self.check_index(last_index, NUM_OP_STACK_REGISTERS)?;
        for _ in 0..WORD_SIZE {
            self.move_up(last_index)?;
        }
        Ok(())
    }

    pub fn move_down_word(&mut self, word_index: usize) -> Result<()> {
        let last_index = Self::last_element_of_word(word_index);
        self.check_index(last_index, NUM_OP_STACK_REGISTERS)?;
        for _ in 0..WORD_SIZE {
            self.move_down(last_index)?;
        }
        Ok(())
    }

    /// The entire stack, top first.
    pub fn to_vec(&self) -> Vec<BFieldElement> {
        self.stack.iter().rev().copied().collect()
    }

    /// The addresses of all elements currently below the register window,
    /// deepest first.
    pub fn overflow_addresses(&self) -> &[u64] {
        &self.overflow_addresses
    }

    /// Every element that has ever been pushed out of the register window,
    /// in order of occurrence.
    pub fn overflow_log(&self) -> &[OverflowEntry] {
        &self.overflow_log
    }

    /// Detach the overflow log, leaving an empty one in its place.
    pub fn take_overflow_log(&mut self) -> Vec<OverflowEntry> {
        std::mem::take(&mut self.overflow_log)
    }

    pub fn restore_overflow_log(&mut self, overflow_log: Vec<OverflowEntry>) {
        self.overflow_log = overflow_log;
    }

    fn check_index(&self, index: usize, limit: usize) -> Result<()> {
        let limit = limit.min(self.depth());
        if index >= limit {
            return Err(StackError::InvalidStackIndex { index, limit });
        }
        Ok(())
    }

    fn position(&self, index: usize) -> usize {
        self.depth() - 1 - index
    }

    fn last_element_of_word(word_index: usize) -> usize {
        word_index.saturating_mul(WORD_SIZE).saturating_add(WORD_SIZE - 1)
    }
}

impl Index<usize> for OpStack {
    type Output = BFieldElement;

    fn index(&self, index: usize) -> &Self::Output {
        &self.stack[self.position(index)]
    }
}

impl Index<OpStackElement> for OpStack {
    type Output = BFieldElement;

    fn index(&self, stack_element: OpStackElement) -> &Self::Output {
        &self[usize::from(stack_element)]
    }
}
