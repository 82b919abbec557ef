use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

use arbitrary::Arbitrary;
use arbitrary::Unstructured;
use serde::Deserialize;
use serde::Serialize;
use strum::EnumCount;
use strum::EnumIter;
use strum::IntoEnumIterator;
use thiserror::Error;
use twenty_first::prelude::*;

type Result<T> = std::result::Result<T, ArgumentError>;

/// The number of operand stack elements instructions can address directly.
/// The operand stack never becomes shallower than this.
pub const NUM_OP_STACK_REGISTERS: usize = OpStackElement::COUNT;

/// The number of field elements in a word.
pub const WORD_SIZE: usize = 4;

/// The number of words instructions can address directly.
pub const NUM_OP_STACK_WORDS: usize = WordIndex::COUNT;

#[non_exhaustive]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum ArgumentError {
    #[error("stack element index {0} is out of range (0-15 exist)")]
    ElementIndexOutOfRange(u64),

    #[error("word index {0} is out of range (0-3 exist)")]
    WordIndexOutOfRange(u64),

    #[error("element count {0} is out of range (1-16 allowed)")]
    ElementCountOutOfRange(u64),
}

/// One of the operand stack positions instructions like `dup.n`, `swap.n`,
/// `movup.n`, or `movdn.n` can refer to. `ST0` is the top of the stack.
#[derive(
    Debug,
    Default,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Serialize,
    Deserialize,
    EnumCount,
    EnumIter,
    Arbitrary,
)]
pub enum OpStackElement {
    #[default]
    ST0,
    ST1,
    ST2,
    ST3,
    ST4,
    ST5,
    ST6,
    ST7,
    ST8,
    ST9,
    ST10,
    ST11,
    ST12,
    ST13,
    ST14,
    ST15,
}

impl OpStackElement {
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl Display for OpStackElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.index())
    }
}

impl From<OpStackElement> for usize {
    fn from(stack_element: OpStackElement) -> Self {
        stack_element.index()
    }
}

impl From<OpStackElement> for u64 {
    fn from(stack_element: OpStackElement) -> Self {
        stack_element.index() as u64
    }
}

impl From<OpStackElement> for BFieldElement {
    fn from(stack_element: OpStackElement) -> Self {
        bfe!(u64::from(stack_element))
    }
}

impl TryFrom<u64> for OpStackElement {
    type Error = ArgumentError;

    fn try_from(index: u64) -> Result<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|index| Self::iter().nth(index))
            .ok_or(ArgumentError::ElementIndexOutOfRange(index))
    }
}

impl TryFrom<usize> for OpStackElement {
    type Error = ArgumentError;

    fn try_from(index: usize) -> Result<Self> {
        Self::try_from(index as u64)
    }
}

impl TryFrom<u32> for OpStackElement {
    type Error = ArgumentError;

    fn try_from(index: u32) -> Result<Self> {
        Self::try_from(u64::from(index))
    }
}

impl TryFrom<BFieldElement> for OpStackElement {
    type Error = ArgumentError;

    fn try_from(index: BFieldElement) -> Result<Self> {
        Self::try_from(index.value())
    }
}

/// One of the four words on top of the operand stack, as used by instructions
/// like `dupw.n`, `swapw.n`, `movupw.n`, or `movdnw.n`. Word `W0` occupies
/// stack elements 0 through 3, word `W1` elements 4 through 7, and so on.
#[derive(
    Debug,
    Default,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Serialize,
    Deserialize,
    EnumCount,
    EnumIter,
    Arbitrary,
)]
pub enum WordIndex {
    #[default]
    W0,
    W1,
    W2,
    W3,
}

impl WordIndex {
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The stack position of the word's first element.
    pub const fn first_element(self) -> usize {
        self.index() * WORD_SIZE
    }
}

impl Display for WordIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.index())
    }
}

impl From<WordIndex> for u64 {
    fn from(word_index: WordIndex) -> Self {
        word_index.index() as u64
    }
}

impl From<WordIndex> for BFieldElement {
    fn from(word_index: WordIndex) -> Self {
        bfe!(u64::from(word_index))
    }
}

impl TryFrom<u64> for WordIndex {
    type Error = ArgumentError;

    fn try_from(index: u64) -> Result<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|index| Self::iter().nth(index))
            .ok_or(ArgumentError::WordIndexOutOfRange(index))
    }
}

impl TryFrom<usize> for WordIndex {
    type Error = ArgumentError;

    fn try_from(index: usize) -> Result<Self> {
        Self::try_from(index as u64)
    }
}

/// The number of elements moved by instructions like `adv_push.n`. Always in
/// range 1..=16.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct NumberOfElements(u8);

impl NumberOfElements {
    pub const MIN: usize = 1;
    pub const MAX: usize = NUM_OP_STACK_REGISTERS;
    pub const ONE: Self = Self(1);

    pub const fn num_elements(self) -> usize {
        self.0 as usize
    }
}

impl Default for NumberOfElements {
    fn default() -> Self {
        Self::ONE
    }
}

impl Display for NumberOfElements {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

impl From<NumberOfElements> for u64 {
    fn from(num_elements: NumberOfElements) -> Self {
        num_elements.0.into()
    }
}

impl From<NumberOfElements> for BFieldElement {
    fn from(num_elements: NumberOfElements) -> Self {
        bfe!(u64::from(num_elements))
    }
}

impl TryFrom<u64> for NumberOfElements {
    type Error = ArgumentError;

    fn try_from(num_elements: u64) -> Result<Self> {
        let legal_range = Self::MIN as u64..=Self::MAX as u64;
        if !legal_range.contains(&num_elements) {
            return Err(ArgumentError::ElementCountOutOfRange(num_elements));
        }
        Ok(Self(num_elements as u8))
    }
}

impl TryFrom<usize> for NumberOfElements {
    type Error = ArgumentError;

    fn try_from(num_elements: usize) -> Result<Self> {
        Self::try_from(num_elements as u64)
    }
}

impl<'a> Arbitrary<'a> for NumberOfElements {
    fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
        let num_elements = u.int_in_range(Self::MIN as u8..=Self::MAX as u8)?;
        Ok(Self(num_elements))
    }
}
