use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

pub use isa::error::ArgumentError;
pub use isa::error::ParseError;
pub use isa::error::ProgramError;
use itertools::Itertools;
use thiserror::Error;
use twenty_first::prelude::*;

use crate::Word;

/// Renders a [`Word`] the way error messages and debug output show it.
pub(crate) fn format_word(word: &Word) -> String {
    let elements = word.iter().map(|element| element.value()).join(", ");
    format!("[{elements}]")
}

#[non_exhaustive]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum ArithmeticError {
    #[error("division by 0 is impossible")]
    DivisionByZero,

    #[error("expected a binary value, but got {}", .0.value())]
    NotBinary(BFieldElement),

    #[error("exponent {} of `pow2` must be smaller than 64", .0.value())]
    ExponentTooLarge(BFieldElement),
}

#[non_exhaustive]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum StackError {
    #[error("stack index {index} is out of range, must be smaller than {limit}")]
    InvalidStackIndex { index: usize, limit: usize },
}

#[non_exhaustive]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum MemoryError {
    #[error("memory address {0} must be smaller than 2^32")]
    AddressOutOfRange(u64),
}

#[non_exhaustive]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum AdviceError {
    #[error("advice tape is exhausted: requested {requested} element(s), {available} available")]
    TapeExhausted { requested: usize, available: usize },

    #[error("Merkle root {} is not in the store", format_word(.0))]
    UnknownMerkleRoot(Word),

    #[error("Merkle node {} is not in the store", format_word(.0))]
    NodeNotInStore(Word),

    #[error("Merkle tree depth {0} is out of range (1-64 allowed)")]
    InvalidMerkleDepth(u64),

    #[error("index {index} is out of range for a Merkle tree of depth {depth}")]
    InvalidMerkleIndex { depth: u64, index: u64 },

    #[error("a Merkle tree needs a power-of-two number of leaves, at least 2, but got {0}")]
    InvalidLeafCount(usize),

    #[error("no entry for key {} in the advice map", format_word(.0))]
    MapKeyNotFound(Word),

    #[error("Merkle leaf at depth {depth}, index {index} does not match {}", format_word(.expected))]
    LeafMismatch {
        depth: u64,
        index: u64,
        expected: Word,
    },
}

/// A failed `assert`, `assertz`, `assert_eq`, or `assert_eqw`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub struct AssertionError {
    /// The [element](BFieldElement) expected by the assertion.
    pub expected: BFieldElement,

    /// The element actually found on the stack.
    pub actual: BFieldElement,
}

impl AssertionError {
    pub fn new(expected: impl Into<BFieldElement>, actual: impl Into<BFieldElement>) -> Self {
        Self {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl Display for AssertionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let expected = self.expected.value();
        let actual = self.actual.value();
        write!(f, "assertion failed: expected {expected}, got {actual}")
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),

    #[error(transparent)]
    Stack(#[from] StackError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Advice(#[from] AdviceError),

    #[error(transparent)]
    Assertion(#[from] AssertionError),

    #[error("`return` outside of any procedure")]
    CallStackEmpty,

    #[error("cycle limit of {0} exceeded")]
    CycleLimitExceeded(u32),

    #[error("the machine has stopped and cannot execute any further instructions")]
    MachineStopped,
}

#[non_exhaustive]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum DebugError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// An earlier step failed. The session must be recreated.
    #[error("debug session has terminated: {0}")]
    Terminated(String),

    #[error("unknown debug command `{0}`")]
    UnknownCommand(String),
}

#[non_exhaustive]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ProofError {
    #[error("proof length {0} is not a multiple of 8 bytes")]
    UnalignedLength(usize),

    #[error("proof must consist of exactly {expected} field elements, but has {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("proof contains non-canonical field element {0}")]
    NonCanonicalElement(u64),

    #[error("proof version {0} is not supported")]
    UnsupportedVersion(u64),

    #[error("proving was cancelled")]
    Cancelled,
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum InputError {
    #[error("inputs must be a valid JSON object: {0}")]
    Json(#[from] serde_json::Error),

    #[error("outputs must be a valid JSON object: {0}")]
    OutputsJson(serde_json::Error),

    #[error("invalid field element `{0}`")]
    InvalidElement(String),

    #[error("invalid word `{0}`: expected 32 bytes of hex, four elements smaller than the modulus")]
    InvalidWord(String),

    #[error(transparent)]
    Advice(#[from] AdviceError),

    /// A JSON field failed validation. The message is meant to be shown verbatim.
    #[error("{0}")]
    InvalidField(String),
}

/// Everything that can go wrong at the boundary between a caller and the VM.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PlaygroundError {
    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    Debug(#[from] DebugError),
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use assert2::assert;

    use super::*;

    #[test]
    fn assertion_error_shows_canonical_values() {
        let err = AssertionError::new(bfe!(1), bfe!(-1));
        let message = err.to_string();
        assert!(message == format!("assertion failed: expected 1, got {}", BFieldElement::P - 1));
    }

    #[test]
    fn execution_error_is_transparent_for_wrapped_errors() {
        let err = ExecutionError::from(ArithmeticError::DivisionByZero);
        assert!(err.to_string() == ArithmeticError::DivisionByZero.to_string());
    }

    #[test]
    fn terminated_debug_session_repeats_original_message() {
        let original = ExecutionError::from(AssertionError::new(bfe!(1), bfe!(0)));
        let err = DebugError::Terminated(original.to_string());
        assert!("debug session has terminated: assertion failed: expected 1, got 0" == err.to_string());
    }

    #[test]
    fn words_are_formatted_as_lists_of_integers() {
        let word = [bfe!(1), bfe!(2), bfe!(3), bfe!(4)];
        assert!("[1, 2, 3, 4]" == format_word(&word));
    }
}
