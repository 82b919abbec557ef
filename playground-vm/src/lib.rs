//! The execution and debugging engine of a playground for a stack-based
//! zero-knowledge virtual machine.
//!
//! All arithmetic happens in the prime field with 2^64 - 2^32 + 1 elements.
//! The machine has an operand stack of unbounded depth, of which the top 16
//! elements are directly accessible, a word-addressed random-access memory,
//! and an [advice provider](advice::AdviceProvider) supplying
//! non-deterministic input, like Merkle authentication paths.
//!
//! The boundary towards a front end is narrow: [`run()`], [`prove()`],
//! [`verify()`], and the step-wise [`DebugExecutor`](debugger::DebugExecutor).
//! Inputs and outputs are exchanged as JSON, see module [`io`].
//!
//! # Examples
//!
//! ```
//! # use playground_vm::prelude::*;
//! let outputs = playground_vm::run("begin push.1 push.2 add end", "")?;
//! assert_eq!(3, outputs.stack_output[0]);
//!
//! let outputs = playground_vm::prove("begin push.1 push.2 add end", "")?;
//! let outputs_json = outputs.to_json()?;
//! let proof = outputs.proof.unwrap_or_default();
//! let is_valid = playground_vm::verify("begin push.1 push.2 add end", "", &outputs_json, &proof)?;
//! assert!(is_valid);
//! # Ok::<(), PlaygroundError>(())
//! ```

// Allows the `coverage(off)` attribute on test modules when measuring test
// coverage with a nightly toolchain.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub use isa;
pub use twenty_first;
use twenty_first::prelude::BFieldElement;

use crate::error::PlaygroundError;
use crate::io::Inputs;
use crate::io::Outputs;
use crate::proof::CancellationToken;
use crate::proof::Proof;
use crate::proof::ProofSystem;
use crate::proof::TraceCommitment;
use crate::vm::ExecutionOptions;

pub mod advice;
pub mod debugger;
pub mod error;
pub mod field;
pub mod hash;
pub mod io;
pub mod memory;
pub mod merkle;
pub mod prelude;
pub mod proof;
pub mod stack;
pub mod vm;

/// Four field elements: the unit of memory, hashing, and Merkle trees.
pub type Word = [BFieldElement; 4];

type Result<T> = std::result::Result<T, PlaygroundError>;

/// Compile and run a program, returning its outputs.
pub fn run(code: &str, inputs_json: &str) -> Result<Outputs> {
    run_with_options(code, inputs_json, ExecutionOptions::default())
}

pub fn run_with_options(
    code: &str,
    inputs_json: &str,
    options: ExecutionOptions,
) -> Result<Outputs> {
    let program = isa::program::Program::from_code(code)?;
    let inputs = Inputs::from_json(inputs_json)?;
    let mut state = inputs.initial_state(program).with_options(options);
    state.run()?;
    Ok(Outputs::from(&state))
}

/// Compile and run a program, returning its outputs together with a
/// [proof](proof::Proof) of their correctness.
pub fn prove(code: &str, inputs_json: &str) -> Result<Outputs> {
    let program = isa::program::Program::from_code(code)?;
    let inputs = Inputs::from_json(inputs_json)?;
    let (outputs, _) = TraceCommitment.prove(&program, &inputs, &CancellationToken::new())?;
    Ok(outputs)
}

/// Verify that the program, run on the given inputs, produces the given
/// outputs. The outputs are validated field by field before anything else.
pub fn verify(code: &str, inputs_json: &str, outputs_json: &str, proof: &Proof) -> Result<bool> {
    let program = isa::program::Program::from_code(code)?;
    let inputs = Inputs::from_json(inputs_json)?;
    let outputs = Outputs::from_checked_json(outputs_json)?;
    TraceCommitment.verify(&program, &inputs, &outputs, proof)
}
