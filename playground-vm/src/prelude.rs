//! Re-exports the most commonly-needed APIs of the playground VM.
//!
//! This module is intended to be wildcard-imported, _i.e._,
//! `use playground_vm::prelude::*;`.

pub use isa::instruction::LabelledInstruction;
pub use isa::playground_program;
pub use isa::program::Program;
pub use twenty_first;
pub use twenty_first::prelude::BFieldElement;
pub use twenty_first::prelude::Digest;
pub use twenty_first::prelude::Tip5;
pub use twenty_first::prelude::bfe;

pub use crate::Word;
pub use crate::advice::AdviceProvider;
pub use crate::debugger::DebugCommand;
pub use crate::debugger::DebugExecutor;
pub use crate::debugger::DebugState;
pub use crate::error::PlaygroundError;
pub use crate::io::Inputs;
pub use crate::io::Outputs;
pub use crate::proof::Proof;
pub use crate::proof::ProofSystem;
pub use crate::proof::TraceCommitment;
pub use crate::vm::ExecutionOptions;
pub use crate::vm::VMState;
