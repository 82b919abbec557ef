use std::thread::JoinHandle;

use isa::program::Program;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use twenty_first::prelude::*;

pub use tokio_util::sync::CancellationToken;

use crate::error::PlaygroundError;
use crate::error::ProofError;
use crate::io::Inputs;
use crate::io::Outputs;
use crate::vm::VMState;

type Result<T> = std::result::Result<T, PlaygroundError>;

/// The version of the proof layout produced by [`TraceCommitment`].
pub const PROOF_VERSION: u64 = 1;

const BYTES_PER_ELEMENT: usize = std::mem::size_of::<u64>();

/// The version, the program digest, the input and output commitments, the
/// trace length, and the trace commitment.
const PROOF_LENGTH: usize = 1 + Digest::LEN + Digest::LEN + Digest::LEN + 1 + Digest::LEN;

/// Contains the necessary cryptographic information to verify a computation.
/// Should be used together with a [`Claim`].
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Proof(pub Vec<u8>);

impl Proof {
    pub fn from_elements(elements: &[BFieldElement]) -> Self {
        let bytes = elements
            .iter()
            .flat_map(|element| element.value().to_le_bytes())
            .collect();
        Self(bytes)
    }

    /// Decode the proof into field elements, rejecting byte strings that
    /// don't encode canonical elements.
    pub fn to_elements(&self) -> std::result::Result<Vec<BFieldElement>, ProofError> {
        if self.0.len() % BYTES_PER_ELEMENT != 0 {
            return Err(ProofError::UnalignedLength(self.0.len()));
        }

        let mut elements = Vec::with_capacity(self.0.len() / BYTES_PER_ELEMENT);
        for chunk in self.0.chunks_exact(BYTES_PER_ELEMENT) {
            let mut bytes = [0; BYTES_PER_ELEMENT];
            bytes.copy_from_slice(chunk);
            let value = u64::from_le_bytes(bytes);
            if value >= BFieldElement::P {
                return Err(ProofError::NonCanonicalElement(value));
            }
            elements.push(bfe!(value));
        }
        Ok(elements)
    }

    /// The size of the proof in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<Vec<u8>> for Proof {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Contains all the public information of a verifiably correct computation.
/// A corresponding [`Proof`] is needed to verify the computation.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// The hash digest of the program that was executed. The hash function in
    /// use is Tip5.
    pub program_digest: Digest,

    /// The initial operand stack. Advice is not public.
    pub input: Vec<BFieldElement>,

    /// The final operand stack, top first.
    pub output: Vec<BFieldElement>,

    /// Addresses of the overflow table entries backing the final stack.
    pub overflow_addresses: Vec<u64>,

    pub trace_len: u64,
}

impl Claim {
    pub fn new(program: &Program, inputs: &Inputs, outputs: &Outputs) -> Result<Self> {
        let claim = Self {
            program_digest: program.hash(),
            input: inputs.stack_init.clone(),
            output: outputs.stack_output_elements()?,
            overflow_addresses: outputs.overflow_addrs.clone(),
            trace_len: outputs.trace_len,
        };
        Ok(claim)
    }

    pub fn input_commitment(&self) -> Digest {
        Tip5::hash_varlen(&self.input)
    }

    pub fn output_commitment(&self) -> Digest {
        let overflow_addresses = self.overflow_addresses.iter().map(|&a| bfe!(a));
        let elements = self.output.iter().copied().chain(overflow_addresses).collect_vec();
        Tip5::hash_varlen(&elements)
    }

    fn encode(&self, trace_commitment: Digest) -> Vec<BFieldElement> {
        let mut elements = Vec::with_capacity(PROOF_LENGTH);
        elements.push(bfe!(PROOF_VERSION));
        elements.extend(self.program_digest.values());
        elements.extend(self.input_commitment().values());
        elements.extend(self.output_commitment().values());
        elements.push(bfe!(self.trace_len));
        elements.extend(trace_commitment.values());
        elements
    }
}

/// Proves and verifies correct execution of a program.
pub trait ProofSystem {
    /// Execute the program and produce its outputs together with a proof of
    /// their correctness. Checks the cancellation token between steps.
    fn prove(
        &self,
        program: &Program,
        inputs: &Inputs,
        cancellation_token: &CancellationToken,
    ) -> Result<(Outputs, Proof)>;

    /// Whether the proof attests that the program, run on the inputs, produces
    /// the outputs. Malformed proofs are errors, wrong ones are not.
    fn verify(
        &self,
        program: &Program,
        inputs: &Inputs,
        outputs: &Outputs,
        proof: &Proof,
    ) -> Result<bool>;
}

/// Commits to every row of the execution trace with a Tip5 hash chain.
///
/// Verification re-executes the program. Proofs are binding but neither
/// succinct nor zero-knowledge.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct TraceCommitment;

/// The final state of an execution and the commitment to its trace.
struct CommittedExecution {
    state: VMState,
    trace_commitment: Digest,
}

impl TraceCommitment {
    fn execute(
        program: &Program,
        inputs: &Inputs,
        cancellation_token: &CancellationToken,
    ) -> Result<CommittedExecution> {
        let mut state = inputs.initial_state(program.clone());
        let mut trace_commitment = Tip5::hash_varlen(&state.to_trace_row());
        while !state.is_terminal() {
            if cancellation_token.is_cancelled() {
                return Err(ProofError::Cancelled.into());
            }
            let cycle_count = state.cycle_count;
            state.step()?;
            if state.cycle_count != cycle_count {
                trace_commitment = Self::absorb_row(trace_commitment, &state);
            }
        }
        Ok(CommittedExecution {
            state,
            trace_commitment,
        })
    }

    fn absorb_row(accumulator: Digest, state: &VMState) -> Digest {
        let elements = accumulator
            .values()
            .into_iter()
            .chain(state.to_trace_row())
            .collect_vec();
        Tip5::hash_varlen(&elements)
    }
}

impl ProofSystem for TraceCommitment {
    fn prove(
        &self,
        program: &Program,
        inputs: &Inputs,
        cancellation_token: &CancellationToken,
    ) -> Result<(Outputs, Proof)> {
        let execution = Self::execute(program, inputs, cancellation_token)?;
        let mut outputs = Outputs::from(&execution.state).into_proven();
        let claim = Claim::new(program, inputs, &outputs)?;
        let proof = Proof::from_elements(&claim.encode(execution.trace_commitment));
        info!(trace_len = claim.trace_len, proof_len = proof.len(), "proof generated");

        outputs.proof = Some(proof.clone());
        Ok((outputs, proof))
    }

    fn verify(
        &self,
        program: &Program,
        inputs: &Inputs,
        outputs: &Outputs,
        proof: &Proof,
    ) -> Result<bool> {
        let elements = proof.to_elements()?;
        if elements.len() != PROOF_LENGTH {
            let expected = PROOF_LENGTH;
            let actual = elements.len();
            return Err(ProofError::LengthMismatch { expected, actual }.into());
        }
        let version = elements[0].value();
        if version != PROOF_VERSION {
            return Err(ProofError::UnsupportedVersion(version).into());
        }

        let Ok(execution) = Self::execute(program, inputs, &CancellationToken::new()) else {
            return Ok(false);
        };
        let actual_outputs = Outputs::from(&execution.state).into_proven();
        let program_hash_matches =
            outputs.program_hash.is_empty() || outputs.program_hash == actual_outputs.program_hash;
        let outputs_match = program_hash_matches
            && actual_outputs.stack_output == outputs.stack_output
            && actual_outputs.overflow_addrs == outputs.overflow_addrs;
        let trace_len_matches =
            outputs.trace_len == 0 || outputs.trace_len == actual_outputs.trace_len;
        if !outputs_match || !trace_len_matches {
            return Ok(false);
        }

        let claim = Claim::new(program, inputs, &actual_outputs)?;
        let is_valid = claim.encode(execution.trace_commitment) == elements;
        info!(is_valid, "proof verified");
        Ok(is_valid)
    }
}

/// A proof being generated on a background thread.
#[derive(Debug)]
pub struct ProvingTask {
    handle: JoinHandle<Result<(Outputs, Proof)>>,
    cancellation_token: CancellationToken,
}

impl ProvingTask {
    /// Request cancellation. The task notices between two execution steps and
    /// finishes with [`ProofError::Cancelled`].
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the proof. A panic on the proving thread is resumed on the
    /// calling thread.
    pub fn join(self) -> Result<(Outputs, Proof)> {
        self.handle
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    }
}

/// Generate a proof on a new thread. Neither the program nor the inputs are
/// shared with the caller.
pub fn spawn_prove<P>(proof_system: P, program: Program, inputs: Inputs) -> ProvingTask
where
    P: ProofSystem + Send + 'static,
{
    let cancellation_token = CancellationToken::new();
    let token = cancellation_token.clone();
    let handle = std::thread::spawn(move || proof_system.prove(&program, &inputs, &token));
    ProvingTask {
        handle,
        cancellation_token,
    }
}
