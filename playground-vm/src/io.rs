//! The JSON interface between a front end and the VM: program inputs, program
//! outputs, and the validation of user-edited output fields.

use std::sync::Arc;

use indexmap::IndexMap;
use isa::program::Program;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use twenty_first::prelude::*;

use crate::advice::AdviceProvider;
use crate::error::InputError;
use crate::field::elements_to_hex;
use crate::field::parse_element;
use crate::field::parse_word;
use crate::proof::Proof;
use crate::vm::VMState;

type Result<T> = std::result::Result<T, InputError>;

/// Output fields that are not validated by [`check_fields`].
const UNCHECKED_FIELDS: [&str; 3] = ["program_hash", "cycles", "trace_len"];

/// The number of stack elements, top first, that proven outputs retain.
pub const MAX_STACK_OUTPUT_LENGTH: usize = 40;

/// Inputs as they appear in JSON. Field elements are written as decimal or
/// `0x`-prefixed hex strings, words as 32 bytes of hex.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct InputFile {
    #[serde(default, alias = "operand_stack")]
    pub stack_init: Vec<String>,

    #[serde(default, alias = "advice_stack")]
    pub advice_tape: Vec<String>,

    #[serde(default)]
    pub advice_map: IndexMap<String, Vec<u64>>,

    #[serde(default)]
    pub merkle_store: Vec<MerkleData>,
}

/// A Merkle tree to be loaded into the advice provider's store.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum MerkleData {
    /// The leaves of a complete binary tree, one hex word each.
    #[serde(rename = "merkle_tree")]
    MerkleTree(Vec<String>),

    /// The non-empty leaves of a sparse tree of depth 64, each with its index.
    #[serde(rename = "sparse_merkle_tree")]
    SparseMerkleTree(Vec<(u64, String)>),
}

/// Parsed and validated inputs, ready to initialize a [`VMState`].
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Inputs {
    /// The initial operand stack. The first element ends up on top.
    pub stack_init: Vec<BFieldElement>,

    pub advice: AdviceProvider,
}

impl Inputs {
    /// Parse inputs from JSON. Blank input is the same as no input at all.
    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let input_file: InputFile = serde_json::from_str(json)?;
        Self::try_from(&input_file)
    }

    pub fn initial_state(&self, program: impl Into<Arc<Program>>) -> VMState {
        VMState::new(program, &self.stack_init, self.advice.clone())
    }
}

impl TryFrom<&InputFile> for Inputs {
    type Error = InputError;

    fn try_from(input_file: &InputFile) -> Result<Self> {
        let parse_elements = |literals: &[String]| -> Result<Vec<_>> {
            literals.iter().map(|l| parse_element(l)).collect()
        };
        let stack_init = parse_elements(&input_file.stack_init)?;
        let tape = parse_elements(&input_file.advice_tape)?;

        let mut advice = AdviceProvider::new(tape);
        for (key, values) in &input_file.advice_map {
            let key = parse_word(key)?;
            let values = values.iter().map(|&v| canonical_element(v)).try_collect()?;
            advice.insert_into_map(key, values);
        }

        for merkle_data in &input_file.merkle_store {
            let store = advice.merkle_store_mut();
            match merkle_data {
                MerkleData::MerkleTree(leaves) => {
                    let leaves = leaves.iter().map(|l| parse_word(l)).try_collect::<_, Vec<_>, _>()?;
                    store.add_merkle_tree(&leaves)?;
                }
                MerkleData::SparseMerkleTree(entries) => {
                    let entries = entries
                        .iter()
                        .map(|(index, leaf)| Ok((*index, parse_word(leaf)?)))
                        .collect::<Result<Vec<_>>>()?;
                    store.add_sparse_merkle_tree(&entries)?;
                }
            }
        }

        Ok(Self { stack_init, advice })
    }
}

fn canonical_element(value: u64) -> Result<BFieldElement> {
    if value >= BFieldElement::P {
        return Err(InputError::InvalidElement(value.to_string()));
    }
    Ok(bfe!(value))
}

/// The public result of an execution.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Outputs {
    /// The hex-encoded Tip5 digest of the executed program.
    #[serde(default)]
    pub program_hash: String,

    /// The operand stack, top first. Complete after a plain run, limited to
    /// [`MAX_STACK_OUTPUT_LENGTH`] elements once proven.
    pub stack_output: Vec<u64>,

    /// Addresses of the overflow table entries backing the stack below the
    /// register window. The first entry is always 0.
    #[serde(default)]
    pub overflow_addrs: Vec<u64>,

    /// The number of executed instructions. Only reported by plain runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycles: Option<u64>,

    #[serde(default)]
    pub trace_len: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

impl Outputs {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(InputError::OutputsJson)
    }

    /// Parse outputs, possibly edited by a user, [checking](check_fields)
    /// every field before deserializing.
    pub fn from_checked_json(json: &str) -> Result<Self> {
        let json: Value = serde_json::from_str(json).map_err(InputError::OutputsJson)?;
        check_fields(&json)?;
        serde_json::from_value(json).map_err(InputError::OutputsJson)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(InputError::OutputsJson)
    }

    /// The form in which outputs are proven: the stack is cut down to its
    /// topmost [`MAX_STACK_OUTPUT_LENGTH`] elements and the cycle count is
    /// dropped.
    #[must_use]
    pub fn into_proven(mut self) -> Self {
        self.stack_output.truncate(MAX_STACK_OUTPUT_LENGTH);
        self.cycles = None;
        self
    }

    pub fn stack_output_elements(&self) -> Result<Vec<BFieldElement>> {
        self.stack_output
            .iter()
            .map(|&v| canonical_element(v))
            .collect()
    }
}

impl From<&VMState> for Outputs {
    fn from(state: &VMState) -> Self {
        Self {
            program_hash: elements_to_hex(&state.program.hash().values()),
            stack_output: state.stack_output().iter().map(|e| e.value()).collect(),
            overflow_addrs: state.overflow_addresses(),
            cycles: Some(u64::from(state.cycle_count)),
            trace_len: state.trace_len(),
            proof: None,
        }
    }
}

/// Checks that the given field of a JSON object is a non-empty array of
/// numbers. The error message is meant to be shown to users verbatim.
pub fn check_field(json: &Value, key: &str) -> Result<()> {
    let Some(values) = json.get(key).and_then(Value::as_array) else {
        let message = format!("{key} must be an array of numbers.");
        return Err(InputError::InvalidField(message));
    };
    if values.is_empty() || !values.iter().all(is_number) {
        let message =
            format!("{key} must contain at least one number, \nand it can only contain numbers.");
        return Err(InputError::InvalidField(message));
    }
    Ok(())
}

/// [Checks](check_field) every field of a JSON object, except the trace
/// length. Reports the first invalid field.
pub fn check_fields(json: &Value) -> Result<()> {
    let Some(object) = json.as_object() else {
        let message = "outputs must be a JSON object.".to_string();
        return Err(InputError::InvalidField(message));
    };
    let keys = object
        .keys()
        .filter(|key| !UNCHECKED_FIELDS.contains(&key.as_str()));
    for key in keys {
        check_field(json, key)?;
    }
    Ok(())
}

/// Integers, and strings that spell one.
fn is_number(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_u64() || n.is_i64(),
        Value::String(s) => s.trim().parse::<i128>().is_ok(),
        _ => false,
    }
}
