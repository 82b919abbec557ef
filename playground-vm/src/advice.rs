use std::collections::VecDeque;

use indexmap::IndexMap;
use isa::op_stack::WORD_SIZE;
use twenty_first::prelude::*;

use crate::Word;
use crate::error::AdviceError;
use crate::merkle::MerkleStore;

type Result<T> = std::result::Result<T, AdviceError>;

/// Non-deterministic input to a program: the advice tape, the advice map, and
/// a store of Merkle trees.
///
/// Each machine owns its advice provider. Nothing is shared between
/// concurrently running machines.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct AdviceProvider {
    tape: VecDeque<BFieldElement>,
    map: IndexMap<Word, Vec<BFieldElement>>,
    merkle_store: MerkleStore,
}

impl AdviceProvider {
    pub fn new(tape: Vec<BFieldElement>) -> Self {
        Self {
            tape: tape.into(),
            ..Self::default()
        }
    }

    pub fn tape_len(&self) -> usize {
        self.tape.len()
    }

    pub fn pop_tape(&mut self) -> Result<BFieldElement> {
        self.tape.pop_front().ok_or(AdviceError::TapeExhausted {
            requested: 1,
            available: 0,
        })
    }

    /// Removes the next four elements from the tape. The first of them becomes
    /// the word's first element. Nothing is removed if fewer than four
    /// elements remain.
    pub fn pop_tape_word(&mut self) -> Result<Word> {
        let available = self.tape.len();
        if available < WORD_SIZE {
            let requested = WORD_SIZE;
            return Err(AdviceError::TapeExhausted {
                requested,
                available,
            });
        }
        let mut word = [BFieldElement::new(0); WORD_SIZE];
        for (element, value) in word.iter_mut().zip(self.tape.drain(..WORD_SIZE)) {
            *element = value;
        }
        Ok(word)
    }

    /// Puts the given values in front of the tape, such that the first value
    /// is the next one to be read.
    pub fn push_front_tape(&mut self, values: &[BFieldElement]) {
        for &value in values.iter().rev() {
            self.tape.push_front(value);
        }
    }

    pub fn insert_into_map(&mut self, key: Word, values: Vec<BFieldElement>) {
        self.map.insert(key, values);
    }

    pub fn get_mapped_values(&self, key: Word) -> Result<&[BFieldElement]> {
        self.map
            .get(&key)
            .map(Vec::as_slice)
            .ok_or(AdviceError::MapKeyNotFound(key))
    }

    pub fn merkle_store(&self) -> &MerkleStore {
        &self.merkle_store
    }

    pub fn merkle_store_mut(&mut self) -> &mut MerkleStore {
        &mut self.merkle_store
    }

    pub fn get_node(&self, root: Word, depth: u64, index: u64) -> Result<Word> {
        self.merkle_store.get_node(root, depth, index)
    }

    pub fn get_merkle_path(&self, root: Word, depth: u64, index: u64) -> Result<Vec<Word>> {
        self.merkle_store.get_merkle_path(root, depth, index)
    }

    /// Returns the old node and the new root. See [`MerkleStore::set_node`].
    pub fn set_node(
        &mut self,
        root: Word,
        depth: u64,
        index: u64,
        value: Word,
    ) -> Result<(Word, Word)> {
        self.merkle_store.set_node(root, depth, index, value)
    }

    pub fn copy_and_set_node(
        &mut self,
        root: Word,
        depth: u64,
        index: u64,
        value: Word,
    ) -> Result<(Word, Word)> {
        self.merkle_store.copy_and_set_node(root, depth, index, value)
    }

    pub fn merge_roots(&mut self, left_root: Word, right_root: Word) -> Word {
        self.merkle_store.merge_roots(left_root, right_root)
    }
}
