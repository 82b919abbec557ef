use std::collections::BTreeMap;

use twenty_first::prelude::*;

use crate::Word;
use crate::error::MemoryError;
use crate::field::ZERO_WORD;

type Result<T> = std::result::Result<T, MemoryError>;

/// The number of addressable words.
pub const MEMORY_SIZE: u64 = 1 << 32;

/// Word-addressed random-access memory. Addresses that were never written to
/// read as zero.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Memory {
    words: BTreeMap<u32, Word>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first element of the word at the given address.
    pub fn load_element(&self, address: u64) -> Result<BFieldElement> {
        let [element, ..] = self.load_word(address)?;
        Ok(element)
    }

    pub fn load_word(&self, address: u64) -> Result<Word> {
        let address = Self::checked_address(address)?;
        Ok(self.words.get(&address).copied().unwrap_or(ZERO_WORD))
    }

    /// Overwrites the first element of the word at the given address, leaving
    /// the other three untouched.
    pub fn store_element(&mut self, address: u64, element: BFieldElement) -> Result<()> {
        let address = Self::checked_address(address)?;
        self.words.entry(address).or_insert(ZERO_WORD)[0] = element;
        Ok(())
    }

    pub fn store_word(&mut self, address: u64, word: Word) -> Result<()> {
        let address = Self::checked_address(address)?;
        self.words.insert(address, word);
        Ok(())
    }

    /// All words that have been written to, in ascending order of address.
    pub fn iter(&self) -> impl Iterator<Item = (u32, Word)> + '_ {
        self.words.iter().map(|(&address, &word)| (address, word))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn checked_address(address: u64) -> Result<u32> {
        u32::try_from(address).map_err(|_| MemoryError::AddressOutOfRange(address))
    }
}
