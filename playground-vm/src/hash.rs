//! Hashing as seen by programs: [`Tip5`] with words as inputs and outputs.

use twenty_first::prelude::*;

use crate::Word;

/// The number of field elements affected by instruction `hperm`.
pub const PERMUTATION_WIDTH: usize = tip5::STATE_SIZE;

/// Apply the [`Tip5`] permutation to the given state.
pub fn permute(state: [BFieldElement; PERMUTATION_WIDTH]) -> [BFieldElement; PERMUTATION_WIDTH] {
    let mut tip5 = Tip5 { state };
    tip5.permutation();
    tip5.state
}

/// Hash a single word.
pub fn hash1(word: Word) -> Word {
    digest_to_word(Tip5::hash_varlen(&word))
}

/// Hash two words into one. The order of the arguments matters.
pub fn hash2(left: Word, right: Word) -> Word {
    let mut input = [BFieldElement::new(0); 10];
    input[..4].copy_from_slice(&left);
    input[4..8].copy_from_slice(&right);
    let [a, b, c, d, _] = Tip5::hash_10(&input);
    [a, b, c, d]
}

pub fn digest_to_word(digest: Digest) -> Word {
    let [a, b, c, d, _] = digest.values();
    [a, b, c, d]
}
