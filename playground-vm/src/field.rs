//! Arithmetic over the prime field with modulus p = 2^64 - 2^32 + 1, as far as
//! it goes beyond what [`BFieldElement`] offers directly.
//!
//! All results are canonical, _i.e._, in range `0..p`. Division by zero and
//! inversion of zero are both reported as
//! [`DivisionByZero`](ArithmeticError::DivisionByZero).

use num_traits::ConstOne;
use num_traits::ConstZero;
use twenty_first::prelude::*;

use crate::Word;
use crate::error::ArithmeticError;
use crate::error::InputError;

type Result<T> = std::result::Result<T, ArithmeticError>;

/// The word consisting of four zeros.
pub const ZERO_WORD: Word = [BFieldElement::ZERO; 4];

pub fn inverse(element: BFieldElement) -> Result<BFieldElement> {
    if element == BFieldElement::ZERO {
        return Err(ArithmeticError::DivisionByZero);
    }
    Ok(element.inverse())
}

pub fn div(numerator: BFieldElement, denominator: BFieldElement) -> Result<BFieldElement> {
    if denominator == BFieldElement::ZERO {
        return Err(ArithmeticError::DivisionByZero);
    }
    Ok(numerator * denominator.inverse())
}

/// `2^exponent`, for exponents smaller than 64.
pub fn pow2(exponent: BFieldElement) -> Result<BFieldElement> {
    if exponent.value() >= 64 {
        return Err(ArithmeticError::ExponentTooLarge(exponent));
    }
    Ok(bfe!(2).mod_pow(exponent.value()))
}

/// `base^exponent`, where the exponent is interpreted as its canonical
/// integer representative.
pub fn exp(base: BFieldElement, exponent: BFieldElement) -> BFieldElement {
    base.mod_pow(exponent.value())
}

/// Comparisons act on canonical representatives.
pub fn lt(lhs: BFieldElement, rhs: BFieldElement) -> bool {
    lhs.value() < rhs.value()
}

pub fn is_odd(element: BFieldElement) -> bool {
    element.value() % 2 == 1
}

/// Interprets a field element as a boolean, rejecting anything but 0 and 1.
pub fn to_bool(element: BFieldElement) -> Result<bool> {
    match element.value() {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(ArithmeticError::NotBinary(element)),
    }
}

pub fn from_bool(value: bool) -> BFieldElement {
    if value {
        BFieldElement::ONE
    } else {
        BFieldElement::ZERO
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal literal into a field element.
/// Literals must denote a value smaller than the modulus.
pub fn parse_element(literal: &str) -> std::result::Result<BFieldElement, InputError> {
    let literal = literal.trim();
    let invalid = || InputError::InvalidElement(literal.to_string());
    let value = match literal.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).map_err(|_| invalid())?,
        None => literal.parse::<u64>().map_err(|_| invalid())?,
    };
    if value >= BFieldElement::P {
        return Err(invalid());
    }
    Ok(bfe!(value))
}

/// Parses 32 bytes of hex, optionally `0x`-prefixed, into a [`Word`]. Every
/// group of 8 bytes is one little-endian element.
pub fn parse_word(literal: &str) -> std::result::Result<Word, InputError> {
    let literal = literal.trim();
    let invalid = || InputError::InvalidWord(literal.to_string());
    let digits = literal.strip_prefix("0x").unwrap_or(literal);
    let mut bytes = [0_u8; 32];
    hex::decode_to_slice(digits, &mut bytes).map_err(|_| invalid())?;

    let mut word = ZERO_WORD;
    for (element, chunk) in word.iter_mut().zip(bytes.chunks_exact(8)) {
        let chunk = chunk.try_into().map_err(|_| invalid())?;
        let value = u64::from_le_bytes(chunk);
        if value >= BFieldElement::P {
            return Err(invalid());
        }
        *element = bfe!(value);
    }
    Ok(word)
}

/// The inverse of [`parse_word`].
pub fn word_to_hex(word: &Word) -> String {
    format!("0x{}", elements_to_hex(word))
}

/// Little-endian bytes of the canonical representatives, hex-encoded without
/// prefix.
pub fn elements_to_hex(elements: &[BFieldElement]) -> String {
    let bytes = elements
        .iter()
        .flat_map(|element| element.value().to_le_bytes())
        .collect::<Vec<_>>();
    hex::encode(bytes)
}
