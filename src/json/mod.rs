//! JSON coding over a token stream.
//!
//! Mapping: integers are numbers, enumerated values their item name, octetstrings
//! uppercase hex strings, bitstrings `"0101"` strings, unions a one-member object (or the
//! bare alternative with `as_value`), `record of` an array (or an object with `as_map`),
//! records/sets an object keyed by field name or alias.

mod decode;
mod encode;
pub mod token;

pub(crate) use decode::{JsonDecoder, JsonFail};
pub(crate) use encode::JsonEncoder;

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

pub(crate) fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|h| u8::from_str_radix(h, 16).ok()))
        .collect()
}

pub(crate) fn to_bits(bits: &[bool]) -> String {
    bits.iter().map(|b| if *b { '1' } else { '0' }).collect()
}

pub(crate) fn from_bits(s: &str) -> Option<Vec<bool>> {
    s.chars()
        .map(|c| match c {
            '0' => Some(false),
            '1' => Some(true),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_and_bit_strings() {
        assert_eq!(to_hex(&[0xde, 0xad, 0x01]), "DEAD01");
        assert_eq!(from_hex("dEAd01"), Some(vec![0xde, 0xad, 0x01]));
        assert_eq!(from_hex("ABC"), None);
        assert_eq!(from_hex("zz"), None);
        assert_eq!(from_bits("0110"), Some(vec![false, true, true, false]));
        assert_eq!(from_bits("012"), None);
    }
}
