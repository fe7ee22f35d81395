//! Control string codec.
//!
//! A control string is a run of single-character value tokens interleaved
//! with group markers:
//!
//! ```text
//! control  := (marker | value)*
//! marker   := '#f' digit+ 'f'      function group, decimal function id
//!           | '#c' value           opportunity group, id in the value alphabet
//! value    := '0' ..= '}'          value v is the character '0' + v
//! ```
//!
//! Markers are skipped by their structure, never by the characters they
//! contain: `f` and `c` are valid value characters too. Any prefix cut at a
//! value boundary is itself a valid control string, and choices it does not
//! mention are implicitly at value 0.

use std::fmt;

use crate::choice::Choice;

/// Number of distinct values a single token can carry.
pub const ALPHABET_SIZE: u32 = 78;

const VALUE_BASE: u8 = b'0';
const MARKER: u8 = b'#';
const FUNCTION_TAG: u8 = b'f';
const OPPORTUNITY_TAG: u8 = b'c';

/// Errors from parsing or editing a control string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("truncated marker at offset {offset}")]
    TruncatedMarker { offset: usize },

    #[error("unknown marker `#{found}` at offset {offset}")]
    UnknownMarker { offset: usize, found: char },

    #[error("function marker at offset {offset} is not terminated")]
    UnterminatedFunctionMarker { offset: usize },

    #[error("function marker at offset {offset} has no valid id")]
    InvalidFunctionId { offset: usize },

    #[error("character {found:?} at offset {offset} is not a value token")]
    InvalidValue { offset: usize, found: char },

    #[error("value token at offset {offset} precedes any group marker")]
    ValueOutsideGroup { offset: usize },

    #[error("value position {position} out of range (string holds {count} values)")]
    PositionOutOfRange { position: usize, count: usize },

    #[error("value {value} does not fit the control alphabet")]
    ValueOutOfRange { value: u32 },
}

/// Character encoding `value`, if it fits the alphabet.
pub fn value_char(value: u32) -> Option<char> {
    (value < ALPHABET_SIZE).then(|| char::from(VALUE_BASE + value as u8))
}

fn value_of(byte: u8) -> Option<u32> {
    let v = byte.checked_sub(VALUE_BASE)? as u32;
    (v < ALPHABET_SIZE).then_some(v)
}

/// One lexical element of a control string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Function(u32),
    Opportunity(u32),
    /// A value token and its byte offset.
    Value { offset: usize, value: u32 },
}

/// Iterator over the tokens of a control string.
pub struct Tokens<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Iterator for Tokens<'_> {
    type Item = Result<Token, ControlError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.pos;
        let &byte = self.bytes.get(offset)?;

        if byte != MARKER {
            self.pos += 1;
            return Some(match value_of(byte) {
                Some(value) => Ok(Token::Value { offset, value }),
                None => Err(self.fail(ControlError::InvalidValue {
                    offset,
                    found: char::from(byte),
                })),
            });
        }

        let result = match self.bytes.get(offset + 1) {
            None => Err(ControlError::TruncatedMarker { offset }),
            Some(&FUNCTION_TAG) => self.function_marker(offset),
            Some(&OPPORTUNITY_TAG) => match self.bytes.get(offset + 2) {
                None => Err(ControlError::TruncatedMarker { offset }),
                Some(&b) => match value_of(b) {
                    Some(id) => {
                        self.pos = offset + 3;
                        Ok(Token::Opportunity(id))
                    }
                    None => Err(ControlError::InvalidValue {
                        offset: offset + 2,
                        found: char::from(b),
                    }),
                },
            },
            Some(&other) => Err(ControlError::UnknownMarker {
                offset,
                found: char::from(other),
            }),
        };
        Some(result.map_err(|e| self.fail(e)))
    }
}

impl Tokens<'_> {
    fn function_marker(&mut self, offset: usize) -> Result<Token, ControlError> {
        let start = offset + 2;
        let len = self.bytes[start..]
            .iter()
            .position(|&b| b == FUNCTION_TAG)
            .ok_or(ControlError::UnterminatedFunctionMarker { offset })?;
        let digits = &self.bytes[start..start + len];
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(ControlError::InvalidFunctionId { offset });
        }
        let id = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(ControlError::InvalidFunctionId { offset })?;
        self.pos = start + len + 1;
        Ok(Token::Function(id))
    }

    /// Stop iterating after the first error.
    fn fail(&mut self, err: ControlError) -> ControlError {
        self.pos = self.bytes.len();
        err
    }
}

/// A value token decoded together with the group it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedValue {
    pub function_id: u32,
    pub opportunity_id: u32,
    pub value: u32,
}

/// Serialized decision set handed to the toolchain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ControlString(String);

impl ControlString {
    pub fn new() -> Self {
        Self(String::new())
    }

    /// Parse and validate a control string.
    pub fn parse(text: &str) -> Result<Self, ControlError> {
        for token in tokens(text) {
            token?;
        }
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// This string followed by `suffix`.
    pub fn concat(&self, suffix: &str) -> Self {
        let mut text = String::with_capacity(self.0.len() + suffix.len());
        text.push_str(&self.0);
        text.push_str(suffix);
        Self(text)
    }

    pub fn tokens(&self) -> Tokens<'_> {
        tokens(&self.0)
    }

    /// Number of value tokens, markers excluded.
    pub fn count_values(&self) -> Result<usize, ControlError> {
        count_encoded_values(&self.0)
    }

    /// Decode every value token with its function and opportunity group.
    pub fn decode(&self) -> Result<Vec<DecodedValue>, ControlError> {
        decode(&self.0)
    }

    /// Replace the value of the `position`-th value token.
    pub fn set_value_at(&mut self, position: usize, value: u32) -> Result<(), ControlError> {
        let offset = self.value_offset(position)?;
        let c = value_char(value).ok_or(ControlError::ValueOutOfRange { value })?;
        self.0.replace_range(offset..offset + 1, c.encode_utf8(&mut [0; 4]));
        Ok(())
    }

    /// The prefix holding exactly the first `count` value tokens.
    ///
    /// Markers that would open a group after the last kept value are dropped.
    pub fn prefix_values(&self, count: usize) -> Result<Self, ControlError> {
        if count == 0 {
            return Ok(Self::new());
        }
        let offset = self.value_offset(count - 1)?;
        Ok(Self(self.0[..=offset].to_string()))
    }

    fn value_offset(&self, position: usize) -> Result<usize, ControlError> {
        let mut seen = 0;
        for token in self.tokens() {
            if let Token::Value { offset, .. } = token? {
                if seen == position {
                    return Ok(offset);
                }
                seen += 1;
            }
        }
        Err(ControlError::PositionOutOfRange {
            position,
            count: seen,
        })
    }
}

impl fmt::Display for ControlString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ControlString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Tokenize a control string.
pub fn tokens(text: &str) -> Tokens<'_> {
    Tokens {
        bytes: text.as_bytes(),
        pos: 0,
    }
}

/// Number of value tokens in `text`, markers excluded.
pub fn count_encoded_values(text: &str) -> Result<usize, ControlError> {
    let mut count = 0;
    for token in tokens(text) {
        if matches!(token?, Token::Value { .. }) {
            count += 1;
        }
    }
    Ok(count)
}

/// Decode every value token in `text` together with its group.
pub fn decode(text: &str) -> Result<Vec<DecodedValue>, ControlError> {
    let mut function_id = None;
    let mut opportunity_id = None;
    let mut values = Vec::new();
    for token in tokens(text) {
        match token? {
            Token::Function(id) => function_id = Some(id),
            Token::Opportunity(id) => opportunity_id = Some(id),
            Token::Value { offset, value } => {
                let (Some(function_id), Some(opportunity_id)) = (function_id, opportunity_id)
                else {
                    return Err(ControlError::ValueOutsideGroup { offset });
                };
                values.push(DecodedValue {
                    function_id,
                    opportunity_id,
                    value,
                });
            }
        }
    }
    Ok(values)
}

/// Serialize `choices[..up_to]` at their current values.
pub fn encode(choices: &[Choice], up_to: usize) -> ControlString {
    let layout = ControlLayout::new(choices);
    ControlString(layout.prefix(up_to).to_string())
}

/// Full encoding of an ordered choice list plus the offset of every value.
///
/// The explorer keeps one layout per run: cutting a prefix and updating a
/// single value are both O(1) lookups.
#[derive(Debug, Clone)]
pub struct ControlLayout {
    text: String,
    offsets: Vec<usize>,
}

impl ControlLayout {
    pub fn new(choices: &[Choice]) -> Self {
        let mut text = String::new();
        let mut offsets = Vec::with_capacity(choices.len());
        let mut last_function = None;
        let mut last_opportunity = None;

        for choice in choices {
            if last_function != Some(choice.function_id) {
                text.push_str(&format!("#f{}f", choice.function_id));
                last_function = Some(choice.function_id);
            }
            if last_opportunity != Some(choice.opportunity_id) {
                text.push('#');
                text.push(char::from(OPPORTUNITY_TAG));
                text.push(value_char(choice.opportunity_id).unwrap_or('0'));
                last_opportunity = Some(choice.opportunity_id);
            }
            offsets.push(text.len());
            text.push(value_char(choice.value()).unwrap_or('0'));
        }

        Self { text, offsets }
    }

    /// Number of encoded choices.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Encoding of the first `up_to` choices; `up_to` is clamped to the length.
    pub fn prefix(&self, up_to: usize) -> &str {
        match up_to.min(self.offsets.len()) {
            0 => "",
            n => &self.text[..=self.offsets[n - 1]],
        }
    }

    /// Byte offset of the value token of the choice at `position`.
    pub fn offset(&self, position: usize) -> Option<usize> {
        self.offsets.get(position).copied()
    }

    /// Overwrite the value token of the choice at `position`.
    pub fn set_value(&mut self, position: usize, value: u32) -> Result<(), ControlError> {
        let offset = self.offset(position).ok_or(ControlError::PositionOutOfRange {
            position,
            count: self.offsets.len(),
        })?;
        let c = value_char(value).ok_or(ControlError::ValueOutOfRange { value })?;
        self.text.replace_range(offset..offset + 1, c.encode_utf8(&mut [0; 4]));
        Ok(())
    }
}
