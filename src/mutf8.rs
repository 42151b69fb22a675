//! Modified UTF-8 as used by both DEX string data and class file `Utf8` entries.
//!
//! NUL is stored as the overlong pair `0xC0 0x80` and supplementary characters as
//! surrogate pairs. Bytes that do not decode are kept verbatim so a rebuild can
//! write them back unchanged.

use std::borrow::Cow;

use cesu8::{from_java_cesu8, to_java_cesu8};
use log::warn;

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum JavaString
{
    Decoded(String),
    Raw(Vec<u8>),
}

impl JavaString
{
    pub fn from_string(s: &str) -> JavaString
    {
        JavaString::Decoded(s.to_string())
    }

    pub fn decode(bytes: &[u8]) -> JavaString
    {
        // A single-byte NUL is never valid; neither is any form that would
        // not encode back to the same bytes.
        let decoded = match from_java_cesu8(bytes)
        {
            Ok(converted) if !bytes.contains(&0) => converted.into_owned(),
            _ => {
                warn!("string of {} bytes is not valid modified UTF-8, keeping raw bytes", bytes.len());
                return JavaString::Raw(bytes.to_vec());
            }
        };
        if to_java_cesu8(&decoded).as_ref() != bytes {
            warn!("string of {} bytes is not in canonical modified UTF-8, keeping raw bytes", bytes.len());
            return JavaString::Raw(bytes.to_vec());
        }
        JavaString::Decoded(decoded)
    }

    pub fn encode(&self) -> Cow<'_, [u8]>
    {
        match self
        {
            JavaString::Decoded(s) => to_java_cesu8(s),
            JavaString::Raw(v) => Cow::Borrowed(v.as_slice()),
        }
    }

    /// Number of UTF-16 code units, as recorded in a DEX `string_data_item`.
    pub fn utf16_len(&self) -> usize
    {
        match self
        {
            JavaString::Decoded(s) => s.encode_utf16().count(),
            JavaString::Raw(v) => String::from_utf8_lossy(v).encode_utf16().count(),
        }
    }

    pub fn as_str(&self) -> Option<&str>
    {
        match self
        {
            JavaString::Decoded(s) => Some(s),
            JavaString::Raw(_) => None,
        }
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str>
    {
        match self
        {
            JavaString::Decoded(s) => Cow::Borrowed(s),
            JavaString::Raw(v) => String::from_utf8_lossy(v),
        }
    }

    pub fn is_decoded(&self) -> bool
    {
        matches!(self, JavaString::Decoded(_))
    }
}
