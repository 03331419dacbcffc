// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Wire codec for API sentences.
//!
//! Each word is preceded by its length, encoded in 1 to 5 bytes:
//!
//! | length              | encoding                        |
//! |---------------------|---------------------------------|
//! | `< 0x80`            | 1 byte                          |
//! | `< 0x4000`          | 2 bytes, or-ed with `0x8000`    |
//! | `< 0x20_0000`       | 3 bytes, or-ed with `0xC0_0000` |
//! | `< 0x1000_0000`     | 4 bytes, or-ed with `0xE000_0000` |
//! | otherwise           | `0xF0` followed by 4 bytes      |
//!
//! A sentence ends with a zero-length word. First bytes `0xF1..=0xFF` are reserved control bytes.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::sentence::Sentence;

/// Refuse words longer than this. The router never sends anything close to it.
pub const MAX_WORD_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reserved control byte {0:#04x} in word length")]
    ControlByte(u8),
    #[error("Word of length {0} exceeds the maximum word length")]
    WordTooLong(usize),
    #[error("Unexpected reply word '{0}'")]
    UnexpectedReply(String),
}

/// Append the encoding of `len` to `dst`
///
/// # Errors
/// Fails if `len` exceeds [`MAX_WORD_LEN`].
#[allow(clippy::cast_possible_truncation)]
pub fn encode_length(len: usize, dst: &mut BytesMut) -> Result<(), CodecError> {
    if len > MAX_WORD_LEN {
        return Err(CodecError::WordTooLong(len));
    }
    let len32 = len as u32;
    match len {
        0..0x80 => dst.put_u8(len32 as u8),
        0x80..0x4000 => dst.put_u16(len32 as u16 | 0x8000),
        0x4000..0x20_0000 => dst.put_slice(&(len32 | 0xC0_0000).to_be_bytes()[1..]),
        0x20_0000..0x1000_0000 => dst.put_u32(len32 | 0xE000_0000),
        _ => {
            dst.put_u8(0xF0);
            dst.put_u32(len32);
        }
    }
    Ok(())
}

/// Decode a word length from the start of `src`.
/// Returns the length and the number of bytes used to encode it, or `None` if `src` is too short.
///
/// # Errors
/// Fails if the first byte is a reserved control byte.
pub fn decode_length(src: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let Some(&first) = src.first() else {
        return Ok(None);
    };
    let (size, mask) = match first {
        0x00..=0x7F => (1, 0x7F),
        0x80..=0xBF => (2, 0x3F),
        0xC0..=0xDF => (3, 0x1F),
        0xE0..=0xEF => (4, 0x0F),
        0xF0 => (5, 0x00),
        control => return Err(CodecError::ControlByte(control)),
    };
    let Some(rest) = src.get(1..size) else {
        return Ok(None);
    };
    let len = rest
        .iter()
        .fold(usize::from(first & mask), |len, b| (len << 8) | usize::from(*b));
    Ok(Some((len, size)))
}

/// Codec framing [`Sentence`]s over a byte stream
#[derive(Debug, Default)]
pub struct SentenceCodec;

impl Decoder for SentenceCodec {
    type Item = Sentence;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Sentence>, CodecError> {
        let mut words = Vec::new();
        let mut offset = 0;
        loop {
            let Some((len, size)) = decode_length(&src[offset..])? else {
                return Ok(None);
            };
            if len > MAX_WORD_LEN {
                return Err(CodecError::WordTooLong(len));
            }
            let start = offset + size;
            if len == 0 {
                src.advance(start);
                return Ok(Some(Sentence::new(words)));
            }
            let Some(word) = src.get(start..start + len) else {
                src.reserve(start + len - src.len());
                return Ok(None);
            };
            words.push(String::from_utf8_lossy(word).into_owned());
            offset = start + len;
        }
    }
}

impl Encoder<Sentence> for SentenceCodec {
    type Error = CodecError;

    fn encode(&mut self, sentence: Sentence, dst: &mut BytesMut) -> Result<(), CodecError> {
        for word in sentence.words() {
            encode_length(word.len(), dst)?;
            dst.put_slice(word.as_bytes());
        }
        dst.put_u8(0);
        Ok(())
    }
}
