//! Session character sets: negotiation, conversion and multi-byte aware
//! escaping.
//!
//! Every byte string that crosses the wire (statement text, parameter
//! literals, result values) is in the connection charset. Scanning such a
//! string byte by byte is only safe when the scanner knows where multi-byte
//! characters start and end, because in big5, gbk and sjis the trailing byte
//! of a character can be `\` (0x5C) and in some invalid sequences `'`.

use std::borrow::Cow;

use encoding_rs::{Encoding, EncoderResult};

use crate::connstr::ConnectionAttributes;
use crate::error::{DriverError, Result};

pub const DEFAULT_CHARSET: &str = "latin1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MbScheme {
    SingleByte,
    /// Raw bytes; each byte stands for the code point of the same value.
    Binary,
    Utf8 { max: usize },
    Big5,
    Gbk,
    Sjis,
    EucJp,
    EucKr,
}

/// A negotiated character set.
#[derive(Debug, Clone, Copy)]
pub struct Charset {
    name: &'static str,
    encoding: &'static Encoding,
    mbmaxlen: usize,
    scheme: MbScheme,
}

impl PartialEq for Charset {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Charset {}

impl Charset {
    pub fn lookup(name: &str) -> Option<Charset> {
        let lower = name.trim().to_ascii_lowercase();
        let (name, encoding, mbmaxlen, scheme): (&'static str, &'static Encoding, usize, MbScheme) =
            match lower.as_str() {
                "latin1" => ("latin1", encoding_rs::WINDOWS_1252, 1, MbScheme::SingleByte),
                "ascii" => ("ascii", encoding_rs::WINDOWS_1252, 1, MbScheme::SingleByte),
                "binary" => ("binary", encoding_rs::WINDOWS_1252, 1, MbScheme::Binary),
                "latin2" => ("latin2", encoding_rs::ISO_8859_2, 1, MbScheme::SingleByte),
                "cp1250" => ("cp1250", encoding_rs::WINDOWS_1250, 1, MbScheme::SingleByte),
                "cp1251" => ("cp1251", encoding_rs::WINDOWS_1251, 1, MbScheme::SingleByte),
                "koi8r" => ("koi8r", encoding_rs::KOI8_R, 1, MbScheme::SingleByte),
                "greek" => ("greek", encoding_rs::ISO_8859_7, 1, MbScheme::SingleByte),
                "hebrew" => ("hebrew", encoding_rs::ISO_8859_8, 1, MbScheme::SingleByte),
                "utf8" | "utf8mb3" => ("utf8", encoding_rs::UTF_8, 3, MbScheme::Utf8 { max: 3 }),
                "utf8mb4" => ("utf8mb4", encoding_rs::UTF_8, 4, MbScheme::Utf8 { max: 4 }),
                "big5" => ("big5", encoding_rs::BIG5, 2, MbScheme::Big5),
                "gbk" => ("gbk", encoding_rs::GBK, 2, MbScheme::Gbk),
                "gb2312" => ("gb2312", encoding_rs::GBK, 2, MbScheme::Gbk),
                "sjis" => ("sjis", encoding_rs::SHIFT_JIS, 2, MbScheme::Sjis),
                "cp932" => ("cp932", encoding_rs::SHIFT_JIS, 2, MbScheme::Sjis),
                "ujis" => ("ujis", encoding_rs::EUC_JP, 3, MbScheme::EucJp),
                "eucjpms" => ("eucjpms", encoding_rs::EUC_JP, 3, MbScheme::EucJp),
                "euckr" => ("euckr", encoding_rs::EUC_KR, 2, MbScheme::EucKr),
                _ => return None,
            };
        Some(Charset {
            name,
            encoding,
            mbmaxlen,
            scheme,
        })
    }

    pub fn binary() -> Charset {
        Charset {
            name: "binary",
            encoding: encoding_rs::WINDOWS_1252,
            mbmaxlen: 1,
            scheme: MbScheme::Binary,
        }
    }

    pub fn latin1() -> Charset {
        Charset {
            name: "latin1",
            encoding: encoding_rs::WINDOWS_1252,
            mbmaxlen: 1,
            scheme: MbScheme::SingleByte,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_bytes_per_char(&self) -> usize {
        self.mbmaxlen
    }

    pub fn is_multibyte(&self) -> bool {
        self.mbmaxlen > 1
    }

    /// Length of the valid multi-byte character at the head of `bytes`, or 0
    /// when the head is a single-byte character or an invalid sequence.
    pub fn mb_len(&self, bytes: &[u8]) -> usize {
        let Some(&b0) = bytes.first() else { return 0 };
        let b1 = bytes.get(1).copied();
        match self.scheme {
            MbScheme::SingleByte | MbScheme::Binary => 0,
            MbScheme::Utf8 { max } => {
                let need = match b0 {
                    0xC2..=0xDF => 2,
                    0xE0..=0xEF => 3,
                    0xF0..=0xF4 if max == 4 => 4,
                    _ => return 0,
                };
                if bytes.len() < need || !bytes[1..need].iter().all(|b| (0x80..=0xBF).contains(b)) {
                    return 0;
                }
                need
            }
            MbScheme::Big5 => match (b0, b1) {
                (0xA1..=0xF9, Some(0x40..=0x7E | 0xA1..=0xFE)) => 2,
                _ => 0,
            },
            MbScheme::Gbk => match (b0, b1) {
                (0x81..=0xFE, Some(0x40..=0x7E | 0x80..=0xFE)) => 2,
                _ => 0,
            },
            MbScheme::Sjis => match (b0, b1) {
                (0x81..=0x9F | 0xE0..=0xFC, Some(0x40..=0x7E | 0x80..=0xFC)) => 2,
                _ => 0,
            },
            MbScheme::EucKr => match (b0, b1) {
                (0xA1..=0xFE, Some(0xA1..=0xFE)) => 2,
                _ => 0,
            },
            MbScheme::EucJp => match (b0, b1, bytes.get(2).copied()) {
                (0x8E, Some(0xA1..=0xDF), _) => 2,
                (0x8F, Some(0xA1..=0xFE), Some(0xA1..=0xFE)) => 3,
                (0xA1..=0xFE, Some(0xA1..=0xFE), _) => 2,
                _ => 0,
            },
        }
    }

    /// Nominal length announced by a lead byte, whether or not the rest of
    /// the sequence is present and valid.
    fn lead_len(&self, b0: u8) -> usize {
        match self.scheme {
            MbScheme::SingleByte | MbScheme::Binary => 1,
            MbScheme::Utf8 { max } => match b0 {
                0xC2..=0xDF => 2,
                0xE0..=0xEF => 3,
                0xF0..=0xF4 if max == 4 => 4,
                _ => 1,
            },
            MbScheme::Big5 if (0xA1..=0xF9).contains(&b0) => 2,
            MbScheme::Gbk if (0x81..=0xFE).contains(&b0) => 2,
            MbScheme::Sjis if matches!(b0, 0x81..=0x9F | 0xE0..=0xFC) => 2,
            MbScheme::EucKr if (0xA1..=0xFE).contains(&b0) => 2,
            MbScheme::EucJp if b0 == 0x8F => 3,
            MbScheme::EucJp if b0 == 0x8E || (0xA1..=0xFE).contains(&b0) => 2,
            _ => 1,
        }
    }

    /// Splits `bytes` into characters: each item is `(offset, len)`.
    pub fn chars<'a>(&'a self, bytes: &'a [u8]) -> impl Iterator<Item = (usize, usize)> + 'a {
        let mut pos = 0;
        std::iter::from_fn(move || {
            if pos >= bytes.len() {
                return None;
            }
            let len = self.mb_len(&bytes[pos..]).max(1);
            let item = (pos, len);
            pos += len;
            Some(item)
        })
    }

    pub fn char_count(&self, bytes: &[u8]) -> usize {
        self.chars(bytes).count()
    }

    /// Bytes in this charset to text.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        if self.scheme == MbScheme::Binary {
            return match std::str::from_utf8(bytes) {
                Ok(text) if text.is_ascii() => Cow::Borrowed(text),
                _ => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
            };
        }
        self.encoding.decode_without_bom_handling(bytes).0
    }

    /// Text to bytes in this charset; unmappable characters become `?`.
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        if self.scheme == MbScheme::Binary && !text.is_ascii() {
            return Cow::Owned(text.chars().map(|c| u8::try_from(c).unwrap_or(b'?')).collect());
        }
        if self.encoding == encoding_rs::UTF_8 || text.is_ascii() {
            return Cow::Borrowed(text.as_bytes());
        }
        let mut encoder = self.encoding.new_encoder();
        let mut out = Vec::with_capacity(text.len() * 2 + 16);
        let mut src = text;
        loop {
            let (result, read) =
                encoder.encode_from_utf8_to_vec_without_replacement(src, &mut out, true);
            src = &src[read..];
            match result {
                EncoderResult::InputEmpty => break,
                EncoderResult::OutputFull => out.reserve(src.len() * 2 + 16),
                EncoderResult::Unmappable(_) => out.push(b'?'),
            }
        }
        Cow::Owned(out)
    }

    /// Appends `src` to `out` with string-literal escaping. Valid multi-byte
    /// characters are copied untouched; an orphaned lead byte is escaped so
    /// it cannot swallow the byte that follows it.
    pub fn escape_into(&self, src: &[u8], out: &mut Vec<u8>) {
        let mut i = 0;
        while i < src.len() {
            let mb = self.mb_len(&src[i..]);
            if mb > 1 {
                out.extend_from_slice(&src[i..i + mb]);
                i += mb;
                continue;
            }
            let b = src[i];
            if self.is_multibyte() && self.lead_len(b) > 1 {
                out.push(b'\\');
                out.push(b);
            } else {
                match b {
                    0 => out.extend_from_slice(b"\\0"),
                    b'\n' => out.extend_from_slice(b"\\n"),
                    b'\r' => out.extend_from_slice(b"\\r"),
                    b'\\' => out.extend_from_slice(b"\\\\"),
                    b'\'' => out.extend_from_slice(b"\\'"),
                    b'"' => out.extend_from_slice(b"\\\""),
                    0x1A => out.extend_from_slice(b"\\Z"),
                    _ => out.push(b),
                }
            }
            i += 1;
        }
    }

    pub fn escape(&self, src: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(src.len() + 8);
        self.escape_into(src, &mut out);
        out
    }

    /// Reverses `escape_into`.
    pub fn unescape(&self, src: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(src.len());
        let mut i = 0;
        while i < src.len() {
            let mb = self.mb_len(&src[i..]);
            if mb > 1 {
                out.extend_from_slice(&src[i..i + mb]);
                i += mb;
                continue;
            }
            if src[i] == b'\\' && i + 1 < src.len() {
                out.push(match src[i + 1] {
                    b'0' => 0,
                    b'n' => b'\n',
                    b'r' => b'\r',
                    b'Z' => 0x1A,
                    other => other,
                });
                i += 2;
            } else {
                out.push(src[i]);
                i += 1;
            }
        }
        out
    }
}

/// Resolves the session charset from connection attributes.
pub fn negotiate(attrs: &ConnectionAttributes) -> Result<Charset> {
    let requested = attrs
        .get("CHARSET")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_CHARSET);
    Charset::lookup(requested)
        .ok_or_else(|| DriverError::InvalidAttributeValue(format!("unknown charset {requested}")))
}
