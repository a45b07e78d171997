//! Client-side statement text scanning.
//!
//! Everything here works on bytes in the connection charset and relies on
//! [`Charset::mb_len`] so that the trailing byte of a multi-byte character is
//! never mistaken for a quote, a `?` or a `;`.

use crate::charset::Charset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    /// A single byte of statement code.
    Code,
    /// A multi-byte character outside any literal.
    Char,
    Quoted,
    Comment,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

struct Lexer<'a> {
    text: &'a [u8],
    cs: &'a Charset,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a [u8], cs: &'a Charset) -> Self {
        Self { text, cs, pos: 0 }
    }

    fn skip_quoted(&mut self, quote: u8) {
        let backslash_escapes = quote != b'`';
        while self.pos < self.text.len() {
            let mb = self.cs.mb_len(&self.text[self.pos..]);
            if mb > 1 {
                self.pos += mb;
                continue;
            }
            let b = self.text[self.pos];
            if b == b'\\' && backslash_escapes {
                self.pos = (self.pos + 2).min(self.text.len());
                continue;
            }
            self.pos += 1;
            if b == quote {
                // A doubled quote stays inside the literal.
                if self.text.get(self.pos) == Some(&quote) {
                    self.pos += 1;
                    continue;
                }
                return;
            }
        }
    }

    fn skip_line(&mut self) {
        while self.pos < self.text.len() && self.text[self.pos] != b'\n' {
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) {
        match find(&self.text[self.pos..], b"*/") {
            Some(i) => self.pos += i + 2,
            None => self.pos = self.text.len(),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        let start = self.pos;
        let rest = self.text.get(start..).filter(|r| !r.is_empty())?;
        let mb = self.cs.mb_len(rest);
        if mb > 1 {
            self.pos += mb;
            return Some(Token { kind: TokenKind::Char, start, end: self.pos });
        }
        self.pos += 1;
        let kind = match rest[0] {
            q @ (b'\'' | b'"' | b'`') => {
                self.skip_quoted(q);
                TokenKind::Quoted
            }
            b'#' => {
                self.skip_line();
                TokenKind::Comment
            }
            b'-' if rest.get(1) == Some(&b'-')
                && rest.get(2).map_or(true, |b| b.is_ascii_whitespace()) =>
            {
                self.skip_line();
                TokenKind::Comment
            }
            b'/' if rest.get(1) == Some(&b'*') => {
                self.pos += 1;
                self.skip_block_comment();
                TokenKind::Comment
            }
            _ => TokenKind::Code,
        };
        Some(Token { kind, start, end: self.pos })
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn code_bytes<'a>(text: &'a [u8], cs: &'a Charset) -> impl Iterator<Item = (usize, u8)> + 'a {
    Lexer::new(text, cs)
        .filter(|t| t.kind == TokenKind::Code)
        .map(move |t| (t.start, text[t.start]))
}

/// Byte offsets of the `?` parameter markers.
pub fn placeholders(text: &[u8], cs: &Charset) -> Vec<usize> {
    code_bytes(text, cs)
        .filter(|&(_, b)| b == b'?')
        .map(|(i, _)| i)
        .collect()
}

/// Replaces each marker at `positions` with the matching literal.
pub fn substitute(text: &[u8], positions: &[usize], literals: &[Vec<u8>]) -> Vec<u8> {
    let extra: usize = literals.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(text.len() + extra);
    let mut last = 0;
    for (&pos, literal) in positions.iter().zip(literals) {
        out.extend_from_slice(&text[last..pos]);
        out.extend_from_slice(literal);
        last = pos + 1;
    }
    out.extend_from_slice(&text[last..]);
    out
}

/// Splits a multi-statement batch on top-level `;`. Empty statements are
/// dropped.
pub fn split_batch<'a>(text: &'a [u8], cs: &Charset) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, b) in code_bytes(text, cs) {
        if b == b';' {
            parts.push(&text[start..i]);
            start = i + 1;
        }
    }
    parts.push(&text[start..]);
    parts
        .into_iter()
        .map(trim_ascii)
        .filter(|p| !p.is_empty())
        .collect()
}

fn trim_ascii(mut s: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = s {
        if !first.is_ascii_whitespace() {
            break;
        }
        s = rest;
    }
    while let [rest @ .., last] = s {
        if !last.is_ascii_whitespace() {
            break;
        }
        s = rest;
    }
    s
}

/// First `n` keywords of a statement, skipping whitespace and comments.
fn leading_words(text: &[u8], cs: &Charset, n: usize) -> Vec<Vec<u8>> {
    let mut words: Vec<Vec<u8>> = Vec::new();
    let mut current = Vec::new();
    for token in Lexer::new(text, cs) {
        let b = text[token.start];
        if token.kind == TokenKind::Code && (b.is_ascii_alphanumeric() || b == b'_') {
            current.push(b.to_ascii_uppercase());
            continue;
        }
        if !current.is_empty() {
            words.push(std::mem::take(&mut current));
            if words.len() == n {
                return words;
            }
        }
        let separator = token.kind == TokenKind::Comment
            || (token.kind == TokenKind::Code && b.is_ascii_whitespace());
        if !separator {
            return words;
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// `SET NAMES` would change the session charset behind the driver's back.
pub fn is_set_names(text: &[u8], cs: &Charset) -> bool {
    let words = leading_words(text, cs, 2);
    words.len() == 2 && words[0] == b"SET" && words[1] == b"NAMES"
}

/// Rewrites ODBC escape clauses into server syntax.
pub fn native_sql(text: &[u8], cs: &Charset) -> Vec<u8> {
    if !text.contains(&b'{') {
        return text.to_vec();
    }
    let mut out = Vec::with_capacity(text.len());
    // One entry per open brace: whether it opened an escape clause.
    let mut open: Vec<bool> = Vec::new();
    let mut lexer = Lexer::new(text, cs);
    while let Some(token) = lexer.next() {
        let chunk = &text[token.start..token.end];
        if token.kind != TokenKind::Code {
            out.extend_from_slice(chunk);
            continue;
        }
        match chunk[0] {
            b'{' => match escape_clause(&text[token.end..]) {
                Some((consumed, prefix)) => {
                    out.extend_from_slice(prefix);
                    lexer.pos = token.end + consumed;
                    open.push(true);
                }
                None => {
                    out.push(b'{');
                    open.push(false);
                }
            },
            b'}' => {
                if !open.pop().unwrap_or(false) {
                    out.push(b'}');
                }
            }
            b => out.push(b),
        }
    }
    out
}

/// Recognizes the keyword after `{`: returns the bytes consumed (keyword and
/// surrounding whitespace) and the replacement text.
fn escape_clause(rest: &[u8]) -> Option<(usize, &'static [u8])> {
    let lead = rest.iter().take_while(|b| b.is_ascii_whitespace()).count();
    let word_len = rest[lead..]
        .iter()
        .take_while(|b| b.is_ascii_alphabetic() || **b == b'?' || **b == b'=')
        .count();
    let word = rest[lead..lead + word_len].to_ascii_lowercase();
    let prefix: &'static [u8] = match word.as_slice() {
        b"fn" | b"oj" => b"",
        b"d" => b"DATE ",
        b"t" => b"TIME ",
        b"ts" => b"TIMESTAMP ",
        b"call" => b"CALL ",
        b"escape" => b"ESCAPE ",
        b"?=" => {
            // {?= call proc(...)}: the return value marker is dropped.
            let after = &rest[lead + word_len..];
            let ws = after.iter().take_while(|b| b.is_ascii_whitespace()).count();
            if after[ws..].len() >= 4 && after[ws..ws + 4].eq_ignore_ascii_case(b"call") {
                let trail = after[ws + 4..].iter().take_while(|b| b.is_ascii_whitespace()).count();
                return Some((lead + word_len + ws + 4 + trail, b"CALL "));
            }
            return None;
        }
        _ => return None,
    };
    let trail = rest[lead + word_len..]
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();
    Some((lead + word_len + trail, prefix))
}

/// Leading keyword, upper-cased.
pub fn first_keyword(text: &[u8], cs: &Charset) -> Option<String> {
    leading_words(text, cs, 1)
        .into_iter()
        .next()
        .map(|w| String::from_utf8_lossy(&w).into_owned())
}
