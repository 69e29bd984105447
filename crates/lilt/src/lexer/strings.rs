//! String and character lexing.
//!
//! `"..."` is a dynamic string: escape sequences are processed here and
//! `{...}` interpolation splices are left intact for the parser to expand.
//! `'...'` is a raw byte string with no escapes; when its content is exactly
//! one character it lexes as a `Char` (one byte) or `Uni` (one code point)
//! literal instead.

use super::{Lexer, Token, TokenKind, TokenValue};

impl Lexer<'_> {
    /// A dynamic string; the opening quote is already consumed.
    pub(super) fn lex_dynamic_string(&mut self, start: usize) -> Token {
        let mut text = String::new();
        loop {
            let Some(c) = self.peek_byte() else {
                return self.error_token(start, "Unterminated string");
            };
            match c {
                b'"' => {
                    self.pos += 1;
                    return self.finish_string(TokenKind::DynString, start, text);
                }
                b'\\' => {
                    self.pos += 1;
                    match self.lex_escape() {
                        Ok(escaped) => text.push(escaped),
                        Err(message) => return self.error_token(start, message),
                    }
                }
                b'\n' | b'\r' => {
                    self.pos += 1;
                    self.newline(c);
                    text.push('\n');
                }
                _ => {
                    let (ch, len) = self.decode_char(self.pos);
                    self.pos += len;
                    text.push(ch);
                }
            }
        }
    }

    /// A raw string; the opening quote is already consumed. One-character
    /// content lexes as a character literal.
    pub(super) fn lex_raw_string(&mut self, start: usize) -> Token {
        let content_start = self.pos;
        loop {
            let Some(c) = self.peek_byte() else {
                return self.error_token(start, "Unterminated raw string");
            };
            match c {
                b'\'' => {
                    let content = String::from_utf8_lossy(&self.src[content_start..self.pos]).into_owned();
                    self.pos += 1;
                    let mut chars = content.chars();
                    if let (Some(only), None) = (chars.next(), chars.next()) {
                        let mut token = if only.is_ascii() {
                            let mut t = self.simple(TokenKind::Char, start, &content);
                            t.value = TokenValue::Char(only as u8);
                            t
                        } else {
                            let mut t = self.simple(TokenKind::Uni, start, &content);
                            t.value = TokenValue::Uni(only);
                            t
                        };
                        token.text = content;
                        return token;
                    }
                    return self.finish_string(TokenKind::RawString, start, content);
                }
                b'\n' | b'\r' => {
                    self.pos += 1;
                    self.newline(c);
                }
                _ => self.pos += 1,
            }
        }
    }

    fn finish_string(&self, kind: TokenKind, start: usize, text: String) -> Token {
        let mut token = self.simple(kind, start, "");
        token.text = text;
        token
    }

    /// One escape sequence, after the backslash.
    fn lex_escape(&mut self) -> Result<char, String> {
        let Some(c) = self.peek_byte() else {
            return Err(String::from("Unterminated string escape"));
        };
        self.pos += 1;
        Ok(match c {
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'a' => '\x07',
            b'b' => '\x08',
            b'f' => '\x0C',
            b'v' => '\x0B',
            b'0' => '\0',
            b'\\' => '\\',
            b'"' => '"',
            b'\'' => '\'',
            b'{' => '{',
            b'}' => '}',
            b'x' => {
                let value = self.hex_escape_digits(2)?;
                char::from_u32(value).ok_or_else(|| String::from("Invalid \\x escape"))?
            }
            b'u' => {
                let value = self.hex_escape_digits(4)?;
                char::from_u32(value).ok_or_else(|| String::from("Invalid \\u escape"))?
            }
            other => {
                return Err(format!("Unknown string escape \"\\{}\"", char::from(other)));
            }
        })
    }

    fn hex_escape_digits(&mut self, count: usize) -> Result<u32, String> {
        let mut value = 0_u32;
        for _ in 0..count {
            let Some(c) = self.peek_byte() else {
                return Err(String::from("Unterminated string escape"));
            };
            let Some(digit) = (c as char).to_digit(16) else {
                return Err(String::from("Invalid hex digit in string escape"));
            };
            value = value * 16 + digit;
            self.pos += 1;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn lex_one(source: &str) -> Token {
        let mut lexer = Lexer::new(source, Arc::from("test.lt"));
        lexer.next_token()
    }

    #[test]
    fn dynamic_string_processes_escapes() {
        let token = lex_one(r#""a\tb\n\x41\u0042""#);
        assert_eq!(token.kind, TokenKind::DynString);
        assert_eq!(token.text, "a\tb\nAB");
    }

    #[test]
    fn interpolation_braces_pass_through() {
        let token = lex_one(r#""x = {x}""#);
        assert_eq!(token.kind, TokenKind::DynString);
        assert_eq!(token.text, "x = {x}");
    }

    #[test]
    fn raw_string_takes_no_escapes() {
        let token = lex_one(r"'a\tb'");
        assert_eq!(token.kind, TokenKind::RawString);
        assert_eq!(token.text, r"a\tb");
    }

    #[test]
    fn single_character_raw_strings_are_char_literals() {
        let token = lex_one("'a'");
        assert_eq!(token.kind, TokenKind::Char);
        assert_eq!(token.value, TokenValue::Char(b'a'));

        let uni = lex_one("'Ω'");
        assert_eq!(uni.kind, TokenKind::Uni);
        assert_eq!(uni.value, TokenValue::Uni('Ω'));
    }

    #[test]
    fn unterminated_strings_error() {
        assert_eq!(lex_one("\"abc").kind, TokenKind::Error);
        assert_eq!(lex_one("'abc").kind, TokenKind::Error);
    }

    #[test]
    fn unknown_escape_is_an_error() {
        assert_eq!(lex_one(r#""\q""#).kind, TokenKind::Error);
    }
}
