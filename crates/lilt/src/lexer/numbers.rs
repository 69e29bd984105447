//! Number lexing.
//!
//! `0x` introduces hex; a leading `0` with more digits is octal (where 8 and
//! 9 are errors); anything else is decimal. A decimal integer followed by
//! `.` and digits becomes a real. Digit separators `_` `'` `"` are skipped
//! inside runs. Suffixes choose the numeric kind: integers take `s`/`t`/`x`
//! for Int16/Int32/Byte, reals take `f`/`t`/`tf`/`L`/`Lf` for
//! Float64/Real32/Float32/Real128/Float128 (the last reporting unsupported).
//! Overflow and trailing letterforms produce typed error tokens.

use super::{Lexer, Token, TokenKind, TokenValue};
use crate::unicode;

impl Lexer<'_> {
    /// A number starting with a nonzero digit: decimal integer or real.
    pub(super) fn lex_decimal(&mut self, start: usize) -> Token {
        let Some(value) = self.scan_decimal_digits() else {
            self.skip_digit_run();
            return self.error_token(start, "Number is too large for its Integer64 type");
        };
        if self.at_real_fraction() {
            return self.lex_real(start);
        }
        let suffix = self.collect_suffix();
        if let Some(err) = self.ensure_end_of_number(start) {
            return err;
        }
        self.finish_integer(start, value, &suffix)
    }

    /// A number starting with `0`: hex, octal, byte zero, or real.
    pub(super) fn lex_zero(&mut self, start: usize) -> Token {
        match self.peek_byte() {
            Some(b'x' | b'X') => {
                self.pos += 1;
                if !matches!(self.peek_byte(), Some(c) if c.is_ascii_hexdigit()) {
                    // Bare `0x` is decimal zero as a byte.
                    if let Some(err) = self.ensure_end_of_number(start) {
                        return err;
                    }
                    return self.finish_integer(start, 0, "x");
                }
                let Some(value) = self.scan_hex_digits() else {
                    self.skip_digit_run();
                    return self.error_token(start, "Number not a valid hexadecimal integer");
                };
                let suffix = self.collect_suffix();
                if let Some(err) = self.ensure_end_of_number(start) {
                    return err;
                }
                self.finish_integer(start, value, &suffix)
            }
            Some(b'0'..=b'9' | b'_' | b'\'' | b'"') => {
                let Some(value) = self.scan_octal_digits() else {
                    self.skip_digit_run();
                    return self.error_token(start, "Number not a valid octal integer");
                };
                if self.at_real_fraction() {
                    return self.lex_real(start);
                }
                let suffix = self.collect_suffix();
                if let Some(err) = self.ensure_end_of_number(start) {
                    return err;
                }
                self.finish_integer(start, value, &suffix)
            }
            Some(b'.') if matches!(self.peek_byte_at(1), Some(b'0'..=b'9')) => self.lex_real(start),
            _ => {
                let suffix = self.collect_suffix();
                if let Some(err) = self.ensure_end_of_number(start) {
                    return err;
                }
                self.finish_integer(start, 0, &suffix)
            }
        }
    }

    /// True at `.` followed by a digit (the real-number fraction point; a
    /// bare `.` stays the dot operator, and `..` stays the range operator).
    fn at_real_fraction(&self) -> bool {
        self.peek_byte() == Some(b'.') && matches!(self.peek_byte_at(1), Some(b'0'..=b'9'))
    }

    /// A real or float literal. `start` points at the first digit; the
    /// integer part has already been scanned, so rescan the text as digits
    /// to keep one code path.
    fn lex_real(&mut self, start: usize) -> Token {
        // Consume the fraction: the dot and its digit run.
        self.pos += 1;
        while let Some(c) = self.peek_byte() {
            if matches!(c, b'0'..=b'9' | b'_' | b'\'' | b'"') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let digits: String = self.src[start..self.pos]
            .iter()
            .copied()
            .filter(|&c| !matches!(c, b'_' | b'\'' | b'"'))
            .map(char::from)
            .collect();
        let suffix = self.collect_suffix();
        if let Some(err) = self.ensure_end_of_number(start) {
            return err;
        }

        let Ok(parsed) = digits.parse::<f64>() else {
            return self.error_token(start, "Number not a valid real or float value");
        };
        let display = format!("{digits}{suffix}");
        let mut token = self.simple(kind_for_real_suffix(&suffix).unwrap_or(TokenKind::Error), start, &display);
        match kind_for_real_suffix(&suffix) {
            Some(TokenKind::Real64) => token.value = TokenValue::Real64(parsed),
            Some(TokenKind::Float64) => token.value = TokenValue::Float64(parsed),
            Some(TokenKind::Real32) => token.value = TokenValue::Real32(parsed as f32),
            Some(TokenKind::Float32) => token.value = TokenValue::Float32(parsed as f32),
            Some(TokenKind::Real128) => token.value = TokenValue::Real128(parsed),
            _ => {
                return if suffix.eq_ignore_ascii_case("lf") {
                    self.error_token(start, "Float128 literals are not supported")
                } else {
                    self.error_token(start, format!("Number has an illegal or unknown suffix \"{suffix}\""))
                };
            }
        }
        token
    }

    /// Scans decimal digits with separators; `None` on u64 overflow.
    fn scan_decimal_digits(&mut self) -> Option<u64> {
        let mut value: u64 = 0;
        while let Some(c) = self.peek_byte() {
            match c {
                b'0'..=b'9' => {
                    value = value
                        .checked_mul(10)?
                        .checked_add(u64::from(c - b'0'))?;
                    self.pos += 1;
                }
                b'_' | b'\'' | b'"' => self.pos += 1,
                _ => break,
            }
        }
        Some(value)
    }

    /// Scans hex digits with separators; `None` on overflow.
    fn scan_hex_digits(&mut self) -> Option<u64> {
        let mut value: u64 = 0;
        while let Some(c) = self.peek_byte() {
            match c {
                b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => {
                    let digit = u64::from((c as char).to_digit(16).expect("hex digit"));
                    value = value.checked_mul(16)?.checked_add(digit)?;
                    self.pos += 1;
                }
                b'_' | b'\'' | b'"' => self.pos += 1,
                _ => break,
            }
        }
        Some(value)
    }

    /// Scans octal digits with separators; `None` on overflow or on the
    /// digits 8/9.
    fn scan_octal_digits(&mut self) -> Option<u64> {
        let mut value: u64 = 0;
        while let Some(c) = self.peek_byte() {
            match c {
                b'0'..=b'7' => {
                    value = value.checked_mul(8)?.checked_add(u64::from(c - b'0'))?;
                    self.pos += 1;
                }
                b'8' | b'9' => return None,
                b'_' | b'\'' | b'"' => self.pos += 1,
                _ => break,
            }
        }
        Some(value)
    }

    /// Consumes the remainder of a broken digit run so lexing resumes after it.
    fn skip_digit_run(&mut self) {
        while let Some(c) = self.peek_byte() {
            if c.is_ascii_alphanumeric() || matches!(c, b'_' | b'\'' | b'"') {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// Collects a trailing alphanumeric type suffix.
    fn collect_suffix(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek_byte() {
            if c.is_ascii_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    /// Rejects a letterform immediately after a number.
    fn ensure_end_of_number(&mut self, start: usize) -> Option<Token> {
        if let Some(c) = self.peek_byte() {
            let (ch, len) = if c < 0x80 { (char::from(c), 1) } else { self.decode_char(self.pos) };
            if ch != '-' && (unicode::is_name_start(ch) || unicode::is_name_continue(ch)) {
                self.pos += len;
                return Some(self.error_token(start, format!("Number has illegal trailing text \"{ch}\"")));
            }
        }
        None
    }

    /// Applies an integer suffix and range-checks the value.
    fn finish_integer(&mut self, start: usize, value: u64, suffix: &str) -> Token {
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        match suffix {
            "" => {
                if value > i64::MAX as u64 {
                    return self.error_token(
                        start,
                        "Number is too large for its Integer64 type (did you use the wrong numeric suffix?)",
                    );
                }
                let mut token = self.simple(TokenKind::Integer64, start, &text);
                token.value = TokenValue::Int64(value as i64);
                token
            }
            "s" | "S" => {
                if value >= 1 << 16 {
                    return self.error_token(
                        start,
                        "Number is too large for its Integer16 type (did you use the wrong numeric suffix?)",
                    );
                }
                let mut token = self.simple(TokenKind::Integer16, start, &text);
                token.value = TokenValue::Int16(value as u16 as i16);
                token
            }
            "t" | "T" => {
                if value >= 1 << 32 {
                    return self.error_token(
                        start,
                        "Number is too large for its Integer32 type (did you use the wrong numeric suffix?)",
                    );
                }
                let mut token = self.simple(TokenKind::Integer32, start, &text);
                token.value = TokenValue::Int32(value as u32 as i32);
                token
            }
            "x" | "X" => {
                if value >= 256 {
                    return self.error_token(
                        start,
                        "Number is too large for its Byte type (did you use the wrong numeric suffix?)",
                    );
                }
                let mut token = self.simple(TokenKind::Byte, start, &text);
                token.value = TokenValue::Byte(value as u8);
                token
            }
            other => self.error_token(start, format!("Number has an illegal or unknown suffix \"{other}\"")),
        }
    }
}

/// The token kind a real-number suffix selects.
fn kind_for_real_suffix(suffix: &str) -> Option<TokenKind> {
    match suffix {
        "" => Some(TokenKind::Real64),
        "f" | "F" => Some(TokenKind::Float64),
        "t" | "T" => Some(TokenKind::Real32),
        "tf" | "Tf" | "tF" | "TF" => Some(TokenKind::Float32),
        "L" | "l" => Some(TokenKind::Real128),
        _ => None,
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
    fn plain_decimal_is_integer64() {
        let token = lex_one("12345");
        assert_eq!(token.kind, TokenKind::Integer64);
        assert_eq!(token.value, TokenValue::Int64(12345));
    }

    #[test]
    fn integer_suffixes_select_kinds() {
        assert_eq!(lex_one("100s").value, TokenValue::Int16(100));
        assert_eq!(lex_one("100t").value, TokenValue::Int32(100));
        assert_eq!(lex_one("100x").value, TokenValue::Byte(100));
    }

    #[test]
    fn suffix_overflow_is_a_typed_error() {
        let token = lex_one("70000s");
        assert_eq!(token.kind, TokenKind::Error);
        assert!(token.text.contains("Integer16"), "got: {}", token.text);
        assert_eq!(lex_one("256x").kind, TokenKind::Error);
        assert_eq!(lex_one("255x").value, TokenValue::Byte(255));
    }

    #[test]
    fn hex_and_octal() {
        assert_eq!(lex_one("0xFF").value, TokenValue::Int64(255));
        assert_eq!(lex_one("0777").value, TokenValue::Int64(511));
        // Octal digits 8/9 are an error.
        assert_eq!(lex_one("0778").kind, TokenKind::Error);
    }

    #[test]
    fn bare_zero_x_is_byte_zero() {
        let token = lex_one("0x");
        assert_eq!(token.kind, TokenKind::Byte);
        assert_eq!(token.value, TokenValue::Byte(0));
    }

    #[test]
    fn digit_separators_are_skipped() {
        assert_eq!(lex_one("1_000_000").value, TokenValue::Int64(1_000_000));
        assert_eq!(lex_one("1'000").value, TokenValue::Int64(1000));
    }

    #[test]
    fn reals_and_floats() {
        let real = lex_one("3.25");
        assert_eq!(real.kind, TokenKind::Real64);
        assert_eq!(real.value, TokenValue::Real64(3.25));

        assert_eq!(lex_one("3.25f").kind, TokenKind::Float64);
        assert_eq!(lex_one("3.25t").kind, TokenKind::Real32);
        assert_eq!(lex_one("3.25tf").kind, TokenKind::Float32);
        assert_eq!(lex_one("3.25L").kind, TokenKind::Real128);
    }

    #[test]
    fn float128_suffix_reports_unsupported() {
        let token = lex_one("3.25Lf");
        assert_eq!(token.kind, TokenKind::Error);
        assert!(token.text.contains("not supported"), "got: {}", token.text);
    }

    #[test]
    fn trailing_letterform_is_an_error() {
        let token = lex_one("123abc");
        assert_eq!(token.kind, TokenKind::Error);
        assert!(token.text.contains("illegal"), "got: {}", token.text);
    }

    #[test]
    fn decimal_overflow_is_an_error() {
        assert_eq!(lex_one("99999999999999999999999").kind, TokenKind::Error);
    }
}
