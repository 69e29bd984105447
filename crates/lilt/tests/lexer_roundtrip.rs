use lilt::lexer::{Lexer, Token, TokenKind, TokenValue};

fn lex_all(source: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(source, "round.lt".into());
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token();
        if token.kind == TokenKind::Eoi {
            break;
        }
        assert_ne!(token.kind, TokenKind::Error, "unexpected error token: {}", token.text);
        tokens.push(token);
    }
    tokens
}

/// Renders tokens back to equivalent source text.
fn pretty_print(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token.kind {
            TokenKind::DynString => {
                out.push('"');
                out.push_str(&token.text);
                out.push('"');
            }
            TokenKind::RawString | TokenKind::Char | TokenKind::Uni => {
                out.push('\'');
                out.push_str(&token.text);
                out.push('\'');
            }
            _ => out.push_str(&token.text),
        }
        out.push(' ');
    }
    out
}

/// Lexing, printing, and re-lexing preserves token kinds and payloads
/// (whitespace and comments aside).
#[test]
fn lex_print_lex_round_trips() {
    let source = "var total = 0x1F + 100s * 3.25f\ntill done do { total += 1 } when done `ok // trailing";
    let first = lex_all(source);
    let printed = pretty_print(&first);
    let second = lex_all(&printed);

    assert_eq!(first.len(), second.len(), "token count changed:\n{printed}");
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.kind, b.kind, "kind changed for {:?} in:\n{printed}", a.text);
        assert_eq!(a.value, b.value, "payload changed for {:?}", a.text);
        assert_eq!(a.text, b.text, "text changed");
    }
}

#[test]
fn numeric_payloads_survive_the_round_trip() {
    let source = "255x 65535 0777 1_000 2.5 2.5t 9.75L";
    let first = lex_all(source);
    let second = lex_all(&pretty_print(&first));
    let payloads: Vec<&TokenValue> = first.iter().map(|t| &t.value).collect();
    let payloads_again: Vec<&TokenValue> = second.iter().map(|t| &t.value).collect();
    assert_eq!(payloads, payloads_again);
}

#[test]
fn position_tracking_is_stable_for_multiline_sources() {
    let tokens = lex_all("a\n  b\n    c");
    let positions: Vec<(u32, u32)> = tokens.iter().map(|t| (t.position.line, t.position.column)).collect();
    assert_eq!(positions, vec![(1, 1), (2, 3), (3, 5)]);
}
