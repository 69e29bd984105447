//! Raw lists, quoting, and templates.
//!
//! `[a b c]` is a raw list: items are quoted by default. A parenthesised
//! item switches the list into template mode (that item evaluates at
//! runtime), and `@(expr)` switches it into splicing mode (the expression's
//! elements are spliced in). Raising the level upgrades the items already
//! collected: a quoted literal becomes `[$quote x]` under templating, or a
//! one-element `[$quote [x]]` segment under splicing, and the whole list
//! becomes a `List.of` / `List.combine` composition.

use crate::{
    diagnostics::Position,
    intern::KnownSymbol,
    lexer::TokenKind,
    parser::{Modes, Parser},
    value::Value,
};

/// One collected item and how it participates.
enum QuotedItem {
    /// Fixed structure, known at parse time.
    Literal(Value),
    /// An expression evaluated at runtime, contributing one element.
    Template(Value),
    /// An expression evaluated at runtime, contributing all its elements.
    Splice(Value),
}

impl Parser<'_, '_> {
    /// A quoted term after a backtick: a name becomes a symbol literal, a
    /// bracket opens a raw list, and self-quoting literals pass through.
    pub(super) fn parse_quote_term(&mut self, pos: Position) -> Value {
        let token = self.next();
        match token.kind {
            TokenKind::LeftBracket => self.parse_raw_list(token.position.clone()),
            k if k.is_name() => {
                let symbol = self.intern(&token.text.clone());
                self.form(KnownSymbol::Quote, &[Value::Symbol(symbol)], Some(pos))
            }
            TokenKind::Integer64
            | TokenKind::Integer32
            | TokenKind::Integer16
            | TokenKind::Byte
            | TokenKind::Real32
            | TokenKind::Real64
            | TokenKind::Float32
            | TokenKind::Float64
            | TokenKind::Char
            | TokenKind::Uni => super::literal_value(&token),
            TokenKind::RawString | TokenKind::DynString => {
                let text = token.text.clone();
                self.alloc_str(&text)
            }
            _ => {
                self.error_at(token.position.clone(), "Expected a quotable term after \"`\"");
                Value::Null
            }
        }
    }

    /// A raw list; the opening bracket is already consumed.
    pub(super) fn parse_raw_list(&mut self, pos: Position) -> Value {
        let items = self.collect_raw_items(&pos);
        self.assemble_raw_list(items, pos)
    }

    fn collect_raw_items(&mut self, pos: &Position) -> Vec<QuotedItem> {
        let mut items = Vec::new();
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::RightBracket => {
                    let _ = self.next();
                    break;
                }
                TokenKind::Eoi => {
                    self.error_at(pos.clone(), "Unterminated raw list");
                    break;
                }
                TokenKind::LeftParen => {
                    let _ = self.next();
                    let inner = self.parse_expr(Modes {
                        binary_line_breaks: true,
                        comma_decl: false,
                        colon_member_decl: false,
                    });
                    self.expect(TokenKind::RightParen, "\")\" closing the template expression");
                    items.push(QuotedItem::Template(inner));
                }
                k if k.is_punct_name() && token.text == "@" => {
                    let at = self.next();
                    if self.peek().kind == TokenKind::LeftParen {
                        let _ = self.next();
                        let inner = self.parse_expr(Modes {
                            binary_line_breaks: true,
                            comma_decl: false,
                            colon_member_decl: false,
                        });
                        self.expect(TokenKind::RightParen, "\")\" closing the splice expression");
                        items.push(QuotedItem::Splice(inner));
                    } else {
                        self.error_at(at.position.clone(), "\"@\" in a raw list must be followed by \"(\"");
                    }
                }
                TokenKind::LeftBracket => {
                    let token = self.next();
                    let inner = self.parse_raw_list(token.position.clone());
                    // A nested list may itself be a quoted literal or a
                    // runtime composition; classify by shape.
                    items.push(self.classify_nested(inner));
                }
                TokenKind::Error => {
                    let token = self.next();
                    self.error_at(token.position.clone(), token.text.clone());
                }
                k if k.is_name() => {
                    let token = self.next();
                    let symbol = self.intern(&token.text.clone());
                    items.push(QuotedItem::Literal(Value::Symbol(symbol)));
                }
                TokenKind::Integer64
                | TokenKind::Integer32
                | TokenKind::Integer16
                | TokenKind::Byte
                | TokenKind::Real32
                | TokenKind::Real64
                | TokenKind::Float32
                | TokenKind::Float64
                | TokenKind::Char
                | TokenKind::Uni => {
                    let token = self.next();
                    items.push(QuotedItem::Literal(super::literal_value(&token)));
                }
                TokenKind::RawString | TokenKind::DynString => {
                    let token = self.next();
                    let text = token.text.clone();
                    let value = self.alloc_str(&text);
                    items.push(QuotedItem::Literal(value));
                }
                _ => {
                    // Keywords and other specials quote as their symbols.
                    let token = self.next();
                    match self.terminal_symbol(&token) {
                        Some(symbol) => items.push(QuotedItem::Literal(Value::Symbol(symbol))),
                        None => {
                            self.error_at(token.position.clone(), format!("Unexpected \"{}\" in raw list", token.text));
                        }
                    }
                }
            }
        }
        items
    }

    /// A nested raw list parsed to an expression: `[$quote x]` means its
    /// structure is fixed, anything else evaluates at runtime.
    fn classify_nested(&mut self, expr: Value) -> QuotedItem {
        let unwrapped = self.unwrap_quote_shallow(expr);
        match unwrapped {
            Some(listed) => QuotedItem::Literal(listed),
            None => QuotedItem::Template(expr),
        }
    }

    fn unwrap_quote_shallow(&mut self, expr: Value) -> Option<Value> {
        let items = crate::types::list::items(expr, &self.ctx.heap)?;
        if items.len() == 2
            && let Value::Symbol(head) = items[0]
            && head == KnownSymbol::Quote.id()
        {
            Some(items[1])
        } else {
            None
        }
    }

    /// Builds the final expression for a raw list at its highest level.
    fn assemble_raw_list(&mut self, items: Vec<QuotedItem>, pos: Position) -> Value {
        let splicing = items.iter().any(|i| matches!(i, QuotedItem::Splice(_)));
        let templating = splicing || items.iter().any(|i| matches!(i, QuotedItem::Template(_)));

        if !templating {
            // Fixed structure: build the list value and quote it.
            let values: Vec<Value> = items
                .into_iter()
                .map(|item| match item {
                    QuotedItem::Literal(v) => v,
                    _ => unreachable!("level said all items are literal"),
                })
                .collect();
            let listed = self.make_list(&values, Some(pos.clone()));
            return self.form(KnownSymbol::Quote, &[listed], Some(pos));
        }

        let list_base = Value::Symbol(KnownSymbol::ListBase.id());
        if !splicing {
            // Template: List.of with literals re-quoted.
            let mut args = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    QuotedItem::Literal(v) => {
                        let quoted = self.quote_if_needed(v, &pos);
                        args.push(quoted);
                    }
                    QuotedItem::Template(e) => args.push(e),
                    QuotedItem::Splice(_) => unreachable!("level said no splices"),
                }
            }
            return self.method_call(list_base, KnownSymbol::Of.id(), &args, Some(pos));
        }

        // Splicing: List.combine over one-element segments and spliced lists.
        let mut segments = Vec::with_capacity(items.len());
        for item in items {
            match item {
                QuotedItem::Literal(v) => {
                    // `[$quote [x]]` — a fixed one-element segment.
                    let one = self.make_list(&[v], Some(pos.clone()));
                    segments.push(self.form(KnownSymbol::Quote, &[one], Some(pos.clone())));
                }
                QuotedItem::Template(e) => {
                    segments.push(self.method_call(list_base, KnownSymbol::Of.id(), &[e], Some(pos.clone())));
                }
                QuotedItem::Splice(e) => segments.push(e),
            }
        }
        self.method_call(list_base, KnownSymbol::Combine.id(), &segments, Some(pos))
    }

    /// Quotes values whose evaluation differs from their structure.
    fn quote_if_needed(&mut self, value: Value, pos: &Position) -> Value {
        match value {
            Value::Symbol(_) | Value::Ref(_) => self.form(KnownSymbol::Quote, &[value], Some(pos.clone())),
            other => other,
        }
    }
}
