//! The parser: tokens to the homoiconic expression tree.
//!
//! Recursive descent over the token stream with one production per
//! precedence level, mirroring the nine built-in nonterminal classes. Each
//! class consults the scope's syntax table first, so user rules extend the
//! grammar from the inside. The output is ordinary runtime data: cons lists
//! whose heads are the special-form symbols (`$set`, `$if`, `$fn`, …), with
//! binary and unary operators expressed as method-call shapes
//! `[[$dot receiver op] args…]`.
//!
//! A mode-flag set threads down through the productions: whether a line
//! break before a binary operator ends the expression, and what `,` and `:`
//! currently mean.

mod include;
mod quote;
pub mod scope;
pub mod syntax;

use std::path::PathBuf;
use std::sync::Arc;

pub use syntax::{PatternElem, SyntaxRule, SyntaxTable};

use crate::{
    diagnostics::{Diagnostic, Position},
    heap::HeapData,
    intern::{KnownSymbol, SymbolId},
    lexer::{Lexer, Token, TokenKind, TokenValue},
    parser::scope::{DeclKind, DeclareError, ParseScope, ScopeKind},
    runtime::RuntimeContext,
    types::list,
    value::Value,
};

/// How a production ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    SuccessfulWithResult,
    SuccessfulWithNoResult,
    PartialWithError,
    NotMatchedNoTokensConsumed,
    ErroredButRecovered,
}

/// A production's result: a status plus the expression, when there is one.
#[derive(Debug, Clone, Copy)]
pub struct ParseResult {
    pub status: ParseStatus,
    pub expr: Option<Value>,
}

impl ParseResult {
    #[must_use]
    pub fn ok(expr: Value) -> Self {
        Self {
            status: ParseStatus::SuccessfulWithResult,
            expr: Some(expr),
        }
    }

    #[must_use]
    pub fn no_result() -> Self {
        Self {
            status: ParseStatus::SuccessfulWithNoResult,
            expr: None,
        }
    }

    #[must_use]
    pub fn no_match() -> Self {
        Self {
            status: ParseStatus::NotMatchedNoTokensConsumed,
            expr: None,
        }
    }

    #[must_use]
    pub fn recovered() -> Self {
        Self {
            status: ParseStatus::ErroredButRecovered,
            expr: Some(Value::Null),
        }
    }
}

/// The mode flags threaded through the productions. The default is the
/// statement posture: line breaks end expressions, `,` ends the expression,
/// and `:` means member access.
#[derive(Debug, Clone, Copy, Default)]
pub struct Modes {
    /// When true, a binary operator may begin a new line without ending the
    /// expression (inside brackets).
    pub binary_line_breaks: bool,
    /// When true, `,` separates variable declarations rather than ending
    /// the expression.
    pub comma_decl: bool,
    /// When true, `:` separates member declarations (inside `new { … }`)
    /// rather than meaning member access.
    pub colon_member_decl: bool,
}

/// Everything a finished parse hands to the compiler and module loader.
#[derive(Debug)]
pub struct ParseOutput {
    /// The program body, a `[$progn …]` form.
    pub program: Value,
    /// Top-level declared names, in order.
    pub exports: Vec<SymbolId>,
    /// Syntax rules declared at top level.
    pub syntax_rules: Vec<Arc<SyntaxRule>>,
    pub diagnostics: Vec<Diagnostic>,
}

/// The parser state over one source unit.
pub struct Parser<'src, 'ctx> {
    lexer: Lexer<'src>,
    ctx: &'ctx mut RuntimeContext,
    scopes: Vec<ParseScope>,
    diagnostics: Vec<Diagnostic>,
    /// Line of the most recently consumed token, for line-break gating.
    prev_line: u32,
    /// Directory include paths resolve against.
    base_dir: PathBuf,
    /// Syntax rules declared at the outermost scope.
    top_syntax_rules: Vec<Arc<SyntaxRule>>,
}

impl<'src, 'ctx> Parser<'src, 'ctx> {
    #[must_use]
    pub fn new(source: &'src str, filename: Arc<str>, base_dir: PathBuf, ctx: &'ctx mut RuntimeContext) -> Self {
        let outermost = ParseScope::new(ScopeKind::Outermost, Arc::new(SyntaxTable::new()));
        Self {
            lexer: Lexer::new(source, filename),
            ctx,
            scopes: vec![outermost],
            diagnostics: Vec::new(),
            prev_line: 1,
            base_dir,
            top_syntax_rules: Vec::new(),
        }
    }

    /// Parses the whole source unit into a `[$progn …]` body.
    pub fn parse_program(mut self) -> ParseOutput {
        let mut stmts = Vec::new();
        loop {
            let result = self.parse_stmt(Modes::default());
            match result.status {
                ParseStatus::NotMatchedNoTokensConsumed => break,
                _ => {
                    if let Some(expr) = result.expr {
                        stmts.push(expr);
                    }
                }
            }
        }
        let trailing = self.lexer.peek();
        if trailing.kind != TokenKind::Eoi {
            self.error_at(trailing.position.clone(), "Unexpected token after end of program");
        }

        let outermost = &self.scopes[0];
        let exports: Vec<SymbolId> = outermost
            .decls
            .iter()
            .filter(|d| {
                d.symbol.is_some()
                    && matches!(d.kind, DeclKind::Variable | DeclKind::Const | DeclKind::Auto)
            })
            .map(|d| d.symbol)
            .collect();

        let program = self.form(KnownSymbol::Progn, &stmts, None);
        ParseOutput {
            program,
            exports,
            syntax_rules: std::mem::take(&mut self.top_syntax_rules),
            diagnostics: self.diagnostics,
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing.

    fn next(&mut self) -> Token {
        let token = self.lexer.next_token();
        self.prev_line = token.position.line;
        token
    }

    fn peek(&mut self) -> Token {
        self.lexer.peek()
    }

    fn unget(&mut self) {
        self.lexer.unget();
    }

    /// Consumes the next token when it has the expected kind; otherwise
    /// records a diagnostic and leaves the token alone.
    fn expect(&mut self, kind: TokenKind, what: &str) -> bool {
        let token = self.peek();
        if token.kind == kind {
            let _ = self.next();
            true
        } else {
            self.error_at(token.position.clone(), format!("Expected {what}"));
            false
        }
    }

    fn error_at(&mut self, position: Position, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(position, message));
    }

    /// Skips tokens until one of the recovery set: closing brackets, bar,
    /// semicolon, the start of the next line, or end of input. Stopping at
    /// a fresh line lets one bad statement produce one diagnostic while the
    /// statements after it still parse.
    fn recover(&mut self) {
        let start_line = self.prev_line;
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::Eoi
                | TokenKind::RightParen
                | TokenKind::RightBracket
                | TokenKind::RightBrace
                | TokenKind::Bar
                | TokenKind::Semicolon => break,
                _ if token.position.line > start_line => break,
                _ => {
                    let _ = self.next();
                }
            }
        }
    }

    fn intern(&mut self, text: &str) -> SymbolId {
        self.ctx.symbols.get_symbol(text)
    }

    /// The terminal symbol a token matches in syntax tables and operator
    /// positions: names and keywords by text, the special tokens by their
    /// reserved symbols.
    fn terminal_symbol(&mut self, token: &Token) -> Option<SymbolId> {
        match token.kind {
            k if k.is_name() => Some(self.intern(&token.text.clone())),
            TokenKind::Comma => Some(KnownSymbol::Comma.id()),
            TokenKind::Semicolon => Some(KnownSymbol::Semicolon.id()),
            TokenKind::Colon => Some(KnownSymbol::Colon.id()),
            TokenKind::LeftParen => Some(KnownSymbol::LeftParen.id()),
            TokenKind::RightParen => Some(KnownSymbol::RightParen.id()),
            TokenKind::LeftBracket => Some(KnownSymbol::LeftBracket.id()),
            TokenKind::RightBracket => Some(KnownSymbol::RightBracket.id()),
            TokenKind::LeftBrace => Some(KnownSymbol::LeftBrace.id()),
            TokenKind::RightBrace => Some(KnownSymbol::RightBrace.id()),
            TokenKind::And
            | TokenKind::Catch
            | TokenKind::Do
            | TokenKind::Else
            | TokenKind::If
            | TokenKind::Is
            | TokenKind::New
            | TokenKind::Not
            | TokenKind::Or
            | TokenKind::Return
            | TokenKind::Then
            | TokenKind::Till
            | TokenKind::Try
            | TokenKind::TypeOf
            | TokenKind::Unless
            | TokenKind::Until
            | TokenKind::Var
            | TokenKind::When
            | TokenKind::While => Some(self.intern(&token.text.clone())),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Expression-tree construction.

    fn cons_at(&mut self, a: Value, d: Value, pos: Option<Position>) -> Value {
        match pos {
            Some(p) => list::cons_at(&mut self.ctx.heap, a, d, p),
            None => list::cons(&mut self.ctx.heap, a, d),
        }
    }

    fn make_list(&mut self, items: &[Value], pos: Option<Position>) -> Value {
        let mut out = Value::Null;
        for item in items.iter().rev() {
            out = self.cons_at(*item, out, pos.clone());
        }
        out
    }

    /// Builds `[head items…]` with `head` a special-form symbol.
    fn form(&mut self, head: KnownSymbol, items: &[Value], pos: Option<Position>) -> Value {
        let tail = self.make_list(items, pos.clone());
        self.cons_at(Value::Symbol(head.id()), tail, pos)
    }

    /// Builds the method-call shape `[[$dot receiver op] args…]`.
    fn method_call(&mut self, receiver: Value, op: SymbolId, args: &[Value], pos: Option<Position>) -> Value {
        let dot = self.form(KnownSymbol::Dot, &[receiver, Value::Symbol(op)], pos.clone());
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(dot);
        all.extend_from_slice(args);
        self.make_list(&all, pos)
    }

    fn alloc_str(&mut self, text: &str) -> Value {
        Value::Ref(self.ctx.heap.alloc_str(text))
    }

    // ------------------------------------------------------------------
    // Scope plumbing.

    fn begin_scope(&mut self, kind: ScopeKind) {
        let table = self.scopes.last().expect("scope stack is never empty").syntax.clone();
        self.scopes.push(ParseScope::new(kind, table));
    }

    fn end_scope(&mut self) -> ParseScope {
        self.scopes.pop().expect("end_scope pairs with begin_scope")
    }

    fn current_scope(&mut self) -> &mut ParseScope {
        self.scopes.last_mut().expect("scope stack is never empty")
    }

    /// Looks a symbol up through the scope chain.
    fn resolve(&self, symbol: SymbolId) -> Option<DeclKind> {
        for scope in self.scopes.iter().rev() {
            if let Some(decl) = scope.get(symbol) {
                return Some(decl.kind);
            }
        }
        None
    }

    /// Declares into the nearest scope that collects local variables
    /// (explicit braces, a function body, or the top level), skipping
    /// till-flag and declaration scopes.
    fn declare_variable(&mut self, symbol: SymbolId, kind: DeclKind, position: Position) {
        let index = self
            .scopes
            .iter()
            .rposition(|s| {
                matches!(
                    s.kind,
                    ScopeKind::Outermost | ScopeKind::FunctionBody | ScopeKind::Explicit
                )
            })
            .expect("an outermost scope always exists");
        if let Err(err) = self.scopes[index].declare(symbol, kind, position.clone()) {
            let name = self.ctx.symbols.name(symbol).to_owned();
            match err {
                DeclareError::DuplicateDeclaration { .. } => {
                    self.error_at(position, format!("\"{name}\" is already declared and cannot be redeclared"));
                }
                DeclareError::ScopeSealed => {
                    self.error_at(position, format!("Cannot declare \"{name}\" in a sealed scope"));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements.

    /// One statement. `NotMatched` at end of input or a closing brace.
    pub fn parse_stmt(&mut self, modes: Modes) -> ParseResult {
        if let Some(expr) = self.apply_syntax(KnownSymbol::ClassStmt.id(), modes) {
            return ParseResult::ok(expr);
        }
        let token = self.peek();
        match token.kind {
            TokenKind::Eoi | TokenKind::RightBrace => ParseResult::no_match(),
            TokenKind::Semicolon => {
                let _ = self.next();
                ParseResult::no_result()
            }
            TokenKind::Error => {
                let token = self.next();
                self.error_at(token.position.clone(), token.text.clone());
                self.recover();
                ParseResult::recovered()
            }
            TokenKind::Var => self.parse_var_decl(modes, DeclKind::Variable),
            TokenKind::If => self.parse_if(modes, false),
            TokenKind::Unless => self.parse_if(modes, true),
            TokenKind::While => self.parse_while(modes, false),
            TokenKind::Until => self.parse_while(modes, true),
            TokenKind::Do => self.parse_do_while(modes),
            TokenKind::Till => self.parse_till(modes),
            TokenKind::Try => self.parse_try(modes),
            TokenKind::Return => {
                let token = self.next();
                let pos = token.position.clone();
                let next = self.peek();
                let value = if stmt_like_end(next.kind) || next.position.line > self.prev_line {
                    Value::Null
                } else {
                    self.parse_expr(modes)
                };
                ParseResult::ok(self.form(KnownSymbol::Return, &[value], Some(pos)))
            }
            TokenKind::LoanwordInclude => self.parse_include(modes),
            TokenKind::LoanwordSyntax => self.parse_syntax_decl(modes),
            TokenKind::UnknownAlphaName if token.text == "const" => {
                self.parse_contextual_decl(modes, DeclKind::Const)
            }
            TokenKind::UnknownAlphaName if token.text == "auto" => {
                self.parse_contextual_decl(modes, DeclKind::Auto)
            }
            _ => ParseResult::ok(self.parse_expr(modes)),
        }
    }

    /// A statement where an expression value is required.
    fn parse_stmt_value(&mut self, modes: Modes) -> Value {
        let result = self.parse_stmt(modes);
        match result.expr {
            Some(expr) => expr,
            None => {
                if result.status == ParseStatus::NotMatchedNoTokensConsumed {
                    let pos = self.peek().position.clone();
                    self.error_at(pos, "Expected a statement");
                }
                Value::Null
            }
        }
    }

    /// `var a = 1, b, c = 3` — declarations, compiled as assignments.
    fn parse_var_decl(&mut self, modes: Modes, kind: DeclKind) -> ParseResult {
        let var_token = self.next();
        let pos = var_token.position.clone();
        let mut sets = Vec::new();
        loop {
            let name = self.peek();
            if !name.kind.is_alpha_name() {
                self.error_at(name.position.clone(), "Expected a variable name to declare");
                self.recover();
                return ParseResult::recovered();
            }
            let name = self.next();
            let symbol = self.intern(&name.text.clone());
            self.declare_variable(symbol, kind, name.position.clone());

            let next = self.peek();
            if next.kind.is_punct_name() && next.text == "=" {
                let _ = self.next();
                let inner = Modes {
                    comma_decl: true,
                    ..modes
                };
                let value = self.parse_expr(inner);
                sets.push(self.form(KnownSymbol::Set, &[Value::Symbol(symbol), value], Some(name.position.clone())));
            }

            if self.peek().kind == TokenKind::Comma {
                let _ = self.next();
            } else {
                break;
            }
        }
        match sets.len() {
            0 => ParseResult::no_result(),
            1 => ParseResult::ok(sets[0]),
            _ => ParseResult::ok(self.form(KnownSymbol::Progn, &sets, Some(pos))),
        }
    }

    /// `const name = expr` / `auto name = expr`, recognised contextually.
    fn parse_contextual_decl(&mut self, modes: Modes, kind: DeclKind) -> ParseResult {
        // Only a declaration when followed by `name =`; otherwise `const`
        // is an ordinary name.
        let keyword = self.next();
        let name = self.peek();
        if !name.kind.is_alpha_name() {
            self.unget();
            return ParseResult::ok(self.parse_expr(modes));
        }
        let name = self.next();
        let eq = self.peek();
        if !(eq.kind.is_punct_name() && eq.text == "=") {
            self.unget();
            self.unget();
            return ParseResult::ok(self.parse_expr(modes));
        }
        let _ = self.next();
        let symbol = self.intern(&name.text.clone());
        self.declare_variable(symbol, kind, name.position.clone());
        let value = self.parse_expr(modes);
        let _ = keyword;
        ParseResult::ok(self.form(KnownSymbol::Set, &[Value::Symbol(symbol), value], Some(name.position.clone())))
    }

    /// `if c then t [else e]`; `inverted` for `unless`.
    fn parse_if(&mut self, modes: Modes, inverted: bool) -> ParseResult {
        let token = self.next();
        let pos = token.position.clone();
        let mut cond = self.parse_expr(modes);
        if inverted {
            cond = self.form(KnownSymbol::NotForm, &[cond], Some(pos.clone()));
        }
        self.expect(TokenKind::Then, "\"then\" after the condition");
        let then_body = self.parse_stmt_value(modes);
        let else_body = if self.peek().kind == TokenKind::Else {
            let _ = self.next();
            self.parse_stmt_value(modes)
        } else {
            Value::Null
        };
        ParseResult::ok(self.form(KnownSymbol::If, &[cond, then_body, else_body], Some(pos)))
    }

    /// `while c do body`; `until` inverts the condition.
    fn parse_while(&mut self, modes: Modes, inverted: bool) -> ParseResult {
        let token = self.next();
        let pos = token.position.clone();
        let mut cond = self.parse_expr(modes);
        if inverted {
            cond = self.form(KnownSymbol::NotForm, &[cond], Some(pos.clone()));
        }
        self.expect(TokenKind::Do, "\"do\" after the loop condition");
        let body = self.parse_stmt_value(modes);
        ParseResult::ok(self.form(KnownSymbol::While, &[cond, body], Some(pos)))
    }

    /// `do body while cond` — the body runs once, then the loop re-tests.
    fn parse_do_while(&mut self, modes: Modes) -> ParseResult {
        let token = self.next();
        let pos = token.position.clone();
        let body = self.parse_stmt_value(modes);
        self.expect(TokenKind::While, "\"while\" after the do-body");
        let cond = self.parse_expr(modes);
        let again = syntax::deep_clone(body, &mut self.ctx.heap);
        let tail = self.form(KnownSymbol::While, &[cond, again], Some(pos.clone()));
        ParseResult::ok(self.form(KnownSymbol::Progn, &[body, tail], Some(pos)))
    }

    /// `till f1, f2 do body when f1 e1 when f2 e2` →
    /// `[$till [flags] body [[flag when]…]]`.
    fn parse_till(&mut self, modes: Modes) -> ParseResult {
        let token = self.next();
        let pos = token.position.clone();

        self.begin_scope(ScopeKind::TillDo);
        let mut flags = Vec::new();
        loop {
            let name = self.peek();
            if !name.kind.is_alpha_name() {
                self.error_at(name.position.clone(), "Expected a till flag name");
                self.recover();
                self.end_scope();
                return ParseResult::recovered();
            }
            let name = self.next();
            let symbol = self.intern(&name.text.clone());
            if self.current_scope().get(symbol).is_some() {
                self.error_at(name.position.clone(), "Duplicate till flag name");
            } else if let Err(DeclareError::DuplicateDeclaration { .. }) =
                self.current_scope().declare(symbol, DeclKind::Till, name.position.clone())
            {
                self.error_at(name.position.clone(), "Duplicate till flag name");
            }
            flags.push(Value::Symbol(symbol));
            if self.peek().kind == TokenKind::Comma {
                let _ = self.next();
            } else {
                break;
            }
        }
        self.expect(TokenKind::Do, "\"do\" after the till flags");
        let body = self.parse_stmt_value(modes);

        let mut whens = Vec::new();
        while self.peek().kind == TokenKind::When {
            let _ = self.next();
            let name = self.peek();
            if !name.kind.is_alpha_name() {
                self.error_at(name.position.clone(), "Expected a flag name after \"when\"");
                break;
            }
            let name = self.next();
            let symbol = self.intern(&name.text.clone());
            let clause_body = self.parse_stmt_value(modes);
            let clause = self.make_list(&[Value::Symbol(symbol), clause_body], Some(name.position.clone()));
            whens.push(clause);
        }
        self.end_scope();

        let flag_list = self.make_list(&flags, Some(pos.clone()));
        let when_list = self.make_list(&whens, Some(pos.clone()));
        ParseResult::ok(self.form(KnownSymbol::Till, &[flag_list, body, when_list], Some(pos)))
    }

    /// `try body catch handler` → `[$catch body handler]`.
    fn parse_try(&mut self, modes: Modes) -> ParseResult {
        let token = self.next();
        let pos = token.position.clone();
        let body = self.parse_stmt_value(modes);
        self.expect(TokenKind::Catch, "\"catch\" after the try-body");
        let handler = self.parse_expr(modes);
        ParseResult::ok(self.form(KnownSymbol::Catch, &[body, handler], Some(pos)))
    }

    /// `#syntax CLASS: [pattern…] => replacement`.
    fn parse_syntax_decl(&mut self, modes: Modes) -> ParseResult {
        let token = self.next();
        let pos = token.position.clone();

        let class_token = self.peek();
        if !class_token.kind.is_alpha_name() {
            self.error_at(class_token.position.clone(), "Expected a nonterminal class name after #syntax");
            self.recover();
            return ParseResult::recovered();
        }
        let class_token = self.next();
        let class = self.intern(&class_token.text.clone());
        self.expect(TokenKind::Colon, "\":\" after the class name");

        if !self.expect(TokenKind::LeftBracket, "\"[\" opening the pattern") {
            self.recover();
            return ParseResult::recovered();
        }
        let mut pattern = Vec::new();
        let mut variables = Vec::new();
        let mut leading_keyword: Option<SymbolId> = None;
        loop {
            let elem = self.next();
            match elem.kind {
                TokenKind::RightBracket => break,
                TokenKind::Eoi => {
                    self.error_at(elem.position.clone(), "Unterminated syntax pattern");
                    return ParseResult::recovered();
                }
                TokenKind::LeftBracket => {
                    // `[CLASS var]` — a nonterminal reference.
                    let class_ref = self.next();
                    let var = self.next();
                    if !class_ref.kind.is_alpha_name() || !var.kind.is_alpha_name() {
                        self.error_at(class_ref.position.clone(), "Expected [CLASS name] in syntax pattern");
                        self.recover();
                        return ParseResult::recovered();
                    }
                    self.expect(TokenKind::RightBracket, "\"]\" closing the nonterminal reference");
                    let nt_class = self.intern(&class_ref.text.clone());
                    let nt_var = self.intern(&var.text.clone());
                    variables.push(nt_var);
                    pattern.push(PatternElem::Nonterminal {
                        class: nt_class,
                        var: nt_var,
                    });
                }
                _ => match self.terminal_symbol(&elem) {
                    Some(symbol) => {
                        if pattern.is_empty() && elem.kind.is_alpha_name() {
                            leading_keyword = Some(symbol);
                        }
                        pattern.push(PatternElem::Terminal(symbol));
                    }
                    None => {
                        self.error_at(elem.position.clone(), "Unexpected token in syntax pattern");
                    }
                },
            }
        }

        let arrow = self.next();
        if !(arrow.kind.is_punct_name() && arrow.text == "=>") {
            self.error_at(arrow.position.clone(), "Expected \"=>\" after the syntax pattern");
            self.recover();
            return ParseResult::recovered();
        }
        let replacement_expr = self.parse_expr(modes);
        // A quoted replacement supplies the raw template tree.
        let replacement = self.unwrap_quote(replacement_expr);

        let rule = Arc::new(SyntaxRule {
            class,
            pattern,
            replacement,
            variables,
            position: pos.clone(),
        });
        let table = syntax::make_mut(&mut self.current_scope().syntax);
        if let Err(err) = table.add_rule(&rule) {
            self.error_at(pos, format!("Cannot install syntax rule: {err:?}"));
            return ParseResult::recovered();
        }
        self.current_scope().declared_rules.push(rule.class);
        if self.scopes.len() == 1 {
            self.top_syntax_rules.push(rule);
        }
        // Reserve a rule's leading keyword so it stops resolving as a name.
        if let Some(keyword) = leading_keyword {
            let _ = self.current_scope().declare(keyword, DeclKind::Keyword, pos);
        }
        ParseResult::no_result()
    }

    /// Unwraps `[$quote x]` to `x`; other expressions pass through.
    fn unwrap_quote(&mut self, expr: Value) -> Value {
        let items = list::items(expr, &self.ctx.heap);
        if let Some(items) = items
            && items.len() == 2
            && let Value::Symbol(head) = items[0]
            && head == KnownSymbol::Quote.id()
        {
            return items[1];
        }
        expr
    }

    // ------------------------------------------------------------------
    // User-syntax application.

    /// Tries the scope's syntax table for `class`. `None` means no rule
    /// matched and no tokens were consumed.
    fn apply_syntax(&mut self, class: SymbolId, modes: Modes) -> Option<Value> {
        let table = self.scopes.last().expect("scope stack is never empty").syntax.clone();
        let root = table.class_root(class)?;

        // Commit only when the first terminal matches.
        let first = self.peek();
        let first_symbol = self.terminal_symbol(&first)?;
        // Names already declared as variables stay variables.
        if first.kind.is_alpha_name()
            && let Some(kind) = self.resolve(first_symbol)
            && kind != DeclKind::Keyword
        {
            return None;
        }
        let mut node = &root.next_terminals.iter().find(|(s, _)| *s == first_symbol)?.1;
        let _ = self.next();

        let mut captures: Vec<(SymbolId, Value)> = Vec::new();
        loop {
            // Prefer a terminal transition on the incoming token.
            let token = self.peek();
            let token_symbol = self.terminal_symbol(&token);
            if let Some(symbol) = token_symbol
                && let Some((_, child)) = node.next_terminals.iter().find(|(s, _)| *s == symbol)
            {
                let _ = self.next();
                node = child;
                continue;
            }
            // Then a nonterminal descent.
            if let Some((nt_class, var, child)) = node.next_nonterminals.first() {
                let captured = self.parse_nonterminal(*nt_class, modes);
                captures.push((*var, captured));
                node = child;
                continue;
            }
            // Otherwise this path must accept.
            break;
        }

        match &node.replacement {
            Some((replacement, _)) => {
                let mut used = Vec::new();
                Some(syntax::substitute(*replacement, &captures, &mut used, &mut self.ctx.heap))
            }
            None => {
                let pos = self.peek().position.clone();
                self.error_at(pos, "Incomplete use of a declared syntax rule");
                self.recover();
                Some(Value::Null)
            }
        }
    }

    /// Parses one nonterminal class, built-in or user-defined.
    fn parse_nonterminal(&mut self, class: SymbolId, modes: Modes) -> Value {
        if class == KnownSymbol::ClassStmt.id() {
            self.parse_stmt_value(modes)
        } else if class == KnownSymbol::ClassExpr.id() {
            self.parse_expr(modes)
        } else if class == KnownSymbol::ClassCmpExpr.id() {
            self.parse_cmp(modes)
        } else if class == KnownSymbol::ClassAddExpr.id() {
            self.parse_add(modes)
        } else if class == KnownSymbol::ClassMulExpr.id() {
            self.parse_mul(modes)
        } else if class == KnownSymbol::ClassBinaryExpr.id() {
            self.parse_binary(modes)
        } else if class == KnownSymbol::ClassPrefixExpr.id() {
            self.parse_prefix(modes)
        } else if class == KnownSymbol::ClassPostfixExpr.id() {
            self.parse_postfix(modes)
        } else if class == KnownSymbol::ClassTerm.id() {
            self.parse_term(modes)
        } else {
            match self.apply_syntax(class, modes) {
                Some(expr) => expr,
                None => {
                    let pos = self.peek().position.clone();
                    let name = self.ctx.symbols.name(class).to_owned();
                    self.error_at(pos, format!("No rule of class {name} matches here"));
                    Value::Null
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions, loosest binding first.

    /// Expression entry point: assignment level. The control constructs are
    /// expressions too, so they parse here as well as in statement position.
    pub fn parse_expr(&mut self, modes: Modes) -> Value {
        if let Some(expr) = self.apply_syntax(KnownSymbol::ClassExpr.id(), modes) {
            return expr;
        }
        let result = match self.peek().kind {
            TokenKind::If => Some(self.parse_if(modes, false)),
            TokenKind::Unless => Some(self.parse_if(modes, true)),
            TokenKind::While => Some(self.parse_while(modes, false)),
            TokenKind::Until => Some(self.parse_while(modes, true)),
            TokenKind::Do => Some(self.parse_do_while(modes)),
            TokenKind::Till => Some(self.parse_till(modes)),
            TokenKind::Try => Some(self.parse_try(modes)),
            _ => None,
        };
        if let Some(result) = result {
            return result.expr.unwrap_or(Value::Null);
        }
        self.parse_assignment(modes)
    }

    /// `lvalue = expr` (right-associative) and `lvalue op= expr`.
    fn parse_assignment(&mut self, modes: Modes) -> Value {
        let left = self.parse_or(modes);
        let token = self.peek();
        if !token.kind.is_punct_name() {
            return left;
        }
        if !modes.binary_line_breaks && token.position.line > self.prev_line {
            return left;
        }

        if token.text == "=" {
            let eq = self.next();
            self.prepare_assignment_target(left, &eq.position);
            // Assignment is right-associative; the right side re-enters the
            // full expression grammar so control constructs work there.
            let rhs = self.parse_expr(modes);
            return self.form(KnownSymbol::Set, &[left, rhs], Some(eq.position.clone()));
        }

        if let Some(op_text) = op_equals_operator(&token.text) {
            let op_token = self.next();
            let op = self.intern(op_text);
            self.prepare_assignment_target(left, &op_token.position);
            let rhs = self.parse_expr(modes);
            // The target is read and written; clone the read side so the
            // tree stays a tree.
            let read_side = syntax::deep_clone(left, &mut self.ctx.heap);
            let computed = self.method_call(read_side, op, &[rhs], Some(op_token.position.clone()));
            return self.form(KnownSymbol::Set, &[left, computed], Some(op_token.position.clone()));
        }

        left
    }

    /// Validates an assignment target; auto-declares unknown plain names in
    /// the nearest collecting scope so the right-hand side resolves against
    /// the new declaration.
    fn prepare_assignment_target(&mut self, target: Value, pos: &Position) {
        match target {
            Value::Symbol(symbol) => match self.resolve(symbol) {
                None => self.declare_variable(symbol, DeclKind::Variable, pos.clone()),
                Some(kind) if kind.rejects_assignment() => {
                    let name = self.ctx.symbols.name(symbol).to_owned();
                    self.error_at(pos.clone(), format!("\"{name}\" cannot be assigned to"));
                }
                Some(_) => {}
            },
            Value::Ref(_) => {
                // `[$dot obj name]` and `[$index obj key]` are assignable.
                let head = list::car(target, &self.ctx.heap);
                let ok = matches!(head, Value::Symbol(s) if s == KnownSymbol::Dot.id() || s == KnownSymbol::Index.id());
                if !ok {
                    self.error_at(pos.clone(), "This expression cannot be assigned to");
                }
            }
            _ => self.error_at(pos.clone(), "This expression cannot be assigned to"),
        }
    }

    fn parse_or(&mut self, modes: Modes) -> Value {
        let mut items = vec![self.parse_and(modes)];
        loop {
            let token = self.peek();
            if token.kind != TokenKind::Or || (!modes.binary_line_breaks && token.position.line > self.prev_line) {
                break;
            }
            let _ = self.next();
            items.push(self.parse_and(modes));
        }
        if items.len() == 1 {
            items[0]
        } else {
            self.form(KnownSymbol::OrForm, &items, None)
        }
    }

    fn parse_and(&mut self, modes: Modes) -> Value {
        let mut items = vec![self.parse_not(modes)];
        loop {
            let token = self.peek();
            if token.kind != TokenKind::And || (!modes.binary_line_breaks && token.position.line > self.prev_line) {
                break;
            }
            let _ = self.next();
            items.push(self.parse_not(modes));
        }
        if items.len() == 1 {
            items[0]
        } else {
            self.form(KnownSymbol::AndForm, &items, None)
        }
    }

    fn parse_not(&mut self, modes: Modes) -> Value {
        if self.peek().kind == TokenKind::Not {
            let token = self.next();
            let inner = self.parse_not(modes);
            return self.form(KnownSymbol::NotForm, &[inner], Some(token.position.clone()));
        }
        self.parse_cmp(modes)
    }

    fn parse_cmp(&mut self, modes: Modes) -> Value {
        if let Some(expr) = self.apply_syntax(KnownSymbol::ClassCmpExpr.id(), modes) {
            return expr;
        }
        let mut left = self.parse_add(modes);
        loop {
            let token = self.peek();
            if !modes.binary_line_breaks && token.position.line > self.prev_line {
                break;
            }
            if token.kind == TokenKind::Is {
                let token = self.next();
                let right = self.parse_add(modes);
                left = self.form(KnownSymbol::IsForm, &[left, right], Some(token.position.clone()));
                continue;
            }
            if token.kind.is_punct_name()
                && matches!(token.text.as_str(), "==" | "!=" | "<" | ">" | "<=" | ">=" | "===" | "!==")
            {
                let token = self.next();
                let op = self.intern(&token.text.clone());
                let right = self.parse_add(modes);
                left = self.method_call(left, op, &[right], Some(token.position.clone()));
                continue;
            }
            break;
        }
        left
    }

    fn parse_add(&mut self, modes: Modes) -> Value {
        if let Some(expr) = self.apply_syntax(KnownSymbol::ClassAddExpr.id(), modes) {
            return expr;
        }
        let mut left = self.parse_mul(modes);
        loop {
            let token = self.peek();
            if !modes.binary_line_breaks && token.position.line > self.prev_line {
                break;
            }
            if token.kind.is_punct_name() && matches!(token.text.as_str(), "+" | "-") {
                let token = self.next();
                let op = self.intern(&token.text.clone());
                let right = self.parse_mul(modes);
                left = self.method_call(left, op, &[right], Some(token.position.clone()));
            } else {
                break;
            }
        }
        left
    }

    fn parse_mul(&mut self, modes: Modes) -> Value {
        if let Some(expr) = self.apply_syntax(KnownSymbol::ClassMulExpr.id(), modes) {
            return expr;
        }
        let mut left = self.parse_binary(modes);
        loop {
            let token = self.peek();
            if !modes.binary_line_breaks && token.position.line > self.prev_line {
                break;
            }
            if token.kind.is_punct_name() && matches!(token.text.as_str(), "*" | "/") {
                let token = self.next();
                let op = self.intern(&token.text.clone());
                let right = self.parse_binary(modes);
                left = self.method_call(left, op, &[right], Some(token.position.clone()));
            } else {
                break;
            }
        }
        left
    }

    /// The general binary level: the well-known named operators, plus any
    /// punctuation name not claimed by a tighter level.
    fn parse_binary(&mut self, modes: Modes) -> Value {
        if let Some(expr) = self.apply_syntax(KnownSymbol::ClassBinaryExpr.id(), modes) {
            return expr;
        }
        let mut left = self.parse_colon(modes);
        loop {
            let token = self.peek();
            if !modes.binary_line_breaks && token.position.line > self.prev_line {
                break;
            }
            let is_named_op = token.kind.is_alpha_name() && is_named_binary_operator(&token.text);
            let is_punct_op = token.kind.is_punct_name() && !is_reserved_punctuation(&token.text);
            if is_named_op || is_punct_op {
                let token = self.next();
                let op = self.intern(&token.text.clone());
                let right = self.parse_colon(modes);
                left = self.method_call(left, op, &[right], Some(token.position.clone()));
            } else {
                break;
            }
        }
        left
    }

    /// `a:b` — member index access, unless `:` currently separates member
    /// declarations.
    fn parse_colon(&mut self, modes: Modes) -> Value {
        let mut left = self.parse_range(modes);
        if modes.colon_member_decl {
            return left;
        }
        loop {
            let token = self.peek();
            if token.kind != TokenKind::Colon || (!modes.binary_line_breaks && token.position.line > self.prev_line) {
                break;
            }
            let token = self.next();
            let right = self.parse_range(modes);
            left = self.form(KnownSymbol::Index, &[left, right], Some(token.position.clone()));
        }
        left
    }

    /// `a .. b` — a range expression.
    fn parse_range(&mut self, modes: Modes) -> Value {
        let left = self.parse_prefix(modes);
        let token = self.peek();
        if token.kind == TokenKind::DotDot && (modes.binary_line_breaks || token.position.line == self.prev_line) {
            let token = self.next();
            let right = self.parse_prefix(modes);
            return self.method_call(left, KnownSymbol::RangeTo.id(), &[right], Some(token.position.clone()));
        }
        left
    }

    /// Prefix operators: unary `-`/`+`/`~`/`!`, and `typeof`.
    fn parse_prefix(&mut self, modes: Modes) -> Value {
        if let Some(expr) = self.apply_syntax(KnownSymbol::ClassPrefixExpr.id(), modes) {
            return expr;
        }
        let token = self.peek();
        if token.kind == TokenKind::TypeOf {
            let token = self.next();
            let inner = self.parse_prefix(modes);
            return self.form(KnownSymbol::TypeOfForm, &[inner], Some(token.position.clone()));
        }
        if token.kind.is_punct_name() && matches!(token.text.as_str(), "-" | "+" | "~" | "!") {
            let token = self.next();
            let inner = self.parse_prefix(modes);
            // Fold negation of numeric literals so `-5` is one literal.
            if token.text == "-" {
                match inner {
                    Value::Int64(v) => return Value::Int64(-v),
                    Value::Int32(v) => return Value::Int32(-v),
                    Value::Int16(v) => return Value::Int16(-v),
                    Value::Real64(v) => return Value::Real64(-v),
                    Value::Float64(v) => return Value::Float64(-v),
                    Value::Real32(v) => return Value::Real32(-v),
                    Value::Float32(v) => return Value::Float32(-v),
                    _ => {}
                }
            }
            if token.text == "+" {
                return inner;
            }
            let op = self.intern(&token.text.clone());
            return self.method_call(inner, op, &[], Some(token.position.clone()));
        }
        self.parse_new(modes)
    }

    /// `new [base] { member: value … }`.
    fn parse_new(&mut self, modes: Modes) -> Value {
        let token = self.peek();
        if token.kind != TokenKind::New {
            return self.parse_postfix(modes);
        }
        let token = self.next();
        let pos = token.position.clone();
        // The base parses at dot level so the member-list brace is not
        // mistaken for a juxtaposed argument.
        let base = if self.peek().kind == TokenKind::LeftBrace {
            Value::Null
        } else {
            self.parse_dot(modes)
        };
        if !self.expect(TokenKind::LeftBrace, "\"{\" opening the member list") {
            self.recover();
            return Value::Null;
        }
        let member_modes = Modes {
            colon_member_decl: true,
            binary_line_breaks: false,
            ..modes
        };
        let mut members = Vec::new();
        loop {
            let next = self.peek();
            match next.kind {
                TokenKind::RightBrace => {
                    let _ = self.next();
                    break;
                }
                TokenKind::Eoi => {
                    self.error_at(next.position.clone(), "Unterminated member list");
                    break;
                }
                TokenKind::Semicolon | TokenKind::Comma => {
                    let _ = self.next();
                }
                k if k.is_alpha_name() => {
                    let name = self.next();
                    let symbol = self.intern(&name.text.clone());
                    self.expect(TokenKind::Colon, "\":\" after the member name");
                    let value = self.parse_expr(member_modes);
                    let member = self.make_list(&[Value::Symbol(symbol), value], Some(name.position.clone()));
                    members.push(member);
                }
                _ => {
                    self.error_at(next.position.clone(), "Expected a member name");
                    self.recover();
                    break;
                }
            }
        }
        let member_list = self.make_list(&members, Some(pos.clone()));
        self.form(KnownSymbol::NewForm, &[base, member_list], Some(pos))
    }

    /// Postfix level: juxtaposed application. `f a b` applies `f` to the
    /// terms that follow it on the same line. Only names, dot-chains, and
    /// call results apply; a literal followed by a term is two expressions.
    fn parse_postfix(&mut self, modes: Modes) -> Value {
        if let Some(expr) = self.apply_syntax(KnownSymbol::ClassPostfixExpr.id(), modes) {
            return expr;
        }
        let head = self.parse_dot(modes);
        let appliable = match head {
            Value::Symbol(_) => true,
            Value::Ref(_) => {
                list::cell_id(head, &self.ctx.heap).is_some()
                    && !matches!(list::car(head, &self.ctx.heap),
                        Value::Symbol(s) if s == KnownSymbol::Quote.id())
            }
            _ => false,
        };
        if !appliable {
            return head;
        }
        let mut args = Vec::new();
        loop {
            let token = self.peek();
            if token.position.line > self.prev_line {
                break;
            }
            if !self.token_starts_term(&token) {
                break;
            }
            args.push(self.parse_dot(modes));
        }
        if args.is_empty() {
            head
        } else {
            let mut all = Vec::with_capacity(args.len() + 1);
            all.push(head);
            all.extend_from_slice(&args);
            self.make_list(&all, None)
        }
    }

    /// True when `token` can begin a term (and so continue an application).
    fn token_starts_term(&mut self, token: &Token) -> bool {
        match token.kind {
            TokenKind::LeftParen
            | TokenKind::LeftBracket
            | TokenKind::LeftBrace
            | TokenKind::Bar
            | TokenKind::Backtick
            | TokenKind::DynString
            | TokenKind::RawString
            | TokenKind::Char
            | TokenKind::Uni
            | TokenKind::Byte
            | TokenKind::Integer16
            | TokenKind::Integer32
            | TokenKind::Integer64
            | TokenKind::Real32
            | TokenKind::Real64
            | TokenKind::Real128
            | TokenKind::Float32
            | TokenKind::Float64 => true,
            TokenKind::UnknownAlphaName | TokenKind::AlphaName => {
                // Infix operator names and declared keywords are not
                // arguments.
                if is_named_binary_operator(&token.text) {
                    return false;
                }
                let symbol = self.ctx.symbols.get_symbol_no_create(&token.text);
                !(symbol.is_some() && self.resolve(symbol) == Some(DeclKind::Keyword))
            }
            _ => false,
        }
    }

    /// `a.b.c` — property access chains.
    fn parse_dot(&mut self, modes: Modes) -> Value {
        let mut left = self.parse_term(modes);
        while self.peek().kind == TokenKind::Dot {
            let token = self.next();
            let name = self.peek();
            if !name.kind.is_alpha_name() {
                self.error_at(name.position.clone(), "Expected a property name after \".\"");
                break;
            }
            let name = self.next();
            let symbol = self.intern(&name.text.clone());
            left = self.form(KnownSymbol::Dot, &[left, Value::Symbol(symbol)], Some(token.position.clone()));
        }
        left
    }

    /// Terms: literals, names, parens, scopes, quotes, fn literals.
    fn parse_term(&mut self, modes: Modes) -> Value {
        if let Some(expr) = self.apply_syntax(KnownSymbol::ClassTerm.id(), modes) {
            return expr;
        }
        let token = self.next();
        let pos = token.position.clone();
        match token.kind {
            TokenKind::LeftParen => {
                let inner_modes = Modes {
                    binary_line_breaks: true,
                    comma_decl: false,
                    colon_member_decl: false,
                };
                let inner = self.parse_expr(inner_modes);
                self.expect(TokenKind::RightParen, "\")\"");
                inner
            }
            TokenKind::LeftBrace => self.parse_scope_term(pos),
            TokenKind::LeftBracket => self.parse_raw_list(pos),
            TokenKind::Backtick => self.parse_quote_term(pos),
            TokenKind::Bar => self.parse_fn_literal(pos),

            TokenKind::Integer64 => literal_value(&token),
            TokenKind::Integer32 | TokenKind::Integer16 | TokenKind::Byte => literal_value(&token),
            TokenKind::Real32 | TokenKind::Real64 | TokenKind::Float32 | TokenKind::Float64 => literal_value(&token),
            TokenKind::Real128 => {
                let TokenValue::Real128(v) = token.value else {
                    return Value::Null;
                };
                Value::Ref(self.ctx.heap.alloc(HeapData::Real128(v)))
            }
            TokenKind::Char | TokenKind::Uni => literal_value(&token),
            TokenKind::RawString => self.alloc_str(&token.text),
            TokenKind::DynString => self.parse_dynstring(&token),

            k if k.is_alpha_name() => match token.text.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" => Value::Null,
                _ => {
                    let symbol = self.intern(&token.text.clone());
                    Value::Symbol(symbol)
                }
            },
            TokenKind::Error => {
                self.error_at(pos, token.text.clone());
                self.recover();
                Value::Null
            }
            _ => {
                self.error_at(pos, format!("Unexpected token \"{}\"", token.text));
                self.unwind_one_token(&token);
                Value::Null
            }
        }
    }

    /// Puts back a token that a term could not start with, unless doing so
    /// would loop forever (the caller consumed it; leave consumed).
    fn unwind_one_token(&mut self, _token: &Token) {
        // The token stays consumed so parsing always makes progress.
    }

    /// `{ stmt… }` — an explicit scope.
    fn parse_scope_term(&mut self, pos: Position) -> Value {
        self.begin_scope(ScopeKind::Explicit);
        let mut stmts = Vec::new();
        loop {
            let result = self.parse_stmt(Modes::default());
            match result.status {
                ParseStatus::NotMatchedNoTokensConsumed => break,
                _ => {
                    if let Some(expr) = result.expr {
                        stmts.push(expr);
                    }
                }
            }
        }
        self.expect(TokenKind::RightBrace, "\"}\" closing the scope");
        let mut scope = self.end_scope();
        scope.sealed = true;
        let locals: Vec<Value> = scope.local_variables().into_iter().map(Value::Symbol).collect();
        let local_list = self.make_list(&locals, Some(pos.clone()));
        let mut items = Vec::with_capacity(stmts.len() + 1);
        items.push(local_list);
        items.extend_from_slice(&stmts);
        self.form(KnownSymbol::Scope, &items, Some(pos))
    }

    /// `|params| expr` — a function literal.
    fn parse_fn_literal(&mut self, pos: Position) -> Value {
        self.begin_scope(ScopeKind::FunctionBody);
        let mut params = Vec::new();
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::Bar => {
                    let _ = self.next();
                    break;
                }
                TokenKind::Eoi => {
                    self.error_at(token.position.clone(), "Unterminated parameter list");
                    break;
                }
                TokenKind::Comma => {
                    let _ = self.next();
                }
                k if k.is_alpha_name() => {
                    let name = self.next();
                    let symbol = self.intern(&name.text.clone());
                    if let Err(DeclareError::DuplicateDeclaration { .. }) =
                        self.current_scope()
                            .declare(symbol, DeclKind::Argument, name.position.clone())
                    {
                        self.error_at(name.position.clone(), "Duplicate parameter name");
                    }
                    // Optional rest marker or default value.
                    let next = self.peek();
                    if next.kind == TokenKind::DotDot {
                        let _ = self.next();
                        params.push(self.make_list(&[Value::Symbol(symbol)], Some(name.position.clone())));
                    } else if next.kind.is_punct_name() && next.text == "=" {
                        let _ = self.next();
                        let default = self.parse_dot(Modes::default());
                        params.push(self.make_list(&[Value::Symbol(symbol), default], Some(name.position.clone())));
                    } else {
                        params.push(Value::Symbol(symbol));
                    }
                }
                _ => {
                    self.error_at(token.position.clone(), "Expected a parameter name");
                    let _ = self.next();
                }
            }
        }

        let body = self.parse_expr(Modes::default());
        let mut scope = self.end_scope();
        scope.sealed = true;
        // Body-declared locals become the function's scope list.
        let locals: Vec<Value> = scope.local_variables().into_iter().map(Value::Symbol).collect();
        let body = if locals.is_empty() {
            body
        } else {
            let local_list = self.make_list(&locals, Some(pos.clone()));
            self.form(KnownSymbol::Scope, &[local_list, body], Some(pos.clone()))
        };
        let param_list = self.make_list(&params, Some(pos.clone()));
        self.form(KnownSymbol::Fn, &[param_list, body], Some(pos))
    }

    /// A dynamic string literal, expanding `{name}` interpolations into a
    /// concatenation chain.
    fn parse_dynstring(&mut self, token: &Token) -> Value {
        let text = token.text.clone();
        if !text.contains('{') {
            return self.alloc_str(&text);
        }
        let pos = token.position.clone();
        let mut parts: Vec<Value> = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '{' {
                let mut name = String::new();
                for inner in chars.by_ref() {
                    if inner == '}' {
                        break;
                    }
                    name.push(inner);
                }
                if !literal.is_empty() {
                    let part = self.alloc_str(&literal);
                    parts.push(part);
                    literal.clear();
                }
                let trimmed = name.trim();
                if trimmed.is_empty() {
                    self.error_at(pos.clone(), "Empty interpolation in string");
                    continue;
                }
                let symbol = self.intern(trimmed);
                // Coerce the interpolated value to a string.
                let coerced = self.method_call(Value::Symbol(symbol), KnownSymbol::StringOp.id(), &[], Some(pos.clone()));
                parts.push(coerced);
            } else {
                literal.push(c);
            }
        }
        if !literal.is_empty() {
            let part = self.alloc_str(&literal);
            parts.push(part);
        }
        match parts.len() {
            0 => self.alloc_str(""),
            1 => parts[0],
            _ => {
                let mut acc = parts[0];
                for part in &parts[1..] {
                    acc = self.method_call(acc, KnownSymbol::Plus.id(), &[*part], Some(pos.clone()));
                }
                acc
            }
        }
    }
}

/// True for tokens that end a statement-position expression slot.
fn stmt_like_end(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Eoi
            | TokenKind::RightBrace
            | TokenKind::RightParen
            | TokenKind::RightBracket
            | TokenKind::Semicolon
    )
}

/// `op=` shapes that desugar to read-modify-write, excluding comparisons.
fn op_equals_operator(text: &str) -> Option<&str> {
    if text.len() < 2 || !text.ends_with('=') {
        return None;
    }
    if matches!(text, "==" | "!=" | "<=" | ">=" | "===" | "!==" | "=>") {
        return None;
    }
    Some(&text[..text.len() - 1])
}

/// Alpha names usable as infix operators at the general binary level.
fn is_named_binary_operator(text: &str) -> bool {
    matches!(
        text,
        "mod" | "rem" | "cmp" | "compare" | "each" | "map" | "where" | "count" | "any?" | "join"
    )
}

/// Punctuation claimed by tighter levels or reserved for assignment.
fn is_reserved_punctuation(text: &str) -> bool {
    matches!(
        text,
        "=" | "==" | "!=" | "<" | ">" | "<=" | ">=" | "===" | "!==" | "+" | "-" | "*" | "/" | "=>" | "@"
    ) || op_equals_operator(text).is_some()
}

/// The literal value of a numeric/char token.
fn literal_value(token: &Token) -> Value {
    match token.value {
        TokenValue::Byte(v) => Value::Byte(v),
        TokenValue::Int16(v) => Value::Int16(v),
        TokenValue::Int32(v) => Value::Int32(v),
        TokenValue::Int64(v) => Value::Int64(v),
        TokenValue::Real32(v) => Value::Real32(v),
        TokenValue::Real64(v) => Value::Real64(v),
        TokenValue::Float32(v) => Value::Float32(v),
        TokenValue::Float64(v) => Value::Float64(v),
        TokenValue::Char(v) => Value::Char(v),
        TokenValue::Uni(v) => Value::Uni(v),
        TokenValue::Real128(_) | TokenValue::None => Value::Null,
    }
}
