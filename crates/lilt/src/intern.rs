//! Symbol interning: names become 32-bit ids, bijectively.
//!
//! A fixed prefix of the id space is reserved for symbols the compiler knows
//! by identity — the special-form heads (`$set`, `$if`, `$fn`, …), the
//! punctuation tokens, the well-known operator names, and the property names
//! the shorthand opcodes read. [`KnownSymbol`] enumerates them; the table
//! interns them in declaration order at construction, so
//! `KnownSymbol::id() == position + 1` always holds.
//!
//! Id 0 is the "no symbol" sentinel and never names anything.

use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::dict::{Dict, DictKey};

/// An interned symbol id. Compares by id; the table guarantees id↔name
/// bijection, so equal ids mean equal names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
    /// The "no symbol" sentinel.
    pub const NONE: Self = Self(0);

    /// Raw id, for operand encoding.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }

    /// Rebuilds a SymbolId from a bytecode operand.
    #[must_use]
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// True unless this is the sentinel.
    #[must_use]
    pub fn is_some(self) -> bool {
        self.0 != 0
    }
}

impl DictKey for SymbolId {
    fn dict_hash(&self) -> u32 {
        crate::hash_oracle::mix_int32(self.0 as i32)
    }
}

/// Symbols with reserved ids, known to the compiler by identity.
///
/// Declaration order is load-bearing: the table interns these first, and the
/// compiler compares ids, not names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub enum KnownSymbol {
    // Special-form heads.
    #[strum(serialize = "$set")]
    Set,
    #[strum(serialize = "$if")]
    If,
    #[strum(serialize = "$while")]
    While,
    #[strum(serialize = "$till")]
    Till,
    #[strum(serialize = "$fn")]
    Fn,
    #[strum(serialize = "$quote")]
    Quote,
    #[strum(serialize = "$progn")]
    Progn,
    #[strum(serialize = "$scope")]
    Scope,
    #[strum(serialize = "$return")]
    Return,
    #[strum(serialize = "$catch")]
    Catch,
    #[strum(serialize = "$not")]
    NotForm,
    #[strum(serialize = "$or")]
    OrForm,
    #[strum(serialize = "$and")]
    AndForm,
    #[strum(serialize = "$new")]
    NewForm,
    #[strum(serialize = "$is")]
    IsForm,
    #[strum(serialize = "$typeof")]
    TypeOfForm,
    #[strum(serialize = "$dot")]
    Dot,
    #[strum(serialize = "$index")]
    Index,
    #[strum(serialize = "$include")]
    Include,

    // Special tokens.
    #[strum(serialize = ",")]
    Comma,
    #[strum(serialize = ";")]
    Semicolon,
    #[strum(serialize = ":")]
    Colon,
    #[strum(serialize = "(")]
    LeftParen,
    #[strum(serialize = ")")]
    RightParen,
    #[strum(serialize = "[")]
    LeftBracket,
    #[strum(serialize = "]")]
    RightBracket,
    #[strum(serialize = "{")]
    LeftBrace,
    #[strum(serialize = "}")]
    RightBrace,

    // Well-known operator names the compiler maps to dedicated opcodes.
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "*")]
    Star,
    #[strum(serialize = "/")]
    Slash,
    #[strum(serialize = "mod")]
    Mod,
    #[strum(serialize = "rem")]
    Rem,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "===")]
    SuperEq,
    #[strum(serialize = "!==")]
    SuperNe,
    #[strum(serialize = "cmp")]
    Cmp,
    #[strum(serialize = "compare")]
    Compare,
    #[strum(serialize = "range-to")]
    RangeTo,
    #[strum(serialize = "each")]
    Each,
    #[strum(serialize = "map")]
    Map,
    #[strum(serialize = "where")]
    Where,
    #[strum(serialize = "count")]
    Count,
    #[strum(serialize = "any?")]
    Any,
    #[strum(serialize = "join")]
    Join,
    #[strum(serialize = "neg")]
    Neg,
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "string")]
    StringOp,
    #[strum(serialize = "hash")]
    HashOp,

    // Property names the shorthand opcodes read.
    #[strum(serialize = "a")]
    A,
    #[strum(serialize = "d")]
    D,
    #[strum(serialize = "left")]
    Left,
    #[strum(serialize = "right")]
    Right,
    #[strum(serialize = "start")]
    Start,
    #[strum(serialize = "end")]
    End,
    #[strum(serialize = "length")]
    Length,
    #[strum(serialize = "stepping")]
    Stepping,
    #[strum(serialize = "base")]
    Base,
    #[strum(serialize = "name")]
    Name,

    // Type-name symbols produced by `typeof` and used for base objects.
    #[strum(serialize = "null")]
    NullName,
    #[strum(serialize = "primitive")]
    Primitive,
    #[strum(serialize = "byte")]
    ByteName,
    #[strum(serialize = "integer16")]
    Integer16Name,
    #[strum(serialize = "integer32")]
    Integer32Name,
    #[strum(serialize = "integer64")]
    Integer64Name,
    #[strum(serialize = "real32")]
    Real32Name,
    #[strum(serialize = "real64")]
    Real64Name,
    #[strum(serialize = "real128")]
    Real128Name,
    #[strum(serialize = "float32")]
    Float32Name,
    #[strum(serialize = "float64")]
    Float64Name,
    #[strum(serialize = "char")]
    CharName,
    #[strum(serialize = "uni")]
    UniName,
    #[strum(serialize = "symbol")]
    SymbolName,
    #[strum(serialize = "byte-array")]
    ByteArrayName,
    #[strum(serialize = "list")]
    ListName,
    #[strum(serialize = "pair")]
    PairName,
    #[strum(serialize = "range")]
    RangeName,
    #[strum(serialize = "object")]
    ObjectName,
    #[strum(serialize = "fn")]
    FnName,
    #[strum(serialize = "handle")]
    HandleName,
    #[strum(serialize = "syntax")]
    SyntaxName,
    #[strum(serialize = "nonterminal")]
    NonterminalName,
    #[strum(serialize = "till-continuation")]
    TillContinuationName,

    // The nine built-in nonterminal classes, with hardcoded identities.
    #[strum(serialize = "STMT")]
    ClassStmt,
    #[strum(serialize = "EXPR")]
    ClassExpr,
    #[strum(serialize = "CMPEXPR")]
    ClassCmpExpr,
    #[strum(serialize = "ADDEXPR")]
    ClassAddExpr,
    #[strum(serialize = "MULEXPR")]
    ClassMulExpr,
    #[strum(serialize = "BINARYEXPR")]
    ClassBinaryExpr,
    #[strum(serialize = "PREFIXEXPR")]
    ClassPrefixExpr,
    #[strum(serialize = "POSTFIXEXPR")]
    ClassPostfixExpr,
    #[strum(serialize = "TERM")]
    ClassTerm,

    // Miscellaneous names the runtime reaches for.
    #[strum(serialize = "true")]
    True,
    #[strum(serialize = "false")]
    False,
    #[strum(serialize = "regex")]
    Regex,
    #[strum(serialize = "regex-match")]
    RegexMatch,
    #[strum(serialize = "file")]
    File,
    #[strum(serialize = "timestamp")]
    Timestamp,
    #[strum(serialize = "all")]
    All,
    #[strum(serialize = "syntax-only")]
    SyntaxOnly,
    #[strum(serialize = "as")]
    As,
    #[strum(serialize = "of")]
    Of,
    #[strum(serialize = "combine")]
    Combine,
    #[strum(serialize = "List")]
    ListBase,
    #[strum(serialize = "Stdout")]
    Stdout,
    #[strum(serialize = "call")]
    Call,
    #[strum(serialize = "apply")]
    Apply,
}

impl KnownSymbol {
    /// The reserved id for this known symbol.
    #[must_use]
    pub fn id(self) -> SymbolId {
        // Interned in declaration order starting at id 1.
        SymbolId(self as u32 + 1)
    }

    /// The source text of this known symbol.
    #[must_use]
    pub fn text(self) -> &'static str {
        self.into()
    }
}

/// Interns strings to [`SymbolId`]s and back.
///
/// Owned by the runtime context; the parser and compiler hold `&mut` access
/// while they run, so no locking is needed (one VM per thread).
#[derive(Debug)]
pub struct SymbolTable {
    ids: Dict<String, SymbolId>,
    names: Vec<String>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// Creates a table with the reserved known symbols pre-interned.
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self {
            ids: Dict::with_size(256),
            // names[0] is the sentinel's empty name.
            names: vec![String::new()],
        };
        for known in KnownSymbol::iter() {
            let id = table.get_symbol(known.text());
            debug_assert_eq!(id, known.id(), "known-symbol table out of order");
        }
        table
    }

    /// Interns a name, allocating the next id when absent.
    pub fn get_symbol(&mut self, name: &str) -> SymbolId {
        let key = name.to_owned();
        if let Some(id) = self.ids.try_get(&key) {
            return *id;
        }
        let id = SymbolId(self.names.len() as u32);
        self.names.push(key.clone());
        self.ids.append(key, id);
        id
    }

    /// Looks a name up without interning; the sentinel when absent.
    #[must_use]
    pub fn get_symbol_no_create(&self, name: &str) -> SymbolId {
        self.ids.try_get(&name.to_owned()).copied().unwrap_or(SymbolId::NONE)
    }

    /// The interned name for an id; empty string for the sentinel.
    #[must_use]
    pub fn name(&self, id: SymbolId) -> &str {
        self.names.get(id.0 as usize).map_or("", String::as_str)
    }

    /// Number of interned symbols, the sentinel excluded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len() - 1
    }

    /// True when nothing is interned; never the case, since the reserved
    /// symbols are interned at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn intern_round_trips_names() {
        let mut table = SymbolTable::new();
        let id = table.get_symbol("escape-velocity");
        assert_eq!(table.name(id), "escape-velocity");
        assert_eq!(table.get_symbol("escape-velocity"), id);
    }

    #[test]
    fn no_create_returns_sentinel_for_unknown() {
        let table = SymbolTable::new();
        assert_eq!(table.get_symbol_no_create("never-interned"), SymbolId::NONE);
    }

    #[test]
    fn known_symbols_get_reserved_prefix_ids() {
        let mut table = SymbolTable::new();
        assert_eq!(table.get_symbol("$set"), KnownSymbol::Set.id());
        assert_eq!(table.get_symbol("$till"), KnownSymbol::Till.id());
        assert_eq!(table.get_symbol(","), KnownSymbol::Comma.id());
        assert_eq!(table.get_symbol("+"), KnownSymbol::Plus.id());
    }

    #[test]
    fn distinct_names_get_distinct_ids() {
        let mut table = SymbolTable::new();
        let a = table.get_symbol("alpha");
        let b = table.get_symbol("beta");
        assert_ne!(a, b);
        assert_eq!(table.name(a), "alpha");
        assert_eq!(table.name(b), "beta");
    }
}
