//! Expression engine (spec.md §3 "Expression", §4.2).
//!
//! The RPN node shape (`Operand`-style tagged enum with payload, see
//! `Abbreviation`/`Operand` in the teacher's `src/bitstream.rs`) is reused
//! here for the expression tree's postfix stream. The suspend/resume
//! mechanism (§3, §4.2, §9) has no teacher precedent and is implemented in
//! the sibling `eval` module directly from spec.md's design notes.

pub mod eval;

pub use eval::ExprId;

use std::fmt;

use crate::section::SectionId;
use crate::symbol::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Neg,
    BitNot,
    LogNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    MulS,
    DivS,
    DivU,
    ModS,
    ModU,
    BitAnd,
    BitOr,
    BitXor,
    OrNot,
    Shl,
    ShrL,
    ShrA,
    LogAnd,
    LogOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LtU,
    LeU,
    GtU,
    GeU,
}

impl BinOp {
    #[must_use]
    pub fn is_unsigned(self) -> bool {
        matches!(self, BinOp::DivU | BinOp::ModU | BinOp::LtU | BinOp::LeU | BinOp::GtU | BinOp::GeU)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::MulS => "*",
            BinOp::DivS => "/",
            BinOp::DivU => "//",
            BinOp::ModS => "%",
            BinOp::ModU => "%%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::OrNot => "!!",
            BinOp::Shl => "<<",
            BinOp::ShrL => ">>",
            BinOp::ShrA => ">>>",
            BinOp::LogAnd => "&&",
            BinOp::LogOr => "||",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::LtU => "<@",
            BinOp::LeU => "<=@",
            BinOp::GtU => ">@",
            BinOp::GeU => ">=@",
        }
    }
}

impl UnOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UnOp::Plus => "+",
            UnOp::Neg => "-",
            UnOp::BitNot => "~",
            UnOp::LogNot => "!",
        }
    }
}

/// One node of the postfix (RPN) stream (spec.md §3: "stored serialized as
/// an RPN stream `(ops[], args[])`").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpnItem {
    Literal(i64),
    SymbolRef(SymbolId),
    /// Location counter `.` resolved at parse time to the current
    /// section's cursor; immediate because `.` is always known the
    /// instant it is read (spec.md §3).
    LocationCounterLiteral(i64, Option<SectionId>),
    Unary(UnOp),
    Binary(BinOp),
    /// Ternary `?:`; pops three operands (cond, then, else) off the stack.
    Ternary,
}

/// An expression as parsed: the RPN stream plus the number of distinct
/// unresolved symbol occurrences (spec.md §3 `sym_occurs_num`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub rpn: Vec<RpnItem>,
}

impl Expression {
    #[must_use]
    pub fn sym_occurs_num(&self, symbols: &crate::symbol::SymbolTable) -> usize {
        self.rpn
            .iter()
            .filter(|item| matches!(item, RpnItem::SymbolRef(id) if !symbols.get(*id).is_resolved()))
            .count()
    }

    /// Render the RPN stream as a space-separated postfix string, used by
    /// the round-trip property test in spec.md §8 (#1).
    #[must_use]
    pub fn to_postfix_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.rpn.len());
        for item in &self.rpn {
            parts.push(match item {
                RpnItem::Literal(v) => v.to_string(),
                RpnItem::LocationCounterLiteral(v, _) => v.to_string(),
                RpnItem::SymbolRef(id) => format!("sym{}", id.0),
                RpnItem::Unary(op) => format!("u{}", op.as_str()),
                RpnItem::Binary(op) => op.as_str().to_string(),
                RpnItem::Ternary => "?:".to_string(),
            });
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    UnexpectedEnd,
    UnexpectedChar(char),
    ExpectedOperand,
    UnbalancedParens,
    ExpectedColonInTernary,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEnd => write!(f, "unexpected end of expression"),
            Self::UnexpectedChar(c) => write!(f, "unexpected character '{c}' in expression"),
            Self::ExpectedOperand => write!(f, "expected an operand"),
            Self::UnbalancedParens => write!(f, "unbalanced parentheses"),
            Self::ExpectedColonInTernary => write!(f, "expected ':' in ternary expression"),
        }
    }
}

impl std::error::Error for ParseError {}

/// What a symbol-name token resolves to while parsing, supplied by the
/// driver so `expr` never needs direct knowledge of the assembler state
/// beyond these three questions.
pub trait SymbolResolver {
    /// Look up or forward-declare a plain symbol, returning its id.
    fn get_or_create(&mut self, name: &str) -> SymbolId;
    /// `Nb`: most recent prior instance of local label `n`, if any.
    fn resolve_local_backward(&mut self, n: u32) -> Option<SymbolId>;
    /// `Nf`: the id that the next `n:` definition will bind.
    fn resolve_local_forward(&mut self, n: u32) -> SymbolId;
    /// Current `.` value and section, for the location-counter leaf.
    fn location_counter(&self) -> (i64, Option<SectionId>);
    /// Used only when `make_snapshot` is set: resolved value of a symbol
    /// right now, so `.eqv` can freeze it (spec.md §4.2).
    fn current_value(&self, id: SymbolId) -> Option<(i64, Option<SectionId>)>;
}

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Int(i64),
    /// A bare identifier, or a decimal-digit run immediately followed by
    /// `f`/`b` (a local-label reference), distinguished during parsing.
    Ident(String),
    LocalRef(u32, bool), // true = forward (f), false = backward (b)
    Op(&'static str),
    LParen,
    RParen,
    Question,
    Colon,
    Dot,
    End,
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Self { chars: src.char_indices().peekable(), src }
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn peek_tok(&mut self) -> Result<Tok, ParseError> {
        let save = self.chars.clone();
        let tok = self.next_tok()?;
        self.chars = save;
        Ok(tok)
    }

    fn next_tok(&mut self) -> Result<Tok, ParseError> {
        self.skip_ws();
        let (start, c) = match self.chars.peek().copied() {
            None => return Ok(Tok::End),
            Some(x) => x,
        };
        if c.is_ascii_digit() {
            return self.lex_number(start);
        }
        if c == '.' {
            self.chars.next();
            if matches!(self.chars.peek(), Some((_, c)) if c.is_alphanumeric() || *c == '_') {
                // ".name" is not part of this grammar's leaf set beyond bare
                // "."; treat a bare dot followed by ident as unsupported.
                return Err(ParseError::UnexpectedChar('.'));
            }
            return Ok(Tok::Dot);
        }
        if c.is_alphabetic() || c == '_' {
            return self.lex_ident(start);
        }
        self.lex_operator(c)
    }

    fn lex_number(&mut self, start: usize) -> Result<Tok, ParseError> {
        let mut end = start;
        let mut chars = self.chars.clone();
        // hex / binary prefix
        let is_hex = self.src[start..].starts_with("0x") || self.src[start..].starts_with("0X");
        let is_bin = self.src[start..].starts_with("0b") || self.src[start..].starts_with("0B");
        if is_hex || is_bin {
            chars.next();
            chars.next();
            end = chars.peek().map_or(self.src.len(), |(i, _)| *i);
        }
        loop {
            match chars.peek().copied() {
                Some((i, c)) if c.is_ascii_hexdigit() && (is_hex || c.is_ascii_digit()) => {
                    end = i + c.len_utf8();
                    chars.next();
                }
                Some((i, c)) if !is_hex && !is_bin && c.is_ascii_digit() => {
                    end = i + c.len_utf8();
                    chars.next();
                }
                _ => break,
            }
        }
        let text = &self.src[start..end];
        // local label reference: digits immediately followed by 'f' or 'b'
        if !is_hex && !is_bin {
            if let Some((i, suffix)) = chars.peek().copied() {
                if suffix == 'f' || suffix == 'b' {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let continues_ident = matches!(lookahead.peek(), Some((_, c)) if c.is_alphanumeric() || *c == '_');
                    if !continues_ident {
                        let n: u32 = text.parse().map_err(|_| ParseError::UnexpectedChar(suffix))?;
                        self.chars = lookahead;
                        let _ = i;
                        return Ok(Tok::LocalRef(n, suffix == 'f'));
                    }
                }
            }
        }
        self.chars = chars;
        let value = if is_hex {
            i64::from_str_radix(&text[2..], 16).map_err(|_| ParseError::UnexpectedChar('x'))?
        } else if is_bin {
            i64::from_str_radix(&text[2..], 2).map_err(|_| ParseError::UnexpectedChar('b'))?
        } else {
            text.parse::<i64>().map_err(|_| ParseError::UnexpectedChar('0'))?
        };
        Ok(Tok::Int(value))
    }

    fn lex_ident(&mut self, start: usize) -> Result<Tok, ParseError> {
        let mut end = start;
        while let Some((i, c)) = self.chars.peek().copied() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        Ok(Tok::Ident(self.src[start..end].to_string()))
    }

    fn lex_operator(&mut self, c: char) -> Result<Tok, ParseError> {
        // Longest-match first for multi-character operators.
        let rest = &self.src[self.chars.peek().map_or(self.src.len(), |(i, _)| *i)..];
        let three = ["<=@", ">=@", ">>>"];
        let two = ["//", "%%", "!!", "<<", ">>", "&&", "||", "==", "!=", "<=", ">=", "<@", ">@"];
        for op in three {
            if rest.starts_with(op) {
                self.advance_by(op.len());
                return Ok(Tok::Op(match op {
                    "<=@" => "<=@",
                    ">=@" => ">=@",
                    ">>>" => ">>>",
                    _ => unreachable!(),
                }));
            }
        }
        for op in two {
            if rest.starts_with(op) {
                self.advance_by(op.len());
                return Ok(Tok::Op(op));
            }
        }
        match c {
            '(' => {
                self.chars.next();
                Ok(Tok::LParen)
            }
            ')' => {
                self.chars.next();
                Ok(Tok::RParen)
            }
            '?' => {
                self.chars.next();
                Ok(Tok::Question)
            }
            ':' => {
                self.chars.next();
                Ok(Tok::Colon)
            }
            '+' | '-' | '*' | '/' | '%' | '&' | '|' | '^' | '~' | '!' | '<' | '>' => {
                self.chars.next();
                Ok(Tok::Op(match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    '%' => "%",
                    '&' => "&",
                    '|' => "|",
                    '^' => "^",
                    '~' => "~",
                    '!' => "!",
                    '<' => "<",
                    '>' => ">",
                    _ => unreachable!(),
                }))
            }
            other => Err(ParseError::UnexpectedChar(other)),
        }
    }

    fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.chars.next();
        }
    }
}

/// One parse over an expression starting at the current position.
/// `make_snapshot` mirrors spec.md §4.2: when set, any symbol that is
/// already resolved (or is itself a snapshot) is frozen into a literal
/// instead of a live `SymbolRef`.
pub fn parse_expression<R: SymbolResolver>(
    src: &str,
    resolver: &mut R,
    make_snapshot: bool,
) -> Result<(Expression, usize), ParseError> {
    let mut tz = Tokenizer::new(src);
    let mut rpn = Vec::new();
    parse_ternary(&mut tz, resolver, make_snapshot, &mut rpn)?;
    let consumed = tz.chars.peek().map_or(src.len(), |(i, _)| *i);
    Ok((Expression { rpn }, consumed))
}

fn parse_ternary<R: SymbolResolver>(
    tz: &mut Tokenizer<'_>,
    resolver: &mut R,
    snap: bool,
    out: &mut Vec<RpnItem>,
) -> Result<(), ParseError> {
    parse_or(tz, resolver, snap, out)?;
    if tz.peek_tok()? == Tok::Question {
        tz.next_tok()?;
        parse_ternary(tz, resolver, snap, out)?;
        if tz.next_tok()? != Tok::Colon {
            return Err(ParseError::ExpectedColonInTernary);
        }
        parse_ternary(tz, resolver, snap, out)?;
        out.push(RpnItem::Ternary);
    }
    Ok(())
}

macro_rules! left_assoc_level {
    ($name:ident, $next:ident, { $($lit:literal => $op:expr),+ $(,)? }) => {
        fn $name<R: SymbolResolver>(
            tz: &mut Tokenizer<'_>,
            resolver: &mut R,
            snap: bool,
            out: &mut Vec<RpnItem>,
        ) -> Result<(), ParseError> {
            $next(tz, resolver, snap, out)?;
            loop {
                let matched = match tz.peek_tok()? {
                    Tok::Op(o) => [$($lit),+].contains(&o).then_some(o),
                    _ => None,
                };
                let Some(o) = matched else { break };
                tz.next_tok()?;
                $next(tz, resolver, snap, out)?;
                out.push(RpnItem::Binary(match o {
                    $($lit => $op,)+
                    _ => unreachable!(),
                }));
            }
            Ok(())
        }
    };
}

left_assoc_level!(parse_or, parse_and, { "||" => BinOp::LogOr });
left_assoc_level!(parse_and, parse_cmp, { "&&" => BinOp::LogAnd });
left_assoc_level!(parse_cmp, parse_addsub, {
    "==" => BinOp::Eq, "!=" => BinOp::Ne,
    "<=@" => BinOp::LeU, ">=@" => BinOp::GeU, "<@" => BinOp::LtU, ">@" => BinOp::GtU,
    "<=" => BinOp::Le, ">=" => BinOp::Ge, "<" => BinOp::Lt, ">" => BinOp::Gt,
});
left_assoc_level!(parse_addsub, parse_bitor, { "+" => BinOp::Add, "-" => BinOp::Sub });
left_assoc_level!(parse_bitor, parse_bitxor, { "|" => BinOp::BitOr });
left_assoc_level!(parse_bitxor, parse_bitand, { "^" => BinOp::BitXor, "!!" => BinOp::OrNot });
left_assoc_level!(parse_bitand, parse_shift, { "&" => BinOp::BitAnd });
left_assoc_level!(parse_shift, parse_muldiv, {
    ">>>" => BinOp::ShrA, "<<" => BinOp::Shl, ">>" => BinOp::ShrL,
});
left_assoc_level!(parse_muldiv, parse_unary, {
    "*" => BinOp::MulS, "//" => BinOp::DivU, "/" => BinOp::DivS,
    "%%" => BinOp::ModU, "%" => BinOp::ModS,
});

fn parse_unary<R: SymbolResolver>(
    tz: &mut Tokenizer<'_>,
    resolver: &mut R,
    snap: bool,
    out: &mut Vec<RpnItem>,
) -> Result<(), ParseError> {
    if let Tok::Op(o) = tz.peek_tok()? {
        let op = match o {
            "+" => Some(UnOp::Plus),
            "-" => Some(UnOp::Neg),
            "~" => Some(UnOp::BitNot),
            "!" => Some(UnOp::LogNot),
            _ => None,
        };
        if let Some(op) = op {
            tz.next_tok()?;
            parse_unary(tz, resolver, snap, out)?;
            out.push(RpnItem::Unary(op));
            return Ok(());
        }
    }
    parse_primary(tz, resolver, snap, out)
}

fn parse_primary<R: SymbolResolver>(
    tz: &mut Tokenizer<'_>,
    resolver: &mut R,
    snap: bool,
    out: &mut Vec<RpnItem>,
) -> Result<(), ParseError> {
    match tz.next_tok()? {
        Tok::Int(v) => {
            out.push(RpnItem::Literal(v));
            Ok(())
        }
        Tok::Dot => {
            let (value, section) = resolver.location_counter();
            out.push(RpnItem::LocationCounterLiteral(value, section));
            Ok(())
        }
        Tok::LocalRef(n, forward) => {
            let id = if forward { resolver.resolve_local_forward(n) } else {
                resolver.resolve_local_backward(n).unwrap_or_else(|| resolver.resolve_local_forward(n))
            };
            push_symbol_leaf(id, resolver, snap, out);
            Ok(())
        }
        Tok::Ident(name) => {
            let id = resolver.get_or_create(&name);
            push_symbol_leaf(id, resolver, snap, out);
            Ok(())
        }
        Tok::LParen => {
            parse_ternary(tz, resolver, snap, out)?;
            if tz.next_tok()? != Tok::RParen {
                return Err(ParseError::UnbalancedParens);
            }
            Ok(())
        }
        Tok::End => Err(ParseError::ExpectedOperand),
        _ => Err(ParseError::ExpectedOperand),
    }
}

fn push_symbol_leaf<R: SymbolResolver>(id: SymbolId, resolver: &mut R, snap: bool, out: &mut Vec<RpnItem>) {
    if snap {
        if let Some((value, section)) = resolver.current_value(id) {
            out.push(RpnItem::LocationCounterLiteral(value, section));
            return;
        }
    }
    out.push(RpnItem::SymbolRef(id));
}

/// The hot-loop fast path (spec.md §4.2): `literal (+/- literal)*` with
/// only unary/binary `+`/`-`. Bails (returns `None`) on anything else so
/// the caller falls back to [`parse_expression`].
#[must_use]
pub fn fast_eval_integer(src: &str) -> Option<i64> {
    let trimmed = src.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut chars = trimmed.char_indices().peekable();
    let mut total: i64 = 0;
    let mut pending_sign: i64 = 1;
    let mut have_operand = false;
    loop {
        while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
            chars.next();
        }
        while let Some((_, c)) = chars.peek().copied() {
            match c {
                '+' => {
                    chars.next();
                }
                '-' => {
                    pending_sign = -pending_sign;
                    chars.next();
                }
                c if c.is_whitespace() => {
                    chars.next();
                }
                _ => break,
            }
        }
        let start = chars.peek()?.0;
        let mut end = start;
        while matches!(chars.peek(), Some((_, c)) if c.is_ascii_digit()) {
            end = chars.peek().unwrap().0 + 1;
            chars.next();
        }
        if end == start {
            return None;
        }
        let digits: i64 = trimmed[start..end].parse().ok()?;
        total += pending_sign * digits;
        have_operand = true;
        pending_sign = 1;
        while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
            chars.next();
        }
        match chars.peek().copied() {
            None => return have_operand.then_some(total),
            Some((_, '+')) | Some((_, '-')) => continue,
            Some(_) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionId;
    use std::collections::HashMap;

    struct TestResolver {
        names: HashMap<String, SymbolId>,
        values: HashMap<SymbolId, (i64, Option<SectionId>)>,
        next: u32,
    }

    impl TestResolver {
        fn new() -> Self {
            Self { names: HashMap::new(), values: HashMap::new(), next: 0 }
        }

        fn set(&mut self, name: &str, value: i64, section: Option<SectionId>) -> SymbolId {
            let id = self.get_or_create(name);
            self.values.insert(id, (value, section));
            id
        }
    }

    impl SymbolResolver for TestResolver {
        fn get_or_create(&mut self, name: &str) -> SymbolId {
            if let Some(id) = self.names.get(name) {
                return *id;
            }
            let id = SymbolId(self.next);
            self.next += 1;
            self.names.insert(name.to_string(), id);
            id
        }

        fn resolve_local_backward(&mut self, _n: u32) -> Option<SymbolId> {
            None
        }

        fn resolve_local_forward(&mut self, n: u32) -> SymbolId {
            self.get_or_create(&format!("{n}f"))
        }

        fn location_counter(&self) -> (i64, Option<SectionId>) {
            (0, Some(SectionId(0)))
        }

        fn current_value(&self, id: SymbolId) -> Option<(i64, Option<SectionId>)> {
            self.values.get(&id).copied()
        }
    }

    #[test]
    fn fast_path_handles_plain_addsub_chains() {
        assert_eq!(fast_eval_integer("1+2-3"), Some(0));
        assert_eq!(fast_eval_integer("10 - 3 + 1"), Some(8));
        assert_eq!(fast_eval_integer("1*2"), None);
        assert_eq!(fast_eval_integer("x+1"), None);
    }

    #[test]
    fn precedence_matches_spec_ordering() {
        // `+ -` binds looser than `&`, which binds looser than `<<`.
        let mut r = TestResolver::new();
        let (expr, _) = parse_expression("1 + 2 & 3 << 1", &mut r, false).unwrap();
        // RPN: 1 2 3 1 << & +   (3<<1 first, then &, then +)
        assert_eq!(expr.to_postfix_string(), "1 2 3 1 << & +");
    }

    #[test]
    fn ternary_is_loosest_and_right_associative() {
        let mut r = TestResolver::new();
        let (expr, _) = parse_expression("1 ? 2 : 3 ? 4 : 5", &mut r, false).unwrap();
        assert_eq!(expr.to_postfix_string(), "1 2 3 4 5 ?: ?:");
    }

    #[test]
    fn eqv_snapshot_freezes_currently_resolved_symbols() {
        let mut r = TestResolver::new();
        r.set("x", 3, None);
        let (expr, consumed) = parse_expression("x+1", &mut r, true).unwrap();
        assert_eq!(consumed, 3);
        assert_eq!(expr.rpn[0], RpnItem::LocationCounterLiteral(3, None));
    }

    #[test]
    fn plain_reference_stays_symbolic_when_unresolved() {
        let mut r = TestResolver::new();
        let (expr, _) = parse_expression("gstart+7*3", &mut r, false).unwrap();
        assert!(matches!(expr.rpn[0], RpnItem::SymbolRef(_)));
    }
}
