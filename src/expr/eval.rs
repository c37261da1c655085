//! Full RPN evaluator, suspension, and the `ExprArena` described in
//! spec.md §9 ("two arena-allocated tables with integer ids; a symbol
//! holds a list of pending-expression ids, an expression holds its set of
//! unresolved-symbol ids. Resolution is a work list of symbols-just-resolved").

use std::collections::HashMap;
use std::fmt;

use super::{BinOp, Expression, RpnItem, UnOp};
use crate::section::SectionId;
use crate::symbol::{SymbolId, SymbolTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalError {
    DivisionByZero,
    /// Cross-section arithmetic other than subtraction of two values in
    /// the same section (spec.md §3: "cross-section subtraction resolves
    /// to absolute, other cross-section arithmetic fails").
    CrossSectionArithmetic,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DivisionByZero => write!(f, "division or modulo by zero"),
            Self::CrossSectionArithmetic => write!(f, "cross-section arithmetic is not allowed here"),
        }
    }
}

impl std::error::Error for EvalError {}

/// A non-fatal side effect of evaluation that the caller should forward
/// to the [`crate::diag::Sink`] (spec.md §4.2): these never abort
/// evaluation, unlike [`EvalError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalWarning {
    /// Shift count outside `[0, 63]`; result is defined as 0.
    ShiftOutOfRange { amount: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value {
    pub value: i64,
    pub section: Option<SectionId>,
}

impl Value {
    #[must_use]
    pub fn absolute(value: i64) -> Self {
        Self { value, section: None }
    }
}

/// Walk the RPN stream, pushing onto an operand stack and reducing at
/// each operator (spec.md §4.2). Returns `Ok(None)` (suspend) the first
/// time it would need the value of an unresolved symbol.
pub fn try_eval(
    expr: &Expression,
    symbols: &SymbolTable,
    warnings: &mut Vec<EvalWarning>,
) -> Result<Option<Value>, EvalError> {
    let mut stack: Vec<Value> = Vec::with_capacity(expr.rpn.len());
    for item in &expr.rpn {
        match item {
            RpnItem::Literal(v) => stack.push(Value::absolute(*v)),
            RpnItem::LocationCounterLiteral(v, section) => stack.push(Value { value: *v, section: *section }),
            RpnItem::SymbolRef(id) => {
                let sym = symbols.get(*id);
                if !sym.is_resolved() {
                    return Ok(None);
                }
                stack.push(Value { value: sym.value, section: sym.section });
            }
            RpnItem::Unary(op) => {
                let a = stack.pop().expect("well-formed RPN");
                stack.push(eval_unary(*op, a));
            }
            RpnItem::Binary(op) => {
                let b = stack.pop().expect("well-formed RPN");
                let a = stack.pop().expect("well-formed RPN");
                stack.push(eval_binary(*op, a, b, warnings)?);
            }
            RpnItem::Ternary => {
                let else_v = stack.pop().expect("well-formed RPN");
                let then_v = stack.pop().expect("well-formed RPN");
                let cond = stack.pop().expect("well-formed RPN");
                stack.push(if cond.value != 0 { then_v } else { else_v });
            }
        }
    }
    Ok(stack.pop())
}

fn eval_unary(op: UnOp, a: Value) -> Value {
    let v = match op {
        UnOp::Plus => a.value,
        UnOp::Neg => a.value.wrapping_neg(),
        UnOp::BitNot => !a.value,
        UnOp::LogNot => i64::from(a.value == 0),
    };
    Value { value: v, section: if matches!(op, UnOp::Plus) { a.section } else { None } }
}

fn eval_binary(op: BinOp, a: Value, b: Value, warnings: &mut Vec<EvalWarning>) -> Result<Value, EvalError> {
    // Cross-section subtraction resolves to absolute; any other
    // cross-section arithmetic fails (spec.md §3).
    let section = match (a.section, b.section) {
        (None, None) => None,
        (Some(s), None) | (None, Some(s)) => Some(s),
        (Some(sa), Some(sb)) if sa == sb && op == BinOp::Sub => None,
        (Some(sa), Some(sb)) if sa == sb => Some(sa),
        _ if op == BinOp::Sub => None,
        _ => return Err(EvalError::CrossSectionArithmetic),
    };
    let (x, y) = (a.value, b.value);
    let value = match op {
        BinOp::Add => x.wrapping_add(y),
        BinOp::Sub => x.wrapping_sub(y),
        BinOp::MulS => x.wrapping_mul(y),
        BinOp::DivS => x.checked_div(y).ok_or(EvalError::DivisionByZero)?,
        BinOp::DivU => {
            if y == 0 {
                return Err(EvalError::DivisionByZero);
            }
            ((x as u64) / (y as u64)) as i64
        }
        BinOp::ModS => x.checked_rem(y).ok_or(EvalError::DivisionByZero)?,
        BinOp::ModU => {
            if y == 0 {
                return Err(EvalError::DivisionByZero);
            }
            ((x as u64) % (y as u64)) as i64
        }
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        BinOp::BitXor => x ^ y,
        BinOp::OrNot => !(x | y),
        BinOp::Shl => shift(x, y, warnings, |x, s| ((x as u64) << s) as i64),
        BinOp::ShrL => shift(x, y, warnings, |x, s| ((x as u64) >> s) as i64),
        BinOp::ShrA => shift(x, y, warnings, |x, s| x >> s),
        BinOp::LogAnd => i64::from(x != 0 && y != 0),
        BinOp::LogOr => i64::from(x != 0 || y != 0),
        BinOp::Eq => i64::from(x == y),
        BinOp::Ne => i64::from(x != y),
        BinOp::Lt => i64::from(x < y),
        BinOp::Le => i64::from(x <= y),
        BinOp::Gt => i64::from(x > y),
        BinOp::Ge => i64::from(x >= y),
        BinOp::LtU => i64::from((x as u64) < (y as u64)),
        BinOp::LeU => i64::from((x as u64) <= (y as u64)),
        BinOp::GtU => i64::from((x as u64) > (y as u64)),
        BinOp::GeU => i64::from((x as u64) >= (y as u64)),
    };
    Ok(Value { value, section })
}

fn shift(x: i64, amount: i64, warnings: &mut Vec<EvalWarning>, f: impl Fn(i64, u32) -> i64) -> i64 {
    if !(0..=63).contains(&amount) {
        warnings.push(EvalWarning::ShiftOutOfRange { amount });
        return 0;
    }
    f(x, amount as u32)
}

/// Dense id into [`ExprArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

struct Slot {
    expr: Expression,
    result: Option<Value>,
}

/// Owns every expression created during one assemble call and the
/// dependency DAG between unresolved symbols and the expressions that
/// reference them (spec.md §5: "dependency lists form a DAG; cycles ...
/// leave expressions unresolved at end of input and surface as errors").
#[derive(Default)]
pub struct ExprArena {
    slots: Vec<Slot>,
    dependents: HashMap<SymbolId, Vec<ExprId>>,
}

impl ExprArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly-parsed expression and immediately attempt
    /// evaluation; if it suspends, registers it against every symbol it
    /// references so a later [`ExprArena::notify_resolved`] can retry.
    pub fn insert(
        &mut self,
        expr: Expression,
        symbols: &SymbolTable,
        warnings: &mut Vec<EvalWarning>,
    ) -> Result<(ExprId, Option<Value>), EvalError> {
        let id = ExprId(self.slots.len() as u32);
        let result = try_eval(&expr, symbols, warnings)?;
        if result.is_none() {
            for item in &expr.rpn {
                if let RpnItem::SymbolRef(sym) = item {
                    if !symbols.get(*sym).is_resolved() {
                        self.dependents.entry(*sym).or_default().push(id);
                    }
                }
            }
        }
        self.slots.push(Slot { expr, result });
        Ok((id, result))
    }

    #[must_use]
    pub fn result(&self, id: ExprId) -> Option<Value> {
        self.slots[id.0 as usize].result
    }

    #[must_use]
    pub fn expr(&self, id: ExprId) -> &Expression {
        &self.slots[id.0 as usize].expr
    }

    /// A symbol has just become resolved: retry every expression waiting
    /// on it. Returns the ids that newly resolved this round, so the
    /// caller (the assembler driver) can propagate further (e.g. a
    /// newly-resolved symbol whose value came from one of these).
    pub fn notify_resolved(
        &mut self,
        symbol: SymbolId,
        symbols: &SymbolTable,
        warnings: &mut Vec<EvalWarning>,
    ) -> Result<Vec<ExprId>, EvalError> {
        let Some(waiting) = self.dependents.remove(&symbol) else {
            return Ok(Vec::new());
        };
        let mut newly_resolved = Vec::new();
        for id in waiting {
            if self.slots[id.0 as usize].result.is_some() {
                continue;
            }
            if let Some(value) = try_eval(&self.slots[id.0 as usize].expr, symbols, warnings)? {
                self.slots[id.0 as usize].result = Some(value);
                newly_resolved.push(id);
            }
        }
        Ok(newly_resolved)
    }

    /// Ids of expressions still unresolved once the input is exhausted
    /// (spec.md §4.4: "the driver walks all sections and resolves any
    /// remaining suspended expressions"; whatever's left after that is
    /// reported one error per expression).
    pub fn unresolved_ids(&self) -> impl Iterator<Item = ExprId> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| (s.result.is_none()).then_some(ExprId(i as u32)))
    }

    /// One representative unresolved symbol name for an error message
    /// (spec.md §4.4: "naming one representative unresolved symbol").
    #[must_use]
    pub fn representative_unresolved_symbol(&self, id: ExprId, symbols: &SymbolTable) -> Option<String> {
        self.slots[id.0 as usize].expr.rpn.iter().find_map(|item| match item {
            RpnItem::SymbolRef(sym) if !symbols.get(*sym).is_resolved() => Some(symbols.get(*sym).name.clone()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{parse_expression, SymbolResolver};
    use crate::section::SectionId;
    use crate::symbol::SymbolTable;

    struct DriverResolver<'a> {
        symbols: &'a mut SymbolTable,
    }

    impl<'a> SymbolResolver for DriverResolver<'a> {
        fn get_or_create(&mut self, name: &str) -> SymbolId {
            self.symbols.get_or_create(name)
        }
        fn resolve_local_backward(&mut self, _n: u32) -> Option<SymbolId> {
            None
        }
        fn resolve_local_forward(&mut self, _n: u32) -> SymbolId {
            unimplemented!()
        }
        fn location_counter(&self) -> (i64, Option<SectionId>) {
            (0, None)
        }
        fn current_value(&self, id: SymbolId) -> Option<(i64, Option<SectionId>)> {
            let sym = self.symbols.get(id);
            sym.is_resolved().then_some((sym.value, sym.section))
        }
    }

    #[test]
    fn unresolved_cycle_leaves_both_symbols_undefined() {
        let mut symbols = SymbolTable::new();
        let mut arena = ExprArena::new();
        let mut warnings = Vec::new();

        let a = symbols.get_or_create("a");
        let b = symbols.get_or_create("b");
        let (expr_a, _) = {
            let mut r = DriverResolver { symbols: &mut symbols };
            parse_expression("b+1", &mut r, false).unwrap()
        };
        let (expr_b, _) = {
            let mut r = DriverResolver { symbols: &mut symbols };
            parse_expression("a+1", &mut r, false).unwrap()
        };
        let (id_a, res_a) = arena.insert(expr_a, &symbols, &mut warnings).unwrap();
        let (id_b, res_b) = arena.insert(expr_b, &symbols, &mut warnings).unwrap();
        assert!(res_a.is_none());
        assert!(res_b.is_none());

        let unresolved: Vec<_> = arena.unresolved_ids().collect();
        assert_eq!(unresolved.len(), 2);
        assert!(!symbols.get(a).is_resolved());
        assert!(!symbols.get(b).is_resolved());
        let _ = (id_a, id_b);
    }

    #[test]
    fn forward_reference_resolves_once_symbol_becomes_defined() {
        let mut symbols = SymbolTable::new();
        let mut arena = ExprArena::new();
        let mut warnings = Vec::new();

        let (expr, _) = {
            let mut r = DriverResolver { symbols: &mut symbols };
            parse_expression("start+6", &mut r, false).unwrap()
        };
        let (id, initial) = arena.insert(expr, &symbols, &mut warnings).unwrap();
        assert!(initial.is_none());

        let start = symbols.define("start", 12, None, true).unwrap();
        let resolved = arena.notify_resolved(start, &symbols, &mut warnings).unwrap();
        assert_eq!(resolved, vec![id]);
        assert_eq!(arena.result(id), Some(Value::absolute(18)));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let symbols = SymbolTable::new();
        let mut warnings = Vec::new();
        let expr = Expression { rpn: vec![RpnItem::Literal(1), RpnItem::Literal(0), RpnItem::Binary(BinOp::DivS)] };
        let err = try_eval(&expr, &symbols, &mut warnings).unwrap_err();
        assert_eq!(err, EvalError::DivisionByZero);
    }

    #[test]
    fn shift_out_of_range_warns_and_yields_zero() {
        let symbols = SymbolTable::new();
        let mut warnings = Vec::new();
        let expr = Expression { rpn: vec![RpnItem::Literal(1), RpnItem::Literal(64), RpnItem::Binary(BinOp::Shl)] };
        let value = try_eval(&expr, &symbols, &mut warnings).unwrap().unwrap();
        assert_eq!(value.value, 0);
        assert_eq!(warnings, vec![EvalWarning::ShiftOutOfRange { amount: 64 }]);
    }
}
