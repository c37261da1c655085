//! Symbol table (spec.md §3 "Symbol", §9 design note on ordered maps).
//!
//! Grounded on spec.md §9's explicit instruction to use "an ordered map or
//! a (map + insertion vector) pair" for deterministic iteration order; we
//! use `indexmap::IndexMap`, the pack's standard answer to this (see
//! DESIGN.md).

use indexmap::IndexMap;

use crate::section::SectionId;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SymbolFlags: u32 {
        const DEFINED      = 1 << 0;
        /// Cannot be redefined by plain `=` (spec.md §3).
        const ONCE_DEFINED = 1 << 1;
        /// Snapshot from `.eqv` (spec.md §3).
        const BASE         = 1 << 2;
        const HAS_VALUE    = 1 << 3;
        const SNAPSHOT     = 1 << 4;
        const GLOBAL       = 1 << 5;
        const LOCAL        = 1 << 6;
        const EXTERN       = 1 << 7;
    }
}

/// Dense index into [`SymbolTable`]'s backing arena. Stable across
/// insertion-order iteration because `IndexMap` never moves existing
/// entries on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub value: i64,
    pub section: Option<SectionId>,
    pub size: u64,
    pub flags: SymbolFlags,
    /// Set only when `flags` contains `SNAPSHOT`: the expression that
    /// produced `value` at `.eqv`/`.equiv` time, kept for introspection.
    /// The value itself is already baked into `value`/`section` and is
    /// never re-derived from this.
    pub snapshot_expr: Option<crate::expr::ExprId>,
}

impl Symbol {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: 0,
            section: None,
            size: 0,
            flags: SymbolFlags::empty(),
            snapshot_expr: None,
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.flags.contains(SymbolFlags::HAS_VALUE)
    }

    #[must_use]
    pub fn is_once_defined(&self) -> bool {
        self.flags.contains(SymbolFlags::ONCE_DEFINED)
    }
}

/// Error returned by [`SymbolTable::define`] for the invariants in
/// spec.md §3 ("redefinition by `=`/`.set`/`.equ` is allowed only if the
/// symbol is not `once_defined`"; "re-emitting a label is an error except
/// when ... labels on the same line define the same address").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    RedefinedOnceDefined { name: String },
}

impl std::fmt::Display for SymbolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RedefinedOnceDefined { name } => {
                write!(f, "symbol '{name}' is already defined and cannot be redefined")
            }
        }
    }
}

impl std::error::Error for SymbolError {}

/// Per-numeric local-label counter for the `N:`/`Nf`/`Nb` forms (spec.md
/// §4.3): each time `N:` is defined a new instance is pushed, `Nb`
/// resolves to the most recent instance, `Nf` to the next one defined.
#[derive(Debug, Default)]
struct LocalLabelCounter {
    /// Name of each instance in definition order, e.g. `1`, `1.2`, `1.3`.
    instances: Vec<String>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: IndexMap<String, Symbol>,
    local_counters: std::collections::HashMap<u32, LocalLabelCounter>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn id_of(&self, name: &str) -> Option<SymbolId> {
        self.symbols.get_index_of(name).map(|i| SymbolId(i as u32))
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.id_of(name)
    }

    #[must_use]
    pub fn get(&self, id: SymbolId) -> &Symbol {
        self.symbols.get_index(id.0 as usize).expect("valid SymbolId").1
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        self.symbols.get_index_mut(id.0 as usize).expect("valid SymbolId").1
    }

    /// Create the symbol if absent (unresolved, not `once_defined`), return
    /// its id either way. Used when an expression references a symbol that
    /// has not yet been assigned (forward reference, spec.md §4.4).
    pub fn get_or_create(&mut self, name: &str) -> SymbolId {
        if let Some(id) = self.id_of(name) {
            return id;
        }
        let (index, _) = self.symbols.insert_full(name.to_string(), Symbol::new(name));
        SymbolId(index as u32)
    }

    /// Assign a plain value (`=`, `.set`, `.equ`, or a label). `once` marks
    /// the symbol `ONCE_DEFINED` going forward (labels, `.equiv`).
    pub fn define(
        &mut self,
        name: &str,
        value: i64,
        section: Option<SectionId>,
        once: bool,
    ) -> Result<SymbolId, SymbolError> {
        let id = self.get_or_create(name);
        let already_once = self.get(id).is_once_defined();
        let already_defined = self.get(id).flags.contains(SymbolFlags::DEFINED);
        if already_defined && already_once {
            return Err(SymbolError::RedefinedOnceDefined { name: name.to_string() });
        }
        let sym = self.get_mut(id);
        sym.value = value;
        sym.section = section;
        sym.snapshot_expr = None;
        sym.flags.remove(SymbolFlags::SNAPSHOT);
        sym.flags.insert(SymbolFlags::DEFINED | SymbolFlags::HAS_VALUE);
        if once {
            sym.flags.insert(SymbolFlags::ONCE_DEFINED);
        }
        Ok(id)
    }

    /// Record an `.eqv`/`.equiv` snapshot symbol (spec.md §3, §4.2): the
    /// value frozen at definition time, baked from bindings as they stood
    /// then, never re-evaluated on later changes to the symbols it was
    /// built from (spec.md §8 property 2). `expr` is kept only so a
    /// disassembler or diagnostic can point back at the defining
    /// expression; resolution itself is driven by `value`/`section` like
    /// any other symbol.
    pub fn define_snapshot(
        &mut self,
        name: &str,
        value: i64,
        section: Option<SectionId>,
        expr: crate::expr::ExprId,
        once: bool,
    ) -> Result<SymbolId, SymbolError> {
        let id = self.get_or_create(name);
        let already_once = self.get(id).is_once_defined();
        let already_defined = self.get(id).flags.contains(SymbolFlags::DEFINED);
        if already_defined && already_once {
            return Err(SymbolError::RedefinedOnceDefined { name: name.to_string() });
        }
        let sym = self.get_mut(id);
        sym.value = value;
        sym.section = section;
        sym.snapshot_expr = Some(expr);
        sym.flags.insert(SymbolFlags::DEFINED | SymbolFlags::SNAPSHOT | SymbolFlags::HAS_VALUE);
        if once {
            sym.flags.insert(SymbolFlags::ONCE_DEFINED);
        }
        Ok(id)
    }

    /// Define a local numeric label instance (`N:`) and return the
    /// qualified name used to store it (e.g. `"1.3"` for the third `1:`).
    pub fn define_local(&mut self, n: u32) -> String {
        let counter = self.local_counters.entry(n).or_default();
        let instance = counter.instances.len() + 1;
        let qualified = format!("{n}.{instance}");
        counter.instances.push(qualified.clone());
        qualified
    }

    /// Resolve `Nb` (backward: most recent prior instance of `N:`).
    #[must_use]
    pub fn resolve_local_backward(&self, n: u32) -> Option<&str> {
        self.local_counters.get(&n)?.instances.last().map(String::as_str)
    }

    /// Resolve `Nf` (forward: the instance that will be created next).
    #[must_use]
    pub fn resolve_local_forward(&self, n: u32) -> String {
        let next = self.local_counters.get(&n).map_or(1, |c| c.instances.len() + 1);
        format!("{n}.{next}")
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols.iter().enumerate().map(|(i, (_, sym))| (SymbolId(i as u32), sym))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_defined_label_rejects_redefinition() {
        let mut table = SymbolTable::new();
        table.define("start", 0, None, true).unwrap();
        let err = table.define("start", 4, None, true).unwrap_err();
        assert_eq!(err, SymbolError::RedefinedOnceDefined { name: "start".into() });
    }

    #[test]
    fn plain_symbol_may_be_redefined() {
        let mut table = SymbolTable::new();
        table.define("x", 3, None, false).unwrap();
        table.define("x", 10, None, false).unwrap();
        let id = table.lookup("x").unwrap();
        assert_eq!(table.get(id).value, 10);
    }

    #[test]
    fn snapshot_symbol_is_resolved_and_holds_its_frozen_value() {
        let mut table = SymbolTable::new();
        let expr = crate::expr::ExprId(0);
        table.define_snapshot("y", 4, None, expr, false).unwrap();
        let id = table.lookup("y").unwrap();
        assert!(table.get(id).is_resolved());
        assert_eq!(table.get(id).value, 4);
        assert!(table.get(id).flags.contains(SymbolFlags::SNAPSHOT));
    }

    #[test]
    fn local_labels_resolve_backward_and_forward() {
        let mut table = SymbolTable::new();
        assert_eq!(table.resolve_local_forward(1), "1.1");
        let first = table.define_local(1);
        assert_eq!(first, "1.1");
        assert_eq!(table.resolve_local_backward(1), Some("1.1"));
        assert_eq!(table.resolve_local_forward(1), "1.2");
        let second = table.define_local(1);
        assert_eq!(second, "1.2");
        assert_eq!(table.resolve_local_backward(1), Some("1.2"));
    }
}
