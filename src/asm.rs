//! Assembler driver (spec.md §4.4, component C4).
//!
//! Grounded on the teacher's dispatch-by-id block/record walking loop
//! (`BitStreamReader::visit_block` in `src/read.rs`): the loop here
//! dispatches lines by pseudo-op name through a static match table instead
//! of by numeric block/record id, and by the three-way label/pseudo-op/
//! instruction split spec.md §4.4 names.

use std::collections::HashMap;
use std::fmt;

use crate::config::AsmConfig;
use crate::diag::Sink;
use crate::expr::eval::{try_eval, EvalWarning, ExprArena, ExprId};
use crate::expr::{parse_expression, fast_eval_integer, BinOp, Expression, RpnItem, SymbolResolver};
use crate::format::{FormatError, FormatHandler, SectionRole};
use crate::gpu::GpuArchitecture;
use crate::isa::{EncodeSink, IsaEncoder, PendingRelocation, SymbolLookup};
use crate::lexer::{ConditionEvaluator, FileSource, InputStream, LexError};
use crate::pos::PositionChain;
use crate::section::{CodeFlowEntry, CodeFlowKind, Relocation, RelocationKind, SectionStorage, SectionId, SectionTable};
use crate::symbol::{SymbolFlags, SymbolId, SymbolTable};

#[derive(Debug)]
pub enum AsmError {
    Lex(LexError),
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lex(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for AsmError {}

impl From<LexError> for AsmError {
    fn from(e: LexError) -> Self {
        Self::Lex(e)
    }
}

/// Answers the three questions [`SymbolResolver`] needs, backed by the
/// driver's own [`SymbolTable`] (spec.md §4.2, §4.3).
struct DriverResolver<'a> {
    symbols: &'a mut SymbolTable,
    loc: (i64, Option<SectionId>),
}

impl<'a> SymbolResolver for DriverResolver<'a> {
    fn get_or_create(&mut self, name: &str) -> SymbolId {
        self.symbols.get_or_create(name)
    }

    fn resolve_local_backward(&mut self, n: u32) -> Option<SymbolId> {
        let name = self.symbols.resolve_local_backward(n)?.to_string();
        Some(self.symbols.get_or_create(&name))
    }

    fn resolve_local_forward(&mut self, n: u32) -> SymbolId {
        let name = self.symbols.resolve_local_forward(n);
        self.symbols.get_or_create(&name)
    }

    fn location_counter(&self) -> (i64, Option<SectionId>) {
        self.loc
    }

    fn current_value(&self, id: SymbolId) -> Option<(i64, Option<SectionId>)> {
        let sym = self.symbols.get(id);
        sym.is_resolved().then_some((sym.value, sym.section))
    }
}

/// Drives `.if`/`.ifdef`/... evaluation for C1 off the same symbol table
/// and location counter the driver itself uses.
struct CondEvalAdapter<'a> {
    symbols: &'a mut SymbolTable,
    loc: (i64, Option<SectionId>),
}

impl<'a> ConditionEvaluator for CondEvalAdapter<'a> {
    fn eval_truthy(&mut self, expr_src: &str) -> bool {
        if let Some(v) = fast_eval_integer(expr_src) {
            return v != 0;
        }
        let mut resolver = DriverResolver { symbols: self.symbols, loc: self.loc };
        let Ok((expr, _)) = parse_expression(expr_src, &mut resolver, false) else { return false };
        let mut warnings = Vec::new();
        matches!(try_eval(&expr, self.symbols, &mut warnings), Ok(Some(v)) if v.value != 0)
    }

    fn is_defined(&mut self, name: &str) -> bool {
        self.symbols.lookup(name).is_some_and(|id| self.symbols.get(id).flags.contains(SymbolFlags::DEFINED))
    }
}

struct DriverEncodeSink<'a> {
    sections: &'a mut SectionTable,
    section: SectionId,
}

impl<'a> EncodeSink for DriverEncodeSink<'a> {
    fn emit_bytes(&mut self, bytes: &[u8]) {
        let _ = self.sections.get_mut(self.section).emit_bytes(bytes);
    }

    fn add_relocation(&mut self, reloc: PendingRelocation) {
        self.sections.get_mut(self.section).relocations.push(Relocation {
            offset: reloc.offset,
            kind: reloc.kind,
            symbol: reloc.symbol,
            addend: reloc.addend,
        });
    }

    fn current_section(&self) -> SectionId {
        self.section
    }

    fn current_offset(&self) -> u64 {
        self.sections.get(self.section).cursor()
    }
}

struct DriverSymbolLookup<'a> {
    symbols: &'a mut SymbolTable,
}

impl<'a> SymbolLookup for DriverSymbolLookup<'a> {
    fn lookup(&mut self, name: &str) -> Option<SymbolId> {
        self.symbols.lookup(name)
    }
}

/// A data slot (`.byte`/`.int`/... operand) already reserved in a
/// section's content but whose value is still waiting on a forward
/// reference (spec.md §4.4 two-pass behavior).
struct PendingFixup {
    section: SectionId,
    offset: u64,
    width: u8,
    pos: PositionChain,
}

/// A `=`/`.set`/`.equ`/`.eqv`/`.equiv` assignment whose right-hand side
/// referenced a symbol not yet defined.
struct PendingAssign {
    name: String,
    expr: ExprId,
    pos: PositionChain,
    /// `.eqv`/`.equiv`: define as a snapshot symbol once resolved, and
    /// apply `once` (the redefinition-rejection flag) rather than always
    /// `false`.
    snapshot: Option<bool>,
}

enum FloatWidth {
    Half,
    Single,
    Double,
}

/// Drives one translation unit end to end: reads logical lines from C1,
/// dispatches label/pseudo-op/instruction lines (spec.md §4.4), and hands
/// off container assembly to the active [`FormatHandler`] (C5).
pub struct Assembler {
    config: AsmConfig,
    handler: Box<dyn FormatHandler>,
    symbols: SymbolTable,
    sections: SectionTable,
    arena: ExprArena,
    diagnostics: Sink,
    current_section: Option<SectionId>,
    current_kernel: Option<String>,
    pending_fixups: HashMap<ExprId, PendingFixup>,
    pending_assigns: Vec<PendingAssign>,
    arch_minor: u32,
    arch_stepping: u32,
}

impl Assembler {
    #[must_use]
    pub fn new(config: AsmConfig, handler: Box<dyn FormatHandler>) -> Self {
        let mut symbols = SymbolTable::new();
        for (name, value) in &config.predefined_symbols {
            let _ = symbols.define(name, *value, None, false);
        }
        Self {
            config,
            handler,
            symbols,
            sections: SectionTable::new(),
            arena: ExprArena::new(),
            diagnostics: Sink::new(),
            current_section: None,
            current_kernel: None,
            pending_fixups: HashMap::new(),
            pending_assigns: Vec::new(),
            arch_minor: 0,
            arch_stepping: 0,
        }
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Sink {
        &self.diagnostics
    }

    #[must_use]
    pub fn sections(&self) -> &SectionTable {
        &self.sections
    }

    #[must_use]
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    #[must_use]
    pub fn config(&self) -> &AsmConfig {
        &self.config
    }

    pub fn finalize(&mut self) -> Result<Vec<u8>, FormatError> {
        self.handler.finalize(&self.sections, &self.symbols, &self.config)
    }

    /// Assemble `root_text` (and whatever it `.include`s) to completion.
    /// Returns `Ok(true)` if no error-severity diagnostic was ever raised
    /// (spec.md §7 `good`); `Err` only for the fatal lexer conditions
    /// (unterminated macro/`.rept`, recursion limit, missing include).
    pub fn assemble(
        &mut self,
        root_name: &str,
        root_text: &str,
        files: &mut dyn FileSource,
        mut encoder: Option<&mut dyn IsaEncoder>,
    ) -> Result<bool, AsmError> {
        let mut stream = InputStream::new(root_name, root_text, self.config.include_paths.clone());
        loop {
            let loc = self.location_counter();
            let mut cond = CondEvalAdapter { symbols: &mut self.symbols, loc };
            let next = stream.read_line(files, &mut cond)?;
            let Some((raw, pos)) = next else { break };
            self.process_line(&raw, pos, encoder.as_deref_mut());
        }
        self.finish_pending();
        Ok(self.diagnostics.good())
    }

    fn location_counter(&self) -> (i64, Option<SectionId>) {
        match self.current_section {
            Some(id) => (self.sections.get(id).cursor() as i64, Some(id)),
            None => (0, None),
        }
    }

    fn process_line(&mut self, raw: &str, pos: PositionChain, encoder: Option<&mut dyn IsaEncoder>) {
        let line = strip_comment(raw);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        let (labels, rest) = split_leading_labels(trimmed);
        for label in &labels {
            self.define_label(label, &pos);
        }
        let rest = rest.trim();
        if rest.is_empty() {
            return;
        }
        if let Some(name) = rest.strip_prefix('.').map(|_| ()).and(Some(())) {
            let _ = name;
        }
        if rest.starts_with('.') {
            self.dispatch_pseudo_op(rest, &pos);
            return;
        }
        if let Some(eq) = find_top_level_assign(rest) {
            let name = rest[..eq].trim();
            if is_label_token(name) {
                let expr_src = rest[eq + 1..].trim();
                self.assign_symbol(name, expr_src, &pos);
                return;
            }
        }
        self.dispatch_instruction(rest, &pos, encoder);
    }

    fn define_label(&mut self, name: &str, pos: &PositionChain) {
        let loc = self.location_counter();
        let qualified = if name.chars().all(|c| c.is_ascii_digit()) {
            self.symbols.define_local(name.parse().unwrap_or(0))
        } else {
            name.to_string()
        };
        match self.symbols.define(&qualified, loc.0, loc.1, true) {
            Ok(id) => self.notify_resolved(id, pos),
            Err(e) => self.diagnostics.error(pos.clone(), e.to_string()),
        }
    }

    fn notify_resolved(&mut self, symbol: SymbolId, pos: &PositionChain) {
        let mut warnings = Vec::new();
        let resolved = match self.arena.notify_resolved(symbol, &self.symbols, &mut warnings) {
            Ok(ids) => ids,
            Err(e) => {
                self.diagnostics.error(pos.clone(), e.to_string());
                return;
            }
        };
        for w in warnings {
            self.diagnostics.warn(pos.clone(), format_eval_warning(&w));
        }
        for id in resolved {
            self.apply_resolved(id);
        }
    }

    fn apply_resolved(&mut self, id: ExprId) {
        if let Some(fixup) = self.pending_fixups.remove(&id) {
            let value = self.arena.result(id).expect("just resolved").value;
            self.write_value_at(fixup.section, fixup.offset, fixup.width, value, &fixup.pos);
        }
        if let Some(idx) = self.pending_assigns.iter().position(|a| a.expr == id) {
            let assign = self.pending_assigns.remove(idx);
            let value = self.arena.result(id).expect("just resolved");
            let result = match assign.snapshot {
                Some(once) => self.symbols.define_snapshot(&assign.name, value.value, value.section, id, once),
                None => self.symbols.define(&assign.name, value.value, value.section, false),
            };
            match result {
                Ok(new_id) => self.notify_resolved(new_id, &assign.pos),
                Err(e) => self.diagnostics.error(assign.pos.clone(), e.to_string()),
            }
        }
    }

    fn emit(&mut self, section: SectionId, bytes: &[u8], pos: &PositionChain) {
        if let Err(e) = self.sections.get_mut(section).emit_bytes(bytes) {
            self.diagnostics.error(pos.clone(), e.to_string());
        }
    }

    fn write_value_at(&mut self, section: SectionId, offset: u64, width: u8, value: i64, pos: &PositionChain) {
        if !fits_width(value, width) {
            self.diagnostics.warn(pos.clone(), format!("value {value} truncated to {width} byte(s)"));
        }
        let mut bytes = vec![0u8; width as usize];
        let low = value.to_le_bytes();
        let n = (width as usize).min(8);
        bytes[..n].copy_from_slice(&low[..n]);
        if width as usize > 8 {
            let fill = if value < 0 { 0xffu8 } else { 0u8 };
            for b in &mut bytes[8..] {
                *b = fill;
            }
        }
        let sec = self.sections.get_mut(section);
        let start = offset as usize;
        let end = start + width as usize;
        if end > sec.content.len() {
            sec.content.resize(end, 0);
        }
        sec.content[start..end].copy_from_slice(&bytes);
    }

    /// Evaluate `src` to a concrete `i64` right now; reports and returns
    /// `None` if it cannot be (forward references are not permitted for
    /// directive arguments other than data-emitting operand slots, which
    /// go through [`Assembler::reserve_and_maybe_resolve`] instead).
    fn eval_now(&mut self, src: &str, pos: &PositionChain) -> Option<i64> {
        let src = src.trim();
        if src.is_empty() {
            return None;
        }
        if let Some(v) = fast_eval_integer(src) {
            return Some(v);
        }
        let loc = self.location_counter();
        let mut resolver = DriverResolver { symbols: &mut self.symbols, loc };
        let (expr, _) = match parse_expression(src, &mut resolver, false) {
            Ok(r) => r,
            Err(e) => {
                self.diagnostics.error(pos.clone(), e.to_string());
                return None;
            }
        };
        let mut warnings = Vec::new();
        match try_eval(&expr, &self.symbols, &mut warnings) {
            Ok(Some(v)) => {
                for w in warnings {
                    self.diagnostics.warn(pos.clone(), format_eval_warning(&w));
                }
                Some(v.value)
            }
            Ok(None) => {
                self.diagnostics.error(pos.clone(), format!("expression '{src}' must be resolvable here"));
                None
            }
            Err(e) => {
                self.diagnostics.error(pos.clone(), e.to_string());
                None
            }
        }
    }

    fn reserve_and_maybe_resolve(&mut self, width: u8, src: &str, pos: &PositionChain) {
        let Some(section) = self.current_section else {
            self.diagnostics.error(pos.clone(), "directive requires an active section".to_string());
            return;
        };
        let offset = self.sections.get(section).cursor();
        self.emit(section, &vec![0u8; width as usize], pos);

        let loc = self.location_counter();
        let mut resolver = DriverResolver { symbols: &mut self.symbols, loc };
        let expr: Expression = match parse_expression(src, &mut resolver, false) {
            Ok((e, _)) => e,
            Err(e) => {
                self.diagnostics.error(pos.clone(), e.to_string());
                return;
            }
        };
        let mut warnings = Vec::new();
        match self.arena.insert(expr, &self.symbols, &mut warnings) {
            Ok((_, Some(value))) => {
                for w in warnings {
                    self.diagnostics.warn(pos.clone(), format_eval_warning(&w));
                }
                self.write_value_at(section, offset, width, value.value, pos);
            }
            Ok((id, None)) => {
                self.pending_fixups.insert(id, PendingFixup { section, offset, width, pos: pos.clone() });
            }
            Err(e) => self.diagnostics.error(pos.clone(), e.to_string()),
        }
    }

    fn assign_symbol(&mut self, name: &str, expr_src: &str, pos: &PositionChain) {
        if name.is_empty() {
            self.diagnostics.error(pos.clone(), "missing symbol name in assignment".to_string());
            return;
        }
        let loc = self.location_counter();
        let mut resolver = DriverResolver { symbols: &mut self.symbols, loc };
        let expr = match parse_expression(expr_src, &mut resolver, false) {
            Ok((e, _)) => e,
            Err(e) => {
                self.diagnostics.error(pos.clone(), e.to_string());
                return;
            }
        };
        let mut warnings = Vec::new();
        let (id, result) = match self.arena.insert(expr, &self.symbols, &mut warnings) {
            Ok(r) => r,
            Err(e) => {
                self.diagnostics.error(pos.clone(), e.to_string());
                return;
            }
        };
        for w in warnings {
            self.diagnostics.warn(pos.clone(), format_eval_warning(&w));
        }
        match result {
            Some(value) => match self.symbols.define(name, value.value, value.section, false) {
                Ok(sym_id) => self.notify_resolved(sym_id, pos),
                Err(e) => self.diagnostics.error(pos.clone(), e.to_string()),
            },
            None => self.pending_assigns.push(PendingAssign {
                name: name.to_string(),
                expr: id,
                pos: pos.clone(),
                snapshot: None,
            }),
        }
    }

    fn dispatch_pseudo_op(&mut self, rest: &str, pos: &PositionChain) {
        let (name, args) = split_directive(rest);
        let lower = name.to_ascii_lowercase();
        if self.handle_format_pseudo_op(&lower, args, pos) {
            return;
        }
        self.handle_generic_pseudo_op(&lower, args, pos);
    }

    fn handle_format_pseudo_op(&mut self, name: &str, args: &str, pos: &PositionChain) -> bool {
        match self.handler.handle_pseudo_op(name, args, &self.config, &mut self.sections, &self.symbols, &mut self.diagnostics) {
            Ok(handled) => handled,
            Err(e) => {
                self.diagnostics.error(pos.clone(), e.to_string());
                true
            }
        }
    }

    fn handle_generic_pseudo_op(&mut self, name: &str, args: &str, pos: &PositionChain) {
        match name {
            ".byte" => self.emit_int_list(1, args, pos),
            ".short" | ".hword" => self.emit_int_list(2, args, pos),
            ".int" | ".word" | ".long" => self.emit_int_list(4, args, pos),
            ".quad" => self.emit_int_list(8, args, pos),
            ".octa" => self.emit_int_list(16, args, pos),
            ".half" => self.emit_float_list(FloatWidth::Half, args, pos),
            ".float" => self.emit_float_list(FloatWidth::Single, args, pos),
            ".double" => self.emit_float_list(FloatWidth::Double, args, pos),
            ".ascii" => self.emit_string_list(1, args, false, pos),
            ".asciz" | ".string" => self.emit_string_list(1, args, true, pos),
            ".string16" => self.emit_string_list(2, args, true, pos),
            ".string32" => self.emit_string_list(4, args, true, pos),
            ".string64" => self.emit_string_list(8, args, true, pos),
            ".fill" => self.do_fill(args, pos, false),
            ".fillq" => self.do_fill(args, pos, true),
            ".align" | ".balign" => self.do_align(args, pos, false),
            ".p2align" => self.do_align(args, pos, true),
            ".skip" | ".space" => self.do_skip(args, pos),
            ".org" => self.do_org(args, pos),
            ".set" | ".equ" => self.do_set(args, pos),
            ".eqv" => self.do_eqv(args, false, pos),
            ".equiv" => self.do_eqv(args, true, pos),
            ".section" => self.do_section(args, pos),
            ".text" => self.switch_role(SectionRole::Text, pos),
            ".data" => self.switch_role(SectionRole::Data, pos),
            ".rodata" => self.switch_role(SectionRole::Rodata, pos),
            ".bss" => self.switch_role(SectionRole::Bss, pos),
            ".globaldata" => self.do_globaldata(pos),
            ".kernel" => self.do_kernel(args, pos),
            ".global" => self.set_linkage(args, SymbolFlags::GLOBAL),
            ".local" => self.set_linkage(args, SymbolFlags::LOCAL),
            ".extern" => self.set_linkage(args, SymbolFlags::EXTERN),
            ".gpu" => self.do_gpu(args, pos),
            ".arch_minor" => self.arch_minor = args.trim().parse().unwrap_or(0),
            ".arch_stepping" => self.arch_stepping = args.trim().parse().unwrap_or(0),
            ".driver_version" => self.do_driver_version(args, pos),
            ".llvm_version" => self.config.llvm_version = args.trim().parse().unwrap_or(0),
            ".cf_jump" => self.do_code_flow(CodeFlowKind::Jump, args, pos),
            ".cf_cjump" => self.do_code_flow(CodeFlowKind::CJump, args, pos),
            ".cf_call" => self.do_code_flow(CodeFlowKind::Call, args, pos),
            ".cf_ret" => self.do_code_flow_no_target(CodeFlowKind::Return, pos),
            ".cf_start" => self.do_code_flow_no_target(CodeFlowKind::Start, pos),
            ".cf_end" => self.do_code_flow_no_target(CodeFlowKind::End, pos),
            _ => self.diagnostics.error(pos.clone(), format!("unknown pseudo-op '{name}'")),
        }
    }

    fn emit_int_list(&mut self, width: u8, args: &str, pos: &PositionChain) {
        for raw in args.split(',') {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                if let Some(section) = self.current_section {
                    self.emit(section, &vec![0u8; width as usize], pos);
                    self.diagnostics.warn(pos.clone(), "empty operand defaults to zero".to_string());
                } else {
                    self.diagnostics.error(pos.clone(), "directive requires an active section".to_string());
                }
                continue;
            }
            self.reserve_and_maybe_resolve(width, trimmed, pos);
        }
    }

    fn emit_float_list(&mut self, width: FloatWidth, args: &str, pos: &PositionChain) {
        let Some(section) = self.current_section else {
            self.diagnostics.error(pos.clone(), "directive requires an active section".to_string());
            return;
        };
        for raw in args.split(',') {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(v) = trimmed.parse::<f64>() else {
                self.diagnostics.error(pos.clone(), format!("invalid floating-point literal '{trimmed}'"));
                continue;
            };
            let bytes: Vec<u8> = match width {
                FloatWidth::Half => f32_to_f16_bits(v as f32).to_le_bytes().to_vec(),
                FloatWidth::Single => (v as f32).to_le_bytes().to_vec(),
                FloatWidth::Double => v.to_le_bytes().to_vec(),
            };
            self.emit(section, &bytes, pos);
        }
    }

    fn emit_string_list(&mut self, unit: u8, args: &str, terminate: bool, pos: &PositionChain) {
        let Some(section) = self.current_section else {
            self.diagnostics.error(pos.clone(), "directive requires an active section".to_string());
            return;
        };
        for raw in split_quoted_list(args) {
            if raw.is_empty() {
                continue;
            }
            let Some(text) = unquote_c_string(raw) else {
                self.diagnostics.error(pos.clone(), format!("malformed string literal '{raw}'"));
                continue;
            };
            for ch in text.chars() {
                let code = ch as u32;
                let bytes: Vec<u8> = match unit {
                    1 => vec![code as u8],
                    2 => (code as u16).to_le_bytes().to_vec(),
                    4 => code.to_le_bytes().to_vec(),
                    _ => (code as u64).to_le_bytes().to_vec(),
                };
                self.emit(section, &bytes, pos);
            }
            if terminate {
                self.emit(section, &vec![0u8; unit as usize], pos);
            }
        }
    }

    fn do_fill(&mut self, args: &str, pos: &PositionChain, is_fillq: bool) {
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        let Some(count) = self.eval_now(parts.first().copied().unwrap_or(""), pos) else { return };
        if count < 0 {
            self.diagnostics.error(pos.clone(), "fill count cannot be negative".to_string());
            return;
        }
        let (size, value) = if is_fillq {
            // `.fillq count, size, value` keeps the same 3-argument shape as
            // `.fill` (the middle `size` field is accepted but ignored: the
            // emitted width is always the full 8 bytes).
            (8u8, parts.get(2).and_then(|s| self.eval_now(s, pos)).unwrap_or(0))
        } else {
            let size = parts.get(1).and_then(|s| self.eval_now(s, pos)).unwrap_or(1).clamp(1, 8) as u8;
            let value = parts.get(2).and_then(|s| self.eval_now(s, pos)).unwrap_or(0);
            (size, value)
        };
        let Some(section) = self.current_section else {
            self.diagnostics.error(pos.clone(), "directive requires an active section".to_string());
            return;
        };
        let bytes = value.to_le_bytes();
        for _ in 0..count {
            self.emit(section, &bytes[..size as usize], pos);
        }
    }

    fn do_align(&mut self, args: &str, pos: &PositionChain, is_p2: bool) {
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        let Some(raw_align) = self.eval_now(parts.first().copied().unwrap_or(""), pos) else { return };
        let align: u64 = if is_p2 { 1u64.checked_shl(raw_align.max(0) as u32).unwrap_or(1) } else { raw_align.max(1) as u64 };
        let fill = parts.get(1).and_then(|s| self.eval_now(s, pos)).unwrap_or(0) as u8;
        let max = parts.get(2).and_then(|s| self.eval_now(s, pos));
        let Some(section) = self.current_section else {
            self.diagnostics.error(pos.clone(), "directive requires an active section".to_string());
            return;
        };
        if align <= 1 {
            return;
        }
        let cursor = self.sections.get(section).cursor();
        let remainder = cursor % align;
        let pad = if remainder == 0 { 0 } else { align - remainder };
        if let Some(max) = max {
            if pad > max.max(0) as u64 {
                return;
            }
        }
        self.emit(section, &vec![fill; pad as usize], pos);
    }

    fn do_skip(&mut self, args: &str, pos: &PositionChain) {
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        let Some(count) = self.eval_now(parts.first().copied().unwrap_or(""), pos) else { return };
        if count < 0 {
            self.diagnostics.error(pos.clone(), "skip/space count cannot be negative".to_string());
            return;
        }
        let fill = parts.get(1).and_then(|s| self.eval_now(s, pos)).unwrap_or(0) as u8;
        let Some(section) = self.current_section else {
            self.diagnostics.error(pos.clone(), "directive requires an active section".to_string());
            return;
        };
        self.emit(section, &vec![fill; count as usize], pos);
    }

    fn do_org(&mut self, args: &str, pos: &PositionChain) {
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        let Some(target) = self.eval_now(parts.first().copied().unwrap_or(""), pos) else { return };
        if target < 0 {
            self.diagnostics.error(pos.clone(), "'.org' target cannot be negative".to_string());
            return;
        }
        let fill = parts.get(1).and_then(|s| self.eval_now(s, pos)).unwrap_or(0) as u8;
        let Some(section) = self.current_section else {
            self.diagnostics.error(pos.clone(), "directive requires an active section".to_string());
            return;
        };
        let cursor = self.sections.get(section).cursor();
        let target = target as u64;
        if target >= cursor {
            let pad = target - cursor;
            self.emit(section, &vec![fill; pad as usize], pos);
        } else {
            self.sections.get_mut(section).set_cursor(target);
        }
    }

    fn do_set(&mut self, args: &str, pos: &PositionChain) {
        let Some((name, expr_src)) = args.split_once(',') else {
            self.diagnostics.error(pos.clone(), "expected 'name, expr'".to_string());
            return;
        };
        self.assign_symbol(name.trim(), expr_src.trim(), pos);
    }

    fn do_eqv(&mut self, args: &str, once: bool, pos: &PositionChain) {
        let Some((name, expr_src)) = args.split_once(',') else {
            self.diagnostics.error(pos.clone(), "expected 'name, expr'".to_string());
            return;
        };
        let name = name.trim();
        let loc = self.location_counter();
        let mut resolver = DriverResolver { symbols: &mut self.symbols, loc };
        let expr = match parse_expression(expr_src.trim(), &mut resolver, true) {
            Ok((e, _)) => e,
            Err(e) => {
                self.diagnostics.error(pos.clone(), e.to_string());
                return;
            }
        };
        let mut warnings = Vec::new();
        let (id, result) = match self.arena.insert(expr, &self.symbols, &mut warnings) {
            Ok(r) => r,
            Err(e) => {
                self.diagnostics.error(pos.clone(), e.to_string());
                return;
            }
        };
        for w in warnings {
            self.diagnostics.warn(pos.clone(), format_eval_warning(&w));
        }
        match result {
            Some(value) => match self.symbols.define_snapshot(name, value.value, value.section, id, once) {
                Ok(sym_id) => self.notify_resolved(sym_id, pos),
                Err(e) => self.diagnostics.error(pos.clone(), e.to_string()),
            },
            None => self.pending_assigns.push(PendingAssign {
                name: name.to_string(),
                expr: id,
                pos: pos.clone(),
                snapshot: Some(once),
            }),
        }
    }

    fn switch_role(&mut self, role: SectionRole, pos: &PositionChain) {
        let kernel = self.current_kernel.clone();
        match self.handler.select_section(role, kernel.as_deref(), &mut self.sections) {
            Ok(id) => self.current_section = Some(id),
            Err(e) => self.diagnostics.error(pos.clone(), e.to_string()),
        }
    }

    fn do_section(&mut self, args: &str, pos: &PositionChain) {
        let name = args.trim().trim_matches('"');
        if name.is_empty() {
            self.diagnostics.error(pos.clone(), "'.section' requires a name".to_string());
            return;
        }
        self.switch_role(SectionRole::Extra { name: name.to_string(), elf_type: 0, flags: 0 }, pos);
    }

    /// Absolute (content-less) global-data section, legal only in AMD
    /// legacy binaries (spec.md §3).
    fn do_globaldata(&mut self, pos: &PositionChain) {
        self.switch_role(SectionRole::Rodata, pos);
        if let Some(id) = self.current_section {
            self.sections.get_mut(id).storage = SectionStorage::Absolute;
        }
    }

    fn do_kernel(&mut self, args: &str, pos: &PositionChain) {
        let name = args.trim();
        if name.is_empty() {
            self.diagnostics.error(pos.clone(), "'.kernel' requires a name".to_string());
            return;
        }
        if self.current_kernel.is_some() {
            self.handler.end_kernel();
        }
        self.handler.begin_kernel(name, &mut self.sections);
        self.current_kernel = Some(name.to_string());
        self.switch_role(SectionRole::Text, pos);
    }

    fn set_linkage(&mut self, args: &str, flag: SymbolFlags) {
        for name in args.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let id = self.symbols.get_or_create(name);
            self.symbols.get_mut(id).flags.insert(flag);
        }
    }

    fn do_gpu(&mut self, args: &str, pos: &PositionChain) {
        let name = args.trim();
        match crate::gpu::GpuDevice::from_name(name) {
            Some(device) => self.config.device = device,
            None => self.diagnostics.error(pos.clone(), format!("unknown GPU device '{name}'")),
        }
    }

    fn do_driver_version(&mut self, args: &str, pos: &PositionChain) {
        let text = args.trim();
        let version = if let Some((major, minor)) = text.split_once('.') {
            match (major.trim().parse::<u32>(), minor.trim().parse::<u32>()) {
                (Ok(maj), Ok(min)) => Some(crate::config::DriverVersion::new(maj, min)),
                _ => None,
            }
        } else {
            text.parse::<u32>().ok().map(crate::config::DriverVersion)
        };
        match version {
            Some(v) => self.config.driver_version = v,
            None => self.diagnostics.error(pos.clone(), format!("invalid driver version '{text}'")),
        }
    }

    fn do_code_flow(&mut self, kind: CodeFlowKind, args: &str, pos: &PositionChain) {
        let Some(section) = self.current_section else {
            self.diagnostics.error(pos.clone(), "directive requires an active section".to_string());
            return;
        };
        let offset = self.sections.get(section).cursor();
        let Some(target) = self.eval_now(args.trim(), pos) else { return };
        self.sections.get_mut(section).code_flow.push(CodeFlowEntry { offset, target: Some(target as u64), kind });
    }

    fn do_code_flow_no_target(&mut self, kind: CodeFlowKind, pos: &PositionChain) {
        let Some(section) = self.current_section else {
            self.diagnostics.error(pos.clone(), "directive requires an active section".to_string());
            return;
        };
        let offset = self.sections.get(section).cursor();
        self.sections.get_mut(section).code_flow.push(CodeFlowEntry { offset, target: None, kind });
    }

    fn dispatch_instruction(&mut self, line: &str, pos: &PositionChain, encoder: Option<&mut dyn IsaEncoder>) {
        let Some(section) = self.current_section else {
            self.diagnostics.error(pos.clone(), "instruction outside any section".to_string());
            return;
        };
        let Some(encoder) = encoder else {
            self.diagnostics.error(pos.clone(), "no instruction encoder configured for this architecture".to_string());
            return;
        };
        let arch: GpuArchitecture = self.config.device.architecture();
        let mut sink = DriverEncodeSink { sections: &mut self.sections, section };
        let mut lookup = DriverSymbolLookup { symbols: &mut self.symbols };
        encoder.encode(line, arch, &mut sink, &mut lookup, &mut self.diagnostics, pos);
    }

    /// End-of-input walk (spec.md §4.4): anything left in
    /// [`Assembler::pending_fixups`] is a forward reference that never
    /// resolved. A single `sym+N` (or `sym-N`) slot of the right width is
    /// converted to a relocation; anything else is an error naming one
    /// representative unresolved symbol.
    fn finish_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending_fixups);
        for (id, fixup) in pending {
            let hit = symbol_plus_addend(self.arena.expr(id));
            match (hit, fixup.width) {
                (Some((symbol, addend)), 4) => {
                    self.sections.get_mut(fixup.section).relocations.push(Relocation {
                        offset: fixup.offset,
                        kind: RelocationKind::Low32,
                        symbol,
                        addend,
                    });
                }
                (Some((symbol, addend)), 8) => {
                    let sec = self.sections.get_mut(fixup.section);
                    sec.relocations.push(Relocation { offset: fixup.offset, kind: RelocationKind::Low32, symbol, addend });
                    sec.relocations.push(Relocation { offset: fixup.offset + 4, kind: RelocationKind::High32, symbol, addend });
                }
                _ => {
                    let name = self
                        .arena
                        .representative_unresolved_symbol(id, &self.symbols)
                        .unwrap_or_else(|| "<unknown>".to_string());
                    self.diagnostics.error(fixup.pos.clone(), format!("unresolved expression referencing '{name}'"));
                }
            }
        }
        for assign in std::mem::take(&mut self.pending_assigns) {
            let name = self
                .arena
                .representative_unresolved_symbol(assign.expr, &self.symbols)
                .unwrap_or_else(|| "<unknown>".to_string());
            self.diagnostics.error(assign.pos, format!("'{}' never resolved: depends on unresolved '{name}'", assign.name));
        }
    }
}

fn format_eval_warning(w: &EvalWarning) -> String {
    match w {
        EvalWarning::ShiftOutOfRange { amount } => format!("shift amount {amount} out of range [0,63], result is zero"),
    }
}

fn fits_width(value: i64, width: u8) -> bool {
    if width >= 8 {
        return true;
    }
    let bits = u32::from(width) * 8;
    let signed_min = -(1i64 << (bits - 1));
    let signed_max = (1i64 << (bits - 1)) - 1;
    let unsigned_max = (1i64 << bits) - 1;
    (value >= signed_min && value <= signed_max) || (value >= 0 && value <= unsigned_max)
}

/// Recognize the handful of RPN shapes spec.md §4.4's relocation fallback
/// actually needs: a bare symbol, or a symbol plus/minus one literal.
fn symbol_plus_addend(expr: &Expression) -> Option<(SymbolId, i64)> {
    match expr.rpn.as_slice() {
        [RpnItem::SymbolRef(s)] => Some((*s, 0)),
        [RpnItem::SymbolRef(s), RpnItem::Literal(a), RpnItem::Binary(BinOp::Add)] => Some((*s, *a)),
        [RpnItem::Literal(a), RpnItem::SymbolRef(s), RpnItem::Binary(BinOp::Add)] => Some((*s, *a)),
        [RpnItem::SymbolRef(s), RpnItem::Literal(a), RpnItem::Binary(BinOp::Sub)] => Some((*s, -*a)),
        _ => None,
    }
}

/// Minimal round-to-nearest-even-free binary32→binary16 conversion;
/// subnormal results flush to zero.
fn f32_to_f16_bits(v: f32) -> u16 {
    let bits = v.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let mantissa = bits & 0x007f_ffff;
    let exp = ((bits >> 23) & 0xff) as i32 - 127 + 15;
    if exp <= 0 {
        sign
    } else if exp >= 0x1f {
        sign | 0x7c00
    } else {
        sign | ((exp as u16) << 10) | ((mantissa >> 13) as u16)
    }
}

fn split_directive(rest: &str) -> (&str, &str) {
    let end = rest.find(|c: char| c.is_whitespace()).unwrap_or(rest.len());
    let name = &rest[..end];
    let args = rest[end..].trim_start();
    (name, args)
}

fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut in_quotes = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_quotes = !in_quotes,
            b'\\' if in_quotes => i += 1,
            b'#' | b';' if !in_quotes => return &line[..i],
            b'/' if !in_quotes && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
        i += 1;
    }
    line
}

fn is_label_token(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '.' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

/// Peel off `label:` tokens from the front of a line (spec.md §4.4:
/// "multiple colon-terminated tokens on one line define coincident
/// labels").
fn split_leading_labels(line: &str) -> (Vec<&str>, &str) {
    let mut rest = line;
    let mut labels = Vec::new();
    while let Some(colon) = rest.find(':') {
        let candidate = rest[..colon].trim();
        if !is_label_token(candidate) {
            break;
        }
        labels.push(candidate);
        rest = rest[colon + 1..].trim_start();
    }
    (labels, rest)
}

/// Find a bare `=` (not part of `==`, `!=`, `<=`, `>=`) for the `NAME =
/// EXPR` assignment form.
fn find_top_level_assign(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'=' {
            continue;
        }
        let prev = if i > 0 { Some(bytes[i - 1]) } else { None };
        let next = bytes.get(i + 1).copied();
        if next == Some(b'=') || matches!(prev, Some(b'=') | Some(b'!') | Some(b'<') | Some(b'>')) {
            continue;
        }
        return Some(i);
    }
    None
}

fn split_quoted_list(args: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let bytes = args.as_bytes();
    let mut in_quotes = false;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_quotes = !in_quotes,
            b'\\' if in_quotes => i += 1,
            b',' if !in_quotes => {
                out.push(args[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    out.push(args[start..].trim());
    out
}

fn unquote_c_string(s: &str) -> Option<String> {
    let inner = s.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            d if d.is_digit(8) => {
                let mut val = d.to_digit(8).unwrap();
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            val = val * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(val as u8 as char);
            }
            other => out.push(other),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BinaryFormat;
    use crate::format::RawCodeHandler;
    use crate::gpu::GpuDevice;

    struct NullFiles;
    impl FileSource for NullFiles {
        fn read_file(&mut self, _path: &str, _include_paths: &[String]) -> std::io::Result<String> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no files in this test"))
        }
    }

    fn asm() -> Assembler {
        let config = AsmConfig::new(GpuDevice::Bonaire, BinaryFormat::RawCode);
        Assembler::new(config, Box::new(RawCodeHandler::default()))
    }

    #[test]
    fn forward_reference_in_data_directive_resolves_after_label() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a.assemble("t.s", ".text\n.int target\ntarget:\n.byte 7\n", &mut files, None).unwrap();
        assert!(good);
        let text = a.sections().iter().find(|s| s.name == ".text").unwrap();
        assert_eq!(&text.content[0..4], &4u32.to_le_bytes());
        assert_eq!(text.content[4], 7);
    }

    #[test]
    fn assign_then_byte_directive_use_resolved_value() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a.assemble("t.s", ".text\nx = 3 + 4\n.byte x\n", &mut files, None).unwrap();
        assert!(good);
        let text = a.sections().iter().find(|s| s.name == ".text").unwrap();
        assert_eq!(text.content, vec![7]);
    }

    #[test]
    fn truncating_byte_value_emits_warning() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a.assemble("t.s", ".text\n.byte 300\n", &mut files, None).unwrap();
        assert!(good);
        assert_eq!(a.diagnostics().diagnostics().len(), 1);
    }

    #[test]
    fn align_pads_to_boundary_with_fill_byte() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a.assemble("t.s", ".text\n.byte 1\n.align 4, 0xaa\n", &mut files, None).unwrap();
        assert!(good);
        let text = a.sections().iter().find(|s| s.name == ".text").unwrap();
        assert_eq!(text.content, vec![1, 0xaa, 0xaa, 0xaa]);
    }

    #[test]
    fn unresolved_symbol_at_end_of_input_is_an_error() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a.assemble("t.s", ".text\n.byte never_defined\n", &mut files, None).unwrap();
        assert!(!good);
    }

    #[test]
    fn unresolved_word_becomes_a_relocation() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a.assemble("t.s", ".text\n.int later + 4\nlabel_keeps_good_dangling:\n", &mut files, None).unwrap();
        assert!(!good);
        let text = a.sections().iter().find(|s| s.name == ".text").unwrap();
        assert_eq!(text.relocations.len(), 1);
        assert_eq!(text.relocations[0].addend, 4);
    }

    #[test]
    fn coincident_labels_on_one_line_share_the_same_address() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a.assemble("t.s", ".text\na: b: .byte 9\n", &mut files, None).unwrap();
        assert!(good);
        let a_id = a.symbols().lookup("a").unwrap();
        let b_id = a.symbols().lookup("b").unwrap();
        assert_eq!(a.symbols().get(a_id).value, a.symbols().get(b_id).value);
    }

    #[test]
    fn ascii_literal_round_trips_octal_escape() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a.assemble("t.s", ".text\n.ascii \"a\\072b\"\n", &mut files, None).unwrap();
        assert!(good);
        let text = a.sections().iter().find(|s| s.name == ".text").unwrap();
        assert_eq!(text.content, b"a:b");
    }

    #[test]
    fn eqv_snapshot_freezes_value_and_ignores_later_reassignment() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a.assemble("t.s", "x = 3\n.eqv y, x+1\nx = 10\n.text\n.byte y\n", &mut files, None).unwrap();
        assert!(good);
        let y = a.symbols().lookup("y").unwrap();
        assert_eq!(a.symbols().get(y).value, 4);
        let text = a.sections().iter().find(|s| s.name == ".text").unwrap();
        assert_eq!(text.content, vec![4]);
    }

    #[test]
    fn plain_assign_reevaluates_eagerly_at_definition_not_later() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a.assemble("t.s", "x = 3\ny = x + 1\nx = 10\n", &mut files, None).unwrap();
        assert!(good);
        let y = a.symbols().lookup("y").unwrap();
        assert_eq!(a.symbols().get(y).value, 4);
    }

    #[test]
    fn forward_referencing_eqv_resolves_once_its_symbol_is_defined() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a.assemble("t.s", ".eqv y, x+1\nx = 3\n.text\n.byte y\n", &mut files, None).unwrap();
        assert!(good);
        let y = a.symbols().lookup("y").unwrap();
        assert!(a.symbols().get(y).is_resolved());
        assert_eq!(a.symbols().get(y).value, 4);
    }

    #[test]
    fn mutual_unresolved_cycle_leaves_both_undefined_with_two_errors() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a.assemble("t.s", "a = b+1\nb = a+1\n", &mut files, None).unwrap();
        assert!(!good);
        assert_eq!(a.diagnostics().diagnostics().len(), 2);
    }

    #[test]
    fn reassigning_a_once_defined_label_is_an_error() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a.assemble("t.s", ".text\na: .byte 1\na = 5\n", &mut files, None).unwrap();
        assert!(!good);
    }

    #[test]
    fn fillq_emits_the_full_64_bit_value_not_the_size_argument() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a
            .assemble("t.s", ".text\n.fillq 5,8,0x907856453412cdba\n", &mut files, None)
            .unwrap();
        assert!(good);
        let text = a.sections().iter().find(|s| s.name == ".text").unwrap();
        assert_eq!(text.content.len(), 40);
        let one: Vec<u8> = vec![0xba, 0xcd, 0x12, 0x34, 0x45, 0x56, 0x78, 0x90];
        for chunk in text.content.chunks(8) {
            assert_eq!(chunk, one.as_slice());
        }
    }

    #[test]
    fn fill_repeats_low_bytes_of_the_value() {
        let mut a = asm();
        let mut files = NullFiles;
        let good = a.assemble("t.s", ".text\n.fill 5,5,0xbaca901155\n", &mut files, None).unwrap();
        assert!(good);
        let text = a.sections().iter().find(|s| s.name == ".text").unwrap();
        assert_eq!(text.content.len(), 25);
        let one: Vec<u8> = vec![0x55, 0x11, 0x90, 0xca, 0xba];
        for chunk in text.content.chunks(5) {
            assert_eq!(chunk, one.as_slice());
        }
    }
}
