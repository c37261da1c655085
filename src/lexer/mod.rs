//! Input stream and macro substitutor (spec.md §4.1, component C1).
//!
//! Grounded on the teacher's nested-frame-stack shape
//! (`BlockIter`/`RecordIter` in `src/read.rs`): here the stack holds
//! active files, macro expansions, and `.rept`/`.irp` bodies instead of
//! ELF blocks, each frame popped independently on exhaustion.

pub mod cond;
pub mod macros;

use log::{debug, trace};

use cond::CondStack;
use macros::{bind_args, parse_macro_header, split_args, substitute_line, MacroDef, MacroTable};

use crate::pos::{FileId, FileTable, PositionChain, SourcePos};

/// Default macro (and `.rept`/`.irp`) expansion recursion limit
/// (spec.md §4.1).
pub const DEFAULT_MAX_EXPANSION_DEPTH: u32 = 250;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    /// Fatal (spec.md §4.1, §7): macro/`.rept`/`.irp`/`.if` recursion or
    /// nesting depth exceeded the configured limit.
    MacroRecursionExceeded,
    /// Fatal: `.macro`/`.rept`/`.irp`/`.if` still open at end of input,
    /// "pointing at the opening directive" (spec.md §4.1).
    UnterminatedBlock { opened_at: SourcePos, what: &'static str },
    /// Fatal: `.include` could not open its target.
    IncludeNotFound { path: String },
    CondStackError(cond::CondError),
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MacroRecursionExceeded => write!(f, "macro expansion recursion limit exceeded"),
            Self::UnterminatedBlock { opened_at, what } => {
                write!(f, "unterminated {what} opened at line {}", opened_at.line)
            }
            Self::IncludeNotFound { path } => write!(f, "cannot open include file '{path}'"),
            Self::CondStackError(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for LexError {}

impl From<cond::CondError> for LexError {
    fn from(e: cond::CondError) -> Self {
        Self::CondStackError(e)
    }
}

/// External collaborator (spec.md §6): "File system (read-only):
/// include-path resolution and file reading".
pub trait FileSource {
    fn read_file(&mut self, path: &str, include_paths: &[String]) -> std::io::Result<String>;
}

/// Supplies C2/C3-backed answers to the conditions C1 needs to evaluate
/// `.if`/`.ifdef`/`.ifc`/... without owning the symbol table itself.
pub trait ConditionEvaluator {
    fn eval_truthy(&mut self, expr_src: &str) -> bool;
    fn is_defined(&mut self, name: &str) -> bool;
}

struct Line {
    text: String,
    pos: SourcePos,
}

enum Frame {
    Lines { file: FileId, lines: Vec<Line>, index: usize },
}

impl Frame {
    fn next(&mut self) -> Option<(String, SourcePos)> {
        match self {
            Frame::Lines { lines, index, .. } => {
                let line = lines.get(*index)?;
                *index += 1;
                Some((line.text.clone(), line.pos))
            }
        }
    }
}

pub struct InputStream {
    files: FileTable,
    frames: Vec<Frame>,
    /// Parallel to `frames`: `Some(site)` for a macro/`.rept`/`.irp`
    /// expansion frame (the invoking line), `None` for a plain file or
    /// `.include` frame. Used to rebuild each line's [`PositionChain`].
    origins: Vec<Option<SourcePos>>,
    cond: CondStack,
    macros: MacroTable,
    altmacro: bool,
    expansion_depth: u32,
    max_expansion_depth: u32,
    include_paths: Vec<String>,
}

impl InputStream {
    #[must_use]
    pub fn new(root_name: &str, root_text: &str, include_paths: Vec<String>) -> Self {
        let mut files = FileTable::new();
        let file = files.intern(root_name);
        let lines = split_logical_lines(root_text, file);
        Self {
            files,
            frames: vec![Frame::Lines { file, lines, index: 0 }],
            origins: vec![None],
            cond: CondStack::new(),
            macros: MacroTable::new(),
            altmacro: false,
            expansion_depth: 0,
            max_expansion_depth: DEFAULT_MAX_EXPANSION_DEPTH,
            include_paths,
        }
    }

    #[must_use]
    pub fn files(&self) -> &FileTable {
        &self.files
    }

    #[must_use]
    pub fn altmacro(&self) -> bool {
        self.altmacro
    }

    fn pop_raw_line(&mut self) -> Option<(String, SourcePos)> {
        loop {
            let frame = self.frames.last_mut()?;
            if let Some((text, pos)) = frame.next() {
                return Some((text, pos));
            }
            self.frames.pop();
            if let Some(Some(_)) = self.origins.pop() {
                self.expansion_depth = self.expansion_depth.saturating_sub(1);
            }
            if self.frames.is_empty() {
                return None;
            }
        }
    }

    fn push_lines(&mut self, file: FileId, lines: Vec<Line>, origin: Option<SourcePos>) {
        self.frames.push(Frame::Lines { file, lines, index: 0 });
        self.origins.push(origin);
    }

    /// Rebuild the [`PositionChain`] for a line sitting at `pos` in the
    /// current (innermost) frame, from the stack of expansion sites that
    /// led there.
    fn current_chain(&self, pos: SourcePos) -> PositionChain {
        let mut sites = self.origins.iter().copied().flatten();
        let Some(first) = sites.next() else {
            return PositionChain::root(pos);
        };
        let mut chain = PositionChain::root(first);
        for site in sites {
            chain = chain.push(site);
        }
        chain.push(pos)
    }

    /// Capture raw lines up to (and consuming) a matching closing
    /// directive, honoring nesting of `open_kw`/`close_kw` pairs so an
    /// inner `.rept`/`.macro` doesn't terminate the capture early.
    fn capture_block(
        &mut self,
        open_pos: SourcePos,
        open_kw: &str,
        close_kw: &str,
        what: &'static str,
    ) -> Result<Vec<(String, SourcePos)>, LexError> {
        let mut depth = 1u32;
        let mut captured = Vec::new();
        loop {
            let Some((text, pos)) = self.pop_raw_line() else {
                return Err(LexError::UnterminatedBlock { opened_at: open_pos, what });
            };
            let first_word = first_directive_word(&text);
            if first_word.eq_ignore_ascii_case(open_kw) {
                depth += 1;
            } else if first_word.eq_ignore_ascii_case(close_kw) {
                depth -= 1;
                if depth == 0 {
                    return Ok(captured);
                }
            }
            captured.push((text, pos));
        }
    }

    /// Produce the next logical line visible to the assembler driver
    /// (C4), with all macro/`.rept`/`.irp`/`.if`/`.include` expansion
    /// already applied (spec.md §4.1).
    pub fn read_line(
        &mut self,
        files: &mut dyn FileSource,
        cond_eval: &mut dyn ConditionEvaluator,
    ) -> Result<Option<(String, PositionChain)>, LexError> {
        loop {
            let Some((raw, pos)) = self.pop_raw_line() else {
                return Ok(None);
            };
            let trimmed = raw.trim();
            let word = first_directive_word(trimmed);
            let lower = word.to_ascii_lowercase();

            if !self.cond.is_active() {
                match lower.as_str() {
                    ".if" | ".ifdef" | ".ifndef" | ".ifb" | ".ifnb" | ".ifc" | ".ifnc" => {
                        let arg = trimmed[word.len()..].trim();
                        self.cond.push_if(eval_conditional(&lower, arg, cond_eval));
                    }
                    ".else" => self.cond.else_branch()?,
                    ".elseif" => {
                        let arg = trimmed[word.len()..].trim();
                        self.cond.elseif(cond_eval.eval_truthy(arg))?;
                    }
                    ".endif" => self.cond.endif()?,
                    _ => {}
                }
                continue;
            }

            match lower.as_str() {
                ".if" | ".ifdef" | ".ifndef" | ".ifb" | ".ifnb" | ".ifc" | ".ifnc" => {
                    let arg = trimmed[word.len()..].trim();
                    self.cond.push_if(eval_conditional(&lower, arg, cond_eval));
                    continue;
                }
                ".else" => {
                    self.cond.else_branch()?;
                    continue;
                }
                ".elseif" => {
                    let arg = trimmed[word.len()..].trim();
                    self.cond.elseif(cond_eval.eval_truthy(arg))?;
                    continue;
                }
                ".endif" => {
                    self.cond.endif()?;
                    continue;
                }
                ".altmacro" => {
                    self.altmacro = true;
                    continue;
                }
                ".include" => {
                    let path = trimmed[word.len()..].trim().trim_matches('"').to_string();
                    let text = files
                        .read_file(&path, &self.include_paths)
                        .map_err(|_| LexError::IncludeNotFound { path: path.clone() })?;
                    let file = self.files.intern(path);
                    let lines = split_logical_lines(&text, file);
                    self.push_lines(file, lines, None);
                    continue;
                }
                ".macro" => {
                    let rest = trimmed[word.len()..].trim();
                    let mut def = parse_macro_header(rest);
                    let body = self.capture_block(pos, ".macro", ".endm", "'.macro'")?;
                    def.body = body.into_iter().map(|(t, _)| t).collect();
                    debug!("defined macro '{}' with {} params", def.name, def.params.len());
                    self.macros.define(def);
                    continue;
                }
                ".rept" => {
                    let count_src = trimmed[word.len()..].trim();
                    let count: u64 = count_src.trim().parse().unwrap_or(0);
                    let body = self.capture_block(pos, ".rept", ".endr", "'.rept'")?;
                    self.enter_expansion(pos)?;
                    let mut lines = Vec::with_capacity(body.len() * count as usize);
                    for _ in 0..count {
                        for (text, _) in &body {
                            lines.push(Line { text: text.clone(), pos });
                        }
                    }
                    self.push_lines(pos.file, lines, Some(pos));
                    continue;
                }
                ".irp" => {
                    let rest = trimmed[word.len()..].trim();
                    let (var, values) = rest.split_once(',').unwrap_or((rest, ""));
                    let var = var.trim().to_string();
                    let values = split_args(values);
                    let body = self.capture_block(pos, ".irp", ".endr", "'.irp'")?;
                    self.enter_expansion(pos)?;
                    let mut bound = std::collections::HashMap::new();
                    let mut lines = Vec::new();
                    for value in &values {
                        bound.insert(var.clone(), value.clone());
                        for (text, _) in &body {
                            lines.push(Line { text: substitute_line(text, &bound, self.altmacro), pos });
                        }
                    }
                    self.push_lines(pos.file, lines, Some(pos));
                    continue;
                }
                _ if self.macros.contains(&word) => {
                    let rest = trimmed[word.len()..].trim();
                    let def: MacroDef = self.macros.get(&word).expect("checked contains").clone();
                    let bound = bind_args(&def, &split_args(rest));
                    self.enter_expansion(pos)?;
                    trace!("expanding macro '{}' (depth {})", def.name, self.expansion_depth);
                    let lines = def
                        .body
                        .iter()
                        .map(|text| Line { text: substitute_line(text, &bound, self.altmacro), pos })
                        .collect();
                    self.push_lines(pos.file, lines, Some(pos));
                    continue;
                }
                _ => {
                    let chain = self.current_chain(pos);
                    return Ok(Some((raw, chain)));
                }
            }
        }
    }

    fn enter_expansion(&mut self, at: SourcePos) -> Result<(), LexError> {
        self.expansion_depth += 1;
        if self.expansion_depth > self.max_expansion_depth {
            return Err(LexError::UnterminatedBlock { opened_at: at, what: "macro expansion (recursion limit)" });
        }
        Ok(())
    }
}

fn first_directive_word(line: &str) -> &str {
    let end = line.find(|c: char| c.is_whitespace() || c == ',').unwrap_or(line.len());
    &line[..end]
}

fn eval_conditional(directive: &str, arg: &str, cond_eval: &mut dyn ConditionEvaluator) -> bool {
    match directive {
        ".if" => cond_eval.eval_truthy(arg),
        ".ifdef" => cond_eval.is_defined(arg.trim()),
        ".ifndef" => !cond_eval.is_defined(arg.trim()),
        ".ifb" => arg.trim().is_empty(),
        ".ifnb" => !arg.trim().is_empty(),
        ".ifc" => {
            let (a, b) = arg.split_once(',').unwrap_or((arg, ""));
            a.trim() == b.trim()
        }
        ".ifnc" => {
            let (a, b) = arg.split_once(',').unwrap_or((arg, ""));
            a.trim() != b.trim()
        }
        _ => false,
    }
}

/// Join backslash-continued physical lines into logical lines
/// (spec.md §4.1: "a physical line ending in `\` followed by the next
/// physical line is one logical line; the position chain records the
/// first physical line").
fn split_logical_lines(text: &str, file: FileId) -> Vec<Line> {
    let mut out = Vec::new();
    let mut pending: Option<(String, u32)> = None;
    for (i, physical) in text.lines().enumerate() {
        let line_no = i as u32 + 1;
        let (buf, start_line) = pending.take().unwrap_or_else(|| (String::new(), line_no));
        let mut buf = buf;
        if !buf.is_empty() {
            buf.push('\n');
        }
        if let Some(stripped) = physical.strip_suffix('\\') {
            buf.push_str(stripped);
            pending = Some((buf, start_line));
        } else {
            buf.push_str(physical);
            out.push(Line { text: buf, pos: SourcePos::new(file, start_line, 1) });
        }
    }
    if let Some((buf, start_line)) = pending {
        out.push(Line { text: buf, pos: SourcePos::new(file, start_line, 1) });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullFiles;
    impl FileSource for NullFiles {
        fn read_file(&mut self, _path: &str, _include_paths: &[String]) -> std::io::Result<String> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no files in this test"))
        }
    }

    struct AlwaysTrue;
    impl ConditionEvaluator for AlwaysTrue {
        fn eval_truthy(&mut self, _expr_src: &str) -> bool {
            true
        }
        fn is_defined(&mut self, _name: &str) -> bool {
            true
        }
    }

    fn collect(src: &str) -> Vec<String> {
        let mut stream = InputStream::new("t.s", src, Vec::new());
        let mut files = NullFiles;
        let mut cond = AlwaysTrue;
        let mut out = Vec::new();
        while let Some((line, _)) = stream.read_line(&mut files, &mut cond).unwrap() {
            out.push(line);
        }
        out
    }

    #[test]
    fn backslash_continuation_joins_physical_lines() {
        let lines = collect("a = 1 + \\\n2\nb = 3\n");
        assert_eq!(lines[0], "a = 1 + \n2");
        assert_eq!(lines[1], "b = 3");
    }

    #[test]
    fn macro_expansion_splices_body_with_substitution() {
        let src = ".macro addk a, b\nvx = \\a + \\b\n.endm\naddk 1, 2\n";
        let lines = collect(src);
        assert_eq!(lines, vec!["vx = 1 + 2".to_string()]);
    }

    #[test]
    fn rept_repeats_body_n_times() {
        let src = ".rept 3\n.byte 1\n.endr\n";
        let lines = collect(src);
        assert_eq!(lines, vec![".byte 1".to_string(); 3]);
    }

    #[test]
    fn irp_binds_variable_to_each_value() {
        let src = ".irp x, 1, 2, 3\n.byte \\x\n.endr\n";
        let lines = collect(src);
        assert_eq!(lines, vec![".byte 1".to_string(), ".byte 2".to_string(), ".byte 3".to_string()]);
    }

    struct FalseThenTrue(Vec<bool>);
    impl ConditionEvaluator for FalseThenTrue {
        fn eval_truthy(&mut self, _expr_src: &str) -> bool {
            if self.0.is_empty() { false } else { self.0.remove(0) }
        }
        fn is_defined(&mut self, _name: &str) -> bool {
            false
        }
    }

    #[test]
    fn false_if_branch_is_skipped_without_macro_expansion() {
        let src = ".if 0\n.macro bad\nboom\n.endm\nbad\n.else\n.byte 9\n.endif\n";
        let mut stream = InputStream::new("t.s", src, Vec::new());
        let mut files = NullFiles;
        let mut cond = FalseThenTrue(vec![false]);
        let mut out = Vec::new();
        while let Some((line, _)) = stream.read_line(&mut files, &mut cond).unwrap() {
            out.push(line);
        }
        assert_eq!(out, vec![".byte 9".to_string()]);
    }

    #[test]
    fn unterminated_macro_is_fatal_and_points_at_opening_directive() {
        let src = ".macro m\n.byte 1\n";
        let mut stream = InputStream::new("t.s", src, Vec::new());
        let mut files = NullFiles;
        let mut cond = AlwaysTrue;
        let err = stream.read_line(&mut files, &mut cond).unwrap_err();
        assert!(matches!(err, LexError::UnterminatedBlock { what: "'.macro'", .. }));
    }
}
