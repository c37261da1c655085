//! Source positions and the macro-expansion chains they propagate through.

use std::fmt;
use std::sync::Arc;

/// Opaque handle into the file-identifier table owned by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// A single `(file, line, column)` coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePos {
    pub file: FileId,
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    #[must_use]
    pub fn new(file: FileId, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }
}

/// A position plus the stack of macro/rept/irp expansion sites that produced
/// it, innermost first. Cloning is cheap: frames are shared via `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionChain {
    here: SourcePos,
    parent: Option<Arc<PositionChain>>,
}

impl PositionChain {
    #[must_use]
    pub fn root(pos: SourcePos) -> Self {
        Self { here: pos, parent: None }
    }

    /// Push a new expansion frame (e.g. the line that invoked a macro) on
    /// top of `self`, returning the chain as seen from inside the expansion.
    #[must_use]
    pub fn push(self, pos: SourcePos) -> Self {
        Self { here: pos, parent: Some(Arc::new(self)) }
    }

    #[must_use]
    pub fn top(&self) -> SourcePos {
        self.here
    }

    /// Iterate from innermost (expansion site) to outermost (file root).
    pub fn frames(&self) -> impl Iterator<Item = SourcePos> + '_ {
        let mut cur = Some(self);
        std::iter::from_fn(move || {
            let node = cur?;
            cur = node.parent.as_deref();
            Some(node.here)
        })
    }
}

impl fmt::Display for PositionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut frames = self.frames();
        if let Some(top) = frames.next() {
            write!(f, "{}:{}:{}", top.file.0, top.line, top.column)?;
        }
        for frame in frames {
            write!(f, " (expanded from {}:{}:{})", frame.file.0, frame.line, frame.column)?;
        }
        Ok(())
    }
}

/// Maps [`FileId`]s to their resolved path strings.
#[derive(Debug, Default)]
pub struct FileTable {
    names: Vec<String>,
}

impl FileTable {
    #[must_use]
    pub fn new() -> Self {
        Self { names: Vec::new() }
    }

    pub fn intern(&mut self, name: impl Into<String>) -> FileId {
        let id = FileId(self.names.len() as u32);
        self.names.push(name.into());
        id
    }

    #[must_use]
    pub fn name(&self, id: FileId) -> &str {
        &self.names[id.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_reports_expansion_sites_innermost_first() {
        let mut files = FileTable::new();
        let main = files.intern("main.s");
        let root = PositionChain::root(SourcePos::new(main, 10, 1));
        let expanded = root.push(SourcePos::new(main, 11, 5));
        let frames: Vec<_> = expanded.frames().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].line, 11);
        assert_eq!(frames[1].line, 10);
    }
}
