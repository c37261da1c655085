//! Conditional-assembly stack (spec.md §4.1).
//!
//! "False branches are skipped at the line level without macro expansion
//! of their bodies (matching bracket directives are still balanced)":
//! the stack tracks, per nesting level, whether the *currently active*
//! branch of that `.if`/`.elseif`/`.else` chain is live, and whether any
//! earlier branch in the chain already fired (so a later `.elseif` knows
//! not to take effect even if its own condition is true).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    /// This branch is currently selected; lines are processed normally.
    Active,
    /// Every branch seen so far (including this one) was false; still
    /// looking for one to take, or falling through to `.else`.
    Pending,
    /// Some earlier branch in this chain already fired; this branch (and
    /// any further `.elseif`) is permanently skipped.
    Done,
}

#[derive(Debug, Default)]
pub struct CondStack {
    frames: Vec<BranchState>,
}

impl CondStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True while every enclosing frame (and the current one) is active;
    /// the lexer skips line expansion entirely while this is false.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.frames.iter().all(|f| matches!(f, BranchState::Active))
    }

    pub fn push_if(&mut self, condition: bool) {
        let parent_active = self.is_active();
        self.frames.push(if !parent_active {
            BranchState::Done
        } else if condition {
            BranchState::Active
        } else {
            BranchState::Pending
        });
    }

    /// `.elseif cond`; returns `Err` if there is no open `.if`.
    pub fn elseif(&mut self, condition: bool) -> Result<(), CondError> {
        let was_parent_active = self.frames.len() < 2 || self.frames[..self.frames.len() - 1].iter().all(|f| matches!(f, BranchState::Active));
        let top = self.frames.last_mut().ok_or(CondError::ElseWithoutIf)?;
        *top = match *top {
            BranchState::Active => BranchState::Done,
            BranchState::Pending if was_parent_active && condition => BranchState::Active,
            BranchState::Pending => BranchState::Pending,
            BranchState::Done => BranchState::Done,
        };
        Ok(())
    }

    pub fn else_branch(&mut self) -> Result<(), CondError> {
        let top = self.frames.last_mut().ok_or(CondError::ElseWithoutIf)?;
        *top = match *top {
            BranchState::Active => BranchState::Done,
            BranchState::Pending => BranchState::Active,
            BranchState::Done => BranchState::Done,
        };
        Ok(())
    }

    pub fn endif(&mut self) -> Result<(), CondError> {
        self.frames.pop().map(|_| ()).ok_or(CondError::EndifWithoutIf)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondError {
    ElseWithoutIf,
    EndifWithoutIf,
}

impl std::fmt::Display for CondError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ElseWithoutIf => write!(f, "'.else'/'.elseif' without a matching '.if'"),
            Self::EndifWithoutIf => write!(f, "'.endif' without a matching '.if'"),
        }
    }
}

impl std::error::Error for CondError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_false_branch_stays_inactive_even_if_condition_is_true() {
        let mut stack = CondStack::new();
        stack.push_if(false); // outer false
        stack.push_if(true); // inner would be true, but parent is false
        assert!(!stack.is_active());
        stack.endif().unwrap();
        assert!(!stack.is_active());
        stack.endif().unwrap();
        assert!(stack.is_active());
    }

    #[test]
    fn elseif_only_fires_once() {
        let mut stack = CondStack::new();
        stack.push_if(false);
        assert!(!stack.is_active());
        stack.elseif(true).unwrap();
        assert!(stack.is_active());
        stack.elseif(true).unwrap();
        assert!(!stack.is_active());
        stack.else_branch().unwrap();
        assert!(!stack.is_active());
    }
}
