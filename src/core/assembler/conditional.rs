// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Conditional assembly state management.

/// Conditional branch subtype for active block flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalSubType {
    If,
    ElseIf,
    Else,
}

/// State of a conditional assembly block.
#[derive(Debug, Clone)]
pub struct ConditionalContext {
    pub nest_level: u8,
    pub sub_type: ConditionalSubType,
    /// Some branch of this block has already been taken.
    pub matched: bool,
    pub skipping: bool,
    /// The enclosing block was skipping when this one opened.
    pub parent_skipping: bool,
}

impl ConditionalContext {
    pub fn new(prev: Option<&ConditionalContext>, taken: bool) -> Self {
        let nest_level = match prev {
            Some(p) => p.nest_level.saturating_add(1),
            None => 1,
        };
        let parent_skipping = prev.is_some_and(|p| p.skipping);
        Self {
            nest_level,
            sub_type: ConditionalSubType::If,
            matched: taken && !parent_skipping,
            skipping: parent_skipping || !taken,
            parent_skipping,
        }
    }
}

/// Error from an unbalanced conditional directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalError {
    /// `.else`, `.elif` or `.endif` without an open block.
    NoOpenBlock,
    /// A branch after `.else`.
    AfterElse,
}

/// Stack of conditional assembly contexts.
#[derive(Debug, Default)]
pub struct ConditionalStack {
    stack: Vec<ConditionalContext>,
}

impl ConditionalStack {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn last(&self) -> Option<&ConditionalContext> {
        self.stack.last()
    }

    /// True while lines should be skipped.
    pub fn skipping(&self) -> bool {
        match self.stack.last() {
            Some(c) => c.skipping,
            None => false,
        }
    }

    /// True when an `.elif` condition would matter, so it is worth
    /// evaluating.
    pub fn wants_branch(&self) -> bool {
        self.stack
            .last()
            .is_some_and(|c| !c.parent_skipping && !c.matched)
    }

    pub fn open(&mut self, taken: bool) {
        let ctx = ConditionalContext::new(self.stack.last(), taken);
        self.stack.push(ctx);
    }

    pub fn else_if(&mut self, taken: bool) -> Result<(), ConditionalError> {
        let ctx = self.stack.last_mut().ok_or(ConditionalError::NoOpenBlock)?;
        if ctx.sub_type == ConditionalSubType::Else {
            return Err(ConditionalError::AfterElse);
        }
        ctx.sub_type = ConditionalSubType::ElseIf;
        let take = taken && !ctx.matched && !ctx.parent_skipping;
        ctx.matched |= take;
        ctx.skipping = !take;
        Ok(())
    }

    pub fn otherwise(&mut self) -> Result<(), ConditionalError> {
        let ctx = self.stack.last_mut().ok_or(ConditionalError::NoOpenBlock)?;
        if ctx.sub_type == ConditionalSubType::Else {
            return Err(ConditionalError::AfterElse);
        }
        ctx.sub_type = ConditionalSubType::Else;
        let take = !ctx.matched && !ctx.parent_skipping;
        ctx.matched |= take;
        ctx.skipping = !take;
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), ConditionalError> {
        self.stack
            .pop()
            .map(|_| ())
            .ok_or(ConditionalError::NoOpenBlock)
    }
}
