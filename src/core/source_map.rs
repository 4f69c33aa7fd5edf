// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Source map from root line numbers back to the file line they came from.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOrigin {
    pub file: String,
    pub line: u32,
    /// Macro whose expansion produced the line, if any.
    pub expansion: Option<String>,
}

impl SourceOrigin {
    pub fn new(file: &str, line: u32) -> Self {
        Self {
            file: file.to_string(),
            line,
            expansion: None,
        }
    }

    pub fn expanded_from(mut self, name: &str) -> Self {
        self.expansion = Some(name.to_string());
        self
    }
}

/// Origins indexed by root line; root line `n` is entry `n - 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    origins: Vec<SourceOrigin>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the origin of the next root line and return its number.
    pub fn push(&mut self, origin: SourceOrigin) -> u32 {
        self.origins.push(origin);
        self.origins.len() as u32
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn origins(&self) -> &[SourceOrigin] {
        &self.origins
    }

    pub fn origin_for_root(&self, root_line: u32) -> Option<&SourceOrigin> {
        if root_line == 0 {
            return None;
        }
        self.origins.get(root_line as usize - 1)
    }
}
