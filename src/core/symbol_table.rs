// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// Symbol table for labels, named values and relative labels.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub line: u32,
    pub root_line: u32,
    pub address: u16,
    pub relocation_group: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SymbolTableResult {
    Ok,
    Duplicate,
}

#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    labels: Vec<Label>,
    index: HashMap<String, usize>,
    values: BTreeMap<String, u16>,
    relative: BTreeMap<u32, u16>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `name` is taken by a label or a named value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name) || self.values.contains_key(name)
    }

    pub fn define_label(&mut self, label: Label) -> SymbolTableResult {
        if self.contains(&label.name) {
            return SymbolTableResult::Duplicate;
        }
        self.index.insert(label.name.clone(), self.labels.len());
        self.labels.push(label);
        SymbolTableResult::Ok
    }

    pub fn define_value(&mut self, name: &str, value: u16) -> SymbolTableResult {
        if self.contains(name) {
            return SymbolTableResult::Duplicate;
        }
        self.values.insert(name.to_string(), value);
        SymbolTableResult::Ok
    }

    /// Replace the value of an existing named value. Returns true when it
    /// changed.
    pub fn update_value(&mut self, name: &str, value: u16) -> bool {
        match self.values.get_mut(name) {
            Some(current) if *current != value => {
                *current = value;
                true
            }
            _ => false,
        }
    }

    pub fn define_relative(&mut self, root_line: u32, address: u16) {
        self.relative.insert(root_line, address);
    }

    /// Value of a label or named value.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.label(name)
            .map(|label| label.address)
            .or_else(|| self.values.get(name).copied())
    }

    #[must_use]
    pub fn label(&self, name: &str) -> Option<&Label> {
        self.index.get(name).map(|&idx| &self.labels[idx])
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, u16)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Nearest relative label defined after `root_line`.
    #[must_use]
    pub fn relative_after(&self, root_line: u32) -> Option<u16> {
        self.relative_entry(root_line, true).map(|(_, addr)| addr)
    }

    /// Nearest relative label defined on or before `root_line`.
    #[must_use]
    pub fn relative_before(&self, root_line: u32) -> Option<u16> {
        self.relative_entry(root_line, false).map(|(_, addr)| addr)
    }

    /// Root line and address of the relative label `$+` (`forward`) or `$-`
    /// resolves to from `root_line`.
    #[must_use]
    pub fn relative_entry(&self, root_line: u32, forward: bool) -> Option<(u32, u16)> {
        let found = if forward {
            self.relative.range(root_line.saturating_add(1)..).next()
        } else {
            self.relative.range(..=root_line).next_back()
        };
        found.map(|(root, addr)| (*root, *addr))
    }

    /// True when `name` is a label of relocation group `group`.
    #[must_use]
    pub fn in_relocation_group(&self, name: &str, group: u32) -> bool {
        self.label(name)
            .is_some_and(|label| label.relocation_group == Some(group))
    }

    /// Move every label and relative label whose root line is after
    /// `after_root` (and not after `until_root`, when given) by `delta` words.
    /// Returns the number of entries moved.
    pub fn shift(&mut self, after_root: u32, until_root: Option<u32>, delta: i32) -> usize {
        let in_range = |root: u32| root > after_root && until_root.map_or(true, |until| root <= until);
        let mut moved = 0usize;
        for label in self.labels.iter_mut().filter(|l| in_range(l.root_line)) {
            label.address = label.address.wrapping_add_signed(delta as i16);
            moved += 1;
        }
        for (_, addr) in self.relative.iter_mut().filter(|(root, _)| in_range(**root)) {
            *addr = addr.wrapping_add_signed(delta as i16);
            moved += 1;
        }
        moved
    }

    pub fn dump<W: Write>(&self, mut out: W) -> io::Result<()> {
        for label in &self.labels {
            let group = label
                .relocation_group
                .map(|g| format!("  [reloc {g}]"))
                .unwrap_or_default();
            writeln!(
                out,
                "{:<24}: {:04x} ({}){group}",
                label.name, label.address, label.address
            )?;
        }
        for (name, value) in &self.values {
            writeln!(out, "{:<24}= {:04x} ({})", name, value, value)?;
        }
        Ok(())
    }
}
