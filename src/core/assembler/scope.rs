// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Local label scoping.
//!
//! A local name (`.name`) belongs to the most recent global label and is
//! stored as `<global>_<name>`. `.uniquescope` replaces the global with a
//! synthesized `_unique<N>`, which no user label can spell because leading
//! underscores are reserved.

/// Tracks the global label that local names are qualified with.
#[derive(Debug, Clone, Default)]
pub struct LocalScope {
    prior_global: String,
    unique_counter: u32,
}

impl LocalScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prior_global(&self) -> &str {
        &self.prior_global
    }

    pub fn set_global(&mut self, name: &str) {
        self.prior_global = name.to_string();
    }

    /// Start a private scope; returns its synthesized name.
    pub fn enter_unique(&mut self) -> &str {
        self.prior_global = format!("_unique{}", self.unique_counter);
        self.unique_counter += 1;
        &self.prior_global
    }

    /// Qualify a name if it is local.
    pub fn qualify(&self, name: &str) -> String {
        match name.strip_prefix('.') {
            Some(local) => format!("{}_{}", self.prior_global, local),
            None => name.to_string(),
        }
    }
}
