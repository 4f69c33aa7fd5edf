// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Assembler building blocks shared by preprocessing and encoding.
//!
//! - [`conditional`] - Conditional assembly state machine
//! - [`scope`] - Local label scoping
//! - [`listing`] - Listing file generation
//! - [`error`] - Error types and diagnostics

pub mod conditional;
pub mod error;
pub mod listing;
pub mod scope;
