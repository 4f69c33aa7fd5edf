// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Target-independent assembler core.
//!
//! # Components
//!
//! - [`text_utils`] - Line normalization, quote-aware scanning and splitting
//! - [`expr`] - Expression parsing and evaluation
//! - [`operand_table`] - Opcode/operand pattern tables and the pattern matcher
//! - [`statement`] - The statement stream and its error/warning codes
//! - [`symbol_table`] - Labels, named values and relative labels
//! - [`macro_processor`] - Macro definitions and invocation expansion
//! - [`source_map`] - Root line provenance
//! - [`assembler`] - Conditionals, scopes, listings and diagnostics

pub mod assembler;
pub mod expr;
pub mod macro_processor;
pub mod operand_table;
pub mod source_map;
pub mod statement;
pub mod symbol_table;
pub mod text_utils;
