// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Shared text utilities: line normalization, quote- and nesting-aware
//! splitting and searching, and identifier scanning.

/// Check if a byte can start a name (letter, underscore or dot).
#[inline]
pub fn is_name_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'.'
}

/// Check if a byte can continue a name.
#[inline]
pub fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'.'
}

/// Check if a byte is whitespace (space or tab).
#[inline]
pub fn is_space(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

/// Split a line into code and comment parts at the first unquoted semicolon.
pub fn split_comment(line: &str) -> (&str, &str) {
    let bytes = line.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut escape = false;
    let mut idx = 0usize;
    while idx < bytes.len() {
        let c = bytes[idx];
        match c {
            _ if escape => {
                escape = false;
            }
            b'\\' if in_single || in_double => {
                escape = true;
            }
            b'\'' if !in_double => {
                in_single = !in_single;
            }
            b'"' if !in_single => {
                in_double = !in_double;
            }
            b';' if !in_single && !in_double => {
                return (&line[..idx], &line[idx..]);
            }
            _ => {}
        }
        idx += 1;
    }
    (line, "")
}

/// Strip the comment and collapse every unquoted whitespace run to one space.
pub fn normalize_line(line: &str) -> String {
    let (code, _) = split_comment(line);
    let mut out = String::with_capacity(code.len());
    let mut in_single = false;
    let mut in_double = false;
    let mut escape = false;
    let mut pending_space = false;
    for ch in code.trim().chars() {
        if !in_single && !in_double && (ch == ' ' || ch == '\t' || ch == '\r') {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        match ch {
            _ if escape => escape = false,
            '\\' if in_single || in_double => escape = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ => {}
        }
        out.push(ch);
    }
    out
}

/// Split a line on unquoted backslashes (line continuation).
pub fn split_continuations(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escape = false;
    for ch in s.chars() {
        match ch {
            _ if escape => {
                cur.push(ch);
                escape = false;
            }
            '\\' if in_single || in_double => {
                cur.push(ch);
                escape = true;
            }
            '\\' => {
                parts.push(cur);
                cur = String::new();
            }
            '\'' if !in_double => {
                in_single = !in_single;
                cur.push(ch);
            }
            '"' if !in_single => {
                in_double = !in_double;
                cur.push(ch);
            }
            _ => cur.push(ch),
        }
    }
    parts.push(cur);
    parts
}

/// Find `target` at nesting depth zero, outside quotes, starting at `from`.
///
/// Parentheses and square brackets both count as nesting. A closing bracket
/// that is itself the target is reported before the depth is adjusted.
pub fn find_top_level(text: &str, target: u8, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_single = false;
    let mut in_double = false;
    let mut escape = false;
    let mut idx = from;
    while idx < bytes.len() {
        let c = bytes[idx];
        if escape {
            escape = false;
            idx += 1;
            continue;
        }
        if in_single || in_double {
            match c {
                b'\\' => escape = true,
                b'\'' if in_single => in_single = false,
                b'"' if in_double => in_double = false,
                _ => {}
            }
            idx += 1;
            continue;
        }
        if depth == 0 && c == target {
            return Some(idx);
        }
        match c {
            b'\'' => in_single = true,
            b'"' => in_double = true,
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
        idx += 1;
    }
    None
}

/// True when `target` occurs outside quotes anywhere in `text`.
pub fn contains_unquoted(text: &str, target: u8) -> bool {
    let bytes = text.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut escape = false;
    for &c in bytes {
        match c {
            _ if escape => escape = false,
            b'\\' if in_single || in_double => escape = true,
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => in_double = !in_double,
            _ if c == target && !in_single && !in_double => return true,
            _ => {}
        }
    }
    false
}

/// Split on `sep` at nesting depth zero, outside quotes. Pieces are trimmed.
pub fn split_top_level(text: &str, sep: u8) -> Vec<String> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    while let Some(idx) = find_top_level(text, sep, start) {
        parts.push(text[start..idx].trim().to_string());
        start = idx + 1;
    }
    parts.push(text[start..].trim().to_string());
    parts
}

/// Rewrite every unquoted name in `text` for which `map` returns a
/// replacement. Numeric tokens are skipped whole so `0x1F` is never read as
/// a name.
pub fn map_names<F>(text: &str, mut map: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut in_single = false;
    let mut in_double = false;
    let mut escape = false;
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i];
        if in_single || in_double {
            match c {
                _ if escape => escape = false,
                b'\\' => escape = true,
                b'\'' if in_single => in_single = false,
                b'"' if in_double => in_double = false,
                _ => {}
            }
            let ch_len = text[i..].chars().next().map(char::len_utf8).unwrap_or(1);
            out.push_str(&text[i..i + ch_len]);
            i += ch_len;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
                i += 1;
            }
            out.push_str(&text[start..i]);
            continue;
        }
        if is_name_start(c) {
            let start = i;
            i += 1;
            while i < bytes.len() && is_name_char(bytes[i]) {
                i += 1;
            }
            let name = &text[start..i];
            match map(name) {
                Some(replacement) => out.push_str(&replacement),
                None => out.push_str(name),
            }
            continue;
        }
        match c {
            b'\'' => in_single = true,
            b'"' => in_double = true,
            _ => {}
        }
        // Non-ASCII bytes are copied through as whole characters.
        let ch_len = text[i..].chars().next().map(char::len_utf8).unwrap_or(1);
        out.push_str(&text[i..i + ch_len]);
        i += ch_len;
    }
    out
}

/// Strip one pair of matching quotes or angle brackets. Returns the inner
/// text and whether angle brackets were used.
pub fn unquote_path(text: &str) -> (&str, bool) {
    let t = text.trim();
    let bytes = t.as_bytes();
    if bytes.len() >= 2 {
        match (bytes[0], bytes[bytes.len() - 1]) {
            (b'"', b'"') | (b'\'', b'\'') => return (&t[1..t.len() - 1], false),
            (b'<', b'>') => return (&t[1..t.len() - 1], true),
            _ => {}
        }
    }
    (t, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_name_start() {
        assert!(is_name_start(b'a'));
        assert!(is_name_start(b'Z'));
        assert!(is_name_start(b'_'));
        assert!(is_name_start(b'.'));
        assert!(!is_name_start(b'0'));
        assert!(!is_name_start(b'$'));
    }

    #[test]
    fn test_split_comment() {
        assert_eq!(split_comment("code ; comment"), ("code ", "; comment"));
        assert_eq!(split_comment("no comment"), ("no comment", ""));
        assert_eq!(
            split_comment("\"str;ing\" ; comment"),
            ("\"str;ing\" ", "; comment")
        );
        assert_eq!(
            split_comment("'c;har' ; comment"),
            ("'c;har' ", "; comment")
        );
    }

    #[test]
    fn normalize_collapses_whitespace_outside_quotes() {
        assert_eq!(normalize_line("  SET\tA,   1   ; load"), "SET A, 1");
        assert_eq!(normalize_line(".dat \"a   b\"  "), ".dat \"a   b\"");
        assert_eq!(normalize_line("   ; only a comment"), "");
    }

    #[test]
    fn splits_unquoted_backslash() {
        assert_eq!(
            split_continuations("SET A, 1 \\ SET B, '\\\\'"),
            vec!["SET A, 1 ".to_string(), " SET B, '\\\\'".to_string()]
        );
        assert_eq!(split_continuations("SET A, 1").len(), 1);
    }

    #[test]
    fn find_top_level_skips_nested_and_quoted() {
        assert_eq!(find_top_level("[A+1], 2", b',', 0), Some(5));
        assert_eq!(find_top_level("(1,2),3", b',', 0), Some(5));
        assert_eq!(find_top_level("',' , x", b',', 0), Some(4));
        assert_eq!(find_top_level("label+1]", b']', 0), Some(7));
        assert_eq!(find_top_level("(a+b)+c", b'+', 0), Some(5));
        assert_eq!(find_top_level("abc", b'+', 0), None);
    }

    #[test]
    fn split_top_level_respects_nesting() {
        assert_eq!(
            split_top_level("a, (b, c), \"d,e\"", b','),
            vec!["a".to_string(), "(b, c)".to_string(), "\"d,e\"".to_string()]
        );
    }

    #[test]
    fn contains_unquoted_ignores_strings() {
        assert!(contains_unquoted("label: SET A, 1", b':'));
        assert!(!contains_unquoted(".dat \"a:b\"", b':'));
    }

    #[test]
    fn map_names_rewrites_whole_names_only() {
        let out = map_names(".loop + 0x1F + 'x' + loopy", |name| {
            (name == ".loop").then(|| "main_loop".to_string())
        });
        assert_eq!(out, "main_loop + 0x1F + 'x' + loopy");
    }

    #[test]
    fn unquote_path_variants() {
        assert_eq!(unquote_path("\"lib/a.dasm\""), ("lib/a.dasm", false));
        assert_eq!(unquote_path("'a.dasm'"), ("a.dasm", false));
        assert_eq!(unquote_path("<std.dasm>"), ("std.dasm", true));
        assert_eq!(unquote_path("plain.dasm"), ("plain.dasm", false));
    }
}
