//! Canonical string form of an option list
//!
//! Options are rendered as a list literal: `["static", "debug", "ios"]`.
//! Strings are double-quoted with the usual escapes, so the rendering of a
//! list is injective and two lists hash the same only if they are equal
//! element-by-element and in order.
//!
//! The exact byte form matches the inspect rendering used by existing caches
//! (CocoaPods-generated digests), which keeps old cache directories valid.

use std::fmt::Write;

/// Render an ordered option list to its canonical string form.
pub fn render_list<S: AsRef<str>>(items: &[S]) -> String {
    let mut out = String::from("[");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        push_quoted(&mut out, item.as_ref());
    }
    out.push(']');
    out
}

fn push_quoted(out: &mut String, value: &str) {
    out.push('"');
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0c}' => out.push_str("\\f"),
            '\u{0b}' => out.push_str("\\v"),
            '\u{08}' => out.push_str("\\b"),
            '\u{07}' => out.push_str("\\a"),
            '\u{1b}' => out.push_str("\\e"),
            // Interpolation markers are escaped so the literal stays inert.
            '#' if matches!(chars.peek(), Some('{' | '$' | '@')) => out.push_str("\\#"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain_list() {
        assert_eq!(
            render_list(&["static", "debug", "ios"]),
            r#"["static", "debug", "ios"]"#
        );
    }

    #[test]
    fn test_render_empty_list() {
        let empty: [&str; 0] = [];
        assert_eq!(render_list(&empty), "[]");
    }

    #[test]
    fn test_render_escapes_quotes_and_backslashes() {
        assert_eq!(
            render_list(&[r#"-D FOO="bar""#, r"C:\path"]),
            r#"["-D FOO=\"bar\"", "C:\\path"]"#
        );
    }

    #[test]
    fn test_render_escapes_control_characters() {
        assert_eq!(render_list(&["a\nb\tc"]), r#"["a\nb\tc"]"#);
        assert_eq!(render_list(&["\u{1}"]), r#"["\u0001"]"#);
        assert_eq!(render_list(&["\u{7f}"]), r#"["\u007F"]"#);
    }

    #[test]
    fn test_render_escapes_interpolation_markers() {
        assert_eq!(
            render_list(&["#{x}", "#$y", "#@z", "#plain"]),
            r##"["\#{x}", "\#$y", "\#@z", "#plain"]"##
        );
    }

    #[test]
    fn test_render_keeps_non_ascii() {
        assert_eq!(render_list(&["café"]), "[\"café\"]");
    }

    #[test]
    fn test_render_is_injective_for_separator_lookalikes() {
        // One element containing the separator must not render like two elements.
        assert_ne!(render_list(&["a\", \"b"]), render_list(&["a", "b"]));
    }
}
