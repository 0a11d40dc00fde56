use std::borrow::Cow;

use unicode_width::UnicodeWidthChar;

/// Ellipsis appended by [`truncate_to_width`]
const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Truncates a string to fit within a maximum display width.
///
/// Used to keep feed titles in log lines to a fixed column budget. Width is
/// measured in terminal columns, so CJK characters and emoji count double.
/// When truncation happens, "..." is appended and included in the budget;
/// widths too narrow for the ellipsis get a plain prefix.
///
/// # Examples
///
/// ```
/// use feedpipe::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    let mut width = 0;
    let mut fits_with_ellipsis = 0;
    let ellipsis_budget = max_width.saturating_sub(ELLIPSIS_WIDTH);

    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + w > max_width {
            if max_width <= ELLIPSIS_WIDTH {
                return Cow::Owned(s[..idx].to_string());
            }
            return Cow::Owned(format!("{}{}", &s[..fits_with_ellipsis], ELLIPSIS));
        }
        width += w;
        if width <= ellipsis_budget {
            fits_with_ellipsis = idx + c.len_utf8();
        }
    }

    Cow::Borrowed(s)
}

/// Truncates to at most `max_chars` characters, never splitting a code point
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Strip control characters and ANSI escape sequences from feed-supplied text.
///
/// Tab, newline and carriage return survive. Returns `Cow::Borrowed` when the
/// input is already clean.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| c == '\x7f' || (c < ' ' && !matches!(c, '\t' | '\n' | '\r'));

    if !s.chars().any(is_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.peek() {
                // CSI: parameters until a final byte in 0x40..=0x7e
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&c) {
                            break;
                        }
                    }
                }
                // OSC: until BEL or ST
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
        } else if !is_control(c) {
            out.push(c);
        }
    }

    Cow::Owned(out)
}

/// Remove markup tags from a feed title and collapse the whitespace they leave.
///
/// A `<` only opens a tag when a letter, `/` or `!` follows it and a `>`
/// closes it later; anything else is kept as text, so `x < y` survives.
/// This is not a sanitizer: it only makes titles like `<b>News</b>` readable.
pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(open) = rest.find('<') {
        let after = &rest[open + 1..];
        let opens_tag = after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!');
        match after.find('>') {
            Some(close) if opens_tag => {
                out.push_str(&rest[..open]);
                out.push(' ');
                rest = &after[close + 1..];
            }
            _ => {
                out.push_str(&rest[..=open]);
                rest = after;
            }
        }
    }
    out.push_str(rest);

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_truncation() {
        assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
        assert_eq!(truncate_to_width("Hello", 5), "Hello");
    }

    #[test]
    fn test_cjk_truncation() {
        // Each CJK character is 2 columns
        assert_eq!(truncate_to_width("你好世界", 7), "你好...");
        assert_eq!(truncate_to_width("你好世界", 8), "你好世界");
    }

    #[test]
    fn test_narrow_widths_have_no_ellipsis() {
        assert_eq!(truncate_to_width("Test", 0), "");
        assert_eq!(truncate_to_width("Test", 1), "T");
        assert_eq!(truncate_to_width("Test", 3), "Tes");
    }

    #[test]
    fn test_truncate_chars_respects_code_points() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_strip_clean_text_returns_borrowed() {
        assert!(matches!(strip_control_chars("plain title"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_ansi_and_controls() {
        assert_eq!(strip_control_chars("Evil\x1b[31m Feed\x07"), "Evil Feed");
        assert_eq!(strip_control_chars("a\x1b]0;title\x07b"), "ab");
        assert_eq!(strip_control_chars("tab\tkept\n"), "tab\tkept\n");
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("<b>Breaking</b> News"), "Breaking News");
        assert_eq!(strip_tags("  spaced   out "), "spaced out");
        assert_eq!(strip_tags("<!-- note -->Title"), "Title");
    }

    #[test]
    fn test_strip_tags_keeps_literal_angle_brackets() {
        assert_eq!(strip_tags("Why x < y matters"), "Why x < y matters");
        assert_eq!(strip_tags("a < b and c > d"), "a < b and c > d");
        assert_eq!(strip_tags("1<2 <i>really</i>"), "1<2 really");
        assert_eq!(strip_tags("Unclosed <b tag"), "Unclosed <b tag");
    }
}
