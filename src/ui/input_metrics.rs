use unicode_width::UnicodeWidthChar;

const ESC: char = '\x1b';

pub fn truncate_to_display_width(text: &str, max_width: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;
    for ch in text.chars() {
        let ch_width = char_display_width(ch);
        if used + ch_width > max_width {
            break;
        }
        out.push(ch);
        used += ch_width;
    }
    out
}

pub fn char_display_width(ch: char) -> usize {
    UnicodeWidthChar::width(ch).unwrap_or(0)
}

pub fn display_width(text: &str) -> usize {
    text.chars().map(char_display_width).sum()
}

/// Display width ignoring ANSI CSI sequences (`ESC [ ... final`).
pub fn visible_width(text: &str) -> usize {
    let mut width = 0usize;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == ESC && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if ('@'..='~').contains(&next) {
                    break;
                }
            }
            continue;
        }
        width += char_display_width(ch);
    }
    width
}

/// Rows a block of text occupies on a terminal `cols` wide, counting soft wraps.
pub fn rows_spanned(text: &str, cols: usize) -> usize {
    let cols = cols.max(1);
    text.split('\n')
        .map(|line| visible_width(line).div_ceil(cols).max(1))
        .sum()
}

/// Greedy word wrap at whitespace. Words wider than `width` stay whole on
/// their own line; whitespace-only input yields an empty string.
pub fn wrap_words(line: &str, width: usize) -> String {
    let mut out = String::new();
    let mut current = 0usize;
    for word in line.split_whitespace() {
        let word_width = display_width(word);
        if current == 0 {
            out.push_str(word);
            current = word_width;
        } else if current + 1 + word_width <= width {
            out.push(' ');
            out.push_str(word);
            current += 1 + word_width;
        } else {
            out.push('\n');
            out.push_str(word);
            current = word_width;
        }
    }
    out
}
