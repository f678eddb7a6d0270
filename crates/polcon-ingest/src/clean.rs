//! Text cleaning.
//!
//! Only whitespace and invisible characters change; visible text is kept
//! byte-for-byte so evidence quotes stay verbatim.

/// Normalize line endings and whitespace, drop control characters.
pub fn clean_text(raw: &str) -> String {
    let mut mapped = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() != Some(&'\n') {
                    mapped.push('\n');
                }
            }
            '\u{2028}' | '\u{2029}' => mapped.push('\n'),
            '\t' | '\u{00A0}' | '\u{2007}' | '\u{202F}' => mapped.push(' '),
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' => {}
            c if c.is_control() && c != '\n' => {}
            c => mapped.push(c),
        }
    }

    let mut out = String::with_capacity(mapped.len());
    let mut blank_run = 0usize;
    for line in mapped.split('\n') {
        let collapsed = collapse_spaces(line.trim());
        if collapsed.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if blank_run > 0 {
                out.push('\n');
            }
        }
        blank_run = 0;
        out.push_str(&collapsed);
    }
    out
}

fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut prev_space = false;
    for c in line.chars() {
        if c == ' ' {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out
}

/// Share of characters that are control characters other than common whitespace.
pub(crate) fn control_ratio(raw: &str) -> f64 {
    let mut total = 0usize;
    let mut control = 0usize;
    for c in raw.chars() {
        total += 1;
        if c.is_control() && !matches!(c, '\n' | '\r' | '\t') {
            control += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        control as f64 / total as f64
    }
}
