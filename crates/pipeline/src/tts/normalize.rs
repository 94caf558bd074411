//! Text cleanup before synthesis

use once_cell::sync::Lazy;
use regex::Regex;

static DROPPED: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["'!]"#).unwrap());
static BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\n").unwrap());

/// Normalize model text for the speech backend
///
/// Quotes and `!` are removed, `°` is read as `度`, `~` becomes a full stop,
/// blank lines become a pause, and runs of a repeated non-CJK, non-digit
/// character (`...`, `——`, `**`) collapse to a single `。`.
pub fn normalize_for_speech(text: &str) -> String {
    let text = DROPPED.replace_all(text, "");
    let text = text.replace('°', "度").replace('~', "。");
    let text = BLANK_LINE.replace_all(&text, "，");
    collapse_repeats(&text)
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

fn collapse_repeats(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        if run > 1 && !is_cjk(c) && !c.is_numeric() {
            out.push('。');
        } else {
            out.extend(std::iter::repeat(c).take(run));
        }
        i += run;
    }
    out
}
