//! Normalises captured client output for results and diagnostics.

use std::borrow::Cow;

pub(super) const STDERR_CHAR_LIMIT: usize = 2_048;
pub(super) const TRUNCATION_SUFFIX: &str = "… [truncated]";

/// Decodes standard output and strips trailing whitespace.
pub(super) fn decode_stdout(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_owned()
}

/// Decodes standard error without trailing whitespace, capping its length
/// so diagnostics stay readable.
pub(super) fn decode_stderr(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    truncate(Cow::Borrowed(text.trim_end()))
}

pub(super) fn truncate(text: Cow<'_, str>) -> String {
    let mut out = String::with_capacity(STDERR_CHAR_LIMIT + TRUNCATION_SUFFIX.len());
    let mut chars = text.chars();
    for _ in 0..STDERR_CHAR_LIMIT {
        match chars.next() {
            Some(ch) => out.push(ch),
            None => return text.into_owned(),
        }
    }

    if chars.next().is_none() {
        return text.into_owned();
    }

    out.push_str(TRUNCATION_SUFFIX);
    out
}
