//! Lightweight call-site scanning over raw script text.
//!
//! Locates the call sites the instrumenter needs without parsing the
//! script: a textual occurrence of the callee counts as a call when it is
//! followed by `(` and is neither part of a longer identifier nor a
//! `function` definition header. Argument capture is quote- and
//! bracket-aware so nested calls and commas inside strings don't cut the
//! expression short.

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Find the last call of `callee` in source order and capture its first
/// top-level argument expression (trimmed, possibly empty for a zero-arg
/// call). Returns `None` when no call site exists.
pub fn last_call_argument(source: &str, callee: &str) -> Option<String> {
    let bytes = source.as_bytes();
    let mut result = None;
    for (idx, _) in source.match_indices(callee) {
        if !is_call_site(bytes, idx) {
            continue;
        }
        let mut i = idx + callee.len();
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'(' {
            result = Some(capture_argument(source, i + 1));
        }
    }
    result
}

/// Capture the first forwarded argument of the first reporter call that
/// starts with `prefix` (the rewritten console reporter; see the
/// instrumenter's console special case).
pub fn reported_argument(source: &str, prefix: &str) -> Option<String> {
    let idx = source.find(prefix)?;
    Some(capture_argument(source, idx + prefix.len()))
}

fn is_call_site(bytes: &[u8], idx: usize) -> bool {
    // Part of a longer identifier (`ungreet(`): not a call of `greet`.
    // A leading `.` is fine; method calls count.
    if idx > 0 && is_ident_byte(bytes[idx - 1]) {
        return false;
    }
    // `function greet(` is a definition header, not a call.
    let mut i = idx;
    while i > 0 && bytes[i - 1].is_ascii_whitespace() {
        i -= 1;
    }
    if i >= 8 && &bytes[i - 8..i] == b"function" && (i == 8 || !is_ident_byte(bytes[i - 9])) {
        return false;
    }
    true
}

/// Scan from just after an opening paren to the end of the first
/// top-level argument: a comma or closing bracket at depth zero ends it.
fn capture_argument(source: &str, start: usize) -> String {
    let bytes = source.as_bytes();
    let mut depth = 0u32;
    let mut quote: Option<u8> = None;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
        } else {
            match b {
                b'"' | b'\'' | b'`' => quote = Some(b),
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                b',' if depth == 0 => break,
                _ => {}
            }
        }
        i += 1;
    }
    source[start..i.min(bytes.len())].trim().to_string()
}
