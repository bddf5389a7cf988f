//! Minimal SQL scanning for migration bodies.
//!
//! Splits a body into top-level statements, treating quoted strings, quoted
//! identifiers, dollar-quoted bodies and comments as opaque. Comments are
//! dropped from the output.

/// Statements of `sql` split on top-level `;`, trimmed, empty ones skipped.
pub(crate) fn top_level_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < sql.len() {
        let rest = &sql[i..];
        i += if rest.starts_with("--") {
            current.push(' ');
            rest.find('\n').unwrap_or(rest.len())
        } else if rest.starts_with("/*") {
            current.push(' ');
            block_comment_len(rest)
        } else if rest.starts_with('\'') || rest.starts_with('"') {
            let len = quoted_len(rest);
            current.push_str(&rest[..len]);
            len
        } else if let Some(tag) = dollar_tag(rest, &current) {
            let len = rest[tag.len()..]
                .find(tag)
                .map_or(rest.len(), |end| end + 2 * tag.len());
            current.push_str(&rest[..len]);
            len
        } else if rest.starts_with(';') {
            flush(&mut statements, &mut current);
            1
        } else {
            let c = rest.chars().next().unwrap_or_default();
            current.push(c);
            c.len_utf8()
        };
    }
    flush(&mut statements, &mut current);

    statements
}

/// The first top-level statement in `sql` that opens or closes a
/// transaction, if any.
pub(crate) fn transaction_control(sql: &str) -> Option<String> {
    top_level_statements(sql)
        .into_iter()
        .find(|statement| is_transaction_control(statement))
}

fn is_transaction_control(statement: &str) -> bool {
    let mut words = statement.split_whitespace().map(str::to_ascii_uppercase);
    match words.next().as_deref() {
        Some("BEGIN" | "COMMIT" | "END" | "ROLLBACK" | "ABORT") => true,
        Some("START") => words.next().as_deref() == Some("TRANSACTION"),
        _ => false,
    }
}

fn flush(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_owned());
    }
    current.clear();
}

/// Length of the `'...'` or `"..."` token at the start of `rest`; a doubled
/// quote is an escaped quote.
fn quoted_len(rest: &str) -> usize {
    let bytes = rest.as_bytes();
    let quote = bytes[0];
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Length of the (possibly nested) `/* ... */` comment at the start of `rest`.
fn block_comment_len(rest: &str) -> usize {
    let bytes = rest.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// The opening `$tag$` at the start of `rest`, if it is one. `$1` parameters
/// and `$` inside identifiers are not tags.
fn dollar_tag<'a>(rest: &'a str, preceding: &str) -> Option<&'a str> {
    if !rest.starts_with('$')
        || preceding.ends_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    let close = rest[1..].find('$')? + 1;
    let tag = &rest[1..close];
    let valid = !tag.starts_with(|c: char| c.is_ascii_digit())
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| &rest[..=close])
}
