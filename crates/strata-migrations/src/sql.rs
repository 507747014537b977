//! Raw SQL helpers.
//!
//! [`split_statements`] breaks a multi-statement SQL string into individual
//! statements for engines that execute one statement per call. It is a
//! heuristic splitter: it understands single-quoted strings (with `''`
//! escapes), double-quoted identifiers, `--` line comments and `/* */` block
//! comments. It does NOT understand `BEGIN ... END` bodies of triggers or
//! dollar-quoted function bodies; pass those as a single statement.

/// Splits `sql` into statements on top-level semicolons.
///
/// Comments are stripped, surrounding whitespace is trimmed, the terminating
/// semicolon is removed, and empty statements are dropped.
///
/// # Examples
///
/// ```
/// use strata_migrations::sql::split_statements;
///
/// let parts = split_statements("CREATE TABLE a(); CREATE TABLE b();");
/// assert_eq!(parts, vec!["CREATE TABLE a()", "CREATE TABLE b()"]);
/// ```
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                current.push(c);
                while let Some(inner) = chars.next() {
                    current.push(inner);
                    if inner == c {
                        // A doubled quote is an escaped quote, not the end.
                        if chars.peek() == Some(&c) {
                            if let Some(escaped) = chars.next() {
                                current.push(escaped);
                            }
                        } else {
                            break;
                        }
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                current.push(' ');
            }
            ';' => push_statement(&mut statements, &mut current),
            _ => current.push(c),
        }
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}
