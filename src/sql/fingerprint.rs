//! Statement canonicalization for the blacklist.
//!
//! Two statements that differ only in literals or spacing share a
//! fingerprint: whitespace runs collapse to one space, text outside string
//! literals is uppercased, numeric and string literals become `?`, and a
//! trailing `;` is dropped. Applying the function to its own output is a
//! no-op, so blacklist files may store either raw statements or canonical
//! forms.

/// Canonicalize one statement.
pub fn fingerprint(sql: &str) -> String {
    let sql = sql.trim().trim_end_matches(';').trim_end();
    let mut out = String::with_capacity(sql.len());
    let mut pending_space = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_whitespace() {
            if !out.is_empty() {
                pending_space = true;
            }
            continue;
        }

        if pending_space {
            out.push(' ');
            pending_space = false;
        }

        match c {
            '\'' | '"' => {
                consume_string(&mut chars, c);
                out.push('?');
            }
            _ if c.is_ascii_digit() && !ends_with_ident_char(&out) => {
                // swallow the rest of the literal (digits, decimals, hex)
                while matches!(chars.peek(), Some(&n) if n.is_ascii_alphanumeric() || n == '.') {
                    chars.next();
                }
                out.push('?');
            }
            _ => out.push(c.to_ascii_uppercase()),
        }
    }

    out
}

fn ends_with_ident_char(out: &str) -> bool {
    matches!(out.chars().last(), Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '?')
}

fn consume_string(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, quote: char) {
    while let Some(c) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c == quote {
            // doubled quote is an escaped quote, not the terminator
            if chars.peek() == Some(&quote) {
                chars.next();
            } else {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_uppercases() {
        assert_eq!(
            fingerprint("select *  from users\twhere id = 1"),
            "SELECT * FROM USERS WHERE ID = ?"
        );
    }

    #[test]
    fn masks_numeric_literals_only() {
        assert_eq!(fingerprint("select a from t1 where b=42"), "SELECT A FROM T1 WHERE B=?");
        assert_eq!(fingerprint("select 0x1f"), "SELECT ?");
        assert_eq!(fingerprint("select 3.14"), "SELECT ?");
    }

    #[test]
    fn masks_string_literals_with_escapes() {
        assert_eq!(
            fingerprint(r"select * from t where name='o\'brien'"),
            "SELECT * FROM T WHERE NAME=?"
        );
        assert_eq!(
            fingerprint("select * from t where name='it''s'"),
            "SELECT * FROM T WHERE NAME=?"
        );
        assert_eq!(
            fingerprint(r#"select * from t where name="abc""#),
            "SELECT * FROM T WHERE NAME=?"
        );
    }

    #[test]
    fn strips_trailing_semicolon() {
        assert_eq!(fingerprint("select 1;"), "SELECT ?");
        assert_eq!(fingerprint("select 1 ;  "), "SELECT ?");
    }

    #[test]
    fn idempotent() {
        for sql in [
            "select *  from users where id=42",
            "SELECT * FROM users WHERE id=?",
            "insert into t (a, b) values (1, 'x');",
            "update t set a='b' where c=3",
        ] {
            let once = fingerprint(sql);
            assert_eq!(fingerprint(&once), once, "input {sql:?}");
        }
    }

    #[test]
    fn matches_across_literal_variants() {
        let canonical = fingerprint("SELECT * FROM users WHERE id=?");
        assert_eq!(fingerprint("select *  from users where id=42"), canonical);
        assert_eq!(fingerprint("SELECT * FROM users WHERE id=1000"), canonical);
    }
}
