//! Shallow SQL tokenization.
//!
//! Routing never parses a grammar; it walks whitespace/punctuation-delimited
//! tokens. The separator set deliberately excludes `/` and `*` so that a
//! leading `/*nodeName*/` hint survives as a single token.

/// Separator predicate for statement tokenization.
pub fn is_sql_sep(c: char) -> bool {
    c.is_ascii_whitespace() || matches!(c, ',' | '(' | ')' | ';' | '=')
}

/// Split a statement into routing tokens, dropping empty fields.
pub fn tokenize(sql: &str) -> Vec<&str> {
    sql.split(is_sql_sep).filter(|t| !t.is_empty()).collect()
}

/// True for tokens carrying a `/*...*/` node hint.
pub fn is_comment_token(token: &str) -> bool {
    token.starts_with('/')
}

/// Strip the `/*` and `*/` wrappers off a comment hint token.
pub fn strip_comment_hint(token: &str) -> &str {
    token.trim_matches(|c| c == '/' || c == '*')
}

/// Normalize a table token from a FROM/SET position: drop backticks and a
/// `db.` qualifier.
pub fn table_name(token: &str) -> &str {
    let token = token.trim_matches('`');
    match token.rsplit_once('.') {
        Some((_, table)) => table.trim_matches('`'),
        None => token,
    }
}

/// Normalize a table token from an INSERT/REPLACE INTO position. The column
/// list may still be glued to the name when the client wrote no space before
/// `(`; cut it off before the usual normalization.
pub fn insert_table_name(token: &str) -> &str {
    let token = match token.split_once('(') {
        Some((name, _)) => name,
        None => token,
    };
    table_name(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace_and_punctuation() {
        assert_eq!(
            tokenize("SELECT id, name FROM users WHERE id=1;"),
            vec!["SELECT", "id", "name", "FROM", "users", "WHERE", "id", "1"]
        );
    }

    #[test]
    fn comment_hint_stays_one_token() {
        let tokens = tokenize("/*node2*/ SELECT 1");
        assert_eq!(tokens[0], "/*node2*/");
        assert!(is_comment_token(tokens[0]));
        assert_eq!(strip_comment_hint(tokens[0]), "node2");
    }

    #[test]
    fn insert_column_list_is_cut() {
        // '(' is a separator, but a pathological token still normalizes
        assert_eq!(insert_table_name("users(id"), "users");
        assert_eq!(insert_table_name("`users`"), "users");
    }

    #[test]
    fn table_name_strips_qualifier_and_backticks() {
        assert_eq!(table_name("`users`"), "users");
        assert_eq!(table_name("shop.`users`"), "users");
        assert_eq!(table_name("shop.users"), "users");
        assert_eq!(table_name("users"), "users");
    }

    #[test]
    fn empty_statement_has_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   ;  ").is_empty());
    }
}
