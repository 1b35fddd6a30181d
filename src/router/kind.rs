/// Statement kind derived from the first routing token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtKind {
    Select,
    Delete,
    InsertOrReplace,
    Update,
    Set,
    Show,
    /// Anything else, including comment-hint tokens; routed to the default
    /// node on the master.
    Other,
}

/// Classify by the first token. Comment hints are not classifier input; the
/// routing decider inspects them on its own.
pub fn classify(first_token: &str) -> StmtKind {
    match first_token.to_lowercase().as_str() {
        "select" => StmtKind::Select,
        "delete" => StmtKind::Delete,
        "insert" | "replace" => StmtKind::InsertOrReplace,
        "update" => StmtKind::Update,
        "set" => StmtKind::Set,
        "show" => StmtKind::Show,
        _ => StmtKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_map_case_insensitively() {
        assert_eq!(classify("SELECT"), StmtKind::Select);
        assert_eq!(classify("select"), StmtKind::Select);
        assert_eq!(classify("Replace"), StmtKind::InsertOrReplace);
        assert_eq!(classify("INSERT"), StmtKind::InsertOrReplace);
        assert_eq!(classify("update"), StmtKind::Update);
        assert_eq!(classify("DELETE"), StmtKind::Delete);
        assert_eq!(classify("set"), StmtKind::Set);
        assert_eq!(classify("SHOW"), StmtKind::Show);
    }

    #[test]
    fn unknown_and_hint_tokens_are_other() {
        assert_eq!(classify("BEGIN"), StmtKind::Other);
        assert_eq!(classify("truncate"), StmtKind::Other);
        assert_eq!(classify("/*node1*/"), StmtKind::Other);
    }
}
