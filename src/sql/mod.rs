pub mod fingerprint;
pub mod token;

pub use fingerprint::fingerprint;
pub use token::{insert_table_name, is_comment_token, strip_comment_hint, table_name, tokenize};
