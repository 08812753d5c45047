//! SQL identifier quoting.

/// Quote an identifier with double quotes (ANSI, Postgres, SQLite).
///
/// Embedded double quotes are doubled.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote an identifier with backticks (MySQL).
#[must_use]
pub fn quote_ident_mysql(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Default table name for a model: the class name lowercased.
#[must_use]
pub fn default_table_name(model_name: &str) -> String {
    model_name.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("hero"), "\"hero\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_ident_mysql("a`b"), "`a``b`");
    }

    #[test]
    fn test_default_table_name() {
        assert_eq!(default_table_name("HeroTeamLink"), "heroteamlink");
    }
}
