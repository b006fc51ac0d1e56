//! Statement classification.
//!
//! # Responsibilities
//! - Extract leading keywords, skipping comments, quoted text and parentheses
//! - Map them onto the closed set of routing-relevant classes
//!
//! # Design Decisions
//! - No SQL parser: keyword prefixes are enough to pick a tier
//! - Anything not recognized as read-only or transaction control is ReadWrite
//! - Locking reads (`FOR UPDATE`, `FOR SHARE`, `LOCK IN SHARE MODE`) and
//!   `SELECT ... INTO` count as writes

use std::fmt;

/// Routing-relevant statement class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementClass {
    ReadOnly,
    ReadWrite,
    TransactionStart,
    TransactionEnd,
}

impl StatementClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementClass::ReadOnly => "read_only",
            StatementClass::ReadWrite => "read_write",
            StatementClass::TransactionStart => "transaction_start",
            StatementClass::TransactionEnd => "transaction_end",
        }
    }
}

impl fmt::Display for StatementClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enough keywords to decide every rule below.
const MAX_KEYWORDS: usize = 64;

/// Classify one statement.
pub fn classify(sql: &str) -> StatementClass {
    let words = keywords(sql, MAX_KEYWORDS);
    let Some(first) = words.first() else {
        return StatementClass::ReadWrite;
    };
    let has = |kw: &str| words.iter().any(|w| w == kw);

    match first.as_str() {
        "SELECT" => select_class(&words),
        "WITH" => {
            if ["INSERT", "UPDATE", "DELETE", "MERGE"].iter().any(|kw| has(kw)) {
                StatementClass::ReadWrite
            } else {
                select_class(&words)
            }
        }
        "SHOW" | "DESCRIBE" | "DESC" | "VALUES" | "TABLE" => StatementClass::ReadOnly,
        "EXPLAIN" => {
            if words.get(1).map(String::as_str) == Some("ANALYZE") {
                StatementClass::ReadWrite
            } else {
                StatementClass::ReadOnly
            }
        }
        "BEGIN" => StatementClass::TransactionStart,
        "START" if words.get(1).map(String::as_str) == Some("TRANSACTION") => {
            StatementClass::TransactionStart
        }
        "COMMIT" | "ROLLBACK" if has("PREPARED") => StatementClass::ReadWrite,
        "ROLLBACK" if has("TO") => StatementClass::ReadWrite,
        "COMMIT" | "ROLLBACK" | "END" | "ABORT" => StatementClass::TransactionEnd,
        "SET" => autocommit_class(&words).unwrap_or(StatementClass::ReadWrite),
        _ => StatementClass::ReadWrite,
    }
}

fn select_class(words: &[String]) -> StatementClass {
    let locking = words.windows(2).any(|pair| {
        matches!(
            (pair[0].as_str(), pair[1].as_str()),
            ("FOR", "UPDATE") | ("FOR", "SHARE") | ("FOR", "NO") | ("FOR", "KEY") | ("LOCK", "IN")
        )
    });
    if locking || words.iter().any(|w| w == "INTO") {
        StatementClass::ReadWrite
    } else {
        StatementClass::ReadOnly
    }
}

/// `SET [SESSION|LOCAL|GLOBAL] autocommit = 0|1|ON|OFF|TRUE|FALSE`.
fn autocommit_class(words: &[String]) -> Option<StatementClass> {
    let mut rest = words.iter().skip(1).map(String::as_str);
    let mut name = rest.next()?;
    if matches!(name, "SESSION" | "LOCAL" | "GLOBAL") {
        name = rest.next()?;
    }
    if name != "AUTOCOMMIT" {
        return None;
    }
    match rest.next()? {
        "0" | "OFF" | "FALSE" => Some(StatementClass::TransactionStart),
        "1" | "ON" | "TRUE" => Some(StatementClass::TransactionEnd),
        _ => None,
    }
}

/// Uppercased bare words of `sql`, in order, up to `limit`.
///
/// Comments (`--`, `#`, `/* */`) and quoted text ('...', "...", `...`) are
/// skipped; punctuation separates words.
fn keywords(sql: &str, limit: usize) -> Vec<String> {
    let mut words = Vec::new();
    let mut chars = sql.chars().peekable();
    let mut current = String::new();

    let flush = |current: &mut String, words: &mut Vec<String>| {
        if !current.is_empty() {
            words.push(current.to_ascii_uppercase());
            current.clear();
        }
    };

    while let Some(c) = chars.next() {
        if words.len() >= limit {
            break;
        }
        match c {
            '-' if chars.peek() == Some(&'-') => {
                flush(&mut current, &mut words);
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '#' => {
                flush(&mut current, &mut words);
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                flush(&mut current, &mut words);
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            '\'' | '"' | '`' => {
                flush(&mut current, &mut words);
                for q in chars.by_ref() {
                    if q == c {
                        break;
                    }
                }
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' => current.push(c),
            _ => flush(&mut current, &mut words),
        }
    }
    if words.len() < limit {
        flush(&mut current, &mut words);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use StatementClass::*;

    #[test]
    fn plain_reads() {
        assert_eq!(classify("SELECT * FROM orders WHERE id = 7"), ReadOnly);
        assert_eq!(classify("  select 1"), ReadOnly);
        assert_eq!(classify("SHOW TABLES"), ReadOnly);
        assert_eq!(classify("EXPLAIN SELECT * FROM t"), ReadOnly);
        assert_eq!(classify("WITH x AS (SELECT 1) SELECT * FROM x"), ReadOnly);
        assert_eq!(classify("(SELECT a FROM t) UNION (SELECT b FROM u)"), ReadOnly);
    }

    #[test]
    fn writes_and_unknowns() {
        assert_eq!(classify("UPDATE accounts SET balance = 0"), ReadWrite);
        assert_eq!(classify("INSERT INTO t VALUES (1)"), ReadWrite);
        assert_eq!(classify("CREATE TABLE t (id int)"), ReadWrite);
        assert_eq!(classify("VACUUM FULL"), ReadWrite);
        assert_eq!(classify("FLUSH PRIVILEGES"), ReadWrite);
        assert_eq!(classify(""), ReadWrite);
        assert_eq!(classify("-- only a comment"), ReadWrite);
        assert_eq!(classify("EXPLAIN ANALYZE DELETE FROM t"), ReadWrite);
        assert_eq!(
            classify("WITH gone AS (DELETE FROM t RETURNING *) SELECT * FROM gone"),
            ReadWrite
        );
    }

    #[test]
    fn locking_reads_are_writes() {
        assert_eq!(classify("SELECT * FROM t WHERE id = 1 FOR UPDATE"), ReadWrite);
        assert_eq!(classify("SELECT * FROM t FOR SHARE"), ReadWrite);
        assert_eq!(classify("SELECT * FROM t FOR NO KEY UPDATE"), ReadWrite);
        assert_eq!(classify("SELECT * FROM t LOCK IN SHARE MODE"), ReadWrite);
        assert_eq!(classify("SELECT id INTO @x FROM t"), ReadWrite);
    }

    #[test]
    fn transaction_control() {
        assert_eq!(classify("BEGIN"), TransactionStart);
        assert_eq!(classify("begin;"), TransactionStart);
        assert_eq!(classify("START TRANSACTION READ WRITE"), TransactionStart);
        assert_eq!(classify("COMMIT"), TransactionEnd);
        assert_eq!(classify("ROLLBACK"), TransactionEnd);
        assert_eq!(classify("END"), TransactionEnd);
        assert_eq!(classify("ABORT"), TransactionEnd);
        assert_eq!(classify("ROLLBACK TO SAVEPOINT s1"), ReadWrite);
        assert_eq!(classify("SAVEPOINT s1"), ReadWrite);
        assert_eq!(classify("COMMIT PREPARED 'tx1'"), ReadWrite);
        assert_eq!(classify("START SLAVE"), ReadWrite);
    }

    #[test]
    fn autocommit_toggles() {
        assert_eq!(classify("SET autocommit=0"), TransactionStart);
        assert_eq!(classify("SET SESSION autocommit = OFF"), TransactionStart);
        assert_eq!(classify("set @@autocommit = 1"), TransactionEnd);
        assert_eq!(classify("SET autocommit = ON"), TransactionEnd);
        assert_eq!(classify("SET search_path = app"), ReadWrite);
    }

    #[test]
    fn comments_and_literals_are_skipped() {
        assert_eq!(classify("/* audit */ SELECT 1"), ReadOnly);
        assert_eq!(classify("-- hint\nSELECT 1"), ReadOnly);
        assert_eq!(classify("# mysql style\nBEGIN"), TransactionStart);
        assert_eq!(classify("SELECT 'FOR UPDATE' FROM t"), ReadOnly);
        assert_eq!(classify("SELECT \"into\" FROM t"), ReadOnly);
    }
}
