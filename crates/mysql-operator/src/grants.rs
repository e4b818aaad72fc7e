//! Privilege sets and `SHOW GRANTS` parsing
//!
//! The backend reports grants as free-form lines such as
//! ``GRANT SELECT, INSERT ON `orders`.* TO `app`@`%` ``. Comparing those lines
//! as text breaks on ordering, case and quoting differences between server
//! versions, so both sides are reduced to a normalized [`PrivilegeSet`].

use crate::error::{OperatorError, Result};
use crate::security::{normalize_privilege, DATABASE_PRIVILEGES};
use std::collections::BTreeSet;
use std::fmt;

/// Privilege that stands for every schema-level privilege
pub const ALL_PRIVILEGES: &str = "ALL PRIVILEGES";

/// Privilege that `REVOKE ALL PRIVILEGES ON db.*` leaves in place
pub const GRANT_OPTION: &str = "GRANT OPTION";

/// A normalized set of database-level privileges.
///
/// Equality ignores order. The declaration order is kept so the `GRANT`
/// statement lists privileges the way the resource spelled them. Sets are
/// folded like the server folds them: `ALL PRIVILEGES` absorbs every other
/// schema-level privilege except `GRANT OPTION`.
#[derive(Debug, Clone, Default)]
pub struct PrivilegeSet {
    ordered: Vec<String>,
}

impl PrivilegeSet {
    /// Build a set from the privilege list of a resource spec.
    ///
    /// Every entry is validated against the privilege allow-list; duplicates
    /// are dropped.
    pub fn from_spec<S: AsRef<str>>(privileges: &[S]) -> Result<Self> {
        let mut set = Self::default();
        for privilege in privileges {
            set.insert(normalize_privilege(privilege.as_ref())?);
        }
        set.fold_all_privileges();
        Ok(set)
    }

    /// Collect the privileges granted on `database.*` from `SHOW GRANTS` output.
    ///
    /// Lines for other objects (`*.*`, other schemas, single tables) and role
    /// grants are ignored. A line that starts like a privilege grant but
    /// cannot be parsed is an error.
    pub fn from_grant_lines<S: AsRef<str>>(lines: &[S], database: &str) -> Result<Self> {
        let mut set = Self::default();
        for line in lines {
            if let Some(grant) = GrantLine::parse(line.as_ref())? {
                if grant.applies_to_database(database) {
                    for privilege in grant.privileges {
                        set.insert(privilege);
                    }
                }
            }
        }
        set.fold_all_privileges();
        Ok(set)
    }

    fn insert(&mut self, privilege: String) {
        if !self.ordered.contains(&privilege) {
            self.ordered.push(privilege);
        }
    }

    /// Reduce the set to `ALL PRIVILEGES` when it covers every schema-level
    /// privilege, keeping `GRANT OPTION` if present
    fn fold_all_privileges(&mut self) {
        let covers_all = self.contains(ALL_PRIVILEGES)
            || DATABASE_PRIVILEGES
                .iter()
                .filter(|p| **p != ALL_PRIVILEGES && **p != GRANT_OPTION)
                .all(|p| self.contains(p));
        if !covers_all {
            return;
        }

        let grant_option = self.contains(GRANT_OPTION);
        self.ordered = vec![ALL_PRIVILEGES.to_string()];
        if grant_option {
            self.ordered.push(GRANT_OPTION.to_string());
        }
    }

    /// Whether no privileges are present
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Number of distinct privileges
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Check membership of a normalized privilege
    pub fn contains(&self, privilege: &str) -> bool {
        self.ordered.iter().any(|p| p == privilege)
    }

    /// Iterate in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }

    /// Whether `GRANT OPTION` is part of the set
    pub fn with_grant_option(&self) -> bool {
        self.contains(GRANT_OPTION)
    }

    /// Whether anything besides `GRANT OPTION` is part of the set
    pub fn has_privileges(&self) -> bool {
        self.iter().any(|p| p != GRANT_OPTION)
    }

    /// Privilege list for a `GRANT` statement.
    ///
    /// `GRANT OPTION` is left out since it goes into a `WITH GRANT OPTION`
    /// clause; `USAGE` stands in when nothing else remains.
    pub fn to_sql_list(&self) -> String {
        if !self.has_privileges() {
            return "USAGE".to_string();
        }
        self.iter()
            .filter(|p| *p != GRANT_OPTION)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn as_sorted(&self) -> BTreeSet<&str> {
        self.iter().collect()
    }
}

impl PartialEq for PrivilegeSet {
    fn eq(&self, other: &Self) -> bool {
        self.as_sorted() == other.as_sorted()
    }
}

impl Eq for PrivilegeSet {}

impl fmt::Display for PrivilegeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "USAGE")
        } else {
            write!(f, "{}", self.ordered.join(","))
        }
    }
}

/// One privilege grant line from `SHOW GRANTS`
#[derive(Debug, Clone, PartialEq, Eq)]
struct GrantLine {
    privileges: Vec<String>,
    /// Unquoted schema name, `None` for `*.*`
    schema: Option<String>,
    /// Table part of the object, `*` for whole-schema grants
    table: String,
}

impl GrantLine {
    /// Parse a grant line; `Ok(None)` for lines that are not privilege grants
    fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim().trim_end_matches(';');
        let Some(rest) = strip_prefix_ignore_case(line, "GRANT ") else {
            return Ok(None);
        };

        let Some((privileges, rest)) = split_keyword(rest, " ON ") else {
            // Role grants have no ON clause: GRANT `role`@`%` TO `app`@`%`
            return Ok(None);
        };

        let (object, _account) =
            split_keyword(rest, " TO ").ok_or_else(|| parse_error(line, "missing TO clause"))?;

        if strip_prefix_ignore_case(object.trim(), "PROCEDURE ").is_some()
            || strip_prefix_ignore_case(object.trim(), "FUNCTION ").is_some()
        {
            return Ok(None);
        }

        let (schema, table) =
            parse_object(object.trim()).ok_or_else(|| parse_error(line, "unrecognized object"))?;

        let mut parsed = Vec::new();
        for privilege in split_privileges(privileges) {
            let normalized = privilege
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_ascii_uppercase();
            if normalized.is_empty() {
                return Err(parse_error(line, "empty privilege"));
            }
            if normalized != "USAGE" {
                parsed.push(normalized);
            }
        }

        if ends_with_ignore_case(line, "WITH GRANT OPTION") {
            parsed.push("GRANT OPTION".to_string());
        }

        Ok(Some(Self {
            privileges: parsed,
            schema,
            table,
        }))
    }

    fn applies_to_database(&self, database: &str) -> bool {
        self.table == "*"
            && self
                .schema
                .as_deref()
                .is_some_and(|schema| schema == database || unescape_wildcards(schema) == database)
    }
}

fn parse_error(line: &str, reason: &str) -> OperatorError {
    OperatorError::GrantParse {
        line: line.to_string(),
        reason: reason.to_string(),
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &value[prefix.len()..])
}

fn ends_with_ignore_case(value: &str, suffix: &str) -> bool {
    value.len() >= suffix.len()
        && value
            .get(value.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

/// Split at the first occurrence of `keyword` outside backticks, quotes and parentheses
fn split_keyword<'a>(value: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let bytes = value.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'`' | b'\'' | b'"' => quote = Some(b),
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                _ if depth == 0 => {
                    if let Some(candidate) = value.get(i..i + keyword.len()) {
                        if candidate.eq_ignore_ascii_case(keyword) {
                            return Some((&value[..i], &value[i + keyword.len()..]));
                        }
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Split the privilege list on commas outside column lists
fn split_privileges(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(value[start..].trim());
    parts
}

/// Parse `` `db`.* ``, `db.*`, `*.*` or `` `db`.`table` ``
fn parse_object(object: &str) -> Option<(Option<String>, String)> {
    let (schema, rest) = read_name(object)?;
    let rest = rest.strip_prefix('.')?;
    let (table, tail) = read_name(rest)?;
    if !tail.trim().is_empty() {
        return None;
    }
    let schema = if schema == "*" { None } else { Some(schema) };
    Some((schema, table))
}

/// Read one possibly backtick-quoted name, returning it unquoted and the rest
fn read_name(value: &str) -> Option<(String, &str)> {
    if let Some(quoted) = value.strip_prefix('`') {
        let mut name = String::new();
        let mut chars = quoted.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '`' {
                if matches!(chars.peek(), Some((_, '`'))) {
                    name.push('`');
                    chars.next();
                } else {
                    return Some((name, &quoted[i + 1..]));
                }
            } else {
                name.push(c);
            }
        }
        None
    } else {
        let end = value.find('.').unwrap_or(value.len());
        let name = &value[..end];
        if name.is_empty() {
            None
        } else {
            Some((name.to_string(), &value[end..]))
        }
    }
}

/// `SHOW GRANTS` escapes `_` and `%` in schema names granted as literals
fn unescape_wildcards(schema: &str) -> String {
    schema.replace("\\_", "_").replace("\\%", "%")
}
