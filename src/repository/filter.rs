//! Candidate filter: `key=value` clauses joined by `and`. Empty query matches everything.
//!
//! `folder=/a/b` matches objects linked under that folder (prefix on path components); `id`, `name`
//! and `format` match those fields; any other key matches an attribute. Values may be double-quoted.

use anyhow::{Result, bail};

use super::RepoObject;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clause {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

/// Split on whitespace, keeping double-quoted runs together (quotes removed).
fn tokenize(input: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in input.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        bail!("unterminated quote in query {:?}", input);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

impl Query {
    pub fn parse(input: &str) -> Result<Self> {
        let mut clauses = Vec::new();
        let mut expect_clause = true;
        for token in tokenize(input)? {
            if token.eq_ignore_ascii_case("and") {
                if expect_clause {
                    bail!("misplaced 'and' in query {:?}", input);
                }
                expect_clause = true;
                continue;
            }
            let Some((key, value)) = token.split_once('=') else {
                bail!("expected key=value in query, got {:?}", token);
            };
            if key.is_empty() {
                bail!("empty key in query clause {:?}", token);
            }
            clauses.push(Clause {
                key: key.to_string(),
                value: value.to_string(),
            });
            expect_clause = false;
        }
        if expect_clause && !clauses.is_empty() {
            bail!("query ends with 'and': {:?}", input);
        }
        Ok(Self { clauses })
    }

    pub fn matches(&self, obj: &RepoObject) -> bool {
        self.clauses.iter().all(|c| clause_matches(c, obj))
    }
}

fn under_folder(path: &str, folder: &str) -> bool {
    let folder = folder.trim_end_matches('/');
    if folder.is_empty() {
        return true;
    }
    path == folder
        || path
            .strip_prefix(folder)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn clause_matches(clause: &Clause, obj: &RepoObject) -> bool {
    match clause.key.as_str() {
        "folder" => obj
            .folder_paths
            .iter()
            .any(|p| under_folder(p, &clause.value)),
        "format" => obj.format.eq_ignore_ascii_case(&clause.value),
        key => obj.attribute(key) == clause.value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj() -> RepoObject {
        RepoObject {
            id: "0900".into(),
            version_id: "0901".into(),
            name: "Annual Report".into(),
            format: "PDF".into(),
            folder_paths: vec!["/Finance/2024".into()],
            attributes: [("owner".to_string(), "ops team".to_string())].into(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_query_matches_all() {
        assert!(Query::parse("  ").unwrap().matches(&obj()));
    }

    #[test]
    fn folder_prefix_respects_components() {
        assert!(Query::parse("folder=/Finance").unwrap().matches(&obj()));
        assert!(Query::parse("folder=/Finance/").unwrap().matches(&obj()));
        assert!(!Query::parse("folder=/Fin").unwrap().matches(&obj()));
    }

    #[test]
    fn quoted_values_and_conjunction() {
        let q = Query::parse(r#"owner="ops team" and format=pdf"#).unwrap();
        assert_eq!(q.clauses.len(), 2);
        assert!(q.matches(&obj()));
        let q = Query::parse(r#"owner="ops team" AND name=Other"#).unwrap();
        assert!(!q.matches(&obj()));
    }

    #[test]
    fn malformed_queries_are_rejected() {
        assert!(Query::parse("folder").is_err());
        assert!(Query::parse("and folder=/a").is_err());
        assert!(Query::parse("folder=/a and").is_err());
        assert!(Query::parse(r#"name="open"#).is_err());
        assert!(Query::parse("=x").is_err());
    }
}
