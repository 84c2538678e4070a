use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;
use regex::Regex;

use crate::core::{DbError, Result, RowKey, Value};

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(r"[\p{L}\p{N}]+").expect("valid token regex");
}

/// Splits text into lowercase word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|token| token.as_str().to_lowercase())
        .collect()
}

/// Inverted index over the full-text columns of one table.
///
/// Any schema change touching a full-text column leaves the catalog stale
/// until [`FullTextCatalog::rebuild`] runs; a stale catalog refuses searches.
#[derive(Debug, Clone, Default)]
pub struct FullTextCatalog {
    postings: BTreeMap<String, BTreeSet<RowKey>>,
    stale: bool,
}

impl FullTextCatalog {
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
        self.postings.clear();
    }

    pub fn rebuild<'a, I>(&mut self, documents: I)
    where
        I: IntoIterator<Item = (&'a RowKey, Vec<&'a Value>)>,
    {
        self.postings.clear();
        for (key, values) in documents {
            self.add(key, &values);
        }
        self.stale = false;
    }

    pub fn add(&mut self, key: &RowKey, values: &[&Value]) {
        if self.stale {
            return;
        }
        for value in values {
            if let Value::Text(text) = value {
                for token in tokenize(text) {
                    self.postings.entry(token).or_default().insert(key.clone());
                }
            }
        }
    }

    pub fn remove(&mut self, key: &RowKey) {
        if self.stale {
            return;
        }
        self.postings.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
    }

    /// Keys of rows containing every token of `query`.
    pub fn search(&self, table: &str, query: &str) -> Result<BTreeSet<RowKey>> {
        if self.stale {
            return Err(DbError::ExecutionError(format!(
                "full-text catalog of table '{}' is stale and must be rebuilt",
                table
            )));
        }
        let mut result: Option<BTreeSet<RowKey>> = None;
        for token in tokenize(query) {
            let keys = self.postings.get(&token).cloned().unwrap_or_default();
            result = Some(match result {
                Some(current) => current.intersection(&keys).cloned().collect(),
                None => keys,
            });
        }
        Ok(result.unwrap_or_default())
    }
}
