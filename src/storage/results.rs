use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{HarvestError, StoreError};

/// One solution of a SELECT query, variable name to plain value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(HashMap<String, String>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used by backends that assemble rows themselves
    pub fn with(mut self, var: &str, value: impl Into<String>) -> Self {
        self.0.insert(var.to_string(), value.into());
        self
    }

    pub fn get(&self, var: &str) -> Option<&str> {
        self.0.get(var).map(String::as_str)
    }

    /// Get a variable that the query always binds
    pub fn require(&self, var: &str) -> Result<&str, StoreError> {
        self.get(var)
            .ok_or_else(|| StoreError::Decode(format!("missing binding for ?{}", var)))
    }

    /// Parse a numeric binding such as the result of COUNT
    pub fn count(&self, var: &str) -> Result<usize, StoreError> {
        let raw = self.require(var)?;
        raw.parse::<usize>()
            .map_err(|_| StoreError::Decode(format!("?{} is not a count: {}", var, raw)))
    }
}

/// Result of a read query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Rows(Vec<Row>),
    Boolean(bool),
}

#[derive(Deserialize)]
struct SparqlResponse {
    #[serde(default)]
    results: Option<SparqlBindings>,
    #[serde(default)]
    boolean: Option<bool>,
}

#[derive(Deserialize)]
struct SparqlBindings {
    bindings: Vec<HashMap<String, SparqlTerm>>,
}

#[derive(Deserialize)]
struct SparqlTerm {
    value: String,
}

impl QueryResult {
    /// Decode the SPARQL 1.1 JSON results format
    pub fn from_json(body: &str) -> Result<Self, StoreError> {
        let response: SparqlResponse =
            serde_json::from_str(body).map_err(|e| StoreError::Decode(e.to_string()))?;

        match (response.results, response.boolean) {
            (Some(results), _) => Ok(QueryResult::Rows(
                results
                    .bindings
                    .into_iter()
                    .map(|binding| {
                        Row(binding
                            .into_iter()
                            .map(|(var, term)| (var, term.value))
                            .collect())
                    })
                    .collect(),
            )),
            (None, Some(answer)) => Ok(QueryResult::Boolean(answer)),
            (None, None) => Err(StoreError::Decode(
                "response has neither bindings nor a boolean".to_string(),
            )),
        }
    }

    pub fn into_rows(self) -> Result<Vec<Row>, StoreError> {
        match self {
            QueryResult::Rows(rows) => Ok(rows),
            QueryResult::Boolean(_) => Err(StoreError::Decode(
                "expected bindings, got a boolean".to_string(),
            )),
        }
    }

    pub fn into_boolean(self) -> Result<bool, StoreError> {
        match self {
            QueryResult::Boolean(answer) => Ok(answer),
            QueryResult::Rows(_) => Err(StoreError::Decode(
                "expected a boolean, got bindings".to_string(),
            )),
        }
    }
}

/// Outcome of a lookup that expects exactly one row
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    Inconsistent(usize),
}

impl<T> Lookup<T> {
    pub fn from_rows(mut rows: Vec<T>) -> Self {
        match rows.len() {
            0 => Lookup::NotFound,
            1 => Lookup::Found(rows.remove(0)),
            n => Lookup::Inconsistent(n),
        }
    }

    /// Convert the found value, keeping the other variants
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Lookup<U>, E> {
        Ok(match self {
            Lookup::Found(value) => Lookup::Found(f(value)?),
            Lookup::NotFound => Lookup::NotFound,
            Lookup::Inconsistent(rows) => Lookup::Inconsistent(rows),
        })
    }

    /// Both NotFound and Inconsistent become errors
    pub fn require(self, entity: &'static str, key: &str) -> Result<T, HarvestError> {
        match self {
            Lookup::Found(value) => Ok(value),
            Lookup::NotFound => Err(HarvestError::NotFound {
                entity,
                key: key.to_string(),
            }),
            Lookup::Inconsistent(rows) => Err(HarvestError::Inconsistent {
                entity,
                key: key.to_string(),
                rows,
            }),
        }
    }
}
