use std::fmt;

use async_graphql_parser::Pos;
use serde::{Deserialize, Serialize};

/// The result of executing a request, serialized as a GraphQL response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Absent when the request failed before execution started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ServerError>,
}

impl Response {
    pub(crate) fn from_errors(errors: impl IntoIterator<Item = ServerError>) -> Self {
        Response {
            data: None,
            errors: errors.into_iter().collect(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_json(self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<QueryPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ServerError {
    pub fn new(message: impl Into<String>) -> Self {
        ServerError {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            extensions: None,
        }
    }

    pub(crate) fn with_location(mut self, pos: Pos) -> Self {
        self.locations.push(pos.into());
        self
    }

    pub(crate) fn with_path(mut self, path: QueryPath) -> Self {
        self.path = Some(path);
        self
    }

    /// Attaches the field's position to an error raised for the field itself. Errors coming
    /// from deeper in its selection already carry theirs.
    pub(crate) fn at_field(self, pos: Pos, path: &QueryPath) -> Self {
        if self.path.is_some() {
            return self;
        }
        self.with_location(pos).with_path(path.clone())
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl From<Pos> for Location {
    fn from(pos: Pos) -> Self {
        Location {
            line: pos.line,
            column: pos.column,
        }
    }
}

/// Position of a value in the response, from the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryPath(im::Vector<QueryPathSegment>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryPathSegment {
    Index(usize),
    Field(String),
}

impl QueryPath {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn child(&self, segment: impl Into<QueryPathSegment>) -> Self {
        let mut child = self.clone();
        child.0.push_back(segment.into());
        child
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryPathSegment> {
        self.0.iter()
    }

    /// Whether this path is `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &QueryPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0.iter().zip(prefix.0.iter()).all(|(left, right)| left == right)
    }
}

impl fmt::Display for QueryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                QueryPathSegment::Index(index) => write!(f, "{index}")?,
                QueryPathSegment::Field(name) => f.write_str(name)?,
            }
        }
        Ok(())
    }
}

impl From<usize> for QueryPathSegment {
    fn from(index: usize) -> Self {
        QueryPathSegment::Index(index)
    }
}

impl From<&str> for QueryPathSegment {
    fn from(name: &str) -> Self {
        QueryPathSegment::Field(name.to_string())
    }
}
