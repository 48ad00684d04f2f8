use crate::error::{DocmergeError, Result};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// A key path that could not be resolved against a [`DataSet`].
///
/// Failures are plain values: the engine collects them instead of stopping
/// at the first one, so every missing key of a template is reported at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNotFound {
    key: String,
    location: String,
}

impl KeyNotFound {
    pub fn new(key: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            location: location.into(),
        }
    }

    /// The full dotted key that was requested
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The path segment at which resolution stopped
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for KeyNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at {})", self.key, self.location)
    }
}

impl std::error::Error for KeyNotFound {}

impl Serialize for KeyNotFound {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Input values for one generation, queried by dotted key path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSet {
    values: Map<String, Value>,
}

impl DataSet {
    /// Wraps a JSON value, which must be an object
    ///
    /// # Errors
    ///
    /// Returns `DocmergeError::InvalidData` for anything but a JSON object.
    pub fn new(value: Value) -> Result<Self> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            other => Err(DocmergeError::InvalidData {
                message: format!("expected a JSON object, got {}", kind_of(&other)),
            }),
        }
    }

    #[must_use]
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Data set for one iteration of a sequence block.
    ///
    /// Object elements are used directly; scalars are exposed as `item`.
    #[must_use]
    pub fn for_element(element: &Value) -> Self {
        match element {
            Value::Object(values) => Self::from_map(values.clone()),
            other => {
                let mut values = Map::new();
                values.insert("item".to_string(), other.clone());
                Self { values }
            }
        }
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Resolves a dotted key path. Decimal segments index into arrays.
    ///
    /// # Errors
    ///
    /// Returns the failure for the first segment that cannot be followed.
    pub fn fetch(&self, key: &str) -> std::result::Result<&Value, KeyNotFound> {
        let mut current: Option<&Value> = None;
        for segment in key.split('.') {
            let next = match current {
                None => self.values.get(segment),
                Some(Value::Object(map)) => map.get(segment),
                Some(Value::Array(items)) => {
                    segment.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                Some(_) => None,
            };
            current = Some(next.ok_or_else(|| KeyNotFound::new(key, segment))?);
        }
        current.ok_or_else(|| KeyNotFound::new(key, key))
    }
}

/// Truthiness used by conditional blocks and checkboxes.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Text written into the document for a resolved value.
#[must_use]
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
