use crate::data_set::{DataSet, KeyNotFound};
use crate::error::{DocmergeError, Result};
use crate::filters::FilterCall;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

/// Whether a field is plain text or one end of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Simple,
    BlockStart,
    BlockEnd,
}

/// One `MERGEFIELD` placeholder, parsed from its field instruction.
///
/// ```
/// use docmerge::{MergeField, Role};
///
/// let field = MergeField::parse(r#" MERGEFIELD "start:animals" \* MERGEFORMAT "#).unwrap();
/// assert_eq!(field.raw_key(), "start:animals");
/// assert_eq!(field.key(), "animals");
/// assert_eq!(field.role(), Role::BlockStart);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeField {
    instruction: String,
    raw_key: String,
    key: String,
    role: Role,
    filters: Vec<FilterCall>,
}

/// Returns true if a field instruction denotes a merge field
#[must_use]
pub fn is_merge_field(instruction: &str) -> bool {
    instruction
        .trim_start()
        .get(..10)
        .is_some_and(|word| word.eq_ignore_ascii_case("MERGEFIELD"))
}

impl MergeField {
    /// Parses `MERGEFIELD name [| filter(args) ...] [\switches]`.
    ///
    /// # Errors
    ///
    /// - `DocmergeError::InvalidInstruction` if this is not a merge field or the name is empty.
    /// - `DocmergeError::UnknownFilter` if a filter name is not recognised.
    pub fn parse(instruction: &str) -> Result<Self> {
        let pattern = Regex::new(r#"(?is)^\s*MERGEFIELD\s+(?:"([^"]*)"|([^\\]*))"#)?;
        let invalid = || DocmergeError::InvalidInstruction {
            instruction: instruction.to_string(),
        };

        let captures = pattern.captures(instruction).ok_or_else(invalid)?;
        let name = captures
            .get(1)
            .or_else(|| captures.get(2))
            .map_or("", |m| m.as_str());

        let mut segments = name.split('|');
        let raw_key = segments.next().unwrap_or_default().trim().to_string();
        if raw_key.is_empty() {
            return Err(invalid());
        }
        let filters = segments
            .map(FilterCall::parse)
            .collect::<Result<Vec<_>>>()?;

        let (role, key) = if let Some(key) = raw_key.strip_prefix("start:") {
            (Role::BlockStart, key.to_string())
        } else if let Some(key) = raw_key.strip_prefix("end:") {
            (Role::BlockEnd, key.to_string())
        } else {
            (Role::Simple, raw_key.clone())
        };

        Ok(Self {
            instruction: instruction.to_string(),
            raw_key,
            key,
            role,
            filters,
        })
    }

    /// The instruction text this field was parsed from
    #[must_use]
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// The field name as written, including any `start:`/`end:` prefix
    #[must_use]
    pub fn raw_key(&self) -> &str {
        &self.raw_key
    }

    /// The data set key, without role prefix
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn filters(&self) -> &[FilterCall] {
        &self.filters
    }

    /// Looks the key up and runs the filter chain over the result.
    ///
    /// # Errors
    ///
    /// Returns the lookup failure; filters never fail.
    pub fn resolve(&self, data_set: &DataSet) -> std::result::Result<Value, KeyNotFound> {
        let value = data_set.fetch(&self.key)?;
        Ok(self
            .filters
            .iter()
            .fold(value.clone(), |value, call| call.apply(&value)))
    }
}
