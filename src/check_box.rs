use crate::data_set::{DataSet, KeyNotFound, is_truthy};

/// A legacy form checkbox bound to a data set key by its form field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckBox {
    key: String,
}

impl CheckBox {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into().trim().to_string(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the box should be ticked.
    ///
    /// # Errors
    ///
    /// Returns the lookup failure if the key is missing.
    pub fn resolve(&self, data_set: &DataSet) -> Result<bool, KeyNotFound> {
        data_set.fetch(&self.key).map(is_truthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_checked_state() {
        let data = DataSet::new(json!({ "agreed": true, "opted_out": "false", "count": 3 })).unwrap();
        assert_eq!(CheckBox::new("agreed").resolve(&data), Ok(true));
        assert_eq!(CheckBox::new("opted_out").resolve(&data), Ok(false));
        assert_eq!(CheckBox::new(" count ").resolve(&data), Ok(true));
    }

    #[test]
    fn test_missing_key() {
        let data = DataSet::new(json!({})).unwrap();
        let err = CheckBox::new("agreed").resolve(&data).unwrap_err();
        assert_eq!(err.message(), "agreed (at agreed)");
    }
}
