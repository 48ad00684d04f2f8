//! Value filters applied to merge field values after lookup.
//!
//! Filters are written after the key, separated by `|`:
//! `MERGEFIELD "price | currency($)"`.

use crate::error::{DocmergeError, Result};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;

/// The closed set of known filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// `currency(symbol)`: two decimals, thousands separators, symbol prefix
    Currency,
    Upcase,
    Downcase,
    Capitalize,
    Titleize,
    Reverse,
}

impl FromStr for Filter {
    type Err = DocmergeError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "currency" => Ok(Self::Currency),
            "upcase" => Ok(Self::Upcase),
            "downcase" => Ok(Self::Downcase),
            "capitalize" => Ok(Self::Capitalize),
            "titleize" => Ok(Self::Titleize),
            "reverse" => Ok(Self::Reverse),
            other => Err(DocmergeError::UnknownFilter {
                name: other.to_string(),
            }),
        }
    }
}

impl Filter {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Currency => "currency",
            Self::Upcase => "upcase",
            Self::Downcase => "downcase",
            Self::Capitalize => "capitalize",
            Self::Titleize => "titleize",
            Self::Reverse => "reverse",
        }
    }

    /// Applies the filter. Values the filter does not understand pass through.
    #[must_use]
    pub fn apply(self, value: &Value, arguments: &[String]) -> Value {
        match self {
            Self::Currency => currency(value, arguments),
            Self::Upcase => map_string(value, str::to_uppercase),
            Self::Downcase => map_string(value, str::to_lowercase),
            Self::Capitalize => map_string(value, capitalize),
            Self::Titleize => map_string(value, titleize),
            Self::Reverse => map_string(value, |s| s.chars().rev().collect()),
        }
    }
}

/// One filter invocation with its literal arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterCall {
    pub filter: Filter,
    pub arguments: Vec<String>,
}

impl FilterCall {
    /// Parses `name` or `name(arg, ...)`.
    ///
    /// # Errors
    ///
    /// - `DocmergeError::UnknownFilter` if the name is not a known filter.
    /// - `DocmergeError::Regex` if the call pattern fails to compile.
    pub fn parse(segment: &str) -> Result<Self> {
        let pattern = Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\((.*)\))?\s*$")?;
        let Some(captures) = pattern.captures(segment) else {
            return Err(DocmergeError::UnknownFilter {
                name: segment.trim().to_string(),
            });
        };

        let filter = captures
            .get(1)
            .map_or("", |m| m.as_str())
            .parse::<Filter>()?;
        // Quoted arguments are taken verbatim so they may hold commas or spaces
        let argument = Regex::new(r#"\s*(?:"([^"]*)"|'([^']*)'|([^,]+))"#)?;
        let arguments = captures
            .get(2)
            .map(|args| {
                argument
                    .captures_iter(args.as_str())
                    .filter_map(|arg| match arg.get(1).or_else(|| arg.get(2)) {
                        Some(quoted) => Some(quoted.as_str().to_string()),
                        None => arg
                            .get(3)
                            .map(|bare| bare.as_str().trim().to_string())
                            .filter(|bare| !bare.is_empty()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self { filter, arguments })
    }

    #[must_use]
    pub fn apply(&self, value: &Value) -> Value {
        self.filter.apply(value, &self.arguments)
    }
}

fn map_string(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        other => other.clone(),
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn currency(value: &Value, arguments: &[String]) -> Value {
    let Some(number) = numeric(value) else {
        return value.clone();
    };

    let formatted = format!("{number:.2}");
    let (integer, fractional) = formatted.split_once('.').unwrap_or((&formatted, "00"));
    let symbol = arguments.first().map_or("", String::as_str);

    Value::String(format!(
        "{symbol}{}.{fractional}",
        group_thousands(integer)
    ))
}

fn group_thousands(integer: &str) -> String {
    let (sign, digits) = match integer.strip_prefix('-') {
        Some(digits) => ("-", digits),
        None => ("", integer),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    format!("{sign}{grouped}")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn titleize(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_whitespace() {
            at_word_start = true;
            result.push(c);
        } else if at_word_start {
            at_word_start = false;
            result.extend(c.to_uppercase());
        } else {
            result.extend(c.to_lowercase());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dollars(value: Value) -> Value {
        Filter::Currency.apply(&value, &["$".to_string()])
    }

    #[test]
    fn test_currency_formatting() {
        assert_eq!(dollars(json!(1234.5)), json!("$1,234.50"));
        assert_eq!(dollars(json!(0)), json!("$0.00"));
        assert_eq!(dollars(json!(999)), json!("$999.00"));
        assert_eq!(dollars(json!(1_234_567.891)), json!("$1,234,567.89"));
        assert_eq!(dollars(json!(-1234.5)), json!("$-1,234.50"));
    }

    #[test]
    fn test_currency_numeric_strings() {
        assert_eq!(dollars(json!("1234.5")), json!("$1,234.50"));
        assert_eq!(dollars(json!(" 12 ")), json!("$12.00"));
    }

    #[test]
    fn test_currency_passes_non_numeric_through() {
        assert_eq!(dollars(json!("N/A")), json!("N/A"));
        assert_eq!(dollars(json!("NaN")), json!("NaN"));
        assert_eq!(dollars(json!(null)), json!(null));
        assert_eq!(dollars(json!(true)), json!(true));
    }

    #[test]
    fn test_currency_without_symbol() {
        assert_eq!(Filter::Currency.apply(&json!(5), &[]), json!("5.00"));
    }

    #[test]
    fn test_string_filters() {
        let value = json!("hello wORLD");
        assert_eq!(Filter::Upcase.apply(&value, &[]), json!("HELLO WORLD"));
        assert_eq!(Filter::Downcase.apply(&value, &[]), json!("hello world"));
        assert_eq!(Filter::Capitalize.apply(&value, &[]), json!("Hello world"));
        assert_eq!(Filter::Titleize.apply(&value, &[]), json!("Hello World"));
        assert_eq!(Filter::Reverse.apply(&value, &[]), json!("DLROw olleh"));
        assert_eq!(Filter::Upcase.apply(&json!(12), &[]), json!(12));
    }

    #[test]
    fn test_parse_filter_call() {
        let call = FilterCall::parse(" currency($) ").unwrap();
        assert_eq!(call.filter, Filter::Currency);
        assert_eq!(call.arguments, vec!["$".to_string()]);

        let call = FilterCall::parse("currency(\"EUR \")").unwrap();
        assert_eq!(call.arguments, vec!["EUR ".to_string()]);

        let call = FilterCall::parse("currency(\",\")").unwrap();
        assert_eq!(call.arguments, vec![",".to_string()]);

        let call = FilterCall::parse("currency(\"a, b\", 'c' , d)").unwrap();
        assert_eq!(
            call.arguments,
            vec!["a, b".to_string(), "c".to_string(), "d".to_string()]
        );

        let call = FilterCall::parse("upcase").unwrap();
        assert_eq!(call.filter, Filter::Upcase);
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn test_parse_unknown_filter() {
        assert!(matches!(
            FilterCall::parse("shout"),
            Err(DocmergeError::UnknownFilter { name }) if name == "shout"
        ));
        assert!(matches!(
            FilterCall::parse("not a filter"),
            Err(DocmergeError::UnknownFilter { .. })
        ));
    }

    #[test]
    fn test_filter_names_round_trip() {
        for filter in [
            Filter::Currency,
            Filter::Upcase,
            Filter::Downcase,
            Filter::Capitalize,
            Filter::Titleize,
            Filter::Reverse,
        ] {
            assert_eq!(filter.name().parse::<Filter>().unwrap(), filter);
        }
    }
}
