//! # docmerge
//!
//! A library and CLI tool for filling merge fields in Word (`.docx`) templates
//! from JSON data.
//!
//! ## Features
//!
//! - Replace `MERGEFIELD` placeholders in the body, headers, footers and numbering
//! - Repeat regions with `start:<key>` / `end:<key>` markers, or keep them conditionally
//! - Tick legacy form checkboxes from boolean data
//! - Format values with filters such as `currency($)` or `upcase`
//! - Report every missing key in one pass instead of stopping at the first
//! - Inspect a template's placeholder tree and the data shape it needs
//!
//! ## Usage
//!
//! ### As a Library
//!
//! ```no_run
//! use docmerge::{Docx, GenerateOptions};
//! use serde_json::json;
//!
//! let data = json!({ "first_name": "Ann", "items": [{ "name": "Tea", "price": 3 }] });
//! let docx = Docx::new("offer.docx", data).unwrap();
//!
//! match docx.generate("offer-ann.docx", &GenerateOptions::default()) {
//!     Ok(()) => println!("done"),
//!     Err(docmerge::DocmergeError::Merge(errors)) => eprintln!("missing keys: {errors}"),
//!     Err(e) => eprintln!("Error: {e}"),
//! }
//! ```
//!
//! ### As a CLI Tool
//!
//! ```bash
//! # Merge a template with a data file
//! docmerge offer.docx --data offer.json -o offer-ann.docx
//!
//! # List the data a template needs
//! docmerge offer.docx --required
//! ```

pub mod block;
pub mod check_box;
pub mod data_set;
pub mod docx;
pub mod engine;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod merge_field;
pub mod wml;
pub mod xml;

// Re-export main types and functions for convenience
pub use block::TreeNode;
pub use check_box::CheckBox;
pub use data_set::{DataSet, KeyNotFound};
pub use docx::{Docx, GenerateOptions, PartTree};
pub use error::{DocmergeError, MergeErrors, Result};
pub use filters::{Filter, FilterCall};
pub use merge_field::{MergeField, Role};
pub use wml::WmlFile;
