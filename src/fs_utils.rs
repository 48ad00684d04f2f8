use crate::error::{DocmergeError, Result};
use serde_json::Value;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Reads a JSON data set from `path`, or from stdin when `path` is `-`.
///
/// # Errors
///
/// - `DocmergeError::InvalidFile` if the path doesn't exist or isn't a file.
/// - `DocmergeError::Io` if there's an error reading the file.
/// - `DocmergeError::Json` if the content is not valid JSON.
pub fn read_data(path: &Path) -> Result<Value> {
    let content = if path == Path::new("-") {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        read_file_contents(path)?
    };
    parse_data(&content)
}

/// Parses a JSON data set.
///
/// # Errors
///
/// Returns `DocmergeError::Json` if `content` is not valid JSON.
pub fn parse_data(content: &str) -> Result<Value> {
    serde_json::from_str(content).map_err(Into::into)
}

/// Reads the contents of a file at the given path
///
/// # Errors
///
/// - `DocmergeError::InvalidFile` if the path doesn't exist or isn't a file.
/// - `DocmergeError::Io` if there's an error reading the file.
pub fn read_file_contents(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(DocmergeError::InvalidFile {
            path: path.to_path_buf(),
        });
    }

    fs::read_to_string(path).map_err(std::convert::Into::into)
}

/// Fails if `path` exists and overwriting was not requested.
///
/// # Errors
///
/// Returns `DocmergeError::OutputPathAlreadyExists`.
pub fn check_output_path(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(DocmergeError::OutputPathAlreadyExists {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// `report.docx` becomes `report.merged.docx` in the same directory.
#[must_use]
pub fn default_output_path(template: &Path) -> PathBuf {
    let stem = template
        .file_stem()
        .map_or_else(|| "document".into(), |stem| stem.to_string_lossy());
    let extension = template
        .extension()
        .map_or_else(|| "docx".into(), |ext| ext.to_string_lossy());
    template.with_file_name(format!("{stem}.merged.{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_read_file_contents() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("data.json");

        // Test reading existing file
        fs::write(&file_path, "{}").unwrap();
        let result = read_file_contents(&file_path);
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "{}");

        // Test reading non-existent file
        let non_existent = temp_dir.path().join("nonexistent.json");
        let result = read_file_contents(&non_existent);
        assert!(matches!(result, Err(DocmergeError::InvalidFile { .. })));

        // Test reading directory as file
        let dir_path = temp_dir.path().join("dir");
        fs::create_dir(&dir_path).unwrap();
        let result = read_file_contents(&dir_path);
        assert!(matches!(result, Err(DocmergeError::InvalidFile { .. })));
    }

    #[test]
    fn test_read_data() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("data.json");

        fs::write(&file_path, r#"{ "name": "Ann", "pets": ["owl"] }"#).unwrap();
        assert_eq!(
            read_data(&file_path).unwrap(),
            json!({ "name": "Ann", "pets": ["owl"] })
        );

        fs::write(&file_path, "{ not json").unwrap();
        assert!(matches!(read_data(&file_path), Err(DocmergeError::Json(_))));
    }

    #[test]
    fn test_read_data_unicode() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("unicode.json");

        fs::write(&file_path, r#"{ "greeting": "Здравствуй 🌍" }"#).unwrap();
        assert_eq!(
            read_data(&file_path).unwrap(),
            json!({ "greeting": "Здравствуй 🌍" })
        );
    }

    #[test]
    fn test_check_output_path() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("out.docx");

        assert!(check_output_path(&output, false).is_ok());

        fs::write(&output, "").unwrap();
        let result = check_output_path(&output, false);
        assert!(matches!(
            result,
            Err(DocmergeError::OutputPathAlreadyExists { .. })
        ));
        assert!(check_output_path(&output, true).is_ok());
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("letters/offer.docx")),
            PathBuf::from("letters/offer.merged.docx")
        );
        assert_eq!(
            default_output_path(Path::new("offer")),
            PathBuf::from("offer.merged.docx")
        );
    }
}
