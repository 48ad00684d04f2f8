//! Document archives: reading the template, resolving its parts and writing
//! the merged copy.

use crate::block::{TreeNode, deep_merge};
use crate::data_set::DataSet;
use crate::error::{DocmergeError, MergeErrors, Result};
use crate::fs_utils::check_output_path;
use crate::wml::{Interpolation, REPLACEABLE_PART, WmlFile};
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// Options for [`Docx::generate`]
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Overwrite an existing output file
    pub force: bool,
}

/// Placeholder tree of one archive part
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartTree {
    pub file: String,
    pub tree: Vec<TreeNode>,
}

#[derive(Debug, Clone)]
struct Part {
    /// Position of the entry in the archive
    index: usize,
    file: WmlFile,
}

/// A template archive together with the data it is merged with.
#[derive(Debug, Clone)]
pub struct Docx {
    path: PathBuf,
    archive: Vec<u8>,
    parts: Vec<Part>,
    data_set: DataSet,
}

impl Docx {
    /// Opens the template at `path` and binds it to `data`.
    ///
    /// # Errors
    ///
    /// - `DocmergeError::InvalidFile` if the archive is missing or unreadable.
    /// - `DocmergeError::InvalidData` if `data` is not a JSON object.
    /// - `DocmergeError::Io` if a replaceable part is not valid UTF-8.
    pub fn new(path: impl AsRef<Path>, data: Value) -> Result<Self> {
        let path = path.as_ref();
        let invalid_file = || DocmergeError::InvalidFile {
            path: path.to_path_buf(),
        };

        let archive = fs::read(path).map_err(|_| invalid_file())?;
        let parts = {
            let mut zip = ZipArchive::new(Cursor::new(archive.as_slice())).map_err(|_| invalid_file())?;
            let replaceable = Regex::new(REPLACEABLE_PART)?;
            let mut parts = Vec::new();
            for index in 0..zip.len() {
                let mut entry = zip.by_index(index)?;
                if !replaceable.is_match(entry.name()) {
                    continue;
                }
                let mut xml = String::new();
                entry.read_to_string(&mut xml)?;
                parts.push(Part {
                    index,
                    file: WmlFile::new(entry.name(), xml),
                });
            }
            parts
        };
        let data_set = DataSet::new(data)?;

        debug!(
            path = %path.display(),
            parts = parts.len(),
            "opened template"
        );

        Ok(Self {
            path: path.to_path_buf(),
            archive,
            parts,
            data_set,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of the parts whose placeholders are resolved
    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|part| part.file.name())
    }

    /// Writes the merged document to `output_path`.
    ///
    /// Nothing is written unless every placeholder of every part resolves.
    ///
    /// # Errors
    ///
    /// - `DocmergeError::OutputPathAlreadyExists` if the output exists and `force` is not set.
    /// - `DocmergeError::Merge` with every lookup failure across all parts.
    /// - `DocmergeError::Template`, `DocmergeError::UnknownFilter` or `DocmergeError::Xml`
    ///   for the first part that cannot be processed.
    /// - `DocmergeError::NotFullyReplaced` if a merge field survived resolution.
    /// - `DocmergeError::Io` or `DocmergeError::Zip` if the output cannot be written.
    pub fn generate(&self, output_path: impl AsRef<Path>, options: &GenerateOptions) -> Result<()> {
        let output_path = output_path.as_ref();
        check_output_path(output_path, options.force)?;

        let interpolations = self
            .parts
            .par_iter()
            .map(|part| part.file.interpolate(&self.data_set))
            .collect::<Vec<_>>()
            .into_iter()
            .collect::<Result<Vec<Interpolation>>>()?;

        let mut errors = MergeErrors::new();
        for interpolation in &interpolations {
            errors.merge(interpolation.errors.clone());
        }
        if !errors.is_empty() {
            warn!(
                template = %self.path.display(),
                keys = errors.len(),
                "merge failed"
            );
            return Err(DocmergeError::Merge(errors));
        }

        let mut rewritten = HashMap::new();
        for (part, interpolation) in self.parts.iter().zip(&interpolations) {
            if interpolation.unresolved > 0 {
                return Err(DocmergeError::NotFullyReplaced {
                    part: part.file.name().to_string(),
                });
            }
            if let Some(xml) = &interpolation.xml {
                rewritten.insert(part.index, xml.as_str());
            }
        }

        self.write_archive(output_path, &rewritten)?;
        info!(
            template = %self.path.display(),
            output = %output_path.display(),
            rewritten = rewritten.len(),
            "generated document"
        );
        Ok(())
    }

    /// Copies the template to `output_path`, swapping in rewritten parts.
    /// The archive is assembled next to the destination and moved into place
    /// once complete. An overwritten destination keeps its permissions.
    fn write_archive(&self, output_path: &Path, rewritten: &HashMap<usize, &str>) -> Result<()> {
        let directory = output_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut builder = tempfile::Builder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Same mode as any other new file once the umask applies
            builder.permissions(fs::Permissions::from_mode(0o666));
        }
        let mut temp = builder.tempfile_in(directory)?;
        if let Ok(existing) = fs::metadata(output_path) {
            temp.as_file().set_permissions(existing.permissions())?;
        }

        {
            let mut source = ZipArchive::new(Cursor::new(self.archive.as_slice()))?;
            let mut writer = ZipWriter::new(temp.as_file_mut());
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .last_modified_time(DateTime::default());

            for index in 0..source.len() {
                let entry = source.by_index_raw(index)?;
                match rewritten.get(&index) {
                    Some(xml) => {
                        let name = entry.name().to_string();
                        drop(entry);
                        writer.start_file(name, options)?;
                        writer.write_all(xml.as_bytes())?;
                    }
                    None => writer.raw_copy_file(entry)?,
                }
            }
            writer.finish()?;
        }

        temp.persist(output_path).map_err(|err| err.error)?;
        Ok(())
    }

    /// Placeholder trees of every replaceable part, in archive order.
    ///
    /// # Errors
    ///
    /// Returns parse, filter and block structure errors.
    pub fn to_tree(&self) -> Result<Vec<PartTree>> {
        self.parts
            .iter()
            .map(|part| {
                Ok(PartTree {
                    file: part.file.name().to_string(),
                    tree: part.file.to_tree()?,
                })
            })
            .collect()
    }

    /// The data shape needed by the whole document.
    ///
    /// # Errors
    ///
    /// Returns parse, filter and block structure errors.
    pub fn required_hash(&self) -> Result<Value> {
        let mut hash = Value::Object(Map::new());
        for part in &self.parts {
            deep_merge(&mut hash, part.file.required_hash()?);
        }
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const STYLES: &str = r#"<?xml version="1.0"?><w:styles xmlns:w="urn:w"/>"#;

    fn document_xml(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="urn:w"><w:body>{body}</w:body></w:document>"#
        )
    }

    fn field(raw_key: &str) -> String {
        format!(r#"<w:p><w:fldSimple w:instr=" MERGEFIELD {raw_key} "><w:r><w:t>«{raw_key}»</w:t></w:r></w:fldSimple></w:p>"#)
    }

    fn write_docx(dir: &TempDir, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.path().join("template.docx");
        let mut writer = ZipWriter::new(fs::File::create(&path).unwrap());
        for (name, content) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn read_entry(path: &Path, name: &str) -> String {
        let mut archive = ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
        let mut content = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut content).unwrap();
        content
    }

    #[test]
    fn test_missing_archive() {
        let err = Docx::new("definitely/not/a/real/path", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "File definitely/not/a/real/path not found");
    }

    #[test]
    fn test_not_an_archive() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("plain.docx");
        fs::write(&path, "not a zip").unwrap();
        assert!(matches!(
            Docx::new(&path, json!({})),
            Err(DocmergeError::InvalidFile { .. })
        ));
    }

    #[test]
    fn test_data_must_be_an_object() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_docx(&temp_dir, &[("word/document.xml", &document_xml(""))]);
        assert!(matches!(
            Docx::new(&path, json!([1, 2])),
            Err(DocmergeError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_only_replaceable_parts_are_loaded() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_docx(
            &temp_dir,
            &[
                ("[Content_Types].xml", "<Types/>"),
                ("word/document.xml", &document_xml("")),
                ("word/styles.xml", STYLES),
                ("word/header1.xml", &document_xml("")),
                ("word/footer.xml", &document_xml("")),
                ("word/numbering.xml", &document_xml("")),
            ],
        );
        let docx = Docx::new(&path, json!({})).unwrap();
        assert_eq!(
            docx.part_names().collect::<Vec<_>>(),
            vec![
                "word/document.xml",
                "word/header1.xml",
                "word/footer.xml",
                "word/numbering.xml"
            ]
        );
    }

    #[test]
    fn test_generate_replaces_and_copies() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_docx(
            &temp_dir,
            &[
                ("word/document.xml", &document_xml(&field("name"))),
                ("word/styles.xml", STYLES),
            ],
        );
        let output = temp_dir.path().join("out.docx");
        let docx = Docx::new(&path, json!({ "name": "Ann" })).unwrap();
        docx.generate(&output, &GenerateOptions::default()).unwrap();

        let document = read_entry(&output, "word/document.xml");
        assert!(document.contains("Ann"));
        assert!(!document.contains("MERGEFIELD"));
        assert!(document.starts_with(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#));
        assert_eq!(read_entry(&output, "word/styles.xml"), STYLES);
    }

    #[test]
    fn test_existing_output_is_left_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_docx(&temp_dir, &[("word/document.xml", &document_xml(&field("name")))]);
        let output = temp_dir.path().join("out.docx");
        fs::write(&output, "keep me").unwrap();

        let docx = Docx::new(&path, json!({ "name": "Ann" })).unwrap();
        let err = docx.generate(&output, &GenerateOptions::default()).unwrap_err();
        assert!(matches!(err, DocmergeError::OutputPathAlreadyExists { .. }));
        assert!(err.to_string().contains("already exists"));
        assert_eq!(fs::read_to_string(&output).unwrap(), "keep me");

        docx.generate(&output, &GenerateOptions { force: true }).unwrap();
        assert!(read_entry(&output, "word/document.xml").contains("Ann"));
    }

    #[test]
    fn test_failed_merge_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_docx(
            &temp_dir,
            &[
                ("word/header1.xml", &document_xml(&field("title"))),
                ("word/document.xml", &document_xml(&format!("{}{}", field("name"), field("title")))),
            ],
        );
        let output = temp_dir.path().join("out.docx");
        let docx = Docx::new(&path, json!({})).unwrap();

        match docx.generate(&output, &GenerateOptions::default()) {
            Err(DocmergeError::Merge(errors)) => {
                assert_eq!(errors.keys().collect::<Vec<_>>(), vec!["title", "name"]);
                assert_eq!(errors.get("title").map(<[_]>::len), Some(2));
            }
            other => panic!("expected merge errors, got {other:?}"),
        }
        assert!(!output.exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_leftover_field_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let split_field = concat!(
            r#"<w:p><w:r><w:fldChar w:fldCharType="begin"/></w:r>"#,
            r#"<w:r><w:instrText xml:space="preserve"> MERGEFIELD name </w:instrText></w:r></w:p>"#,
            r#"<w:p><w:r><w:fldChar w:fldCharType="separate"/></w:r><w:r><w:t>«name»</w:t></w:r>"#,
            r#"<w:r><w:fldChar w:fldCharType="end"/></w:r></w:p>"#
        );
        let path = write_docx(
            &temp_dir,
            &[
                ("word/header1.xml", &document_xml(&field("title"))),
                ("word/document.xml", &document_xml(split_field)),
            ],
        );
        let output = temp_dir.path().join("out.docx");
        let docx = Docx::new(&path, json!({ "name": "Ann", "title": "Offer" })).unwrap();

        match docx.generate(&output, &GenerateOptions::default()) {
            Err(DocmergeError::NotFullyReplaced { part }) => assert_eq!(part, "word/document.xml"),
            other => panic!("expected leftover fields, got {other:?}"),
        }
        assert!(!output.exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_output_permissions() {
        use std::os::unix::fs::PermissionsExt;

        fn mode(path: &Path) -> u32 {
            fs::metadata(path).unwrap().permissions().mode() & 0o777
        }

        let temp_dir = TempDir::new().unwrap();
        let path = write_docx(&temp_dir, &[("word/document.xml", &document_xml(&field("name")))]);
        let docx = Docx::new(&path, json!({ "name": "Ann" })).unwrap();

        let reference = temp_dir.path().join("reference");
        fs::File::create(&reference).unwrap();
        let output = temp_dir.path().join("new.docx");
        docx.generate(&output, &GenerateOptions::default()).unwrap();
        assert_eq!(mode(&output), mode(&reference));

        let existing = temp_dir.path().join("existing.docx");
        fs::write(&existing, "old").unwrap();
        fs::set_permissions(&existing, fs::Permissions::from_mode(0o640)).unwrap();
        docx.generate(&existing, &GenerateOptions { force: true }).unwrap();
        assert_eq!(mode(&existing), 0o640);
        assert!(read_entry(&existing, "word/document.xml").contains("Ann"));
    }

    #[test]
    fn test_required_hash_across_parts() {
        let temp_dir = TempDir::new().unwrap();
        let block = |inner: &str| format!("{}{}{}", field("start:a"), field(inner), field("end:a"));
        let path = write_docx(
            &temp_dir,
            &[
                ("word/header1.xml", &document_xml(&block("b"))),
                ("word/document.xml", &document_xml(&block("c"))),
            ],
        );
        let docx = Docx::new(&path, json!({})).unwrap();
        assert_eq!(
            docx.required_hash().unwrap(),
            json!({ "a": [{ "b": null, "c": null }] })
        );

        let trees = docx.to_tree().unwrap();
        assert_eq!(trees[0].file, "word/header1.xml");
        assert_eq!(trees[1].file, "word/document.xml");
    }
}
