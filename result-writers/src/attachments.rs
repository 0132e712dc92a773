// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Materialize test attachments to disk.
//!
//! Each test gets its own directory under the configured attachments directory, named after the
//! test's unique ID. Attachments are written into it as
//! `{sanitized attachment name}{extension for the media type}`. A materializer never hands out the
//! same path twice, even when two test IDs sanitize to the same directory name.

use crate::{errors::WriteError, fs::FileSystem, messages::TestAttachment};
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use indexmap::{IndexMap, IndexSet};
use std::sync::{Arc, Mutex, PoisonError};

/// The media type used for string attachments.
pub const TEXT_PLAIN: &str = "text/plain";

/// An attachment that was written to disk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MaterializedAttachment {
    /// The name of the attachment, as reported by the test.
    pub name: String,
    /// The media type of the attachment.
    pub content_type: String,
    /// The path the attachment was written to.
    pub path: Utf8PathBuf,
}

/// Writes attachments to a directory through a [`FileSystem`].
///
/// Clones share the set of paths already handed out.
#[derive(Clone, Debug)]
pub struct AttachmentMaterializer {
    fs: DebugIgnore<Arc<dyn FileSystem>>,
    base_dir: Utf8PathBuf,
    // Lowercased, so that names differing only in case don't clash on case-insensitive file
    // systems.
    claimed: Arc<Mutex<IndexSet<String>>>,
}

impl AttachmentMaterializer {
    /// Creates a new materializer writing under `base_dir`.
    pub fn new(fs: Arc<dyn FileSystem>, base_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            fs: DebugIgnore(fs),
            base_dir: base_dir.into(),
            claimed: Arc::default(),
        }
    }

    /// The directory attachments are written under.
    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    /// Writes all attachments of a test, in order.
    ///
    /// Stops at the first attachment that can't be written and returns the error.
    pub fn materialize(
        &self,
        test_unique_id: &str,
        attachments: &IndexMap<String, TestAttachment>,
    ) -> Result<Vec<MaterializedAttachment>, WriteError> {
        if attachments.is_empty() {
            return Ok(Vec::new());
        }

        let dir = self.base_dir.join(sanitize_file_name(test_unique_id));
        self.fs
            .create_dir_all(&dir)
            .map_err(|error| WriteError::Fs {
                file: dir.clone(),
                error,
            })?;

        attachments
            .iter()
            .map(|(name, attachment)| self.write_one(&dir, name, attachment))
            .collect()
    }

    fn write_one(
        &self,
        dir: &Utf8Path,
        name: &str,
        attachment: &TestAttachment,
    ) -> Result<MaterializedAttachment, WriteError> {
        let (content_type, bytes) = match attachment {
            TestAttachment::String(value) => (TEXT_PLAIN, value.as_bytes()),
            TestAttachment::ByteArray { bytes, media_type } => (media_type.as_str(), &bytes[..]),
        };

        let path = self.claim_path(dir, sanitized_file_name_with_extension(name, content_type));
        self.fs
            .write_all_bytes(&path, bytes)
            .map_err(|error| WriteError::Fs {
                file: path.clone(),
                error,
            })?;

        Ok(MaterializedAttachment {
            name: name.to_owned(),
            content_type: content_type.to_owned(),
            path,
        })
    }

    // Two attachments can end up with the same path, e.g. "a/b" and "a_b", or the same name
    // under test IDs that sanitize alike. Later ones get a numeric suffix before the extension.
    fn claim_path(&self, dir: &Utf8Path, file_name: String) -> Utf8PathBuf {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        let path = dir.join(&file_name);
        if claimed.insert(path.as_str().to_ascii_lowercase()) {
            return path;
        }

        let (stem, extension) = match file_name.rfind('.') {
            Some(idx) if idx > 0 => file_name.split_at(idx),
            _ => (file_name.as_str(), ""),
        };
        let mut counter = 2;
        loop {
            let candidate = dir.join(format!("{stem} ({counter}){extension}"));
            if claimed.insert(candidate.as_str().to_ascii_lowercase()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

/// Returns the file extension (including the leading dot) for a media type, if it's known.
///
/// Media type parameters such as `; charset=utf-8` are ignored.
pub fn extension_for_media_type(media_type: &str) -> Option<&'static str> {
    let essence = media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let extension = match essence.as_str() {
        "text/plain" => ".txt",
        "text/html" => ".html",
        "text/css" => ".css",
        "text/csv" => ".csv",
        "text/markdown" => ".md",
        "text/xml" | "application/xml" => ".xml",
        "application/json" => ".json",
        "application/javascript" | "text/javascript" => ".js",
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        "application/gzip" => ".gz",
        "application/octet-stream" => ".bin",
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "image/bmp" => ".bmp",
        "image/webp" => ".webp",
        "image/svg+xml" => ".svg",
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        _ => return None,
    };
    Some(extension)
}

/// Replaces characters that can't appear in file names with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match sanitized.trim() {
        "" | "." | ".." => "_".repeat(sanitized.len().max(1)),
        _ => sanitized,
    }
}

/// Sanitizes an attachment name and appends the extension for its media type, unless the name
/// already ends with it.
pub fn sanitized_file_name_with_extension(name: &str, media_type: &str) -> String {
    let mut file_name = sanitize_file_name(name);
    if let Some(extension) = extension_for_media_type(media_type) {
        let has_extension = file_name.len() > extension.len()
            && file_name
                .get(file_name.len() - extension.len()..)
                .is_some_and(|suffix| suffix.eq_ignore_ascii_case(extension));
        if !has_extension {
            file_name.push_str(extension);
        }
    }
    file_name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fs::InMemoryFileSystem, test_helpers::FullFileSystem};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("text/plain", Some(".txt") ; "text")]
    #[test_case("text/plain; charset=utf-8", Some(".txt") ; "with parameters")]
    #[test_case("IMAGE/PNG", Some(".png") ; "case insensitive")]
    #[test_case("application/octet-stream", Some(".bin") ; "binary")]
    #[test_case("application/x-custom", None ; "unknown")]
    fn media_type_extensions(media_type: &str, expected: Option<&str>) {
        assert_eq!(extension_for_media_type(media_type), expected);
    }

    #[test_case("attachment", "text/plain", "attachment.txt" ; "extension appended")]
    #[test_case("notes.TXT", "text/plain", "notes.TXT" ; "extension already present")]
    #[test_case("a/b:c*d", "image/png", "a_b_c_d.png" ; "invalid characters replaced")]
    #[test_case("data", "application/x-custom", "data" ; "unknown media type")]
    #[test_case("..", "application/x-custom", "__" ; "dot dot")]
    #[test_case("", "text/plain", "_.txt" ; "empty name")]
    fn file_names(name: &str, media_type: &str, expected: &str) {
        assert_eq!(sanitized_file_name_with_extension(name, media_type), expected);
    }

    #[test]
    fn materialize_attachments() {
        let fs = Arc::new(InMemoryFileSystem::new());
        let materializer = AttachmentMaterializer::new(fs.clone(), "/attachments");

        let mut attachments = IndexMap::new();
        attachments.insert(
            "log".to_owned(),
            TestAttachment::String("Hello from a string attachment".to_owned()),
        );
        attachments.insert(
            "screenshot".to_owned(),
            TestAttachment::ByteArray {
                bytes: vec![1, 2, 3],
                media_type: "image/png".to_owned(),
            },
        );
        attachments.insert(
            "log.txt".to_owned(),
            TestAttachment::String("collides after sanitizing".to_owned()),
        );

        let records = materializer
            .materialize("test/id", &attachments)
            .expect("attachments written");
        assert_eq!(
            records,
            vec![
                MaterializedAttachment {
                    name: "log".to_owned(),
                    content_type: "text/plain".to_owned(),
                    path: "/attachments/test_id/log.txt".into(),
                },
                MaterializedAttachment {
                    name: "screenshot".to_owned(),
                    content_type: "image/png".to_owned(),
                    path: "/attachments/test_id/screenshot.png".into(),
                },
                MaterializedAttachment {
                    name: "log.txt".to_owned(),
                    content_type: "text/plain".to_owned(),
                    path: "/attachments/test_id/log (2).txt".into(),
                },
            ]
        );

        assert_eq!(
            fs.read_all_text(Utf8Path::new("/attachments/test_id/log.txt"))
                .expect("attachment written"),
            "Hello from a string attachment"
        );
        assert_eq!(
            fs.read_all_bytes(Utf8Path::new("/attachments/test_id/screenshot.png"))
                .expect("attachment written"),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn no_attachments_creates_nothing() {
        let fs = Arc::new(InMemoryFileSystem::new());
        let materializer = AttachmentMaterializer::new(fs.clone(), "/attachments");
        let records = materializer
            .materialize("test-id", &IndexMap::new())
            .expect("nothing to write");
        assert!(records.is_empty());
        assert!(!fs.exists(Utf8Path::new("/attachments/test-id")));
    }

    #[test]
    fn test_ids_that_sanitize_alike_get_distinct_paths() {
        let fs = Arc::new(InMemoryFileSystem::new());
        let materializer = AttachmentMaterializer::new(fs.clone(), "/attachments");
        let attachments_for = |contents: &str| {
            IndexMap::from([(
                "log".to_owned(),
                TestAttachment::String(contents.to_owned()),
            )])
        };

        let first = materializer
            .materialize("suite/test", &attachments_for("first"))
            .expect("attachments written");
        // A clone shares the paths handed out so far.
        let second = materializer
            .clone()
            .materialize("suite:test", &attachments_for("second"))
            .expect("attachments written");

        assert_eq!(first[0].path, "/attachments/suite_test/log.txt");
        assert_eq!(second[0].path, "/attachments/suite_test/log (2).txt");
        assert_eq!(
            fs.read_all_text(&first[0].path).expect("first attachment kept"),
            "first"
        );
        assert_eq!(
            fs.read_all_text(&second[0].path).expect("second attachment written"),
            "second"
        );
    }

    #[test]
    fn write_faults_are_returned() {
        let materializer = AttachmentMaterializer::new(Arc::new(FullFileSystem), "/attachments");
        let attachments =
            IndexMap::from([("log".to_owned(), TestAttachment::String("data".to_owned()))]);

        let error = materializer
            .materialize("test-id", &attachments)
            .expect_err("disk is full");
        match error {
            WriteError::Fs { file, error } => {
                assert_eq!(file, "/attachments/test-id");
                assert_eq!(error.kind(), std::io::ErrorKind::StorageFull);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
