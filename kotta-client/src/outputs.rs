//! Output references
//!
//! A remote-produced artifact (result file, stdout/stderr stream) and how to
//! materialize it locally. The status endpoint reports each output as one of
//! three raw string shapes; parsing is total and never fails.

use std::path::Path;

use url::Url;

use crate::connection::Connection;
use crate::error::FetchError;

/// Parsed handle to a remote-produced artifact.
///
/// Instances are created fresh on every status poll that reports outputs and
/// replace prior instances; nothing persists identity across polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRef {
    url: Option<String>,
    file: String,
    storage_url: Option<String>,
}

impl OutputRef {
    /// Parse a raw server output string.
    ///
    /// Three shapes are recognized by exact prefix/suffix match:
    /// - `<a href="URL">FILE</a>`: a retrievable artifact
    /// - `<i>FILE</i>`: a placeholder, the file was never produced
    /// - anything else: a bare filename, not retrievable
    pub fn parse(raw: &str) -> Self {
        if let Some(inner) = raw
            .strip_prefix("<a href=\"")
            .and_then(|s| s.strip_suffix("</a>"))
        {
            if let Some((url, file)) = inner.split_once("\">") {
                return Self {
                    storage_url: Some(canonical_storage_url(url)),
                    url: Some(url.to_string()),
                    file: file.to_string(),
                };
            }
        }

        if let Some(file) = raw
            .strip_prefix("<i>")
            .and_then(|s| s.strip_suffix("</i>"))
        {
            return Self {
                url: None,
                file: file.to_string(),
                storage_url: None,
            };
        }

        Self {
            url: None,
            file: raw.to_string(),
            storage_url: None,
        }
    }

    /// Remote URL of the artifact, if one was produced.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Target filename on the local filesystem.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// The artifact's location in canonical `scheme://bucket/key` form.
    pub fn storage_url(&self) -> Option<&str> {
        self.storage_url.as_deref()
    }

    pub fn is_stdout(&self) -> bool {
        self.file.ends_with("STDOUT.txt")
    }

    pub fn is_stderr(&self) -> bool {
        self.file.ends_with("STDERR.txt")
    }

    /// Download the artifact to its local `file` path.
    pub fn fetch<C: Connection>(&self, conn: &C) -> Result<(), FetchError> {
        match &self.url {
            Some(url) => conn.download(url, Path::new(&self.file)),
            None => {
                tracing::warn!(file = %self.file, "file was not generated remotely, nothing to fetch");
                Err(FetchError::NotAvailable {
                    file: self.file.clone(),
                })
            }
        }
    }

    /// Retrieve the artifact's bytes without persisting them to disk.
    pub fn read_bytes<C: Connection>(&self, conn: &C) -> Result<Vec<u8>, FetchError> {
        match &self.url {
            Some(url) => conn.retrieve(url),
            None => {
                tracing::warn!(file = %self.file, "url not available for read");
                Err(FetchError::NotAvailable {
                    file: self.file.clone(),
                })
            }
        }
    }

    /// Retrieve the artifact and decode it as UTF-8 text, without persisting.
    pub fn read_text<C: Connection>(&self, conn: &C) -> Result<String, FetchError> {
        Ok(String::from_utf8(self.read_bytes(conn)?)?)
    }
}

/// Rewrite a storage-service URL into canonical `s3://bucket/key` form.
///
/// Handles virtual-hosted style (`https://bucket.s3.amazonaws.com/key`) and
/// path-style (`https://s3[.region].amazonaws.com/bucket/key`). Unrecognized
/// shapes pass through unchanged with a logged warning; an unknown URL shape
/// is degraded, not an error.
pub fn canonical_storage_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        tracing::warn!(%url, "unknown URL type");
        return url.to_string();
    };
    let Some(host) = parsed.host_str() else {
        tracing::warn!(%url, "unknown URL type");
        return url.to_string();
    };

    if let Some(bucket) = host.strip_suffix(".s3.amazonaws.com") {
        return format!("s3://{}{}", bucket, parsed.path());
    }

    if host.starts_with("s3") && host.ends_with(".amazonaws.com") {
        let path = parsed.path().trim_start_matches('/');
        if let Some((bucket, key)) = path.split_once('/') {
            return format!("s3://{}/{}", bucket, key);
        }
    }

    tracing::warn!(%url, "unknown URL type");
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hyperlink() {
        let out = OutputRef::parse(r#"<a href="http://x/out.pkl">out.pkl</a>"#);
        assert_eq!(out.url(), Some("http://x/out.pkl"));
        assert_eq!(out.file(), "out.pkl");
    }

    #[test]
    fn test_parse_placeholder() {
        let out = OutputRef::parse("<i>missing.txt</i>");
        assert_eq!(out.url(), None);
        assert_eq!(out.file(), "missing.txt");
        assert_eq!(out.storage_url(), None);
    }

    #[test]
    fn test_parse_bare_filename() {
        let out = OutputRef::parse("plain.txt");
        assert_eq!(out.url(), None);
        assert_eq!(out.file(), "plain.txt");
    }

    #[test]
    fn test_parse_hyperlink_derives_storage_url() {
        let out =
            OutputRef::parse(r#"<a href="https://bucket1.s3.amazonaws.com/key1">key1</a>"#);
        assert_eq!(out.storage_url(), Some("s3://bucket1/key1"));
    }

    #[test]
    fn test_canonical_virtual_hosted_style() {
        assert_eq!(
            canonical_storage_url("https://bucket1.s3.amazonaws.com/key1"),
            "s3://bucket1/key1"
        );
    }

    #[test]
    fn test_canonical_path_style() {
        assert_eq!(
            canonical_storage_url("https://s3.us-east-1.amazonaws.com/bucket2/key2"),
            "s3://bucket2/key2"
        );
    }

    #[test]
    fn test_canonical_unknown_shape_passes_through() {
        assert_eq!(
            canonical_storage_url("https://example.com/some/file"),
            "https://example.com/some/file"
        );
    }

    #[test]
    fn test_stream_classification() {
        assert!(OutputRef::parse("STDOUT.txt").is_stdout());
        assert!(OutputRef::parse("run1/STDERR.txt").is_stderr());
        assert!(!OutputRef::parse("out.pkl").is_stdout());
    }
}
