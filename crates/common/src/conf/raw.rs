//! Raw key/value representation of a tinc config document

use crate::error::{Error, Result};

const BLOB_BEGIN: &str = "-----BEGIN ";
const BLOB_END: &str = "-----END";

/// Parsed config document: scalar entries in file order plus named PEM
/// blobs captured verbatim (including their BEGIN/END lines).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfig {
    pub values: Vec<(String, String)>,
    pub blobs: Vec<(String, String)>,
}

impl RawConfig {
    /// Parse a config document. Unknown keys are preserved; a non-blob line
    /// without a `=` separator is an error.
    pub fn parse(input: &str) -> Result<Self> {
        let mut doc = RawConfig::default();
        let mut lines = input.lines().enumerate();

        while let Some((idx, line)) = lines.next() {
            if let Some(rest) = line.strip_prefix(BLOB_BEGIN) {
                let name = rest.split('-').next().unwrap_or("").trim().to_string();
                let mut content = vec![line.to_string()];
                for (_, blob_line) in lines.by_ref() {
                    content.push(blob_line.to_string());
                    if blob_line.starts_with(BLOB_END) {
                        break;
                    }
                }
                doc.blobs.push((name, content.join("\n")));
                continue;
            }

            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| Error::Parse {
                line: idx + 1,
                reason: "missing '=' separator".to_string(),
            })?;
            doc.values
                .push((key.trim().to_string(), value.trim().to_string()));
        }
        Ok(doc)
    }

    /// Emit the document: scalars first, then a blank line and every blob.
    pub fn emit(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.values {
            out.push_str(key);
            out.push_str(" = ");
            out.push_str(value);
            out.push('\n');
        }
        if !self.blobs.is_empty() {
            out.push('\n');
            for (_, content) in &self.blobs {
                out.push_str(content);
                out.push('\n');
            }
        }
        out
    }

    /// First value for a key (keys compare case-insensitively, as tinc does)
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for a repeated key, in file order
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.values
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Verbatim content of a named blob
    pub fn blob(&self, name: &str) -> Option<&str> {
        self.blobs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, c)| c.as_str())
    }

    pub fn push_value(&mut self, key: &str, value: impl Into<String>) {
        self.values.push((key.to_string(), value.into()));
    }

    pub fn push_blob(&mut self, name: &str, content: impl Into<String>) {
        self.blobs.push((name.to_string(), content.into()));
    }
}
