//! Cache key normalization.
//!
//! Asset thumbnails are cached under a canonical, location-independent key so
//! that an entry survives the asset's package being moved between equivalent
//! root directories (for example from `AllPackages` to `AddonPackages`).
//!
//! # Rules
//!
//! Applied in order:
//!
//! 1. Unicode is normalized to NFC and `\` becomes `/`.
//! 2. `<dir>/<name>.var:/<inner>` becomes `ARCHIVE:/<name>.var:/<inner>`.
//! 3. A bare package file under a package root, such as
//!    `AddonPackages/<name>.var`, becomes `ARCHIVE:/<name>.var`.
//! 4. Anything else is kept as the normalized loose-file path.
//!
//! Normalization is idempotent: an already canonical key maps to itself.
//!
//! # Example
//!
//! ```
//! use thumbstore::cache::key::normalize;
//!
//! let a = normalize(r"AddonPackages\Author.Pack.1.var:/Custom/Hair/x.jpg");
//! let b = normalize("AllPackages/Author.Pack.1.var:/Custom/Hair/x.jpg");
//! assert_eq!(a, "ARCHIVE:/Author.Pack.1.var:/Custom/Hair/x.jpg");
//! assert_eq!(a, b);
//! assert_eq!(normalize(&a), a);
//! ```

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use unicode_normalization::UnicodeNormalization;

/// Key normalization and classification rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyRules {
    /// File extensions that mark a package archive (matched case-insensitively).
    pub package_extensions: Vec<String>,
    /// Directory names that hold package archives.
    pub package_roots: Vec<String>,
    /// Prefix of canonical archive keys.
    pub archive_prefix: String,
    /// Separator between an archive and the path inside it.
    pub archive_separator: String,
    /// Prefix of keys that reference the asset's own containing package.
    pub self_reference_prefix: String,
}

impl Default for KeyRules {
    fn default() -> Self {
        Self {
            package_extensions: vec![".var".to_string()],
            package_roots: vec!["AddonPackages".to_string(), "AllPackages".to_string()],
            archive_prefix: "ARCHIVE:/".to_string(),
            archive_separator: ":/".to_string(),
            self_reference_prefix: "SELF:/".to_string(),
        }
    }
}

/// Liveness class of a canonical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass<'a> {
    /// A package archive, or a file inside one.
    Archive {
        /// Package file name, e.g. `Author.Pack.1.var`
        package: &'a str,
        /// Path inside the package, if any
        internal: Option<&'a str>,
    },
    /// A reference relative to the asset's own containing package.
    SelfReference,
    /// A loose file path.
    LooseFile(&'a str),
}

impl KeyRules {
    /// Map a raw asset location to its canonical cache key.
    #[must_use]
    pub fn normalize(&self, raw: &str) -> String {
        let path = canonical_separators(raw);

        if path.starts_with(&self.archive_prefix) || path.starts_with(&self.self_reference_prefix)
        {
            return path;
        }

        if let Some(idx) = self.find_archive_separator(&path) {
            let archive_part = &path[..idx];
            if self.is_package_file(archive_part) {
                let internal = &path[idx + self.archive_separator.len()..];
                return format!(
                    "{}{}{}{}",
                    self.archive_prefix,
                    file_name(archive_part),
                    self.archive_separator,
                    internal
                );
            }
        }

        if self.is_package_file(&path) && self.is_under_package_root(&path) {
            return format!("{}{}", self.archive_prefix, file_name(&path));
        }

        path
    }

    /// Classify a canonical key for liveness resolution.
    #[must_use]
    pub fn classify<'a>(&self, key: &'a str) -> KeyClass<'a> {
        if key.starts_with(&self.self_reference_prefix) {
            return KeyClass::SelfReference;
        }
        match key.strip_prefix(&self.archive_prefix) {
            Some(rest) => match rest.split_once(&self.archive_separator) {
                Some((package, internal)) => KeyClass::Archive {
                    package,
                    internal: Some(internal),
                },
                None => KeyClass::Archive {
                    package: rest,
                    internal: None,
                },
            },
            None => KeyClass::LooseFile(key),
        }
    }

    /// Whether `path` names a package archive by extension.
    #[must_use]
    pub fn is_package_file(&self, path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        self.package_extensions
            .iter()
            .any(|ext| lower.ends_with(&ext.to_ascii_lowercase()))
    }

    fn is_under_package_root(&self, path: &str) -> bool {
        let mut segments: Vec<&str> = path.split('/').collect();
        segments.pop();
        segments.iter().any(|segment| {
            self.package_roots
                .iter()
                .any(|root| segment.eq_ignore_ascii_case(root))
        })
    }

    /// First archive separator that is not a drive letter (`C:/`).
    fn find_archive_separator(&self, path: &str) -> Option<usize> {
        if self.archive_separator.is_empty() {
            return None;
        }
        path.match_indices(&self.archive_separator)
            .map(|(idx, _)| idx)
            .find(|&idx| !is_drive_prefix(&path[..idx]))
    }
}

/// Normalize with the default rules.
#[must_use]
pub fn normalize(raw: &str) -> String {
    KeyRules::default().normalize(raw)
}

fn canonical_separators(raw: &str) -> String {
    let composed: Cow<'_, str> = if unicode_normalization::is_nfc(raw) {
        Cow::Borrowed(raw)
    } else {
        Cow::Owned(raw.nfc().collect())
    };
    composed.replace('\\', "/")
}

fn is_drive_prefix(prefix: &str) -> bool {
    prefix.len() == 1 && prefix.bytes().all(|b| b.is_ascii_alphabetic())
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
