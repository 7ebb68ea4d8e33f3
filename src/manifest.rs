//! Dependency manifest patching.
//!
//! Only `autoload.files` is touched. Key order and every other field are
//! kept; `serde_json` is built with `preserve_order` for that reason.

use crate::error::{ObfuscatorError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

const AUTOLOAD: &str = "autoload";
const FILES: &str = "files";

/// What [`prepend_autoload_file`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestChange {
    Prepended,
    /// Entry existed further down and was moved to the front
    MovedToFront,
    AlreadyFirst,
}

/// A parsed dependency manifest
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    root: Map<String, Value>,
}

impl Manifest {
    /// Read and check the manifest's shape without changing it
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ObfuscatorError::ManifestMissing(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let malformed = |reason: String| ObfuscatorError::ManifestMalformed {
            path: path.to_path_buf(),
            reason,
        };

        let root = match serde_json::from_slice::<Value>(&data) {
            Ok(Value::Object(root)) => root,
            Ok(_) => return Err(malformed("top level is not an object".into())),
            Err(e) => return Err(malformed(e.to_string())),
        };

        match root.get(AUTOLOAD) {
            None => {}
            Some(Value::Object(autoload)) => match autoload.get(FILES) {
                None => {}
                Some(Value::Array(files)) if files.iter().all(Value::is_string) => {}
                Some(_) => return Err(malformed("autoload.files is not a list of paths".into())),
            },
            Some(_) => return Err(malformed("autoload is not an object".into())),
        }

        Ok(Self {
            path: path.to_path_buf(),
            root,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn autoload_files(&self) -> Vec<String> {
        self.root
            .get(AUTOLOAD)
            .and_then(|a| a.get(FILES))
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ensure `entry` is the first eagerly loaded file
    pub fn prepend_autoload_file(&mut self, entry: &str) -> ManifestChange {
        let autoload = self
            .root
            .entry(AUTOLOAD)
            .or_insert_with(|| Value::Object(Map::new()));
        if !autoload.is_object() {
            *autoload = Value::Object(Map::new());
        }
        let files = autoload
            .as_object_mut()
            .map(|a| a.entry(FILES).or_insert_with(|| Value::Array(Vec::new())));

        let Some(Value::Array(files)) = files else {
            return ManifestChange::AlreadyFirst;
        };

        if files.first().and_then(Value::as_str) == Some(entry) {
            return ManifestChange::AlreadyFirst;
        }
        let before = files.len();
        files.retain(|f| f.as_str() != Some(entry));
        let change = if files.len() < before {
            ManifestChange::MovedToFront
        } else {
            ManifestChange::Prepended
        };
        files.insert(0, Value::String(entry.to_string()));
        change
    }

    /// Serialize with four-space indentation, unescaped slashes and a trailing newline
    pub fn to_pretty_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.root.serialize(&mut serializer)?;
        buf.push(b'\n');
        String::from_utf8(buf).map_err(ObfuscatorError::from)
    }

    pub fn save(&self) -> Result<()> {
        fs::write(&self.path, self.to_pretty_string()?)?;
        Ok(())
    }
}
