use crate::error::Result;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// How index entries are anchored
#[derive(Debug, Clone, Copy)]
pub enum IndexBase<'a> {
    /// Absolute paths under the given root (the staging tree)
    Absolute(&'a Path),
    /// `__DIR__`-relative paths, valid wherever the tree is moved
    Relative,
}

/// Ordered load list of obfuscated units, revert unit first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitIndex {
    entries: Vec<PathBuf>,
}

impl UnitIndex {
    /// `units` are relative to the tree root, in load order.
    /// The revert unit and the index file itself are never listed twice.
    pub fn new<I>(revert_unit: &str, index_name: &str, units: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let revert = PathBuf::from(revert_unit);
        let index = PathBuf::from(index_name);
        let mut entries = vec![revert.clone()];
        entries.extend(units.into_iter().filter(|u| *u != revert && *u != index));
        Self { entries }
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn render(&self, base: IndexBase<'_>) -> String {
        let mut contents = String::from("<?php \n\n$includes = array(\n");
        let lines: Vec<String> = self
            .entries
            .iter()
            .map(|entry| {
                let relative = slash_path(entry);
                match base {
                    IndexBase::Absolute(root) => {
                        let absolute = format!("{}/{}", slash_path(root).trim_end_matches('/'), relative);
                        format!("    '{}'", php_quote(&absolute))
                    }
                    IndexBase::Relative => format!("    __DIR__ . '/{}'", php_quote(&relative)),
                }
            })
            .collect();
        contents.push_str(&lines.join(",\n"));
        contents.push_str("\n);\n\n");
        contents.push_str("foreach($includes as $file) {\n    require_once($file);\n}\n");
        contents
    }

    pub fn write(&self, path: &Path, base: IndexBase<'_>) -> Result<()> {
        fs::write(path, self.render(base))?;
        Ok(())
    }
}

/// Forward-slash form of a path, independent of the host separator
pub(crate) fn slash_path(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        match component {
            Component::RootDir => out.push('/'),
            Component::Prefix(prefix) => out.push_str(&prefix.as_os_str().to_string_lossy()),
            other => {
                if !out.is_empty() && !out.ends_with('/') {
                    out.push('/');
                }
                out.push_str(&other.as_os_str().to_string_lossy());
            }
        }
    }
    out
}

fn php_quote(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UnitIndex {
        UnitIndex::new(
            "App.php",
            "autoloader.php",
            vec![
                PathBuf::from("Http/Kernel.php"),
                PathBuf::from("App.php"),
                PathBuf::from("autoloader.php"),
                PathBuf::from("Models/User.php"),
            ],
        )
    }

    #[test]
    fn test_revert_unit_first_and_unique() {
        assert_eq!(
            sample().entries(),
            &[
                PathBuf::from("App.php"),
                PathBuf::from("Http/Kernel.php"),
                PathBuf::from("Models/User.php"),
            ]
        );
    }

    #[test]
    fn test_render_absolute() {
        let rendered = sample().render(IndexBase::Absolute(Path::new("/srv/app_obfuscated")));
        assert!(rendered.starts_with("<?php \n\n$includes = array(\n"));
        assert!(rendered.contains("    '/srv/app_obfuscated/App.php',\n    '/srv/app_obfuscated/Http/Kernel.php',\n"));
        assert!(rendered.ends_with("foreach($includes as $file) {\n    require_once($file);\n}\n"));
    }

    #[test]
    fn test_render_relative() {
        let rendered = sample().render(IndexBase::Relative);
        assert!(rendered.contains("    __DIR__ . '/App.php',\n"));
        assert!(rendered.contains("    __DIR__ . '/Models/User.php'\n);"));
        assert!(!rendered.contains("app_obfuscated"));
    }

    #[test]
    fn test_quotes_are_escaped() {
        let index = UnitIndex::new("App.php", "autoloader.php", vec![PathBuf::from("it's.php")]);
        assert!(index.render(IndexBase::Relative).contains("'/it\\'s.php'"));
    }
}
