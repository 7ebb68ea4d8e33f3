use crate::error::{ObfuscatorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Packing scheme options
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    One,
    Two,
    Three,
}

impl Scheme {
    pub const ALL: [Scheme; 3] = [Scheme::One, Scheme::Two, Scheme::Three];

    /// Name of the PHP function holding this scheme's unpack body
    pub fn function_name(self) -> &'static str {
        match self {
            Self::One => "baseOne",
            Self::Two => "baseTwo",
            Self::Three => "baseThree",
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.function_name())
    }
}

impl std::str::FromStr for Scheme {
    type Err = ObfuscatorError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "one" | "baseone" => Ok(Self::One),
            "two" | "basetwo" => Ok(Self::Two),
            "three" | "basethree" => Ok(Self::Three),
            _ => Err(ObfuscatorError::UnsupportedScheme(s.to_string())),
        }
    }
}

/// What to do with symbolic links found while mirroring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SymlinkPolicy {
    /// Recreate each link at its mirrored path in the staging tree
    #[default]
    Recreate,
    /// Leave links out of the staging tree (they stay in the backup)
    Skip,
}

impl std::str::FromStr for SymlinkPolicy {
    type Err = ObfuscatorError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "recreate" => Ok(Self::Recreate),
            "skip" => Ok(Self::Skip),
            _ => Err(ObfuscatorError::InvalidConfig(format!("symlinks: {}", s))),
        }
    }
}

/// A surface name that forwards to a packing scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderAlias {
    pub name: String,
    pub scheme: Scheme,
}

impl DecoderAlias {
    pub fn new(name: impl Into<String>, scheme: Scheme) -> Self {
        Self {
            name: name.into(),
            scheme,
        }
    }
}

/// The decoder and argument alias tables handed to a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasTable {
    pub decoders: Vec<DecoderAlias>,
    pub arguments: Vec<String>,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self {
            decoders: vec![
                DecoderAlias::new("cfForgetShow", Scheme::One),
                DecoderAlias::new("cryptOf", Scheme::Two),
                DecoderAlias::new("unsetZeros", Scheme::One),
                DecoderAlias::new("deflatingNow", Scheme::Two),
                DecoderAlias::new("zeroizeCipher", Scheme::Three),
                DecoderAlias::new("iqutZ", Scheme::Two),
                DecoderAlias::new("sagaPlus", Scheme::Three),
            ],
            arguments: vec![
                "decompressMD5".into(),
                "unsetLogger".into(),
                "loopNested".into(),
                "vorticeData".into(),
                "cipherBinary".into(),
            ],
        }
    }
}

impl AliasTable {
    /// Reject tables a registry could not draw from or a revert unit could not define
    pub fn validate(&self) -> Result<()> {
        if self.decoders.is_empty() {
            return Err(ObfuscatorError::InvalidConfig(
                "at least one decoder alias is required".into(),
            ));
        }
        if self.arguments.is_empty() {
            return Err(ObfuscatorError::InvalidConfig(
                "at least one argument alias is required".into(),
            ));
        }

        let reserved: HashSet<String> = Scheme::ALL
            .iter()
            .map(|s| s.function_name().to_lowercase())
            .collect();
        let mut seen = HashSet::new();
        let names = self
            .decoders
            .iter()
            .map(|d| d.name.as_str())
            .chain(self.arguments.iter().map(String::as_str));

        for name in names {
            if !is_php_identifier(name) {
                return Err(ObfuscatorError::InvalidConfig(format!(
                    "alias {:?} is not a valid function name",
                    name
                )));
            }
            // PHP function names are case-insensitive
            let folded = name.to_lowercase();
            if reserved.contains(&folded) {
                return Err(ObfuscatorError::InvalidConfig(format!(
                    "alias {:?} clashes with a scheme function",
                    name
                )));
            }
            if !seen.insert(folded) {
                return Err(ObfuscatorError::InvalidConfig(format!(
                    "alias {:?} is declared twice",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn is_php_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Run configuration, loadable from a JSON document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscatorConfig {
    #[serde(flatten)]
    pub aliases: AliasTable,
    /// Scheme inlined by the revert unit's self-decoding bootstrap
    pub bootstrap_scheme: Scheme,
    /// File extensions treated as executable source
    pub extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub exclude_files: Vec<String>,
    pub revert_unit_name: String,
    pub autoload_index_name: String,
    /// Prefix the evaluated call with `@` so decode warnings stay silent
    pub suppress_decode_errors: bool,
    pub symlinks: SymlinkPolicy,
    /// Fixed seed for alias selection; entropy when absent
    pub seed: Option<u64>,
    /// Dependency manifest; defaults to composer.json next to the plain tree
    pub manifest: Option<PathBuf>,
    pub keep_staging_on_failure: bool,
    /// Digest the plain tree before promotion and check it after a rollback
    pub verify_rollback: bool,
}

impl Default for ObfuscatorConfig {
    fn default() -> Self {
        Self {
            aliases: AliasTable::default(),
            bootstrap_scheme: Scheme::One,
            extensions: vec!["php".into()],
            exclude_dirs: vec!["vendor".into(), "node_modules".into()],
            exclude_files: vec![".env".into()],
            revert_unit_name: "App.php".into(),
            autoload_index_name: "autoloader.php".into(),
            suppress_decode_errors: true,
            symlinks: SymlinkPolicy::default(),
            seed: None,
            manifest: None,
            keep_staging_on_failure: false,
            verify_rollback: true,
        }
    }
}

impl ObfuscatorConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let config = Self::from_bytes(&data)?;
        Ok(config)
    }

    /// Deserialize and validate configuration from JSON bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let config: Self = serde_json::from_slice(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.aliases.validate()?;
        if self.extensions.is_empty() {
            return Err(ObfuscatorError::InvalidConfig(
                "at least one source extension is required".into(),
            ));
        }
        for name in [&self.revert_unit_name, &self.autoload_index_name] {
            if name.is_empty() || name.contains('/') || name.contains('\\') {
                return Err(ObfuscatorError::InvalidConfig(format!(
                    "{:?} must be a plain file name",
                    name
                )));
            }
        }
        if self.revert_unit_name == self.autoload_index_name {
            return Err(ObfuscatorError::InvalidConfig(
                "revert unit and autoload index need distinct names".into(),
            ));
        }
        Ok(())
    }
}
