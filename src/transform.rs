//! Wrapping and unwrapping of single source units.
//!
//! An obfuscated unit is a one-line bootstrap:
//!
//! ```text
//! <?php eval("\x40\x65\x76...'<packed payload>'\x2c...");
//! ```
//!
//! Once PHP resolves the escapes the string reads
//! `@eval(<decoder alias>('<payload>',<argument alias>()));`, so neither
//! `eval` nor the alias names appear as readable identifiers in the file.

use crate::error::{ObfuscatorError, Result};
use crate::pipeline::{hex_escape, hex_unescape, pack, strip_wrapper, Rejection, Stripped};
use crate::registry::SchemeRegistry;
use base64::{engine::general_purpose, Engine as _};
use regex::Regex;
use std::sync::OnceLock;

/// Outcome of obfuscating one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutput {
    Obfuscated(String),
    /// The original text, unchanged, with the reason it was not wrapped
    PassThrough { original: String, rejection: Rejection },
}

impl UnitOutput {
    pub fn text(&self) -> &str {
        match self {
            Self::Obfuscated(text) => text,
            Self::PassThrough { original, .. } => original,
        }
    }

    pub fn is_obfuscated(&self) -> bool {
        matches!(self, Self::Obfuscated(_))
    }
}

pub struct CodeTransformer<'r> {
    registry: &'r SchemeRegistry,
    suppress_errors: bool,
}

impl<'r> CodeTransformer<'r> {
    pub fn new(registry: &'r SchemeRegistry) -> Self {
        Self {
            registry,
            suppress_errors: true,
        }
    }

    /// Toggle the `@` prefix on the evaluated call
    pub fn suppress_errors(mut self, suppress: bool) -> Self {
        self.suppress_errors = suppress;
        self
    }

    pub fn registry(&self) -> &'r SchemeRegistry {
        self.registry
    }

    pub fn strip_wrapper(&self, text: &str) -> Stripped {
        strip_wrapper(text)
    }

    /// Wrap plain (tag-less) code into a self-decoding unit
    pub fn wrap(&self, plain: &str) -> String {
        let decoder = self.registry.choose_packing_alias();
        let argument = self.registry.choose_argument_alias();
        let packed = pack(plain.as_bytes(), decoder.scheme);

        emit_bootstrap(
            &format!("{}eval({}(", self.prefix(), decoder.name),
            &packed,
            &format!(",{}()));", argument),
        )
    }

    /// Strip then wrap; rejected units come back unchanged
    pub fn obfuscate_unit(&self, source: &str) -> UnitOutput {
        match self.strip_wrapper(source) {
            Stripped::Plain(plain) => UnitOutput::Obfuscated(self.wrap(&plain)),
            Stripped::Rejected(rejection) => {
                tracing::debug!("unit passed through: {}", rejection);
                UnitOutput::PassThrough {
                    original: source.to_string(),
                    rejection,
                }
            }
        }
    }

    /// Recover the plain text from a unit produced by [`wrap`](Self::wrap)
    /// or by the revert unit's bootstrap
    pub fn reveal(&self, obfuscated: &str) -> Result<String> {
        let inner = unescape_bootstrap(obfuscated)?;

        if let Some(caps) = alias_call_regex().captures(&inner) {
            let scheme = self.registry.resolve_scheme(&caps[1])?;
            if !self.registry.is_argument_alias(&caps[3]) {
                return Err(ObfuscatorError::UnknownArgument(caps[3].to_string()));
            }
            let bytes = crate::pipeline::unpack(&caps[2], scheme)?;
            return Ok(String::from_utf8(bytes)?);
        }

        if let Some(caps) = inline_call_regex().captures(&inner) {
            let packed = &caps[1];
            let at: usize = caps[2]
                .parse()
                .map_err(|_| ObfuscatorError::NotObfuscated("bad marker offset".into()))?;
            let len: usize = caps[3]
                .parse()
                .map_err(|_| ObfuscatorError::NotObfuscated("bad marker length".into()))?;
            let encoded = packed
                .get(..at)
                .zip(packed.get(at + len..))
                .map(|(head, tail)| format!("{}{}", head, tail))
                .ok_or_else(|| ObfuscatorError::NotObfuscated("marker outside payload".into()))?;
            let bytes = general_purpose::STANDARD.decode(encoded)?;
            return Ok(String::from_utf8(bytes)?);
        }

        Err(ObfuscatorError::NotObfuscated(
            "unrecognised decoder call".into(),
        ))
    }

    fn prefix(&self) -> &'static str {
        if self.suppress_errors {
            "@"
        } else {
            ""
        }
    }
}

/// `<?php eval("<escaped head>'<payload>'<escaped tail>");`
pub(crate) fn emit_bootstrap(head: &str, payload: &str, tail: &str) -> String {
    format!(
        "<?php eval(\"{}'{}'{}\");",
        hex_escape(head),
        payload,
        hex_escape(tail)
    )
}

fn unescape_bootstrap(obfuscated: &str) -> Result<String> {
    let caps = bootstrap_regex()
        .captures(obfuscated)
        .ok_or_else(|| ObfuscatorError::NotObfuscated("missing eval bootstrap".into()))?;
    hex_unescape(&caps[1])
}

fn bootstrap_regex() -> &'static Regex {
    static BOOTSTRAP: OnceLock<Regex> = OnceLock::new();
    BOOTSTRAP.get_or_init(|| {
        Regex::new(r#"(?s)\A\s*<\?php eval\("(.*)"\);\s*\z"#).expect("bootstrap pattern is valid")
    })
}

fn alias_call_regex() -> &'static Regex {
    static ALIAS_CALL: OnceLock<Regex> = OnceLock::new();
    ALIAS_CALL.get_or_init(|| {
        Regex::new(r"\A@?eval\(([A-Za-z_]\w*)\('([A-Za-z0-9+/=]*)',([A-Za-z_]\w*)\(\)\)\);\z")
            .expect("alias call pattern is valid")
    })
}

fn inline_call_regex() -> &'static Regex {
    static INLINE_CALL: OnceLock<Regex> = OnceLock::new();
    INLINE_CALL.get_or_init(|| {
        Regex::new(
            r"\A@?eval\(base64_decode\(substr_replace\('([A-Za-z0-9+/=]*)','',(\d+),(\d+)\)\)\);\z",
        )
        .expect("inline call pattern is valid")
    })
}
