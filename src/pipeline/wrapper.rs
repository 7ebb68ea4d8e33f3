use regex::Regex;
use std::sync::OnceLock;

/// Why a unit was left as it was
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// More than one `<?php` / `<?=` tag: code interleaved with output
    MixedContent { open_tags: usize },
    /// The sole open tag is an inline-output `<?=`
    OutputTag,
    /// Something other than whitespace precedes the open tag
    LeadingOutput,
    /// No open tag at all, the unit is pure output
    NoOpenTag,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MixedContent { open_tags } => {
                write!(f, "mixed content ({} open tags), not obfuscated", open_tags)
            }
            Self::OutputTag => f.write_str("inline output tag, not obfuscated"),
            Self::LeadingOutput => f.write_str("output before open tag, not obfuscated"),
            Self::NoOpenTag => f.write_str("no open tag, not obfuscated"),
        }
    }
}

/// Result of removing the language wrapper from a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stripped {
    Plain(String),
    Rejected(Rejection),
}

fn open_tag_regex() -> &'static Regex {
    static OPEN_TAG: OnceLock<Regex> = OnceLock::new();
    OPEN_TAG.get_or_init(|| Regex::new(r"(?i)<\?php|<\?=").expect("open tag pattern is valid"))
}

/// Remove the open tag, a trailing close tag and surrounding whitespace.
/// Close tags inside the body stay; `eval` honours them.
pub fn strip_wrapper(code: &str) -> Stripped {
    let code = code.trim_start_matches('\u{feff}');
    let tags: Vec<_> = open_tag_regex().find_iter(code).collect();

    let tag = match tags.as_slice() {
        [] => return Stripped::Rejected(Rejection::NoOpenTag),
        [only] => *only,
        many => {
            return Stripped::Rejected(Rejection::MixedContent {
                open_tags: many.len(),
            })
        }
    };

    if tag.as_str() == "<?=" {
        return Stripped::Rejected(Rejection::OutputTag);
    }
    if !code[..tag.start()].trim().is_empty() {
        return Stripped::Rejected(Rejection::LeadingOutput);
    }

    let mut body = code[tag.end()..].trim();
    if let Some(open) = body.strip_suffix("?>") {
        body = open.trim_end();
    }
    Stripped::Plain(body.to_string())
}
