use crate::config::Scheme;
use crate::error::{ObfuscatorError, Result};
use base64::{engine::general_purpose, Engine as _};

/// Structural constants of a packing scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemeSpec {
    /// Split offset into the base64 text
    pub offset: usize,
    /// Token spliced in at the offset to break naive base64 detection
    pub marker: &'static str,
}

/// PHP body of every scheme's unpack function.
/// `{name}`, `{offset}` and `{marker_len}` are filled from [`SchemeSpec`],
/// the same constants [`pack`] and [`unpack`] use.
pub const UNPACK_TEMPLATE: &str = "function {name}($data)
{
    return base64_decode(substr_replace($data, '', min({offset}, strlen($data) - {marker_len}), {marker_len}));
}
";

impl Scheme {
    pub fn spec(self) -> SchemeSpec {
        match self {
            Self::One => SchemeSpec {
                offset: 10,
                marker: "Sg",
            },
            Self::Two => SchemeSpec {
                offset: 5,
                marker: "Vw",
            },
            Self::Three => SchemeSpec {
                offset: 15,
                marker: "Jk",
            },
        }
    }

    /// Render this scheme's PHP unpack function
    pub fn unpack_source(self) -> String {
        let spec = self.spec();
        UNPACK_TEMPLATE
            .replace("{name}", self.function_name())
            .replace("{offset}", &spec.offset.to_string())
            .replace("{marker_len}", &spec.marker.len().to_string())
    }
}

/// Pack data with the specified scheme
pub fn pack(data: &[u8], scheme: Scheme) -> String {
    let spec = scheme.spec();
    let encoded = general_purpose::STANDARD.encode(data);

    // Short payloads carry the marker at their end
    let at = spec.offset.min(encoded.len());
    let mut packed = String::with_capacity(encoded.len() + spec.marker.len());
    packed.push_str(&encoded[..at]);
    packed.push_str(spec.marker);
    packed.push_str(&encoded[at..]);
    packed
}

/// Unpack data packed by the same scheme
pub fn unpack(packed: &str, scheme: Scheme) -> Result<Vec<u8>> {
    let spec = scheme.spec();
    let mismatch = || ObfuscatorError::MarkerMismatch {
        scheme: scheme.function_name(),
        expected: spec.marker,
        offset: spec.offset,
    };

    let marker_len = spec.marker.len();
    if packed.len() < marker_len {
        return Err(mismatch());
    }
    let at = spec.offset.min(packed.len() - marker_len);
    match packed.get(at..at + marker_len) {
        Some(found) if found == spec.marker => {}
        _ => return Err(mismatch()),
    }

    let mut encoded = String::with_capacity(packed.len() - marker_len);
    encoded.push_str(&packed[..at]);
    encoded.push_str(&packed[at + marker_len..]);
    Ok(general_purpose::STANDARD.decode(encoded)?)
}
