use crate::config::Scheme;
use crate::pipeline::pack;
use crate::registry::SchemeRegistry;
use crate::transform::emit_bootstrap;

const INDENT: &str = "    ";

/// Builds the companion unit that defines every alias an obfuscated unit may call
pub struct RevertUnitGenerator<'r> {
    registry: &'r SchemeRegistry,
    bootstrap: Scheme,
    suppress_errors: bool,
}

impl<'r> RevertUnitGenerator<'r> {
    pub fn new(registry: &'r SchemeRegistry, bootstrap: Scheme) -> Self {
        Self {
            registry,
            bootstrap,
            suppress_errors: true,
        }
    }

    pub fn suppress_errors(mut self, suppress: bool) -> Self {
        self.suppress_errors = suppress;
        self
    }

    /// Decoder definitions as plain code, without an open tag
    pub fn plain_source(&self) -> String {
        let table = self.registry.table();
        let mut lines = Vec::new();

        // Forwarders absorb the argument alias in `$revert`
        for decoder in &table.decoders {
            lines.push(format!(
                "function {}($data, $revert = false)\n{{\n{}return {}($data);\n}}\n",
                decoder.name,
                INDENT,
                decoder.scheme.function_name()
            ));
        }

        for scheme in self.registry.referenced_schemes() {
            lines.push(scheme.unpack_source());
        }

        for argument in &table.arguments {
            lines.push(format!("function {}() {{ return true; }}\n", argument));
        }

        lines.join("\n")
    }

    /// The revert unit, encoded with the inline bootstrap scheme
    pub fn generate(&self) -> String {
        let plain = self.plain_source();
        let spec = self.bootstrap.spec();
        let packed = pack(plain.as_bytes(), self.bootstrap);
        let marker_len = spec.marker.len();
        let at = spec.offset.min(packed.len() - marker_len);

        tracing::debug!(
            decoders = self.registry.table().decoders.len(),
            bootstrap = %self.bootstrap,
            "generated revert unit"
        );

        let prefix = if self.suppress_errors { "@" } else { "" };
        emit_bootstrap(
            &format!("{}eval(base64_decode(substr_replace(", prefix),
            &packed,
            &format!(",'',{},{})));", at, marker_len),
        )
    }
}
