//! Per-run alias registry.
//!
//! A registry owns the alias tables for one obfuscation run and picks one
//! decoder alias and one argument alias from them, lazily and only once.
//! Every unit wrapped through the same registry therefore names the same
//! aliases, and the revert unit generated from it defines all of them.

use crate::config::{AliasTable, DecoderAlias, Scheme};
use crate::error::{ObfuscatorError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::{OnceCell, RefCell};

pub struct SchemeRegistry {
    table: AliasTable,
    rng: RefCell<StdRng>,
    packing: OnceCell<usize>,
    argument: OnceCell<usize>,
}

impl SchemeRegistry {
    /// Registry drawing from OS entropy
    pub fn new(table: AliasTable) -> Result<Self> {
        Self::with_rng(table, StdRng::from_entropy())
    }

    /// Registry with reproducible alias choices
    pub fn with_seed(table: AliasTable, seed: u64) -> Result<Self> {
        Self::with_rng(table, StdRng::seed_from_u64(seed))
    }

    /// Seeded when `seed` is given, entropy otherwise
    pub fn from_seed(table: AliasTable, seed: Option<u64>) -> Result<Self> {
        match seed {
            Some(seed) => Self::with_seed(table, seed),
            None => Self::new(table),
        }
    }

    fn with_rng(table: AliasTable, rng: StdRng) -> Result<Self> {
        table.validate()?;
        Ok(Self {
            table,
            rng: RefCell::new(rng),
            packing: OnceCell::new(),
            argument: OnceCell::new(),
        })
    }

    pub fn table(&self) -> &AliasTable {
        &self.table
    }

    /// The decoder alias for this run, chosen on first use
    pub fn choose_packing_alias(&self) -> &DecoderAlias {
        let decoders = &self.table.decoders;
        let index = *self
            .packing
            .get_or_init(|| self.rng.borrow_mut().gen_range(0..decoders.len()));
        &decoders[index]
    }

    /// The argument alias for this run, chosen on first use
    pub fn choose_argument_alias(&self) -> &str {
        let arguments = &self.table.arguments;
        let index = *self
            .argument
            .get_or_init(|| self.rng.borrow_mut().gen_range(0..arguments.len()));
        &arguments[index]
    }

    /// Scheme behind a decoder alias
    pub fn resolve_scheme(&self, alias: &str) -> Result<Scheme> {
        self.table
            .decoders
            .iter()
            .find(|d| d.name == alias)
            .map(|d| d.scheme)
            .ok_or_else(|| ObfuscatorError::UnknownAlias(alias.to_string()))
    }

    pub fn is_argument_alias(&self, alias: &str) -> bool {
        self.table.arguments.iter().any(|a| a == alias)
    }

    /// Distinct schemes referenced by the decoder table, in scheme order
    pub fn referenced_schemes(&self) -> Vec<Scheme> {
        let mut schemes: Vec<Scheme> = self.table.decoders.iter().map(|d| d.scheme).collect();
        schemes.sort();
        schemes.dedup();
        schemes
    }
}

impl std::fmt::Debug for SchemeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemeRegistry")
            .field("decoders", &self.table.decoders.len())
            .field("arguments", &self.table.arguments.len())
            .field("packing", &self.packing.get())
            .field("argument", &self.argument.get())
            .finish()
    }
}
