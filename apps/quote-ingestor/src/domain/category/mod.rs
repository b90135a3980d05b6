//! Instrument Classification
//!
//! Maps instrument symbols to the destination table they are upserted
//! into. The tables are static data loaded once from an embedded,
//! versioned YAML resource and never change for the life of the process.
//!
//! # Rules
//!
//! - Symbols are upper-cased, trimmed and cut at the first `" - "` before
//!   lookup, so `" al30 - 24hs"` looks up `AL30`.
//! - Symbols ending in a rejected suffix never match.
//! - Categories are tested in resource order; first match wins.
//! - Repo and option batches route by kind to a fixed table.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::quote::{InstrumentKind, Subscription};

/// Separator between base symbol and settlement in composite symbols.
pub const COMPOSITE_SEPARATOR: &str = " - ";

/// Embedded classification resource.
const EMBEDDED_TABLES: &str = include_str!("../../../config/categories.yaml");

// =============================================================================
// Category
// =============================================================================

/// Destination table for an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    /// Fixed-rate treasury bills and bonds.
    #[serde(rename = "tasa_fija")]
    FixedRate,
    /// Hard-dollar sovereign bonds.
    #[serde(rename = "bonos_soberanos")]
    SovereignBonds,
    /// Dollar-linked bonds.
    #[serde(rename = "dolar_linked")]
    DollarLinked,
    /// Inflation-linked (CER) bonds.
    #[serde(rename = "bonos_cer")]
    InflationLinked,
    /// Repo / caution rates.
    #[serde(rename = "cauciones")]
    Repos,
    /// Dollar futures.
    #[serde(rename = "dolar_futuro")]
    DollarFutures,
    /// Leading equities.
    #[serde(rename = "acciones")]
    Equities,
    /// Corporate bonds.
    #[serde(rename = "obligaciones_negociables")]
    CorporateBonds,
    /// Depositary receipts of foreign stocks.
    #[serde(rename = "cedears")]
    Cedears,
    /// Listed options.
    #[serde(rename = "opciones")]
    Options,
    /// General board equities.
    #[serde(rename = "panel_general")]
    GeneralBoard,
}

impl Category {
    /// Every category, in declaration order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::FixedRate,
            Self::SovereignBonds,
            Self::DollarLinked,
            Self::InflationLinked,
            Self::Repos,
            Self::DollarFutures,
            Self::Equities,
            Self::CorporateBonds,
            Self::Cedears,
            Self::Options,
            Self::GeneralBoard,
        ]
    }

    /// Remote table (collection) name.
    #[must_use]
    pub const fn table(&self) -> &'static str {
        match self {
            Self::FixedRate => "tasa_fija",
            Self::SovereignBonds => "bonos_soberanos",
            Self::DollarLinked => "dolar_linked",
            Self::InflationLinked => "bonos_cer",
            Self::Repos => "cauciones",
            Self::DollarFutures => "dolar_futuro",
            Self::Equities => "acciones",
            Self::CorporateBonds => "obligaciones_negociables",
            Self::Cedears => "cedears",
            Self::Options => "opciones",
            Self::GeneralBoard => "panel_general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while loading classification tables.
#[derive(Debug, thiserror::Error)]
pub enum CategoryError {
    /// Resource is not valid YAML or has the wrong shape.
    #[error("invalid classification resource: {0}")]
    Parse(#[from] serde_yaml_bw::Error),

    /// A category appears more than once.
    #[error("category {0} is listed more than once")]
    DuplicateCategory(Category),

    /// A symbol belongs to two categories.
    #[error("symbol {symbol} is listed under both {first} and {second}")]
    OverlappingSymbol {
        /// Offending symbol.
        symbol: String,
        /// Category that listed it first.
        first: Category,
        /// Category that listed it again.
        second: Category,
    },

    /// A rejected suffix is blank.
    #[error("rejected suffixes cannot be empty")]
    EmptySuffix,
}

// =============================================================================
// Resource Shape
// =============================================================================

#[derive(Debug, Deserialize)]
struct TablesFile {
    version: u32,
    #[serde(default)]
    reject_suffixes: Vec<String>,
    #[serde(default)]
    kind_routes: BTreeMap<InstrumentKind, Category>,
    categories: Vec<CategoryEntry>,
    #[serde(default)]
    subscriptions: Vec<Subscription>,
}

#[derive(Debug, Deserialize)]
struct CategoryEntry {
    category: Category,
    #[serde(default)]
    symbols: Vec<String>,
}

// =============================================================================
// Category Table
// =============================================================================

/// Immutable classification tables.
///
/// # Example
///
/// ```rust
/// use quote_ingestor::domain::category::{Category, CategoryTable};
///
/// let tables = CategoryTable::embedded().unwrap();
/// assert_eq!(tables.classify(" al30 "), Some(Category::SovereignBonds));
/// assert_eq!(tables.classify("AL30 - 24hs"), Some(Category::SovereignBonds));
/// assert_eq!(tables.classify("NOT_LISTED"), None);
/// ```
#[derive(Debug, Clone)]
pub struct CategoryTable {
    version: u32,
    reject_suffixes: Vec<String>,
    kind_routes: BTreeMap<InstrumentKind, Category>,
    sets: Vec<(Category, HashSet<String>)>,
    subscriptions: Vec<Subscription>,
}

impl CategoryTable {
    /// Load the tables compiled into the binary.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded resource fails validation.
    pub fn embedded() -> Result<Self, CategoryError> {
        Self::from_yaml(EMBEDDED_TABLES)
    }

    /// Parse and validate tables from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed YAML, duplicated categories,
    /// overlapping symbol sets or blank suffixes.
    pub fn from_yaml(source: &str) -> Result<Self, CategoryError> {
        let file: TablesFile = serde_yaml_bw::from_str(source)?;

        let mut reject_suffixes = Vec::with_capacity(file.reject_suffixes.len());
        for suffix in file.reject_suffixes {
            let suffix = suffix.trim().to_uppercase();
            if suffix.is_empty() {
                return Err(CategoryError::EmptySuffix);
            }
            reject_suffixes.push(suffix);
        }

        let mut owner: HashMap<String, Category> = HashMap::new();
        let mut sets: Vec<(Category, HashSet<String>)> = Vec::with_capacity(file.categories.len());

        for entry in file.categories {
            if sets.iter().any(|(c, _)| *c == entry.category) {
                return Err(CategoryError::DuplicateCategory(entry.category));
            }

            let mut symbols = HashSet::with_capacity(entry.symbols.len());
            for raw in entry.symbols {
                let symbol = raw.trim().to_uppercase();
                if let Some(first) = owner.get(&symbol)
                    && *first != entry.category
                {
                    return Err(CategoryError::OverlappingSymbol {
                        symbol,
                        first: *first,
                        second: entry.category,
                    });
                }
                owner.insert(symbol.clone(), entry.category);
                symbols.insert(symbol);
            }

            sets.push((entry.category, symbols));
        }

        Ok(Self {
            version: file.version,
            reject_suffixes,
            kind_routes: file.kind_routes,
            sets,
            subscriptions: file.subscriptions,
        })
    }

    /// Resource version.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Classify a symbol by table lookup.
    ///
    /// Returns `None` (unclassified) when no table contains the symbol or
    /// the symbol carries a rejected suffix.
    #[must_use]
    pub fn classify(&self, symbol: &str) -> Option<Category> {
        let base = base_symbol(symbol);
        if base.is_empty() || self.is_rejected(&base) {
            return None;
        }

        self.sets
            .iter()
            .find(|(_, symbols)| symbols.contains(&base))
            .map(|(category, _)| *category)
    }

    /// Route a record: fixed table for kind-routed batches, lookup otherwise.
    #[must_use]
    pub fn route(&self, kind: InstrumentKind, symbol: &str) -> Option<Category> {
        self.kind_routes
            .get(&kind)
            .copied()
            .or_else(|| self.classify(symbol))
    }

    /// Whether the base symbol ends in a rejected suffix.
    #[must_use]
    pub fn is_rejected(&self, symbol: &str) -> bool {
        let base = base_symbol(symbol);
        self.reject_suffixes
            .iter()
            .any(|suffix| base.ends_with(suffix.as_str()))
    }

    /// Categories that own a non-empty symbol set, in priority order.
    pub fn lookup_categories(&self) -> impl Iterator<Item = (Category, Vec<String>)> + '_ {
        self.sets
            .iter()
            .filter(|(_, symbols)| !symbols.is_empty())
            .map(|(category, symbols)| {
                let mut sorted: Vec<String> = symbols.iter().cloned().collect();
                sorted.sort_unstable();
                (*category, sorted)
            })
    }

    /// Kind a category is queried under in poll mode.
    #[must_use]
    pub fn query_kind(&self, category: Category) -> InstrumentKind {
        self.kind_routes
            .iter()
            .find(|(_, routed)| **routed == category)
            .map_or(InstrumentKind::Securities, |(kind, _)| *kind)
    }

    /// Push-mode subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }
}

/// Normalize a symbol for lookup: trim, upper-case, cut the settlement.
#[must_use]
pub fn base_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    upper
        .split_once(COMPOSITE_SEPARATOR)
        .map_or(upper.as_str(), |(base, _)| base)
        .trim()
        .to_string()
}

// =============================================================================
// Tests
// =============================================================================
