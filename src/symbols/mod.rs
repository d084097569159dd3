use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::errors::{BvcError, Result};
use crate::normalizer::SubjectKind;

/// A listed security and the identifiers each source expects for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub name: String,
    pub ticker: String,
    /// Identifier used by the medias24 price API
    pub isin: String,
    /// `codeValeur` of the casablanca-bourse company pages
    #[serde(default)]
    pub code: Option<String>,
}

impl Listing {
    pub fn new(name: &str, ticker: &str, isin: &str) -> Self {
        Self {
            name: name.to_string(),
            ticker: ticker.to_string(),
            isin: isin.to_string(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketIndex {
    Masi,
    Msi20,
}

impl MarketIndex {
    pub fn name(&self) -> &'static str {
        match self {
            MarketIndex::Masi => "MASI",
            MarketIndex::Msi20 => "MSI20",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "MASI" => Some(MarketIndex::Masi),
            "MSI20" | "MSI 20" => Some(MarketIndex::Msi20),
            _ => None,
        }
    }
}

/// What a query is about, resolved from a human-readable name
#[derive(Debug, Clone, PartialEq)]
pub enum Subject {
    Index(MarketIndex),
    Security(Listing),
}

impl Subject {
    pub fn kind(&self) -> SubjectKind {
        match self {
            Subject::Index(_) => SubjectKind::Index,
            Subject::Security(_) => SubjectKind::Security,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Subject::Index(index) => index.name(),
            Subject::Security(listing) => &listing.name,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Index(index) => f.write_str(index.name()),
            Subject::Security(listing) => write!(f, "{} ({})", listing.name, listing.isin),
        }
    }
}

/// Built-in listings. The symbols file passed to
/// [`SymbolDirectory::load_from_file`] overrides or extends them.
fn seed_listings() -> Vec<Listing> {
    [
        ("Attijariwafa Bank", "ATW", "MA0000012445"),
        ("Itissalat Al-Maghrib", "IAM", "MA0000011488"),
        ("BCP", "BCP", "MA0000011884"),
        ("CIH", "CIH", "MA0000011454"),
        ("LafargeHolcim Maroc", "LHM", "MA0000012320"),
        ("Ciments du Maroc", "CMA", "MA0000010506"),
        ("Cosumar", "CSR", "MA0000012247"),
        ("Douja Prom Addoha", "ADH", "MA0000011512"),
        ("Label Vie", "LBV", "MA0000011801"),
        ("Managem", "MNG", "MA0000011058"),
        ("Marsa Maroc", "MSA", "MA0000012312"),
        ("Sonasid", "SID", "MA0000010019"),
        ("HPS", "HPS", "MA0000011611"),
        ("Taqa Morocco", "TQM", "MA0000012205"),
        ("TotalEnergies Marketing Maroc", "TMA", "MA0000012262"),
    ]
    .iter()
    .map(|(name, ticker, isin)| Listing::new(name, ticker, isin))
    .collect()
}

fn key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Name → identifier lookup for securities, with MASI and MSI20 built in
pub struct SymbolDirectory {
    listings: Vec<Listing>,
    // 名称和代码的索引，用于快速查找
    name_index: HashMap<String, usize>,
}

impl Default for SymbolDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolDirectory {
    /// Directory holding the built-in listings.
    pub fn new() -> Self {
        Self::new_with_data(seed_listings())
    }

    pub fn new_with_data(listings: Vec<Listing>) -> Self {
        let mut directory = Self {
            listings,
            name_index: HashMap::new(),
        };
        directory.rebuild_indices();
        directory
    }

    /// Built-in listings merged with a JSON array of listings read from `path`.
    /// A missing file leaves the built-ins unchanged.
    pub fn load_from_file(path: &str) -> Result<Self> {
        let mut directory = Self::new();

        if Path::new(path).exists() {
            let text = fs::read_to_string(path)?;
            let listings: Vec<Listing> = serde_json::from_str(&text)?;
            info!("Loaded {} listings from {}", listings.len(), path);
            directory.merge(listings);
        } else {
            debug!("Symbols file {} not found, using built-in listings", path);
        }

        Ok(directory)
    }

    /// Add listings, replacing any existing entry with the same ticker.
    pub fn merge(&mut self, listings: Vec<Listing>) {
        for listing in listings {
            match self
                .listings
                .iter()
                .position(|l| l.ticker.eq_ignore_ascii_case(&listing.ticker))
            {
                Some(idx) => self.listings[idx] = listing,
                None => self.listings.push(listing),
            }
        }
        self.rebuild_indices();
    }

    pub fn all(&self) -> &[Listing] {
        &self.listings
    }

    /// Resolve a name, ticker or ISIN. `MASI` and `MSI20` are always indices.
    pub fn resolve(&self, name: &str) -> Result<Subject> {
        if let Some(index) = MarketIndex::parse(name) {
            return Ok(Subject::Index(index));
        }

        self.name_index
            .get(&key(name))
            .map(|&idx| Subject::Security(self.listings[idx].clone()))
            .ok_or_else(|| BvcError::UnknownSymbol(name.trim().to_string()))
    }

    fn rebuild_indices(&mut self) {
        self.name_index.clear();

        for (i, listing) in self.listings.iter().enumerate() {
            self.name_index.insert(key(&listing.name), i);
            self.name_index.insert(key(&listing.ticker), i);
            self.name_index.insert(key(&listing.isin), i);
        }
    }
}
