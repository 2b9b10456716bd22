//! In-Memory Market Directory
//!
//! Static implementation of the [`MarketDirectory`] port. The real
//! instrument metadata service is external; this directory serves a fixed
//! set of markets supplied at construction, which is enough for the binary
//! and for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{DirectoryError, MarketDirectory};

/// One market: human-readable symbol and native venue id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarketEntry {
    /// Human-readable symbol (`BTC/USDT`).
    pub symbol: String,
    /// Native id (`BTCUSDT`).
    pub id: String,
}

impl MarketEntry {
    /// Create an entry.
    #[must_use]
    pub fn new(symbol: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            id: id.into(),
        }
    }

    /// Derive the entry from a `BASE/QUOTE` pair by concatenation.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::InvalidEntry`] if `pair` is not `BASE/QUOTE`.
    pub fn from_pair(pair: &str) -> Result<Self, DirectoryError> {
        match pair.split_once('/') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => Ok(Self::new(
                pair,
                format!("{base}{quote}").to_ascii_uppercase(),
            )),
            _ => Err(DirectoryError::InvalidEntry(pair.to_string())),
        }
    }
}

#[derive(Debug, Default)]
struct Index {
    by_symbol: HashMap<String, String>,
    by_id: HashMap<String, String>,
}

/// Directory backed by a fixed market list.
///
/// Native ids are matched case-insensitively; stream names carry them in
/// lowercase while payloads carry them in uppercase.
#[derive(Debug)]
pub struct InMemoryMarketDirectory {
    entries: Vec<MarketEntry>,
    index: RwLock<Index>,
}

impl InMemoryMarketDirectory {
    /// Create a directory; the index is built immediately.
    #[must_use]
    pub fn new(entries: Vec<MarketEntry>) -> Self {
        let directory = Self {
            entries,
            index: RwLock::new(Index::default()),
        };
        directory.rebuild();
        directory
    }

    /// Directory from `BASE/QUOTE` pairs; malformed pairs are skipped.
    #[must_use]
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = pairs
            .into_iter()
            .filter_map(|pair| match MarketEntry::from_pair(pair.as_ref()) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping market entry");
                    None
                }
            })
            .collect();
        Self::new(entries)
    }

    /// Number of markets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the directory has no markets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn rebuild(&self) {
        let mut index = self.index.write();
        index.by_symbol.clear();
        index.by_id.clear();
        for entry in &self.entries {
            let id = entry.id.to_ascii_uppercase();
            index.by_symbol.insert(entry.symbol.clone(), id.clone());
            index.by_id.insert(id, entry.symbol.clone());
        }
    }
}

#[async_trait]
impl MarketDirectory for InMemoryMarketDirectory {
    async fn load(&self) -> Result<(), DirectoryError> {
        self.rebuild();
        tracing::debug!(markets = self.entries.len(), "Market directory loaded");
        Ok(())
    }

    fn native_id(&self, symbol: &str) -> Option<String> {
        self.index.read().by_symbol.get(symbol).cloned()
    }

    fn symbol_for(&self, native_id: &str) -> Option<String> {
        self.index
            .read()
            .by_id
            .get(&native_id.to_ascii_uppercase())
            .cloned()
    }
}
