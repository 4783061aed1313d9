// src/catalog.rs
//! # Catalog
//! Static description of what to quote (items and their sources) and who
//! does the work (fetchers). No behaviour beyond eligibility rules.
//!
//! - A **source** is eligible iff it is enabled and names an enabled fetcher
//!   that exists in the catalog.
//! - An **item** is eligible iff it is enabled and has at least one eligible
//!   source.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::scrape::QuoteParser;

/// A named, concurrency-bounded scraper.
#[derive(Clone)]
pub struct Fetcher {
    pub name: String,
    pub disabled: bool,
    /// Max simultaneous attempts. Zero is treated as one.
    pub concurrency: usize,
    pub parser: Arc<dyn QuoteParser>,
}

impl Fetcher {
    pub fn new(name: impl Into<String>, parser: Arc<dyn QuoteParser>) -> Self {
        Self {
            name: name.into(),
            disabled: false,
            concurrency: 1,
            parser,
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn workers(&self) -> usize {
        self.concurrency.max(1)
    }
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("name", &self.name)
            .field("disabled", &self.disabled)
            .field("concurrency", &self.concurrency)
            .field("parser", &self.parser.name())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub fetcher: String,
    pub url: String,
    pub disabled: bool,
}

impl Source {
    pub fn new(fetcher: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            fetcher: fetcher.into(),
            url: url.into(),
            disabled: false,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub isin: String,
    pub disabled: bool,
    pub sources: Vec<Source>,
}

impl Item {
    pub fn new(id: impl Into<String>, name: impl Into<String>, isin: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            isin: isin.into(),
            disabled: false,
            sources: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

/// Items and fetchers for one dispatch run. Ordered maps keep iteration
/// deterministic, which the work-unit builder relies on before shuffling.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    fetchers: BTreeMap<String, Fetcher>,
    items: BTreeMap<String, Item>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fetcher, replacing any previous one with the same name.
    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetchers.insert(fetcher.name.clone(), fetcher);
        self
    }

    /// Adds an item, replacing any previous one with the same id.
    pub fn with_item(mut self, item: Item) -> Self {
        self.items.insert(item.id.clone(), item);
        self
    }

    pub fn fetcher(&self, name: &str) -> Option<&Fetcher> {
        self.fetchers.get(name)
    }

    pub fn fetchers(&self) -> impl Iterator<Item = &Fetcher> {
        self.fetchers.values()
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn is_source_eligible(&self, source: &Source) -> bool {
        !source.disabled
            && self
                .fetchers
                .get(&source.fetcher)
                .is_some_and(|f| !f.disabled)
    }

    pub fn is_item_eligible(&self, item: &Item) -> bool {
        !item.disabled && item.sources.iter().any(|s| self.is_source_eligible(s))
    }

    pub fn eligible_items(&self) -> impl Iterator<Item = &Item> {
        self.items().filter(|it| self.is_item_eligible(it))
    }
}
