// src/scrape/parsers.rs
//! Built-in quote extraction strategies.

use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use scraper::{Html, Selector};

use super::QuoteParser;
use crate::error::ParseError;
use crate::types::Quote;

/// Default selector: `<ul><li>Price: <b>..</b></li><li>Date: <b>..</b></li></ul>`.
pub const DEFAULT_LIST_SELECTOR: &str = "ul > li > b";

/// Takes the text of the first two elements matched by a CSS selector as
/// price and date. A missing or blank price is an error; a missing date is not.
pub struct ListItemParser {
    selector: Selector,
}

impl ListItemParser {
    pub fn new(selector: &str) -> Result<Self> {
        let selector =
            Selector::parse(selector).map_err(|e| anyhow!("invalid selector {selector:?}: {e}"))?;
        Ok(Self { selector })
    }
}

impl Default for ListItemParser {
    fn default() -> Self {
        static DEFAULT: OnceCell<Selector> = OnceCell::new();
        // Constant selector: parsing cannot fail (covered by `default_selector_parses`).
        let selector = DEFAULT.get_or_init(|| Selector::parse(DEFAULT_LIST_SELECTOR).unwrap());
        Self {
            selector: selector.clone(),
        }
    }
}

impl QuoteParser for ListItemParser {
    fn parse(&self, document: &str) -> Result<Quote, ParseError> {
        let doc = Html::parse_document(document);
        let mut texts = doc
            .select(&self.selector)
            .map(|el| el.text().collect::<String>().trim().to_string());

        let price = texts.next().unwrap_or_default();
        if price.is_empty() {
            return Err(ParseError::NotFound("price"));
        }
        let date = texts.next().unwrap_or_default();
        Ok(Quote { price, date })
    }

    fn name(&self) -> &'static str {
        "list-item"
    }
}

/// Regex strategy: the first capture group of `price` (and of `date`, if set).
pub struct RegexParser {
    price: Regex,
    date: Option<Regex>,
}

impl RegexParser {
    pub fn new(price: &str, date: Option<&str>) -> Result<Self> {
        let price = Regex::new(price).with_context(|| format!("compiling price regex {price:?}"))?;
        let date = date
            .map(|d| Regex::new(d).with_context(|| format!("compiling date regex {d:?}")))
            .transpose()?;
        if price.captures_len() < 2 {
            return Err(anyhow!("price regex needs a capture group"));
        }
        Ok(Self { price, date })
    }

    fn capture(re: &Regex, document: &str) -> Option<String> {
        re.captures(document)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl QuoteParser for RegexParser {
    fn parse(&self, document: &str) -> Result<Quote, ParseError> {
        if document.trim().is_empty() {
            return Err(ParseError::Malformed("empty document".into()));
        }
        let price = Self::capture(&self.price, document).ok_or(ParseError::NotFound("price"))?;
        let date = match &self.date {
            Some(re) => Self::capture(re, document).ok_or(ParseError::NotFound("date"))?,
            None => String::new(),
        };
        Ok(Quote { price, date })
    }

    fn name(&self) -> &'static str {
        "regex"
    }
}
