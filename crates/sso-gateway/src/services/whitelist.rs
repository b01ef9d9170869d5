//! Redirect whitelist validation.
//!
//! The whitelist is a `;`-separated list of regular expressions. A candidate
//! URL is allowed when any entry matches the *whole* candidate. Entries are
//! expected to carry their own `^`/`$`; each one is additionally wrapped as
//! `^(?:entry)$` so an unanchored entry still cannot match a substring.
//! Every entry must compile on its own before it is wrapped, otherwise the
//! wrapper could close a stray group and turn it into an alternation.
//!
//! Surrounding whitespace is trimmed from each entry. An absent or empty
//! whitelist allows nothing.

use regex::Regex;

/// Compiled redirect whitelist. Immutable once built.
#[derive(Debug, Clone)]
pub struct WhitelistValidator {
    patterns: Vec<Regex>,
}

impl WhitelistValidator {
    /// Compile the whitelist.
    ///
    /// # Errors
    ///
    /// Returns the regex error for the first entry that does not compile.
    /// Bad entries are never skipped.
    pub fn new(whitelist: Option<&str>) -> Result<Self, regex::Error> {
        let patterns = whitelist
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                Regex::new(entry)?;
                Regex::new(&format!("^(?:{})$", entry))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// Returns `true` iff some entry fully matches `candidate`.
    ///
    /// Entries are tried in declaration order; the first match wins.
    pub fn is_allowed(&self, candidate: Option<&str>) -> bool {
        match candidate {
            Some(url) if !url.is_empty() => self.patterns.iter().any(|p| p.is_match(url)),
            _ => false,
        }
    }

    /// Number of compiled entries.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
