//! Sector identification and the catalog of known sectors.
//!
//! A sector is a service point (triage, a consulting office, ...) with its own
//! independent ticket numbering. The set of sectors is data, not code: a
//! [`SectorCatalog`] is built from configuration and consulted by stores when
//! a ticket is created.

use crate::ticket_store::TicketStoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while building a [`SectorCatalog`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// A sector code is empty or contains characters outside `[a-z0-9_-]`
    #[error("Invalid sector code: {0:?}")]
    InvalidCode(String),

    /// Two entries share a code
    #[error("Duplicate sector code: {0}")]
    DuplicateCode(String),

    /// Two entries share a ticket prefix
    #[error("Duplicate ticket prefix: {0}")]
    DuplicatePrefix(String),

    /// A `code:PREFIX[:Label]` entry could not be parsed
    #[error("Malformed sector entry: {0:?}")]
    MalformedEntry(String),

    /// The catalog would contain no sectors
    #[error("Sector catalog is empty")]
    Empty,
}

/// Sector code, e.g. `triage` or `office-1`.
///
/// `FromStr` normalizes to lowercase and validates; `new()` and `From` trust
/// their input (application-controlled data).
///
/// # Examples
///
/// ```
/// use clinic_queue_core::sector::SectorCode;
///
/// let parsed: SectorCode = " Office-1 ".parse().unwrap();
/// assert_eq!(parsed, SectorCode::new("office-1"));
/// assert!("two words".parse::<SectorCode>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectorCode(String);

impl SectorCode {
    /// Create a sector code without validation.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SectorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SectorCode {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_lowercase();
        let valid = !code.is_empty()
            && code
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(code))
        } else {
            Err(CatalogError::InvalidCode(s.to_string()))
        }
    }
}

impl From<&str> for SectorCode {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SectorCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One catalog entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorInfo {
    /// Sector code
    pub code: SectorCode,
    /// Prefix printed in front of ticket numbers (`TRI` in `TRI-007`)
    pub prefix: String,
    /// Human-readable label for panels
    pub label: String,
}

impl SectorInfo {
    /// Create a catalog entry.
    #[must_use]
    pub fn new(code: SectorCode, prefix: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            code,
            prefix: prefix.into(),
            label: label.into(),
        }
    }
}

/// The set of sectors tickets may be issued for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectorCatalog {
    sectors: Vec<SectorInfo>,
}

impl SectorCatalog {
    /// Build a catalog, rejecting duplicate codes or prefixes.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] on an empty list or a duplicate code/prefix.
    pub fn new(sectors: Vec<SectorInfo>) -> Result<Self, CatalogError> {
        if sectors.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut codes = HashSet::new();
        let mut prefixes = HashSet::new();
        for sector in &sectors {
            if !codes.insert(sector.code.clone()) {
                return Err(CatalogError::DuplicateCode(sector.code.to_string()));
            }
            if !prefixes.insert(sector.prefix.clone()) {
                return Err(CatalogError::DuplicatePrefix(sector.prefix.clone()));
            }
        }
        Ok(Self { sectors })
    }

    /// Parse `code:PREFIX[:Label]` entries separated by commas.
    ///
    /// # Examples
    ///
    /// ```
    /// use clinic_queue_core::sector::{SectorCatalog, SectorCode};
    ///
    /// let catalog = SectorCatalog::parse("triage:TRI:Triage, lab:LAB").unwrap();
    /// assert_eq!(catalog.len(), 2);
    /// assert_eq!(catalog.get(&SectorCode::new("lab")).unwrap().label, "lab");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if an entry is malformed or duplicated.
    pub fn parse(list: &str) -> Result<Self, CatalogError> {
        let mut sectors = Vec::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(3, ':').map(str::trim);
            let code: SectorCode = parts
                .next()
                .ok_or_else(|| CatalogError::MalformedEntry(entry.to_string()))?
                .parse()?;
            let prefix = parts
                .next()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| CatalogError::MalformedEntry(entry.to_string()))?
                .to_ascii_uppercase();
            let label = parts
                .next()
                .filter(|l| !l.is_empty())
                .map_or_else(|| code.to_string(), str::to_string);
            sectors.push(SectorInfo::new(code, prefix, label));
        }
        Self::new(sectors)
    }

    /// Look up a sector.
    #[must_use]
    pub fn get(&self, code: &SectorCode) -> Option<&SectorInfo> {
        self.sectors.iter().find(|s| &s.code == code)
    }

    /// Look up a sector, failing with a validation error when unknown.
    ///
    /// # Errors
    ///
    /// Returns [`TicketStoreError::Validation`] for an unknown sector.
    pub fn require(&self, code: &SectorCode) -> Result<&SectorInfo, TicketStoreError> {
        self.get(code)
            .ok_or_else(|| TicketStoreError::Validation(format!("unknown sector: {code}")))
    }

    /// Whether the sector exists.
    #[must_use]
    pub fn contains(&self, code: &SectorCode) -> bool {
        self.get(code).is_some()
    }

    /// Iterate over all sectors in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &SectorInfo> {
        self.sectors.iter()
    }

    /// Number of sectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    /// Always `false` for a constructed catalog; present for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }
}

impl Default for SectorCatalog {
    /// Triage plus two consulting offices.
    fn default() -> Self {
        Self {
            sectors: vec![
                SectorInfo::new(SectorCode::new("triage"), "TRI", "Triage"),
                SectorInfo::new(SectorCode::new("office-1"), "C1", "Office 1"),
                SectorInfo::new(SectorCode::new("office-2"), "C2", "Office 2"),
            ],
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_clinic_sectors() {
        let catalog = SectorCatalog::default();
        assert!(catalog.contains(&SectorCode::new("triage")));
        assert_eq!(catalog.get(&SectorCode::new("office-2")).unwrap().prefix, "C2");
        assert!(matches!(
            catalog.require(&SectorCode::new("radiology")),
            Err(TicketStoreError::Validation(_))
        ));
    }

    #[test]
    fn parse_rejects_duplicates() {
        assert_eq!(
            SectorCatalog::parse("triage:TRI,triage:T2"),
            Err(CatalogError::DuplicateCode("triage".to_string()))
        );
        assert_eq!(
            SectorCatalog::parse("triage:TRI,lab:tri"),
            Err(CatalogError::DuplicatePrefix("TRI".to_string()))
        );
    }

    #[test]
    fn parse_rejects_malformed_entries() {
        assert!(matches!(
            SectorCatalog::parse("triage"),
            Err(CatalogError::MalformedEntry(_))
        ));
        assert!(matches!(
            SectorCatalog::parse("bad code:X"),
            Err(CatalogError::InvalidCode(_))
        ));
        assert_eq!(SectorCatalog::parse(" , "), Err(CatalogError::Empty));
    }
}
