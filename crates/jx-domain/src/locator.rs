//! Identifiers for packages and resolved package instances.

use std::fmt;

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

/// Reference prefix marking a peer-resolution variant of a package.
pub const VIRTUAL_PREFIX: &str = "virtual:";

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Package identifier, optionally scoped (`@scope/name`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident {
    pub scope: Option<String>,
    pub name: String,
}

impl Ident {
    pub fn new(scope: Option<&str>, name: &str) -> Self {
        Self {
            scope: scope.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Parse `name` or `@scope/name`; rejects malformed input.
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(rest) = raw.strip_prefix('@') {
            let (scope, name) = rest.split_once('/')?;
            if scope.is_empty() || name.is_empty() || name.contains('/') {
                return None;
            }
            Some(Self::new(Some(scope), name))
        } else if raw.is_empty() || raw.contains('/') {
            None
        } else {
            Some(Self::new(None, raw))
        }
    }

    pub fn ident_hash(&self) -> String {
        sha256_hex(&self.to_string())
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "@{scope}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A dependency request: an ident plus the range it was requested under.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Descriptor {
    pub ident: Ident,
    pub range: String,
}

impl Descriptor {
    pub fn new(ident: Ident, range: impl Into<String>) -> Self {
        Self {
            ident,
            range: range.into(),
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ident, self.range)
    }
}

/// A resolved package identity: an ident plus the reference it resolved to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Locator {
    pub ident: Ident,
    pub reference: String,
}

impl Locator {
    pub fn new(ident: Ident, reference: impl Into<String>) -> Self {
        Self {
            ident,
            reference: reference.into(),
        }
    }

    /// Stable content hash of this locator, usable as a map key.
    pub fn locator_hash(&self) -> String {
        sha256_hex(&self.to_string())
    }

    /// Whether this locator is a peer-resolution variant.
    pub fn is_virtual(&self) -> bool {
        self.reference.starts_with(VIRTUAL_PREFIX)
    }

    /// Strip the virtual marker, returning the underlying locator. Identity
    /// for non-virtual locators.
    pub fn devirtualize(&self) -> Locator {
        let Some(rest) = self.reference.strip_prefix(VIRTUAL_PREFIX) else {
            return self.clone();
        };
        match rest.split_once('#') {
            Some((_, inner)) => Locator::new(self.ident.clone(), inner),
            None => self.clone(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ident, self.reference)
    }
}

/// Parse the `Display` form of a locator (`ident@reference`).
pub fn parse_locator(raw: &str) -> Result<Locator> {
    let separator = if raw.starts_with('@') {
        raw.find('/')
            .and_then(|slash| raw[slash..].find('@').map(|at| slash + at))
    } else {
        raw.find('@')
    };
    let Some(at) = separator else {
        return Err(anyhow!("invalid locator `{raw}`: missing reference"));
    };
    let ident = Ident::parse(&raw[..at])
        .ok_or_else(|| anyhow!("invalid locator `{raw}`: malformed ident"))?;
    let reference = &raw[at + 1..];
    if reference.is_empty() {
        return Err(anyhow!("invalid locator `{raw}`: empty reference"));
    }
    Ok(Locator::new(ident, reference))
}

/// Deterministic filesystem-safe slug, unique per locator.
///
/// The hash suffix carries uniqueness; the ident and reference parts exist for
/// readability when poking around the store by hand.
pub fn slugify_locator(locator: &Locator) -> String {
    let ident_part = match &locator.ident.scope {
        Some(scope) => format!("{scope}-{}", locator.ident.name),
        None => locator.ident.name.clone(),
    };
    let reference = locator
        .reference
        .rsplit_once(':')
        .map_or(locator.reference.as_str(), |(_, tail)| tail);
    let mut cleaned = String::with_capacity(reference.len());
    for ch in reference.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            cleaned.push(ch);
        } else {
            cleaned.push('-');
        }
    }
    let hash = locator.locator_hash();
    format!("{ident_part}-{cleaned}-{}", &hash[..10])
}
