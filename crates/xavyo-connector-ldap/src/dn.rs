//! Distinguished names and the schema service that qualifies them.
//!
//! Routing compares DNs for equality and ancestry. Those comparisons are
//! only reliable once attribute types and values have been normalized
//! against a schema, so a parsed [`Dn`] starts out plain and becomes
//! schema-qualified through a [`DnSchema`].

use std::fmt;

use thiserror::Error;

/// Errors produced while parsing or qualifying a DN.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnError {
    /// The string is not a syntactically valid DN.
    #[error("invalid DN '{dn}': {reason}")]
    Invalid { dn: String, reason: String },

    /// The DN parsed but cannot be normalized against the schema.
    #[error("DN '{dn}' cannot be schema-qualified: {reason}")]
    Unqualifiable { dn: String, reason: String },
}

/// One `type=value` assertion inside an RDN.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ava {
    attr_type: String,
    value: String,
}

impl Ava {
    /// Attribute type as parsed (or normalized, for qualified DNs).
    pub fn attr_type(&self) -> &str {
        &self.attr_type
    }

    /// Unescaped attribute value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// A relative distinguished name (one or more AVAs joined by `+`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    avas: Vec<Ava>,
}

impl Rdn {
    /// The assertions making up this RDN.
    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DnKind {
    Plain,
    Qualified,
    /// `<GUID=...>` style extended DN, opaque to routing.
    Extended,
}

/// A parsed distinguished name.
///
/// RDNs are stored leaf first, as written: `cn=bob,ou=sales,dc=example`
/// has `cn=bob` at index 0.
#[derive(Debug, Clone)]
pub struct Dn {
    raw: String,
    rdns: Vec<Rdn>,
    kind: DnKind,
}

impl Dn {
    /// Parse a DN string (RFC 4514). The result is not schema-qualified.
    pub fn parse(input: &str) -> Result<Self, DnError> {
        let trimmed = input.trim();
        let invalid = |reason: &str| DnError::Invalid {
            dn: input.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.starts_with('<') {
            if !trimmed.contains('>') {
                return Err(invalid("unterminated extended DN component"));
            }
            return Ok(Self {
                raw: trimmed.to_string(),
                rdns: Vec::new(),
                kind: DnKind::Extended,
            });
        }

        let mut rdns = Vec::new();
        if !trimmed.is_empty() {
            for rdn_str in split_unescaped(trimmed, &[',', ';']).map_err(|r| invalid(&r))? {
                let mut avas = Vec::new();
                for ava_str in split_unescaped(rdn_str, &['+']).map_err(|r| invalid(&r))? {
                    avas.push(parse_ava(ava_str).map_err(|r| invalid(&r))?);
                }
                rdns.push(Rdn { avas });
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            rdns,
            kind: DnKind::Plain,
        })
    }

    /// The root (empty) DN.
    pub fn root() -> Self {
        Self {
            raw: String::new(),
            rdns: Vec::new(),
            kind: DnKind::Plain,
        }
    }

    /// Whether this DN was normalized against a schema.
    pub fn is_schema_qualified(&self) -> bool {
        self.kind == DnKind::Qualified
    }

    /// Whether this is an extended (`<GUID=...>`) DN.
    pub fn is_extended(&self) -> bool {
        self.kind == DnKind::Extended
    }

    /// Whether this is the root DN.
    pub fn is_root(&self) -> bool {
        self.kind != DnKind::Extended && self.rdns.is_empty()
    }

    /// The RDNs, leaf first.
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// The DN as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Dn) -> bool {
        if self.is_extended() || other.is_extended() {
            return false;
        }
        if self.rdns.len() >= other.rdns.len() {
            return false;
        }
        let offset = other.rdns.len() - self.rdns.len();
        other.rdns[offset..] == self.rdns[..]
    }

    /// Whether `self` is a strict descendant of `other`.
    pub fn is_descendant_of(&self, other: &Dn) -> bool {
        other.is_ancestor_of(self)
    }

    /// Canonical string form built from the stored RDNs.
    pub fn normalized(&self) -> String {
        if self.is_extended() {
            return self.raw.clone();
        }
        self.rdns
            .iter()
            .map(|rdn| {
                rdn.avas
                    .iter()
                    .map(|ava| format!("{}={}", ava.attr_type, escape_dn_value(&ava.value)))
                    .collect::<Vec<_>>()
                    .join("+")
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        match (self.kind, other.kind) {
            (DnKind::Extended, DnKind::Extended) => self.raw.eq_ignore_ascii_case(&other.raw),
            (DnKind::Extended, _) | (_, DnKind::Extended) => false,
            _ => self.rdns == other.rdns,
        }
    }
}

impl Eq for Dn {}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Schema service used to qualify DNs before they are compared.
pub trait DnSchema: Send + Sync {
    /// Canonical name of an attribute type, or `None` if the schema does not know it.
    fn normalize_type(&self, attr_type: &str) -> Option<String>;

    /// Canonical form of a value for the given (already normalized) attribute type.
    fn normalize_value(&self, attr_type: &str, value: &str) -> String;

    /// Produce the schema-qualified form of `dn`.
    fn qualify(&self, dn: &Dn) -> Result<Dn, DnError> {
        if dn.is_extended() {
            return Err(DnError::Unqualifiable {
                dn: dn.raw.clone(),
                reason: "extended DNs carry no naming attributes".to_string(),
            });
        }

        let mut rdns = Vec::with_capacity(dn.rdns.len());
        for rdn in &dn.rdns {
            let mut avas = Vec::with_capacity(rdn.avas.len());
            for ava in &rdn.avas {
                let attr_type =
                    self.normalize_type(&ava.attr_type)
                        .ok_or_else(|| DnError::Unqualifiable {
                            dn: dn.raw.clone(),
                            reason: format!("unknown attribute type '{}'", ava.attr_type),
                        })?;
                let value = self.normalize_value(&attr_type, &ava.value);
                avas.push(Ava { attr_type, value });
            }
            // multi-valued RDNs compare as sets
            avas.sort();
            rdns.push(Rdn { avas });
        }

        Ok(Dn {
            raw: dn.raw.clone(),
            rdns,
            kind: DnKind::Qualified,
        })
    }

    /// Parse and qualify in one step.
    fn parse_qualified(&self, input: &str) -> Result<Dn, DnError> {
        self.qualify(&Dn::parse(input)?)
    }
}

/// Schema that treats every attribute as case-ignore directory string.
///
/// Matches the equality rules of the common naming attributes (`cn`, `ou`,
/// `dc`, ...) and resolves their long names and OIDs to the short form.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseIgnoreSchema;

const TYPE_ALIASES: &[(&str, &str)] = &[
    ("commonname", "cn"),
    ("2.5.4.3", "cn"),
    ("domaincomponent", "dc"),
    ("0.9.2342.19200300.100.1.25", "dc"),
    ("organizationalunitname", "ou"),
    ("2.5.4.11", "ou"),
    ("organizationname", "o"),
    ("2.5.4.10", "o"),
    ("countryname", "c"),
    ("2.5.4.6", "c"),
    ("localityname", "l"),
    ("2.5.4.7", "l"),
    ("stateorprovincename", "st"),
    ("2.5.4.8", "st"),
    ("userid", "uid"),
    ("0.9.2342.19200300.100.1.1", "uid"),
];

impl DnSchema for CaseIgnoreSchema {
    fn normalize_type(&self, attr_type: &str) -> Option<String> {
        let lower = attr_type.trim().to_ascii_lowercase();
        if lower.is_empty() {
            return None;
        }
        let canonical = TYPE_ALIASES
            .iter()
            .find(|(alias, _)| *alias == lower)
            .map_or(lower.clone(), |(_, short)| (*short).to_string());
        Some(canonical)
    }

    fn normalize_value(&self, _attr_type: &str, value: &str) -> String {
        value
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// Split on separators that are not backslash-escaped.
fn split_unescaped<'a>(input: &'a str, separators: &[char]) -> Result<Vec<&'a str>, String> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (idx, ch) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
        } else if separators.contains(&ch) {
            parts.push(&input[start..idx]);
            start = idx + ch.len_utf8();
        }
    }
    if escaped {
        return Err("trailing backslash".to_string());
    }
    parts.push(&input[start..]);

    if parts.iter().any(|p| p.trim().is_empty()) {
        return Err("empty RDN component".to_string());
    }
    Ok(parts)
}

fn parse_ava(input: &str) -> Result<Ava, String> {
    let (attr_type, raw_value) = input
        .split_once('=')
        .ok_or_else(|| format!("missing '=' in '{}'", input.trim()))?;

    let attr_type = attr_type.trim();
    let valid_type = !attr_type.is_empty()
        && attr_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !valid_type {
        return Err(format!("invalid attribute type '{attr_type}'"));
    }

    Ok(Ava {
        attr_type: attr_type.to_string(),
        value: unescape_value(raw_value)?,
    })
}

fn unescape_value(raw: &str) -> Result<String, String> {
    let mut value = raw.trim_start().trim_end_matches(' ');
    // "foo\ " keeps its escaped trailing space
    let trailing_backslashes = value.chars().rev().take_while(|c| *c == '\\').count();
    let restore_space = trailing_backslashes % 2 == 1 && value.len() < raw.trim_start().len();
    let owned;
    if restore_space {
        owned = format!("{value} ");
        value = &owned;
    }

    let mut bytes = Vec::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let next = chars.next().ok_or_else(|| "trailing backslash".to_string())?;
        let hex_pair = next.is_ascii_hexdigit() && chars.peek().is_some_and(|c| c.is_ascii_hexdigit());
        if hex_pair {
            let low = chars.next().unwrap_or('0');
            let byte = u8::from_str_radix(&format!("{next}{low}"), 16)
                .map_err(|e| format!("bad hex escape: {e}"))?;
            bytes.push(byte);
        } else {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(next.encode_utf8(&mut buf).as_bytes());
        }
    }

    String::from_utf8(bytes).map_err(|_| "escaped bytes are not valid UTF-8".to_string())
}

/// Escape an attribute value for use inside a DN string (RFC 4514).
///
/// Characters that must be escaped:
/// - Leading or trailing SPACE (escaped as \20)
/// - Leading # (escaped as \23)
/// - Characters: , + " \ < > ; = (escaped with backslash prefix)
/// - NUL character (escaped as \00)
pub fn escape_dn_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len() * 2);
    let last = value.chars().count().saturating_sub(1);

    for (i, ch) in value.chars().enumerate() {
        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                result.push('\\');
                result.push(ch);
            }
            '\0' => result.push_str("\\00"),
            ' ' if i == 0 || i == last => result.push_str("\\20"),
            '#' if i == 0 => result.push_str("\\23"),
            _ => result.push(ch),
        }
    }

    result
}
