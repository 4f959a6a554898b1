//! Binary attribute classification.
//!
//! `ldap3` decodes every attribute value that happens to be valid UTF-8 as a
//! string. Attributes whose syntax is binary (GUIDs, SIDs, certificates,
//! photos) must never be treated as text, so the detector moves them into
//! `bin_attrs` before an entry reaches the caller.

use std::collections::HashSet;

use ldap3::SearchEntry;

/// Attributes that are binary in the common directory schemas.
const DEFAULT_BINARY_ATTRIBUTES: &[&str] = &[
    "audio",
    "authorityrevocationlist",
    "cacertificate",
    "certificaterevocationlist",
    "crosscertificatepair",
    "deltarevocationlist",
    "jpegphoto",
    "msexchmailboxguid",
    "msexchmailboxsecuritydescriptor",
    "ntsecuritydescriptor",
    "objectguid",
    "objectsid",
    "photo",
    "sidhistory",
    "supportedalgorithms",
    "thumbnailphoto",
    "tokengroups",
    "unicodepwd",
    "usercertificate",
    "userpkcs12",
    "usersmimecertificate",
];

/// Decides which attributes carry binary values.
#[derive(Debug, Clone)]
pub struct BinaryAttributeDetector {
    names: HashSet<String>,
}

impl Default for BinaryAttributeDetector {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

impl BinaryAttributeDetector {
    /// Detector for the default binary attributes plus `additional` names.
    pub fn new<I, S>(additional: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = DEFAULT_BINARY_ATTRIBUTES
            .iter()
            .map(|name| (*name).to_string())
            .chain(
                additional
                    .into_iter()
                    .map(|name| name.as_ref().trim().to_ascii_lowercase()),
            )
            .filter(|name| !name.is_empty())
            .collect();
        Self { names }
    }

    /// Whether values of `attribute` are binary.
    ///
    /// Attribute options are honored: `userCertificate;binary` and
    /// `anything;binary` are binary, `jpegPhoto;lang-en` is too.
    pub fn is_binary(&self, attribute: &str) -> bool {
        let mut parts = attribute.split(';');
        let base = parts.next().unwrap_or_default().to_ascii_lowercase();
        if parts.any(|option| option.eq_ignore_ascii_case("binary")) {
            return true;
        }
        self.names.contains(&base)
    }

    /// Move binary attributes that `ldap3` decoded as text into `bin_attrs`.
    pub fn classify(&self, mut entry: SearchEntry) -> SearchEntry {
        let binary: Vec<String> = entry
            .attrs
            .keys()
            .filter(|name| self.is_binary(name))
            .cloned()
            .collect();

        for name in binary {
            if let Some(values) = entry.attrs.remove(&name) {
                let bytes = values.into_iter().map(String::into_bytes);
                entry.bin_attrs.entry(name).or_default().extend(bytes);
            }
        }
        entry
    }
}
