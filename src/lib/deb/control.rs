//! Debian control paragraphs: the `Key: value` records of `control` files and `Packages` lists.

use std::sync::LazyLock;

use regex::Regex;

/// Fields whose packages are installed alongside a package.
pub const DEPENDENCY_FIELDS: &[&str] = &["Depends", "Recommends", "Suggests", "Pre-Depends"];

// A package name is everything before whitespace, a version constraint `(`, an architecture
// restriction `[`, a build profile `<` or an architecture qualifier `:`.
static RELATION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([^\s(\[<:]+)").expect("package relation pattern is valid")
});

/// One paragraph of a control file. Field names compare case-insensitively; continuation lines
/// are folded into the value of the field they continue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlParagraph {
    fields: Vec<(String, String)>,
}

impl ControlParagraph {
    /// Split `text` into paragraphs at blank lines.
    pub fn parse_all(text: &str) -> Vec<Self> {
        let mut paragraphs = Vec::new();
        let mut current = Self::default();
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                if !current.fields.is_empty() {
                    paragraphs.push(std::mem::take(&mut current));
                }
                continue;
            }
            if line.starts_with('#') {
                continue;
            }
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = current.fields.last_mut() {
                    value.push('\n');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                current
                    .fields
                    .push((name.trim().to_string(), value.trim().to_string()));
            }
        }
        if !current.fields.is_empty() {
            paragraphs.push(current);
        }
        paragraphs
    }

    /// The first paragraph of `text`.
    pub fn parse(text: &str) -> Option<Self> {
        Self::parse_all(text).into_iter().next()
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Package names mentioned in the relationship field `name`.
    pub fn relation_names(&self, name: &str) -> Vec<String> {
        self.field_str(name).map(relation_names).unwrap_or_default()
    }

    /// Package names from every dependency field, in field order.
    pub fn dependencies(&self) -> Vec<String> {
        DEPENDENCY_FIELDS
            .iter()
            .flat_map(|field| self.relation_names(field))
            .collect()
    }
}

/// Split a relationship value on `,` and `|` and strip every alternative down to its package name.
pub fn relation_names(value: &str) -> Vec<String> {
    value
        .split([',', '|'])
        .filter_map(|alternative| RELATION_NAME.captures(alternative))
        .filter_map(|captures| captures.get(1))
        .map(|name| name.as_str().to_string())
        .collect()
}
