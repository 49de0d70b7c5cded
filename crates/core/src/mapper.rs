//! Post-merge normalisation of free-text fields.
//!
//! Mappers must be idempotent and each must own its fields; the order in
//! which they run is not significant.

use crate::record::{FieldKey, FieldValue, Record};

pub trait FieldMapper: Send + Sync {
    fn map(&self, record: &mut Record);
}

/// Normalise the value of one text field through a lookup table of
/// lower-cased aliases. Unknown values are left as they are.
fn map_text(record: &mut Record, key: FieldKey, table: &[(&str, &[&str])]) {
    let Some(FieldValue::Text(value)) = record.get_mut(&key) else {
        return;
    };
    let needle = value.trim().to_lowercase();
    if let Some((canonical, _)) = table
        .iter()
        .find(|(canonical, aliases)| canonical.to_lowercase() == needle || aliases.contains(&needle.as_str()))
    {
        *value = canonical.to_string();
    }
}

const FORMATS: &[(&str, &[&str])] = &[
    ("Paperback", &["pb", "softcover", "soft cover", "paper back", "trade paperback", "tpb", "paperback book"]),
    ("Mass market paperback", &["mmpb", "mass market", "mass-market paperback", "pocket"]),
    ("Hardcover", &["hc", "hb", "hardback", "hard cover", "hardbound", "gebonden"]),
    ("Dust jacket", &["dj", "hardcover with dust jacket", "hc/dj"]),
    ("Ebook", &["e-book", "kindle edition", "kindle", "epub", "digital"]),
    ("Audiobook", &["audio book", "audio cd", "audio", "mp3 cd"]),
];

/// Canonical book format labels.
#[derive(Debug, Default)]
pub struct FormatMapper;

impl FieldMapper for FormatMapper {
    fn map(&self, record: &mut Record) {
        map_text(record, FieldKey::Format, FORMATS);
    }
}

const COLORS: &[(&str, &[&str])] = &[
    ("Black & white", &["b/w", "b&w", "black and white", "zwart-wit", "zwart wit", "noir et blanc", "nb"]),
    ("Color", &["colour", "full color", "full colour", "kleur", "in kleur", "couleur", "couleurs"]),
    ("Two-tone", &["bichromie", "duotone", "two tone", "tweekleurig"]),
];

/// Canonical colour labels for illustrated books and comics.
#[derive(Debug, Default)]
pub struct ColorMapper;

impl FieldMapper for ColorMapper {
    fn map(&self, record: &mut Record) {
        map_text(record, FieldKey::Color, COLORS);
    }
}

pub fn default_mappers() -> Vec<Box<dyn FieldMapper>> {
    vec![Box::new(FormatMapper), Box::new(ColorMapper)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_aliases() {
        let mut r = Record::new().with(FieldKey::Format, " Softcover ");
        FormatMapper.map(&mut r);
        assert_eq!(r.text(&FieldKey::Format), Some("Paperback"));
    }

    #[test]
    fn mappers_are_idempotent() {
        let mut r = Record::new()
            .with(FieldKey::Format, "HC")
            .with(FieldKey::Color, "zwart-wit");
        for m in default_mappers() {
            m.map(&mut r);
        }
        let once = r.clone();
        for m in default_mappers() {
            m.map(&mut r);
        }
        assert_eq!(r, once);
        assert_eq!(r.text(&FieldKey::Format), Some("Hardcover"));
        assert_eq!(r.text(&FieldKey::Color), Some("Black & white"));
    }

    #[test]
    fn unknown_values_untouched() {
        let mut r = Record::new().with(FieldKey::Format, "Scroll");
        FormatMapper.map(&mut r);
        assert_eq!(r.text(&FieldKey::Format), Some("Scroll"));
    }
}
