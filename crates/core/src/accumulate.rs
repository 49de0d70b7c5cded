//! Fold per-provider raw results into one canonical record.
//!
//! The fold is deterministic: providers are visited in a fixed reliability
//! order, never in the order their results arrived.

use std::collections::BTreeMap;

use crate::dates;
use crate::isbn::Isbn;
use crate::mapper::{default_mappers, FieldMapper};
use crate::provider::ProviderId;
use crate::record::{FieldKey, FieldKind, FieldValue, Record};

/// Everything the merge needs from a finished session.
#[derive(Debug, Clone, Copy)]
pub struct MergeInput<'a> {
    /// Fixed ranking of providers, most reliable first.
    pub reliability_order: &'a [ProviderId],
    /// Raw results by provider. `None` means the provider was queried but
    /// produced nothing.
    pub results: &'a BTreeMap<ProviderId, Option<Record>>,
    pub isbn_text: &'a str,
    pub strict_isbn: bool,
    pub title_text: &'a str,
}

pub struct Accumulator {
    mappers: Vec<Box<dyn FieldMapper>>,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accumulator {
    /// Accumulator running the built-in format and colour mappers.
    pub fn new() -> Self {
        Self {
            mappers: default_mappers(),
        }
    }

    pub fn without_mappers() -> Self {
        Self { mappers: Vec::new() }
    }

    pub fn with_mapper(mut self, mapper: impl FieldMapper + 'static) -> Self {
        self.mappers.push(Box::new(mapper));
        self
    }

    pub fn merge(&self, input: &MergeInput<'_>) -> Record {
        let isbn = Isbn::parse(input.isbn_text);
        let isbn_valid = isbn.is_valid(input.strict_isbn);
        let order = merge_order(input.reliability_order, input.results, &isbn, input.strict_isbn);

        let mut dest = Record::new();
        if isbn_valid {
            // Seeded first so no provider can overwrite it.
            dest.insert(FieldKey::Isbn, input.isbn_text.trim());
        }

        for id in &order {
            let Some(Some(result)) = input.results.get(id) else {
                continue;
            };
            for (key, value) in result.iter() {
                fold(&mut dest, *key, value);
            }
        }

        for mapper in &self.mappers {
            mapper.map(&mut dest);
        }

        if !dest.has_value(&FieldKey::Isbn) && !input.isbn_text.trim().is_empty() {
            dest.insert(FieldKey::Isbn, input.isbn_text.trim());
        }
        if !dest.has_value(&FieldKey::Title) && !input.title_text.trim().is_empty() {
            dest.insert(FieldKey::Title, input.title_text.trim());
        }
        dest
    }
}

impl std::fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accumulator").field("mappers", &self.mappers.len()).finish()
    }
}

/// Providers to fold, in order.
///
/// With a valid session ISBN: providers whose result carries the same ISBN
/// come first (in reliability order), providers whose result has no ISBN
/// follow, providers reporting a different ISBN are dropped. Without one,
/// every provider that answered is used in reliability order. Providers
/// missing from the reliability order go last, by id.
pub fn merge_order(
    reliability_order: &[ProviderId],
    results: &BTreeMap<ProviderId, Option<Record>>,
    session_isbn: &Isbn,
    strict: bool,
) -> Vec<ProviderId> {
    let mut ranked: Vec<ProviderId> = reliability_order
        .iter()
        .copied()
        .filter(|id| results.contains_key(id))
        .collect();
    for id in results.keys() {
        if !ranked.contains(id) {
            ranked.push(*id);
        }
    }

    if !session_isbn.is_valid(strict) {
        return ranked;
    }

    let mut matching = Vec::new();
    let mut without_isbn = Vec::new();
    for id in ranked {
        let found = results
            .get(&id)
            .and_then(|r| r.as_ref())
            .and_then(|r| r.text(&FieldKey::Isbn));
        match found {
            None => without_isbn.push(id),
            Some(text) if Isbn::parse(text).matches(session_isbn) => matching.push(id),
            Some(text) => {
                tracing::debug!("Dropping provider {}: ISBN {} does not match {}", id, text, session_isbn);
            }
        }
    }
    matching.extend(without_isbn);
    matching
}

/// Fold one incoming field into the destination according to its kind.
fn fold(dest: &mut Record, key: FieldKey, value: &FieldValue) {
    if value.is_empty() {
        return;
    }
    match key.kind() {
        FieldKind::Scalar => {
            if !dest.has_value(&key) {
                dest.insert(key, value.clone());
            }
        }
        FieldKind::List => match (dest.get_mut(&key), value) {
            (Some(FieldValue::TextList(list)), FieldValue::TextList(more)) if !list.is_empty() => {
                list.extend(more.iter().cloned());
            }
            (Some(FieldValue::Entries(list)), FieldValue::Entries(more)) if !list.is_empty() => {
                list.extend(more.iter().cloned());
            }
            (Some(existing), _) if !existing.is_empty() => {
                tracing::warn!("Ignoring {} value of mismatched shape", key);
            }
            _ => {
                dest.insert(key, value.clone());
            }
        },
        FieldKind::Date => {
            let Some(incoming) = value.as_text() else {
                tracing::warn!("Ignoring non-text date for {}", key);
                return;
            };
            match dest.text(&key) {
                None => {
                    dest.insert(key, incoming);
                }
                Some(current) if !dates::is_valid(current) && dates::is_valid(incoming) => {
                    dest.insert(key, incoming);
                }
                Some(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::mapper::FormatMapper;
    use crate::record::Entry;

    const ISBN: &str = "9780306406157";

    fn p(id: u32) -> ProviderId {
        ProviderId(id)
    }

    fn results(items: Vec<(u32, Option<Record>)>) -> BTreeMap<ProviderId, Option<Record>> {
        items.into_iter().map(|(id, r)| (p(id), r)).collect()
    }

    fn merge(order: &[u32], res: &BTreeMap<ProviderId, Option<Record>>, isbn: &str) -> Record {
        let order: Vec<ProviderId> = order.iter().map(|i| p(*i)).collect();
        Accumulator::without_mappers().merge(&MergeInput {
            reliability_order: &order,
            results: res,
            isbn_text: isbn,
            strict_isbn: true,
            title_text: "",
        })
    }

    #[test]
    fn scalar_first_non_empty_wins() {
        let res = results(vec![
            (1, Some(Record::new().with(FieldKey::Title, ""))),
            (2, Some(Record::new().with(FieldKey::Title, "Second"))),
            (3, Some(Record::new().with(FieldKey::Title, "Third"))),
        ]);
        let merged = merge(&[1, 2, 3], &res, "");
        assert_eq!(merged.text(&FieldKey::Title), Some("Second"));
    }

    #[test]
    fn lists_concatenate_in_merge_order() {
        let res = results(vec![
            (1, Some(Record::new().with(FieldKey::Authors, vec![Entry::author("A")]))),
            (2, Some(Record::new().with(FieldKey::Authors, vec![Entry::author("B")]))),
        ]);
        assert_eq!(
            merge(&[1, 2], &res, "").get(&FieldKey::Authors),
            Some(&FieldValue::Entries(vec![Entry::author("A"), Entry::author("B")]))
        );
        assert_eq!(
            merge(&[2, 1], &res, "").get(&FieldKey::Authors),
            Some(&FieldValue::Entries(vec![Entry::author("B"), Entry::author("A")]))
        );
    }

    #[test]
    fn invalid_date_replaced_by_valid_one() {
        let res = results(vec![
            (1, Some(Record::new().with(FieldKey::DatePublished, "not-a-date"))),
            (2, Some(Record::new().with(FieldKey::DatePublished, "2021-06-06"))),
        ]);
        let merged = merge(&[1, 2], &res, "");
        assert_eq!(merged.text(&FieldKey::DatePublished), Some("2021-06-06"));
    }

    #[test]
    fn first_valid_date_kept() {
        let res = results(vec![
            (1, Some(Record::new().with(FieldKey::DatePublished, "2020-01-01"))),
            (2, Some(Record::new().with(FieldKey::DatePublished, "2021-06-06"))),
        ]);
        let merged = merge(&[1, 2], &res, "");
        assert_eq!(merged.text(&FieldKey::DatePublished), Some("2020-01-01"));
    }

    #[test]
    fn mismatching_isbn_provider_is_dropped() {
        let res = results(vec![
            (1, Some(Record::new().with(FieldKey::Isbn, "9780000000002").with(FieldKey::Title, "Wrong"))),
            (2, Some(Record::new().with(FieldKey::Isbn, "0306406152").with(FieldKey::Title, "Right"))),
        ]);
        let merged = merge(&[1, 2], &res, ISBN);
        assert_eq!(merged.text(&FieldKey::Isbn), Some(ISBN));
        assert_eq!(merged.text(&FieldKey::Title), Some("Right"));
    }

    #[test]
    fn providers_without_isbn_go_last() {
        let res = results(vec![
            (1, Some(Record::new().with(FieldKey::Title, "No isbn"))),
            (2, Some(Record::new().with(FieldKey::Isbn, ISBN).with(FieldKey::Title, "Matched"))),
        ]);
        let order = merge_order(&[p(1), p(2)], &res, &Isbn::parse(ISBN), true);
        assert_eq!(order, vec![p(2), p(1)]);
        assert_eq!(merge(&[1, 2], &res, ISBN).text(&FieldKey::Title), Some("Matched"));
    }

    #[test]
    fn no_valid_isbn_keeps_full_order() {
        let res = results(vec![
            (1, Some(Record::new().with(FieldKey::Isbn, "9780000000002"))),
            (2, None),
            (9, Some(Record::new())),
        ]);
        let order = merge_order(&[p(2), p(1)], &res, &Isbn::parse(""), true);
        assert_eq!(order, vec![p(2), p(1), p(9)]);
    }

    #[test]
    fn fallbacks_to_requested_text() {
        let res = results(vec![(1, None)]);
        let merged = Accumulator::without_mappers().merge(&MergeInput {
            reliability_order: &[p(1)],
            results: &res,
            isbn_text: "12345",
            strict_isbn: true,
            title_text: "Typed title",
        });
        assert_eq!(merged.text(&FieldKey::Isbn), Some("12345"));
        assert_eq!(merged.text(&FieldKey::Title), Some("Typed title"));
    }

    #[test]
    fn mappers_run_after_fold() {
        let res = results(vec![(1, Some(Record::new().with(FieldKey::Format, "hardback")))]);
        let merged = Accumulator::without_mappers().with_mapper(FormatMapper).merge(&MergeInput {
            reliability_order: &[p(1)],
            results: &res,
            isbn_text: "",
            strict_isbn: true,
            title_text: "",
        });
        assert_eq!(merged.text(&FieldKey::Format), Some("Hardcover"));
    }

    fn arb_record() -> impl Strategy<Value = Option<Record>> {
        let title = prop::option::of("[a-z]{1,6}");
        let authors = prop::collection::vec("[A-Z][a-z]{0,4}", 0..3);
        let date = prop::option::of(prop_oneof![Just("2020-01-01"), Just("bogus"), Just("1999")]);
        let isbn = prop::option::of(prop_oneof![Just(ISBN), Just("9780000000002")]);
        prop::option::of((title, authors, date, isbn)).prop_map(|opt| {
            opt.map(|(title, authors, date, isbn)| {
                let mut r = Record::new();
                if let Some(t) = title {
                    r.insert(FieldKey::Title, t);
                }
                if !authors.is_empty() {
                    r.insert(FieldKey::Authors, authors.into_iter().map(Entry::author).collect::<Vec<_>>());
                }
                if let Some(d) = date {
                    r.insert(FieldKey::DatePublished, d);
                }
                if let Some(i) = isbn {
                    r.insert(FieldKey::Isbn, i);
                }
                r
            })
        })
    }

    proptest! {
        #[test]
        fn merge_ignores_arrival_order(
            records in prop::collection::vec(arb_record(), 1..6),
            with_isbn in any::<bool>(),
        ) {
            let isbn = if with_isbn { ISBN } else { "" };
            let order: Vec<u32> = (1..=records.len() as u32).collect();

            let mut forward = BTreeMap::new();
            for (i, r) in records.iter().enumerate() {
                forward.insert(p(i as u32 + 1), r.clone());
            }
            let mut backward = BTreeMap::new();
            for (i, r) in records.iter().enumerate().rev() {
                backward.insert(p(i as u32 + 1), r.clone());
            }

            let a = merge(&order, &forward, isbn);
            let b = merge(&order, &backward, isbn);
            let again = merge(&order, &forward, isbn);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(
                serde_json::to_string(&a).unwrap(),
                serde_json::to_string(&again).unwrap()
            );
            if with_isbn {
                prop_assert_eq!(a.text(&FieldKey::Isbn), Some(ISBN));
            }
        }
    }
}
