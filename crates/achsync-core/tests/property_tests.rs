//! Property-based tests for matching and merging.
//!
//! These check the guarantees the import relies on:
//! 1. **Threshold**: an accepted match never scores below the threshold
//! 2. **Exact titles**: a title equal to a catalog name always scores 100
//! 3. **Monotonic merge**: `true` leaves survive, `false` source leaves are inert
//! 4. **Idempotence**: merging the same source again changes nothing

use proptest::prelude::*;
use serde_json::{Map, Value};

use achsync_core::{merge_state, CatalogEntry, FuzzyMatcher, StateTree};

// =============================================================================
// Test Strategies
// =============================================================================

/// Achievement-like titles
fn title() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z' ,!\\-]{0,30}"
}

fn catalog() -> impl Strategy<Value = Vec<CatalogEntry>> {
    prop::collection::vec(title(), 0..12).prop_map(|names| {
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| CatalogEntry::new(i.to_string(), name))
            .collect()
    })
}

/// Small trees with mixed leaves, keys drawn from a narrow alphabet so that
/// two generated trees overlap
fn state_value(depth: u32) -> BoxedStrategy<Value> {
    let leaf = prop_oneof![
        4 => any::<bool>().prop_map(Value::Bool),
        1 => Just(Value::Null),
        1 => (0i64..5).prop_map(Value::from),
    ];
    if depth == 0 {
        return leaf.boxed();
    }
    prop_oneof![
        2 => leaf,
        1 => prop::collection::btree_map("[a-c]", state_value(depth - 1), 0..4)
            .prop_map(|m| Value::Object(m.into_iter().collect::<Map<String, Value>>())),
    ]
    .boxed()
}

fn state_tree() -> impl Strategy<Value = StateTree> {
    prop::collection::btree_map("[a-c]", state_value(2), 0..4).prop_map(|m| {
        StateTree::from_value(Value::Object(m.into_iter().collect())).unwrap()
    })
}

// =============================================================================
// Matcher Properties
// =============================================================================

proptest! {
    #[test]
    fn accepted_matches_meet_threshold(
        entries in catalog(),
        query in title(),
        threshold in 0u8..=100,
    ) {
        let matcher = FuzzyMatcher::new(&entries, threshold);
        let result = matcher.match_title(&query);
        if result.is_match() {
            prop_assert!(result.score >= f64::from(threshold));
        }
        prop_assert!(result.score >= 0.0 && result.score <= 100.0);
    }

    #[test]
    fn exact_title_always_matches(
        entries in catalog().prop_filter("non-empty catalog", |e| !e.is_empty()),
        pick in any::<prop::sample::Index>(),
        threshold in 0u8..=100,
    ) {
        let name = entries[pick.index(entries.len())].name.clone();
        let matcher = FuzzyMatcher::new(&entries, threshold);
        let result = matcher.match_title(&name);

        prop_assert!(result.is_match());
        prop_assert_eq!(result.score, 100.0);
    }

    #[test]
    fn matching_is_deterministic(entries in catalog(), query in title()) {
        let matcher = FuzzyMatcher::new(&entries, 50);
        prop_assert_eq!(matcher.match_title(&query), matcher.match_title(&query));
    }
}

// =============================================================================
// Merge Properties
// =============================================================================

proptest! {
    #[test]
    fn source_true_leaves_end_up_true(mut dest in state_tree(), source in state_tree()) {
        let outcome = merge_state(&mut dest, &source);

        for path in source.true_leaves() {
            let blocked = outcome.blocked.contains(&path);
            prop_assert!(blocked || dest.is_true(path.segments()), "{} not true", path);
        }
    }

    #[test]
    fn true_leaves_never_regress(dest in state_tree(), source in state_tree()) {
        let before = dest.true_leaves();
        let mut merged = dest.clone();
        merge_state(&mut merged, &source);

        for path in before {
            prop_assert!(merged.is_true(path.segments()), "{} regressed", path);
        }
    }

    #[test]
    fn records_point_at_source_true_leaves(mut dest in state_tree(), source in state_tree()) {
        let outcome = merge_state(&mut dest, &source);
        for record in &outcome.records {
            prop_assert!(source.is_true(record.path.segments()));
        }
    }

    #[test]
    fn false_source_leaves_are_inert(dest in state_tree(), source in state_tree()) {
        let mut merged = dest.clone();
        merge_state(&mut merged, &source);

        for (path, value) in source.leaves() {
            if value == &Value::Bool(false) {
                prop_assert_eq!(merged.get(path.segments()), dest.get(path.segments()));
            }
        }
    }

    #[test]
    fn merge_is_idempotent(mut dest in state_tree(), source in state_tree()) {
        merge_state(&mut dest, &source);
        let once = dest.clone();
        let second = merge_state(&mut dest, &source);

        prop_assert!(second.records.is_empty());
        prop_assert_eq!(dest, once);
    }

    #[test]
    fn merging_into_itself_is_noop(doc in state_tree()) {
        let mut dest = doc.clone();
        let outcome = merge_state(&mut dest, &doc);

        prop_assert!(outcome.records.is_empty());
        prop_assert_eq!(dest, doc);
    }
}
