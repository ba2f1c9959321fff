use std::collections::{HashMap, HashSet};

use crate::value::SessionValue;

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    value: SessionValue,
    order: u64,
}

/// Session field/value pairs with per-key change tracking.
///
/// Keys compare case-insensitively but keep the first casing ever seen for
/// them, even across removal. Writes mark a key modified, removals mark it
/// deleted; a key is never in both sets. Only those two sets are shipped on
/// write-back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionItems {
    slots: HashMap<String, Slot>,
    casing: HashMap<String, String>,
    modified: HashSet<String>,
    deleted: HashSet<String>,
    next_order: u64,
}

fn fold(key: &str) -> String {
    key.to_lowercase()
}

impl SessionItems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a clean (non-dirty) collection from stored pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, SessionValue)>,
        K: AsRef<str>,
    {
        let mut items = Self::new();
        for (key, value) in pairs {
            items.insert_slot(key.as_ref(), value);
        }
        items
    }

    /// Resolve `key` to its canonical casing, registering it on first sight.
    fn canonical(&mut self, key: &str) -> String {
        self.casing
            .entry(fold(key))
            .or_insert_with(|| key.to_owned())
            .clone()
    }

    fn insert_slot(&mut self, key: &str, value: SessionValue) -> String {
        let canonical = self.canonical(key);
        let folded = fold(key);
        if let Some(slot) = self.slots.get_mut(&folded) {
            slot.value = value;
        } else {
            let order = self.next_order;
            self.next_order += 1;
            self.slots.insert(folded, Slot { value, order });
        }
        canonical
    }

    /// Look up a value. Returning a mutable-kind value marks the key modified.
    pub fn get(&mut self, key: &str) -> Option<&SessionValue> {
        let folded = fold(key);
        let mutable = !self.slots.get(&folded)?.value.is_immutable();
        if mutable {
            let canonical = self.canonical(key);
            self.modified.insert(canonical);
        }
        self.slots.get(&folded).map(|slot| &slot.value)
    }

    /// Mutable access; always marks the key modified.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut SessionValue> {
        let folded = fold(key);
        if !self.slots.contains_key(&folded) {
            return None;
        }
        let canonical = self.canonical(key);
        self.modified.insert(canonical);
        self.slots.get_mut(&folded).map(|slot| &mut slot.value)
    }

    /// Read without any change-tracking side effect.
    pub fn peek(&self, key: &str) -> Option<&SessionValue> {
        self.slots.get(&fold(key)).map(|slot| &slot.value)
    }

    pub fn set(&mut self, key: &str, value: impl Into<SessionValue>) {
        let canonical = self.insert_slot(key, value.into());
        self.deleted.remove(&canonical);
        self.modified.insert(canonical);
    }

    pub fn remove(&mut self, key: &str) -> Option<SessionValue> {
        let slot = self.slots.remove(&fold(key))?;
        let canonical = self.canonical(key);
        self.modified.remove(&canonical);
        self.deleted.insert(canonical);
        Some(slot.value)
    }

    /// Remove every key, marking each one deleted.
    pub fn clear(&mut self) {
        let folded: Vec<String> = self.slots.drain().map(|(k, _)| k).collect();
        for key in folded {
            if let Some(canonical) = self.casing.get(&key) {
                self.deleted.insert(canonical.clone());
            }
        }
        self.modified.clear();
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.contains_key(&fold(key))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Live keys in insertion order, in their canonical casing.
    pub fn keys(&self) -> Vec<&str> {
        self.iter().into_iter().map(|(k, _)| k).collect()
    }

    /// Live entries in insertion order.
    pub fn iter(&self) -> Vec<(&str, &SessionValue)> {
        let mut entries: Vec<(u64, &str, &SessionValue)> = self
            .slots
            .iter()
            .filter_map(|(folded, slot)| {
                self.casing
                    .get(folded)
                    .map(|canonical| (slot.order, canonical.as_str(), &slot.value))
            })
            .collect();
        entries.sort_by_key(|(order, _, _)| *order);
        entries.into_iter().map(|(_, k, v)| (k, v)).collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.modified.is_empty() || !self.deleted.is_empty()
    }

    /// `false` forgets all tracked changes without touching the live map;
    /// `true` marks every live key modified so a full write follows.
    pub fn set_dirty(&mut self, dirty: bool) {
        if dirty {
            let live: Vec<String> = self.keys().into_iter().map(str::to_owned).collect();
            self.modified.extend(live);
        } else {
            self.modified.clear();
            self.deleted.clear();
        }
    }

    pub fn modified_keys(&self) -> impl Iterator<Item = &str> {
        self.modified.iter().map(String::as_str)
    }

    pub fn deleted_keys(&self) -> impl Iterator<Item = &str> {
        self.deleted.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
        let mut v: Vec<&str> = keys.collect();
        v.sort_unstable();
        v
    }

    fn assert_disjoint(items: &SessionItems) {
        for key in items.modified_keys() {
            assert!(
                !items.deleted_keys().any(|d| d == key),
                "{key} is both modified and deleted"
            );
        }
    }

    #[test]
    fn loaded_pairs_start_clean() {
        let items = SessionItems::from_pairs([("a", SessionValue::Int(1)), ("b", "x".into())]);
        assert!(!items.is_dirty());
        assert_eq!(items.len(), 2);
        assert_eq!(items.keys(), vec!["a", "b"]);
    }

    #[test]
    fn set_marks_modified_and_unmarks_deleted() {
        let mut items = SessionItems::from_pairs([("a", SessionValue::Int(1))]);
        items.remove("a");
        assert_eq!(sorted(items.deleted_keys()), vec!["a"]);
        items.set("a", 2);
        assert_eq!(sorted(items.modified_keys()), vec!["a"]);
        assert_eq!(items.deleted_keys().count(), 0);
        assert_eq!(items.peek("a"), Some(&SessionValue::Int(2)));
    }

    #[test]
    fn remove_marks_deleted_and_unmarks_modified() {
        let mut items = SessionItems::new();
        items.set("k", "v");
        assert_eq!(items.remove("k"), Some(SessionValue::Str("v".into())));
        assert_eq!(items.modified_keys().count(), 0);
        assert_eq!(sorted(items.deleted_keys()), vec!["k"]);
        assert!(items.is_empty());
    }

    #[test]
    fn remove_of_missing_key_tracks_nothing() {
        let mut items = SessionItems::new();
        assert_eq!(items.remove("ghost"), None);
        assert!(!items.is_dirty());
    }

    #[test]
    fn clear_marks_every_key_deleted() {
        let mut items = SessionItems::from_pairs([("a", SessionValue::Null), ("b", SessionValue::Null)]);
        items.set("c", 1);
        items.clear();
        assert!(items.is_empty());
        assert_eq!(items.modified_keys().count(), 0);
        assert_eq!(sorted(items.deleted_keys()), vec!["a", "b", "c"]);
    }

    #[test]
    fn keys_are_case_insensitive_and_first_casing_wins() {
        let mut items = SessionItems::new();
        items.set("UserName", "ann");
        items.set("USERNAME", "bob");
        assert_eq!(items.len(), 1);
        assert_eq!(items.keys(), vec!["UserName"]);
        assert_eq!(items.peek("username"), Some(&SessionValue::Str("bob".into())));

        items.remove("username");
        assert_eq!(sorted(items.deleted_keys()), vec!["UserName"]);
        items.set("userNAME", "cy");
        assert_eq!(items.keys(), vec!["UserName"]);
    }

    #[test]
    fn reading_mutable_value_marks_modified() {
        let mut items = SessionItems::from_pairs([
            ("blob", SessionValue::Bytes(vec![1])),
            ("name", SessionValue::Str("x".into())),
        ]);
        assert!(items.get("name").is_some());
        assert!(!items.is_dirty());
        assert!(items.get("BLOB").is_some());
        assert_eq!(sorted(items.modified_keys()), vec!["blob"]);
    }

    #[test]
    fn get_mut_always_marks_modified() {
        let mut items = SessionItems::from_pairs([("n", SessionValue::Int(1))]);
        if let Some(SessionValue::Int(n)) = items.get_mut("n") {
            *n += 1;
        }
        assert_eq!(items.peek("n"), Some(&SessionValue::Int(2)));
        assert_eq!(sorted(items.modified_keys()), vec!["n"]);
        assert!(items.get_mut("missing").is_none());
    }

    #[test]
    fn clearing_dirty_keeps_live_map() {
        let mut items = SessionItems::new();
        items.set("a", 1);
        items.set("b", 2);
        items.remove("b");
        items.set_dirty(false);
        assert!(!items.is_dirty());
        assert_eq!(items.keys(), vec!["a"]);
    }

    #[test]
    fn forcing_dirty_marks_all_live_keys() {
        let mut items = SessionItems::from_pairs([("a", SessionValue::Null), ("b", SessionValue::Null)]);
        items.set_dirty(true);
        assert_eq!(sorted(items.modified_keys()), vec!["a", "b"]);
    }

    #[test]
    fn live_keys_follow_sets_and_removes() {
        let mut items = SessionItems::from_pairs([("init1", SessionValue::Null), ("init2", SessionValue::Null)]);
        let ops: &[(&str, bool)] = &[
            ("x", true),
            ("init1", false),
            ("y", true),
            ("x", false),
            ("x", true),
            ("init2", true),
            ("nope", false),
        ];
        for (key, is_set) in ops {
            if *is_set {
                items.set(key, 0);
            } else {
                items.remove(key);
            }
            assert_disjoint(&items);
        }
        let mut live = items.keys();
        live.sort_unstable();
        assert_eq!(live, vec!["init2", "x", "y"]);
        assert_eq!(sorted(items.deleted_keys()), vec!["init1"]);
        assert_eq!(sorted(items.modified_keys()), vec!["init2", "x", "y"]);
    }

    #[test]
    fn insertion_order_is_preserved_on_overwrite() {
        let mut items = SessionItems::new();
        items.set("first", 1);
        items.set("second", 2);
        items.set("FIRST", 3);
        assert_eq!(items.keys(), vec!["first", "second"]);
    }
}
