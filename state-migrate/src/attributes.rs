//! Flat attribute storage for one resource instance's persisted state.
//!
//! Nested collections are flattened into index-suffixed keys: a list stored
//! under `tags` becomes `tags.#` (the element count) plus `tags.0`, `tags.1`, ...

use crate::errors::MalformedState;
use std::collections::BTreeMap;

/// The persisted attributes of one resource instance, tagged with the schema
/// version they conform to.
///
/// An empty store stands for "no prior state": a resource that is being
/// created is always written at the current schema and is never migrated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeStore {
    attributes: BTreeMap<String, String>,
    version: u32,
}

impl AttributeStore {
    /// Creates an empty store at the given schema version.
    pub fn new(version: u32) -> Self {
        Self {
            attributes: BTreeMap::new(),
            version,
        }
    }

    /// Creates a store from existing key/value pairs.
    pub fn from_attributes<I, K, V>(version: u32, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            version,
        }
    }

    /// The schema version this store currently conforms to.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    /// Returns `true` when the store holds no attributes.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Number of stored attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Sets `key` to `value`, overwriting any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Sets `key` only if it is absent. Returns `true` if the value was inserted.
    pub fn set_default(&mut self, key: &str, value: impl Into<String>) -> bool {
        if self.attributes.contains_key(key) {
            return false;
        }
        self.attributes.insert(key.to_string(), value.into());
        true
    }

    /// Removes `key`, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.attributes.remove(key)
    }

    /// Moves the value under `from` to `to`.
    ///
    /// Returns `false` (and changes nothing) when `from` is absent. An existing
    /// value under `to` is overwritten.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.attributes.remove(from) {
            Some(value) => {
                self.attributes.insert(to.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Returns the value under `key`, or a [`MalformedState`] naming the missing key.
    pub fn require(&self, key: &str) -> Result<&str, MalformedState> {
        self.get(key)
            .ok_or_else(|| MalformedState::missing_attribute(key))
    }

    /// Reads the indexed collection stored under `prefix`.
    ///
    /// Returns `Ok(None)` when there is no `prefix.#` count key. A count that
    /// is not an integer, one larger than the store could hold, or a missing
    /// element is malformed state.
    pub fn list(&self, prefix: &str) -> Result<Option<Vec<String>>, MalformedState> {
        let count_key = format!("{}.#", prefix);
        let raw_count = match self.get(&count_key) {
            Some(count) => count,
            None => return Ok(None),
        };

        let count: usize = raw_count
            .parse()
            .map_err(|_| MalformedState::invalid_value(&count_key, raw_count, "an integer count"))?;

        // Every element is its own attribute, so a larger count cannot be satisfied.
        if count >= self.len() {
            return Err(MalformedState::invalid_value(
                &count_key,
                raw_count,
                "a count smaller than the number of stored attributes",
            ));
        }

        let mut values = Vec::with_capacity(count);
        for index in 0..count {
            let key = format!("{}.{}", prefix, index);
            values.push(self.require(&key)?.to_string());
        }
        Ok(Some(values))
    }

    /// Replaces the indexed collection under `prefix` with `values`.
    pub fn set_list<I, V>(&mut self, prefix: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.clear_list_keys(prefix);

        let mut count = 0usize;
        for (index, value) in values.into_iter().enumerate() {
            self.attributes
                .insert(format!("{}.{}", prefix, index), value.into());
            count += 1;
        }
        self.attributes
            .insert(format!("{}.#", prefix), count.to_string());
    }

    /// Removes the indexed collection under `prefix`, returning its elements.
    pub fn remove_list(&mut self, prefix: &str) -> Result<Option<Vec<String>>, MalformedState> {
        let values = self.list(prefix)?;
        if values.is_some() {
            self.clear_list_keys(prefix);
        }
        Ok(values)
    }

    fn clear_list_keys(&mut self, prefix: &str) {
        let head = format!("{}.", prefix);
        self.attributes.retain(|key, _| match key.strip_prefix(&head) {
            Some(rest) => !(rest == "#" || is_index(rest)),
            None => true,
        });
    }

    /// Iterates over attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Borrows the underlying map.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Consumes the store, returning the underlying map.
    pub fn into_attributes(self) -> BTreeMap<String, String> {
        self.attributes
    }
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}
