use crate::PolicyObject;
use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use std::{cmp::Ordering, sync::Arc};

/// An immutable snapshot of the policies registered under a single key.
pub type Bucket<T> = Arc<[Arc<T>]>;

/// Holds policies grouped by routing key.
///
/// Buckets are replaced wholesale on every write so that readers may hold a snapshot without
/// holding the lock.
#[derive(Debug)]
pub struct PolicyStore<T> {
    buckets: Mutex<HashMap<String, Bucket<T>>>,
}

impl<T> Default for PolicyStore<T> {
    fn default() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: PolicyObject> PolicyStore<T> {
    /// Replaces the policy with the same name under `key` or appends it.
    pub fn add_or_update(&self, key: &str, policy: Arc<T>) {
        let mut buckets = self.buckets.lock();
        let mut items = buckets
            .get(key)
            .map(|b| b.to_vec())
            .unwrap_or_default();
        match items.iter().position(|p| p.name() == policy.name()) {
            Some(i) => items[i] = policy,
            None => items.push(policy),
        }
        buckets.insert(key.to_string(), items.into());
    }

    /// Removes the named policy from `key`, dropping the bucket once it is empty.
    ///
    /// Returns true if a policy was removed.
    pub fn remove(&self, key: &str, name: &str) -> bool {
        let mut buckets = self.buckets.lock();
        let Some(bucket) = buckets.get(key) else {
            return false;
        };
        if !bucket.iter().any(|p| p.name() == name) {
            return false;
        }
        let items = bucket
            .iter()
            .filter(|p| p.name() != name)
            .cloned()
            .collect::<Vec<_>>();
        if items.is_empty() {
            buckets.remove(key);
        } else {
            buckets.insert(key.to_string(), items.into());
        }
        true
    }

    /// Returns the current bucket for `key`, or an empty bucket.
    pub fn get_resources(&self, key: &str) -> Bucket<T> {
        self.buckets
            .lock()
            .get(key)
            .cloned()
            .unwrap_or_else(|| Vec::new().into())
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names = self.buckets.lock().keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Reorders the bucket for `key`. The sort is stable.
    pub fn sort_collection(&self, key: &str, cmp: impl FnMut(&Arc<T>, &Arc<T>) -> Ordering) {
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get_mut(key) {
            let mut items = bucket.to_vec();
            items.sort_by(cmp);
            *bucket = items.into();
        }
    }
}
