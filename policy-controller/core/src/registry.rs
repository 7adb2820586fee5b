use crate::{store::Bucket, PolicyObject, PolicyStore};
use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use std::{collections::BTreeSet, sync::Arc};

/// Tracks the routing keys every policy is registered under.
///
/// Applying a policy registers it under each key implied by its watched resource and removes it
/// from any key it was previously registered under but no longer matches.
#[derive(Debug)]
pub struct Registry<T> {
    store: PolicyStore<T>,
    entries: Mutex<HashMap<String, Entry<T>>>,
}

#[derive(Debug)]
struct Entry<T> {
    policy: Arc<T>,
    keys: BTreeSet<String>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            store: PolicyStore::default(),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: PolicyObject> Registry<T> {
    /// Adds or replaces a policy.
    pub fn apply(&self, policy: T) {
        let policy = Arc::new(policy);
        let keys = policy.watched().routing_keys();

        // Writes to the store are serialized by the entries lock so that concurrent applies of the
        // same policy can't interleave.
        let mut entries = self.entries.lock();
        if let Some(prior) = entries.get(policy.name()) {
            for stale in prior.keys.difference(&keys) {
                self.store.remove(stale, policy.name());
            }
        }
        for key in &keys {
            self.store.add_or_update(key, policy.clone());
            if T::ORDERED {
                self.store
                    .sort_collection(key, |a, b| a.priority().cmp(&b.priority()));
            }
        }
        entries.insert(policy.name().to_string(), Entry { policy, keys });
    }

    /// Removes a policy from every key it is registered under.
    ///
    /// Returns false if the policy was unknown.
    pub fn delete(&self, name: &str) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.remove(name) else {
            return false;
        };
        for key in &entry.keys {
            self.store.remove(key, name);
        }
        true
    }

    /// Removes every policy not named in `keep`.
    pub fn retain(&self, keep: &BTreeSet<String>) {
        let names = self
            .entries
            .lock()
            .keys()
            .filter(|n| !keep.contains(*n))
            .cloned()
            .collect::<Vec<_>>();
        for name in names {
            self.delete(&name);
        }
    }

    /// Returns the policies registered under an admission key.
    pub fn get(&self, key: &str) -> Bucket<T> {
        self.store.get_resources(key)
    }

    pub fn store(&self) -> &PolicyStore<T> {
        &self.store
    }

    /// Returns every registered policy, ordered by name.
    pub fn policies(&self) -> Vec<Arc<T>> {
        let mut policies = self
            .entries
            .lock()
            .values()
            .map(|e| e.policy.clone())
            .collect::<Vec<_>>();
        policies.sort_by(|a, b| a.name().cmp(b.name()));
        policies
    }
}
