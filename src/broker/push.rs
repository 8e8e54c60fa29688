use std::collections::{BTreeMap, BTreeSet, HashMap};

use adaptor_plugin::PluginMessage;
use async_trait::async_trait;

use super::wrapper::PluginWrapper;

/// A subscriber gets every push notification routed to a bound service.
#[async_trait]
pub trait PushHandler: Send + Sync {
    async fn handle_push(&self, service_name: &str, msg: &PluginMessage);
}

#[derive(Debug)]
struct SharedPush {
    wrapper: PluginWrapper,
    bound: BTreeSet<String>,
}

/// Shared push sub-contexts. Many service contexts may bind to one entry;
/// the entry lives as long as at least one service is bound to it.
#[derive(Debug, Default)]
pub struct PushTable {
    entries: HashMap<String, SharedPush>,
}

impl PushTable {
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, wrapper: PluginWrapper) {
        self.entries.insert(
            key.into(),
            SharedPush {
                wrapper,
                bound: BTreeSet::new(),
            },
        );
    }

    /// Bind `service` to an existing entry. Returns false when there is no
    /// entry under `key`.
    pub fn bind(&mut self, key: &str, service: &str) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.bound.insert(service.to_string());
                true
            }
            None => false,
        }
    }

    /// Drop `service` from the entry. When it was the last one bound, the
    /// entry is removed and its sub-context handed back for teardown.
    pub fn unbind(&mut self, key: &str, service: &str) -> Option<PluginWrapper> {
        let entry = self.entries.get_mut(key)?;
        entry.bound.remove(service);
        if entry.bound.is_empty() {
            self.entries.remove(key).map(|e| e.wrapper)
        } else {
            None
        }
    }

    pub fn ref_count(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, |e| e.bound.len())
    }

    pub fn ref_counts(&self) -> BTreeMap<String, usize> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.bound.len()))
            .collect()
    }

    pub fn bound_services(&self, key: &str) -> Option<Vec<String>> {
        self.entries
            .get(key)
            .map(|e| e.bound.iter().cloned().collect())
    }

    pub fn drain(&mut self) -> Vec<PluginWrapper> {
        self.entries.drain().map(|(_, e)| e.wrapper).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptor_plugin::{AccessToken, Capability, ContextInfo, PluginContext};

    fn push_wrapper() -> PluginWrapper {
        let ctx = PluginContext::new("push", Capability::Push, "test://push", ContextInfo::default(), AccessToken::default());
        PluginWrapper::new(None, ctx)
    }

    #[test]
    fn last_unbind_releases_the_entry() {
        let mut table = PushTable::default();
        table.insert("shared", push_wrapper());
        assert!(table.bind("shared", "a"));
        assert!(table.bind("shared", "b"));
        assert!(!table.bind("missing", "a"));
        assert_eq!(table.ref_count("shared"), 2);

        assert!(table.unbind("shared", "a").is_none());
        assert_eq!(table.bound_services("shared"), Some(vec!["b".to_string()]));
        assert!(table.unbind("shared", "b").is_some());
        assert!(!table.contains("shared"));
        assert_eq!(table.ref_count("shared"), 0);
    }
}
