//! Message Index: message key → owning group
//!
//! Rebuilt from the Group Index as a whole and swapped in at once, so readers
//! never see a half-built map. Rebuilds are expensive and normally run from a
//! deduplicated `MessageIndexRebuild` job.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use transpage_storage::GroupId;

use crate::error::Result;
use crate::group::GroupKind;
use crate::group_index::GroupIndex;

#[derive(Default)]
pub struct MessageIndex {
    entries: RwLock<Arc<HashMap<String, GroupId>>>,
    rebuilds: AtomicUsize,
}

impl MessageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of indexed keys.
    pub async fn rebuild(&self, groups: &GroupIndex) -> Result<usize> {
        let start = Instant::now();
        let mut entries: HashMap<String, GroupId> = HashMap::new();
        let mut conflicts = 0;

        // Ordered by id, so the same group wins every time
        for group in groups.all().await? {
            if group.kind() == GroupKind::Aggregate {
                continue;
            }
            let Some(keys) = groups.keys(group.id()).await? else {
                continue;
            };
            for key in keys.iter() {
                match entries.get(key) {
                    Some(owner) => {
                        conflicts += 1;
                        warn!(
                            "Message key {} of group {} already owned by {}",
                            key,
                            group.id(),
                            owner
                        );
                    }
                    None => {
                        entries.insert(key.clone(), group.id().clone());
                    }
                }
            }
        }

        let count = entries.len();
        *self.entries.write() = Arc::new(entries);
        self.rebuilds.fetch_add(1, Ordering::SeqCst);

        info!(
            "Message index rebuilt: {} keys, {} conflicts in {}ms",
            count,
            conflicts,
            start.elapsed().as_millis()
        );
        Ok(count)
    }

    pub fn lookup(&self, key: &str) -> Option<GroupId> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rebuild_count(&self) -> usize {
        self.rebuilds.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::testing::StaticGroup;
    use crate::group::MessageGroup;
    use crate::group_index::{GroupSource, StaticGroupSource};

    fn index_of(groups: Vec<StaticGroup>) -> GroupIndex {
        let groups = groups
            .into_iter()
            .map(|g| Arc::new(g) as Arc<dyn MessageGroup>)
            .collect();
        GroupIndex::new(vec![Arc::new(StaticGroupSource::new(groups)) as Arc<dyn GroupSource>])
    }

    #[tokio::test]
    async fn test_rebuild_and_lookup() {
        let groups = index_of(vec![
            StaticGroup::new("core", &["save", "cancel"]),
            StaticGroup::new("ext", &["search"]),
        ]);
        let index = MessageIndex::new();
        assert!(index.is_empty());

        assert_eq!(index.rebuild(&groups).await.unwrap(), 3);
        assert_eq!(index.lookup("search").unwrap().as_str(), "ext");
        assert_eq!(index.lookup("save").unwrap().as_str(), "core");
        assert!(index.lookup("missing").is_none());
        assert_eq!(index.rebuild_count(), 1);
    }

    #[tokio::test]
    async fn test_first_owner_wins_on_conflict() {
        let groups = index_of(vec![
            StaticGroup::new("zeta", &["shared"]),
            StaticGroup::new("alpha", &["shared"]),
        ]);
        let index = MessageIndex::new();

        assert_eq!(index.rebuild(&groups).await.unwrap(), 1);
        assert_eq!(index.lookup("shared").unwrap().as_str(), "alpha");
    }
}
