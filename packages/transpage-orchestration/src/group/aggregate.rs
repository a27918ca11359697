//! Aggregate message groups
//!
//! An aggregate holds no messages. Its members are kept as an ordered,
//! comma separated id list under the `subgroups` metadata key; the metadata
//! store is the only place membership is changed.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use transpage_storage::{GroupId, LanguageCode, MetadataKey, MetadataStore};

use super::{GroupKind, MessageGroup, MessageTranslation};
use crate::error::Result;

pub struct AggregateGroup {
    id: GroupId,
    label: String,
    source_language: LanguageCode,
    metadata: Arc<dyn MetadataStore>,
}

impl AggregateGroup {
    pub fn new(
        id: GroupId,
        label: impl Into<String>,
        source_language: LanguageCode,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            source_language,
            metadata,
        }
    }
}

#[async_trait]
impl MessageGroup for AggregateGroup {
    fn id(&self) -> &GroupId {
        &self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn source_language(&self) -> &LanguageCode {
        &self.source_language
    }

    fn kind(&self) -> GroupKind {
        GroupKind::Aggregate
    }

    fn exists(&self) -> bool {
        true
    }

    async fn subgroups(&self) -> Result<Vec<GroupId>> {
        let raw = self.metadata.get(&self.id, MetadataKey::Subgroups).await?;
        Ok(raw.as_deref().map(parse_subgroups).unwrap_or_default())
    }

    async fn definitions(&self) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }

    async fn translations(
        &self,
        _language: &LanguageCode,
    ) -> Result<BTreeMap<String, MessageTranslation>> {
        Ok(BTreeMap::new())
    }

    async fn translation_languages(&self) -> Result<Vec<LanguageCode>> {
        Ok(Vec::new())
    }

    fn clear_caches(&self) {}
}

/// Parse a stored member list. Blank and invalid entries are dropped.
pub fn parse_subgroups(raw: &str) -> Vec<GroupId> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| GroupId::new(s).ok())
        .collect()
}

pub fn format_subgroups(members: &[GroupId]) -> String {
    members
        .iter()
        .map(GroupId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Replace `old` with `new` at the same position.
///
/// If `new` is already a member, `old` is only removed. Returns `false` when
/// `old` is not a member.
pub fn replace_member(members: &mut Vec<GroupId>, old: &GroupId, new: &GroupId) -> bool {
    let Some(position) = members.iter().position(|m| m == old) else {
        return false;
    };

    if members.contains(new) {
        members.remove(position);
    } else {
        members[position] = new.clone();
    }
    true
}

/// Returns `false` when `member` was not in the list.
pub fn remove_member(members: &mut Vec<GroupId>, member: &GroupId) -> bool {
    let before = members.len();
    members.retain(|m| m != member);
    members.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use transpage_storage::infrastructure::InMemoryMetadataStore;

    fn ids(list: &[&str]) -> Vec<GroupId> {
        list.iter().map(|s| GroupId::new(*s).unwrap()).collect()
    }

    fn gid(s: &str) -> GroupId {
        GroupId::new(s).unwrap()
    }

    #[test]
    fn test_parse_and_format() {
        let parsed = parse_subgroups(" page-A, ,page-B,,core ");
        assert_eq!(parsed, ids(&["page-A", "page-B", "core"]));
        assert_eq!(format_subgroups(&parsed), "page-A,page-B,core");
        assert!(parse_subgroups("").is_empty());
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut members = ids(&["page-A", "page-Old", "page-C"]);
        assert!(replace_member(&mut members, &gid("page-Old"), &gid("page-New")));
        assert_eq!(members, ids(&["page-A", "page-New", "page-C"]));

        assert!(!replace_member(&mut members, &gid("page-Old"), &gid("page-New")));
    }

    #[test]
    fn test_replace_with_existing_member_drops_old() {
        let mut members = ids(&["page-New", "page-Old"]);
        assert!(replace_member(&mut members, &gid("page-Old"), &gid("page-New")));
        assert_eq!(members, ids(&["page-New"]));
    }

    #[test]
    fn test_remove_member() {
        let mut members = ids(&["page-A", "page-B"]);
        assert!(remove_member(&mut members, &gid("page-A")));
        assert!(!remove_member(&mut members, &gid("page-A")));
        assert_eq!(members, ids(&["page-B"]));
    }

    #[tokio::test]
    async fn test_subgroups_read_from_metadata() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let id = gid("agg-docs");
        metadata
            .set(&id, MetadataKey::Subgroups, Some("page-Welcome,page-Help"))
            .await
            .unwrap();

        let group = AggregateGroup::new(
            id,
            "Documentation",
            LanguageCode::new("en").unwrap(),
            metadata.clone(),
        );

        assert_eq!(group.subgroups().await.unwrap(), ids(&["page-Welcome", "page-Help"]));
        assert!(group.definitions().await.unwrap().is_empty());
        assert_eq!(group.kind(), GroupKind::Aggregate);
    }
}
