use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identity tag
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(Arc<str>);

impl Tag {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.0)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Tag::new(value)
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Tag::new(value)
    }
}

/// 多标签查询的匹配方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// 至少持有一个查询标签
    Any,
    /// 持有全部查询标签
    All,
}

/// 有序标签集合
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagContainer {
    tags: BTreeSet<Tag>,
}

impl TagContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(tag: impl Into<Tag>) -> Self {
        let mut container = Self::new();
        container.insert(tag);
        container
    }

    pub fn insert(&mut self, tag: impl Into<Tag>) -> bool {
        self.tags.insert(tag.into())
    }

    pub fn remove(&mut self, tag: &Tag) -> bool {
        self.tags.remove(tag)
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.tags.contains(tag)
    }

    pub fn has_any(&self, other: &TagContainer) -> bool {
        other.iter().any(|tag| self.contains(tag))
    }

    pub fn has_all(&self, other: &TagContainer) -> bool {
        other.iter().all(|tag| self.contains(tag))
    }

    pub fn matches(&self, query: &TagContainer, match_type: MatchType) -> bool {
        match match_type {
            MatchType::Any => self.has_any(query),
            MatchType::All => !query.is_empty() && self.has_all(query),
        }
    }

    /// 在 self 中但不在 other 中的标签
    pub fn difference(&self, other: &TagContainer) -> TagContainer {
        self.tags.difference(&other.tags).cloned().collect()
    }

    pub fn intersection(&self, other: &TagContainer) -> TagContainer {
        self.tags.intersection(&other.tags).cloned().collect()
    }

    pub fn extend(&mut self, other: &TagContainer) {
        self.tags.extend(other.iter().cloned());
    }

    pub fn remove_all(&mut self, other: &TagContainer) {
        for tag in other.iter() {
            self.tags.remove(tag);
        }
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }
}

impl<T: Into<Tag>> FromIterator<T> for TagContainer {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a TagContainer {
    type Item = &'a Tag;
    type IntoIter = std::collections::btree_set::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter()
    }
}

/// 便捷宏：`tags!["Enemy", "Boss"]`
#[macro_export]
macro_rules! tags {
    () => {
        $crate::registry::TagContainer::new()
    };
    ($($tag:expr),+ $(,)?) => {
        [$($tag),+]
            .into_iter()
            .collect::<$crate::registry::TagContainer>()
    };
}
