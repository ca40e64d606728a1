use std::collections::{HashMap, HashSet};

use crate::world::ComponentId;

use super::tags::{MatchType, Tag, TagContainer};

/// 标签索引：tag -> 组件弱引用集合
///
/// 只保存句柄，存活性由调用方传入的 `alive` 判断；遍历时跳过失效句柄。
#[derive(Default)]
pub struct TagRegistryIndex {
    entries: HashMap<Tag, HashSet<ComponentId>>,
}

impl TagRegistryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tag: Tag, component: ComponentId) -> bool {
        self.entries.entry(tag).or_default().insert(component)
    }

    /// 移除一条记录；集合为空时删除整个条目
    pub fn remove(&mut self, tag: &Tag, component: ComponentId) -> bool {
        let Some(components) = self.entries.get_mut(tag) else {
            return false;
        };
        let removed = components.remove(&component);
        if components.is_empty() {
            self.entries.remove(tag);
        }
        removed
    }

    pub fn add_all(&mut self, tags: &TagContainer, component: ComponentId) {
        for tag in tags {
            self.add(tag.clone(), component);
        }
    }

    pub fn remove_all(&mut self, tags: &TagContainer, component: ComponentId) {
        for tag in tags {
            self.remove(tag, component);
        }
    }

    pub fn find(&self, tag: &Tag, alive: impl Fn(ComponentId) -> bool) -> HashSet<ComponentId> {
        self.entries
            .get(tag)
            .map(|components| {
                components
                    .iter()
                    .copied()
                    .filter(|component| alive(*component))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn find_all(
        &self,
        tags: &TagContainer,
        match_type: MatchType,
        alive: impl Fn(ComponentId) -> bool,
    ) -> HashSet<ComponentId> {
        match match_type {
            MatchType::Any => tags
                .iter()
                .filter_map(|tag| self.entries.get(tag))
                .flatten()
                .copied()
                .filter(|component| alive(*component))
                .collect(),
            MatchType::All => {
                let mut sets = Vec::with_capacity(tags.len());
                for tag in tags {
                    match self.entries.get(tag) {
                        Some(components) => sets.push(components),
                        None => return HashSet::new(),
                    }
                }
                sets.sort_by_key(|components| components.len());
                let Some((smallest, rest)) = sets.split_first() else {
                    return HashSet::new();
                };
                smallest
                    .iter()
                    .copied()
                    .filter(|component| rest.iter().all(|set| set.contains(component)))
                    .filter(|component| alive(*component))
                    .collect()
            }
        }
    }

    /// 清理只剩失效句柄的记录，返回移除的记录数
    pub fn purge(&mut self, alive: impl Fn(ComponentId) -> bool) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, components| {
            let before = components.len();
            components.retain(|component| alive(*component));
            removed += before - components.len();
            !components.is_empty()
        });
        removed
    }

    pub fn contains(&self, tag: &Tag, component: ComponentId) -> bool {
        self.entries
            .get(tag)
            .map(|components| components.contains(&component))
            .unwrap_or(false)
    }

    /// 当前存在条目的标签数
    pub fn tag_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
