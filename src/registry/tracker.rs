use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::{FlowError, Result};
use crate::world::{ActorId, ComponentId, Facet, ObjectHost};

use super::events::{ComponentEvent, Multicast, TaggedComponentEvent};
use super::index::TagRegistryIndex;
use super::tags::{MatchType, Tag, TagContainer};

struct TrackedComponent {
    owner: Option<ActorId>,
    tags: TagContainer,
}

#[derive(Default)]
struct TrackerState {
    index: TagRegistryIndex,
    components: HashMap<ComponentId, TrackedComponent>,
    /// 已注销的组件，注销是终态
    retired: HashSet<ComponentId>,
}

/// 组件生命周期跟踪器
///
/// 维护标签索引并发出注册、注销与标签变更通知。对未注册或已注销组件的操作都是空操作，
/// 以容忍宿主对象模型乱序的销毁回调。
pub struct ComponentTracker {
    host: Arc<dyn ObjectHost>,
    state: RwLock<TrackerState>,
    /// 带 Flow 组件的 Actor 进入世界
    pub on_component_registered: Multicast<ComponentEvent>,
    /// 已注册组件新增了 Identity Tags（仅在 begin play 之后）
    pub on_component_tags_added: Multicast<TaggedComponentEvent>,
    /// 带 Flow 组件的 Actor 离开世界
    pub on_component_unregistered: Multicast<ComponentEvent>,
    /// 组件移除了 Identity Tags 且仍保留至少一个标签
    pub on_component_tags_removed: Multicast<TaggedComponentEvent>,
}

impl ComponentTracker {
    pub fn new(host: Arc<dyn ObjectHost>) -> Self {
        Self {
            host,
            state: RwLock::new(TrackerState::default()),
            on_component_registered: Multicast::new(),
            on_component_tags_added: Multicast::new(),
            on_component_unregistered: Multicast::new(),
            on_component_tags_removed: Multicast::new(),
        }
    }

    pub fn register_component(&self, component: ComponentId) -> bool {
        if !self.host.is_alive(component.into()) {
            debug!(%component, "skip registering destroyed component");
            return false;
        }

        let event = {
            let mut state = self.state.write();
            if state.components.contains_key(&component) || state.retired.contains(&component) {
                debug!(%component, "component already registered or retired");
                return false;
            }
            let owner = self.host.component_owner(component);
            let tags = self.host.identity_tags(component);
            state.index.add_all(&tags, component);
            state
                .components
                .insert(component, TrackedComponent { owner, tags });
            ComponentEvent {
                component,
                actor: owner,
            }
        };

        trace!(%component, "component registered");
        self.on_component_registered.broadcast(&event);
        true
    }

    pub fn on_identity_tag_added(&self, component: ComponentId, tag: Tag) -> Result<TagContainer> {
        self.on_identity_tags_added(component, &TagContainer::single(tag))
    }

    /// 返回实际新增的标签；只对这些标签发出通知
    pub fn on_identity_tags_added(
        &self,
        component: ComponentId,
        tags: &TagContainer,
    ) -> Result<TagContainer> {
        let event = {
            let mut state = self.state.write();
            let TrackerState {
                index, components, ..
            } = &mut *state;
            let Some(tracked) = components.get_mut(&component) else {
                return Ok(TagContainer::new());
            };
            if !self.host.has_begun_play(component) {
                return Err(FlowError::ComponentNotReady(component));
            }

            let added = tags.difference(&tracked.tags);
            if added.is_empty() {
                return Ok(added);
            }
            tracked.tags.extend(&added);
            index.add_all(&added, component);
            TaggedComponentEvent {
                component,
                actor: tracked.owner,
                tags: added,
            }
        };

        self.on_component_tags_added.broadcast(&event);
        Ok(event.tags)
    }

    pub fn on_identity_tag_removed(&self, component: ComponentId, tag: &Tag) -> Result<TagContainer> {
        self.on_identity_tags_removed(component, &TagContainer::single(tag.clone()))
    }

    /// 返回实际移除的标签；移除后组件没有任何标签时不发通知，由随后的注销通知覆盖
    pub fn on_identity_tags_removed(
        &self,
        component: ComponentId,
        tags: &TagContainer,
    ) -> Result<TagContainer> {
        let (removed, event) = {
            let mut state = self.state.write();
            let TrackerState {
                index, components, ..
            } = &mut *state;
            let Some(tracked) = components.get_mut(&component) else {
                return Ok(TagContainer::new());
            };
            if !self.host.has_begun_play(component) {
                return Err(FlowError::ComponentNotReady(component));
            }

            let removed = tags.intersection(&tracked.tags);
            if removed.is_empty() {
                return Ok(removed);
            }
            tracked.tags.remove_all(&removed);
            index.remove_all(&removed, component);
            let event = (!tracked.tags.is_empty()).then(|| TaggedComponentEvent {
                component,
                actor: tracked.owner,
                tags: removed.clone(),
            });
            (removed, event)
        };

        if let Some(event) = event {
            self.on_component_tags_removed.broadcast(&event);
        }
        Ok(removed)
    }

    pub fn unregister_component(&self, component: ComponentId) -> bool {
        let event = {
            let mut state = self.state.write();
            let Some(tracked) = state.components.remove(&component) else {
                return false;
            };
            state.index.remove_all(&tracked.tags, component);
            state.retired.insert(component);
            ComponentEvent {
                component,
                actor: tracked.owner,
            }
        };

        trace!(%component, "component unregistered");
        self.on_component_unregistered.broadcast(&event);
        true
    }

    pub fn is_registered(&self, component: ComponentId) -> bool {
        self.state.read().components.contains_key(&component)
    }

    pub fn identity_tags(&self, component: ComponentId) -> Option<TagContainer> {
        self.state
            .read()
            .components
            .get(&component)
            .map(|tracked| tracked.tags.clone())
    }

    pub fn registered_count(&self) -> usize {
        self.state.read().components.len()
    }

    pub fn components_by_tag(&self, tag: &Tag) -> HashSet<ComponentId> {
        self.state
            .read()
            .index
            .find(tag, |component| self.host.is_alive(component.into()))
    }

    pub fn components_by_tags(
        &self,
        tags: &TagContainer,
        match_type: MatchType,
    ) -> HashSet<ComponentId> {
        self.state
            .read()
            .index
            .find_all(tags, match_type, |component| {
                self.host.is_alive(component.into())
            })
    }

    pub fn actors_by_tag(&self, tag: &Tag) -> HashSet<ActorId> {
        self.actors_and_components_by_tag(tag).into_keys().collect()
    }

    pub fn actors_by_tags(&self, tags: &TagContainer, match_type: MatchType) -> HashSet<ActorId> {
        self.actors_and_components_by_tags(tags, match_type)
            .into_keys()
            .collect()
    }

    pub fn actors_and_components_by_tag(&self, tag: &Tag) -> HashMap<ActorId, ComponentId> {
        let found = self.components_by_tag(tag);
        self.pair_with_owners(found)
    }

    pub fn actors_and_components_by_tags(
        &self,
        tags: &TagContainer,
        match_type: MatchType,
    ) -> HashMap<ActorId, ComponentId> {
        let found = self.components_by_tags(tags, match_type);
        self.pair_with_owners(found)
    }

    /// 按能力过滤的组件查询
    pub fn components_with_facet(
        &self,
        tags: &TagContainer,
        match_type: MatchType,
        facet: &Facet,
    ) -> HashSet<ComponentId> {
        self.components_by_tags(tags, match_type)
            .into_iter()
            .filter(|component| self.host.has_facet((*component).into(), facet))
            .collect()
    }

    /// 按 Actor 能力过滤，返回 Actor -> 组件
    pub fn actors_with_facet(
        &self,
        tags: &TagContainer,
        match_type: MatchType,
        facet: &Facet,
    ) -> HashMap<ActorId, ComponentId> {
        self.actors_and_components_by_tags(tags, match_type)
            .into_iter()
            .filter(|(actor, _)| self.host.has_facet((*actor).into(), facet))
            .collect()
    }

    /// 清理被外部销毁但未注销的组件记录，并丢弃已销毁的注销记录
    pub fn purge_invalid(&self) -> usize {
        let mut state = self.state.write();
        let host = &self.host;
        let dead: Vec<ComponentId> = state
            .components
            .keys()
            .copied()
            .filter(|component| !host.is_alive((*component).into()))
            .collect();
        for component in &dead {
            state.components.remove(component);
        }
        state
            .index
            .purge(|component| host.is_alive(component.into()));
        // 已销毁的句柄不会再次生效，无需继续记住
        state
            .retired
            .retain(|component| host.is_alive((*component).into()));
        dead.len()
    }

    pub fn retired_count(&self) -> usize {
        self.state.read().retired.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.index.clear();
        state.components.clear();
        state.retired.clear();
    }

    fn pair_with_owners(&self, components: HashSet<ComponentId>) -> HashMap<ActorId, ComponentId> {
        let state = self.state.read();
        components
            .into_iter()
            .filter_map(|component| {
                let owner = state.components.get(&component)?.owner?;
                self.host
                    .is_alive(owner.into())
                    .then_some((owner, component))
            })
            .collect()
    }
}
