use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::Result;
use crate::registry::{ComponentTracker, MatchType, Tag, TagContainer};
use crate::world::{ActorId, ComponentId, Facet};

use super::subsystem::FlowSubsystem;

/// Flow 组件注册与标签查询
impl FlowSubsystem {
    /// 注册表与通知委托
    pub fn components(&self) -> &ComponentTracker {
        &self.inner.components
    }

    /// 子系统未初始化时拒绝注册
    pub fn register_component(&self, component: ComponentId) -> bool {
        if !self.is_initialized() {
            debug!(%component, "subsystem not initialized, skip registering component");
            return false;
        }
        self.inner.components.register_component(component)
    }

    pub fn unregister_component(&self, component: ComponentId) -> bool {
        self.inner.components.unregister_component(component)
    }

    pub fn on_identity_tag_added(&self, component: ComponentId, tag: Tag) -> Result<TagContainer> {
        self.inner.components.on_identity_tag_added(component, tag)
    }

    pub fn on_identity_tags_added(
        &self,
        component: ComponentId,
        tags: &TagContainer,
    ) -> Result<TagContainer> {
        self.inner.components.on_identity_tags_added(component, tags)
    }

    pub fn on_identity_tag_removed(
        &self,
        component: ComponentId,
        tag: &Tag,
    ) -> Result<TagContainer> {
        self.inner.components.on_identity_tag_removed(component, tag)
    }

    pub fn on_identity_tags_removed(
        &self,
        component: ComponentId,
        tags: &TagContainer,
    ) -> Result<TagContainer> {
        self.inner.components.on_identity_tags_removed(component, tags)
    }

    pub fn components_by_tag(&self, tag: &Tag) -> HashSet<ComponentId> {
        self.inner.components.components_by_tag(tag)
    }

    pub fn components_by_tags(
        &self,
        tags: &TagContainer,
        match_type: MatchType,
    ) -> HashSet<ComponentId> {
        self.inner.components.components_by_tags(tags, match_type)
    }

    pub fn actors_by_tag(&self, tag: &Tag) -> HashSet<ActorId> {
        self.inner.components.actors_by_tag(tag)
    }

    pub fn actors_by_tags(&self, tags: &TagContainer, match_type: MatchType) -> HashSet<ActorId> {
        self.inner.components.actors_by_tags(tags, match_type)
    }

    pub fn actors_and_components_by_tag(&self, tag: &Tag) -> HashMap<ActorId, ComponentId> {
        self.inner.components.actors_and_components_by_tag(tag)
    }

    pub fn actors_and_components_by_tags(
        &self,
        tags: &TagContainer,
        match_type: MatchType,
    ) -> HashMap<ActorId, ComponentId> {
        self.inner
            .components
            .actors_and_components_by_tags(tags, match_type)
    }

    pub fn components_with_facet(
        &self,
        tags: &TagContainer,
        match_type: MatchType,
        facet: &Facet,
    ) -> HashSet<ComponentId> {
        self.inner
            .components
            .components_with_facet(tags, match_type, facet)
    }

    pub fn actors_with_facet(
        &self,
        tags: &TagContainer,
        match_type: MatchType,
        facet: &Facet,
    ) -> HashMap<ActorId, ComponentId> {
        self.inner
            .components
            .actors_with_facet(tags, match_type, facet)
    }
}
