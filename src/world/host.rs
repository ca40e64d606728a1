use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::registry::TagContainer;

use super::handle::{define_handle_id, HandleTable};

define_handle_id!(
    /// 任意宿主对象（关卡、控制器、Actor、组件）
    ObjectId,
    "object"
);
define_handle_id!(
    /// 世界中的 Actor
    ActorId,
    "actor"
);
define_handle_id!(
    /// Actor 上的 Flow 组件
    ComponentId,
    "component"
);

impl From<ActorId> for ObjectId {
    fn from(value: ActorId) -> Self {
        ObjectId(value.0)
    }
}

impl From<ComponentId> for ObjectId {
    fn from(value: ComponentId) -> Self {
        ObjectId(value.0)
    }
}

/// 能力描述符，替代按派生类型查询
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Facet(Arc<str>);

impl Facet {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Facet {
    fn from(value: &str) -> Self {
        Facet::new(value)
    }
}

/// 宿主对象模型
///
/// 对象随时可能被外部销毁；销毁后所有查询必须返回"不存在"，而不是悬垂数据。
pub trait ObjectHost: Send + Sync {
    fn is_alive(&self, object: ObjectId) -> bool;
    fn component_owner(&self, component: ComponentId) -> Option<ActorId>;
    fn identity_tags(&self, component: ComponentId) -> TagContainer;
    /// 组件是否已完成 begin play（一次性的就绪信号）
    fn has_begun_play(&self, component: ComponentId) -> bool;
    fn has_facet(&self, object: ObjectId, facet: &Facet) -> bool;
}

enum ObjectKind {
    Object,
    Actor {
        components: Vec<ComponentId>,
    },
    Component {
        owner: ActorId,
        tags: TagContainer,
        begun_play: bool,
    },
}

struct ObjectRecord {
    name: String,
    facets: HashSet<Facet>,
    kind: ObjectKind,
}

/// 进程内的宿主实现
#[derive(Default)]
pub struct World {
    objects: RwLock<HandleTable<ObjectRecord>>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn_object(&self, name: impl Into<String>) -> ObjectId {
        let handle = self.objects.write().insert(ObjectRecord {
            name: name.into(),
            facets: HashSet::new(),
            kind: ObjectKind::Object,
        });
        ObjectId(handle)
    }

    pub fn spawn_actor(&self, name: impl Into<String>) -> ActorId {
        self.spawn_actor_with(name, &[])
    }

    pub fn spawn_actor_with(&self, name: impl Into<String>, facets: &[&str]) -> ActorId {
        let handle = self.objects.write().insert(ObjectRecord {
            name: name.into(),
            facets: facets.iter().map(|facet| Facet::new(facet)).collect(),
            kind: ObjectKind::Actor {
                components: Vec::new(),
            },
        });
        ActorId(handle)
    }

    /// 为 Actor 添加组件；Actor 已销毁时返回 None
    pub fn add_component(&self, actor: ActorId, tags: TagContainer) -> Option<ComponentId> {
        self.add_component_with(actor, tags, &[])
    }

    pub fn add_component_with(
        &self,
        actor: ActorId,
        tags: TagContainer,
        facets: &[&str],
    ) -> Option<ComponentId> {
        let mut objects = self.objects.write();
        let name = match objects.get(actor.0) {
            Some(ObjectRecord {
                name,
                kind: ObjectKind::Actor { .. },
                ..
            }) => format!("{name}.FlowComponent"),
            _ => return None,
        };
        let component = ComponentId(objects.insert(ObjectRecord {
            name,
            facets: facets.iter().map(|facet| Facet::new(facet)).collect(),
            kind: ObjectKind::Component {
                owner: actor,
                tags,
                begun_play: false,
            },
        }));
        if let Some(ObjectRecord {
            kind: ObjectKind::Actor { components },
            ..
        }) = objects.get_mut(actor.0)
        {
            components.push(component);
        }
        Some(component)
    }

    /// 触发组件的就绪信号，只生效一次
    pub fn begin_play(&self, component: ComponentId) -> bool {
        let mut objects = self.objects.write();
        match objects.get_mut(component.0) {
            Some(ObjectRecord {
                kind: ObjectKind::Component { begun_play, .. },
                ..
            }) if !*begun_play => {
                *begun_play = true;
                true
            }
            _ => false,
        }
    }

    /// 修改宿主侧的标签；通知订阅方由调用者负责
    pub fn set_identity_tags(&self, component: ComponentId, new_tags: TagContainer) -> bool {
        let mut objects = self.objects.write();
        match objects.get_mut(component.0) {
            Some(ObjectRecord {
                kind: ObjectKind::Component { tags, .. },
                ..
            }) => {
                *tags = new_tags;
                true
            }
            _ => false,
        }
    }

    /// 销毁对象；销毁 Actor 会一并销毁其组件
    pub fn destroy(&self, object: impl Into<ObjectId>) -> bool {
        let object = object.into();
        let mut objects = self.objects.write();
        let Some(record) = objects.remove(object.0) else {
            return false;
        };
        match record.kind {
            ObjectKind::Actor { components } => {
                for component in components {
                    objects.remove(component.0);
                }
            }
            ObjectKind::Component { owner, .. } => {
                if let Some(ObjectRecord {
                    kind: ObjectKind::Actor { components },
                    ..
                }) = objects.get_mut(owner.0)
                {
                    components.retain(|existing| existing.0 != object.0);
                }
            }
            ObjectKind::Object => {}
        }
        true
    }

    pub fn name(&self, object: impl Into<ObjectId>) -> Option<String> {
        self.objects
            .read()
            .get(object.into().0)
            .map(|record| record.name.clone())
    }

    pub fn components_of(&self, actor: ActorId) -> Vec<ComponentId> {
        match self.objects.read().get(actor.0) {
            Some(ObjectRecord {
                kind: ObjectKind::Actor { components },
                ..
            }) => components.clone(),
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectHost for World {
    fn is_alive(&self, object: ObjectId) -> bool {
        self.objects.read().contains(object.0)
    }

    fn component_owner(&self, component: ComponentId) -> Option<ActorId> {
        match self.objects.read().get(component.0) {
            Some(ObjectRecord {
                kind: ObjectKind::Component { owner, .. },
                ..
            }) => Some(*owner),
            _ => None,
        }
    }

    fn identity_tags(&self, component: ComponentId) -> TagContainer {
        match self.objects.read().get(component.0) {
            Some(ObjectRecord {
                kind: ObjectKind::Component { tags, .. },
                ..
            }) => tags.clone(),
            _ => TagContainer::new(),
        }
    }

    fn has_begun_play(&self, component: ComponentId) -> bool {
        matches!(
            self.objects.read().get(component.0),
            Some(ObjectRecord {
                kind: ObjectKind::Component {
                    begun_play: true,
                    ..
                },
                ..
            })
        )
    }

    fn has_facet(&self, object: ObjectId, facet: &Facet) -> bool {
        self.objects
            .read()
            .get(object.0)
            .map(|record| record.facets.contains(facet))
            .unwrap_or(false)
    }
}
