use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::world::{ActorId, ComponentId};

use super::tags::TagContainer;

pub type SubscriptionId = u64;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// 多播委托
///
/// 订阅者按订阅顺序同步调用；广播时不持有内部锁，处理函数可以再订阅或退订。
pub struct Multicast<E> {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, Handler<E>)>>,
}

impl<E> Default for Multicast<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<E> Multicast<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn broadcast(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

/// 组件注册 / 注销事件
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentEvent {
    pub component: ComponentId,
    pub actor: Option<ActorId>,
}

/// 组件标签变更事件，`tags` 只包含本次实际变化的标签
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaggedComponentEvent {
    pub component: ComponentId,
    pub actor: Option<ActorId>,
    pub tags: TagContainer,
}
