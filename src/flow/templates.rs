use std::collections::HashMap;
use std::sync::Arc;

use super::asset::{AssetId, FlowAsset};
use super::binding::{BindingKey, LoadTicket};
use super::instance::InstancedTemplate;

/// 模板加载完成后要执行的后续动作
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Continuation {
    Start { binding: BindingKey, ticket: LoadTicket },
    Preload,
}

/// 模板请求结果
#[derive(Debug)]
pub enum TemplateRequest {
    /// 模板已驻留
    Ready(Arc<InstancedTemplate>),
    /// 已有加载在进行，后续动作已排队
    Queued,
    /// 调用方是第一个请求者，必须发起加载
    Load,
}

enum TemplateSlot {
    Loading {
        waiters: Vec<Continuation>,
    },
    Ready {
        template: Arc<InstancedTemplate>,
        refs: usize,
    },
}

/// 单飞模板缓存
#[derive(Default)]
pub struct TemplateCache {
    slots: HashMap<AssetId, TemplateSlot>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, asset: &AssetId, continuation: Continuation) -> TemplateRequest {
        match self.slots.get_mut(asset) {
            Some(TemplateSlot::Ready { template, .. }) => {
                TemplateRequest::Ready(Arc::clone(template))
            }
            Some(TemplateSlot::Loading { waiters }) => {
                waiters.push(continuation);
                TemplateRequest::Queued
            }
            None => {
                self.slots.insert(
                    asset.clone(),
                    TemplateSlot::Loading {
                        waiters: vec![continuation],
                    },
                );
                TemplateRequest::Load
            }
        }
    }

    /// 加载完成：缓存模板并取出排队的后续动作
    pub fn resolve(
        &mut self,
        asset: &AssetId,
        loaded: Arc<FlowAsset>,
    ) -> (Arc<InstancedTemplate>, Vec<Continuation>) {
        match self.slots.remove(asset) {
            Some(TemplateSlot::Ready { template, refs }) => {
                self.slots.insert(
                    asset.clone(),
                    TemplateSlot::Ready {
                        template: Arc::clone(&template),
                        refs,
                    },
                );
                (template, Vec::new())
            }
            slot => {
                let waiters = match slot {
                    Some(TemplateSlot::Loading { waiters }) => waiters,
                    _ => Vec::new(),
                };
                let template = Arc::new(InstancedTemplate::new(loaded));
                self.slots.insert(
                    asset.clone(),
                    TemplateSlot::Ready {
                        template: Arc::clone(&template),
                        refs: 0,
                    },
                );
                (template, waiters)
            }
        }
    }

    /// 加载失败：移除槽位，返回所有等待者
    pub fn fail(&mut self, asset: &AssetId) -> Vec<Continuation> {
        match self.slots.remove(asset) {
            Some(TemplateSlot::Loading { waiters }) => waiters,
            Some(ready) => {
                self.slots.insert(asset.clone(), ready);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    pub fn retain(&mut self, asset: &AssetId) {
        if let Some(TemplateSlot::Ready { refs, .. }) = self.slots.get_mut(asset) {
            *refs += 1;
        }
    }

    /// 引用计数减一，归零时释放模板；返回是否已释放
    pub fn release(&mut self, asset: &AssetId) -> bool {
        let released = match self.slots.get_mut(asset) {
            Some(TemplateSlot::Ready { refs, .. }) => {
                *refs = refs.saturating_sub(1);
                *refs == 0
            }
            _ => false,
        };
        if released {
            self.slots.remove(asset);
        }
        released
    }

    pub fn get(&self, asset: &AssetId) -> Option<Arc<InstancedTemplate>> {
        match self.slots.get(asset) {
            Some(TemplateSlot::Ready { template, .. }) => Some(Arc::clone(template)),
            _ => None,
        }
    }

    pub fn ref_count(&self, asset: &AssetId) -> usize {
        match self.slots.get(asset) {
            Some(TemplateSlot::Ready { refs, .. }) => *refs,
            _ => 0,
        }
    }

    pub fn is_loading(&self, asset: &AssetId) -> bool {
        matches!(self.slots.get(asset), Some(TemplateSlot::Loading { .. }))
    }

    pub fn loading_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, TemplateSlot::Loading { .. }))
            .count()
    }

    /// 已驻留的模板
    pub fn ready_ids(&self) -> Vec<AssetId> {
        let mut ids: Vec<AssetId> = self
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, TemplateSlot::Ready { .. }))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowAssetBuilder;

    fn asset(id: &str) -> Arc<FlowAsset> {
        Arc::new(FlowAssetBuilder::new(id).add_entry_node("start").build().unwrap())
    }

    #[test]
    fn only_first_requester_loads() {
        let mut cache = TemplateCache::new();
        let id = AssetId::new("Quest");
        assert!(matches!(
            cache.request(&id, Continuation::Preload),
            TemplateRequest::Load
        ));
        assert!(matches!(
            cache.request(&id, Continuation::Preload),
            TemplateRequest::Queued
        ));
        assert!(cache.is_loading(&id));

        let (template, waiters) = cache.resolve(&id, asset("Quest"));
        assert_eq!(waiters.len(), 2);
        match cache.request(&id, Continuation::Preload) {
            TemplateRequest::Ready(cached) => assert!(Arc::ptr_eq(&cached, &template)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn release_drops_template_at_zero() {
        let mut cache = TemplateCache::new();
        let id = AssetId::new("Quest");
        cache.request(&id, Continuation::Preload);
        cache.resolve(&id, asset("Quest"));
        cache.retain(&id);
        cache.retain(&id);

        assert!(!cache.release(&id));
        assert_eq!(cache.ref_count(&id), 1);
        assert!(cache.release(&id));
        assert!(cache.get(&id).is_none());
        assert!(!cache.release(&id));
    }

    #[test]
    fn failure_returns_waiters_and_clears_slot() {
        let mut cache = TemplateCache::new();
        let id = AssetId::new("Missing");
        cache.request(&id, Continuation::Preload);
        cache.request(&id, Continuation::Preload);
        assert_eq!(cache.fail(&id).len(), 2);
        assert!(!cache.is_loading(&id));
        assert!(matches!(
            cache.request(&id, Continuation::Preload),
            TemplateRequest::Load
        ));
    }
}
