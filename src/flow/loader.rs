use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{FlowError, Result};

use super::asset::{AssetId, FlowAsset};

/// 资产加载器 trait
///
/// 单次异步加载，不同请求之间没有顺序保证。
#[async_trait]
pub trait AssetLoader: Send + Sync {
    async fn load(&self, asset: &AssetId) -> Result<Arc<FlowAsset>>;
}

/// 内存资产库
#[derive(Default)]
pub struct MemoryAssetLoader {
    assets: RwLock<HashMap<AssetId, Arc<FlowAsset>>>,
    latency: Option<Duration>,
    loads: AtomicUsize,
}

impl MemoryAssetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次加载前等待的模拟延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn insert(&self, asset: FlowAsset) {
        self.assets.write().insert(asset.id.clone(), Arc::new(asset));
    }

    pub fn remove(&self, asset: &AssetId) -> bool {
        self.assets.write().remove(asset).is_some()
    }

    pub fn contains(&self, asset: &AssetId) -> bool {
        self.assets.read().contains_key(asset)
    }

    /// 已执行的加载次数
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetLoader for MemoryAssetLoader {
    async fn load(&self, asset: &AssetId) -> Result<Arc<FlowAsset>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.assets
            .read()
            .get(asset)
            .cloned()
            .ok_or_else(|| FlowError::AssetNotFound(asset.clone()))
    }
}
