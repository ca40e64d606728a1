// 组件注册表：标签索引、生命周期跟踪与通知

mod events;
mod index;
mod tags;
mod tracker;

pub use events::{ComponentEvent, Multicast, SubscriptionId, TaggedComponentEvent};
pub use index::TagRegistryIndex;
pub use tags::{MatchType, Tag, TagContainer};
pub use tracker::ComponentTracker;
