// 宿主对象模型：句柄表与进程内 World

mod handle;
mod host;

pub(crate) use handle::define_handle_id;
pub use handle::{Handle, HandleTable};
pub use host::{ActorId, ComponentId, Facet, ObjectHost, ObjectId, World};
