use crate::flow::InstanceId;

// 运行时类型定义

/// 启动请求的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// 模板已驻留，实例已创建并激活
    Started(InstanceId),
    /// 模板加载中，实例将在加载完成后创建
    Pending,
    /// 绑定键上已有存活或挂起的实例
    AlreadyRunning,
    /// 仅预热模板，没有创建实例
    Preloaded,
}

impl StartOutcome {
    pub fn instance(&self) -> Option<InstanceId> {
        match self {
            StartOutcome::Started(id) => Some(*id),
            _ => None,
        }
    }
}
