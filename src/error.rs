use thiserror::Error;

/// Timing wheel error type
///
/// 时间轮错误类型
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimerError {
    /// Invalid slot count (every level needs at least two slots)
    ///
    /// 槽位数量无效（每层至少需要 2 个槽位）
    #[error("invalid slot count {slot_count}: {reason}")]
    InvalidSlotCount {
        slot_count: usize,
        reason: &'static str,
    },

    /// Invalid configuration field
    ///
    /// 配置字段无效
    #[error("invalid configuration `{field}`: {reason}")]
    InvalidConfiguration {
        field: String,
        reason: String,
    },

    /// Time scale must be finite, positive and yield a non-zero tick period
    ///
    /// 时间缩放必须是有限正数，且对应的 tick 周期不能为 0
    #[error("invalid time scale {scale}: must be finite, positive and yield a representable tick period")]
    InvalidTimeScale { scale: f64 },

    /// The control loop is already running
    ///
    /// 控制循环已在运行
    #[error("timing wheel is already running")]
    AlreadyStarted,

    /// The control loop has been stopped; a wheel cannot be restarted
    ///
    /// 控制循环已停止，时间轮不可重新启动
    #[error("timing wheel has been stopped")]
    Stopped,

    /// `stop` was called while no control loop was running
    ///
    /// 没有运行中的控制循环
    #[error("timing wheel is not running")]
    NotRunning,

    /// Constructed outside of a tokio runtime
    ///
    /// 未在 tokio 运行时中创建
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Internal control channel closed
    ///
    /// 内部控制通道已关闭
    #[error("control channel closed")]
    ChannelClosed,

    /// A supervised task was dropped before its callback completed
    ///
    /// 任务在回调完成前被丢弃
    #[error("task dropped before completion")]
    TaskDropped,
}
