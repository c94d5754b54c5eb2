use crate::error::TimerError;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

/// 全局唯一的任务 ID 生成器
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a scheduled task
///
/// 定时任务的唯一标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// 生成一个新的唯一任务 ID
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// 获取任务 ID 的数值
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer callback
///
/// A callback runs at most once, so it is consumed on call. Any
/// `FnOnce() -> Future<Output = ()>` closure that is `Send + 'static`
/// implements it.
///
/// 定时器回调 trait，回调最多执行一次，调用时被消费
///
/// # Example (示例)
///
/// ```
/// use controllable_timing_wheel::TimerCallback;
/// use futures::future::BoxFuture;
///
/// struct Expire(u32);
///
/// impl TimerCallback for Expire {
///     fn call(self: Box<Self>) -> BoxFuture<'static, ()> {
///         Box::pin(async move {
///             println!("session {} expired", self.0);
///         })
///     }
/// }
/// ```
pub trait TimerCallback: Send + 'static {
    /// 执行回调，返回一个 Future
    fn call(self: Box<Self>) -> BoxFuture<'static, ()>;
}

impl<F, Fut> TimerCallback for F
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin((*self)())
    }
}

/// 回调包装器类型
pub type CallbackWrapper = Box<dyn TimerCallback>;

/// Sender half of a task's completion notification
///
/// 任务完成通知发送端
pub(crate) struct CompletionNotifier(pub(crate) oneshot::Sender<()>);

/// Resolves once a supervised task's callback has finished
///
/// 任务完成通知接收端
pub struct CompletionReceiver {
    task_id: TaskId,
    rx: oneshot::Receiver<()>,
}

impl CompletionReceiver {
    pub(crate) fn new(task_id: TaskId, rx: oneshot::Receiver<()>) -> Self {
        Self { task_id, rx }
    }

    /// 获取任务 ID
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Wait until the callback has run to completion
    ///
    /// # Returns (返回)
    /// - `Ok(())`: callback finished
    /// - `Err(TimerError::TaskDropped)`: the task was abandoned (wheel stopped
    ///   or dropped) or its callback panicked
    pub async fn wait(self) -> Result<(), TimerError> {
        self.rx.await.map_err(|_| TimerError::TaskDropped)
    }
}

/// A task held by the wheel
///
/// 时间轮中的定时任务
pub(crate) struct TimerTask {
    /// 任务唯一标识符
    pub(crate) id: TaskId,

    /// Wheel tick at which the task is due (level-0 ticks)
    ///
    /// 到期的 tick（以最底层 tick 计）
    pub(crate) deadline: u64,

    /// Residual delay below the granularity of the slot holding the task
    ///
    /// 放入槽位后剩余的延迟
    pub(crate) delay: Duration,

    /// Sub-tick part of the requested delay
    pub(crate) sub_tick: Duration,

    callback: CallbackWrapper,

    notifier: Option<CompletionNotifier>,
}

impl TimerTask {
    pub(crate) fn new(callback: CallbackWrapper) -> Self {
        Self {
            id: TaskId::new(),
            deadline: 0,
            delay: Duration::ZERO,
            sub_tick: Duration::ZERO,
            callback,
            notifier: None,
        }
    }

    /// Attach a completion channel, returning its receiving end
    ///
    /// 附加完成通知通道
    pub(crate) fn with_completion(mut self) -> (Self, CompletionReceiver) {
        let (tx, rx) = oneshot::channel();
        self.notifier = Some(CompletionNotifier(tx));
        let receiver = CompletionReceiver::new(self.id, rx);
        (self, receiver)
    }

    /// Consume the task into the future that runs its callback
    ///
    /// 将任务转换为执行回调的 Future
    pub(crate) fn run(self) -> BoxFuture<'static, ()> {
        let TimerTask {
            callback, notifier, ..
        } = self;
        Box::pin(async move {
            callback.call().await;
            if let Some(notifier) = notifier {
                let _ = notifier.0.send(());
            }
        })
    }
}
