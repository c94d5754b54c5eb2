use crate::config::{tick_period, TimerConfig};
use crate::error::TimerError;
use crate::service::{ControlCommand, ControlLoop, LoopStatus};
use crate::task::{CompletionReceiver, TimerCallback, TimerTask};
use crate::wheel::Wheel;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// Controllable hierarchical timing wheel
///
/// Owns the wheel, the control loop's command channel and the lifecycle.
/// `add_task` may be called from any thread; `start` runs the control loop on
/// the calling task until `stop`.
///
/// 可控制的分层时间轮
///
/// # Example (示例)
/// ```no_run
/// use controllable_timing_wheel::ControllableTimingWheel;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let wheel = Arc::new(ControllableTimingWheel::new(Duration::from_millis(10), 10)?);
///
///     wheel.add_task(Duration::from_millis(500), || async {
///         println!("fired after 500ms");
///     });
///
///     let runner = tokio::spawn({
///         let wheel = Arc::clone(&wheel);
///         async move { wheel.start().await }
///     });
///
///     tokio::time::sleep(Duration::from_secs(1)).await;
///     wheel.stop().await?;
///     runner.await??;
///     Ok(())
/// }
/// ```
pub struct ControllableTimingWheel {
    wheel: Arc<Wheel>,

    config: TimerConfig,

    /// 控制命令发送端
    command_tx: mpsc::Sender<ControlCommand>,

    /// Receiving end, handed to the control loop by `start`
    ///
    /// 控制命令接收端（由 `start` 交给控制循环）
    command_rx: Mutex<Option<mpsc::Receiver<ControlCommand>>>,

    status: Arc<LoopStatus>,

    /// Runtime used to dispatch sub-resolution tasks from any thread
    runtime: Handle,
}

impl ControllableTimingWheel {
    /// Create a wheel with the given resolution and slots per level
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Parameters (参数)
    /// - `min_interval`: duration of one level-0 slot; also the base tick period
    /// - `slot_count`: slots per level, at least 2
    pub fn new(min_interval: Duration, slot_count: usize) -> Result<Self, TimerError> {
        let config = TimerConfig::builder()
            .min_interval(min_interval)
            .slot_count(slot_count)
            .build()?;
        Self::with_config(config)
    }

    /// Create a wheel with the default configuration
    /// - minimum interval: 10ms
    /// - slots per level: 64
    /// - time scale: 1.0
    pub fn with_defaults() -> Result<Self, TimerError> {
        Self::with_config(TimerConfig::default())
    }

    /// 使用完整配置创建时间轮
    pub fn with_config(config: TimerConfig) -> Result<Self, TimerError> {
        let config = config.validated()?;
        let runtime = Handle::try_current().map_err(|_| TimerError::NoRuntime)?;
        let period = tick_period(config.wheel.min_interval, config.driver.time_scale)?;
        let (command_tx, command_rx) = mpsc::channel(config.driver.command_channel_capacity);

        Ok(Self {
            wheel: Arc::new(Wheel::new(config.wheel.clone())),
            status: Arc::new(LoopStatus::new(config.driver.time_scale, period)),
            config,
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            runtime,
        })
    }

    /// Schedule `callback` to run after `delay`
    ///
    /// A delay shorter than the minimum interval is dispatched immediately
    /// instead of waiting up to one tick. Callbacks run as independent tokio
    /// tasks; their panics are not observed.
    ///
    /// 调度一次性任务
    pub fn add_task<C>(&self, delay: Duration, callback: C)
    where
        C: TimerCallback,
    {
        self.submit(delay, TimerTask::new(Box::new(callback)));
    }

    /// Schedule `callback` and get a handle that resolves once it has run
    ///
    /// 调度任务并返回完成通知接收器
    ///
    /// # Example (示例)
    /// ```no_run
    /// # use controllable_timing_wheel::ControllableTimingWheel;
    /// # use std::time::Duration;
    /// # #[tokio::main]
    /// # async fn main() {
    /// let wheel = ControllableTimingWheel::with_defaults().unwrap();
    /// let done = wheel.add_task_notify(Duration::ZERO, || async {});
    /// done.wait().await.unwrap();
    /// # }
    /// ```
    pub fn add_task_notify<C>(&self, delay: Duration, callback: C) -> CompletionReceiver
    where
        C: TimerCallback,
    {
        let (task, receiver) = TimerTask::new(Box::new(callback)).with_completion();
        self.submit(delay, task);
        receiver
    }

    fn submit(&self, delay: Duration, task: TimerTask) {
        if delay < self.wheel.min_interval() {
            trace!(task_id = task.id.as_u64(), ?delay, "dispatching sub-resolution task");
            self.runtime.spawn(task.run());
            return;
        }
        self.wheel.insert(delay, task);
    }

    /// Run the control loop until `stop`
    ///
    /// # Errors (错误)
    /// - `AlreadyStarted`: another `start` is running
    /// - `Stopped`: the wheel was stopped; it cannot be restarted
    pub async fn start(&self) -> Result<(), TimerError> {
        self.status.begin()?;
        let commands = self
            .command_rx
            .lock()
            .take()
            .ok_or(TimerError::Stopped)?;

        ControlLoop::new(Arc::clone(&self.wheel), commands, Arc::clone(&self.status))
            .run()
            .await;
        Ok(())
    }

    /// Stop the control loop and wait until it has exited
    ///
    /// Tasks still in the wheel are abandoned.
    ///
    /// # Errors (错误)
    /// - `NotRunning`: no control loop is running (never started, or already
    ///   stopped)
    pub async fn stop(&self) -> Result<(), TimerError> {
        if !self.status.is_running() {
            return Err(TimerError::NotRunning);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.command_tx
            .send(ControlCommand::Stop(ack_tx))
            .await
            .map_err(|_| TimerError::NotRunning)?;
        ack_rx.await.map_err(|_| TimerError::NotRunning)
    }

    /// Change the time scale; tick period becomes `min_interval * scale`
    ///
    /// Applied by the control loop from the next tick boundary. A request
    /// made before `start` is applied when the loop starts.
    ///
    /// # Errors (错误)
    /// - `InvalidTimeScale`: `scale` is not finite and positive, or the
    ///   resulting period is zero or too large
    /// - `Stopped`: the wheel has been stopped
    /// - `ChannelClosed`: the control loop exited while the request was sent
    pub async fn change_time_scale(&self, scale: f64) -> Result<(), TimerError> {
        tick_period(self.config.wheel.min_interval, scale)?;
        if self.status.is_stopped() {
            return Err(TimerError::Stopped);
        }

        self.command_tx
            .send(ControlCommand::ChangeTimeScale(scale))
            .await
            .map_err(|_| TimerError::ChannelClosed)
    }

    /// Time scale currently applied by the control loop
    ///
    /// 当前生效的时间缩放
    pub fn time_scale(&self) -> f64 {
        self.status.time_scale()
    }

    /// Real duration between ticks
    ///
    /// 当前实际 tick 周期
    pub fn tick_period(&self) -> Duration {
        self.status.tick_period()
    }

    /// 获取最小时间间隔
    pub fn min_interval(&self) -> Duration {
        self.config.wheel.min_interval
    }

    /// 获取每层槽位数量
    pub fn slot_count(&self) -> usize {
        self.config.wheel.slot_count
    }

    /// Ticks processed so far
    ///
    /// 已推进的 tick 数
    pub fn elapsed_ticks(&self) -> u64 {
        self.wheel.elapsed_ticks()
    }

    /// Levels created so far (at least 1)
    ///
    /// 当前层数
    pub fn level_count(&self) -> usize {
        self.wheel.level_count()
    }

    /// Slot interval of `level`, or `None` if that level has not been created
    ///
    /// 获取某层的槽位间隔
    pub fn level_interval(&self, level: usize) -> Option<Duration> {
        self.wheel.interval(level)
    }

    /// Tasks waiting in the wheel
    ///
    /// 获取当前等待中的任务数量
    pub fn task_count(&self) -> usize {
        self.wheel.task_count()
    }

    /// 控制循环是否在运行
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_callback(counter: &Arc<AtomicU32>) -> impl FnOnce() -> futures::future::Ready<()> + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    fn spawn_start(wheel: &Arc<ControllableTimingWheel>) -> tokio::task::JoinHandle<Result<(), TimerError>> {
        let wheel = Arc::clone(wheel);
        tokio::spawn(async move { wheel.start().await })
    }

    #[tokio::test]
    async fn test_wheel_creation() {
        let wheel = ControllableTimingWheel::with_defaults().unwrap();
        assert_eq!(wheel.min_interval(), Duration::from_millis(10));
        assert_eq!(wheel.slot_count(), 64);
        assert_eq!(wheel.time_scale(), 1.0);
        assert_eq!(wheel.tick_period(), Duration::from_millis(10));
        assert_eq!(wheel.task_count(), 0);
        assert_eq!(wheel.level_count(), 1);
        assert_eq!(wheel.level_interval(0), Some(Duration::from_millis(10)));
        assert_eq!(wheel.level_interval(1), None);
        assert!(!wheel.is_running());
    }

    #[test]
    fn test_creation_outside_runtime() {
        let result = ControllableTimingWheel::new(Duration::from_millis(10), 10);
        assert!(matches!(result, Err(TimerError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_invalid_parameters() {
        assert!(matches!(
            ControllableTimingWheel::new(Duration::ZERO, 10),
            Err(TimerError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            ControllableTimingWheel::new(Duration::from_millis(10), 1),
            Err(TimerError::InvalidSlotCount { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_resolution_task_runs_without_start() {
        let wheel = ControllableTimingWheel::new(Duration::from_millis(10), 10).unwrap();
        let counter = Arc::new(AtomicU32::new(0));

        wheel.add_task(Duration::from_millis(5), counting_callback(&counter));
        let done = wheel.add_task_notify(Duration::ZERO, counting_callback(&counter));
        done.wait().await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(wheel.task_count(), 0);
        assert_eq!(wheel.elapsed_ticks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_and_fire() {
        let wheel = Arc::new(ControllableTimingWheel::new(Duration::from_millis(10), 10).unwrap());
        let counter = Arc::new(AtomicU32::new(0));
        wheel.add_task(Duration::from_millis(50), counting_callback(&counter));
        assert_eq!(wheel.task_count(), 1);

        let runner = spawn_start(&wheel);
        // Due on the 6th tick at 60ms
        tokio::time::sleep(Duration::from_millis(55)).await;
        assert!(wheel.is_running());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        wheel.stop().await.unwrap();
        runner.await.unwrap().unwrap();
        assert!(!wheel.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_misuse() {
        let wheel = Arc::new(ControllableTimingWheel::new(Duration::from_millis(10), 10).unwrap());
        assert_eq!(wheel.stop().await, Err(TimerError::NotRunning));

        let runner = spawn_start(&wheel);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(wheel.start().await, Err(TimerError::AlreadyStarted));

        wheel.stop().await.unwrap();
        runner.await.unwrap().unwrap();

        assert_eq!(wheel.stop().await, Err(TimerError::NotRunning));
        assert_eq!(wheel.start().await, Err(TimerError::Stopped));
        assert_eq!(wheel.change_time_scale(2.0).await, Err(TimerError::Stopped));
    }

    #[tokio::test]
    async fn test_invalid_time_scale() {
        let wheel = ControllableTimingWheel::with_defaults().unwrap();
        for scale in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                wheel.change_time_scale(scale).await,
                Err(TimerError::InvalidTimeScale { .. })
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_scale_change_applies_from_next_tick() {
        let wheel = Arc::new(ControllableTimingWheel::new(Duration::from_millis(10), 10).unwrap());
        let runner = spawn_start(&wheel);

        tokio::time::sleep(Duration::from_millis(105)).await;
        assert_eq!(wheel.elapsed_ticks(), 10);

        wheel.change_time_scale(2.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(wheel.time_scale(), 2.0);
        assert_eq!(wheel.tick_period(), Duration::from_millis(20));

        // Re-armed at 105ms: ticks at 125, 145, ..., 305
        tokio::time::sleep(Duration::from_millis(204)).await;
        assert_eq!(wheel.elapsed_ticks(), 20);

        wheel.stop().await.unwrap();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_scale_requested_before_start() {
        let wheel = Arc::new(ControllableTimingWheel::new(Duration::from_millis(10), 10).unwrap());
        let counter = Arc::new(AtomicU32::new(0));
        wheel.add_task(Duration::from_millis(30), counting_callback(&counter));
        wheel.change_time_scale(0.5).await.unwrap();
        // Not applied until the loop runs
        assert_eq!(wheel.time_scale(), 1.0);

        let runner = spawn_start(&wheel);
        // 5ms ticks: the 4th tick is at 20ms
        tokio::time::sleep(Duration::from_millis(22)).await;
        assert_eq!(wheel.time_scale(), 0.5);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        wheel.stop().await.unwrap();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_pending_tasks() {
        let wheel = Arc::new(ControllableTimingWheel::new(Duration::from_millis(10), 10).unwrap());
        let done = wheel.add_task_notify(Duration::from_millis(500), || async {});

        let runner = spawn_start(&wheel);
        tokio::time::sleep(Duration::from_millis(50)).await;
        wheel.stop().await.unwrap();
        runner.await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(wheel.task_count(), 1);

        drop(wheel);
        assert_eq!(done.wait().await, Err(TimerError::TaskDropped));
    }
}
