//! # 可控制的分层时间轮
//!
//! Hierarchical timing wheel whose tick rate can be changed while it runs,
//! built on the tokio runtime.
//!
//! 基于 tokio 运行时的分层时间轮，运行期间可调整 tick 速率（时间缩放）。
//!
//! ## 特性
//!
//! - **分层**: 超出当前跨度的任务自动创建更高层，层数按需增长
//! - **可控速率**: tick 周期 = 最小间隔 × 时间缩放，可在运行时修改
//! - **并发提交**: 任意线程均可提交任务，与时钟推进并发进行
//! - **异步执行**: 到期回调在独立的 tokio 任务中执行，不阻塞时钟
//!
//! ## 快速开始
//!
//! ```no_run
//! use controllable_timing_wheel::ControllableTimingWheel;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 10ms 精度，每层 10 个槽位
//!     let wheel = Arc::new(ControllableTimingWheel::new(Duration::from_millis(10), 10)?);
//!
//!     let done = wheel.add_task_notify(Duration::from_secs(2), || async {
//!         println!("fired after 2 seconds");
//!     });
//!
//!     let runner = tokio::spawn({
//!         let wheel = Arc::clone(&wheel);
//!         async move { wheel.start().await }
//!     });
//!
//!     // Run at half speed: every tick now takes 20ms
//!     wheel.change_time_scale(2.0).await?;
//!
//!     done.wait().await?;
//!     wheel.stop().await?;
//!     runner.await??;
//!     Ok(())
//! }
//! ```
//!
//! ## 架构说明
//!
//! ### 分层时间轮
//!
//! Level `L` has `slot_count` slots of `min_interval * slot_count^L` each.
//! Every task records the absolute root tick it is due on; it is filed into
//! the lowest level whose next advance reaches it before the deadline is
//! passed. When a level above the root advances, the slot it lands on is
//! drained and re-filed one level down against the same deadline, so tasks
//! fire on the root tick covering their delay regardless of when the upper
//! levels were created.
//!
//! 第 `L` 层有 `slot_count` 个槽位，每个槽位代表 `min_interval * slot_count^L`。
//! 上层推进时，当前槽位的任务按绝对到期 tick 重新分配到下一层（级联）。
//!
//! ### 控制循环
//!
//! `start` runs a single loop that selects over control commands and the
//! tick interval. Time-scale changes travel with their message and re-arm the
//! interval without touching the wheel position; `stop` ends the loop and
//! abandons whatever is still scheduled.

mod config;
mod error;
mod service;
mod task;
mod timer;
mod wheel;

// 重新导出公共 API
pub use config::{
    DriverConfig, DriverConfigBuilder, TimerConfig, TimerConfigBuilder, WheelConfig,
    WheelConfigBuilder,
};
pub use error::TimerError;
pub use task::{CallbackWrapper, CompletionReceiver, TaskId, TimerCallback};
pub use timer::ControllableTimingWheel;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn spawn_start(
        wheel: &Arc<ControllableTimingWheel>,
    ) -> tokio::task::JoinHandle<Result<(), TimerError>> {
        let wheel = Arc::clone(wheel);
        tokio::spawn(async move { wheel.start().await })
    }

    #[tokio::test(start_paused = true)]
    async fn test_basic_task() {
        let wheel = Arc::new(ControllableTimingWheel::with_defaults().unwrap());
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        wheel.add_task(Duration::from_millis(50), move || async move {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        let runner = spawn_start(&wheel);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        wheel.stop().await.unwrap();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiple_tasks() {
        let wheel = Arc::new(ControllableTimingWheel::new(Duration::from_millis(10), 4).unwrap());
        let counter = Arc::new(AtomicU32::new(0));

        // 跨越多层的 10 个任务
        for i in 0..10u64 {
            let counter_clone = Arc::clone(&counter);
            wheel.add_task(Duration::from_millis(10 * (i * i + 1)), move || async move {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(wheel.level_count() >= 3);

        let runner = spawn_start(&wheel);
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(wheel.task_count(), 0);

        wheel.stop().await.unwrap();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_notification() {
        let wheel = Arc::new(ControllableTimingWheel::with_defaults().unwrap());
        let runner = spawn_start(&wheel);

        let done = wheel.add_task_notify(Duration::from_millis(50), || async {});
        let task_id = done.task_id();
        assert!(task_id.as_u64() > 0);
        done.wait().await.expect("Should receive completion notification");

        wheel.stop().await.unwrap();
        runner.await.unwrap().unwrap();
    }
}
