use crate::config::tick_period;
use crate::error::TimerError;
use crate::wheel::{Advance, Wheel};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Control loop command
///
/// 控制循环命令
pub(crate) enum ControlCommand {
    /// Switch to a new time scale; the value travels with the message
    ///
    /// 切换时间缩放（新值随消息传递）
    ChangeTimeScale(f64),
    /// Exit the loop and acknowledge once it has exited
    ///
    /// 退出循环，退出后应答
    Stop(oneshot::Sender<()>),
}

/// Lifecycle and applied tick settings, shared between the public handle
/// and the control loop
///
/// 生命周期与当前 tick 设置，由公共句柄和控制循环共享
pub(crate) struct LoopStatus {
    lifecycle: AtomicU8,
    /// f64 bits of the applied time scale
    time_scale: AtomicU64,
    tick_period_nanos: AtomicU64,
}

impl LoopStatus {
    pub(crate) fn new(time_scale: f64, period: Duration) -> Self {
        Self {
            lifecycle: AtomicU8::new(IDLE),
            time_scale: AtomicU64::new(time_scale.to_bits()),
            tick_period_nanos: AtomicU64::new(duration_to_nanos(period)),
        }
    }

    /// Claim the right to run the loop
    pub(crate) fn begin(&self) -> Result<(), TimerError> {
        match self
            .lifecycle
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(RUNNING) => Err(TimerError::AlreadyStarted),
            Err(_) => Err(TimerError::Stopped),
        }
    }

    pub(crate) fn finish(&self) {
        self.lifecycle.store(STOPPED, Ordering::Release);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == RUNNING
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == STOPPED
    }

    pub(crate) fn time_scale(&self) -> f64 {
        f64::from_bits(self.time_scale.load(Ordering::Acquire))
    }

    pub(crate) fn tick_period(&self) -> Duration {
        Duration::from_nanos(self.tick_period_nanos.load(Ordering::Acquire))
    }

    fn publish(&self, time_scale: f64, period: Duration) {
        self.time_scale.store(time_scale.to_bits(), Ordering::Release);
        self.tick_period_nanos
            .store(duration_to_nanos(period), Ordering::Release);
    }
}

/// The single control loop driving the wheel
///
/// Selects over control commands and the tick interval. Commands win over a
/// ready tick. Each tick advances the root level, dispatches the due tasks
/// as independent tokio tasks and runs any cascade on its own task.
///
/// 驱动时间轮的唯一控制循环
pub(crate) struct ControlLoop {
    wheel: Arc<Wheel>,
    commands: mpsc::Receiver<ControlCommand>,
    status: Arc<LoopStatus>,
}

impl ControlLoop {
    pub(crate) fn new(
        wheel: Arc<Wheel>,
        commands: mpsc::Receiver<ControlCommand>,
        status: Arc<LoopStatus>,
    ) -> Self {
        Self {
            wheel,
            commands,
            status,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut period = self.status.tick_period();
        let mut ticker = arm_ticker(period);
        info!(
            ?period,
            time_scale = self.status.time_scale(),
            slot_count = self.wheel.slot_count(),
            "timing wheel started"
        );

        let ack = loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(ControlCommand::Stop(ack)) => break Some(ack),
                    Some(ControlCommand::ChangeTimeScale(scale)) => {
                        match tick_period(self.wheel.min_interval(), scale) {
                            Ok(new_period) => {
                                // Re-armed from now; wheel position is untouched
                                period = new_period;
                                ticker = arm_ticker(period);
                                self.status.publish(scale, period);
                                debug!(time_scale = scale, ?period, "time scale changed");
                            }
                            Err(error) => warn!(%error, "ignoring time scale change"),
                        }
                    }
                    None => break None,
                },

                _ = ticker.tick() => self.on_tick(),
            }
        };

        self.commands.close();
        self.status.finish();
        info!(
            ticks = self.wheel.elapsed_ticks(),
            abandoned = self.wheel.task_count(),
            "timing wheel stopped"
        );

        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    fn on_tick(&self) {
        let Advance { expired, cascade } = self.wheel.advance();

        if !expired.is_empty() {
            trace!(tasks = expired.len(), "dispatching due tasks");
        }
        for task in expired {
            tokio::spawn(task.run());
        }

        if let Some(cascade) = cascade {
            trace!(level = cascade.level(), "spawning cascade");
            let wheel = Arc::clone(&self.wheel);
            tokio::spawn(async move {
                wheel.run_cascades(cascade);
            });
        }
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        // Covers a cancelled `start` future as well as a normal exit
        self.status.finish();
    }
}

/// Periodic ticker whose first tick is one period away
fn arm_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
