use crate::config::WheelConfig;
use crate::task::{TaskId, TimerTask};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Mutable part of a level, guarded by the level lock
///
/// 层的可变状态，由层锁保护
struct LevelState {
    /// Slot array, each slot holds an unordered bucket of tasks
    ///
    /// 槽位数组，每个槽位存储一组无序任务
    slots: Vec<Vec<TimerTask>>,

    /// 当前槽位指针
    current_slot: usize,

    /// Number of advances of this level; level 0's count is the wheel clock
    ///
    /// 本层推进次数；第 0 层的推进次数即时间轮时钟
    ticks: u64,
}

/// Link from a level to the level above it
#[derive(Debug, Clone, Copy)]
struct NextLevel {
    /// Arena index of the next level
    index: usize,
    /// `current_slot` of this level when the next level was created
    mark: usize,
}

/// One level of the hierarchy
///
/// 时间轮的一层
struct Level {
    index: usize,

    /// Level-0 ticks covered by one slot (`slot_count^index`, saturating)
    ///
    /// 一个槽位覆盖的第 0 层 tick 数
    slot_ticks: u64,

    /// 一个槽位代表的时间
    interval: Duration,

    state: Mutex<LevelState>,

    next: OnceLock<NextLevel>,

    /// Serializes creation of the next level
    ///
    /// 仅用于串行化下一层的创建
    grow_lock: Mutex<()>,
}

impl Level {
    fn new(index: usize, slot_count: usize, min_interval: Duration) -> Self {
        let slot_ticks = (slot_count as u64).saturating_pow(index.min(u32::MAX as usize) as u32);
        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            slots.push(Vec::new());
        }

        Self {
            index,
            slot_ticks,
            interval: scale_duration(min_interval, slot_ticks),
            state: Mutex::new(LevelState {
                slots,
                current_slot: 0,
                ticks: 0,
            }),
            next: OnceLock::new(),
            grow_lock: Mutex::new(()),
        }
    }
}

/// Pending advance of a higher level, produced when the level below it
/// completes a revolution since its mark
///
/// 待执行的级联：下一层需要推进，并把到期任务重新放入更细的层
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cascade {
    level: usize,
}

impl Cascade {
    /// Level this cascade advances
    pub(crate) fn level(&self) -> usize {
        self.level
    }
}

/// Result of advancing the root level by one slot
pub(crate) struct Advance {
    /// Tasks due on this tick
    ///
    /// 本 tick 到期的任务
    pub(crate) expired: Vec<TimerTask>,

    /// Cascade to run off the tick path, if the root completed a revolution
    /// relative to the next level's mark
    pub(crate) cascade: Option<Cascade>,
}

/// Hierarchical timing wheel
///
/// Levels live in an arena indexed by level number. Level `n` has slots of
/// `min_interval * slot_count^n`; level `n + 1` is created on the first task
/// that does not fit in one revolution of level `n`.
///
/// Every task carries the absolute tick it is due at, so a cascade that
/// runs early or late re-places its tasks correctly: a task whose tick has
/// already passed lands in the root's current slot and fires on the next
/// tick.
///
/// Locking: each level's state has its own mutex, held for one placement or
/// one slot swap. At most one level lock is held at a time. The arena lock is
/// taken for writing only to append a level.
///
/// 分层时间轮数据结构
pub(crate) struct Wheel {
    slot_count: usize,
    min_interval: Duration,
    root: Arc<Level>,
    levels: RwLock<Vec<Arc<Level>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Start,
    Up,
    Down,
}

impl Wheel {
    /// 创建新的时间轮（配置已校验）
    pub(crate) fn new(config: WheelConfig) -> Self {
        let root = Arc::new(Level::new(0, config.slot_count, config.min_interval));
        Self {
            slot_count: config.slot_count,
            min_interval: config.min_interval,
            root: Arc::clone(&root),
            levels: RwLock::new(vec![root]),
        }
    }

    /// 获取每层槽位数量
    pub(crate) fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// 获取最底层槽位间隔
    pub(crate) fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Slot interval of a level, if that level exists
    ///
    /// 获取某层的槽位间隔
    pub(crate) fn interval(&self, level: usize) -> Option<Duration> {
        self.levels.read().get(level).map(|level| level.interval)
    }

    /// 当前层数
    pub(crate) fn level_count(&self) -> usize {
        self.levels.read().len()
    }

    /// Number of completed root advances
    ///
    /// 时间轮时钟（第 0 层已推进的 tick 数）
    pub(crate) fn elapsed_ticks(&self) -> u64 {
        self.root.state.lock().ticks
    }

    /// Tasks currently held across all levels
    ///
    /// 所有层中待执行任务数量
    pub(crate) fn task_count(&self) -> usize {
        let levels = self.levels.read();
        levels
            .iter()
            .map(|level| level.state.lock().slots.iter().map(Vec::len).sum::<usize>())
            .sum()
    }

    /// Whole level-0 ticks in a delay
    ///
    /// 计算延迟对应的 tick 数
    pub(crate) fn delay_to_ticks(&self, delay: Duration) -> u64 {
        let ticks = delay.as_nanos() / self.min_interval.as_nanos();
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }

    /// Insert a task due `delay` from now
    ///
    /// A delay finer than one root slot is accepted and fires on the next
    /// tick, up to one slot late.
    ///
    /// 插入定时任务
    pub(crate) fn insert(&self, delay: Duration, mut task: TimerTask) -> TaskId {
        let task_id = task.id;
        if delay < self.min_interval {
            warn!(
                task_id = task_id.as_u64(),
                ?delay,
                interval = ?self.min_interval,
                "delay is below the wheel resolution, task fires on the next tick"
            );
        }

        let now = self.elapsed_ticks();
        task.deadline = now.saturating_add(self.delay_to_ticks(delay));
        task.sub_tick = nanos_to_duration(delay.as_nanos() % self.min_interval.as_nanos());
        self.place(0, task);
        task_id
    }

    /// Place a task starting at `index`, moving up while it overflows a
    /// level and down while it is due before the level's next cascade
    fn place(&self, mut index: usize, mut task: TimerTask) {
        let slot_count = self.slot_count as u64;
        let mut direction = Direction::Start;

        loop {
            let level = self.level(index);

            if index == 0 {
                let mut state = level.state.lock();
                let offset = task.deadline.saturating_sub(state.ticks);
                if offset < slot_count || direction == Direction::Down {
                    let offset = offset.min(slot_count - 1) as usize;
                    let slot = (state.current_slot + offset) % self.slot_count;
                    task.delay = task.sub_tick;
                    trace!(
                        task_id = task.id.as_u64(),
                        level = 0,
                        slot,
                        residual = ?task.delay,
                        "placed task"
                    );
                    state.slots[slot].push(task);
                    return;
                }
            } else {
                let capture = self.next_capture(index);
                let mut state = level.state.lock();

                if task.deadline < capture && direction != Direction::Up {
                    drop(state);
                    index -= 1;
                    direction = Direction::Down;
                    continue;
                }

                let span = task.deadline.saturating_sub(capture);
                let ahead = span / level.slot_ticks;
                if ahead < slot_count || direction == Direction::Down {
                    let ahead = ahead.min(slot_count - 1) as usize;
                    let slot = (state.current_slot + ahead) % self.slot_count;
                    task.delay = self
                        .ticks_to_duration(span % level.slot_ticks)
                        .saturating_add(task.sub_tick);
                    trace!(
                        task_id = task.id.as_u64(),
                        level = index,
                        slot,
                        residual = ?task.delay,
                        "placed task"
                    );
                    state.slots[slot].push(task);
                    return;
                }
            }

            index = self.next_level(&level);
            direction = Direction::Up;
        }
    }

    /// Wheel clock value right after level `index` next advances
    ///
    /// Level 0 advances on every tick. Level `n + 1` advances when level
    /// `n`'s pointer returns to its mark, i.e. every `slot_count^(n + 1)`
    /// ticks.
    fn next_capture(&self, index: usize) -> u64 {
        let levels = self.levels.read();
        let mut capture = 0u64;

        for level in levels.iter().take(index) {
            let (ticks, current) = {
                let state = level.state.lock();
                (state.ticks, state.current_slot)
            };
            if level.index == 0 {
                capture = ticks.saturating_add(1);
            }
            let Some(next) = level.next.get() else {
                break;
            };
            let turns = (next.mark + self.slot_count - current - 1) % self.slot_count + 1;
            capture = capture.saturating_add(((turns - 1) as u64).saturating_mul(level.slot_ticks));
        }

        capture
    }

    /// Index of the level above `level`, creating it on first use
    ///
    /// 获取（必要时创建）下一层
    fn next_level(&self, level: &Level) -> usize {
        if let Some(next) = level.next.get() {
            return next.index;
        }

        let _guard = level.grow_lock.lock();
        if let Some(next) = level.next.get() {
            return next.index;
        }

        let mark = level.state.lock().current_slot;
        let index = level.index + 1;
        let child = Arc::new(Level::new(index, self.slot_count, self.min_interval));
        let interval = child.interval;
        self.levels.write().push(child);
        let _ = level.next.set(NextLevel { index, mark });

        debug!(level = index, ?interval, mark, "created wheel level");
        index
    }

    fn level(&self, index: usize) -> Arc<Level> {
        if index == 0 {
            return Arc::clone(&self.root);
        }
        Arc::clone(&self.levels.read()[index])
    }

    fn ticks_to_duration(&self, ticks: u64) -> Duration {
        scale_duration(self.min_interval, ticks)
    }

    /// Advance the root level by one slot
    ///
    /// 推进第 0 层一个槽位，返回到期任务以及可能的级联
    pub(crate) fn advance(&self) -> Advance {
        self.advance_level(&self.root)
    }

    fn advance_level(&self, level: &Level) -> Advance {
        let mut state = level.state.lock();
        let slot = state.current_slot;
        let expired = std::mem::take(&mut state.slots[slot]);
        state.current_slot = (slot + 1) % self.slot_count;
        state.ticks += 1;

        let current = state.current_slot;
        let cascade = level
            .next
            .get()
            .filter(|next| next.mark == current)
            .map(|next| Cascade { level: next.index });

        Advance { expired, cascade }
    }

    /// Advance the level named by `cascade` and re-place its expired tasks
    /// into the level below
    ///
    /// Returns the cascade of the level above, if this advance triggered one.
    ///
    /// 执行一次级联，返回更高一层的级联（如有）
    pub(crate) fn cascade(&self, cascade: Cascade) -> Option<Cascade> {
        let level = self.level(cascade.level);
        let Advance { expired, cascade: next } = self.advance_level(&level);

        if !expired.is_empty() {
            let now = self.elapsed_ticks();
            trace!(level = cascade.level, tasks = expired.len(), now, "cascading tasks");
            for task in expired {
                if task.deadline < now {
                    debug!(
                        task_id = task.id.as_u64(),
                        deadline = task.deadline,
                        now,
                        "cascaded task surfaced late, firing on the next tick"
                    );
                }
                self.place(cascade.level - 1, task);
            }
        }

        next
    }

    /// Run a cascade and every cascade it triggers
    pub(crate) fn run_cascades(&self, cascade: Cascade) {
        let mut pending = Some(cascade);
        while let Some(cascade) = pending {
            pending = self.cascade(cascade);
        }
    }

    /// Level, slot and residual delay of a pending task
    #[cfg(test)]
    fn locate(&self, task_id: TaskId) -> Option<(usize, usize, Duration)> {
        let levels = self.levels.read();
        for level in levels.iter() {
            let state = level.state.lock();
            for (slot, bucket) in state.slots.iter().enumerate() {
                if let Some(task) = bucket.iter().find(|task| task.id == task_id) {
                    return Some((level.index, slot, task.delay));
                }
            }
        }
        None
    }
}

fn nanos_to_duration(nanos: u128) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    let secs = nanos / NANOS_PER_SEC;
    match u64::try_from(secs) {
        Ok(secs) => Duration::new(secs, (nanos % NANOS_PER_SEC) as u32),
        Err(_) => Duration::MAX,
    }
}

fn scale_duration(duration: Duration, factor: u64) -> Duration {
    nanos_to_duration(duration.as_nanos().saturating_mul(factor as u128))
}
