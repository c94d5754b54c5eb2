//! Timing wheel configuration
//!
//! Layered configuration structs with builders for the wheel layout and the
//! control loop.
//!
//! 定时器配置模块
//!
//! 提供分层的配置结构和 Builder 模式，用于配置时间轮布局和控制循环。

use crate::error::TimerError;
use std::time::Duration;

/// Wheel layout configuration
///
/// 时间轮布局配置
///
/// # Example (示例)
/// ```no_run
/// use controllable_timing_wheel::WheelConfig;
/// use std::time::Duration;
///
/// let config = WheelConfig::builder()
///     .min_interval(Duration::from_millis(10))
///     .slot_count(10)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct WheelConfig {
    /// Duration of one level-0 slot (the wheel resolution)
    ///
    /// 最底层一个槽位代表的时间（时间轮精度）
    pub min_interval: Duration,
    /// Slot count per level (same for every level)
    ///
    /// 每层槽位数量（所有层相同）
    pub slot_count: usize,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(10),
            slot_count: 64,
        }
    }
}

impl WheelConfig {
    /// 创建配置构建器
    pub fn builder() -> WheelConfigBuilder {
        WheelConfigBuilder::default()
    }
}

/// 时间轮配置构建器
#[derive(Debug, Clone)]
pub struct WheelConfigBuilder {
    min_interval: Duration,
    slot_count: usize,
}

impl Default for WheelConfigBuilder {
    fn default() -> Self {
        let config = WheelConfig::default();
        Self {
            min_interval: config.min_interval,
            slot_count: config.slot_count,
        }
    }
}

impl WheelConfigBuilder {
    /// 设置最小时间间隔
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// 设置每层槽位数量
    pub fn slot_count(mut self, count: usize) -> Self {
        self.slot_count = count;
        self
    }

    /// Build and validate
    ///
    /// # Validation (验证规则)
    /// - `min_interval` must be non-zero
    /// - `slot_count` must be at least 2; a single slot per level never widens
    ///   the span of the next level
    pub fn build(self) -> Result<WheelConfig, TimerError> {
        if self.min_interval.is_zero() {
            return Err(TimerError::InvalidConfiguration {
                field: "min_interval".to_string(),
                reason: "minimum interval must be greater than zero".to_string(),
            });
        }

        if self.slot_count < 2 {
            return Err(TimerError::InvalidSlotCount {
                slot_count: self.slot_count,
                reason: "slot count must be at least 2",
            });
        }

        Ok(WheelConfig {
            min_interval: self.min_interval,
            slot_count: self.slot_count,
        })
    }
}

/// Control loop configuration
///
/// 控制循环配置
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Initial time scale; tick period = `min_interval * time_scale`
    ///
    /// 初始时间缩放；tick 周期 = `min_interval * time_scale`
    pub time_scale: f64,
    /// Capacity of the control command channel
    ///
    /// 控制命令通道容量
    pub command_channel_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            command_channel_capacity: 64,
        }
    }
}

impl DriverConfig {
    /// 创建配置构建器
    pub fn builder() -> DriverConfigBuilder {
        DriverConfigBuilder::default()
    }
}

/// 控制循环配置构建器
#[derive(Debug, Clone)]
pub struct DriverConfigBuilder {
    time_scale: f64,
    command_channel_capacity: usize,
}

impl Default for DriverConfigBuilder {
    fn default() -> Self {
        let config = DriverConfig::default();
        Self {
            time_scale: config.time_scale,
            command_channel_capacity: config.command_channel_capacity,
        }
    }
}

impl DriverConfigBuilder {
    /// 设置初始时间缩放
    pub fn time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale;
        self
    }

    /// 设置控制命令通道容量
    pub fn command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    /// Build and validate
    ///
    /// # Validation (验证规则)
    /// - `time_scale` must be finite and positive
    /// - `command_channel_capacity` must be non-zero
    pub fn build(self) -> Result<DriverConfig, TimerError> {
        validate_scale(self.time_scale)?;

        if self.command_channel_capacity == 0 {
            return Err(TimerError::InvalidConfiguration {
                field: "command_channel_capacity".to_string(),
                reason: "command channel capacity must be greater than zero".to_string(),
            });
        }

        Ok(DriverConfig {
            time_scale: self.time_scale,
            command_channel_capacity: self.command_channel_capacity,
        })
    }
}

/// Top-level configuration
///
/// 顶层配置
///
/// # Example (示例)
/// ```no_run
/// use controllable_timing_wheel::TimerConfig;
/// use std::time::Duration;
///
/// let config = TimerConfig::builder()
///     .min_interval(Duration::from_millis(5))
///     .slot_count(32)
///     .time_scale(0.5)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct TimerConfig {
    /// 时间轮布局配置
    pub wheel: WheelConfig,
    /// 控制循环配置
    pub driver: DriverConfig,
}

impl TimerConfig {
    /// 创建配置构建器
    pub fn builder() -> TimerConfigBuilder {
        TimerConfigBuilder::default()
    }

    /// Re-validate a config assembled by hand
    ///
    /// 校验手动组装的配置
    pub(crate) fn validated(self) -> Result<Self, TimerError> {
        let wheel = WheelConfig::builder()
            .min_interval(self.wheel.min_interval)
            .slot_count(self.wheel.slot_count)
            .build()?;
        let driver = DriverConfig::builder()
            .time_scale(self.driver.time_scale)
            .command_channel_capacity(self.driver.command_channel_capacity)
            .build()?;
        tick_period(wheel.min_interval, driver.time_scale)?;
        Ok(Self { wheel, driver })
    }
}

/// 顶层配置构建器
#[derive(Debug, Default)]
pub struct TimerConfigBuilder {
    wheel_builder: WheelConfigBuilder,
    driver_builder: DriverConfigBuilder,
}

impl TimerConfigBuilder {
    /// 设置最小时间间隔
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.wheel_builder = self.wheel_builder.min_interval(interval);
        self
    }

    /// 设置每层槽位数量
    pub fn slot_count(mut self, count: usize) -> Self {
        self.wheel_builder = self.wheel_builder.slot_count(count);
        self
    }

    /// 设置初始时间缩放
    pub fn time_scale(mut self, scale: f64) -> Self {
        self.driver_builder = self.driver_builder.time_scale(scale);
        self
    }

    /// 设置控制命令通道容量
    pub fn command_channel_capacity(mut self, capacity: usize) -> Self {
        self.driver_builder = self.driver_builder.command_channel_capacity(capacity);
        self
    }

    /// Build and validate all sections
    ///
    /// 构建并校验所有子配置
    pub fn build(self) -> Result<TimerConfig, TimerError> {
        let config = TimerConfig {
            wheel: self.wheel_builder.build()?,
            driver: self.driver_builder.build()?,
        };
        tick_period(config.wheel.min_interval, config.driver.time_scale)?;
        Ok(config)
    }
}

fn validate_scale(scale: f64) -> Result<(), TimerError> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(TimerError::InvalidTimeScale { scale })
    }
}

/// Real tick period for a scale: `min_interval * scale`
///
/// Rejects scales that are not finite and positive, and scales whose period
/// rounds to zero nanoseconds or does not fit in `u64` nanoseconds.
///
/// 计算缩放后的实际 tick 周期
pub(crate) fn tick_period(min_interval: Duration, scale: f64) -> Result<Duration, TimerError> {
    validate_scale(scale)?;
    let nanos = (min_interval.as_nanos() as f64 * scale).round();
    if nanos < 1.0 || nanos > u64::MAX as f64 {
        return Err(TimerError::InvalidTimeScale { scale });
    }
    Ok(Duration::from_nanos(nanos as u64))
}
