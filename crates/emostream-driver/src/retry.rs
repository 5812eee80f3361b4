//! 统一的有界重连策略
//!
//! 连接失败、对端关闭、传输错误都走同一个计数器：
//! 连续失败 `max_reconnects` 次（中间没有成功打开）即放弃。
//! 第 n 次失败后的等待时间为 `base * multiplier^(n-1)`，上限 `max_delay`。

use rand::Rng;
use std::time::Duration;

/// 重连策略配置
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryPolicy {
    /// 连续失败上限（默认 3）
    pub max_reconnects: u32,
    /// 首次重连延迟（毫秒，默认 500）
    pub base_delay_ms: u64,
    /// 延迟上限（毫秒，默认 10000）
    pub max_delay_ms: u64,
    /// 指数退避倍数（默认 2.0）
    pub multiplier: f64,
    /// 随机抖动比例（0.0-1.0，默认 0，即不抖动）
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_reconnects: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_ratio: 0.0,
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次（从 1 开始）重连前的等待时间（不含抖动）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.max(1.0).powi(exp);
        let raw = self.base_delay_ms as f64 * factor;
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        if ratio == 0.0 || delay.is_zero() {
            return delay;
        }
        let offset = rand::thread_rng().gen_range(-ratio..=ratio);
        delay.mul_f64(1.0 + offset)
    }
}

/// 一次失败之后的决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 等待 `delay` 后发起第 `attempt` 次重连
    Retry { attempt: u32, delay: Duration },
    /// 已达上限
    GiveUp { failures: u32 },
}

/// 重连计数器
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    policy: RetryPolicy,
    failures: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// 记录一次失败（只增不减，直到下一次成功打开）
    pub fn on_failure(&mut self) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.policy.max_reconnects {
            return RetryDecision::GiveUp {
                failures: self.failures,
            };
        }
        let delay = self.policy.jittered(self.policy.delay_for(self.failures));
        RetryDecision::Retry {
            attempt: self.failures,
            delay,
        }
    }

    /// 连接成功打开，计数器归零
    pub fn on_open(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
