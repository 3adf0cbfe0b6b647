use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 断路器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// 正常状态，允许请求通过
    Closed,
    /// 断开状态，直接失败
    Open,
    /// 半开状态，允许少量请求测试依赖是否恢复
    HalfOpen,
}

/// 断路器配置
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后断开
    pub failure_threshold: u32,
    /// 半开状态下成功多少次后闭合
    pub success_threshold: u32,
    /// 断开后多久进入半开
    pub reset_timeout: Duration,
    /// 半开窗口内最多放行的试探请求数
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    opened_at: Option<Instant>,
    // 每次状态转换加一，用于识别过期的半开名额
    generation: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_calls: 0,
            opened_at: None,
            generation: 0,
        }
    }
}

/// 一次被放行的调用
///
/// 半开状态下放行的调用占用一个试探名额。如果调用在记录结果之前被丢弃
/// （例如外层 `select!` 或超时取消了 future），名额在 `Drop` 中归还。
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    half_open_generation: Option<u64>,
}

impl CallPermit<'_> {
    fn settle(mut self) {
        self.half_open_generation = None;
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.half_open_generation {
            self.breaker.release_half_open_slot(generation);
        }
    }
}

/// 断路器：CLOSED（正常）→ OPEN（故障）→ HALF_OPEN（测试恢复）→ CLOSED
///
/// 每个下游依赖构造一个实例，通过 `Arc` 共享给所有调用点。状态和计数器
/// 由互斥锁保护，锁只在状态判断与记录结果时短暂持有，不跨越 `.await`。
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 获取当前断路器状态（只读，不会触发 OPEN → HALF_OPEN 转换）
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// 使用断路器保护的调用
    ///
    /// 断开状态下直接返回 `CircuitBreakerError::Open`，不会调用 `operation`。
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.try_acquire() else {
            return Err(CircuitBreakerError::Open {
                name: self.name.clone(),
            });
        };

        let outcome = operation().await;
        permit.settle();
        match outcome {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 检查是否可以尝试请求，可以则返回放行凭证
    fn try_acquire(&self) -> Option<CallPermit<'_>> {
        let mut inner = self.lock();
        let half_open_generation = match inner.state {
            CircuitState::Closed => None,
            CircuitState::Open => {
                let reset_elapsed = inner
                    .opened_at
                    .map_or(true, |opened_at| opened_at.elapsed() >= self.config.reset_timeout);
                if !reset_elapsed {
                    return None;
                }
                self.transition_to(&mut inner, CircuitState::HalfOpen);
                inner.half_open_calls = 1;
                Some(inner.generation)
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls >= self.config.half_open_max_calls {
                    return None;
                }
                inner.half_open_calls += 1;
                Some(inner.generation)
            }
        };
        Some(CallPermit {
            breaker: self,
            half_open_generation,
        })
    }

    /// 归还被取消的试探请求占用的名额；状态已经转换过则忽略
    fn release_half_open_slot(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.generation == generation {
            inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
            debug!(
                breaker = %self.name,
                in_flight = inner.half_open_calls,
                "Circuit breaker: trial call cancelled in HALF_OPEN state"
            );
        }
    }

    /// 记录成功操作
    fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                info!(
                    breaker = %self.name,
                    successes = inner.success_count,
                    threshold = self.config.success_threshold,
                    "Circuit breaker: success in HALF_OPEN state"
                );
                if inner.success_count >= self.config.success_threshold {
                    self.transition_to(&mut inner, CircuitState::Closed);
                }
            }
            // 在断开前放行的请求晚到的结果
            CircuitState::Open => {}
        }
    }

    /// 记录失败操作
    fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker: failure in CLOSED state"
                );
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition_to(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn transition_to(&self, inner: &mut BreakerInner, new_state: CircuitState) {
        let old_state = inner.state;
        if old_state == new_state {
            return;
        }
        inner.state = new_state;
        inner.generation = inner.generation.wrapping_add(1);

        match new_state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.half_open_calls = 0;
                inner.opened_at = None;
                info!(breaker = %self.name, from = ?old_state, "Circuit breaker → CLOSED");
            }
            CircuitState::Open => {
                inner.success_count = 0;
                inner.half_open_calls = 0;
                inner.opened_at = Some(Instant::now());
                error!(
                    breaker = %self.name,
                    from = ?old_state,
                    reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                    "Circuit breaker → OPEN"
                );
            }
            CircuitState::HalfOpen => {
                inner.success_count = 0;
                inner.half_open_calls = 0;
                warn!(breaker = %self.name, from = ?old_state, "Circuit breaker → HALF_OPEN");
            }
        }
    }
}
