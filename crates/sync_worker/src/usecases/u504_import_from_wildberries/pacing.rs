use serde::Deserialize;
use std::time::{Duration, Instant};

/// Политика паузы между страницами каталога
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PacingPolicy {
    /// Постоянная пауза после каждой страницы
    Fixed { delay_ms: u64 },

    /// Не больше `per_second` запросов страниц в секунду (0 = без ограничения)
    TokenBucket { per_second: u32 },

    /// Пауза растёт при 429 и возвращается к базовой после успешных страниц.
    /// Единственная политика, которая повторяет страницу после 429.
    Adaptive {
        base_delay_ms: u64,
        max_delay_ms: u64,
        max_retries: u32,
    },
}

impl Default for PacingPolicy {
    fn default() -> Self {
        PacingPolicy::Fixed { delay_ms: 500 }
    }
}

/// Состояние пейсинга на один прогон импорта
#[derive(Debug)]
pub struct Pacer {
    policy: PacingPolicy,
    bucket: Option<TokenBucket>,
    current_delay: Duration,
    retries: u32,
}

impl Pacer {
    pub fn new(policy: &PacingPolicy) -> Self {
        let (bucket, current_delay) = match policy {
            PacingPolicy::Fixed { delay_ms } => (None, Duration::from_millis(*delay_ms)),
            PacingPolicy::TokenBucket { per_second } => {
                (Some(TokenBucket::new(*per_second, Instant::now())), Duration::ZERO)
            }
            PacingPolicy::Adaptive { base_delay_ms, .. } => {
                (None, Duration::from_millis(*base_delay_ms))
            }
        };
        Self {
            policy: policy.clone(),
            bucket,
            current_delay,
            retries: 0,
        }
    }

    /// Пауза перед запросом следующей страницы
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        match &self.policy {
            PacingPolicy::Fixed { .. } | PacingPolicy::Adaptive { .. } => self.current_delay,
            PacingPolicy::TokenBucket { .. } => self
                .bucket
                .as_mut()
                .map(|bucket| bucket.acquire(now))
                .unwrap_or_default(),
        }
    }

    pub async fn pause(&mut self) {
        let delay = self.next_delay(Instant::now());
        if !delay.is_zero() {
            tracing::debug!("Pausing {:?} before next catalog page", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Реакция на 429. `Some(delay)` — подождать и повторить ту же страницу,
    /// `None` — повторов больше нет, страница считается неудачной.
    pub fn on_rate_limited(&mut self, retry_after: Option<Duration>) -> Option<Duration> {
        let PacingPolicy::Adaptive {
            base_delay_ms,
            max_delay_ms,
            max_retries,
        } = self.policy
        else {
            return None;
        };

        if self.retries >= max_retries {
            return None;
        }
        self.retries += 1;

        let base = Duration::from_millis(base_delay_ms);
        let max = Duration::from_millis(max_delay_ms);
        self.current_delay = (self.current_delay * 2).max(base).min(max);

        Some(retry_after.unwrap_or(self.current_delay))
    }

    /// Страница получена: сбрасываем счётчик повторов, пауза уменьшается вдвое до базовой
    pub fn on_success(&mut self) {
        self.retries = 0;
        if let PacingPolicy::Adaptive { base_delay_ms, .. } = self.policy {
            let base = Duration::from_millis(base_delay_ms);
            self.current_delay = (self.current_delay / 2).max(base);
        }
    }
}

/// Классический token bucket: токены пополняются со скоростью `rate` в секунду до `rate`.
#[derive(Debug)]
struct TokenBucket {
    rate: u32,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate: u32, now: Instant) -> Self {
        Self {
            rate,
            tokens: f64::from(rate),
            last_refill: now,
        }
    }

    /// Забирает токен и возвращает, сколько нужно подождать до его появления
    fn acquire(&mut self, now: Instant) -> Duration {
        if self.rate == 0 {
            return Duration::ZERO;
        }
        let rate = f64::from(self.rate);
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(rate);
        self.last_refill = self.last_refill.max(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Duration::ZERO;
        }

        // токен занят в долг: следующий refill начнётся после ожидания
        let ready_at = self.last_refill + Duration::from_secs_f64((1.0 - self.tokens) / rate);
        self.tokens = 0.0;
        self.last_refill = ready_at;
        ready_at.saturating_duration_since(now)
    }
}
