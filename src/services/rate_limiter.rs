//! Rate limiter for login attempts
//!
//! In-memory protection against credential stuffing:
//! - failed logins per email (5 per 15 minutes)
//! - login requests per IP address (10 per minute)
//!
//! State is per process; password reset limits, which must survive
//! restarts, live in the database instead.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

const MAX_FAILED_PER_EMAIL: usize = 5;
const EMAIL_WINDOW_MINUTES: i64 = 15;
const MAX_REQUESTS_PER_IP: usize = 10;
const IP_WINDOW_MINUTES: i64 = 1;

type Attempts<K> = Arc<RwLock<HashMap<K, Vec<DateTime<Utc>>>>>;

/// Login rate limiter
pub struct LoginRateLimiter {
    email_attempts: Attempts<String>,
    ip_attempts: Attempts<IpAddr>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self {
            email_attempts: Arc::new(RwLock::new(HashMap::new())),
            ip_attempts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seconds until the email may try again, or `None` if not limited
    pub async fn email_retry_after(&self, email: &str) -> Option<i64> {
        let mut attempts = self.email_attempts.write().await;
        let window = Duration::minutes(EMAIL_WINDOW_MINUTES);
        let times = attempts.entry(email.to_lowercase()).or_default();
        retry_after(times, MAX_FAILED_PER_EMAIL, window, Utc::now())
    }

    pub async fn record_failed_attempt(&self, email: &str) {
        let mut attempts = self.email_attempts.write().await;
        attempts
            .entry(email.to_lowercase())
            .or_default()
            .push(Utc::now());
    }

    /// Forget failures after a successful login
    pub async fn clear_email_attempts(&self, email: &str) {
        let mut attempts = self.email_attempts.write().await;
        attempts.remove(&email.to_lowercase());
    }

    /// Seconds until the IP may send another request, or `None`
    pub async fn ip_retry_after(&self, ip: IpAddr) -> Option<i64> {
        let mut attempts = self.ip_attempts.write().await;
        let window = Duration::minutes(IP_WINDOW_MINUTES);
        let times = attempts.entry(ip).or_default();
        retry_after(times, MAX_REQUESTS_PER_IP, window, Utc::now())
    }

    pub async fn record_ip_request(&self, ip: IpAddr) {
        let mut attempts = self.ip_attempts.write().await;
        attempts.entry(ip).or_default().push(Utc::now());
    }

    /// Drop entries that fell out of their window
    pub async fn cleanup(&self) {
        let now = Utc::now();
        let email_cutoff = now - Duration::minutes(EMAIL_WINDOW_MINUTES);
        let ip_cutoff = now - Duration::minutes(IP_WINDOW_MINUTES);

        {
            let mut attempts = self.email_attempts.write().await;
            attempts.retain(|_, times| {
                times.retain(|time| *time > email_cutoff);
                !times.is_empty()
            });
        }

        {
            let mut attempts = self.ip_attempts.write().await;
            attempts.retain(|_, times| {
                times.retain(|time| *time > ip_cutoff);
                !times.is_empty()
            });
        }
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Sliding-window check shared by the in-memory limiter and the reset flow.
///
/// `times` must be sorted ascending; entries outside the window are pruned.
/// When `limit` or more entries remain, returns the whole seconds until the
/// oldest leaves the window (at least 1).
pub fn retry_after(
    times: &mut Vec<DateTime<Utc>>,
    limit: usize,
    window: Duration,
    now: DateTime<Utc>,
) -> Option<i64> {
    let cutoff = now - window;
    times.retain(|time| *time > cutoff);
    if times.len() < limit {
        return None;
    }
    let oldest = times[0];
    let wait = (oldest + window - now).num_seconds();
    Some(wait.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_email_rate_limit() {
        let limiter = LoginRateLimiter::new();

        for _ in 0..4 {
            assert!(limiter.email_retry_after("a@example.com").await.is_none());
            limiter.record_failed_attempt("a@example.com").await;
        }
        limiter.record_failed_attempt("a@example.com").await;

        let wait = limiter
            .email_retry_after("a@example.com")
            .await
            .expect("limited");
        assert!(wait > 0 && wait <= 15 * 60);

        limiter.clear_email_attempts("a@example.com").await;
        assert!(limiter.email_retry_after("a@example.com").await.is_none());
    }

    #[tokio::test]
    async fn test_email_is_case_insensitive() {
        let limiter = LoginRateLimiter::new();
        for email in ["A@example.com", "a@EXAMPLE.com", "a@example.com", "A@Example.com", "a@example.COM"] {
            limiter.record_failed_attempt(email).await;
        }
        assert!(limiter.email_retry_after("a@example.com").await.is_some());
    }

    #[tokio::test]
    async fn test_ip_rate_limit() {
        let limiter = LoginRateLimiter::new();
        let ip = IpAddr::from_str("10.0.0.1").unwrap();

        for _ in 0..10 {
            assert!(limiter.ip_retry_after(ip).await.is_none());
            limiter.record_ip_request(ip).await;
        }
        assert!(limiter.ip_retry_after(ip).await.is_some());

        let other = IpAddr::from_str("10.0.0.2").unwrap();
        assert!(limiter.ip_retry_after(other).await.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_entries() {
        let limiter = LoginRateLimiter::new();
        limiter.record_failed_attempt("x@example.com").await;
        limiter.cleanup().await;
        assert_eq!(limiter.email_attempts.read().await.len(), 1);
    }

    #[test]
    fn test_retry_after_counts_from_oldest() {
        let now = Utc::now();
        let window = Duration::minutes(60);
        let mut times = vec![
            now - Duration::minutes(90),
            now - Duration::minutes(50),
            now - Duration::minutes(10),
        ];

        assert_eq!(retry_after(&mut times.clone(), 3, window, now), None);

        let wait = retry_after(&mut times, 2, window, now).expect("limited");
        assert_eq!(times.len(), 2);
        assert_eq!(wait, 10 * 60);
    }
}
