use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;

/// Highest token handed out by this process.
static LAST_ISSUED: AtomicI64 = AtomicI64::new(0);

fn now_nanos() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000))
}

/// Owner token of an exclusive session lock.
///
/// The token is the wall-clock time of the lock attempt in nanoseconds since
/// the Unix epoch, rendered in decimal. Tokens issued by one process are
/// strictly increasing, so two attempts never share a token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockId(String);

impl LockId {
    /// Issue a fresh token for a lock attempt.
    pub fn generate() -> Self {
        let now = now_nanos();
        let issued = match LAST_ISSUED.fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
            Some(now.max(prev.saturating_add(1)))
        }) {
            Ok(prev) | Err(prev) => now.max(prev.saturating_add(1)),
        };
        Self(issued.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Time elapsed since this token was issued.
    pub fn age(&self) -> Duration {
        lock_age(&self.0)
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for LockId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for LockId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Age of the lock identified by `token`.
///
/// Tokens that are not a timestamp report [`Duration::MAX`], which pushes the
/// caller's lock-timeout logic to step in. Tokens from a clock running ahead
/// of ours report zero.
pub fn lock_age(token: &str) -> Duration {
    let Ok(issued) = token.trim().parse::<i64>() else {
        return Duration::MAX;
    };
    let elapsed = now_nanos().saturating_sub(issued);
    u64::try_from(elapsed).map_or(Duration::ZERO, Duration::from_nanos)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn tokens_are_unique_and_increasing() {
        let tokens: Vec<i64> = (0..1_000)
            .map(|_| LockId::generate().as_str().parse().unwrap())
            .collect();
        assert!(tokens.windows(2).all(|w| w[0] < w[1]));
        let unique: HashSet<_> = tokens.iter().collect();
        assert_eq!(unique.len(), tokens.len());
    }

    #[test]
    fn tokens_are_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..250)
                        .map(|_| LockId::generate().into_string())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all = HashSet::new();
        for handle in handles {
            for token in handle.join().unwrap() {
                assert!(all.insert(token), "duplicate token issued");
            }
        }
    }

    #[test]
    fn fresh_token_is_young() {
        let id = LockId::generate();
        assert!(id.age() < Duration::from_secs(5));
    }

    #[test]
    fn old_token_reports_its_age() {
        let issued = now_nanos() - 3_000_000_000;
        let age = lock_age(&issued.to_string());
        assert!(age >= Duration::from_secs(3));
        assert!(age < Duration::from_secs(10));
    }

    #[test]
    fn unparsable_token_is_very_old() {
        assert_eq!(lock_age("not-a-timestamp"), Duration::MAX);
        assert_eq!(lock_age(""), Duration::MAX);
    }

    #[test]
    fn future_token_is_zero_age() {
        let ahead = now_nanos() + 60_000_000_000;
        assert_eq!(lock_age(&ahead.to_string()), Duration::ZERO);
    }
}
