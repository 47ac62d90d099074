//! Time-related functionality useful for schedulers.
use std::sync::atomic;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::TimerId;

/// Local time.
///
/// This clock is monotonic.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Ord, PartialOrd, Default)]
pub struct LocalTime {
    /// Milliseconds since Epoch.
    millis: u128,
}

impl std::fmt::Display for LocalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:03}", self.as_secs(), self.millis % 1000)
    }
}

impl LocalTime {
    /// Construct a local time from the current system time.
    pub fn now() -> Self {
        static LAST: atomic::AtomicU64 = atomic::AtomicU64::new(0);

        let now = Self::from(SystemTime::now()).millis as u64;
        let last = LAST.fetch_max(now, atomic::Ordering::SeqCst);

        // If the current time is in the past, return the last recorded time instead.
        Self::from_millis(now.max(last) as u128)
    }

    /// Construct a local time from whole seconds since Epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            millis: secs as u128 * 1000,
        }
    }

    /// Construct a local time from milliseconds since Epoch.
    pub const fn from_millis(millis: u128) -> Self {
        Self { millis }
    }

    /// Return the local time in whole seconds since Epoch.
    pub const fn as_secs(&self) -> u64 {
        (self.millis / 1000) as u64
    }

    /// Return the local time in milliseconds since Epoch.
    pub const fn as_millis(&self) -> u128 {
        self.millis
    }

    /// Get the duration since the given time. Saturates to zero if `earlier`
    /// is later than `self`.
    pub fn duration_since(&self, earlier: LocalTime) -> LocalDuration {
        LocalDuration::from_millis(self.millis.saturating_sub(earlier.millis))
    }

    /// Get the difference between two times.
    pub fn diff(&self, other: LocalTime) -> LocalDuration {
        if self > &other {
            self.duration_since(other)
        } else {
            other.duration_since(*self)
        }
    }

    /// Elapse time.
    ///
    /// Adds the given duration to the time.
    pub fn elapse(&mut self, duration: LocalDuration) {
        self.millis += duration.as_millis()
    }
}

/// Convert a `SystemTime` into a local time.
impl From<SystemTime> for LocalTime {
    fn from(system: SystemTime) -> Self {
        let millis = system
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        Self { millis }
    }
}

/// Substract two local times. Yields a duration.
impl std::ops::Sub<LocalTime> for LocalTime {
    type Output = LocalDuration;

    fn sub(self, other: LocalTime) -> LocalDuration {
        LocalDuration(self.millis.saturating_sub(other.millis))
    }
}

/// Substract a duration from a local time. Yields a local time.
impl std::ops::Sub<LocalDuration> for LocalTime {
    type Output = LocalTime;

    fn sub(self, other: LocalDuration) -> LocalTime {
        LocalTime {
            millis: self.millis.saturating_sub(other.0),
        }
    }
}

/// Add a duration to a local time. Yields a local time.
impl std::ops::Add<LocalDuration> for LocalTime {
    type Output = LocalTime;

    fn add(self, other: LocalDuration) -> LocalTime {
        LocalTime {
            millis: self.millis + other.0,
        }
    }
}

/// Time duration as measured locally.
#[derive(Debug, Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Default, Hash)]
pub struct LocalDuration(u128);

impl LocalDuration {
    /// Zero duration.
    pub const ZERO: LocalDuration = LocalDuration(0);

    /// Maximum duration.
    pub const MAX: LocalDuration = LocalDuration(u128::MAX);

    /// Create a new duration from whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs as u128 * 1000)
    }

    /// Create a new duration from whole minutes.
    pub const fn from_mins(mins: u64) -> Self {
        Self::from_secs(mins * 60)
    }

    /// Construct a new duration from milliseconds.
    pub const fn from_millis(millis: u128) -> Self {
        Self(millis)
    }

    /// Return the number of minutes in this duration.
    pub const fn as_mins(&self) -> u64 {
        self.as_secs() / 60
    }

    /// Return the number of seconds in this duration.
    pub const fn as_secs(&self) -> u64 {
        (self.0 / 1000) as u64
    }

    /// Return the number of milliseconds in this duration.
    pub const fn as_millis(&self) -> u128 {
        self.0
    }

    /// Check whether this duration is zero.
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for LocalDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.as_millis() < 1000 {
            write!(f, "{} millisecond(s)", self.as_millis())
        } else if self.as_secs() < 60 {
            let fraction = self.as_millis() % 1000;
            if fraction > 0 {
                write!(f, "{}.{:03} second(s)", self.as_secs(), fraction)
            } else {
                write!(f, "{} second(s)", self.as_secs())
            }
        } else {
            let fraction = self.as_secs() % 60;
            if fraction > 0 {
                write!(
                    f,
                    "{:.2} minutes(s)",
                    self.as_mins() as f64 + (fraction as f64 / 60.)
                )
            } else {
                write!(f, "{} minutes(s)", self.as_mins())
            }
        }
    }
}

impl std::ops::Add<LocalDuration> for LocalDuration {
    type Output = LocalDuration;

    fn add(self, other: LocalDuration) -> LocalDuration {
        LocalDuration(self.0 + other.0)
    }
}

impl std::ops::Div<u32> for LocalDuration {
    type Output = LocalDuration;

    fn div(self, other: u32) -> LocalDuration {
        LocalDuration(self.0 / other as u128)
    }
}

impl std::ops::Mul<u64> for LocalDuration {
    type Output = LocalDuration;

    fn mul(self, other: u64) -> LocalDuration {
        LocalDuration(self.0 * other as u128)
    }
}

impl From<LocalDuration> for Duration {
    fn from(other: LocalDuration) -> Self {
        Duration::from_millis(other.0.min(u64::MAX as u128) as u64)
    }
}

impl From<Duration> for LocalDuration {
    fn from(other: Duration) -> Self {
        LocalDuration(other.as_millis())
    }
}

/// A timer tracked by the [`TimeoutManager`].
#[derive(Debug, Clone)]
struct Timer<K> {
    id: TimerId,
    key: K,
    time: LocalTime,
    period: Option<LocalDuration>,
}

/// Manages timers and triggers timeouts.
///
/// Timers are either one-shot, or repeating with a fixed period. Each timer
/// carries a key, which identifies the owner of the timer.
#[derive(Debug)]
pub struct TimeoutManager<K> {
    /// Timers, sorted so that the earliest one is last.
    timeouts: Vec<Timer<K>>,
    /// Next timer identifier.
    next_id: u64,
}

impl<K> Default for TimeoutManager<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TimeoutManager<K> {
    /// Create a new timeout manager.
    pub fn new() -> Self {
        Self {
            timeouts: vec![],
            next_id: 0,
        }
    }

    /// Return the number of timeouts being tracked.
    pub fn len(&self) -> usize {
        self.timeouts.len()
    }

    /// Check whether there are timeouts being tracked.
    pub fn is_empty(&self) -> bool {
        self.timeouts.is_empty()
    }

    /// Register a new one-shot timeout with an associated key and wake-up time.
    pub fn register(&mut self, key: K, time: LocalTime) -> TimerId {
        self.insert(key, time, None)
    }

    /// Register a repeating timeout which first rings at `time`, and then every `period`.
    pub fn register_repeating(&mut self, key: K, time: LocalTime, period: LocalDuration) -> TimerId {
        self.insert(key, time, Some(period))
    }

    /// Remove a timeout. Returns `false` if the timeout wasn't registered.
    ///
    /// ```
    /// use mockwire_net::time::{LocalTime, LocalDuration, TimeoutManager};
    ///
    /// let mut tm = TimeoutManager::new();
    /// let now = LocalTime::now();
    ///
    /// let a = tm.register(0xA, now + LocalDuration::from_millis(8));
    /// let b = tm.register(0xB, now + LocalDuration::from_millis(16));
    ///
    /// assert!(tm.remove(a));
    /// assert!(!tm.remove(a));
    /// assert!(tm.contains(b));
    /// assert_eq!(tm.len(), 1);
    /// ```
    pub fn remove(&mut self, id: TimerId) -> bool {
        let len = self.timeouts.len();
        self.timeouts.retain(|t| t.id != id);

        self.timeouts.len() != len
    }

    /// Check whether a timeout is registered.
    pub fn contains(&self, id: TimerId) -> bool {
        self.timeouts.iter().any(|t| t.id == id)
    }

    /// Return the number of timeouts registered for the given key.
    pub fn count(&self, key: &K) -> usize
    where
        K: PartialEq,
    {
        self.timeouts.iter().filter(|t| &t.key == key).count()
    }

    /// Get the minimum time duration we should wait for at least one timeout
    /// to be reached.  Returns `None` if there are no timeouts.
    ///
    /// ```
    /// use mockwire_net::time::{LocalTime, LocalDuration, TimeoutManager};
    ///
    /// let mut tm = TimeoutManager::new();
    /// let now = LocalTime::from_secs(1);
    ///
    /// tm.register(0xA, now + LocalDuration::from_millis(16));
    /// tm.register(0xB, now + LocalDuration::from_millis(8));
    /// tm.register(0xC, now + LocalDuration::from_millis(64));
    ///
    /// // We need to wait 8 millis to trigger the next timeout (1).
    /// assert_eq!(tm.next(now), Some(LocalDuration::from_millis(8)));
    ///
    /// // Now we don't need to wait as long!
    /// assert_eq!(tm.next(now + LocalDuration::from_millis(1)), Some(LocalDuration::from_millis(7)));
    /// ```
    pub fn next(&self, now: LocalTime) -> Option<LocalDuration> {
        self.timeouts.last().map(|t| {
            if t.time >= now {
                t.time - now
            } else {
                LocalDuration::ZERO
            }
        })
    }

    /// Given the current time, populate the input vector with the timers that
    /// have timed out, along with their keys. Repeating timers are re-armed
    /// relative to `now`.
    ///
    /// ```
    /// use mockwire_net::time::{LocalTime, LocalDuration, TimeoutManager};
    ///
    /// let mut tm = TimeoutManager::new();
    /// let now = LocalTime::from_secs(1);
    ///
    /// tm.register(0xA, now + LocalDuration::from_millis(8));
    /// tm.register(0xB, now + LocalDuration::from_millis(16));
    /// tm.register_repeating(0xC, now + LocalDuration::from_millis(64), LocalDuration::from_millis(10));
    ///
    /// let mut timeouts = Vec::new();
    ///
    /// tm.wake(now, &mut timeouts);
    /// assert!(timeouts.is_empty());
    /// assert_eq!(tm.len(), 3);
    ///
    /// tm.wake(now + LocalDuration::from_millis(9), &mut timeouts);
    /// assert_eq!(timeouts.iter().map(|(_, k)| *k).collect::<Vec<_>>(), vec![0xA]);
    /// assert_eq!(tm.len(), 2, "one timeout has expired");
    ///
    /// tm.wake(now + LocalDuration::from_millis(66), &mut timeouts);
    /// assert_eq!(timeouts.iter().map(|(_, k)| *k).collect::<Vec<_>>(), vec![0xB, 0xC]);
    /// assert_eq!(tm.len(), 1, "the repeating timeout is re-armed");
    /// ```
    pub fn wake(&mut self, now: LocalTime, woken: &mut Vec<(TimerId, K)>)
    where
        K: Clone,
    {
        let mut rearm = Vec::new();
        woken.clear();

        while let Some(timer) = self.timeouts.pop() {
            if now >= timer.time {
                woken.push((timer.id, timer.key.clone()));

                if let Some(period) = timer.period {
                    rearm.push(Timer {
                        time: now + period,
                        ..timer
                    });
                }
            } else {
                self.timeouts.push(timer);
                break;
            }
        }
        for timer in rearm {
            self.timeouts.push(timer);
        }
        self.sort();
    }

    fn insert(&mut self, key: K, time: LocalTime, period: Option<LocalDuration>) -> TimerId {
        let id = TimerId(self.next_id);

        self.next_id += 1;
        self.timeouts.push(Timer {
            id,
            key,
            time,
            period,
        });
        self.sort();

        id
    }

    fn sort(&mut self) {
        // Earliest last; ties are broken by registration order.
        self.timeouts
            .sort_unstable_by(|a, b| (b.time, b.id).cmp(&(a.time, a.id)));
    }
}
