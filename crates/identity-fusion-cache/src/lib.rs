use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use tokio::sync::OwnedMutexGuard;

/// Upper bound on a single entry's lifetime (100 years).
const MAX_TTL_MINUTES: f64 = 100.0 * 365.0 * 24.0 * 60.0;

pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: OffsetDateTime) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}

/// Build the cache key for one tool invocation: `"{tool}:{args}"`, with the
/// arguments serialized as compact JSON with object keys sorted, so equal
/// arguments always produce the same key.
///
/// # Errors
/// Returns an error when `args` cannot be represented as JSON.
pub fn cache_key<T>(tool: &str, args: &T) -> serde_json::Result<String>
where
    T: Serialize + ?Sized,
{
    let canonical = canonicalize(serde_json::to_value(args)?);
    Ok(format!("{tool}:{}", serde_json::to_string(&canonical)?))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries = object.into_iter().collect::<Vec<_>>();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, canonicalize(value)))
                    .collect::<Map<_, _>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: OffsetDateTime,
}

/// Tool-result cache with per-entry expiry.
///
/// Expiry is lazy: a read past `expires_at` evicts the entry and misses.
/// There is no capacity bound and no background sweep.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
}

impl<V> Default for TtlCache<V>
where
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TtlCache<V>
where
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Mutex::new(HashMap::new()), clock }
    }

    /// Return the live value for `key`, evicting it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if now <= entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `value` until `now + ttl_minutes`. Non-positive or non-finite
    /// TTLs store an entry that is already due to expire.
    pub fn set(&self, key: impl Into<String>, value: V, ttl_minutes: f64) {
        let minutes = if ttl_minutes.is_finite() && ttl_minutes > 0.0 {
            ttl_minutes.min(MAX_TTL_MINUTES)
        } else {
            0.0
        };
        let expires_at = self.clock.now() + Duration::seconds_f64(minutes * 60.0);
        self.entries.lock().insert(key.into(), CacheEntry { value, expires_at });
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.lock().remove(key).map(|entry| entry.value)
    }

    /// Number of stored entries, including expired ones not yet read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Per-key async locks so that at most one computation per cache key is in
/// flight. Callers re-check the cache after acquiring the lock.
///
/// A key's slot lives while any caller holds or waits for it; a waiter whose
/// future is dropped before it gets the lock releases its claim on the slot.
#[derive(Debug, Default)]
pub struct InFlight {
    slots: Mutex<HashMap<String, Slot>>,
}

#[derive(Debug)]
struct Slot {
    lock: Arc<tokio::sync::Mutex<()>>,
    users: usize,
}

impl InFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> InFlightGuard<'_> {
        let (lock, claim) = {
            let mut slots = self.slots.lock();
            let slot = slots
                .entry(key.to_string())
                .or_insert_with(|| Slot { lock: Arc::default(), users: 0 });
            slot.users += 1;
            (Arc::clone(&slot.lock), SlotClaim { owner: self, key: key.to_string() })
        };
        let guard = lock.lock_owned().await;
        InFlightGuard { _guard: guard, _claim: claim }
    }

    /// Keys with a computation running or waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.slots.lock().len()
    }
}

struct SlotClaim<'a> {
    owner: &'a InFlight,
    key: String,
}

impl Drop for SlotClaim<'_> {
    fn drop(&mut self) {
        let mut slots = self.owner.slots.lock();
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

pub struct InFlightGuard<'a> {
    _guard: OwnedMutexGuard<()>,
    _claim: SlotClaim<'a>,
}
