//! Engine-time bookkeeping (RFC 3414 sections 2.2 and 3.2 step 7).
//!
//! Every engine this agent talks to has a record of the last `(boots, time)`
//! pair it reported and the local clock reading when that pair arrived. The
//! current remote time is estimated from those. The local engine's own
//! boots/time come from [`LocalEngine`].
//!
//! Records live in a fixed table of [`BUCKETS`] buckets keyed by a hash of
//! the engine ID; a bucket holds every record whose ID hashes to it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use digest::Digest;

use super::{MAX_ENGINE_TIME, TIME_WINDOW};
use crate::error::UsmError;
use crate::format::hex;

/// Number of hash buckets in the engine-time table.
pub const BUCKETS: usize = 23;

/// Source of monotonic seconds.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Seconds elapsed since an arbitrary fixed origin.
    fn now_secs(&self) -> u64;
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        self.origin.elapsed().as_secs()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }

    pub fn set(&self, secs: u64) {
        self.0.store(secs, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Whether unauthenticated messages may update the cached time of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeSyncPolicy {
    /// Only authenticated observations update a record. An unauthenticated
    /// one may create a zeroed record for an unknown engine and nothing more.
    #[default]
    Strict,
    /// Unauthenticated observations are cached too, until an authenticated
    /// one arrives; they never overwrite authenticated values.
    Opportunistic,
}

/// The local (authoritative) engine: its ID, boot counter and uptime.
#[derive(Debug, Clone)]
pub struct LocalEngine {
    engine_id: Bytes,
    boots: u32,
    started_at: u64,
    clock: Arc<dyn Clock>,
}

impl LocalEngine {
    /// Start the local engine now with the given boot counter.
    pub fn new(engine_id: impl Into<Bytes>, boots: u32, clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now_secs();
        Self {
            engine_id: engine_id.into(),
            boots: boots.min(MAX_ENGINE_TIME),
            started_at,
            clock,
        }
    }

    pub fn engine_id(&self) -> &Bytes {
        &self.engine_id
    }

    pub fn is_local(&self, engine_id: &[u8]) -> bool {
        self.engine_id.as_ref() == engine_id
    }

    /// Current `(snmpEngineBoots, snmpEngineTime)`.
    ///
    /// Time rolls over to zero past the ceiling, bumping boots, which itself
    /// latches at the ceiling.
    pub fn boots_and_time(&self) -> (u32, u32) {
        let elapsed = self.clock.now_secs().saturating_sub(self.started_at);
        let period = u64::from(MAX_ENGINE_TIME) + 1;
        let wraps = elapsed / period;
        let boots = (u64::from(self.boots) + wraps).min(u64::from(MAX_ENGINE_TIME)) as u32;
        (boots, (elapsed % period) as u32)
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[derive(Debug, Clone)]
struct TimeRecord {
    engine_id: Bytes,
    boots: u32,
    time: u32,
    received_at: u64,
    authenticated: bool,
}

/// Cached `(boots, time)` estimate for a remote engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTime {
    pub boots: u32,
    pub time: u32,
    /// The time value last stored, before the elapsed-time adjustment.
    pub last_time: u32,
}

/// Per-engine time records.
#[derive(Debug, Clone)]
pub struct EngineTimeCache {
    buckets: Vec<Vec<TimeRecord>>,
    policy: TimeSyncPolicy,
    clock: Arc<dyn Clock>,
}

fn bucket_of(engine_id: &[u8]) -> usize {
    let digest = md5::Md5::digest(engine_id);
    let sum = digest
        .chunks_exact(4)
        .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
        .fold(0u32, u32::wrapping_add);
    sum as usize % BUCKETS
}

impl EngineTimeCache {
    pub fn new(policy: TimeSyncPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: vec![Vec::new(); BUCKETS],
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> TimeSyncPolicy {
        self.policy
    }

    fn find(&self, engine_id: &[u8]) -> Option<&TimeRecord> {
        self.buckets[bucket_of(engine_id)]
            .iter()
            .find(|r| r.engine_id.as_ref() == engine_id)
    }

    /// Whether a record exists for `engine_id`. An empty ID is never known.
    pub fn is_known(&self, engine_id: &[u8]) -> bool {
        !engine_id.is_empty() && self.find(engine_id).is_some()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated current `(boots, time)` of `engine_id`.
    ///
    /// With `authenticated` set, a record that has only seen unauthenticated
    /// values reads as `(0, 0)` plus elapsed time.
    pub fn get(&self, engine_id: &[u8], authenticated: bool) -> Option<(u32, u32)> {
        self.get_ex(engine_id, authenticated)
            .map(|t| (t.boots, t.time))
    }

    /// Like [`get`](Self::get), also returning the stored time value.
    pub fn get_ex(&self, engine_id: &[u8], authenticated: bool) -> Option<EngineTime> {
        let record = self.find(engine_id)?;
        let mut boots = 0;
        let mut time = 0;
        let mut elapsed = 0u64;
        if !authenticated || record.authenticated {
            boots = record.boots;
            time = record.time;
            elapsed = self.clock.now_secs().saturating_sub(record.received_at);
        }
        let last_time = time;

        let headroom = u64::from(MAX_ENGINE_TIME - time.min(MAX_ENGINE_TIME));
        if elapsed > headroom {
            time = (elapsed - headroom).min(u64::from(MAX_ENGINE_TIME)) as u32;
            if boots < MAX_ENGINE_TIME {
                boots += 1;
            }
        } else {
            time += elapsed as u32;
        }

        Some(EngineTime {
            boots,
            time,
            last_time,
        })
    }

    /// Record an observation of `engine_id`'s boots/time.
    ///
    /// An absent record is created (zeroed when the observation is not
    /// accepted). Returns `false` when an empty engine ID was given.
    pub fn set(&mut self, engine_id: &[u8], boots: u32, time: u32, authenticated: bool) -> bool {
        if engine_id.is_empty() {
            return false;
        }
        let now = self.clock.now_secs();
        let bucket = &mut self.buckets[bucket_of(engine_id)];
        let index = match bucket.iter().position(|r| r.engine_id.as_ref() == engine_id) {
            Some(i) => i,
            None => {
                tracing::trace!(target: "snmp_agent_core::engine", { snmp.engine_id = %hex::Bytes(engine_id) }, "new engine time record");
                bucket.push(TimeRecord {
                    engine_id: Bytes::copy_from_slice(engine_id),
                    boots: 0,
                    time: 0,
                    received_at: now,
                    authenticated: false,
                });
                bucket.len() - 1
            }
        };
        let record = &mut bucket[index];

        let accept = match self.policy {
            TimeSyncPolicy::Strict => authenticated,
            TimeSyncPolicy::Opportunistic => authenticated || !record.authenticated,
        };
        if accept {
            record.boots = boots;
            record.time = time;
            record.received_at = now;
            record.authenticated = authenticated;
            tracing::trace!(
                target: "snmp_agent_core::engine",
                { snmp.engine_id = %hex::Bytes(engine_id), snmp.boots = boots, snmp.time = time, authenticated },
                "engine time updated"
            );
        }
        true
    }

    /// Drop the record for `engine_id`.
    pub fn remove(&mut self, engine_id: &[u8]) -> bool {
        let bucket = &mut self.buckets[bucket_of(engine_id)];
        let before = bucket.len();
        bucket.retain(|r| r.engine_id.as_ref() != engine_id);
        bucket.len() != before
    }

    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(Vec::clear);
    }

    /// Timeliness check of an authenticated message (RFC 3414 section 3.2
    /// step 7).
    ///
    /// For the local engine the message must carry the current boots and a
    /// time within [`TIME_WINDOW`] of ours. For a remote engine boots must
    /// not go backwards; an older time under the same boots passes only
    /// within the window and is not recorded. Anything fresher updates the
    /// record.
    pub fn check_and_update(
        &mut self,
        local: &LocalEngine,
        engine_id: &[u8],
        boots: u32,
        time: u32,
    ) -> std::result::Result<(), UsmError> {
        if local.is_local(engine_id) {
            let (my_boots, my_time) = local.boots_and_time();
            let difference = my_time.abs_diff(time);
            if boots == MAX_ENGINE_TIME || boots != my_boots || difference > TIME_WINDOW {
                tracing::debug!(
                    target: "snmp_agent_core::engine",
                    { snmp.boots = boots, snmp.time = time, local_boots = my_boots, local_time = my_time },
                    "message outside local time window"
                );
                return Err(UsmError::NotInTimeWindow);
            }
            return Ok(());
        }

        let Some(theirs) = self.get_ex(engine_id, true) else {
            tracing::debug!(target: "snmp_agent_core::engine", { snmp.engine_id = %hex::Bytes(engine_id) }, "no time record for remote engine");
            return Err(UsmError::Generic);
        };

        if theirs.boots == MAX_ENGINE_TIME || theirs.boots > boots {
            tracing::debug!(
                target: "snmp_agent_core::engine",
                { snmp.engine_id = %hex::Bytes(engine_id), snmp.boots = boots, cached_boots = theirs.boots },
                "remote engine boots regressed"
            );
            return Err(UsmError::NotInTimeWindow);
        }

        if theirs.boots == boots && time < theirs.last_time {
            if theirs.time.abs_diff(time) > TIME_WINDOW {
                tracing::debug!(
                    target: "snmp_agent_core::engine",
                    { snmp.engine_id = %hex::Bytes(engine_id), snmp.time = time, cached_time = theirs.time },
                    "remote engine time too old"
                );
                return Err(UsmError::NotInTimeWindow);
            }
            return Ok(());
        }

        self.set(engine_id, boots, time, true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(policy: TimeSyncPolicy) -> (Arc<ManualClock>, EngineTimeCache) {
        let clock = Arc::new(ManualClock::new(1000));
        let cache = EngineTimeCache::new(policy, clock.clone());
        (clock, cache)
    }

    #[test]
    fn bucket_is_stable() {
        assert_eq!(bucket_of(b"engine"), bucket_of(b"engine"));
        assert!(bucket_of(b"x") < BUCKETS);
    }

    #[test]
    fn estimate_adds_elapsed_time() {
        let (clock, mut cache) = cache(TimeSyncPolicy::Strict);
        assert!(cache.set(b"remote", 3, 500, true));
        clock.advance(42);
        assert_eq!(cache.get(b"remote", true), Some((3, 542)));
        let ex = cache.get_ex(b"remote", true).unwrap();
        assert_eq!(ex.last_time, 500);
    }

    #[test]
    fn estimate_wraps_and_bumps_boots_once() {
        let (clock, mut cache) = cache(TimeSyncPolicy::Strict);
        cache.set(b"remote", 7, MAX_ENGINE_TIME - 10, true);
        clock.advance(25);
        assert_eq!(cache.get(b"remote", true), Some((8, 15)));

        cache.set(b"capped", MAX_ENGINE_TIME, MAX_ENGINE_TIME - 1, true);
        clock.advance(5);
        let (boots, _) = cache.get(b"capped", true).unwrap();
        assert_eq!(boots, MAX_ENGINE_TIME);
    }

    #[test]
    fn strict_policy_ignores_unauthenticated() {
        let (_clock, mut cache) = cache(TimeSyncPolicy::Strict);
        assert!(cache.set(b"remote", 5, 100, false));
        assert!(cache.is_known(b"remote"));
        assert_eq!(cache.get(b"remote", false), Some((0, 0)));

        cache.set(b"remote", 5, 100, true);
        cache.set(b"remote", 9, 900, false);
        assert_eq!(cache.get(b"remote", true), Some((5, 100)));
    }

    #[test]
    fn opportunistic_policy_caches_until_authenticated() {
        let (_clock, mut cache) = cache(TimeSyncPolicy::Opportunistic);
        cache.set(b"remote", 5, 100, false);
        assert_eq!(cache.get(b"remote", false), Some((5, 100)));
        // Authenticated readers don't trust unauthenticated values.
        assert_eq!(cache.get(b"remote", true), Some((0, 0)));

        cache.set(b"remote", 6, 10, true);
        cache.set(b"remote", 9, 900, false);
        assert_eq!(cache.get(b"remote", true), Some((6, 10)));
    }

    #[test]
    fn empty_engine_id_is_never_stored() {
        let (_clock, mut cache) = cache(TimeSyncPolicy::Strict);
        assert!(!cache.set(b"", 1, 1, true));
        assert!(!cache.is_known(b""));
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_and_clear() {
        let (_clock, mut cache) = cache(TimeSyncPolicy::Strict);
        cache.set(b"a", 1, 1, true);
        cache.set(b"b", 1, 1, true);
        assert_eq!(cache.len(), 2);
        assert!(cache.remove(b"a"));
        assert!(!cache.remove(b"a"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn local_timeliness() {
        let (clock, mut cache) = cache(TimeSyncPolicy::Strict);
        let local = LocalEngine::new(&b"local-engine"[..], 4, clock.clone());
        clock.advance(1000);
        assert_eq!(local.boots_and_time(), (4, 1000));

        assert!(cache.check_and_update(&local, b"local-engine", 4, 1100).is_ok());
        assert!(cache.check_and_update(&local, b"local-engine", 4, 850).is_ok());
        assert_eq!(
            cache.check_and_update(&local, b"local-engine", 4, 849),
            Err(UsmError::NotInTimeWindow)
        );
        assert_eq!(
            cache.check_and_update(&local, b"local-engine", 3, 1000),
            Err(UsmError::NotInTimeWindow)
        );
    }

    #[test]
    fn remote_timeliness() {
        let (clock, mut cache) = cache(TimeSyncPolicy::Strict);
        let local = LocalEngine::new(&b"local-engine"[..], 1, clock.clone());
        assert_eq!(
            cache.check_and_update(&local, b"remote", 1, 1),
            Err(UsmError::Generic)
        );

        cache.set(b"remote", 0, 0, false);
        assert!(cache.check_and_update(&local, b"remote", 2, 1000).is_ok());
        assert_eq!(cache.get(b"remote", true), Some((2, 1000)));

        // Older boots.
        assert_eq!(
            cache.check_and_update(&local, b"remote", 1, 5000),
            Err(UsmError::NotInTimeWindow)
        );
        // Older time, same boots, inside the window: accepted, not stored.
        assert!(cache.check_and_update(&local, b"remote", 2, 900).is_ok());
        assert_eq!(cache.get(b"remote", true), Some((2, 1000)));
        // Older time beyond the window.
        assert_eq!(
            cache.check_and_update(&local, b"remote", 2, 849),
            Err(UsmError::NotInTimeWindow)
        );
        // Newer values are taken.
        clock.advance(10);
        assert!(cache.check_and_update(&local, b"remote", 2, 2000).is_ok());
        assert_eq!(cache.get(b"remote", true), Some((2, 2000)));
    }

    #[test]
    fn local_engine_rolls_over() {
        let clock = Arc::new(ManualClock::new(0));
        let local = LocalEngine::new(&b"local-engine"[..], 1, clock.clone());
        clock.set(u64::from(MAX_ENGINE_TIME) + 6);
        assert_eq!(local.boots_and_time(), (2, 5));
    }
}
