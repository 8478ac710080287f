//! Jittered timestamp assignment for batches of uploads
//!
//! A batch of N videos with cadence K is spread over `ceil(N/K)` calendar
//! days starting at the start date. Item `i` lands on day `i / K` in slot
//! `i % K`; each slot is a preferred time of day shifted by a random whole
//! number of minutes, never past the edges of its calendar day. No two
//! uploads of one account may share a minute.
//!
//! The random source is a ChaCha8 generator, so a planner built with
//! [`SchedulePlanner::seeded`] reproduces the same plan for the same input.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{truncate_to_minute, Account, Cadence};

/// Default jitter window half-width in minutes
pub const DEFAULT_JITTER_MINUTES: u32 = 30;

/// Fallback slot table used when an account has fewer preferred times than its cadence
pub const DEFAULT_SLOT_TIMES: [(u32, u32); 3] = [(10, 0), (18, 0), (14, 0)];

/// Largest batch a single plan may cover
pub const MAX_PLAN_ITEMS: usize = 1_000;

/// Random re-draws before falling back to a nearest-first scan
const MAX_REDRAWS: usize = 8;

const MINUTES_PER_DAY: i64 = 24 * 60;

/// One planned upload slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedSlot {
    /// Position in the input batch
    pub index: usize,
    /// Days after the start date
    pub day: usize,
    /// Slot within the day
    pub slot: usize,
    pub scheduled_for: DateTime<Utc>,
}

/// Assigns collision-free jittered timestamps
pub struct SchedulePlanner {
    jitter_minutes: u32,
    default_times: Vec<NaiveTime>,
    rng: Mutex<ChaCha8Rng>,
}

impl SchedulePlanner {
    /// Planner seeded from OS entropy
    pub fn new(jitter_minutes: u32) -> Self {
        Self::with_rng(jitter_minutes, ChaCha8Rng::from_entropy())
    }

    /// Deterministic planner
    pub fn seeded(jitter_minutes: u32, seed: u64) -> Self {
        Self::with_rng(jitter_minutes, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(jitter_minutes: u32, rng: ChaCha8Rng) -> Self {
        Self {
            jitter_minutes,
            default_times: default_slot_times(),
            rng: Mutex::new(rng),
        }
    }

    /// Replace the fallback slot table
    pub fn with_default_times(mut self, times: Vec<NaiveTime>) -> Self {
        if !times.is_empty() {
            self.default_times = times;
        }
        self
    }

    pub fn jitter_minutes(&self) -> u32 {
        self.jitter_minutes
    }

    fn rng(&self) -> MutexGuard<'_, ChaCha8Rng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time of day for slot `slot` of `account`
    fn slot_time(&self, account: &Account, slot: usize) -> Result<NaiveTime> {
        account
            .upload_times
            .get(slot)
            .or_else(|| self.default_times.get(slot))
            .copied()
            .or_else(|| {
                DEFAULT_SLOT_TIMES
                    .get(slot)
                    .and_then(|(h, m)| NaiveTime::from_hms_opt(*h, *m, 0))
            })
            .ok_or_else(|| Error::invalid_schedule(format!("no time configured for slot {slot}")))
    }

    /// Plan `count` uploads for `account` starting on the start date
    ///
    /// `occupied` holds the scheduled instants of the account's existing
    /// non-terminal uploads. Either every item gets a slot or the call fails
    /// with [`Error::InvalidScheduleRequest`].
    pub fn plan(
        &self,
        account: &Account,
        count: usize,
        start: DateTime<Utc>,
        cadence: Cadence,
        occupied: &[DateTime<Utc>],
    ) -> Result<Vec<PlannedSlot>> {
        if count == 0 {
            return Err(Error::invalid_schedule("at least one video is required"));
        }
        if count > MAX_PLAN_ITEMS {
            return Err(Error::invalid_schedule(format!(
                "at most {MAX_PLAN_ITEMS} videos per plan, got {count}"
            )));
        }

        let per_day = cadence.per_day();
        let start_date = start.date_naive();
        let mut taken: HashSet<DateTime<Utc>> =
            occupied.iter().copied().map(truncate_to_minute).collect();
        let mut planned = Vec::with_capacity(count);
        let mut rng = self.rng();

        for index in 0..count {
            let day = index / per_day;
            let slot = index % per_day;
            let time = self.slot_time(account, slot)?;
            let base = (start_date + Duration::days(day as i64))
                .and_time(time)
                .and_utc();

            let scheduled_for = self.jittered(&mut rng, &taken, truncate_to_minute(base))?;
            taken.insert(scheduled_for);
            planned.push(PlannedSlot {
                index,
                day,
                slot,
                scheduled_for,
            });
        }

        tracing::debug!(
            account_id = %account.id,
            count,
            cadence = %cadence,
            days = count.div_ceil(per_day),
            "Planned upload batch"
        );
        Ok(planned)
    }

    /// Resolve an explicitly requested instant against the account's occupied minutes
    ///
    /// A free minute is kept exactly; a taken one is jittered like a planned slot.
    pub fn place(
        &self,
        occupied: &[DateTime<Utc>],
        requested: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let requested = truncate_to_minute(requested);
        let taken: HashSet<DateTime<Utc>> =
            occupied.iter().copied().map(truncate_to_minute).collect();

        if !taken.contains(&requested) {
            return Ok(requested);
        }

        let mut rng = self.rng();
        self.jittered(&mut rng, &taken, requested)
    }

    fn jittered(
        &self,
        rng: &mut ChaCha8Rng,
        taken: &HashSet<DateTime<Utc>>,
        base: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let window = i64::from(self.jitter_minutes);

        // Offsets that keep the candidate on base's calendar day
        let minute_of_day = i64::from(base.time().num_seconds_from_midnight() / 60);
        let earliest = -(window.min(minute_of_day));
        let latest = window.min(MINUTES_PER_DAY - 1 - minute_of_day);

        for _ in 0..MAX_REDRAWS {
            let offset = rng.gen_range(earliest..=latest);
            let candidate = base + Duration::minutes(offset);
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
        }

        // Nearest-first scan: 0, -1, +1, -2, +2, ...
        (0..=window)
            .flat_map(|d| [-d, d])
            .filter(|offset| (earliest..=latest).contains(offset))
            .map(|offset| base + Duration::minutes(offset))
            .find(|candidate| !taken.contains(candidate))
            .ok_or_else(|| {
                Error::invalid_schedule(format!(
                    "every minute within {window} minutes of {base} on the same day is taken"
                ))
            })
    }
}

impl Default for SchedulePlanner {
    fn default() -> Self {
        Self::new(DEFAULT_JITTER_MINUTES)
    }
}

fn default_slot_times() -> Vec<NaiveTime> {
    DEFAULT_SLOT_TIMES
        .iter()
        .filter_map(|(h, m)| NaiveTime::from_hms_opt(*h, *m, 0))
        .collect()
}

/// Parse a start instant supplied as text (RFC 3339)
pub fn parse_start(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::invalid_schedule(format!("invalid start time '{raw}': {e}")))
}
