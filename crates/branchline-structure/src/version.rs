//! Structure versions
//!
//! A [`VersionedStoryStructure`] wraps a structure with an identifier and a
//! link to the version it was rewritten from. Version ids are
//! `sv-<13-digit-millis>-<4-hex-sequence>`; the sequence disambiguates ids
//! minted within one millisecond, so ids from one generator are strictly
//! increasing.

use crate::error::VersionError;
use crate::story::PageId;
use crate::types::{BeatId, StoryStructure};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

static VERSION_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^sv-(\d{13})-([0-9a-f]{4})$").expect("version id pattern compiles")
});

/// Structure version identifier
///
/// Orders by timestamp, then sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StructureVersionId {
    millis: u64,
    sequence: u16,
}

impl StructureVersionId {
    /// Build from parts
    #[inline]
    #[must_use]
    pub fn from_parts(millis: u64, sequence: u16) -> Self {
        Self { millis, sequence }
    }

    /// Millisecond timestamp encoded in the id
    #[inline]
    #[must_use]
    pub fn millis(&self) -> u64 {
        self.millis
    }

    /// Same-millisecond sequence number
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> u16 {
        self.sequence
    }
}

impl fmt::Display for StructureVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sv-{:013}-{:04x}", self.millis, self.sequence)
    }
}

impl FromStr for StructureVersionId {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::InvalidVersionId(s.to_string());
        let caps = VERSION_ID_PATTERN.captures(s).ok_or_else(invalid)?;
        let millis = caps[1].parse().map_err(|_| invalid())?;
        let sequence = u16::from_str_radix(&caps[2], 16).map_err(|_| invalid())?;
        Ok(Self { millis, sequence })
    }
}

impl Serialize for StructureVersionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StructureVersionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Wall-clock source for version ids
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> u64;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Mints strictly increasing version ids
///
/// Shared by every branch of every story it serves; the last issued
/// `(millis, sequence)` pair is kept under a mutex.
#[derive(Debug)]
pub struct VersionIdGenerator {
    clock: Arc<dyn Clock>,
    last: Mutex<Option<StructureVersionId>>,
}

impl VersionIdGenerator {
    /// Generator driven by the system clock
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Generator driven by a custom clock
    #[inline]
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }

    /// Next id
    ///
    /// A clock that stalls or moves backwards reuses the last timestamp and
    /// bumps the sequence; an exhausted sequence carries into the timestamp.
    pub fn next_id(&self) -> StructureVersionId {
        let now = self.clock.now_millis();
        let mut last = self.last.lock();
        let next = match *last {
            Some(prev) if now <= prev.millis => {
                if prev.sequence == u16::MAX {
                    StructureVersionId::from_parts(prev.millis + 1, 0)
                } else {
                    StructureVersionId::from_parts(prev.millis, prev.sequence + 1)
                }
            }
            _ => StructureVersionId::from_parts(now, 0),
        };
        *last = Some(next);
        next
    }
}

impl Default for VersionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable structure snapshot plus lineage metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedStoryStructure {
    /// Version identifier
    pub id: StructureVersionId,
    /// Structure tree
    pub structure: StoryStructure,
    /// Version this one was rewritten from
    pub previous_version_id: Option<StructureVersionId>,
    /// Page whose generation triggered the rewrite
    pub created_at_page_id: Option<PageId>,
    /// Why the structure was rewritten
    pub rewrite_reason: Option<String>,
    /// Concluded beats carried over unchanged
    pub preserved_beat_ids: Vec<BeatId>,
    /// Creation time, taken from the id timestamp
    pub created_at: DateTime<Utc>,
}

impl VersionedStoryStructure {
    /// Whether this is a root version
    #[inline]
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.previous_version_id.is_none()
    }
}

/// Wrap a freshly generated structure in a root version
#[must_use]
pub fn create_initial_version(
    ids: &VersionIdGenerator,
    structure: StoryStructure,
) -> VersionedStoryStructure {
    let id = ids.next_id();
    VersionedStoryStructure {
        id,
        structure,
        previous_version_id: None,
        created_at_page_id: None,
        rewrite_reason: None,
        preserved_beat_ids: Vec::new(),
        created_at: timestamp(id),
    }
}

/// Record a rewritten structure as the successor of `previous`
#[must_use]
pub fn create_rewritten_version(
    ids: &VersionIdGenerator,
    previous: &VersionedStoryStructure,
    new_structure: StoryStructure,
    preserved_beat_ids: Vec<BeatId>,
    rewrite_reason: impl Into<String>,
    created_at_page_id: PageId,
) -> VersionedStoryStructure {
    let id = ids.next_id();
    VersionedStoryStructure {
        id,
        structure: new_structure,
        previous_version_id: Some(previous.id),
        created_at_page_id: Some(created_at_page_id),
        rewrite_reason: Some(rewrite_reason.into()),
        preserved_beat_ids,
        created_at: timestamp(id),
    }
}

fn timestamp(id: StructureVersionId) -> DateTime<Utc> {
    i64::try_from(id.millis())
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default()
}
