//! Collapsing of locally queued revisions into one record per logical visit.

use chrono::{DateTime, Utc};
use pourlog_core::{UserId, VenueId, Visit};
use std::collections::BTreeMap;

/// Identity of a logical visit, independent of its record id.
pub type NaturalKey = (UserId, VenueId, DateTime<Utc>);

/// Returns the natural key of `visit`.
pub fn natural_key(visit: &Visit) -> NaturalKey {
    (visit.user_id.clone(), visit.venue_id.clone(), visit.arrival_time)
}

/// Output of [`deduplicate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Deduplicated {
    /// One record per natural key, ordered by arrival time.
    pub batch: Vec<Visit>,
    /// Records that lost to a newer revision of the same visit.
    pub superseded: Vec<Visit>,
}

/// Keeps the authoritative revision of each logical visit.
///
/// The latest `updated_at` wins; on a tie a record with a departure beats
/// one without. Output order does not depend on input order.
pub fn deduplicate(mut candidates: Vec<Visit>) -> Deduplicated {
    candidates.sort_by(|a, b| (a.arrival_time, &a.id).cmp(&(b.arrival_time, &b.id)));

    let mut groups: BTreeMap<(DateTime<Utc>, UserId, VenueId), Vec<Visit>> = BTreeMap::new();
    for visit in candidates {
        let key = (visit.arrival_time, visit.user_id.clone(), visit.venue_id.clone());
        groups.entry(key).or_default().push(visit);
    }

    let mut out = Deduplicated::default();
    for (_, group) in groups {
        let mut winner: Option<Visit> = None;
        for visit in group {
            match winner.take() {
                Some(current) if !supersedes(&visit, &current) => {
                    out.superseded.push(visit);
                    winner = Some(current);
                }
                Some(current) => {
                    out.superseded.push(current);
                    winner = Some(visit);
                }
                None => winner = Some(visit),
            }
        }
        out.batch.extend(winner);
    }
    out
}

fn supersedes(candidate: &Visit, current: &Visit) -> bool {
    if candidate.updated_at != current.updated_at {
        return candidate.updated_at > current.updated_at;
    }
    candidate.departure_time.is_some() && current.departure_time.is_none()
}
