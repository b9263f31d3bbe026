//! Queue ranking
//!
//! Total order over queue candidates: most votes first, then the candidate
//! that has waited longest (earliest `added_at`), then track id. The order
//! depends only on these three values, so equal inputs always rank equally.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use uuid::Uuid;

/// Input row for [`rank`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankCandidate {
    pub track_id: Uuid,
    /// Queue entry backing this row, `None` for an open-round candidate
    /// that has not been queued yet
    pub entry_id: Option<Uuid>,
    pub votes: u32,
    pub added_at: DateTime<Utc>,
}

/// Ranking comparator
pub fn compare(a: &RankCandidate, b: &RankCandidate) -> Ordering {
    b.votes
        .cmp(&a.votes)
        .then_with(|| a.added_at.cmp(&b.added_at))
        .then_with(|| a.track_id.cmp(&b.track_id))
}

/// Sort candidates into ranking order
pub fn rank(mut candidates: Vec<RankCandidate>) -> Vec<RankCandidate> {
    candidates.sort_by(compare);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    fn candidate(votes: u32, added: i64) -> RankCandidate {
        RankCandidate {
            track_id: Uuid::new_v4(),
            entry_id: None,
            votes,
            added_at: at(added),
        }
    }

    #[test]
    fn test_votes_rank_first() {
        let low = candidate(1, 0);
        let high = candidate(5, 10);
        let ranked = rank(vec![low.clone(), high.clone()]);
        assert_eq!(ranked, vec![high, low]);
    }

    #[test]
    fn test_equal_votes_earliest_added_wins() {
        // A(votes=3, added t=1), B(votes=3, added t=2) -> [A, B]
        let a = candidate(3, 1);
        let b = candidate(3, 2);
        let ranked = rank(vec![b.clone(), a.clone()]);
        assert_eq!(ranked, vec![a, b]);
    }

    #[test]
    fn test_track_id_is_final_fallback() {
        let low_id = RankCandidate {
            track_id: Uuid::from_u128(1),
            entry_id: None,
            votes: 2,
            added_at: at(0),
        };
        let high_id = RankCandidate {
            track_id: Uuid::from_u128(2),
            ..low_id.clone()
        };
        let ranked = rank(vec![high_id.clone(), low_id.clone()]);
        assert_eq!(ranked, vec![low_id, high_id]);
    }

    #[test]
    fn test_rank_is_deterministic_across_input_orders() {
        let rows: Vec<RankCandidate> = (0..12)
            .map(|i| candidate((i % 3) as u32, i64::from(i % 4)))
            .collect();
        let mut reversed = rows.clone();
        reversed.reverse();

        let first = rank(rows);
        let second = rank(reversed);
        assert_eq!(first, second);
    }
}
