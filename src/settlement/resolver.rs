use uuid::Uuid;

use crate::polls::models::OptionTally;

/// Outcome of winner resolution for a closed poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// All options that reached the maximum tally; ties split the pool
    Winners(Vec<Uuid>),
    /// No valid winning stake exists; every bettor gets their stake back
    Refund,
}

/// Determine the winning option set for a closed poll.
///
/// The tally basis is raw participation count per option, not stake weight.
/// Absence of data is a valid refund outcome, not a failure - this function
/// has no error path and no side effects.
pub fn resolve(tallies: &[OptionTally]) -> Resolution {
    if tallies.is_empty() {
        return Resolution::Refund;
    }

    let total_stake: i64 = tallies.iter().map(|t| t.total_stake).sum();
    if total_stake == 0 {
        return Resolution::Refund;
    }

    let max_count = tallies.iter().map(|t| t.bet_count).max().unwrap_or(0);
    if max_count == 0 {
        return Resolution::Refund;
    }

    let winners = tallies
        .iter()
        .filter(|t| t.bet_count == max_count)
        .map(|t| t.option_id)
        .collect();

    Resolution::Winners(winners)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(stake: i64, count: i32) -> OptionTally {
        OptionTally {
            option_id: Uuid::new_v4(),
            label: "option".to_string(),
            total_stake: stake,
            bet_count: count,
        }
    }

    #[test]
    fn test_single_winner_by_participation() {
        let tallies = vec![tally(1000, 3), tally(2000, 2)];
        match resolve(&tallies) {
            Resolution::Winners(ids) => assert_eq!(ids, vec![tallies[0].option_id]),
            Resolution::Refund => panic!("expected winners"),
        }
    }

    #[test]
    fn test_participation_count_beats_stake_weight() {
        // one whale on option B, two small bettors on option A: A wins
        let tallies = vec![tally(200, 2), tally(1_000_000, 1)];
        match resolve(&tallies) {
            Resolution::Winners(ids) => assert_eq!(ids, vec![tallies[0].option_id]),
            Resolution::Refund => panic!("expected winners"),
        }
    }

    #[test]
    fn test_tie_produces_multiple_winners() {
        let tallies = vec![tally(500, 2), tally(800, 2), tally(100, 1)];
        match resolve(&tallies) {
            Resolution::Winners(ids) => {
                assert_eq!(ids.len(), 2);
                assert!(ids.contains(&tallies[0].option_id));
                assert!(ids.contains(&tallies[1].option_id));
            }
            Resolution::Refund => panic!("expected winners"),
        }
    }

    #[test]
    fn test_zero_total_stake_is_refund() {
        let tallies = vec![tally(0, 0), tally(0, 0)];
        assert_eq!(resolve(&tallies), Resolution::Refund);
    }

    #[test]
    fn test_no_tallies_is_refund() {
        assert_eq!(resolve(&[]), Resolution::Refund);
    }
}
