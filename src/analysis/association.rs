//! Association of pairwise measurements into a consistent station group.
//!
//! Starting from the full array, every combination of `k` stations is scored
//! by the validated pairs it contains. A combination qualifies when each of
//! its members takes part in at least one validated pair. The first `k` (from
//! the top) with a qualifying combination wins; smaller groups are never
//! searched once a larger one is accepted.

use crate::model::PairwiseMeasurement;

/// Upper bound on array size; keeps the combination search small.
pub const MAX_ARRAY_CHANNELS: usize = 10;

/// A station group with its validated internal pair count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    /// Station indices in increasing order.
    pub members: Vec<usize>,
    pub votes: usize,
}

impl Combination {
    pub fn contains_pair(&self, i: usize, j: usize) -> bool {
        self.members.contains(&i) && self.members.contains(&j)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    /// Size of the accepted groups, or the floor that was reached.
    pub group_size: usize,
    /// Qualifying combinations in lexicographic order. Empty means no
    /// detection.
    pub combinations: Vec<Combination>,
}

impl Association {
    pub fn is_detection(&self) -> bool {
        !self.combinations.is_empty()
    }

    /// Combination with the most votes, the first one on ties.
    pub fn best(&self) -> Option<&Combination> {
        self.combinations
            .iter()
            .fold(None, |best: Option<&Combination>, c| match best {
                Some(b) if c.votes <= b.votes => Some(b),
                _ => Some(c),
            })
    }
}

pub fn associate(measurements: &[PairwiseMeasurement], n_stations: usize, min_group: usize) -> Association {
    let floor = min_group.max(1);
    let mut k = n_stations;
    while k >= floor && k > 0 {
        let combinations: Vec<Combination> = Combinations::new(n_stations, k)
            .filter_map(|members| score(&members, measurements))
            .collect();
        if !combinations.is_empty() {
            return Association {
                group_size: k,
                combinations,
            };
        }
        k -= 1;
    }
    Association {
        group_size: floor,
        combinations: Vec::new(),
    }
}

/// Tallies the members' validated pairs in a symmetric adjacency matrix and
/// returns the combination if nobody is isolated.
fn score(members: &[usize], measurements: &[PairwiseMeasurement]) -> Option<Combination> {
    let k = members.len();
    let position = |station: usize| members.iter().position(|m| *m == station);
    let mut adjacency = vec![vec![0u8; k]; k];
    let mut votes = 0;
    for m in measurements {
        if let (Some(a), Some(b)) = (position(m.i), position(m.j)) {
            if adjacency[a][b] == 0 {
                adjacency[a][b] = 1;
                adjacency[b][a] = 1;
                votes += 1;
            }
        }
    }
    let isolated = adjacency.iter().any(|row| row.iter().all(|v| *v == 0));
    if isolated {
        return None;
    }
    Some(Combination {
        members: members.to_vec(),
        votes,
    })
}

/// Lexicographic k-combinations of `0..n`.
struct Combinations {
    n: usize,
    current: Option<Vec<usize>>,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        let current = if k <= n { Some((0..k).collect()) } else { None };
        Combinations { n, current }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let out = self.current.take()?;
        let k = out.len();
        let mut next = out.clone();
        // rightmost index that can still move right
        let mut i = k;
        while i > 0 {
            i -= 1;
            if next[i] < self.n - k + i {
                next[i] += 1;
                for j in (i + 1)..k {
                    next[j] = next[j - 1] + 1;
                }
                self.current = Some(next);
                return Some(out);
            }
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(i: usize, j: usize) -> PairwiseMeasurement {
        PairwiseMeasurement {
            i,
            j,
            lag_seconds: 0.0,
            coefficient: 0.9,
        }
    }

    fn all_pairs(stations: &[usize]) -> Vec<PairwiseMeasurement> {
        let mut out = Vec::new();
        for (a, i) in stations.iter().enumerate() {
            for j in &stations[a + 1..] {
                out.push(pair(*i, *j));
            }
        }
        out
    }

    #[test]
    fn test_combinations_are_lexicographic() {
        let combos: Vec<Vec<usize>> = Combinations::new(4, 2).collect();
        assert_eq!(
            combos,
            vec![vec![0, 1], vec![0, 2], vec![0, 3], vec![1, 2], vec![1, 3], vec![2, 3]]
        );
        assert_eq!(Combinations::new(10, 5).count(), 252);
        assert_eq!(Combinations::new(3, 4).count(), 0);
    }

    #[test]
    fn test_full_array_accepted_when_all_pairs_valid() {
        let result = associate(&all_pairs(&[0, 1, 2, 3]), 4, 3);
        assert_eq!(result.group_size, 4);
        assert_eq!(result.combinations.len(), 1);
        assert_eq!(result.combinations[0].votes, 6);
    }

    #[test]
    fn test_isolated_station_forces_smaller_group() {
        let result = associate(&all_pairs(&[0, 1, 2, 3, 4]), 6, 3);
        assert_eq!(result.group_size, 5, "station 5 has no valid pair");
        assert_eq!(result.combinations.len(), 1);
        assert_eq!(result.combinations[0].members, vec![0, 1, 2, 3, 4]);
        assert_eq!(result.combinations[0].votes, 10);
    }

    #[test]
    fn test_no_member_is_isolated_in_accepted_groups() {
        let measurements = vec![pair(0, 1), pair(2, 3)];
        let result = associate(&measurements, 5, 2);
        assert_eq!(result.group_size, 4);
        for combo in &result.combinations {
            for m in &combo.members {
                assert!(
                    measurements.iter().any(|p| combo.contains_pair(p.i, p.j) && (p.i == *m || p.j == *m)),
                    "member {} of {:?} is isolated",
                    m,
                    combo.members
                );
            }
        }
    }

    #[test]
    fn test_search_stops_at_first_accepting_size() {
        // {0,1,2} fully connected, {3,4} connected only to each other
        let mut measurements = all_pairs(&[0, 1, 2]);
        measurements.push(pair(3, 4));
        let result = associate(&measurements, 5, 2);
        assert_eq!(result.group_size, 5);
        assert_eq!(result.combinations[0].votes, 4);
    }

    #[test]
    fn test_floor_reached_returns_no_combinations() {
        let result = associate(&[pair(0, 1)], 5, 3);
        assert!(!result.is_detection());
        assert_eq!(result.group_size, 3);
        assert!(result.best().is_none());
    }

    #[test]
    fn test_best_prefers_votes_then_first() {
        let assoc = Association {
            group_size: 3,
            combinations: vec![
                Combination { members: vec![0, 1, 2], votes: 2 },
                Combination { members: vec![0, 1, 3], votes: 3 },
                Combination { members: vec![0, 2, 3], votes: 3 },
            ],
        };
        assert_eq!(assoc.best().map(|c| c.members.clone()), Some(vec![0, 1, 3]));
    }
}
