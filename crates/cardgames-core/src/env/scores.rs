use crate::error::GameError;
use crate::model::rank::Rank;

/// Maps every rank onto a score bucket. Bucket values are contiguous from 0,
/// so the bucket count doubles as the size of the action and observation
/// spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankScores {
    buckets: [usize; 13],
    n_buckets: usize,
}

impl RankScores {
    /// `2 → 0, 3 → 1, …, A → 12`.
    pub fn simple() -> Self {
        let mut buckets = [0usize; 13];
        for (idx, slot) in buckets.iter_mut().enumerate() {
            *slot = idx;
        }
        Self {
            buckets,
            n_buckets: 13,
        }
    }

    pub fn from_pairs<I>(pairs: I) -> Result<Self, GameError>
    where
        I: IntoIterator<Item = (Rank, usize)>,
    {
        let mut slots: [Option<usize>; 13] = [None; 13];
        for (rank, bucket) in pairs {
            let slot = &mut slots[rank.index()];
            if slot.is_some() {
                return Err(GameError::invalid_argument(format!(
                    "rank {rank} is scored more than once"
                )));
            }
            *slot = Some(bucket);
        }

        let mut buckets = [0usize; 13];
        for (rank, slot) in Rank::ORDERED.iter().zip(slots) {
            buckets[rank.index()] = slot.ok_or_else(|| {
                GameError::invalid_argument(format!("rank {rank} has no score bucket"))
            })?;
        }

        let n_buckets = buckets.iter().max().map_or(0, |max| max + 1);
        for bucket in 0..n_buckets {
            if !buckets.contains(&bucket) {
                return Err(GameError::invalid_argument(format!(
                    "score buckets must be contiguous from 0; bucket {bucket} is unused"
                )));
            }
        }

        Ok(Self { buckets, n_buckets })
    }

    pub fn score(&self, rank: Rank) -> usize {
        self.buckets[rank.index()]
    }

    pub fn n_buckets(&self) -> usize {
        self.n_buckets
    }

    /// Unweighted mean over the bucket values themselves.
    pub fn mean_bucket(&self) -> f64 {
        (self.n_buckets as f64 - 1.0) / 2.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rank, usize)> + '_ {
        Rank::ORDERED
            .iter()
            .map(move |rank| (*rank, self.buckets[rank.index()]))
    }
}

impl Default for RankScores {
    fn default() -> Self {
        Self::simple()
    }
}
