//! 均匀无放回随机抽样
//!
//! 对完整候选集做原地 Fisher-Yates 洗牌（`SliceRandom::shuffle`），再截取前
//! `min(n, len)` 个。每种排列等概率，每个元素被选中的概率为 `n / len`。
//! 候选集只包含轻量的键，完整记录在抽样之后才批量水合。

use rand::seq::SliceRandom;
use rand::Rng;

pub fn sample<T, R>(mut candidates: Vec<T>, count: usize, rng: &mut R) -> Vec<T>
where
    R: Rng + ?Sized,
{
    candidates.shuffle(rng);
    candidates.truncate(count);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn returns_min_of_count_and_len_distinct_members() {
        let mut rng = StdRng::seed_from_u64(7);
        for len in [0usize, 1, 2, 5, 31, 200] {
            let candidates: Vec<usize> = (0..len).collect();
            for count in [0usize, 1, 3, 31, 250] {
                let picked = sample(candidates.clone(), count, &mut rng);
                assert_eq!(picked.len(), count.min(len));

                let unique: HashSet<_> = picked.iter().collect();
                assert_eq!(unique.len(), picked.len(), "duplicates for len={len} count={count}");
                assert!(picked.iter().all(|v| *v < len));
            }
        }
    }

    #[test]
    fn oversized_request_returns_every_candidate_once() {
        let mut rng = StdRng::seed_from_u64(42);
        let candidates: Vec<&str> = vec!["a", "b", "c", "d", "e", "f", "g"];

        let mut picked = sample(candidates.clone(), 10, &mut rng);
        assert_eq!(picked.len(), 7);
        picked.sort_unstable();
        assert_eq!(picked, candidates);
    }

    #[test]
    fn empty_candidates_yield_empty_sample() {
        let mut rng = StdRng::seed_from_u64(1);
        let picked: Vec<u32> = sample(Vec::new(), 5, &mut rng);
        assert!(picked.is_empty());
    }

    #[test]
    fn selection_frequency_converges_to_n_over_m() {
        const M: usize = 20;
        const N: usize = 5;
        const TRIALS: usize = 20_000;

        let mut rng = StdRng::seed_from_u64(2024);
        let mut hits = [0usize; M];
        for _ in 0..TRIALS {
            for v in sample((0..M).collect::<Vec<_>>(), N, &mut rng) {
                hits[v] += 1;
            }
        }

        // 期望 0.25，标准差约 0.003；容差取 0.02
        let expected = N as f64 / M as f64;
        for (element, count) in hits.iter().enumerate() {
            let freq = *count as f64 / TRIALS as f64;
            assert!(
                (freq - expected).abs() < 0.02,
                "element {element} selected with frequency {freq}, expected {expected}"
            );
        }
    }

    #[test]
    fn first_position_is_uniform_across_candidates() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut firsts = [0usize; 4];
        for _ in 0..8_000 {
            let picked = sample(vec![0usize, 1, 2, 3], 4, &mut rng);
            firsts[picked[0]] += 1;
        }
        for count in firsts {
            let freq = count as f64 / 8_000.0;
            assert!((freq - 0.25).abs() < 0.03, "first-position frequency {freq}");
        }
    }
}
