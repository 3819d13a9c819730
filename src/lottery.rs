//! Weighted winner selection.
//!
//! Every participant holds one ticket plus the bonus of each weighted
//! capability they carry. The ticket pool is shuffled and scanned in order,
//! keeping the first occurrence of each id until enough winners are found.
//! This approximates weighted sampling without replacement; heavier
//! participants are favoured, but selection odds are not exactly
//! proportional to tickets once more than one winner is drawn.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;

/// Ticket count for one participant: always at least one.
pub fn tickets(
    participant: &str,
    bonus_weights: &BTreeMap<String, u32>,
    capabilities_by_participant: &HashMap<String, BTreeSet<String>>,
) -> u64 {
    let held = match capabilities_by_participant.get(participant) {
        Some(caps) => caps,
        None => return 1,
    };
    bonus_weights
        .iter()
        .filter(|(cap, _)| held.contains(*cap))
        .fold(1u64, |acc, (_, bonus)| acc.saturating_add(u64::from(*bonus)))
}

/// Draw up to `count` distinct winners using the thread-local RNG.
pub fn draw(
    participants: &BTreeSet<String>,
    bonus_weights: &BTreeMap<String, u32>,
    capabilities_by_participant: &HashMap<String, BTreeSet<String>>,
    count: usize,
) -> Vec<String> {
    draw_with(
        &mut rand::thread_rng(),
        participants,
        bonus_weights,
        capabilities_by_participant,
        count,
    )
}

/// Same as [`draw`] with a caller-supplied RNG (seeded in tests).
pub fn draw_with<R: Rng + ?Sized>(
    rng: &mut R,
    participants: &BTreeSet<String>,
    bonus_weights: &BTreeMap<String, u32>,
    capabilities_by_participant: &HashMap<String, BTreeSet<String>>,
    count: usize,
) -> Vec<String> {
    let wanted = count.min(participants.len());
    if wanted == 0 {
        return Vec::new();
    }

    let mut pool: Vec<&str> = Vec::new();
    for id in participants {
        let n = tickets(id, bonus_weights, capabilities_by_participant);
        pool.extend(std::iter::repeat(id.as_str()).take(n as usize));
    }
    pool.shuffle(rng);

    let mut seen: HashSet<&str> = HashSet::with_capacity(wanted);
    let mut winners = Vec::with_capacity(wanted);
    for id in pool {
        if seen.insert(id) {
            winners.push(id.to_string());
            if winners.len() >= wanted {
                break;
            }
        }
    }
    winners
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_pool_yields_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        for n in [0, 1, 5] {
            let w = draw_with(&mut rng, &BTreeSet::new(), &BTreeMap::new(), &HashMap::new(), n);
            assert!(w.is_empty());
        }
    }

    #[test]
    fn test_count_is_clamped_and_distinct() {
        let participants = set(&["a", "b", "c"]);
        let mut rng = StdRng::seed_from_u64(7);
        for n in 0..6 {
            let w = draw_with(&mut rng, &participants, &BTreeMap::new(), &HashMap::new(), n);
            assert_eq!(w.len(), n.min(3));
            let uniq: HashSet<_> = w.iter().collect();
            assert_eq!(uniq.len(), w.len());
            assert!(w.iter().all(|id| participants.contains(id)));
        }
    }

    #[test]
    fn test_bonus_adds_tickets_per_held_capability() {
        let mut weights = BTreeMap::new();
        weights.insert("booster".to_string(), 2);
        weights.insert("veteran".to_string(), 3);
        let mut caps = HashMap::new();
        caps.insert("b".to_string(), set(&["booster", "veteran", "unrelated"]));
        caps.insert("c".to_string(), set(&["unrelated"]));
        assert_eq!(tickets("a", &weights, &caps), 1);
        assert_eq!(tickets("b", &weights, &caps), 6);
        assert_eq!(tickets("c", &weights, &caps), 1);
    }

    #[test]
    fn test_heavier_participant_wins_more_often() {
        let participants = set(&["A", "B"]);
        let mut weights = BTreeMap::new();
        weights.insert("vip".to_string(), 4);
        let mut caps = HashMap::new();
        caps.insert("B".to_string(), set(&["vip"]));

        let mut rng = StdRng::seed_from_u64(42);
        let mut wins_a = 0;
        let mut wins_b = 0;
        for _ in 0..5_000 {
            match draw_with(&mut rng, &participants, &weights, &caps, 1)[0].as_str() {
                "A" => wins_a += 1,
                _ => wins_b += 1,
            }
        }
        assert!(wins_b > wins_a, "A={} B={}", wins_a, wins_b);
        // 1:5 tickets; expect roughly 5/6 for B
        assert!(wins_b > 3_500, "B={}", wins_b);
    }

    #[test]
    fn test_thread_rng_variant_respects_bounds() {
        let participants = set(&["u1", "u2", "u3", "u4"]);
        let w = draw(&participants, &BTreeMap::new(), &HashMap::new(), 2);
        assert_eq!(w.len(), 2);
        assert_ne!(w[0], w[1]);
    }
}
