// Achievement catalog and unlock evaluation
// Evaluation is pure: (aggregate before this game, submitted result) -> newly
// unlocked definitions. Cumulative thresholds use the +1 lookahead so a
// milestone unlocks exactly on the submission that crosses it, never
// retroactively. An id already present on the player is never granted again.

use crate::{Difficulty, GameResult, GameType, Player};

/// Static catalog entry. Clients see the same data via the
/// achievement_catalog table seeded at module init.
pub struct AchievementDef {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub points: u32,
}

/// Games-played milestones, unlocked on the submission that reaches the count
const GAMES_MILESTONES: [(u32, &str); 4] = [
    (5, "games_5"),
    (10, "games_10"),
    (50, "games_50"),
    (100, "games_100"),
];

/// Single-game score thresholds
const SCORE_THRESHOLDS: [(u32, &str); 3] = [
    (500, "score_500"),
    (1000, "score_1000"),
    (1500, "score_1500"),
];

/// Cumulative score thresholds
const TOTAL_SCORE_THRESHOLDS: [(u64, &str); 2] = [
    (5000, "total_score_5000"),
    (10000, "total_score_10000"),
];

/// A game finished in under this many seconds counts as a speed run
const SPEED_DEMON_SECS: u32 = 30;

/// Full catalog. daily_player and top_10 are defined for display parity but
/// have no unlock rule here: both need history the evaluator never sees.
pub const CATALOG: &[AchievementDef] = &[
    AchievementDef {
        id: "first_game",
        name: "First Steps",
        description: "Play your first game",
        icon: "🎮",
        points: 10,
    },
    AchievementDef {
        id: "games_5",
        name: "Getting Started",
        description: "Play 5 games",
        icon: "🌟",
        points: 25,
    },
    AchievementDef {
        id: "games_10",
        name: "Regular",
        description: "Play 10 games",
        icon: "⭐",
        points: 50,
    },
    AchievementDef {
        id: "games_50",
        name: "Veteran",
        description: "Play 50 games",
        icon: "🏆",
        points: 100,
    },
    AchievementDef {
        id: "games_100",
        name: "Master",
        description: "Play 100 games",
        icon: "👑",
        points: 250,
    },
    AchievementDef {
        id: "score_500",
        name: "Good Start",
        description: "Score 500 points in a single game",
        icon: "💯",
        points: 20,
    },
    AchievementDef {
        id: "score_1000",
        name: "High Scorer",
        description: "Score 1000 points in a single game",
        icon: "🎯",
        points: 50,
    },
    AchievementDef {
        id: "score_1500",
        name: "Expert",
        description: "Score 1500 points in a single game",
        icon: "🚀",
        points: 100,
    },
    AchievementDef {
        id: "total_score_5000",
        name: "Collector",
        description: "Reach 5000 total points",
        icon: "💰",
        points: 75,
    },
    AchievementDef {
        id: "total_score_10000",
        name: "Grand Collector",
        description: "Reach 10000 total points",
        icon: "💎",
        points: 150,
    },
    AchievementDef {
        id: "difficulty_easy",
        name: "Easy Start",
        description: "Play a game on easy",
        icon: "🟢",
        points: 5,
    },
    AchievementDef {
        id: "difficulty_medium",
        name: "Stepping Up",
        description: "Play a game on medium",
        icon: "🟡",
        points: 15,
    },
    AchievementDef {
        id: "difficulty_hard",
        name: "No Fear",
        description: "Play a game on hard",
        icon: "🔴",
        points: 30,
    },
    AchievementDef {
        id: "all_games",
        name: "Well Rounded",
        description: "Play every game type",
        icon: "🎨",
        points: 50,
    },
    AchievementDef {
        id: "speed_demon",
        name: "Lightning Fast",
        description: "Finish a game in under 30 seconds",
        icon: "⚡",
        points: 40,
    },
    AchievementDef {
        id: "perfect_memory",
        name: "Perfect Memory",
        description: "Finish a game without a single mistake",
        icon: "🧠",
        points: 75,
    },
    AchievementDef {
        id: "daily_player",
        name: "Daily Player",
        description: "Play 7 days in a row",
        icon: "📅",
        points: 100,
    },
    AchievementDef {
        id: "top_10",
        name: "Top 10",
        description: "Enter the top 10 of a leaderboard",
        icon: "🏅",
        points: 150,
    },
];

/// Look up a catalog entry by id
pub fn find(id: &str) -> Option<&'static AchievementDef> {
    CATALOG.iter().find(|a| a.id == id)
}

/// Sum of all catalog point values
pub fn total_points() -> u32 {
    CATALOG.iter().map(|a| a.points).sum()
}

fn achievement_id_for(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Easy => "difficulty_easy",
        Difficulty::Medium => "difficulty_medium",
        Difficulty::Hard => "difficulty_hard",
    }
}

/// Evaluate which achievements this result unlocks.
///
/// `player` must be the aggregate as it was before the result is folded in.
/// Rules fire independently, in the fixed order below, so one submission can
/// unlock several at once and callers get a deterministic ordering.
pub fn evaluate(player: &Player, result: &GameResult) -> Vec<&'static AchievementDef> {
    let mut unlocked: Vec<&'static AchievementDef> = Vec::new();
    let has = |id: &str| player.achievements.iter().any(|a| a.as_str() == id);
    let grant = |unlocked: &mut Vec<&'static AchievementDef>, id: &str| {
        if !has(id) {
            if let Some(def) = find(id) {
                unlocked.push(def);
            }
        }
    };

    // First ever game
    if player.games_played == 0 {
        grant(&mut unlocked, "first_game");
    }

    // Games-played milestones: exactly on the crossing submission
    let games_after = player.games_played.saturating_add(1);
    for (threshold, id) in GAMES_MILESTONES {
        if games_after == threshold {
            grant(&mut unlocked, id);
        }
    }

    // Single-game score thresholds, each checked independently
    for (threshold, id) in SCORE_THRESHOLDS {
        if result.score >= threshold {
            grant(&mut unlocked, id);
        }
    }

    // Cumulative score thresholds, with this game's score folded in
    let total_after = player.total_score.saturating_add(result.score as u64);
    for (threshold, id) in TOTAL_SCORE_THRESHOLDS {
        if total_after >= threshold {
            grant(&mut unlocked, id);
        }
    }

    // First play on this difficulty
    grant(&mut unlocked, achievement_id_for(result.difficulty));

    // Every game type played at least once (modes already on record + this one)
    let all_covered = GameType::ALL.iter().all(|gt| {
        *gt == result.game_type || player.best_scores.iter().any(|b| b.game_type == *gt)
    });
    if all_covered {
        grant(&mut unlocked, "all_games");
    }

    // Result-scoped one-offs
    if result.time_spent_secs < SPEED_DEMON_SECS {
        grant(&mut unlocked, "speed_demon");
    }
    if result.moves == 0 {
        grant(&mut unlocked, "perfect_memory");
    }

    unlocked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply_result;
    use spacetimedb::Timestamp;

    fn now() -> Timestamp {
        Timestamp::from_micros_since_unix_epoch(1_700_000_000_000_000)
    }

    fn fresh_player() -> Player {
        Player::new("p1".to_string(), "Tester".to_string(), now())
    }

    fn result(game_type: GameType, difficulty: Difficulty, score: u32) -> GameResult {
        GameResult {
            game_type,
            difficulty,
            score,
            time_spent_secs: 45,
            moves: 8,
        }
    }

    fn ids(defs: &[&'static AchievementDef]) -> Vec<&'static str> {
        defs.iter().map(|d| d.id).collect()
    }

    /// Fold one result into the player the way submit_score does
    fn play(player: &mut Player, r: &GameResult) -> Vec<&'static str> {
        let unlocked = evaluate(player, r);
        apply_result(player, r, now(), &unlocked);
        ids(&unlocked)
    }

    #[test]
    fn first_game_unlocks_first_game_score_and_difficulty() {
        let mut player = fresh_player();
        let r = result(GameType::MemoryCard, Difficulty::Easy, 600);
        let unlocked = play(&mut player, &r);
        assert_eq!(unlocked, vec!["first_game", "score_500", "difficulty_easy"]);
    }

    #[test]
    fn second_lower_score_unlocks_nothing() {
        let mut player = fresh_player();
        play(&mut player, &result(GameType::MemoryCard, Difficulty::Easy, 600));
        let unlocked = play(&mut player, &result(GameType::MemoryCard, Difficulty::Easy, 400));
        assert!(unlocked.is_empty());
    }

    #[test]
    fn games_milestone_fires_exactly_on_crossing() {
        let mut player = fresh_player();
        for _ in 0..4 {
            play(&mut player, &result(GameType::MemoryCard, Difficulty::Easy, 100));
        }
        assert!(!player.achievements.iter().any(|a| a.as_str() == "games_5"));
        let unlocked = play(&mut player, &result(GameType::MemoryCard, Difficulty::Easy, 100));
        assert_eq!(unlocked, vec!["games_5"]);
        // Past the threshold: never granted retroactively or again
        let unlocked = play(&mut player, &result(GameType::MemoryCard, Difficulty::Easy, 100));
        assert!(unlocked.is_empty());
    }

    #[test]
    fn high_score_unlocks_all_score_tiers_once() {
        let mut player = fresh_player();
        let unlocked = play(&mut player, &result(GameType::NBack, Difficulty::Hard, 1600));
        assert!(unlocked.contains(&"score_500"));
        assert!(unlocked.contains(&"score_1000"));
        assert!(unlocked.contains(&"score_1500"));
        let again = play(&mut player, &result(GameType::NBack, Difficulty::Hard, 1600));
        assert!(!again.iter().any(|id| id.starts_with("score_")));
    }

    #[test]
    fn total_score_threshold_uses_lookahead() {
        let mut player = fresh_player();
        for _ in 0..3 {
            play(&mut player, &result(GameType::MentalMath, Difficulty::Medium, 1600));
        }
        assert_eq!(player.total_score, 4800);
        let unlocked = play(&mut player, &result(GameType::MentalMath, Difficulty::Medium, 300));
        assert_eq!(unlocked, vec!["total_score_5000"]);
    }

    #[test]
    fn all_games_requires_every_game_type() {
        let mut player = fresh_player();
        play(&mut player, &result(GameType::MemoryCard, Difficulty::Easy, 100));
        play(&mut player, &result(GameType::NumberSequence, Difficulty::Easy, 100));
        play(&mut player, &result(GameType::ColorSequence, Difficulty::Easy, 100));
        play(&mut player, &result(GameType::NBack, Difficulty::Easy, 100));
        assert!(!player.achievements.iter().any(|a| a.as_str() == "all_games"));
        let unlocked = play(&mut player, &result(GameType::MentalMath, Difficulty::Easy, 100));
        assert!(unlocked.contains(&"all_games"));
    }

    #[test]
    fn speed_demon_boundary() {
        let mut player = fresh_player();
        let mut slow = result(GameType::MemoryCard, Difficulty::Easy, 10);
        slow.time_spent_secs = 30;
        let unlocked = play(&mut player, &slow);
        assert!(!unlocked.contains(&"speed_demon"));

        let mut fast = result(GameType::MemoryCard, Difficulty::Easy, 10);
        fast.time_spent_secs = 29;
        let unlocked = play(&mut player, &fast);
        assert_eq!(unlocked, vec!["speed_demon"]);
    }

    #[test]
    fn perfect_memory_on_zero_moves() {
        let mut player = fresh_player();
        let mut flawless = result(GameType::ColorSequence, Difficulty::Medium, 10);
        flawless.moves = 0;
        let unlocked = play(&mut player, &flawless);
        assert!(unlocked.contains(&"perfect_memory"));
        let unlocked = play(&mut player, &flawless);
        assert!(!unlocked.contains(&"perfect_memory"));
    }

    #[test]
    fn catalog_ids_are_unique() {
        for (i, a) in CATALOG.iter().enumerate() {
            assert!(
                CATALOG.iter().skip(i + 1).all(|b| b.id != a.id),
                "duplicate id {}",
                a.id
            );
        }
        assert_eq!(CATALOG.len(), 18);
    }
}
