// Per-player statistics assembly for the profile page
// Pure: (aggregate, that player's ledger records, now) -> JSON payload stored
// in statistics_snapshot. Keys are camelCase to match the client wire format.

use chrono::{DateTime, Days};
use serde_json::{json, Map, Value};
use spacetimedb::Timestamp;

use crate::{achievements, Player, ScoreRecord};

/// How many days of activity the profile chart shows
const ACTIVITY_DAYS: u64 = 7;

/// How many of the player's own best scores the payload includes
const TOP_SCORES_LIMIT: usize = 10;

fn date_key(micros: i64) -> String {
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn rounded_avg(total: u64, count: u32) -> u64 {
    if count == 0 {
        0
    } else {
        ((total as f64) / (count as f64)).round() as u64
    }
}

fn rounded_percent(part: u32, whole: u32) -> u32 {
    if whole == 0 {
        0
    } else {
        ((part as f64) / (whole as f64) * 100.0).round() as u32
    }
}

#[derive(Default)]
struct Bucket {
    played: u32,
    total_score: u64,
    best_score: u32,
    total_time_secs: u64,
}

impl Bucket {
    fn add(&mut self, record: &ScoreRecord) {
        self.played += 1;
        self.total_score += record.score as u64;
        self.best_score = self.best_score.max(record.score);
        self.total_time_secs += record.time_spent_secs as u64;
    }
}

fn game_type_stats(records: &[ScoreRecord]) -> Value {
    let mut buckets: std::collections::BTreeMap<&'static str, Bucket> =
        std::collections::BTreeMap::new();
    for record in records {
        buckets.entry(record.game_type.key()).or_default().add(record);
    }

    let mut out = Map::new();
    for (key, bucket) in buckets {
        out.insert(
            key.to_string(),
            json!({
                "played": bucket.played,
                "totalScore": bucket.total_score,
                "avgScore": rounded_avg(bucket.total_score, bucket.played),
                "bestScore": bucket.best_score,
                "totalTime": bucket.total_time_secs,
                "avgTime": rounded_avg(bucket.total_time_secs, bucket.played),
            }),
        );
    }
    Value::Object(out)
}

fn difficulty_stats(records: &[ScoreRecord]) -> Value {
    let mut buckets: std::collections::BTreeMap<&'static str, Bucket> =
        std::collections::BTreeMap::new();
    for record in records {
        buckets.entry(record.difficulty.key()).or_default().add(record);
    }

    let mut out = Map::new();
    for (key, bucket) in buckets {
        out.insert(
            key.to_string(),
            json!({
                "played": bucket.played,
                "totalScore": bucket.total_score,
                "avgScore": rounded_avg(bucket.total_score, bucket.played),
                "bestScore": bucket.best_score,
            }),
        );
    }
    Value::Object(out)
}

/// Last ACTIVITY_DAYS calendar days (UTC), oldest first, zero-filled so the
/// chart always has a full week of points.
fn recent_activity(records: &[ScoreRecord], now: Timestamp) -> Value {
    let now_micros = now.to_micros_since_unix_epoch();
    let mut days: Vec<(String, u32, u64)> = Vec::with_capacity(ACTIVITY_DAYS as usize);
    for back in (0..ACTIVITY_DAYS).rev() {
        let key = DateTime::from_timestamp_micros(now_micros)
            .and_then(|dt| dt.checked_sub_days(Days::new(back)))
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        days.push((key, 0, 0));
    }

    for record in records {
        let key = date_key(record.created_at.to_micros_since_unix_epoch());
        if let Some(day) = days.iter_mut().find(|(k, _, _)| *k == key) {
            day.1 += 1;
            day.2 += record.score as u64;
        }
    }

    Value::Array(
        days.into_iter()
            .map(|(date, games, total_score)| {
                json!({
                    "date": date,
                    "games": games,
                    "totalScore": total_score,
                    "avgScore": rounded_avg(total_score, games),
                })
            })
            .collect(),
    )
}

/// Achievement progress: earned vs catalog, by count and by points.
pub fn achievement_progress(player: &Player) -> Value {
    let total = achievements::CATALOG.len() as u32;
    let earned = player.achievements.len() as u32;
    let total_points = achievements::total_points();
    let earned_points: u32 = player
        .achievements
        .iter()
        .filter_map(|id| achievements::find(id))
        .map(|def| def.points)
        .sum();

    json!({
        "total": total,
        "earned": earned,
        "percentage": rounded_percent(earned, total),
        "totalPoints": total_points,
        "earnedPoints": earned_points,
        "pointsPercentage": rounded_percent(earned_points, total_points),
    })
}

/// Full statistics payload for one player.
pub fn statistics_payload(player: &Player, records: &[ScoreRecord], now: Timestamp) -> Value {
    let top = crate::ranking::top_scores(records, None, None, None, TOP_SCORES_LIMIT);
    let top_scores: Vec<Value> = top
        .iter()
        .map(|r| {
            json!({
                "gameType": r.game_type.key(),
                "difficulty": r.difficulty.key(),
                "score": r.score,
                "timeSpent": r.time_spent_secs,
                "moves": r.moves,
                "playedAt": r.created_at.to_micros_since_unix_epoch(),
            })
        })
        .collect();

    json!({
        "overview": {
            "gamesPlayed": player.games_played,
            "totalScore": player.total_score,
            "avgScore": rounded_avg(player.total_score, player.games_played),
            "achievements": player.achievements.len(),
        },
        "gameTypeStats": game_type_stats(records),
        "difficultyStats": difficulty_stats(records),
        "recentActivity": recent_activity(records, now),
        "topScores": top_scores,
        "achievementProgress": achievement_progress(player),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Difficulty, GameType};

    const DAY_MICROS: i64 = 86_400_000_000;
    // 2023-11-14 22:13:20 UTC
    const NOW_MICROS: i64 = 1_700_000_000_000_000;

    fn now() -> Timestamp {
        Timestamp::from_micros_since_unix_epoch(NOW_MICROS)
    }

    fn rec(game_type: GameType, difficulty: Difficulty, score: u32, days_ago: i64) -> ScoreRecord {
        ScoreRecord {
            id: 0,
            player_id: "p1".to_string(),
            game_type,
            difficulty,
            score,
            time_spent_secs: 40,
            moves: 10,
            created_at: Timestamp::from_micros_since_unix_epoch(
                NOW_MICROS - days_ago * DAY_MICROS,
            ),
        }
    }

    #[test]
    fn game_type_buckets_aggregate_correctly() {
        let records = vec![
            rec(GameType::MemoryCard, Difficulty::Easy, 600, 0),
            rec(GameType::MemoryCard, Difficulty::Easy, 400, 0),
            rec(GameType::NBack, Difficulty::Hard, 1000, 0),
        ];
        let stats = game_type_stats(&records);
        let memory = &stats["memory_card"];
        assert_eq!(memory["played"], 2);
        assert_eq!(memory["totalScore"], 1000);
        assert_eq!(memory["avgScore"], 500);
        assert_eq!(memory["bestScore"], 600);
        assert_eq!(memory["totalTime"], 80);
        assert_eq!(memory["avgTime"], 40);
        assert_eq!(stats["n_back"]["played"], 1);
        assert!(stats.get("color_sequence").is_none());
    }

    #[test]
    fn activity_has_full_week_and_counts_only_window() {
        let records = vec![
            rec(GameType::MemoryCard, Difficulty::Easy, 100, 0),
            rec(GameType::MemoryCard, Difficulty::Easy, 300, 0),
            rec(GameType::MemoryCard, Difficulty::Easy, 500, 2),
            // Outside the 7-day chart
            rec(GameType::MemoryCard, Difficulty::Easy, 900, 10),
        ];
        let activity = recent_activity(&records, now());
        let days = activity.as_array().unwrap();
        assert_eq!(days.len(), 7);
        let today = &days[6];
        assert_eq!(today["games"], 2);
        assert_eq!(today["totalScore"], 400);
        assert_eq!(today["avgScore"], 200);
        let two_back = &days[4];
        assert_eq!(two_back["games"], 1);
        let window_total: u64 = days
            .iter()
            .map(|d| d["totalScore"].as_u64().unwrap())
            .sum();
        assert_eq!(window_total, 900);
    }

    #[test]
    fn progress_counts_points_and_percentages() {
        let mut player = Player::new("p1".to_string(), "Tester".to_string(), now());
        player.achievements = vec!["first_game".to_string(), "score_500".to_string()];
        let progress = achievement_progress(&player);
        assert_eq!(progress["total"], 18);
        assert_eq!(progress["earned"], 2);
        assert_eq!(progress["percentage"], 11);
        assert_eq!(progress["earnedPoints"], 30);
    }

    #[test]
    fn payload_overview_uses_aggregate() {
        let mut player = Player::new("p1".to_string(), "Tester".to_string(), now());
        player.games_played = 2;
        player.total_score = 1001;
        let records = vec![
            rec(GameType::MemoryCard, Difficulty::Easy, 601, 0),
            rec(GameType::MemoryCard, Difficulty::Easy, 400, 1),
        ];
        let payload = statistics_payload(&player, &records, now());
        assert_eq!(payload["overview"]["gamesPlayed"], 2);
        assert_eq!(payload["overview"]["avgScore"], 501);
        let top = payload["topScores"].as_array().unwrap();
        assert_eq!(top[0]["score"], 601);
        assert_eq!(top.len(), 2);
    }
}
