// Read-side ranking over the score ledger and player aggregates
// Everything here is pure so the reducers that materialize boards stay thin.
// Group-by-max rankings are always computed from score records, never from
// the aggregate, so they hold even if an aggregate is ever behind the ledger.

use chrono::{DateTime, Days, Months};
use spacetimedb::Timestamp;

use crate::{BoardPeriod, Difficulty, GameType, Player, ScoreRecord};

/// One player's best result within a single game mode
#[derive(Debug, Clone, PartialEq)]
pub struct ModeBest {
    pub player_id: String,
    pub best_score: u32,
    pub games: u32,
}

/// A player's standing within one game mode
#[derive(Debug, Clone, PartialEq)]
pub struct GameRank {
    pub rank: u32,
    pub best_score: u32,
    pub difficulty: Difficulty,
}

fn micros(ts: Timestamp) -> i64 {
    ts.to_micros_since_unix_epoch()
}

/// Score-ordered ledger listing: score descending, most recent first on ties.
pub fn top_scores<'a>(
    records: &'a [ScoreRecord],
    game_type: Option<GameType>,
    difficulty: Option<Difficulty>,
    since: Option<Timestamp>,
    limit: usize,
) -> Vec<&'a ScoreRecord> {
    let mut matching: Vec<&ScoreRecord> = records
        .iter()
        .filter(|r| game_type.map_or(true, |gt| r.game_type == gt))
        .filter(|r| difficulty.map_or(true, |d| r.difficulty == d))
        .filter(|r| since.map_or(true, |s| micros(r.created_at) >= micros(s)))
        .collect();
    matching.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(micros(b.created_at).cmp(&micros(a.created_at)))
    });
    matching.truncate(limit);
    matching
}

/// Total-score ranking over aggregates: ties broken by player id ascending
/// so the ordering is stable between refreshes.
pub fn top_players<'a>(players: &'a [Player], limit: usize) -> Vec<&'a Player> {
    let mut ranked: Vec<&Player> = players.iter().collect();
    ranked.sort_by(|a, b| b.total_score.cmp(&a.total_score).then(a.id.cmp(&b.id)));
    ranked.truncate(limit);
    ranked
}

/// Group-by-max over the ledger for one game type (optionally one
/// difficulty): each player's best score and how many games they played
/// there, best descending, ties by player id ascending.
pub fn best_per_user(
    records: &[ScoreRecord],
    game_type: GameType,
    difficulty: Option<Difficulty>,
    limit: usize,
) -> Vec<ModeBest> {
    let mut by_player: std::collections::BTreeMap<&str, (u32, u32)> =
        std::collections::BTreeMap::new();
    for record in records
        .iter()
        .filter(|r| r.game_type == game_type)
        .filter(|r| difficulty.map_or(true, |d| r.difficulty == d))
    {
        let entry = by_player.entry(record.player_id.as_str()).or_insert((0, 0));
        entry.0 = entry.0.max(record.score);
        entry.1 += 1;
    }

    let mut bests: Vec<ModeBest> = by_player
        .into_iter()
        .map(|(player_id, (best_score, games))| ModeBest {
            player_id: player_id.to_string(),
            best_score,
            games,
        })
        .collect();
    bests.sort_by(|a, b| {
        b.best_score
            .cmp(&a.best_score)
            .then(a.player_id.cmp(&b.player_id))
    });
    bests.truncate(limit);
    bests
}

/// 1-based overall rank: 1 + number of players with a strictly greater total.
/// Players who never submitted rank by their zero total like everyone else.
pub fn overall_rank(players: &[Player], player_id: &str) -> Option<u32> {
    let target = players.iter().find(|p| p.id == player_id)?;
    let better = players
        .iter()
        .filter(|p| p.total_score > target.total_score)
        .count();
    Some(better as u32 + 1)
}

/// Rank within one game mode: 1 + number of ledger records strictly better
/// than the player's best there. None when the player has no qualifying
/// record (absent, not rank-by-zero). When no difficulty is given the
/// player's best record across difficulties picks the one to rank within.
pub fn game_rank(
    records: &[ScoreRecord],
    player_id: &str,
    game_type: GameType,
    difficulty: Option<Difficulty>,
) -> Option<GameRank> {
    let mut best: Option<&ScoreRecord> = None;
    for record in records
        .iter()
        .filter(|r| r.player_id == player_id && r.game_type == game_type)
        .filter(|r| difficulty.map_or(true, |d| r.difficulty == d))
    {
        if best.map_or(true, |b| record.score > b.score) {
            best = Some(record);
        }
    }
    let best = best?;

    let rank_difficulty = difficulty.unwrap_or(best.difficulty);
    let better = records
        .iter()
        .filter(|r| r.game_type == game_type && r.difficulty == rank_difficulty)
        .filter(|r| r.score > best.score)
        .count();

    Some(GameRank {
        rank: better as u32 + 1,
        best_score: best.score,
        difficulty: rank_difficulty,
    })
}

/// Display positions for an already-sorted board: equal keys share a
/// position, the next distinct key skips to its index.
pub fn tie_aware_positions<K: PartialEq>(keys: &[K]) -> Vec<u32> {
    let mut positions = Vec::with_capacity(keys.len());
    let mut display = 1u32;
    for i in 0..keys.len() {
        if i > 0 && keys[i] != keys[i - 1] {
            display = (i + 1) as u32;
        }
        positions.push(display);
    }
    positions
}

/// Start of a rolling leaderboard window: 1 day, 7 days, or one calendar
/// month back from `now`. Falls back to fixed-length arithmetic if the
/// timestamp is outside chrono's range.
pub fn window_start(now: Timestamp, period: BoardPeriod) -> Timestamp {
    let now_micros = micros(now);
    let fallback_days: i64 = match period {
        BoardPeriod::Day => 1,
        BoardPeriod::Week => 7,
        BoardPeriod::Month => 30,
    };
    let start = DateTime::from_timestamp_micros(now_micros)
        .and_then(|dt| match period {
            BoardPeriod::Day => dt.checked_sub_days(Days::new(1)),
            BoardPeriod::Week => dt.checked_sub_days(Days::new(7)),
            BoardPeriod::Month => dt.checked_sub_months(Months::new(1)),
        })
        .map(|dt| dt.timestamp_micros())
        .unwrap_or(now_micros - fallback_days * 86_400_000_000);
    Timestamp::from_micros_since_unix_epoch(start)
}
