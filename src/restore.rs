// Bulk restore reducers for disaster recovery
// Accept JSON arrays exported from admin panel (TypeScript SDK format)

use spacetimedb::{log, reducer, ReducerContext, Table, Timestamp};

use crate::{authorized_gateway, player, score_record};
use crate::{BestScore, Difficulty, GameType, Player, RecentGame, ScoreRecord};
use serde_json::Value;

/// Parse Timestamp from SDK JSON format: {"__timestamp_micros_since_unix_epoch__": "123456"}
fn parse_timestamp_json(val: &Value) -> Result<Timestamp, String> {
    let micros_str = val
        .get("__timestamp_micros_since_unix_epoch__")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid timestamp field")?;

    let micros: i64 = micros_str
        .parse()
        .map_err(|e| format!("Invalid timestamp micros: {}", e))?;

    Ok(Timestamp::from_micros_since_unix_epoch(micros))
}

fn parse_game_type(val: &Value, context: &str) -> Result<GameType, String> {
    let key = val
        .as_str()
        .ok_or(format!("{}: gameType must be a string", context))?;
    GameType::from_key(key).ok_or(format!("{}: unknown gameType {}", context, key))
}

fn parse_difficulty(val: &Value, context: &str) -> Result<Difficulty, String> {
    let key = val
        .as_str()
        .ok_or(format!("{}: difficulty must be a string", context))?;
    Difficulty::from_key(key).ok_or(format!("{}: unknown difficulty {}", context, key))
}

/// Parse a BestScore entry from SDK JSON
fn parse_best_score(val: &Value) -> Result<BestScore, String> {
    Ok(BestScore {
        game_type: parse_game_type(val.get("gameType").ok_or("Missing gameType")?, "bestScore")?,
        difficulty: parse_difficulty(
            val.get("difficulty").ok_or("Missing difficulty")?,
            "bestScore",
        )?,
        score: val
            .get("score")
            .and_then(|v| v.as_u64())
            .ok_or("Missing score")? as u32,
    })
}

/// Parse a RecentGame entry from SDK JSON
fn parse_recent_game(val: &Value) -> Result<RecentGame, String> {
    Ok(RecentGame {
        game_type: parse_game_type(val.get("gameType").ok_or("Missing gameType")?, "recentGame")?,
        difficulty: parse_difficulty(
            val.get("difficulty").ok_or("Missing difficulty")?,
            "recentGame",
        )?,
        score: val
            .get("score")
            .and_then(|v| v.as_u64())
            .ok_or("Missing score")? as u32,
        time_spent_secs: val
            .get("timeSpent")
            .and_then(|v| v.as_u64())
            .ok_or("Missing timeSpent")? as u32,
        moves: val
            .get("moves")
            .and_then(|v| v.as_u64())
            .ok_or("Missing moves")? as u32,
        played_at: parse_timestamp_json(val.get("playedAt").ok_or("Missing playedAt")?)?,
    })
}

/// Bulk restore player table from JSON array
/// Protected by authorization check - only the gateway can call this
#[reducer]
pub fn bulk_restore_player(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    if ctx.db.authorized_gateway().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized bulk_restore_player attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let data: Value =
        serde_json::from_str(&json_data).map_err(|e| format!("Invalid JSON: {}", e))?;

    let players = data.as_array().ok_or("Expected JSON array of players")?;

    let mut count = 0;
    for (i, p) in players.iter().enumerate() {
        let best_scores = p
            .get("bestScores")
            .and_then(|v| v.as_array())
            .ok_or(format!("Player {}: missing or invalid bestScores", i))?
            .iter()
            .map(parse_best_score)
            .collect::<Result<Vec<_>, _>>()?;

        let recent_games = p
            .get("recentGames")
            .and_then(|v| v.as_array())
            .ok_or(format!("Player {}: missing or invalid recentGames", i))?
            .iter()
            .map(parse_recent_game)
            .collect::<Result<Vec<_>, _>>()?;

        let achievements = p
            .get("achievements")
            .and_then(|v| v.as_array())
            .ok_or(format!("Player {}: missing or invalid achievements", i))?
            .iter()
            .map(|a| {
                a.as_str()
                    .map(|s| s.to_string())
                    .ok_or(format!("Player {}: achievement ids must be strings", i))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let restored = Player {
            id: p
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or(format!("Player {}: missing id", i))?
                .to_string(),
            name: p
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or(format!("Player {}: missing name", i))?
                .to_string(),
            games_played: p
                .get("gamesPlayed")
                .and_then(|v| v.as_u64())
                .ok_or(format!("Player {}: missing gamesPlayed", i))? as u32,
            total_score: p
                .get("totalScore")
                .and_then(|v| v.as_u64())
                .ok_or(format!("Player {}: missing totalScore", i))?,
            best_scores,
            achievements,
            recent_games,
            created_at: parse_timestamp_json(
                p.get("createdAt")
                    .ok_or(format!("Player {}: missing createdAt", i))?,
            )?,
            last_played: parse_timestamp_json(
                p.get("lastPlayed")
                    .ok_or(format!("Player {}: missing lastPlayed", i))?,
            )?,
        };

        ctx.db.player().insert(restored);
        count += 1;
    }

    log::info!("Restored {} player records", count);
    Ok(())
}

/// Bulk restore score_record table from JSON array
/// Protected by authorization check - only the gateway can call this
#[reducer]
pub fn bulk_restore_score_record(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    if ctx.db.authorized_gateway().identity().find(&ctx.sender).is_none() {
        log::warn!(
            "Unauthorized bulk_restore_score_record attempt by {}",
            ctx.sender
        );
        return Err("Unauthorized".to_string());
    }

    let data: Value =
        serde_json::from_str(&json_data).map_err(|e| format!("Invalid JSON: {}", e))?;

    let records = data
        .as_array()
        .ok_or("Expected JSON array of score records")?;

    let mut count = 0;
    for (i, r) in records.iter().enumerate() {
        let context = format!("Record {}", i);
        let restored = ScoreRecord {
            id: 0, // auto_inc
            player_id: r
                .get("playerId")
                .and_then(|v| v.as_str())
                .ok_or(format!("{}: missing playerId", context))?
                .to_string(),
            game_type: parse_game_type(
                r.get("gameType")
                    .ok_or(format!("{}: missing gameType", context))?,
                &context,
            )?,
            difficulty: parse_difficulty(
                r.get("difficulty")
                    .ok_or(format!("{}: missing difficulty", context))?,
                &context,
            )?,
            score: r
                .get("score")
                .and_then(|v| v.as_u64())
                .ok_or(format!("{}: missing score", context))? as u32,
            time_spent_secs: r
                .get("timeSpent")
                .and_then(|v| v.as_u64())
                .ok_or(format!("{}: missing timeSpent", context))? as u32,
            moves: r
                .get("moves")
                .and_then(|v| v.as_u64())
                .ok_or(format!("{}: missing moves", context))? as u32,
            created_at: parse_timestamp_json(
                r.get("createdAt")
                    .ok_or(format!("{}: missing createdAt", context))?,
            )?,
        };

        ctx.db.score_record().insert(restored);
        count += 1;
    }

    log::info!("Restored {} score records", count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamp_json_round_trips() {
        let val = json!({"__timestamp_micros_since_unix_epoch__": "1700000000000000"});
        let ts = parse_timestamp_json(&val).unwrap();
        assert_eq!(ts.to_micros_since_unix_epoch(), 1_700_000_000_000_000);
        assert!(parse_timestamp_json(&json!({})).is_err());
    }

    #[test]
    fn best_score_parses_wire_keys() {
        let val = json!({"gameType": "memory_card", "difficulty": "easy", "score": 600});
        let best = parse_best_score(&val).unwrap();
        assert_eq!(best.game_type, GameType::MemoryCard);
        assert_eq!(best.difficulty, Difficulty::Easy);
        assert_eq!(best.score, 600);

        let bad = json!({"gameType": "chess", "difficulty": "easy", "score": 1});
        assert!(parse_best_score(&bad).is_err());
    }

    #[test]
    fn recent_game_requires_all_fields() {
        let val = json!({
            "gameType": "n_back",
            "difficulty": "hard",
            "score": 900,
            "timeSpent": 30,
            "moves": 0,
            "playedAt": {"__timestamp_micros_since_unix_epoch__": "1700000000000000"},
        });
        let game = parse_recent_game(&val).unwrap();
        assert_eq!(game.game_type, GameType::NBack);
        assert_eq!(game.moves, 0);

        let mut missing = val.clone();
        missing.as_object_mut().unwrap().remove("moves");
        assert!(parse_recent_game(&missing).is_err());
    }
}
