use spacetimedb::{
    client_visibility_filter, reducer, table, view, Filter, Identity, ReducerContext, ScheduleAt,
    SpacetimeType, Table, Timestamp,
};

pub mod achievements;
pub mod ranking;
pub mod stats;

// Bulk restore reducers for disaster recovery
mod restore;

use achievements::AchievementDef;

// ==================== CONSTANTS ====================

/// How many recent games the aggregate keeps for activity charts
const RECENT_GAMES_LIMIT: usize = 20;

/// Entries kept per (game type, difficulty) mode board
const MODE_BOARD_LIMIT: usize = 50;

/// Entries kept on the total-score board
const TOP_PLAYERS_LIMIT: usize = 100;

/// Default and maximum rows for requested score listings
const DEFAULT_BOARD_LIMIT: u32 = 10;
const MAX_BOARD_LIMIT: u32 = 100;

/// Sanity bounds on submitted results. Clients never produce values near
/// these, so anything above is a broken or hostile client.
const MAX_SINGLE_SCORE: u32 = 100_000;
const MAX_TIME_SPENT_SECS: u32 = 86_400;
const MAX_MOVES: u32 = 10_000;

/// Display name length bounds (after trimming)
const MIN_NAME_CHARS: usize = 2;
const MAX_NAME_CHARS: usize = 50;

/// Idempotency tokens are kept long enough to cover any sane client retry
const TOKEN_RETENTION_SECS: i64 = 24 * 60 * 60;

/// Requested snapshots from disconnected clients are dropped after this
const SNAPSHOT_RETENTION_SECS: i64 = 60 * 60;

/// Interval for the background cleanup task
const CLEANUP_INTERVAL_SECS: u64 = 60 * 60;

// ==================== GAME ENUMERATIONS ====================

/// The five trainer games. Submissions carry these as typed fields, so an
/// out-of-range game type is rejected before the reducer body ever runs.
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameType {
    MemoryCard,
    NumberSequence,
    ColorSequence,
    NBack,
    MentalMath,
}

impl GameType {
    pub const ALL: [GameType; 5] = [
        GameType::MemoryCard,
        GameType::NumberSequence,
        GameType::ColorSequence,
        GameType::NBack,
        GameType::MentalMath,
    ];

    /// Stable wire key, also used in statistics payloads and logs
    pub fn key(&self) -> &'static str {
        match self {
            GameType::MemoryCard => "memory_card",
            GameType::NumberSequence => "number_sequence",
            GameType::ColorSequence => "color_sequence",
            GameType::NBack => "n_back",
            GameType::MentalMath => "mental_math",
        }
    }

    pub fn from_key(key: &str) -> Option<GameType> {
        GameType::ALL.iter().copied().find(|gt| gt.key() == key)
    }
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn key(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    pub fn from_key(key: &str) -> Option<Difficulty> {
        Difficulty::ALL.iter().copied().find(|d| d.key() == key)
    }
}

/// Rolling window for leaderboard listings
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardPeriod {
    Day,
    Week,
    Month,
}

/// Best score for one (game type, difficulty) mode, embedded in the aggregate
#[derive(SpacetimeType, Clone, Debug)]
pub struct BestScore {
    pub game_type: GameType,
    pub difficulty: Difficulty,
    pub score: u32,
}

/// Recent-game summary kept on the aggregate for activity display
#[derive(SpacetimeType, Clone, Debug)]
pub struct RecentGame {
    pub game_type: GameType,
    pub difficulty: Difficulty,
    pub score: u32,
    pub time_spent_secs: u32,
    pub moves: u32,
    pub played_at: Timestamp,
}

/// A validated game result as submitted, before it is folded into anything
#[derive(Debug, Clone)]
pub struct GameResult {
    pub game_type: GameType,
    pub difficulty: Difficulty,
    pub score: u32,
    pub time_spent_secs: u32,
    pub moves: u32,
}

// ==================== HELPER FUNCTIONS ====================

/// Get player from session using the sender's identity
/// This abstracts the session lookup pattern used throughout reducers
fn get_player(ctx: &ReducerContext) -> Result<Player, String> {
    let session = ctx
        .db
        .session()
        .connection_id()
        .find(&ctx.sender)
        .ok_or("No session found".to_string())?;

    ctx.db
        .player()
        .id()
        .find(&session.player_id)
        .ok_or("Player not found".to_string())
}

/// Gateway/admin authorization check
fn require_gateway(ctx: &ReducerContext) -> Result<(), String> {
    if ctx.db.authorized_gateway().identity().find(&ctx.sender).is_none() {
        return Err("Unauthorized: gateway identity required".to_string());
    }
    Ok(())
}

/// Structural validation of a submitted result. Enum fields are already
/// validated by deserialization; this checks the numeric sanity bounds and
/// names every offending field so the client can show a useful error.
pub fn validate_submission(score: u32, time_spent_secs: u32, moves: u32) -> Result<(), String> {
    let mut invalid: Vec<&str> = Vec::new();
    if score > MAX_SINGLE_SCORE {
        invalid.push("score");
    }
    if time_spent_secs > MAX_TIME_SPENT_SECS {
        invalid.push("timeSpent");
    }
    if moves > MAX_MOVES {
        invalid.push("moves");
    }
    if invalid.is_empty() {
        Ok(())
    } else {
        Err(format!("validation failed: {}", invalid.join(", ")))
    }
}

fn validate_name(name: &str) -> Result<String, String> {
    let trimmed = name.trim().to_string();
    let chars = trimmed.chars().count();
    if chars < MIN_NAME_CHARS || chars > MAX_NAME_CHARS {
        return Err(format!(
            "validation failed: name must be {}-{} characters",
            MIN_NAME_CHARS, MAX_NAME_CHARS
        ));
    }
    Ok(trimmed)
}

/// Fold one game result into the aggregate. Counters only ever move up:
/// games and totals are saturating sums, a best score is replaced only by a
/// strictly greater one, and achievement ids are append-only.
pub fn apply_result(
    player: &mut Player,
    result: &GameResult,
    now: Timestamp,
    unlocked: &[&'static AchievementDef],
) {
    player.games_played = player.games_played.saturating_add(1);
    player.total_score = player.total_score.saturating_add(result.score as u64);

    match player
        .best_scores
        .iter_mut()
        .find(|b| b.game_type == result.game_type && b.difficulty == result.difficulty)
    {
        Some(best) => {
            if result.score > best.score {
                best.score = result.score;
            }
        }
        None => player.best_scores.push(BestScore {
            game_type: result.game_type,
            difficulty: result.difficulty,
            score: result.score,
        }),
    }

    player.recent_games.insert(
        0,
        RecentGame {
            game_type: result.game_type,
            difficulty: result.difficulty,
            score: result.score,
            time_spent_secs: result.time_spent_secs,
            moves: result.moves,
            played_at: now,
        },
    );
    player.recent_games.truncate(RECENT_GAMES_LIMIT);

    for def in unlocked {
        if !player.achievements.iter().any(|a| a.as_str() == def.id) {
            player.achievements.push(def.id.to_string());
        }
    }

    player.last_played = now;
}

// ==================== TABLES ====================

/// Session links ephemeral connection to stable player
/// PRIVATE: Links connection identity to player ID (no PII)
#[table(name = session)]
pub struct Session {
    #[primary_key]
    pub connection_id: Identity,

    /// Stable account ID - verified by the gateway before the session exists
    pub player_id: String,

    /// When this session was created
    pub connected_at: Timestamp,
}

/// Identities allowed to call gateway/admin reducers (session creation,
/// deletes on behalf of users, bulk restore)
#[table(name = authorized_gateway)]
pub struct AuthorizedGateway {
    #[primary_key]
    pub identity: Identity,
}

/// Per-account aggregate: cumulative stats, bests, achievements, recent games
/// PRIVATE: Clients access their own row via the my_player view
#[table(name = player)]
#[derive(Clone)]
pub struct Player {
    #[primary_key]
    pub id: String,

    /// Display name shown on boards
    pub name: String,

    /// Count of accepted submissions, never decreases
    pub games_played: u32,

    /// Sum of all submitted scores, never decreases
    pub total_score: u64,

    /// Highest score per (game type, difficulty) mode, one entry per mode
    /// ever played, each monotonically non-decreasing
    pub best_scores: Vec<BestScore>,

    /// Unlocked achievement ids, append-only; a grant is never revoked
    pub achievements: Vec<String>,

    /// Last RECENT_GAMES_LIMIT results, most recent first
    pub recent_games: Vec<RecentGame>,

    pub created_at: Timestamp,
    pub last_played: Timestamp,
}

impl Player {
    /// Zero-state aggregate created at account creation
    pub fn new(id: String, name: String, now: Timestamp) -> Self {
        Player {
            id,
            name,
            games_played: 0,
            total_score: 0,
            best_scores: Vec::new(),
            achievements: Vec::new(),
            recent_games: Vec::new(),
            created_at: now,
            last_played: now,
        }
    }

    /// Best score for one mode, absent if the mode was never played
    pub fn best_for(&self, game_type: GameType, difficulty: Difficulty) -> Option<u32> {
        self.best_scores
            .iter()
            .find(|b| b.game_type == game_type && b.difficulty == difficulty)
            .map(|b| b.score)
    }
}

/// Append-only score ledger, one row per accepted submission. This stream is
/// the source of truth; the aggregate is derived from it inside the same
/// transaction. Rows are never mutated, only removed by account deletion.
#[table(name = score_record, public)]
#[derive(Clone)]
pub struct ScoreRecord {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub player_id: String,

    pub game_type: GameType,
    pub difficulty: Difficulty,

    pub score: u32,

    /// Wall-clock duration of the game in seconds
    pub time_spent_secs: u32,

    /// Moves/inputs used; 0 means a flawless run
    pub moves: u32,

    #[index(btree)]
    pub created_at: Timestamp,
}

/// Static achievement definitions, seeded at init for client display
#[table(name = achievement_catalog, public)]
pub struct AchievementCatalogEntry {
    #[primary_key]
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub points: u32,
}

/// Unlock feed/audit: one row per grant ever. A submitting client observes
/// its newly unlocked achievements as inserts here.
#[table(name = achievement_unlock, public)]
pub struct AchievementUnlock {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub player_id: String,

    pub achievement_id: String,
    pub unlocked_at: Timestamp,
}

/// Idempotency tokens already folded into the aggregate. A resubmission
/// carrying a recorded token is acknowledged without writing anything.
#[table(name = processed_submission)]
pub struct ProcessedSubmission {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub player_id: String,

    pub token: String,
    pub submitted_at: Timestamp,
}

/// Materialized per-mode ranking: group-by-max over the ledger, refreshed
/// after every accepted submission for the submitted mode
#[table(name = mode_board_entry, public)]
pub struct ModeBoardEntry {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub game_type: GameType,
    pub difficulty: Difficulty,

    /// 1-based position; ties share a position, the next distinct skips
    pub position: u32,

    pub player_id: String,

    /// Player name (denormalized for display)
    pub player_name: String,

    pub best_score: u32,

    /// How many games this player has submitted in this mode
    pub games_in_mode: u32,
}

/// Materialized total-score ranking across all players
#[table(name = top_player_entry, public)]
pub struct TopPlayerEntry {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub position: u32,
    pub player_id: String,
    pub player_name: String,
    pub total_score: u64,
    pub games_played: u32,
    pub achievement_count: u32,
}

/// Requester-scoped score listing produced by request_score_board.
/// SECURITY: Public table with RLS - each client sees only its own rows.
#[table(name = score_board_entry, public)]
pub struct ScoreBoardEntry {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub requested_by: Identity,

    pub position: u32,
    pub score_record_id: u64,
    pub player_id: String,
    pub player_name: String,
    pub game_type: GameType,
    pub difficulty: Difficulty,
    pub score: u32,
    pub time_spent_secs: u32,
    pub created_at: Timestamp,

    /// When this listing was computed, for cleanup
    pub computed_at: Timestamp,
}

/// Requester-scoped rank answer produced by request_rank
#[table(name = rank_snapshot, public)]
pub struct RankSnapshot {
    #[primary_key]
    pub requested_by: Identity,

    pub player_id: String,
    pub player_name: String,
    pub total_score: u64,

    /// 1 + count of players with a strictly greater total score
    pub overall_rank: u32,

    /// Mode the game rank was computed for, when one was requested
    pub game_type: Option<GameType>,
    pub game_difficulty: Option<Difficulty>,

    /// Absent when the player has no record in the requested mode
    pub game_rank: Option<u32>,
    pub game_best_score: Option<u32>,

    pub computed_at: Timestamp,
}

/// Requester-scoped statistics payload produced by request_statistics
#[table(name = statistics_snapshot, public)]
pub struct StatisticsSnapshot {
    #[primary_key]
    pub requested_by: Identity,

    pub player_id: String,

    /// JSON: overview, gameTypeStats, difficultyStats, recentActivity,
    /// topScores, achievementProgress
    pub payload: String,

    pub computed_at: Timestamp,
}

/// Schedule table for the background cleanup task
#[table(name = cleanup_schedule, scheduled(cleanup_stale_data))]
pub struct CleanupSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    /// When to run the cleanup
    pub scheduled_at: ScheduleAt,
}

// ==================== VIEWS ====================

/// View: Returns only the current user's player data
/// This is the secure way for clients to access their own aggregate
#[view(name = my_player, public)]
fn my_player(ctx: &spacetimedb::ViewContext) -> Option<Player> {
    let session = ctx.db.session().connection_id().find(ctx.sender)?;
    ctx.db.player().id().find(&session.player_id)
}

// ==================== ROW LEVEL SECURITY ====================

/// RLS Filter: clients see only their own ledger rows. Global listings are
/// served by the materialized board tables instead.
#[client_visibility_filter]
const SCORE_RECORD_VISIBILITY: Filter = Filter::Sql(
    "SELECT sr.* FROM score_record sr
     JOIN session s WHERE sr.player_id = s.player_id AND s.connection_id = :sender",
);

/// RLS Filter: clients see only their own unlock feed
#[client_visibility_filter]
const ACHIEVEMENT_UNLOCK_VISIBILITY: Filter = Filter::Sql(
    "SELECT au.* FROM achievement_unlock au
     JOIN session s WHERE au.player_id = s.player_id AND s.connection_id = :sender",
);

/// RLS Filter: requested listings are visible to the requester only
#[client_visibility_filter]
const SCORE_BOARD_VISIBILITY: Filter =
    Filter::Sql("SELECT * FROM score_board_entry WHERE requested_by = :sender");

#[client_visibility_filter]
const RANK_SNAPSHOT_VISIBILITY: Filter =
    Filter::Sql("SELECT * FROM rank_snapshot WHERE requested_by = :sender");

#[client_visibility_filter]
const STATISTICS_SNAPSHOT_VISIBILITY: Filter =
    Filter::Sql("SELECT * FROM statistics_snapshot WHERE requested_by = :sender");

// ==================== REDUCERS ====================

/// Create a verified session for a client identity
/// Called by the gateway AFTER verifying the client's credential; only
/// authorized gateway identities may call this
#[reducer]
pub fn create_session(
    ctx: &ReducerContext,
    client_identity: String,
    player_id: String,
) -> Result<(), String> {
    require_gateway(ctx)?;

    let identity = Identity::from_hex(&client_identity)
        .map_err(|_| "Invalid identity hex string".to_string())?;

    // Delete stale sessions: same player (unclean reconnect) OR same
    // connection_id (prevents PK conflict)
    let stale_sessions: Vec<Identity> = ctx
        .db
        .session()
        .iter()
        .filter(|s| s.player_id == player_id || s.connection_id == identity)
        .map(|s| s.connection_id)
        .collect();
    for conn_id in stale_sessions {
        ctx.db.session().connection_id().delete(&conn_id);
    }

    ctx.db.session().insert(Session {
        connection_id: identity,
        player_id: player_id.clone(),
        connected_at: ctx.timestamp,
    });

    log::info!(
        "[SESSION] created player:{} ws:{}",
        &player_id[..8.min(player_id.len())],
        &client_identity[..8.min(client_identity.len())]
    );
    Ok(())
}

/// Drop the session when the connection goes away
#[reducer(client_disconnected)]
pub fn on_disconnect(ctx: &ReducerContext) {
    if ctx.db.session().connection_id().find(&ctx.sender).is_some() {
        ctx.db.session().connection_id().delete(&ctx.sender);
    }
}

/// Player connects to the game
/// Creates the zero-state aggregate on first connect (account creation);
/// afterwards refreshes the display name and last-played stamp
#[reducer]
pub fn connect(ctx: &ReducerContext, name: String) -> Result<(), String> {
    let session = ctx
        .db
        .session()
        .connection_id()
        .find(&ctx.sender)
        .ok_or("No session found".to_string())?;
    let name = validate_name(&name)?;

    match ctx.db.player().id().find(&session.player_id) {
        Some(mut player) => {
            player.name = name;
            player.last_played = ctx.timestamp;
            ctx.db.player().id().update(player);
        }
        None => {
            ctx.db
                .player()
                .insert(Player::new(session.player_id.clone(), name, ctx.timestamp));
            log::info!("[PLAYER] created id:{}", session.player_id);
        }
    }
    Ok(())
}

/// Profile rename; keeps the denormalized board names in sync
#[reducer]
pub fn set_display_name(ctx: &ReducerContext, name: String) -> Result<(), String> {
    let mut player = get_player(ctx)?;
    let name = validate_name(&name)?;

    player.name = name.clone();
    let player_id = player.id.clone();
    ctx.db.player().id().update(player);

    let mode_entries: Vec<ModeBoardEntry> = ctx
        .db
        .mode_board_entry()
        .iter()
        .filter(|e| e.player_id == player_id)
        .collect();
    for mut entry in mode_entries {
        entry.player_name = name.clone();
        ctx.db.mode_board_entry().id().update(entry);
    }

    let top_entries: Vec<TopPlayerEntry> = ctx
        .db
        .top_player_entry()
        .iter()
        .filter(|e| e.player_id == player_id)
        .collect();
    for mut entry in top_entries {
        entry.player_name = name.clone();
        ctx.db.top_player_entry().id().update(entry);
    }

    Ok(())
}

/// Submit a finished game: the write path of the whole system.
///
/// Runs as one transaction, so the ledger append, achievement grants,
/// aggregate fold and board refreshes all commit or roll back together -
/// two overlapping submissions for the same player cannot lose updates.
/// Achievements are evaluated against the aggregate BEFORE this result is
/// folded in; cumulative thresholds use the +1 lookahead so milestones fire
/// exactly on the crossing submission.
#[reducer]
pub fn submit_score(
    ctx: &ReducerContext,
    game_type: GameType,
    difficulty: Difficulty,
    score: u32,
    time_spent_secs: u32,
    moves: u32,
    submission_token: Option<String>,
) -> Result<(), String> {
    let player = get_player(ctx)?;
    validate_submission(score, time_spent_secs, moves)?;

    // Idempotent retry: a token we already folded in is acknowledged
    // without writing anything, so a timed-out client can resubmit safely
    if let Some(token) = &submission_token {
        let seen = ctx
            .db
            .processed_submission()
            .player_id()
            .filter(&player.id)
            .any(|p| &p.token == token);
        if seen {
            log::info!("[SCORE] duplicate token ignored player:{}", player.id);
            return Ok(());
        }
    }

    let result = GameResult {
        game_type,
        difficulty,
        score,
        time_spent_secs,
        moves,
    };

    // Append to the ledger
    ctx.db.score_record().insert(ScoreRecord {
        id: 0, // auto_inc
        player_id: player.id.clone(),
        game_type,
        difficulty,
        score,
        time_spent_secs,
        moves,
        created_at: ctx.timestamp,
    });

    // Evaluate against the pre-fold aggregate
    let unlocked = achievements::evaluate(&player, &result);

    let mut player = player;
    apply_result(&mut player, &result, ctx.timestamp, &unlocked);

    for def in &unlocked {
        ctx.db.achievement_unlock().insert(AchievementUnlock {
            id: 0, // auto_inc
            player_id: player.id.clone(),
            achievement_id: def.id.to_string(),
            unlocked_at: ctx.timestamp,
        });
        log::info!(
            "[ACHIEVEMENT] unlocked player:{} id:{} points:{}",
            player.id,
            def.id,
            def.points
        );
    }

    if let Some(token) = submission_token {
        ctx.db.processed_submission().insert(ProcessedSubmission {
            id: 0, // auto_inc
            player_id: player.id.clone(),
            token,
            submitted_at: ctx.timestamp,
        });
    }

    log::info!(
        "[SCORE] recorded player:{} game:{} difficulty:{} score:{}",
        player.id,
        game_type.key(),
        difficulty.key(),
        score
    );

    ctx.db.player().id().update(player);

    refresh_mode_board(ctx, game_type, difficulty);
    refresh_top_players(ctx);
    Ok(())
}

/// Compute a score listing for the caller: optional mode filter, optional
/// rolling period, score descending with most-recent-first tie break.
/// Serves both the global top-scores view and the period leaderboard; no
/// session is needed, this is the public read surface.
#[reducer]
pub fn request_score_board(
    ctx: &ReducerContext,
    game_type: Option<GameType>,
    difficulty: Option<Difficulty>,
    period: Option<BoardPeriod>,
    limit: Option<u32>,
) -> Result<(), String> {
    let limit = limit.unwrap_or(DEFAULT_BOARD_LIMIT).clamp(1, MAX_BOARD_LIMIT) as usize;

    // Replace the caller's previous listing
    let stale: Vec<u64> = ctx
        .db
        .score_board_entry()
        .requested_by()
        .filter(&ctx.sender)
        .map(|e| e.id)
        .collect();
    for id in stale {
        ctx.db.score_board_entry().id().delete(&id);
    }

    let since = period.map(|p| ranking::window_start(ctx.timestamp, p));
    let records: Vec<ScoreRecord> = ctx.db.score_record().iter().collect();
    let top = ranking::top_scores(&records, game_type, difficulty, since, limit);

    for (i, record) in top.iter().enumerate() {
        let player_name = ctx
            .db
            .player()
            .id()
            .find(&record.player_id)
            .map(|p| p.name)
            .unwrap_or_else(|| "Anonymous".to_string());
        ctx.db.score_board_entry().insert(ScoreBoardEntry {
            id: 0, // auto_inc
            requested_by: ctx.sender,
            position: (i + 1) as u32,
            score_record_id: record.id,
            player_id: record.player_id.clone(),
            player_name,
            game_type: record.game_type,
            difficulty: record.difficulty,
            score: record.score,
            time_spent_secs: record.time_spent_secs,
            created_at: record.created_at,
            computed_at: ctx.timestamp,
        });
    }
    Ok(())
}

/// Compute a player's standing for the caller: overall rank by total score,
/// plus their rank within one mode when a game type is given
#[reducer]
pub fn request_rank(
    ctx: &ReducerContext,
    player_id: String,
    game_type: Option<GameType>,
    difficulty: Option<Difficulty>,
) -> Result<(), String> {
    let target = ctx
        .db
        .player()
        .id()
        .find(&player_id)
        .ok_or("Player not found".to_string())?;

    let players: Vec<Player> = ctx.db.player().iter().collect();
    let overall_rank =
        ranking::overall_rank(&players, &player_id).ok_or("Player not found".to_string())?;

    let mut game_difficulty = None;
    let mut game_rank = None;
    let mut game_best_score = None;
    if let Some(gt) = game_type {
        let records: Vec<ScoreRecord> = ctx.db.score_record().iter().collect();
        if let Some(standing) = ranking::game_rank(&records, &player_id, gt, difficulty) {
            game_difficulty = Some(standing.difficulty);
            game_rank = Some(standing.rank);
            game_best_score = Some(standing.best_score);
        }
    }

    if ctx.db.rank_snapshot().requested_by().find(&ctx.sender).is_some() {
        ctx.db.rank_snapshot().requested_by().delete(&ctx.sender);
    }
    ctx.db.rank_snapshot().insert(RankSnapshot {
        requested_by: ctx.sender,
        player_id,
        player_name: target.name,
        total_score: target.total_score,
        overall_rank,
        game_type,
        game_difficulty,
        game_rank,
        game_best_score,
        computed_at: ctx.timestamp,
    });
    Ok(())
}

/// Compute the full statistics payload for a player. Requires a session;
/// any signed-in player may look at another player's statistics.
#[reducer]
pub fn request_statistics(ctx: &ReducerContext, player_id: String) -> Result<(), String> {
    get_player(ctx)?;

    let target = ctx
        .db
        .player()
        .id()
        .find(&player_id)
        .ok_or("Player not found".to_string())?;
    let records: Vec<ScoreRecord> = ctx
        .db
        .score_record()
        .player_id()
        .filter(&player_id)
        .collect();

    let payload = stats::statistics_payload(&target, &records, ctx.timestamp);

    if ctx
        .db
        .statistics_snapshot()
        .requested_by()
        .find(&ctx.sender)
        .is_some()
    {
        ctx.db.statistics_snapshot().requested_by().delete(&ctx.sender);
    }
    ctx.db.statistics_snapshot().insert(StatisticsSnapshot {
        requested_by: ctx.sender,
        player_id,
        payload: payload.to_string(),
        computed_at: ctx.timestamp,
    });
    Ok(())
}

/// Self-service account deletion: aggregate, ledger and derived rows
#[reducer]
pub fn delete_account(ctx: &ReducerContext) -> Result<(), String> {
    let player = get_player(ctx)?;
    purge_player_data(ctx, &player.id)
}

/// Gateway-driven account deletion (admin tooling)
#[reducer]
pub fn admin_delete_player(ctx: &ReducerContext, player_id: String) -> Result<(), String> {
    require_gateway(ctx)?;
    purge_player_data(ctx, &player_id)
}

/// Background cleanup: expired idempotency tokens and requested snapshots
/// whose client is gone
#[reducer]
pub fn cleanup_stale_data(ctx: &ReducerContext, _schedule: CleanupSchedule) {
    let now = ctx.timestamp.to_micros_since_unix_epoch();
    let token_cutoff = now - TOKEN_RETENTION_SECS * 1_000_000;
    let snapshot_cutoff = now - SNAPSHOT_RETENTION_SECS * 1_000_000;
    let mut pruned = 0usize;

    let expired: Vec<u64> = ctx
        .db
        .processed_submission()
        .iter()
        .filter(|p| p.submitted_at.to_micros_since_unix_epoch() < token_cutoff)
        .map(|p| p.id)
        .collect();
    pruned += expired.len();
    for id in expired {
        ctx.db.processed_submission().id().delete(&id);
    }

    let gone = |requested_by: &Identity, computed_at: Timestamp| {
        ctx.db.session().connection_id().find(requested_by).is_none()
            && computed_at.to_micros_since_unix_epoch() < snapshot_cutoff
    };

    let stale_boards: Vec<u64> = ctx
        .db
        .score_board_entry()
        .iter()
        .filter(|e| gone(&e.requested_by, e.computed_at))
        .map(|e| e.id)
        .collect();
    pruned += stale_boards.len();
    for id in stale_boards {
        ctx.db.score_board_entry().id().delete(&id);
    }

    let stale_ranks: Vec<Identity> = ctx
        .db
        .rank_snapshot()
        .iter()
        .filter(|s| gone(&s.requested_by, s.computed_at))
        .map(|s| s.requested_by)
        .collect();
    pruned += stale_ranks.len();
    for requested_by in stale_ranks {
        ctx.db.rank_snapshot().requested_by().delete(&requested_by);
    }

    let stale_stats: Vec<Identity> = ctx
        .db
        .statistics_snapshot()
        .iter()
        .filter(|s| gone(&s.requested_by, s.computed_at))
        .map(|s| s.requested_by)
        .collect();
    pruned += stale_stats.len();
    for requested_by in stale_stats {
        ctx.db.statistics_snapshot().requested_by().delete(&requested_by);
    }

    if pruned > 0 {
        log::info!("[CLEANUP] pruned {} stale rows", pruned);
    }
}

/// Initialize module - seed the catalog and set up scheduled tasks
#[reducer(init)]
pub fn init(ctx: &ReducerContext) {
    // In init, ctx.sender is the module owner identity; the gateway runs
    // with the owner token
    if ctx.db.authorized_gateway().identity().find(&ctx.sender).is_none() {
        ctx.db.authorized_gateway().insert(AuthorizedGateway {
            identity: ctx.sender,
        });
    }

    // Seed the achievement catalog for client display
    for def in achievements::CATALOG {
        if ctx
            .db
            .achievement_catalog()
            .id()
            .find(&def.id.to_string())
            .is_none()
        {
            ctx.db.achievement_catalog().insert(AchievementCatalogEntry {
                id: def.id.to_string(),
                name: def.name.to_string(),
                description: def.description.to_string(),
                icon: def.icon.to_string(),
                points: def.points,
            });
        }
    }

    // Check if scheduler already exists to avoid duplicates on hot-reload
    if ctx.db.cleanup_schedule().iter().count() == 0 {
        ctx.db.cleanup_schedule().insert(CleanupSchedule {
            id: 0, // auto_inc will handle this
            scheduled_at: ScheduleAt::Interval(
                std::time::Duration::from_secs(CLEANUP_INTERVAL_SECS).into(),
            ),
        });
    }

    log::info!("Memory trainer module initialized successfully");
}

// ==================== BOARD REFRESH HELPERS ====================

/// Rebuild the materialized board for one (game type, difficulty) mode.
/// Computed as a group-by-max over the ledger, not from aggregates, so the
/// board is correct independently of aggregate state.
fn refresh_mode_board(ctx: &ReducerContext, game_type: GameType, difficulty: Difficulty) {
    let stale: Vec<u64> = ctx
        .db
        .mode_board_entry()
        .iter()
        .filter(|e| e.game_type == game_type && e.difficulty == difficulty)
        .map(|e| e.id)
        .collect();
    for id in stale {
        ctx.db.mode_board_entry().id().delete(&id);
    }

    let records: Vec<ScoreRecord> = ctx.db.score_record().iter().collect();
    let bests = ranking::best_per_user(&records, game_type, Some(difficulty), MODE_BOARD_LIMIT);
    let keys: Vec<u32> = bests.iter().map(|b| b.best_score).collect();
    let positions = ranking::tie_aware_positions(&keys);

    for (entry, position) in bests.into_iter().zip(positions) {
        let player_name = ctx
            .db
            .player()
            .id()
            .find(&entry.player_id)
            .map(|p| p.name)
            .unwrap_or_else(|| "Anonymous".to_string());
        ctx.db.mode_board_entry().insert(ModeBoardEntry {
            id: 0, // auto_inc
            game_type,
            difficulty,
            position,
            player_id: entry.player_id,
            player_name,
            best_score: entry.best_score,
            games_in_mode: entry.games,
        });
    }
}

/// Rebuild the materialized total-score board
fn refresh_top_players(ctx: &ReducerContext) {
    let stale: Vec<u64> = ctx.db.top_player_entry().iter().map(|e| e.id).collect();
    for id in stale {
        ctx.db.top_player_entry().id().delete(&id);
    }

    let players: Vec<Player> = ctx.db.player().iter().collect();
    let ranked = ranking::top_players(&players, TOP_PLAYERS_LIMIT);
    let keys: Vec<u64> = ranked.iter().map(|p| p.total_score).collect();
    let positions = ranking::tie_aware_positions(&keys);

    for (player, position) in ranked.into_iter().zip(positions) {
        ctx.db.top_player_entry().insert(TopPlayerEntry {
            id: 0, // auto_inc
            position,
            player_id: player.id.clone(),
            player_name: player.name.clone(),
            total_score: player.total_score,
            games_played: player.games_played,
            achievement_count: player.achievements.len() as u32,
        });
    }
}

/// Remove every trace of a player: aggregate, ledger, unlock feed, tokens,
/// sessions; then recompute the boards they appeared on
fn purge_player_data(ctx: &ReducerContext, player_id: &str) -> Result<(), String> {
    let player = ctx
        .db
        .player()
        .id()
        .find(&player_id.to_string())
        .ok_or("Player not found".to_string())?;

    let records: Vec<u64> = ctx
        .db
        .score_record()
        .player_id()
        .filter(&player.id)
        .map(|r| r.id)
        .collect();
    for id in records {
        ctx.db.score_record().id().delete(&id);
    }

    let unlocks: Vec<u64> = ctx
        .db
        .achievement_unlock()
        .player_id()
        .filter(&player.id)
        .map(|u| u.id)
        .collect();
    for id in unlocks {
        ctx.db.achievement_unlock().id().delete(&id);
    }

    let tokens: Vec<u64> = ctx
        .db
        .processed_submission()
        .player_id()
        .filter(&player.id)
        .map(|t| t.id)
        .collect();
    for id in tokens {
        ctx.db.processed_submission().id().delete(&id);
    }

    let sessions: Vec<Identity> = ctx
        .db
        .session()
        .iter()
        .filter(|s| s.player_id == player.id)
        .map(|s| s.connection_id)
        .collect();
    for conn_id in sessions {
        ctx.db.session().connection_id().delete(&conn_id);
    }

    let modes: Vec<(GameType, Difficulty)> = player
        .best_scores
        .iter()
        .map(|b| (b.game_type, b.difficulty))
        .collect();
    ctx.db.player().id().delete(&player.id);

    for (game_type, difficulty) in modes {
        refresh_mode_board(ctx, game_type, difficulty);
    }
    refresh_top_players(ctx);

    log::info!("[PLAYER] deleted id:{}", player.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(micros: i64) -> Timestamp {
        Timestamp::from_micros_since_unix_epoch(micros)
    }

    fn result(score: u32) -> GameResult {
        GameResult {
            game_type: GameType::MemoryCard,
            difficulty: Difficulty::Easy,
            score,
            time_spent_secs: 45,
            moves: 8,
        }
    }

    #[test]
    fn validation_names_every_bad_field() {
        assert!(validate_submission(600, 45, 8).is_ok());
        assert!(validate_submission(0, 0, 0).is_ok());

        let err =
            validate_submission(MAX_SINGLE_SCORE + 1, MAX_TIME_SPENT_SECS + 1, 0).unwrap_err();
        assert!(err.contains("score"));
        assert!(err.contains("timeSpent"));
        assert!(!err.contains("moves"));
    }

    #[test]
    fn name_validation_trims_and_bounds() {
        assert_eq!(validate_name("  Dana  ").unwrap(), "Dana");
        assert!(validate_name(" x ").is_err());
        assert!(validate_name(&"x".repeat(51)).is_err());
    }

    #[test]
    fn fold_keeps_best_and_caps_recent_games() {
        let mut player = Player::new("p1".to_string(), "Tester".to_string(), ts(0));
        apply_result(&mut player, &result(600), ts(1), &[]);
        apply_result(&mut player, &result(400), ts(2), &[]);

        assert_eq!(player.games_played, 2);
        assert_eq!(player.total_score, 1000);
        assert_eq!(
            player.best_for(GameType::MemoryCard, Difficulty::Easy),
            Some(600)
        );
        assert!(player
            .best_for(GameType::MemoryCard, Difficulty::Hard)
            .is_none());

        for i in 0..30 {
            apply_result(&mut player, &result(i), ts(3 + i as i64), &[]);
        }
        assert_eq!(player.recent_games.len(), RECENT_GAMES_LIMIT);
        // Most recent first
        assert_eq!(player.recent_games[0].score, 29);
    }
}
