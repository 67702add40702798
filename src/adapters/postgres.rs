use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::traits::{CredentialStore, LeagueStore, MarketSyncOutcome};
use crate::domain::{
    InstanceCandidate, LeagueConfigurationType, LeagueInstance, LinkDetails, ManagerFingerprint,
    MarketListing, MatchRatings, MatchResult, NewTask, RosterEntry, ScheduledTask, TacticsRecord,
    TaskStatus, TeamEntry, TransactionType, Transfer, UserLeagueLink,
};
use crate::error::{Result, SyncError};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn instance_from_row(r: &PgRow) -> Result<LeagueInstance> {
    Ok(LeagueInstance {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        roster: r.try_get::<Json<Vec<TeamEntry>>, _>("roster")?.0,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn link_from_row(r: &PgRow) -> Result<UserLeagueLink> {
    Ok(UserLeagueLink {
        user_id: r.try_get("user_id")?,
        league_instance_id: r.try_get("league_instance_id")?,
        is_active: r.try_get("is_active")?,
        standings: r.try_get::<Json<_>, _>("standings")?.0,
        squad_values: r.try_get::<Json<_>, _>("squad_values")?.0,
        managers_by_team: r.try_get::<Json<_>, _>("managers_by_team")?.0,
        last_scraped_at: r.try_get("last_scraped_at")?,
        calendar_scraped: r.try_get("calendar_scraped")?,
        created_at: r.try_get("created_at")?,
    })
}

fn task_from_row(r: &PgRow) -> Result<ScheduledTask> {
    let status: String = r.try_get("status")?;
    Ok(ScheduledTask {
        id: r.try_get("id")?,
        user_id: r.try_get("user_id")?,
        task_type: r.try_get("task_type")?,
        scheduled_at: r.try_get("scheduled_at")?,
        status: TaskStatus::parse(&status)
            .ok_or_else(|| SyncError::Internal(format!("unknown task status {status}")))?,
        metadata: r.try_get::<Json<serde_json::Value>, _>("metadata")?.0,
        created_at: r.try_get("created_at")?,
        claimed_at: r.try_get("claimed_at")?,
        executed_at: r.try_get("executed_at")?,
    })
}

const TASK_COLUMNS: &str =
    "id, user_id, task_type, scheduled_at, status, metadata, created_at, claimed_at, executed_at";

#[async_trait]
impl LeagueStore for PostgresStore {
    // ==================== Catalog ====================

    async fn load_catalog(&self) -> Result<Vec<LeagueConfigurationType>> {
        let rows = sqlx::query("SELECT name, roster FROM league_configuration_types ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| {
                Ok(LeagueConfigurationType {
                    name: r.try_get("name")?,
                    roster: r.try_get::<Json<Vec<RosterEntry>>, _>("roster")?.0,
                })
            })
            .collect()
    }

    #[instrument(skip(self, config_type), fields(name = %config_type.name))]
    async fn upsert_configuration_type(&self, config_type: &LeagueConfigurationType) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO league_configuration_types (name, roster, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (name) DO UPDATE SET
                roster = EXCLUDED.roster,
                updated_at = NOW()
            "#,
        )
        .bind(&config_type.name)
        .bind(Json(&config_type.roster))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Instances ====================

    #[instrument(skip(self))]
    async fn find_candidate_instances(
        &self,
        name: &str,
        requester: Uuid,
    ) -> Result<Vec<InstanceCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT li.id, li.updated_at,
                   BOOL_OR(l.user_id = $2) AS linked_to_requester,
                   COALESCE(
                       JSONB_AGG(l.managers_by_team) FILTER (WHERE l.is_active),
                       '[]'::jsonb
                   ) AS managers
            FROM league_instances li
            JOIN user_league_links l ON l.league_instance_id = li.id
            WHERE LOWER(TRIM(li.name)) = LOWER(TRIM($1))
            GROUP BY li.id, li.updated_at
            HAVING BOOL_OR(l.is_active)
            "#,
        )
        .bind(name)
        .bind(requester)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for r in &rows {
            let managers: Vec<BTreeMap<String, String>> =
                r.try_get::<Json<_>, _>("managers")?.0;
            let mut saved = ManagerFingerprint::default();
            for by_team in &managers {
                saved.extend(&ManagerFingerprint::from_names(
                    by_team.values().map(String::as_str),
                ));
            }
            candidates.push(InstanceCandidate {
                instance_id: r.try_get("id")?,
                updated_at: r.try_get("updated_at")?,
                saved_fingerprint: saved,
                linked_to_requester: r.try_get::<Option<bool>, _>("linked_to_requester")?.unwrap_or(false),
            });
        }

        debug!(count = candidates.len(), "Candidate instances loaded");
        Ok(candidates)
    }

    async fn get_instance(&self, id: i64) -> Result<Option<LeagueInstance>> {
        let row = sqlx::query(
            "SELECT id, name, roster, created_at, updated_at FROM league_instances WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(instance_from_row).transpose()
    }

    #[instrument(skip(self, roster))]
    async fn create_instance(
        &self,
        name: &str,
        roster: &[TeamEntry],
        now: DateTime<Utc>,
    ) -> Result<LeagueInstance> {
        let row = sqlx::query(
            r#"
            INSERT INTO league_instances (name, roster, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            RETURNING id, name, roster, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(Json(roster))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let instance = instance_from_row(&row)?;
        info!(instance_id = instance.id, "Created league instance");
        Ok(instance)
    }

    #[instrument(skip(self))]
    async fn touch_instance(&self, id: i64, name: &str, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE league_instances SET name = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(name)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("league instance {id}")));
        }

        sqlx::query("UPDATE user_league_links SET last_scraped_at = $2 WHERE league_instance_id = $1")
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_instance_roster(
        &self,
        id: i64,
        roster: &[TeamEntry],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE league_instances SET roster = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(Json(roster))
        .bind(now)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("league instance {id}")));
        }
        Ok(())
    }

    // ==================== Links ====================

    #[instrument(skip(self))]
    async fn activate_link(
        &self,
        user_id: Uuid,
        instance_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            INSERT INTO user_league_links (user_id, league_instance_id, is_active, last_scraped_at, created_at)
            VALUES ($1, $2, TRUE, $3, $3)
            ON CONFLICT (user_id, league_instance_id) DO UPDATE SET
                is_active = TRUE,
                last_scraped_at = EXCLUDED.last_scraped_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(user_id)
        .bind(instance_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("inserted")?)
    }

    #[instrument(skip(self, details))]
    async fn update_link_details(
        &self,
        user_id: Uuid,
        instance_id: i64,
        details: &LinkDetails,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE user_league_links SET
                standings = $3,
                squad_values = $4,
                managers_by_team = $5,
                last_scraped_at = $6
            WHERE user_id = $1 AND league_instance_id = $2
            "#,
        )
        .bind(user_id)
        .bind(instance_id)
        .bind(Json(&details.standings))
        .bind(Json(&details.squad_values))
        .bind(Json(&details.managers_by_team))
        .bind(now)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("link {user_id}/{instance_id}")));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn deactivate_links_except(&self, user_id: Uuid, keep: &[i64]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE user_league_links SET is_active = FALSE
            WHERE user_id = $1 AND is_active AND NOT (league_instance_id = ANY($2))
            "#,
        )
        .bind(user_id)
        .bind(keep.to_vec())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn deactivate_replaced_links(
        &self,
        user_id: Uuid,
        keep: &[i64],
        names: &[String],
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE user_league_links l SET is_active = FALSE
            FROM league_instances li
            WHERE li.id = l.league_instance_id
              AND l.user_id = $1
              AND l.is_active
              AND NOT (l.league_instance_id = ANY($2))
              AND LOWER(TRIM(li.name)) = ANY($3)
            "#,
        )
        .bind(user_id)
        .bind(keep.to_vec())
        .bind(names.to_vec())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_links(&self, user_id: Uuid) -> Result<Vec<UserLeagueLink>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, league_instance_id, is_active, standings, squad_values,
                   managers_by_team, last_scraped_at, calendar_scraped, created_at
            FROM user_league_links
            WHERE user_id = $1
            ORDER BY is_active DESC, league_instance_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(link_from_row).collect()
    }

    // ==================== Facts ====================

    #[instrument(skip(self, transfers), fields(count = transfers.len()))]
    async fn upsert_transfers(&self, transfers: &[Transfer]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for t in transfers {
            let row = sqlx::query(
                r#"
                INSERT INTO transfers (
                    league_instance_id, round, player_name, manager_name, seller_manager,
                    buyer_manager, transaction_type, position, base_value, final_price,
                    from_text, to_text, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (league_instance_id, round, player_name, manager_name, final_price)
                DO UPDATE SET
                    seller_manager = EXCLUDED.seller_manager,
                    buyer_manager = EXCLUDED.buyer_manager,
                    transaction_type = EXCLUDED.transaction_type,
                    position = EXCLUDED.position,
                    base_value = EXCLUDED.base_value,
                    from_text = EXCLUDED.from_text,
                    to_text = EXCLUDED.to_text
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(t.league_instance_id)
            .bind(t.round)
            .bind(&t.player_name)
            .bind(&t.manager_name)
            .bind(&t.seller_manager)
            .bind(&t.buyer_manager)
            .bind(t.transaction_type.as_str())
            .bind(&t.position)
            .bind(t.base_value)
            .bind(t.final_price)
            .bind(&t.from_text)
            .bind(&t.to_text)
            .bind(t.created_at)
            .fetch_one(&mut *tx)
            .await?;

            if row.try_get::<bool, _>("inserted")? {
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    #[instrument(skip(self, listings), fields(count = listings.len()))]
    async fn replace_market_listings(
        &self,
        instance_id: i64,
        listings: &[MarketListing],
    ) -> Result<MarketSyncOutcome> {
        let mut tx = self.pool.begin().await?;

        let expired_rows = sqlx::query(
            r#"
            UPDATE market_listings SET is_active = FALSE
            WHERE league_instance_id = $1 AND is_active
            RETURNING name, seller_manager
            "#,
        )
        .bind(instance_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut previously_active = BTreeSet::new();
        for r in &expired_rows {
            previously_active.insert((
                r.try_get::<String, _>("name")?,
                r.try_get::<String, _>("seller_manager")?,
            ));
        }

        let mut seen = BTreeSet::new();
        for l in listings {
            sqlx::query(
                r#"
                INSERT INTO market_listings (
                    league_instance_id, name, seller_manager, nationality, position, age,
                    seller_team, attack, defense, overall, price, base_value, captured_at, is_active
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, TRUE)
                ON CONFLICT (league_instance_id, name, seller_manager) DO UPDATE SET
                    nationality = EXCLUDED.nationality,
                    position = EXCLUDED.position,
                    age = EXCLUDED.age,
                    seller_team = EXCLUDED.seller_team,
                    attack = EXCLUDED.attack,
                    defense = EXCLUDED.defense,
                    overall = EXCLUDED.overall,
                    price = EXCLUDED.price,
                    base_value = EXCLUDED.base_value,
                    captured_at = EXCLUDED.captured_at,
                    is_active = TRUE
                "#,
            )
            .bind(instance_id)
            .bind(&l.name)
            .bind(&l.seller_manager)
            .bind(&l.nationality)
            .bind(&l.position)
            .bind(l.age)
            .bind(&l.seller_team)
            .bind(l.attack)
            .bind(l.defense)
            .bind(l.overall)
            .bind(l.price)
            .bind(l.base_value)
            .bind(l.captured_at)
            .execute(&mut *tx)
            .await?;

            seen.insert((l.name.clone(), l.seller_manager.clone()));
        }

        tx.commit().await?;

        Ok(MarketSyncOutcome {
            active: seen.len() as u64,
            expired: previously_active.difference(&seen).count() as u64,
        })
    }

    #[instrument(skip(self, matches), fields(count = matches.len()))]
    async fn upsert_matches(&self, matches: &[MatchResult]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for m in matches {
            // Detail columns keep the richer earlier scrape when the new one is empty
            let row = sqlx::query(
                r#"
                INSERT INTO match_results (
                    league_instance_id, round, home_team, home_manager, away_team, away_manager,
                    home_goals, away_goals, events, statistics, ratings, referee, referee_strictness
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (league_instance_id, round, home_team, away_team) DO UPDATE SET
                    home_manager = EXCLUDED.home_manager,
                    away_manager = EXCLUDED.away_manager,
                    home_goals = EXCLUDED.home_goals,
                    away_goals = EXCLUDED.away_goals,
                    events = CASE
                        WHEN jsonb_array_length(EXCLUDED.events) > 0 THEN EXCLUDED.events
                        ELSE match_results.events
                    END,
                    statistics = CASE
                        WHEN EXCLUDED.statistics <> '{}'::jsonb THEN EXCLUDED.statistics
                        ELSE match_results.statistics
                    END,
                    ratings = CASE
                        WHEN jsonb_array_length(EXCLUDED.ratings->'home')
                           + jsonb_array_length(EXCLUDED.ratings->'away') > 0 THEN EXCLUDED.ratings
                        ELSE match_results.ratings
                    END,
                    referee = EXCLUDED.referee,
                    referee_strictness = EXCLUDED.referee_strictness
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(m.league_instance_id)
            .bind(m.round)
            .bind(&m.home_team)
            .bind(&m.home_manager)
            .bind(&m.away_team)
            .bind(&m.away_manager)
            .bind(m.home_goals)
            .bind(m.away_goals)
            .bind(Json(&m.events))
            .bind(Json(&m.statistics))
            .bind(Json(&m.ratings))
            .bind(&m.referee)
            .bind(&m.referee_strictness)
            .fetch_one(&mut *tx)
            .await?;

            if row.try_get::<bool, _>("inserted")? {
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    #[instrument(skip(self, record), fields(team = %record.team_name, round = record.round))]
    async fn upsert_tactics(&self, record: &TacticsRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tactics_records (
                league_instance_id, round, team_name, game_plan, tackling, pressure, mentality,
                tempo, forwards_tactic, midfielders_tactic, defenders_tactic, offside_trap,
                marking, captured_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (league_instance_id, round, team_name) DO UPDATE SET
                game_plan = EXCLUDED.game_plan,
                tackling = EXCLUDED.tackling,
                pressure = EXCLUDED.pressure,
                mentality = EXCLUDED.mentality,
                tempo = EXCLUDED.tempo,
                forwards_tactic = EXCLUDED.forwards_tactic,
                midfielders_tactic = EXCLUDED.midfielders_tactic,
                defenders_tactic = EXCLUDED.defenders_tactic,
                offside_trap = EXCLUDED.offside_trap,
                marking = EXCLUDED.marking,
                captured_at = EXCLUDED.captured_at
            "#,
        )
        .bind(record.league_instance_id)
        .bind(record.round)
        .bind(&record.team_name)
        .bind(&record.game_plan)
        .bind(&record.tackling)
        .bind(record.pressure)
        .bind(record.mentality)
        .bind(record.tempo)
        .bind(&record.forwards_tactic)
        .bind(&record.midfielders_tactic)
        .bind(&record.defenders_tactic)
        .bind(record.offside_trap)
        .bind(&record.marking)
        .bind(record.captured_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_transfers(&self, instance_id: i64) -> Result<Vec<Transfer>> {
        let rows = sqlx::query(
            r#"
            SELECT league_instance_id, round, player_name, manager_name, seller_manager,
                   buyer_manager, transaction_type, position, base_value, final_price,
                   from_text, to_text, created_at
            FROM transfers
            WHERE league_instance_id = $1
            ORDER BY round, player_name
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let kind: String = r.try_get("transaction_type")?;
                Ok(Transfer {
                    league_instance_id: r.try_get("league_instance_id")?,
                    round: r.try_get("round")?,
                    player_name: r.try_get("player_name")?,
                    manager_name: r.try_get("manager_name")?,
                    seller_manager: r.try_get("seller_manager")?,
                    buyer_manager: r.try_get("buyer_manager")?,
                    transaction_type: TransactionType::parse(&kind).ok_or_else(|| {
                        SyncError::Internal(format!("unknown transaction type {kind}"))
                    })?,
                    position: r.try_get("position")?,
                    base_value: r.try_get("base_value")?,
                    final_price: r.try_get("final_price")?,
                    from_text: r.try_get("from_text")?,
                    to_text: r.try_get("to_text")?,
                    created_at: r.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn list_market_listings(&self, instance_id: i64) -> Result<Vec<MarketListing>> {
        let rows = sqlx::query(
            r#"
            SELECT league_instance_id, name, seller_manager, nationality, position, age,
                   seller_team, attack, defense, overall, price, base_value, captured_at, is_active
            FROM market_listings
            WHERE league_instance_id = $1
            ORDER BY name, seller_manager
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(MarketListing {
                    league_instance_id: r.try_get("league_instance_id")?,
                    name: r.try_get("name")?,
                    seller_manager: r.try_get("seller_manager")?,
                    nationality: r.try_get("nationality")?,
                    position: r.try_get("position")?,
                    age: r.try_get("age")?,
                    seller_team: r.try_get("seller_team")?,
                    attack: r.try_get("attack")?,
                    defense: r.try_get("defense")?,
                    overall: r.try_get("overall")?,
                    price: r.try_get("price")?,
                    base_value: r.try_get("base_value")?,
                    captured_at: r.try_get("captured_at")?,
                    is_active: r.try_get("is_active")?,
                })
            })
            .collect()
    }

    async fn list_matches(&self, instance_id: i64) -> Result<Vec<MatchResult>> {
        let rows = sqlx::query(
            r#"
            SELECT league_instance_id, round, home_team, home_manager, away_team, away_manager,
                   home_goals, away_goals, events, statistics, ratings, referee, referee_strictness
            FROM match_results
            WHERE league_instance_id = $1
            ORDER BY round, home_team
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(MatchResult {
                    league_instance_id: r.try_get("league_instance_id")?,
                    round: r.try_get("round")?,
                    home_team: r.try_get("home_team")?,
                    home_manager: r.try_get("home_manager")?,
                    away_team: r.try_get("away_team")?,
                    away_manager: r.try_get("away_manager")?,
                    home_goals: r.try_get("home_goals")?,
                    away_goals: r.try_get("away_goals")?,
                    events: r.try_get::<Json<_>, _>("events")?.0,
                    statistics: r.try_get::<Json<_>, _>("statistics")?.0,
                    ratings: r.try_get::<Json<MatchRatings>, _>("ratings")?.0,
                    referee: r.try_get("referee")?,
                    referee_strictness: r.try_get("referee_strictness")?,
                })
            })
            .collect()
    }

    async fn list_tactics(&self, instance_id: i64) -> Result<Vec<TacticsRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT league_instance_id, round, team_name, game_plan, tackling, pressure, mentality,
                   tempo, forwards_tactic, midfielders_tactic, defenders_tactic, offside_trap,
                   marking, captured_at
            FROM tactics_records
            WHERE league_instance_id = $1
            ORDER BY round, team_name
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(TacticsRecord {
                    league_instance_id: r.try_get("league_instance_id")?,
                    round: r.try_get("round")?,
                    team_name: r.try_get("team_name")?,
                    game_plan: r.try_get("game_plan")?,
                    tackling: r.try_get("tackling")?,
                    pressure: r.try_get("pressure")?,
                    mentality: r.try_get("mentality")?,
                    tempo: r.try_get("tempo")?,
                    forwards_tactic: r.try_get("forwards_tactic")?,
                    midfielders_tactic: r.try_get("midfielders_tactic")?,
                    defenders_tactic: r.try_get("defenders_tactic")?,
                    offside_trap: r.try_get("offside_trap")?,
                    marking: r.try_get("marking")?,
                    captured_at: r.try_get("captured_at")?,
                })
            })
            .collect()
    }

    // ==================== Scheduled Tasks ====================

    #[instrument(skip(self, task), fields(user_id = %task.user_id, scheduled_at = %task.scheduled_at))]
    async fn insert_task(&self, task: &NewTask) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
            INSERT INTO scheduled_tasks (user_id, task_type, scheduled_at, status, metadata)
            VALUES ($1, $2, $3, 'pending', $4)
            ON CONFLICT (user_id, task_type, scheduled_at) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(task.user_id)
        .bind(&task.task_type)
        .bind(task.scheduled_at)
        .bind(Json(&task.metadata))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_get::<i64, _>("id"))
            .transpose()
            .map_err(Into::into)
    }

    async fn has_pending_task(
        &self,
        user_id: Uuid,
        task_type: &str,
        instance_id: i64,
        round: i32,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM scheduled_tasks
                WHERE user_id = $1
                  AND task_type = $2
                  AND status = 'pending'
                  AND (metadata->>'league_instance_id')::BIGINT = $3
                  AND (metadata->>'round')::INTEGER = $4
            ) AS pending
            "#,
        )
        .bind(user_id)
        .bind(task_type)
        .bind(instance_id)
        .bind(round)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("pending")?)
    }

    #[instrument(skip(self))]
    async fn claim_due_tasks(
        &self,
        task_type: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ScheduledTask>> {
        let sql = format!(
            r#"
            UPDATE scheduled_tasks SET status = 'running', claimed_at = $2
            WHERE id IN (
                SELECT id FROM scheduled_tasks
                WHERE status = 'pending' AND task_type = $1 AND scheduled_at <= $2
                ORDER BY scheduled_at, id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(task_type)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut tasks = rows.iter().map(task_from_row).collect::<Result<Vec<_>>>()?;
        tasks.sort_by_key(|t| (t.scheduled_at, t.id));
        Ok(tasks)
    }

    async fn complete_task(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_tasks SET status = 'completed', executed_at = $2
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail_task(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_tasks SET
                status = 'failed',
                executed_at = $3,
                metadata = metadata || jsonb_build_object('error', $2::TEXT)
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn fail_stale_claims(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_tasks SET
                status = 'failed',
                executed_at = $2,
                metadata = metadata || '{"error": "claim expired"}'::jsonb
            WHERE status = 'running' AND claimed_at < $1
            "#,
        )
        .bind(cutoff)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_tasks(&self, user_id: Uuid) -> Result<Vec<ScheduledTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE user_id = $1 ORDER BY scheduled_at, id"
        );
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter().map(task_from_row).collect()
    }
}

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn is_blocked(&self, user_id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT is_valid FROM user_credentials WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(!r.try_get::<bool, _>("is_valid")?),
            None => Ok(false),
        }
    }

    #[instrument(skip(self))]
    async fn invalidate(&self, user_id: Uuid, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_credentials (user_id, is_valid, invalidated_at, invalid_reason)
            VALUES ($1, FALSE, NOW(), $2)
            ON CONFLICT (user_id) DO UPDATE SET
                is_valid = FALSE,
                invalidated_at = NOW(),
                invalid_reason = EXCLUDED.invalid_reason
            "#,
        )
        .bind(user_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        info!(%user_id, reason, "Credential invalidated");
        Ok(())
    }

    async fn users_with_valid_credentials(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT user_id FROM user_credentials WHERE is_valid ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| r.try_get::<Uuid, _>("user_id").map_err(Into::into))
            .collect()
    }
}
