//! End-to-end runs against the in-memory store with a scripted collector

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use leaguesync::adapters::{CredentialStore, LeagueStore, MemoryStore};
use leaguesync::collector::{SnapshotCollector, TacticsRequest};
use leaguesync::config::AppConfig;
use leaguesync::domain::{
    LeagueConfigurationType, NextMatch, RawMarketListing, RawMatch, RawTransfer, RosterEntry,
    SlotSnapshot, SlotStatus, Snapshot, StandingRow, TacticsCapture, TaskStatus,
};
use leaguesync::orchestrator::{RunOrchestrator, SlotOutcome};
use leaguesync::scheduler::TacticsCaptureWorker;
use leaguesync::{Result, SyncError};
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

enum Scripted {
    Snapshot(Snapshot),
    Unreachable,
    Rejected,
}

/// Collector that replays a fixed sequence of responses
struct ScriptedCollector {
    responses: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
    tactics: Option<TacticsCapture>,
}

impl ScriptedCollector {
    fn new(responses: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            tactics: None,
        })
    }

    fn with_tactics(capture: TacticsCapture) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            tactics: Some(capture),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotCollector for ScriptedCollector {
    async fn collect(&self, user_id: Uuid) -> Result<Snapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Snapshot(snapshot)) => Ok(snapshot),
            Some(Scripted::Unreachable) => Err(SyncError::Collector("site unreachable".into())),
            Some(Scripted::Rejected) => Err(SyncError::InvalidCredentials(user_id)),
            None => Err(SyncError::Collector("no response scripted".into())),
        }
    }

    async fn capture_tactics(
        &self,
        _user_id: Uuid,
        request: &TacticsRequest,
    ) -> Result<TacticsCapture> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.tactics {
            Some(capture) => Ok(TacticsCapture {
                team_name: request.team_name.clone(),
                ..capture.clone()
            }),
            None => Err(SyncError::Collector("no tactics scripted".into())),
        }
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn config_type(name: &str, clubs: &[&str]) -> LeagueConfigurationType {
    LeagueConfigurationType {
        name: name.to_string(),
        roster: clubs
            .iter()
            .map(|club| RosterEntry {
                club_name: club.to_string(),
                starting_squad_value: dec!(150),
                fixed_income_per_round: dec!(3),
            })
            .collect(),
    }
}

async fn store_with_catalog() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for config_type in [
        config_type("Premier League", &["Arsenal", "Chelsea", "Liverpool", "Everton"]),
        config_type("Serie A", &["Juventus", "Milan", "Inter", "Roma"]),
    ] {
        store.upsert_configuration_type(&config_type).await.unwrap();
    }
    store
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default_config(true);
    config.run.base_backoff_secs = 0;
    config.run.max_backoff_secs = 0;
    config
}

fn standing(position: i32, club: &str, manager: &str) -> StandingRow {
    StandingRow {
        position,
        club: club.to_string(),
        manager: manager.to_string(),
        played: 10,
        won: 5,
        drawn: 3,
        lost: 2,
        points: 18,
        goals_for: 15,
        goals_against: 9,
        goal_difference: 6,
    }
}

/// Premier League slot managed as Arsenal with the given human managers
fn league_slot(slot_index: u8, managers: &[&str]) -> SlotSnapshot {
    let clubs = ["Arsenal", "Chelsea", "Liverpool", "Everton"];
    let standings = clubs
        .iter()
        .enumerate()
        .map(|(i, club)| standing(i as i32 + 1, club, managers.get(i).copied().unwrap_or("CPU")))
        .collect();

    SlotSnapshot {
        slot_index,
        status: SlotStatus::Ok,
        dashboard_name: "Premier League".to_string(),
        managed_club_name: "Arsenal".to_string(),
        competitor_club_names: clubs.iter().map(|c| c.to_string()).collect(),
        standings,
        squad_values: vec![],
        transfers: vec![],
        market_listings: vec![],
        matches: vec![],
        tactics: None,
        next_match: None,
    }
}

/// Serie A slot managed as Juventus
fn serie_a_slot(slot_index: u8, managers: &[&str]) -> SlotSnapshot {
    let mut slot = league_slot(slot_index, managers);
    let clubs = ["Juventus", "Milan", "Inter", "Roma"];
    slot.dashboard_name = "Serie A".to_string();
    slot.managed_club_name = "Juventus".to_string();
    slot.competitor_club_names = clubs.iter().map(|c| c.to_string()).collect();
    for (row, club) in slot.standings.iter_mut().zip(clubs) {
        row.club = club.to_string();
    }
    slot
}

fn failed(mut slot: SlotSnapshot) -> SlotSnapshot {
    slot.status = SlotStatus::Failed {
        reason: "standings page did not load".to_string(),
    };
    slot
}

fn transfer(player: &str) -> RawTransfer {
    RawTransfer {
        player_name: player.to_string(),
        from: "Chelsea\nBea".to_string(),
        to: "Arsenal\nAna".to_string(),
        position: Some("MF".to_string()),
        round: 4,
        value: "12.5M".to_string(),
        price: "15M".to_string(),
    }
}

fn listing(name: &str) -> RawMarketListing {
    RawMarketListing {
        name: name.to_string(),
        seller_manager: Some("Bea".to_string()),
        seller_team: Some("Chelsea".to_string()),
        nationality: None,
        position: Some("DF".to_string()),
        age: Some(24),
        attack: Some(60),
        defense: Some(78),
        overall: Some(72),
        price: "8M".to_string(),
        value: "7.5M".to_string(),
    }
}

fn match_result(round: i32) -> RawMatch {
    RawMatch {
        round,
        home_team: "Arsenal".to_string(),
        home_manager: Some("Ana".to_string()),
        away_team: "Chelsea".to_string(),
        away_manager: Some("Bea".to_string()),
        home_goals: 2,
        away_goals: 1,
        events: vec![],
        statistics: Default::default(),
        ratings: Default::default(),
        referee: None,
        referee_strictness: None,
    }
}

fn snapshot(collected_at: DateTime<Utc>, slots: Vec<SlotSnapshot>) -> Snapshot {
    Snapshot {
        collected_at,
        slots,
    }
}

fn orchestrator(
    store: &Arc<MemoryStore>,
    collector: Arc<ScriptedCollector>,
    config: &AppConfig,
) -> RunOrchestrator {
    RunOrchestrator::new(store.clone(), store.clone(), collector, config)
}

#[tokio::test]
async fn test_rerun_of_same_snapshot_changes_nothing() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let mut slot = league_slot(1, &["Ana", "Bea", "Cid"]);
    slot.transfers = vec![transfer("Rice")];
    slot.matches = vec![match_result(4)];
    slot.market_listings = vec![listing("Saliba")];
    let snap = snapshot(t0(), vec![slot]);

    let collector = ScriptedCollector::new(vec![
        Scripted::Snapshot(snap.clone()),
        Scripted::Snapshot(snap),
    ]);
    let orch = orchestrator(&store, collector, &test_config());

    let first = orch.run_user(user).await.unwrap();
    let second = orch.run_user(user).await.unwrap();

    let instance = first.instance_for_slot(1).unwrap();
    assert_eq!(second.instance_for_slot(1), Some(instance));
    assert_eq!(store.instance_count().await, 1);

    match &second.slots[0].outcome {
        SlotOutcome::Synced { created, facts, .. } => {
            assert!(!created);
            assert_eq!(facts.new_transfers, 0);
            assert_eq!(facts.new_matches, 0);
            assert_eq!(facts.market_expired, 0);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    assert_eq!(store.list_transfers(instance).await.unwrap().len(), 1);
    assert_eq!(store.list_matches(instance).await.unwrap().len(), 1);
    assert_eq!(store.list_market_listings(instance).await.unwrap().len(), 1);

    let links = store.list_links(user).await.unwrap();
    assert_eq!(links.len(), 1);
    assert!(links[0].is_active);
}

#[tokio::test]
async fn test_joining_manager_keeps_instance() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let collector = ScriptedCollector::new(vec![
        Scripted::Snapshot(snapshot(t0(), vec![league_slot(1, &["Ana", "Bea", "Cid"])])),
        Scripted::Snapshot(snapshot(
            t0() + Duration::hours(6),
            vec![league_slot(1, &["Ana", "Bea", "Cid", "Dov"])],
        )),
    ]);
    let orch = orchestrator(&store, collector, &test_config());

    let first = orch.run_user(user).await.unwrap();
    let second = orch.run_user(user).await.unwrap();

    assert_eq!(first.instance_for_slot(1), second.instance_for_slot(1));
    assert_eq!(store.instance_count().await, 1);
}

#[tokio::test]
async fn test_new_season_starts_new_instance_and_keeps_history() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let mut old_season = league_slot(1, &["Ana", "Bea", "Cid"]);
    old_season.transfers = vec![transfer("Rice")];
    let mut new_season = league_slot(1, &["Eli", "Fay"]);
    new_season.transfers = vec![RawTransfer {
        from: "Chelsea\nFay".to_string(),
        to: "Arsenal\nEli".to_string(),
        ..transfer("Odegaard")
    }];

    let collector = ScriptedCollector::new(vec![
        Scripted::Snapshot(snapshot(t0(), vec![old_season])),
        Scripted::Snapshot(snapshot(t0() + Duration::days(40), vec![new_season])),
    ]);
    let orch = orchestrator(&store, collector, &test_config());

    let first = orch.run_user(user).await.unwrap();
    let second = orch.run_user(user).await.unwrap();

    let old_id = first.instance_for_slot(1).unwrap();
    let new_id = second.instance_for_slot(1).unwrap();
    assert_ne!(old_id, new_id);
    assert_eq!(second.deactivated_links, 1);

    let links = store.list_links(user).await.unwrap();
    let old_link = links.iter().find(|l| l.league_instance_id == old_id).unwrap();
    let new_link = links.iter().find(|l| l.league_instance_id == new_id).unwrap();
    assert!(!old_link.is_active);
    assert!(new_link.is_active);

    let old_transfers = store.list_transfers(old_id).await.unwrap();
    assert_eq!(old_transfers.len(), 1);
    assert_eq!(old_transfers[0].player_name, "Rice");
    assert_eq!(store.list_transfers(new_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_two_slots_in_same_league_get_distinct_instances() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let managers = ["Ana", "Bea", "Cid"];
    let snap = snapshot(t0(), vec![league_slot(1, &managers), league_slot(2, &managers)]);
    let collector = ScriptedCollector::new(vec![
        Scripted::Snapshot(snap.clone()),
        Scripted::Snapshot(snap),
    ]);
    let orch = orchestrator(&store, collector, &test_config());

    let first = orch.run_user(user).await.unwrap();
    assert_ne!(first.instance_for_slot(1), first.instance_for_slot(2));
    assert_eq!(store.instance_count().await, 2);

    let second = orch.run_user(user).await.unwrap();
    assert_ne!(second.instance_for_slot(1), second.instance_for_slot(2));
    assert_eq!(first.instance_for_slot(1), second.instance_for_slot(1));
    assert_eq!(store.instance_count().await, 2);
    assert_eq!(second.deactivated_links, 0);
}

#[tokio::test]
async fn test_listing_missing_from_next_capture_expires() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let mut before = league_slot(1, &["Ana", "Bea", "Cid"]);
    before.market_listings = vec![listing("Saliba"), listing("White")];
    let mut after = league_slot(1, &["Ana", "Bea", "Cid"]);
    after.market_listings = vec![listing("White")];

    let collector = ScriptedCollector::new(vec![
        Scripted::Snapshot(snapshot(t0(), vec![before])),
        Scripted::Snapshot(snapshot(t0() + Duration::hours(1), vec![after])),
    ]);
    let orch = orchestrator(&store, collector, &test_config());

    orch.run_user(user).await.unwrap();
    let report = orch.run_user(user).await.unwrap();

    match &report.slots[0].outcome {
        SlotOutcome::Synced { facts, .. } => {
            assert_eq!(facts.market_active, 1);
            assert_eq!(facts.market_expired, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let instance = report.instance_for_slot(1).unwrap();
    let listings = store.list_market_listings(instance).await.unwrap();
    assert_eq!(listings.len(), 2);
    for listing in listings {
        assert_eq!(listing.is_active, listing.name == "White", "{}", listing.name);
    }
}

#[tokio::test]
async fn test_rejected_credentials_are_invalidated_without_retry() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let collector = ScriptedCollector::new(vec![Scripted::Rejected]);
    let orch = orchestrator(&store, collector.clone(), &test_config());

    let err = orch.run_user(user).await.unwrap_err();
    assert!(err.is_auth_failure());
    assert_eq!(collector.calls(), 1);
    assert_eq!(
        store.invalid_reason(user).await.as_deref(),
        Some("Invalid credentials")
    );
    assert!(store.is_blocked(user).await.unwrap());

    // A later run skips collection entirely
    assert!(orch.run_user(user).await.unwrap_err().is_auth_failure());
    assert_eq!(collector.calls(), 1);
    assert!(store.users_with_valid_credentials().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_site_is_retried_then_succeeds() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let collector = ScriptedCollector::new(vec![
        Scripted::Unreachable,
        Scripted::Snapshot(snapshot(t0(), vec![league_slot(1, &["Ana", "Bea"])])),
    ]);
    let orch = orchestrator(&store, collector.clone(), &test_config());

    let report = orch.run_user(user).await.unwrap();
    assert_eq!(report.attempts, 2);
    assert_eq!(report.synced(), 1);
    assert_eq!(collector.calls(), 2);
}

#[tokio::test]
async fn test_retries_stop_at_max_attempts() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let config = test_config();
    let collector = ScriptedCollector::new(vec![
        Scripted::Unreachable,
        Scripted::Unreachable,
        Scripted::Unreachable,
        Scripted::Unreachable,
    ]);
    let orch = orchestrator(&store, collector.clone(), &config);

    let err = orch.run_user(user).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(collector.calls(), config.run.max_attempts as usize);
    assert!(!store.is_blocked(user).await.unwrap());
}

#[tokio::test]
async fn test_failed_slot_keeps_existing_links_active() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let serie_a = serie_a_slot(2, &["Ugo", "Val"]);
    let collector = ScriptedCollector::new(vec![
        Scripted::Snapshot(snapshot(
            t0(),
            vec![league_slot(1, &["Ana", "Bea"]), serie_a.clone()],
        )),
        Scripted::Snapshot(snapshot(
            t0() + Duration::hours(1),
            vec![league_slot(1, &["Ana", "Bea"]), failed(serie_a)],
        )),
    ]);
    let orch = orchestrator(&store, collector, &test_config());

    orch.run_user(user).await.unwrap();
    let report = orch.run_user(user).await.unwrap();

    assert_eq!(report.failed(), 1);
    assert!(report.deactivation_limited);
    assert_eq!(report.deactivated_links, 0);

    let links = store.list_links(user).await.unwrap();
    assert_eq!(links.len(), 2);
    assert!(links.iter().all(|l| l.is_active));
}

#[tokio::test]
async fn test_season_rollover_retires_old_link_while_another_slot_fails() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let serie_a = serie_a_slot(2, &["Ugo", "Val"]);
    let collector = ScriptedCollector::new(vec![
        Scripted::Snapshot(snapshot(
            t0(),
            vec![league_slot(1, &["Ana", "Bea", "Cid"]), serie_a.clone()],
        )),
        Scripted::Snapshot(snapshot(
            t0() + Duration::days(40),
            vec![league_slot(1, &["Eli", "Fay"]), failed(serie_a)],
        )),
    ]);
    let orch = orchestrator(&store, collector, &test_config());

    let first = orch.run_user(user).await.unwrap();
    let second = tokio_test::assert_ok!(orch.run_user(user).await);

    let old_league = first.instance_for_slot(1).unwrap();
    let serie_a_id = first.instance_for_slot(2).unwrap();
    let new_league = second.instance_for_slot(1).unwrap();
    assert_ne!(old_league, new_league);
    assert_eq!(second.failed(), 1);
    assert!(second.deactivation_limited);
    assert_eq!(second.deactivated_links, 1);

    let links = store.list_links(user).await.unwrap();
    let active = |id: i64| links.iter().find(|l| l.league_instance_id == id).unwrap().is_active;
    assert!(!active(old_league));
    assert!(active(new_league));
    assert!(active(serie_a_id));
    assert_eq!(links.iter().filter(|l| l.is_active).count(), 2);
}

#[tokio::test]
async fn test_failed_slot_in_shared_league_protects_every_link_of_that_league() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let managers = ["Ana", "Bea", "Cid"];
    let collector = ScriptedCollector::new(vec![
        Scripted::Snapshot(snapshot(
            t0(),
            vec![league_slot(1, &managers), league_slot(2, &managers)],
        )),
        Scripted::Snapshot(snapshot(
            t0() + Duration::hours(1),
            vec![league_slot(1, &managers), failed(league_slot(2, &managers))],
        )),
    ]);
    let orch = orchestrator(&store, collector, &test_config());

    orch.run_user(user).await.unwrap();
    let report = orch.run_user(user).await.unwrap();

    // The failed slot's league cannot be told apart from the synced one
    assert!(report.deactivation_limited);
    assert_eq!(report.deactivated_links, 0);
    let links = store.list_links(user).await.unwrap();
    assert_eq!(links.len(), 2);
    assert!(links.iter().all(|l| l.is_active));
}

#[tokio::test]
async fn test_out_of_range_price_rejects_row_not_run() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let mut slot = league_slot(1, &["Ana", "Bea", "Cid"]);
    slot.transfers = vec![
        RawTransfer {
            price: "99999999999999M".to_string(),
            ..transfer("Rice")
        },
        transfer("Saka"),
    ];
    let collector = ScriptedCollector::new(vec![Scripted::Snapshot(snapshot(
        t0(),
        vec![slot, serie_a_slot(2, &["Ugo", "Val"])],
    ))]);
    let orch = orchestrator(&store, collector.clone(), &test_config());

    let report = tokio_test::assert_ok!(orch.run_user(user).await);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.synced(), 2);
    assert_eq!(collector.calls(), 1);

    match &report.slots[0].outcome {
        SlotOutcome::Synced { facts, .. } => {
            assert_eq!(facts.rejected, 1);
            assert_eq!(facts.new_transfers, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    let transfers = store
        .list_transfers(report.instance_for_slot(1).unwrap())
        .await
        .unwrap();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].player_name, "Saka");
}

#[tokio::test]
async fn test_ignored_league_is_skipped_and_never_linked() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let mut config = test_config();
    config.sync.ignored_leagues = vec!["premier league".to_string()];
    let collector = ScriptedCollector::new(vec![Scripted::Snapshot(snapshot(
        t0(),
        vec![league_slot(1, &["Ana", "Bea"])],
    ))]);
    let orch = orchestrator(&store, collector, &config);

    let report = orch.run_user(user).await.unwrap();
    assert!(matches!(report.slots[0].outcome, SlotOutcome::Skipped { .. }));
    assert_eq!(store.instance_count().await, 0);
    assert!(store.list_links(user).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_league_synthesizes_roster_from_standings() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let mut slot = league_slot(1, &["Ana", "Bea"]);
    slot.dashboard_name = "Eredivisie".to_string();
    slot.managed_club_name = "Ajax".to_string();
    slot.competitor_club_names = vec![];
    slot.standings = vec![standing(1, "Ajax", "Ana"), standing(2, "PSV", "Bea")];

    let collector = ScriptedCollector::new(vec![Scripted::Snapshot(snapshot(t0(), vec![slot]))]);
    let orch = orchestrator(&store, collector, &test_config());

    let report = orch.run_user(user).await.unwrap();
    let instance_id = report.instance_for_slot(1).unwrap();
    let instance = store.get_instance(instance_id).await.unwrap().unwrap();
    assert_eq!(instance.name, "Eredivisie");
    let clubs: Vec<&str> = instance.roster.iter().map(|t| t.club_name.as_str()).collect();
    assert_eq!(clubs, vec!["Ajax", "PSV"]);
}

#[tokio::test]
async fn test_tactics_capture_is_scheduled_once_and_runs_when_due() {
    let store = store_with_catalog().await;
    let user = Uuid::new_v4();
    store.add_user(user).await;

    let mut slot = league_slot(1, &["Ana", "Bea"]);
    slot.next_match = Some(NextMatch {
        round: 5,
        countdown_seconds: 3600,
        countdown: Some("01h 00m 00s".to_string()),
        is_cup_match: false,
        referee: None,
        referee_strictness: None,
    });
    let snap = snapshot(t0(), vec![slot]);

    let config = test_config();
    let collector = ScriptedCollector::new(vec![
        Scripted::Snapshot(snap.clone()),
        Scripted::Snapshot(snap),
    ]);
    let orch = orchestrator(&store, collector, &config);

    let first = orch.run_user(user).await.unwrap();
    let second = orch.run_user(user).await.unwrap();
    assert_eq!(first.tasks_scheduled, 1);
    assert_eq!(second.tasks_scheduled, 0);

    let tasks = store.list_tasks(user).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].scheduled_at, t0() + Duration::seconds(3900));

    let capture = TacticsCapture {
        team_name: String::new(),
        round: None,
        game_plan: "Counter attack".to_string(),
        tackling: "Normal".to_string(),
        pressure: 55,
        mentality: 60,
        tempo: 50,
        forwards_tactic: "Attack only".to_string(),
        midfielders_tactic: "Stay in position".to_string(),
        defenders_tactic: "Defend deep".to_string(),
        offside_trap: true,
        marking: "Zonal".to_string(),
    };
    let worker = TacticsCaptureWorker::new(
        store.clone(),
        ScriptedCollector::with_tactics(capture),
        store.clone(),
        config.scheduler.clone(),
    );

    let early = worker.run_once(t0() + Duration::seconds(3899)).await.unwrap();
    assert_eq!(early.claimed, 0);

    let due = worker.run_once(t0() + Duration::seconds(3900)).await.unwrap();
    assert_eq!(due.claimed, 1);
    assert_eq!(due.completed, 1);

    let tasks = store.list_tasks(user).await.unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Completed);

    let instance = first.instance_for_slot(1).unwrap();
    let tactics = store.list_tactics(instance).await.unwrap();
    assert_eq!(tactics.len(), 1);
    assert_eq!(tactics[0].round, 5);
    assert_eq!(tactics[0].team_name, "Arsenal");
}

#[tokio::test]
async fn test_sync_all_runs_only_valid_users() {
    let store = store_with_catalog().await;
    let valid = Uuid::new_v4();
    let rejected = Uuid::new_v4();
    store.add_user(valid).await;
    store.add_user(rejected).await;
    store.invalidate(rejected, "Invalid credentials").await.unwrap();

    let collector = ScriptedCollector::new(vec![Scripted::Snapshot(snapshot(
        t0(),
        vec![league_slot(1, &["Ana", "Bea"])],
    ))]);
    let orch = orchestrator(&store, collector.clone(), &test_config());

    let results = orch.run_all().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, valid);
    assert!(results[0].1.is_ok());
    assert_eq!(collector.calls(), 1);
}
