//! `PostgresStore` against a live database.
//!
//! Set `LEAGUESYNC_TEST_DATABASE_URL` (or `DATABASE_URL`) to run these;
//! without it every test returns early.

use chrono::{DateTime, Duration, TimeZone, Utc};
use leaguesync::adapters::{LeagueStore, PostgresStore};
use leaguesync::domain::{
    MatchEvent, MatchResult, NewTask, RawMatch, RawTransfer, TaskStatus, Transfer,
};
use rust_decimal_macros::dec;
use std::env;
use uuid::Uuid;

async fn test_store() -> Option<PostgresStore> {
    let Some(url) = env::var("LEAGUESYNC_TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok()
    else {
        eprintln!("Skipping postgres test: set LEAGUESYNC_TEST_DATABASE_URL or DATABASE_URL");
        return None;
    };

    let store = PostgresStore::new(&url, 5)
        .await
        .expect("failed to connect postgres test database");
    store.migrate().await.expect("migrations failed");
    Some(store)
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn raw_transfer(player: &str, price: &str) -> RawTransfer {
    RawTransfer {
        player_name: player.to_string(),
        from: "Chelsea\nBea".to_string(),
        to: "Arsenal\nAna".to_string(),
        position: Some("MF".to_string()),
        round: 4,
        value: "12.5M".to_string(),
        price: price.to_string(),
    }
}

fn raw_match(events: Vec<MatchEvent>, home_goals: i32) -> RawMatch {
    RawMatch {
        round: 4,
        home_team: "Arsenal".to_string(),
        home_manager: Some("Ana".to_string()),
        away_team: "Chelsea".to_string(),
        away_manager: Some("Bea".to_string()),
        home_goals,
        away_goals: 1,
        events,
        statistics: Default::default(),
        ratings: Default::default(),
        referee: None,
        referee_strictness: None,
    }
}

#[tokio::test]
async fn test_transfer_upsert_counts_only_new_rows() {
    let Some(store) = test_store().await else { return };
    let instance = store.create_instance("Premier League", &[], t0()).await.unwrap();

    let transfers = vec![
        Transfer::from_raw(instance.id, &raw_transfer("Rice", "15M"), t0()).unwrap(),
        Transfer::from_raw(instance.id, &raw_transfer("Saka", "20M"), t0()).unwrap(),
    ];
    assert_eq!(store.upsert_transfers(&transfers).await.unwrap(), 2);
    assert_eq!(store.upsert_transfers(&transfers).await.unwrap(), 0);

    let stored = store.list_transfers(instance.id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().any(|t| t.final_price == dec!(20)));
}

#[tokio::test]
async fn test_out_of_range_price_is_not_retried() {
    let Some(store) = test_store().await else { return };
    let instance = store.create_instance("Premier League", &[], t0()).await.unwrap();

    let mut transfer = Transfer::from_raw(instance.id, &raw_transfer("Rice", "15M"), t0()).unwrap();
    transfer.final_price = dec!(10000000000000);

    let err = tokio_test::assert_err!(store.upsert_transfers(&[transfer]).await);
    assert!(!err.is_transient(), "{err}");
    assert!(store.list_transfers(instance.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_refined_match_keeps_earlier_events() {
    let Some(store) = test_store().await else { return };
    let instance = store.create_instance("Premier League", &[], t0()).await.unwrap();

    let goal = MatchEvent {
        minute: 17,
        kind: "goal".to_string(),
        side: "home".to_string(),
        player: Some("Saka".to_string()),
        detail: None,
    };
    let detailed = MatchResult::from_raw(instance.id, &raw_match(vec![goal.clone()], 1)).unwrap();
    let bare = MatchResult::from_raw(instance.id, &raw_match(vec![], 2)).unwrap();

    assert_eq!(store.upsert_matches(&[detailed]).await.unwrap(), 1);
    assert_eq!(store.upsert_matches(&[bare]).await.unwrap(), 0);

    let stored = store.list_matches(instance.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].home_goals, 2);
    assert_eq!(stored[0].events, vec![goal]);
}

#[tokio::test]
async fn test_due_tasks_are_claimed_once() {
    let Some(store) = test_store().await else { return };
    let user = Uuid::new_v4();
    let task_type = format!("capture_{}", user.simple());

    for offset in [0, 60] {
        let task = NewTask {
            user_id: user,
            task_type: task_type.clone(),
            scheduled_at: t0() + Duration::seconds(offset),
            metadata: serde_json::json!({ "round": 4 }),
        };
        assert!(store.insert_task(&task).await.unwrap().is_some());
        // same natural key
        assert!(store.insert_task(&task).await.unwrap().is_none());
    }

    let due = store.claim_due_tasks(&task_type, t0() + Duration::seconds(30), 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].status, TaskStatus::Running);
    assert!(store
        .claim_due_tasks(&task_type, t0() + Duration::seconds(30), 10)
        .await
        .unwrap()
        .is_empty());

    let later = t0() + Duration::hours(2);
    assert_eq!(store.fail_stale_claims(t0() + Duration::hours(1), later).await.unwrap(), 1);
    let tasks = store.list_tasks(user).await.unwrap();
    let expired = tasks.iter().find(|t| t.id == due[0].id).unwrap();
    assert_eq!(expired.status, TaskStatus::Failed);
    assert_eq!(expired.metadata["error"], "claim expired");
}

#[tokio::test]
async fn test_replaced_links_deactivate_by_league_name() {
    let Some(store) = test_store().await else { return };
    let user = Uuid::new_v4();

    let old_season = store.create_instance("Premier League", &[], t0()).await.unwrap();
    let new_season = store.create_instance("premier league ", &[], t0()).await.unwrap();
    let other = store.create_instance("Serie A", &[], t0()).await.unwrap();
    for id in [old_season.id, new_season.id, other.id] {
        store.activate_link(user, id, t0()).await.unwrap();
    }

    let retired = store
        .deactivate_replaced_links(user, &[new_season.id], &["premier league".to_string()])
        .await
        .unwrap();
    assert_eq!(retired, 1);

    let links = store.list_links(user).await.unwrap();
    let active = |id: i64| links.iter().find(|l| l.league_instance_id == id).unwrap().is_active;
    assert!(!active(old_season.id));
    assert!(active(new_season.id));
    assert!(active(other.id));
}
