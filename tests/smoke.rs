// ABOUTME: End-to-end smoke tests for ruleward sessions across failover and restore.
// ABOUTME: Runs the prefix-matching scenarios against every store backend and every supported strategy pair.

use std::sync::Arc;

use ruleward_core::{Fact, Rule, RuleProgram, SessionOptions, Value};
use ruleward_session::SessionManager;
use ruleward_store::{ComponentTag, FileStore, MemoryStore, SnapshotStore, SqliteStore};
use tempfile::TempDir;
use ulid::Ulid;

fn prefix_program() -> Arc<RuleProgram> {
    Arc::new(RuleProgram::new(vec![
        Rule::new("prefix_match")
            .when("String")
            .when("Person")
            .filter(|t| match (t.fact(0).str("value"), t.fact(1).str("name")) {
                (Some(prefix), Some(name)) => name.starts_with(prefix),
                _ => false,
            })
            .then(|t, ctx| ctx.push_global("results", t.fact(1).str("name").unwrap_or_default())),
    ]))
}

fn person(name: &str, age: i64) -> Fact {
    Fact::new("Person").with("name", name).with("age", age)
}

fn names(values: Vec<Value>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// One store of each kind. The TempDir must outlive the stores.
fn stores(dir: &TempDir) -> Vec<(&'static str, Arc<dyn SnapshotStore>)> {
    let memory: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
    let file: Arc<dyn SnapshotStore> = Arc::new(FileStore::open(dir.path().join("files")).unwrap());
    let sqlite: Arc<dyn SnapshotStore> =
        Arc::new(SqliteStore::open(&dir.path().join("snapshots.db")).unwrap());
    vec![("memory", memory), ("file", file), ("sqlite", sqlite)]
}

async fn restart(mgr: &SessionManager, id: Ulid, options: SessionOptions) {
    mgr.safepoint(&id).await.unwrap();
    mgr.failover().await;
    assert!(!mgr.is_live(&id).await);
    mgr.restore_session(id, prefix_program(), options).await.unwrap();
}

#[tokio::test]
async fn smoke_prefix_matches_fire_together() {
    let mgr = SessionManager::new(Arc::new(MemoryStore::new()));
    let id = mgr
        .create_session(prefix_program(), SessionOptions::default())
        .await
        .unwrap();

    mgr.insert(&id, Fact::text("M")).await.unwrap();
    mgr.insert(&id, person("Matching Person One", 37)).await.unwrap();
    mgr.insert(&id, person("Toshiya", 35)).await.unwrap();
    mgr.insert(&id, person("Matching Person Two", 40)).await.unwrap();

    assert_eq!(mgr.fire_all_rules(&id).await.unwrap(), 2);
    assert_eq!(
        names(mgr.global(&id, "results").await.unwrap()),
        vec!["Matching Person One", "Matching Person Two"]
    );
}

#[tokio::test]
async fn smoke_fired_match_does_not_refire_after_failover() {
    let dir = TempDir::new().unwrap();
    for (kind, store) in stores(&dir) {
        for options in SessionOptions::supported() {
            let mgr = SessionManager::new(Arc::clone(&store));
            let id = mgr.create_session(prefix_program(), options).await.unwrap();

            mgr.insert(&id, Fact::text("M")).await.unwrap();
            let one = mgr.insert(&id, person("Matching Person One", 37)).await.unwrap();
            assert_eq!(mgr.fire_all_rules(&id).await.unwrap(), 1);

            restart(&mgr, id, options).await;

            // Identity stability: the same handle still names the same fact.
            assert_eq!(
                mgr.fact(&id, one).await.unwrap(),
                Some(person("Matching Person One", 37)),
                "{kind} {options:?}"
            );

            mgr.insert(&id, person("Matching Person Two", 40)).await.unwrap();
            assert_eq!(mgr.fire_all_rules(&id).await.unwrap(), 1, "{kind} {options:?}");
            assert_eq!(
                names(mgr.global(&id, "results").await.unwrap()),
                vec!["Matching Person One", "Matching Person Two"],
                "{kind} {options:?}"
            );
        }
    }
}

#[tokio::test]
async fn smoke_update_survives_failover_with_new_value() {
    let dir = TempDir::new().unwrap();
    for (kind, store) in stores(&dir) {
        for options in SessionOptions::supported() {
            let mgr = SessionManager::new(Arc::clone(&store));
            let id = mgr.create_session(prefix_program(), options).await.unwrap();

            mgr.insert(&id, Fact::text("M")).await.unwrap();
            let handle = mgr.insert(&id, person("Toshiya", 35)).await.unwrap();
            mgr.update(&id, handle, person("Mario", 35)).await.unwrap();

            restart(&mgr, id, options).await;

            assert_eq!(mgr.fire_all_rules(&id).await.unwrap(), 1, "{kind} {options:?}");
            assert_eq!(names(mgr.global(&id, "results").await.unwrap()), vec!["Mario"]);
        }
    }
}

#[tokio::test]
async fn smoke_deleted_fact_is_not_resurrected() {
    let dir = TempDir::new().unwrap();
    for (kind, store) in stores(&dir) {
        for options in SessionOptions::supported() {
            let mgr = SessionManager::new(Arc::clone(&store));
            let id = mgr.create_session(prefix_program(), options).await.unwrap();

            mgr.insert(&id, Fact::text("M")).await.unwrap();
            let mark = mgr.insert(&id, person("Mark", 37)).await.unwrap();
            assert_eq!(mgr.fire_all_rules(&id).await.unwrap(), 1);
            mgr.delete(&id, mark).await.unwrap();

            restart(&mgr, id, options).await;

            assert_eq!(mgr.fact(&id, mark).await.unwrap(), None, "{kind} {options:?}");
            assert_eq!(mgr.fire_all_rules(&id).await.unwrap(), 0, "{kind} {options:?}");
            assert_eq!(mgr.facts(&id).await.unwrap().len(), 1);
        }
    }
}

#[tokio::test]
async fn smoke_deleted_prefix_suppresses_later_matches() {
    let dir = TempDir::new().unwrap();
    for (kind, store) in stores(&dir) {
        for options in SessionOptions::supported() {
            let mgr = SessionManager::new(Arc::clone(&store));
            let id = mgr.create_session(prefix_program(), options).await.unwrap();

            let prefix = mgr.insert(&id, Fact::text("M")).await.unwrap();
            mgr.insert(&id, person("Matching Person One", 37)).await.unwrap();
            mgr.insert(&id, person("Toshiya", 35)).await.unwrap();
            assert_eq!(mgr.fire_all_rules(&id).await.unwrap(), 1);
            assert_eq!(names(mgr.global(&id, "results").await.unwrap()), vec!["Matching Person One"]);

            mgr.delete(&id, prefix).await.unwrap();
            restart(&mgr, id, options).await;
            mgr.clear_global(&id, "results").await.unwrap();

            // The prefix is gone, so a new matching person has nothing to join with.
            mgr.insert(&id, person("Matching Person Two", 40)).await.unwrap();
            assert_eq!(mgr.fire_all_rules(&id).await.unwrap(), 0, "{kind} {options:?}");
            assert!(mgr.global(&id, "results").await.unwrap().is_empty());

            mgr.insert(&id, Fact::text("T")).await.unwrap();
            restart(&mgr, id, options).await;

            assert_eq!(mgr.fire_all_rules(&id).await.unwrap(), 1, "{kind} {options:?}");
            assert_eq!(
                names(mgr.global(&id, "results").await.unwrap()),
                vec!["Toshiya"],
                "{kind} {options:?}"
            );
        }
    }
}

#[tokio::test]
async fn smoke_updates_fire_once_across_two_failovers() {
    let dir = TempDir::new().unwrap();
    for (kind, store) in stores(&dir) {
        for options in SessionOptions::supported() {
            let mgr = SessionManager::new(Arc::clone(&store));
            let id = mgr.create_session(prefix_program(), options).await.unwrap();

            mgr.insert(&id, Fact::text("M")).await.unwrap();
            let mario = mgr.insert(&id, person("Mario", 49)).await.unwrap();
            let toshiya = mgr.insert(&id, person("Toshiya", 45)).await.unwrap();
            assert_eq!(mgr.fire_all_rules(&id).await.unwrap(), 1);
            assert_eq!(names(mgr.global(&id, "results").await.unwrap()), vec!["Mario"]);

            mgr.update(&id, mario, person("SuperMario", 49)).await.unwrap();
            mgr.update(&id, toshiya, person("MegaToshiya", 45)).await.unwrap();
            restart(&mgr, id, options).await;

            assert_eq!(mgr.fire_all_rules(&id).await.unwrap(), 1, "{kind} {options:?}");
            assert_eq!(
                names(mgr.global(&id, "results").await.unwrap()),
                vec!["Mario", "MegaToshiya"],
                "{kind} {options:?}"
            );

            restart(&mgr, id, options).await;
            mgr.clear_global(&id, "results").await.unwrap();

            assert_eq!(mgr.fire_all_rules(&id).await.unwrap(), 0, "{kind} {options:?}");
            assert!(mgr.global(&id, "results").await.unwrap().is_empty());
        }
    }
}

#[tokio::test]
async fn smoke_sessions_stay_isolated_across_shared_failover() {
    let dir = TempDir::new().unwrap();
    for (kind, store) in stores(&dir) {
        let mgr = Arc::new(SessionManager::new(Arc::clone(&store)));
        let options = SessionOptions::default();
        let a = mgr.create_session(prefix_program(), options).await.unwrap();
        let b = mgr.create_session(prefix_program(), options).await.unwrap();

        let task_a = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move {
                mgr.insert(&a, Fact::text("A")).await.unwrap();
                mgr.insert(&a, person("Alice", 30)).await.unwrap();
                mgr.fire_all_rules(&a).await.unwrap()
            })
        };
        let task_b = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move {
                mgr.insert(&b, Fact::text("B")).await.unwrap();
                mgr.insert(&b, person("Bob", 40)).await.unwrap();
                mgr.insert(&b, person("Alice", 30)).await.unwrap();
                mgr.fire_all_rules(&b).await.unwrap()
            })
        };
        assert_eq!(task_a.await.unwrap(), 1);
        assert_eq!(task_b.await.unwrap(), 1);

        mgr.failover().await;
        mgr.restore_session(a, prefix_program(), options).await.unwrap();
        mgr.restore_session(b, prefix_program(), options).await.unwrap();

        assert_eq!(names(mgr.global(&a, "results").await.unwrap()), vec!["Alice"], "{kind}");
        assert_eq!(names(mgr.global(&b, "results").await.unwrap()), vec!["Bob"], "{kind}");
        assert_eq!(mgr.facts(&a).await.unwrap().len(), 2);
        assert_eq!(mgr.facts(&b).await.unwrap().len(), 3);
    }
}

#[tokio::test]
async fn smoke_repeated_safepoints_are_byte_identical() {
    let dir = TempDir::new().unwrap();
    for (kind, store) in stores(&dir) {
        for options in SessionOptions::supported() {
            let mgr = SessionManager::new(Arc::clone(&store));
            let id = mgr.create_session(prefix_program(), options).await.unwrap();
            mgr.insert(&id, Fact::text("M")).await.unwrap();
            mgr.insert(&id, person("Mark", 37)).await.unwrap();

            mgr.safepoint(&id).await.unwrap();
            let first: Vec<_> = ComponentTag::ALL
                .iter()
                .map(|t| store.get(&id, *t).unwrap())
                .collect();
            mgr.safepoint(&id).await.unwrap();
            let second: Vec<_> = ComponentTag::ALL
                .iter()
                .map(|t| store.get(&id, *t).unwrap())
                .collect();

            assert_eq!(first, second, "{kind} {options:?}");
        }
    }
}

#[tokio::test]
async fn smoke_process_restart_recovers_from_disk() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("snapshots.db");
    let options = SessionOptions::default();

    let id = {
        let mgr = SessionManager::new(Arc::new(SqliteStore::open(&db).unwrap()));
        let id = mgr.create_session(prefix_program(), options).await.unwrap();
        mgr.insert(&id, Fact::text("M")).await.unwrap();
        mgr.insert(&id, person("Matching Person One", 37)).await.unwrap();
        mgr.fire_all_rules(&id).await.unwrap();
        mgr.insert(&id, person("Matching Person Two", 40)).await.unwrap();
        id
    };

    let mgr = SessionManager::new(Arc::new(SqliteStore::open(&db).unwrap()));
    let recovered = mgr.recover_all(prefix_program()).await.unwrap();
    assert_eq!(recovered, vec![id]);

    assert_eq!(mgr.pending_activations(&id).await.unwrap(), 1);
    assert_eq!(mgr.fire_all_rules(&id).await.unwrap(), 1);
    assert_eq!(
        names(mgr.global(&id, "results").await.unwrap()),
        vec!["Matching Person One", "Matching Person Two"]
    );

    mgr.destroy_session(&id).await.unwrap();
    assert!(mgr.stored_sessions().unwrap().is_empty());
}
