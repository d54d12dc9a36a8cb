//! End-to-end reconciliation scenarios over a scripted fleet.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use nebula_client::mock::MockFleet;
use nebula_client::NodeConnector;
use nebula_common::NebulaResult;
use nebula_ingest::scan::{PartitionUnit, SourceScanner};
use nebula_ingest::{IngestSpec, SpecState, TaskPayload, TaskType};
use nebula_meta::{ConfigLoader, IngestionSource, NodeId, Table};
use nebula_server::{NodeSync, Runtime, SyncOptions, TickReport};

/// Scripted partition enumeration, mutable between ticks.
#[derive(Default)]
struct ScriptedScanner {
    units: Mutex<HashMap<(String, usize), Vec<PartitionUnit>>>,
}

impl ScriptedScanner {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set(&self, table: &str, index: usize, units: &[(&str, u64, u64)]) {
        self.units.lock().unwrap().insert(
            (table.to_string(), index),
            units
                .iter()
                .map(|(uri, size, mtime)| PartitionUnit {
                    uri: (*uri).to_string(),
                    size: *size,
                    mtime: *mtime,
                })
                .collect(),
        );
    }
}

impl SourceScanner for ScriptedScanner {
    fn scan(&self, table: &Table, source: &IngestionSource) -> NebulaResult<Vec<PartitionUnit>> {
        let index = table
            .sources
            .iter()
            .position(|s| s == source)
            .unwrap_or_default();
        Ok(self
            .units
            .lock()
            .unwrap()
            .get(&(table.name.clone(), index))
            .cloned()
            .unwrap_or_default())
    }
}

struct Harness {
    _dir: TempDir,
    conf_path: std::path::PathBuf,
    fleet: Arc<MockFleet>,
    scanner: Arc<ScriptedScanner>,
    runtime: Arc<Runtime>,
    sync: NodeSync,
}

fn conf_doc(hosts: &[&str], extra_source: bool) -> String {
    let mut doc = String::from("version: \"1\"\nnodes:\n");
    for host in hosts {
        doc.push_str(&format!("  - {{ host: {host}, port: 9199, role: node }}\n"));
    }
    doc.push_str(
        r#"tables:
  - name: events
    schema: "ROW<ts:BIGINT, user:VARCHAR, value:DOUBLE>"
    sources:
      - { uri: "mem:/events", format: csv, time-column: ts, retention: 864000 }
"#,
    );
    if extra_source {
        doc.push_str(
            "      - { uri: \"mem:/extra\", format: csv, time-column: ts, retention: 864000 }\n",
        );
    }
    doc
}

fn harness(hosts: &[&str]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let conf_path = dir.path().join("cluster.yml");
    std::fs::write(&conf_path, conf_doc(hosts, false)).unwrap();

    let fleet = MockFleet::new();
    for host in hosts {
        fleet.add_node(NodeId::new(*host, 9199));
    }

    let scanner = ScriptedScanner::new();
    let runtime = Runtime::new(8);
    let sync = NodeSync::new(
        Arc::clone(&runtime),
        Arc::clone(&fleet) as Arc<dyn NodeConnector>,
        Arc::clone(&scanner) as Arc<dyn SourceScanner>,
        ConfigLoader::new(),
        SyncOptions {
            conf_uri: conf_path.to_string_lossy().to_string(),
            interval: Duration::from_millis(10),
            conf_check_interval: Duration::ZERO,
        },
    );

    Harness {
        _dir: dir,
        conf_path,
        fleet,
        scanner,
        runtime,
        sync,
    }
}

fn node(host: &str) -> NodeId {
    NodeId::new(host, 9199)
}

fn sig(source_index: usize, uri: &str) -> String {
    IngestSpec::signature_of("events", source_index, uri)
}

fn states(sync: &NodeSync) -> Vec<SpecState> {
    sync.repo().specs().map(|s| s.state()).collect()
}

fn affinity_hosts(sync: &NodeSync) -> HashSet<String> {
    sync.repo()
        .specs()
        .filter_map(|s| s.affinity().map(|n| n.host.clone()))
        .collect()
}

fn snapshot_active(h: &Harness, host: &str) -> bool {
    h.runtime
        .cluster()
        .nodes()
        .iter()
        .find(|n| n.id == node(host))
        .is_some_and(|n| n.is_active())
}

/// Steady state: a converged cluster re-reconciles to zero work.
#[tokio::test]
async fn test_steady_state_is_idempotent() {
    let mut h = harness(&["a", "b", "c"]);
    h.scanner.set(
        "events",
        0,
        &[
            ("/p0", 100, 1),
            ("/p1", 200, 1),
            ("/p2", 300, 1),
            ("/p3", 150, 1),
            ("/p4", 250, 1),
            ("/p5", 120, 1),
        ],
    );

    let first = h.sync.tick().await.unwrap();
    assert_eq!(first.ingest_tasks, 6);
    assert!(states(&h.sync).iter().all(|s| *s == SpecState::Ready));

    let second = h.sync.tick().await.unwrap();
    assert_eq!(second.ingest_tasks, 0);
    assert_eq!(second.expire_tasks, 0);
    assert_eq!(second.nodes_talked, 3);

    // Per-node sizes come from inventory, and the whole universe is
    // resident exactly once.
    let total: u64 = ["a", "b", "c"]
        .iter()
        .map(|n| h.fleet.node(&node(n)).unwrap().mem_bytes())
        .sum();
    assert_eq!(total, 100 + 200 + 300 + 150 + 250 + 120);

    // One state RPC per node per tick.
    for n in ["a", "b", "c"] {
        assert_eq!(h.fleet.node(&node(n)).unwrap().state_calls(), 2);
    }

    // A third tick with nothing changed dispatches nothing either.
    let third = h.sync.tick().await.unwrap();
    assert_eq!(
        (third.ingest_tasks, third.expire_tasks, third.expired_blocks),
        (0, 0, 0)
    );
}

/// Node loss: two failed ticks demote the node, the third reassigns its
/// specs across the survivors within the largest-spec balance bound.
#[tokio::test]
async fn test_node_loss_reassigns_specs() {
    let mut h = harness(&["a", "b", "c"]);
    h.scanner.set(
        "events",
        0,
        &[
            ("/p0", 100, 1),
            ("/p1", 100, 1),
            ("/p2", 100, 1),
            ("/p3", 100, 1),
            ("/p4", 100, 1),
            ("/p5", 100, 1),
        ],
    );

    h.sync.tick().await.unwrap();
    h.sync.tick().await.unwrap();
    assert!(affinity_hosts(&h.sync).contains("a"));

    h.fleet.node(&node("a")).unwrap().set_reachable(false);

    // First failure: node still active, its specs untouched.
    let report = h.sync.tick().await.unwrap();
    assert_eq!(report.nodes_failed, 1);
    assert!(states(&h.sync).iter().all(|s| *s == SpecState::Ready));
    assert!(snapshot_active(&h, "a"));

    // Second failure: demoted to inactive, and the published snapshot
    // says so.
    let report = h.sync.tick().await.unwrap();
    assert_eq!(report.nodes_failed, 1);
    assert!(!snapshot_active(&h, "a"));

    // Next refresh drops a's specs to NEW and the same tick re-places
    // and re-ingests them on b and c.
    let report = h.sync.tick().await.unwrap();
    assert_eq!(report.ingest_tasks, 2);
    assert!(states(&h.sync).iter().all(|s| *s == SpecState::Ready));
    let hosts = affinity_hosts(&h.sync);
    assert!(!hosts.contains("a"));
    assert_eq!(hosts, HashSet::from(["b".to_string(), "c".to_string()]));
    assert!(!snapshot_active(&h, "a"));

    let b = h.fleet.node(&node("b")).unwrap().mem_bytes();
    let c = h.fleet.node(&node("c")).unwrap().mem_bytes();
    assert!(b.abs_diff(c) <= 100, "balance bound violated: {b} vs {c}");

    // One successful probe reinstates the node, and its now-stale
    // blocks (their specs moved to b and c) go out in a single batched
    // expiration.
    h.fleet.node(&node("a")).unwrap().set_reachable(true);
    let report = h.sync.tick().await.unwrap();
    assert_eq!(report.nodes_talked, 3);
    assert!(snapshot_active(&h, "a"));
    assert_eq!(report.expire_tasks, 1);
    assert_eq!(report.expired_blocks, 2);
    assert!(h.fleet.node(&node("a")).unwrap().resident_blocks().is_empty());
}

/// A config edit adding a source creates specs that flow NEW -> ASSIGNED
/// (queued) -> READY, landing on the least-loaded nodes.
#[tokio::test]
async fn test_config_change_adds_source() {
    let mut h = harness(&["a", "b", "c"]);
    h.scanner
        .set("events", 0, &[("/p0", 300, 1), ("/p1", 120, 1), ("/p2", 100, 1)]);
    h.sync.tick().await.unwrap();
    h.sync.tick().await.unwrap();

    // Two smallest nodes by resident bytes take the new specs.
    let mut sizes: Vec<(u64, String)> = ["a", "b", "c"]
        .iter()
        .map(|n| (h.fleet.node(&node(n)).unwrap().mem_bytes(), (*n).to_string()))
        .collect();
    sizes.sort();
    let expected: HashSet<String> = sizes[..2].iter().map(|(_, n)| n.clone()).collect();

    std::fs::write(&h.conf_path, conf_doc(&["a", "b", "c"], true)).unwrap();
    h.scanner
        .set("events", 1, &[("/x0", 50, 1), ("/x1", 50, 1)]);
    let s7 = sig(1, "/x0");
    let s8 = sig(1, "/x1");
    for n in ["a", "b", "c"] {
        let mock = h.fleet.node(&node(n)).unwrap();
        mock.push_ingest_reply(&s7, nebula_ingest::TaskState::Queued);
        mock.push_ingest_reply(&s8, nebula_ingest::TaskState::Queued);
    }

    // Queued: the specs stay assigned and are retried next tick.
    let report = h.sync.tick().await.unwrap();
    assert_eq!(report.ingest_tasks, 2);
    for s in [&s7, &s8] {
        assert_eq!(h.sync.repo().get(s).unwrap().state(), SpecState::Assigned);
    }
    let placed: HashSet<String> = [&s7, &s8]
        .iter()
        .map(|s| h.sync.repo().get(s).unwrap().affinity().unwrap().host.clone())
        .collect();
    assert_eq!(placed, expected);

    // Unscripted retry succeeds and the specs reach READY.
    let report = h.sync.tick().await.unwrap();
    assert_eq!(report.ingest_tasks, 2);
    for s in [&s7, &s8] {
        assert_eq!(h.sync.repo().get(s).unwrap().state(), SpecState::Ready);
    }
}

/// A source disappearing from the universe expires its block on the
/// holding node in one batched task.
#[tokio::test]
async fn test_source_removed_expires_block() {
    let mut h = harness(&["a", "b"]);
    h.scanner.set("events", 0, &[("/p0", 100, 1), ("/p1", 100, 1)]);
    h.sync.tick().await.unwrap();
    h.sync.tick().await.unwrap();

    let gone = sig(0, "/p1");
    let holder = h
        .sync
        .repo()
        .get(&gone)
        .unwrap()
        .affinity()
        .unwrap()
        .clone();
    let before = h.fleet.node(&holder).unwrap().mem_bytes();
    h.fleet.node(&holder).unwrap().clear_tasks();

    h.scanner.set("events", 0, &[("/p0", 100, 1)]);
    let report = h.sync.tick().await.unwrap();
    assert_eq!(report.expire_tasks, 1);
    assert_eq!(report.expired_blocks, 1);
    assert!(h.sync.repo().get(&gone).is_none());

    // Exactly one batched expiration carrying the vanished signature.
    let tasks = h.fleet.node(&holder).unwrap().received_tasks();
    let expires: Vec<_> = tasks
        .iter()
        .filter(|t| t.task_type == TaskType::Expiration)
        .collect();
    assert_eq!(expires.len(), 1);
    match &expires[0].payload {
        TaskPayload::Expiration(expire) => assert_eq!(expire.specs, vec![gone.clone()]),
        other => panic!("unexpected payload: {other:?}"),
    }

    // The holder shrank and the next tick's inventory reflects it.
    assert!(h.fleet.node(&holder).unwrap().mem_bytes() < before);
    let report = h.sync.tick().await.unwrap();
    assert_eq!(report.expire_tasks, 0);
    let metrics = h.runtime.table_metrics("events").unwrap();
    assert_eq!(metrics.block_count, 1);
    assert_eq!(metrics.mem_bytes, 100);
}

/// Three consecutive ingestion failures demote the spec; the next tick
/// re-places it on the now-smallest node and it recovers.
#[tokio::test]
async fn test_repeated_failure_reassigns() {
    let mut h = harness(&["a", "b"]);
    h.scanner.set("events", 0, &[("/fill", 100, 1)]);
    h.sync.tick().await.unwrap();

    // New spec lands on b, the empty node; script it to keep failing.
    h.scanner.set("events", 0, &[("/fill", 100, 1), ("/s9", 10, 1)]);
    let s9 = sig(0, "/s9");
    let b = h.fleet.node(&node("b")).unwrap();
    for _ in 0..3 {
        b.push_ingest_reply(&s9, nebula_ingest::TaskState::Failed);
    }

    let report = h.sync.tick().await.unwrap();
    assert_eq!(report.ingest_tasks, 1);
    let spec = h.sync.repo().get(&s9).unwrap();
    assert_eq!(spec.state(), SpecState::Assigned);
    assert_eq!(spec.affinity().unwrap(), &node("b"));

    // Meanwhile more data lands on b, growing it past a.
    h.scanner.set(
        "events",
        0,
        &[("/fill", 100, 1), ("/s9", 10, 1), ("/w", 500, 1)],
    );
    h.sync.tick().await.unwrap();
    assert_eq!(h.fleet.node(&node("b")).unwrap().mem_bytes(), 500);

    // Third consecutive failure: demoted, affinity nulled.
    h.sync.tick().await.unwrap();
    let spec = h.sync.repo().get(&s9).unwrap();
    assert_eq!(spec.state(), SpecState::New);
    assert!(spec.affinity().is_none());

    // Reassigned to the now-smallest node (a) and recovers.
    h.sync.tick().await.unwrap();
    let spec = h.sync.repo().get(&s9).unwrap();
    assert_eq!(spec.state(), SpecState::Ready);
    assert_eq!(spec.affinity().unwrap(), &node("a"));
}

/// Scan failures keep existing specs; dispatch counters stay quiet.
#[tokio::test]
async fn test_tick_reports_are_stable_shape() {
    let mut h = harness(&["a"]);
    h.scanner.set("events", 0, &[("/p0", 100, 1)]);
    let report = h.sync.tick().await.unwrap();
    assert_eq!(
        report,
        TickReport {
            tick: 1,
            nodes_talked: 1,
            nodes_failed: 0,
            expire_tasks: 0,
            expired_blocks: 0,
            ingest_tasks: 1,
            elapsed_ms: report.elapsed_ms,
        }
    );
}
