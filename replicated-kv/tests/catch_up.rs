//! Followers repairing holes in their log from the leader.

mod common;

use std::time::Duration;

use anyhow::Result;
use common::TestCluster;
use replicated_kv::error::NodeError;
use replicated_kv::message::AppendEntries;
use replicated_kv::modification::{Modification, ModificationType};
use replicated_kv::node::MAX_CATCH_UP_ATTEMPTS;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn follower_fetches_missed_entries_on_next_append() -> Result<()> {
    let cluster = TestCluster::spawn(3).await?;
    let leader = cluster.node(0);

    for i in 0..5 {
        leader.create(format!("v{i}")).await?;
    }
    cluster.wait_for_log_len(2, 5, Duration::from_secs(5)).await?;

    cluster.node(2).disable().await;
    for id in 0..3 {
        leader.update(id, format!("missed{id}")).await?;
    }
    cluster.wait_for_log_len(1, 8, Duration::from_secs(5)).await?;
    assert_eq!(cluster.node(2).status().await.log_size, 5);

    cluster.node(2).enable().await;
    leader.delete(4).await?;

    cluster.wait_for_log_len(2, 9, Duration::from_secs(5)).await?;
    let repaired = cluster.node(2).log_entries().await;
    assert_eq!(repaired, leader.log_entries().await);
    for (sn, entry) in repaired.iter().enumerate() {
        assert_eq!(entry.sn, sn as u64);
    }
    assert_eq!(repaired[8].kind, ModificationType::Delete);

    assert_eq!(cluster.node(2).read(1).await?, Some("missed1".to_string()));
    assert_eq!(cluster.node(2).read(4).await?, None);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn heartbeats_alone_do_not_repair_a_gap() -> Result<()> {
    let cluster = TestCluster::spawn(3).await?;
    let leader = cluster.node(0);

    cluster.node(1).disable().await;
    leader.create("a".to_string()).await?;
    leader.create("b".to_string()).await?;
    cluster.wait_for_log_len(2, 2, Duration::from_secs(5)).await?;

    cluster.node(1).enable().await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(cluster.node(1).status().await.log_size, 0);

    leader.create("c".to_string()).await?;
    cluster.wait_for_log_len(1, 3, Duration::from_secs(5)).await?;

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gap_is_abandoned_when_leader_cannot_answer() -> Result<()> {
    let cluster = TestCluster::spawn(3).await?;
    cluster.node(0).disable().await;

    let gapped = AppendEntries {
        term: 0,
        modifications: vec![Modification::create(3, 3, "late".to_string())],
        src: cluster.host(0).to_string(),
    };
    let result = cluster.node(1).append_entries(gapped).await;

    assert_eq!(
        result,
        Err(NodeError::CatchUpExhausted {
            from: 0,
            attempts: MAX_CATCH_UP_ATTEMPTS,
        })
    );
    assert_eq!(cluster.node(1).status().await.log_size, 0);

    cluster.shutdown().await;
    Ok(())
}
