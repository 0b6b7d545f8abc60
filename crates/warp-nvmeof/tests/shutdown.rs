//! Shutdown behaviour: draining on the target, failing fast on the initiator

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use warp_nvmeof::{NvmeOfError, NvmeStatus};

const BOUND: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_server_close_drains_in_flight() {
    init_tracing();
    let server = start_server(vec![sleepy(Duration::from_millis(100)).await]).await;
    let mut client = login(&server, SLEEPY_NQN).await;
    let io = client.open_io_queue(1).await.unwrap();

    let flushes: Vec<_> = (0..8)
        .map(|_| {
            let io = Arc::clone(&io);
            tokio::spawn(async move { io.flush().await })
        })
        .collect();
    // let the capsules reach the controller
    tokio::time::sleep(Duration::from_millis(30)).await;

    tokio::time::timeout(BOUND, server.close()).await.unwrap();
    for flush in flushes {
        let result = tokio::time::timeout(BOUND, flush).await.unwrap().unwrap();
        assert!(result.is_ok(), "admitted flush was drained: {:?}", result);
    }
    assert!(server.sessions().is_empty());

    // the connection is gone now
    assert!(io.flush().await.is_err());
    client.close().await;
}

#[tokio::test]
async fn test_client_close_fails_in_flight() {
    let server = start_server(vec![sleepy(Duration::from_millis(500)).await]).await;
    let mut client = login(&server, SLEEPY_NQN).await;
    let io = client.open_io_queue(1).await.unwrap();

    let flushes: Vec<_> = (0..4)
        .map(|_| {
            let io = Arc::clone(&io);
            tokio::spawn(async move { io.flush().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.close_queue(1).await.unwrap();
    for flush in flushes {
        let result = tokio::time::timeout(BOUND, flush).await.unwrap().unwrap();
        assert!(matches!(
            result,
            Err(NvmeOfError::Status(NvmeStatus::InternalError))
        ));
    }
    assert!(matches!(
        client.close_queue(1).await,
        Err(NvmeOfError::Status(NvmeStatus::InvalidQueueId))
    ));

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_remove_subsystem_disconnects_hosts() {
    let server = start_server(vec![memory().await, testable().await]).await;
    let mut doomed = login(&server, MEMORY_NQN).await;
    let io = doomed.open_io_queue(1).await.unwrap();
    io.write(0, &[1u8; 512]).await.unwrap();
    let mut survivor = login(&server, TESTABLE_NQN).await;

    tokio::time::timeout(BOUND, server.remove_subsystem(MEMORY_NQN))
        .await
        .unwrap()
        .unwrap();
    assert!(server.subsystem(MEMORY_NQN).is_none());
    assert!(io.write(0, &[1u8; 512]).await.is_err());

    let sessions = server.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].subsystem_nqn.as_deref(), Some(TESTABLE_NQN));
    survivor.admin().unwrap().keep_alive().await.unwrap();

    doomed.close().await;
    survivor.close().await;
    server.close().await;
}
