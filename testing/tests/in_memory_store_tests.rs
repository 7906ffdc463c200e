//! Concurrency behaviour of the in-memory store and its test doubles.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use clinic_queue_core::{
    NewTicket, Priority, RoomId, SectorCode, TicketId, TicketStatus, TicketStore, TicketStoreError,
    TransitionFields, TransientKind, Utc,
};
use clinic_queue_testing::{FaultPlan, FlakyTicketStore, InMemoryTicketStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_get_distinct_consecutive_numbers() {
    let store = Arc::new(InMemoryTicketStore::new());
    let sector = SectorCode::new("triage");

    let mut handles = Vec::new();
    for _ in 0..50 {
        let store = Arc::clone(&store);
        let sector = sector.clone();
        handles.push(tokio::spawn(async move {
            store
                .create(NewTicket::new(sector, Priority::Normal), Utc::now())
                .await
                .unwrap()
        }));
    }

    let mut seqs = HashSet::new();
    for handle in handles {
        let ticket = handle.await.unwrap();
        assert!(seqs.insert(ticket.number.seq()), "duplicate number {}", ticket.number);
    }
    assert_eq!(seqs, (1..=50).collect::<HashSet<u64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_concurrent_cas_wins() {
    let store = Arc::new(InMemoryTicketStore::new());
    let ticket = store
        .create(NewTicket::new(SectorCode::new("triage"), Priority::Normal), Utc::now())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .transition(
                    ticket.id,
                    TicketStatus::Waiting,
                    TicketStatus::Called,
                    TransitionFields::call(RoomId::new(format!("room{i}")), Utc::now()),
                )
                .await
        }));
    }

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(err) => assert!(err.is_conflict(), "unexpected error: {err}"),
        }
    }
    assert_eq!(wins, 1);

    let stored = store.get(ticket.id).await.unwrap();
    assert_eq!(stored.status, TicketStatus::Called);
    assert_eq!(stored.revision, 2);
    assert!(stored.invariants_hold());
}

#[tokio::test]
async fn numbering_is_per_sector() {
    let store = InMemoryTicketStore::new();
    let now = Utc::now();
    let t1 = store.create(NewTicket::new(SectorCode::new("triage"), Priority::Normal), now).await.unwrap();
    let c1 = store.create(NewTicket::new(SectorCode::new("office-1"), Priority::Normal), now).await.unwrap();
    let t2 = store.create(NewTicket::new(SectorCode::new("triage"), Priority::Normal), now).await.unwrap();

    assert_eq!(t1.number.to_string(), "TRI-001");
    assert_eq!(c1.number.to_string(), "C1-001");
    assert_eq!(t2.number.to_string(), "TRI-002");
}

#[tokio::test]
async fn flaky_store_fails_then_recovers() {
    let store = FlakyTicketStore::new(InMemoryTicketStore::new(), FaultPlan::transient(2));
    let request = NewTicket::new(SectorCode::new("triage"), Priority::Normal);

    for _ in 0..2 {
        let err = store.create(request.clone(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, TicketStoreError::Transient { kind: TransientKind::Database, .. }));
    }
    store.create(request, Utc::now()).await.unwrap();
    assert_eq!(store.calls(), 3);
    assert_eq!(store.inner().len().await, 1);
}

#[tokio::test]
async fn flaky_store_forced_conflict_leaves_ticket_untouched() {
    let store = FlakyTicketStore::new(InMemoryTicketStore::new(), FaultPlan::conflicts(1));
    let ticket = store
        .create(NewTicket::new(SectorCode::new("triage"), Priority::Normal), Utc::now())
        .await
        .unwrap();

    let err = store
        .transition(
            ticket.id,
            TicketStatus::Waiting,
            TicketStatus::Called,
            TransitionFields::call(RoomId::new("room1"), Utc::now()),
        )
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(store.get(ticket.id).await.unwrap().status, TicketStatus::Waiting);
}

#[tokio::test(start_paused = true)]
async fn slow_store_delays_calls() {
    let store = FlakyTicketStore::new(InMemoryTicketStore::new(), FaultPlan::slow(Duration::from_secs(5)));
    let started = tokio::time::Instant::now();
    store.list_active(None).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test]
async fn unknown_id_outranks_illegal_edge() {
    let store = InMemoryTicketStore::new();
    let missing = TicketId::new();
    let err = store
        .transition(missing, TicketStatus::Called, TicketStatus::Waiting, TransitionFields::at(Utc::now()))
        .await
        .unwrap_err();
    assert_eq!(err, TicketStoreError::NotFound(missing));
}

#[tokio::test]
async fn lost_ack_commits_then_fails() {
    let store = FlakyTicketStore::new(InMemoryTicketStore::new(), FaultPlan::lost_acks(1));
    let ticket = store
        .create(NewTicket::new(SectorCode::new("triage"), Priority::Normal), Utc::now())
        .await
        .unwrap();

    let err = store
        .transition(
            ticket.id,
            TicketStatus::Waiting,
            TicketStatus::Called,
            TransitionFields::call(RoomId::new("room1"), Utc::now()),
        )
        .await
        .unwrap_err();
    assert!(err.is_transient());

    let stored = store.get(ticket.id).await.unwrap();
    assert_eq!(stored.status, TicketStatus::Called);
    assert_eq!(stored.revision, 2);
}
