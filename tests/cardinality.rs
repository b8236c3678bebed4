//! Integration tests for uniqueness and cardinality bounds.

mod common;

use std::sync::Arc;

use pid_relations::{
    InMemoryIdentifierStore, InMemoryRelationStore, Pid, PidStatus, RelationError,
    RelationKind, RelationKindRegistry, RelationStore, Relations, RECORD_DRAFT_KIND,
};
use tokio::sync::Barrier;

use common::YieldingStore;

type Engine = Relations<InMemoryRelationStore, InMemoryIdentifierStore>;

fn engine(kinds: RelationKindRegistry) -> Engine {
    Relations::from_shared(
        Arc::new(InMemoryRelationStore::new()),
        Arc::new(InMemoryIdentifierStore::new()),
        Arc::new(kinds),
    )
}

fn pid<R: RelationStore>(engine: &Relations<R, InMemoryIdentifierStore>, value: &str) -> Pid {
    engine
        .identifier_store()
        .create("recid", value, PidStatus::Registered)
        .unwrap()
}

#[tokio::test]
async fn duplicate_edge_is_a_conflict() {
    let engine = engine(RelationKindRegistry::with_defaults());
    let (parent, child) = (pid(&engine, "p"), pid(&engine, "c"));
    let node = engine.plain_node(&parent, "collection").await.unwrap();

    node.insert_child(&child).await.unwrap();
    let err = node.insert_child(&child).await.unwrap_err();
    assert!(matches!(err, RelationError::Conflict { .. }));
    assert!(err.is_retryable());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_parents_respect_bound() {
    let kinds = RelationKindRegistry::new(vec![RelationKind::unordered("owner").with_max_parents(1)])
        .unwrap();
    let engine = Relations::new(YieldingStore::new(), InMemoryIdentifierStore::new(), kinds);
    let child = pid(&engine, "c");
    let parents: Vec<Pid> = (0..8).map(|i| pid(&engine, &format!("p{i}"))).collect();
    let barrier = Arc::new(Barrier::new(parents.len()));

    let mut handles = Vec::new();
    for parent in parents {
        let engine = engine.clone();
        let child = child.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            let node = engine.plain_node(&parent, "owner").await.unwrap();
            barrier.wait().await;
            node.insert_child(&child).await
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(err) => assert!(matches!(err, RelationError::CardinalityExceeded { .. })),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(engine.relation_store().parents(child.id, "owner").await.unwrap().len(), 1);
}

#[tokio::test]
async fn record_draft_is_one_to_one() {
    let engine = engine(RelationKindRegistry::with_defaults());
    let (record, other) = (pid(&engine, "r1"), pid(&engine, "r2"));
    let (draft, second) = (pid(&engine, "d1"), pid(&engine, "d2"));

    let node = engine.plain_node(&record, RECORD_DRAFT_KIND).await.unwrap();
    node.insert_child(&draft).await.unwrap();
    assert!(matches!(
        node.insert_child(&second).await,
        Err(RelationError::CardinalityExceeded { side: "children", .. })
    ));
    assert!(matches!(
        engine
            .plain_node(&other, RECORD_DRAFT_KIND)
            .await
            .unwrap()
            .insert_child(&draft)
            .await,
        Err(RelationError::CardinalityExceeded { side: "parents", .. })
    ));

    // Freeing the slot admits a new draft.
    node.remove_child(&draft).await.unwrap();
    node.insert_child(&second).await.unwrap();
    assert_eq!(node.children().one_or_none().await.unwrap(), Some(second));
}

#[tokio::test]
async fn kinds_loaded_from_json() {
    let kinds = RelationKindRegistry::from_json(
        r#"{"member": {"max_children": 2}, "chapter": {"ordered": true}}"#,
    )
    .unwrap();
    let engine = engine(kinds);
    let group = pid(&engine, "g");
    let node = engine.plain_node(&group, "member").await.unwrap();

    for value in ["a", "b"] {
        node.insert_child(&pid(&engine, value)).await.unwrap();
    }
    let err = node.insert_child(&pid(&engine, "c")).await.unwrap_err();
    assert!(matches!(err, RelationError::CardinalityExceeded { current: 2, max: 2, .. }));
    assert_eq!(node.children().count().await.unwrap(), 2);

    assert!(matches!(
        engine.plain_node(&group, "version").await,
        Err(RelationError::UnknownKind(_))
    ));
}
