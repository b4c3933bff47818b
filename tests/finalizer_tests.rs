//! # Finalizer Lifecycle Tests
//!
//! Finalizer add/remove against a [`MemoryStore`] that defers deletion while
//! finalizers remain.

mod common;

use common::{plan, NAMESPACE};
use convergence_controller::constants::DELETE_DEPENDENTS_FINALIZER;
use convergence_controller::controller::{Finalizer, Outcome};
use convergence_controller::crd::Plan;
use convergence_controller::store::memory::Operation;
use convergence_controller::store::{MemoryStore, ResourceStore};
use std::time::Duration;

const FINALIZER: &str = "convergence.microscaler.io/finalizer";

fn finalizers(store: &MemoryStore<Plan>) -> Vec<String> {
    store
        .snapshot(NAMESPACE, "p")
        .and_then(|p| p.metadata.finalizers)
        .unwrap_or_default()
}

#[tokio::test]
async fn test_ensure_present_adds_once_and_requests_immediate_requeue() {
    let store = MemoryStore::new();
    let mut working = store.insert(plan("p", vec![])).unwrap();
    let finalizer = Finalizer::default();

    let outcome = finalizer.ensure_present(&store, &mut working).await.unwrap();
    assert_eq!(outcome, Outcome::Requeue(Duration::from_millis(5)));
    assert_eq!(finalizers(&store), vec![FINALIZER.to_string()]);
    assert!(finalizer.has(&working));

    let outcome = finalizer.ensure_present(&store, &mut working).await.unwrap();
    assert_eq!(outcome, Outcome::Continue);
    assert_eq!(store.calls(Operation::Update), 1);
}

#[tokio::test]
async fn test_ensure_present_uses_optimistic_concurrency() {
    let store = MemoryStore::new();
    let mut stale = store.insert(plan("p", vec![])).unwrap();
    let mut fresh = stale.clone();
    fresh.metadata.labels = Some([("team".to_string(), "db".to_string())].into());
    store.update(&fresh).await.unwrap();

    let err = Finalizer::default()
        .ensure_present(&store, &mut stale)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(finalizers(&store).is_empty());
}

#[tokio::test]
async fn test_ensure_present_skips_resources_being_deleted() {
    let store = MemoryStore::new();
    let mut held = plan("p", vec![]);
    held.metadata.finalizers = Some(vec!["example.com/other".to_string()]);
    store.insert(held).unwrap();
    store.delete(NAMESPACE, "p").await.unwrap();
    let mut deleting = store.snapshot(NAMESPACE, "p").unwrap();

    let outcome = Finalizer::default()
        .ensure_present(&store, &mut deleting)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Continue);
    assert_eq!(finalizers(&store), vec!["example.com/other".to_string()]);
}

#[tokio::test]
async fn test_ensure_removed_lets_the_store_delete() {
    let store = MemoryStore::new();
    let mut guarded = plan("p", vec![]);
    guarded.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
    store.insert(guarded).unwrap();
    store.delete(NAMESPACE, "p").await.unwrap();
    let mut deleting = store.snapshot(NAMESPACE, "p").unwrap();
    let finalizer = Finalizer::default();
    assert!(finalizer.is_deletion_candidate(&deleting));

    finalizer.ensure_removed(&store, &mut deleting).await.unwrap();
    assert!(store.snapshot(NAMESPACE, "p").is_none());
    assert!(!finalizer.has(&deleting));
}

#[tokio::test]
async fn test_ensure_removed_is_a_noop_without_finalizer() {
    let store = MemoryStore::new();
    let mut working = store.insert(plan("p", vec![])).unwrap();

    Finalizer::default()
        .ensure_removed(&store, &mut working)
        .await
        .unwrap();
    assert_eq!(store.calls(Operation::Update), 0);
}

#[tokio::test]
async fn test_foreign_finalizer_blocks_deletion_candidacy() {
    let store = MemoryStore::new();
    let mut guarded = plan("p", vec![]);
    guarded.metadata.finalizers = Some(vec![
        FINALIZER.to_string(),
        DELETE_DEPENDENTS_FINALIZER.to_string(),
    ]);
    store.insert(guarded).unwrap();
    store.delete(NAMESPACE, "p").await.unwrap();
    let finalizer = Finalizer::default();

    let deleting = store.snapshot(NAMESPACE, "p").unwrap();
    assert!(finalizer.is_deletion_candidate(&deleting));

    let mut foreign = deleting.clone();
    foreign
        .metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push("example.com/backup".to_string());
    assert!(!finalizer.is_deletion_candidate(&foreign));
}
