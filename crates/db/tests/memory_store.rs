//! Job store contract against the in-memory implementation.

mod common;

use std::sync::Arc;

use evalhub_db::MemoryJobStore;

#[tokio::test]
async fn create_then_get() {
    common::create_then_get(&MemoryJobStore::new()).await;
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    common::unknown_id_is_not_found(&MemoryJobStore::new()).await;
}

#[tokio::test]
async fn full_lifecycle() {
    common::full_lifecycle(&MemoryJobStore::new()).await;
}

#[tokio::test]
async fn illegal_transition_leaves_job_unchanged() {
    common::illegal_transition_leaves_job_unchanged(&MemoryJobStore::new()).await;
}

#[tokio::test]
async fn failure_record_round_trips() {
    common::failure_record_round_trips(&MemoryJobStore::new()).await;
}

#[tokio::test]
async fn attach_handle_rules() {
    common::attach_handle_rules(&MemoryJobStore::new()).await;
}

#[tokio::test]
async fn list_is_ordered_and_filtered() {
    common::list_is_ordered_and_filtered(&MemoryJobStore::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_get_distinct_ids() {
    common::concurrent_creates_get_distinct_ids(Arc::new(MemoryJobStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_terminal_writes_have_one_winner() {
    common::concurrent_terminal_writes_have_one_winner(Arc::new(MemoryJobStore::new())).await;
}
