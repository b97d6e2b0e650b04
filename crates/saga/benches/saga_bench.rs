use std::sync::Arc;

use common::UserId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::FriendRequest;
use saga::{InMemoryAlerter, SagaOrchestrator, SagaState};
use storage::{InMemorySocialStore, SocialStore};

async fn seed_pending(store: &InMemorySocialStore) -> (UserId, UserId) {
    let request = FriendRequest::new(UserId::new(), UserId::new()).unwrap();
    let pair = (request.requester_id(), request.receiver_id());
    store.insert_request(&request).await.unwrap();
    pair
}

fn bench_accept_happy_path(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("saga/accept_happy_path", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = Arc::new(InMemorySocialStore::new());
                let orchestrator =
                    SagaOrchestrator::new(store.clone(), Arc::new(InMemoryAlerter::new()));
                let (requester, receiver) = seed_pending(&store).await;

                let result = orchestrator.accept_friend_request(requester, receiver).await;
                assert_eq!(result.state, SagaState::Completed);
            });
        });
    });
}

fn bench_accept_compensated(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("saga/accept_compensated", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = Arc::new(InMemorySocialStore::new());
                let orchestrator =
                    SagaOrchestrator::new(store.clone(), Arc::new(InMemoryAlerter::new()));
                let (requester, receiver) = seed_pending(&store).await;
                store.set_fail_on_staging_commit(true).await;

                let result = orchestrator.accept_friend_request(requester, receiver).await;
                assert_eq!(result.state, SagaState::Compensated);
            });
        });
    });
}

criterion_group!(benches, bench_accept_happy_path, bench_accept_compensated);
criterion_main!(benches);
