//! Tests for builder modules

use std::sync::Arc;

use prometheus_task_engine::builders::EngineBuilder;
use prometheus_task_engine::config::EngineConfig;
use prometheus_task_engine::core::{AdditionExecutor, Lane, TaskStore};
use prometheus_task_engine::infra::InMemoryStore;

#[test]
fn test_engine_builder_defaults() {
    let config = EngineConfig::new()
        .with_lane_workers(Lane::High, 2)
        .with_lane_workers(Lane::Medium, 1)
        .with_lane_workers(Lane::Low, 1);

    let engine = EngineBuilder::new(config.clone())
        .without_scanner()
        .build(AdditionExecutor)
        .expect("Failed to build engine");
    assert_eq!(engine.config(), &config);

    let stats = engine.stats();
    let workers: Vec<(Lane, usize)> = stats.lanes.iter().map(|s| (s.lane, s.worker_count)).collect();
    assert_eq!(workers, vec![(Lane::High, 2), (Lane::Medium, 1), (Lane::Low, 1)]);
    assert_eq!(stats.delayed, 0);
    engine.shutdown();
}

#[test]
fn test_engine_builder_rejects_invalid_config() {
    let config = EngineConfig::new().with_lane_workers(Lane::Low, 0);
    let err = EngineBuilder::new(config)
        .build(AdditionExecutor)
        .err()
        .expect("build should fail");
    assert!(err.to_string().contains("invalid engine configuration"));
}

#[test]
fn test_engine_builder_uses_supplied_store() {
    let store = Arc::new(InMemoryStore::new());
    let engine = EngineBuilder::new(EngineConfig::new().with_lane_workers(Lane::High, 1))
        .with_store(store.clone())
        .without_scanner()
        .build(AdditionExecutor)
        .expect("Failed to build engine");

    let submitted = engine
        .submit(prometheus_task_engine::runtime::TaskSubmission::single(1, 2).with_priority(3))
        .expect("Failed to submit");
    assert_eq!(store.task_count(), 1);
    assert!(store.get_task(submitted.task.id()).is_ok());
    engine.shutdown();
}
