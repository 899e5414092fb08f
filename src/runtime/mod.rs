//! Engine assembly and service surface.

pub mod api;
pub mod engine;

pub use api::{
    EngineStats, SubmitResponse, TaskListQuery, TaskListResponse, TaskStatusResponse,
    TaskSubmission, MAX_BATCH_SIZE,
};
pub use engine::TaskEngine;
