//! Client-side orchestration for a remote story generation service.
//!
//! [`WorkflowManager`] sequences the remote calls, [`WorkflowStore`] holds the
//! state a front end renders, and [`HttpGateway`] talks to the service.
pub mod core;
pub mod services;
pub mod utils;

pub use crate::core::config::{Config, Endpoints, PollConfig};
pub use crate::core::error::{Result, WorkflowError};
pub use crate::core::model::{
    Chapter, FileUpload, JobHandle, JobStatus, PollState, ResultPatch, Story, StoryInput,
    StoryPayload, WorkflowRequest, WorkflowResult,
};
pub use crate::core::state::{
    HistoryEntry, Stage, StageEvent, StageState, StageStatus, StageTicket, WorkflowState,
    WorkflowStore,
};
pub use crate::services::backend::{PdfDocument, StoryBackend};
pub use crate::services::gateway::HttpGateway;
pub use crate::services::poller::poll_until_ready;
pub use crate::services::workflow::WorkflowManager;
