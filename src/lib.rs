//! Async client for a ComfyUI-compatible image-generation engine.
//!
//! easel instantiates reusable workflow templates with typed parameter
//! substitution, submits the resulting prompts, tracks their lifecycle to a
//! terminal state (polling or push notifications), and retrieves the
//! produced artifacts.

pub mod cache;
pub mod cli;
pub mod comfy;
pub mod config;
pub mod error;
pub mod generator;
pub mod retry;
pub mod tracker;
pub mod ui;
pub mod workflow;

pub use cache::ResultCache;
pub use comfy::{ComfyClient, ComfyError, ComfyErrorKind};
pub use config::EaselConfig;
pub use error::EaselError;
pub use generator::{GenerationRecord, Generator};
pub use retry::RetryPolicy;
pub use tracker::{
    JobHandle, JobMonitor, NotificationHub, WorkflowState, WorkflowStatus, WorkflowTracker,
};
pub use workflow::{
    InputValue, NodeRef, ParamType, TemplateError, TemplateLibrary, TemplateParameter,
    WorkflowNode, WorkflowPrompt, WorkflowTemplate,
};
