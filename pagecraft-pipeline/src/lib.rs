//! pagecraft pipeline: turn a task brief into a published GitHub Pages site
//! and report where it landed.
//!
//! Stages, in order: generate (LLM) → secret scan with bounded regeneration →
//! single-commit publication → availability polling → evaluation webhook.
//! Every external collaborator sits behind a trait ([`llm::CodeModel`],
//! [`scan::SecretScanner`], [`hosting::HostingApi`], [`poll::LivenessProbe`]).

pub mod bundle;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod generate;
pub mod hosting;
pub mod llm;
pub mod notify;
pub mod pipeline;
pub mod poll;
pub mod publish;
pub mod request;
pub mod scan;

pub use config::PipelineConfig;
pub use pipeline::{Pipeline, PipelineReport, Stage};
pub use request::DeploymentRequest;
