//! LabForge provisioning engine
//!
//! This crate walks the fixed sequence of provisioning stages for one
//! LabForge deployment, checkpointing every stage so the sequence can be
//! re-run safely after any failure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  LabForge CLI                    │
//! │            (labforge provision/stage)            │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 labforge-cloud                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │              StageEngine                  │   │
//! │  │  region → account → … → finalize          │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐   │
//! │  │ RateLimiter│ │ Checkpoint │ │  Security  │   │
//! │  │            │ │   Store    │ │ Converger  │   │
//! │  └────────────┘ └────────────┘ └────────────┘   │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │ CloudProvider │ │RemoteConnector│
//! │ (tencent/mem) │ │  (ssh/mock)   │
//! └───────────────┘ └───────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use labforge_cloud::{CheckpointStore, EngineContext, StageEngine};
//!
//! let checkpoint = CheckpointStore::load(".labforge/checkpoint.json").await?;
//! let mut engine = StageEngine::new(ctx, checkpoint);
//! let report = engine.run_all(&credential).await?;
//! println!("{}", report.summary());
//! ```

pub mod action;
pub mod engine;
pub mod error;
pub mod memory;
pub mod mock;
pub mod naming;
pub mod provider;
pub mod ratelimit;
pub mod remote;
pub mod retry;
pub mod security;
pub mod state;

// Re-exports
pub use action::{ActionType, RunReport, RunSummary, StageOutcome};
pub use engine::{BootstrapStep, EngineContext, EngineSettings, Stage, StageEngine};
pub use error::{CloudError, Result};
pub use memory::MemoryProvider;
pub use mock::{MockConnector, MockLog};
pub use provider::{
    AccountInfo, CloudProvider, Credential, DEPLOYMENT_TAG, LiveResource, Quota, RegionInfo,
    ResourceKind, ResourceRequest,
};
pub use ratelimit::{RateLimiter, action_name};
pub use remote::{CommandOutput, RemoteConnector, RemoteSession, RemoteTarget, connect_with_retry};
pub use retry::{RetryConfig, retry};
pub use security::{
    ConvergeMode, ConvergeReport, Direction, ObservedRule, RuleAction, SecurityConverger,
    SecurityPolicy, SecurityRule,
};
pub use state::{CheckpointStore, ProvisioningState, Sensitivity, StateLock};
