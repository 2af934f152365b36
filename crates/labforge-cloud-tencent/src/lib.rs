//! Tencent Cloud provider for LabForge
//!
//! This crate implements the CloudProvider trait for Tencent Cloud,
//! letting the provisioning engine build a lab environment out of a
//! project, a VPC with one subnet, a security group, a COS bucket, a TKE
//! managed cluster and one worker node.
//!
//! # Features
//!
//! - Region, zone and account discovery
//! - Tag-based lookup of VPC, subnet, security group, cluster and node
//! - VPC and security group quota checks
//! - Security group policy listing, creation and deletion by index
//!
//! # Requirements
//!
//! - `tccli` must be installed (API calls)
//! - `coscli` must be installed (bucket listing and creation)
//! - Credentials are passed per call; no local tool profile is needed
//!
//! # Example
//!
//! ```ignore
//! use labforge_cloud::{CloudProvider, Credential};
//! use labforge_cloud_tencent::TencentCloudProvider;
//!
//! let provider = TencentCloudProvider::new();
//! let credential = Credential::new("AKID...", "secret");
//!
//! let account = provider.account(&credential).await?;
//! let regions = provider.list_regions(&credential).await?;
//! ```

pub mod coscli;
pub mod error;
pub mod provider;
pub mod tccli;

pub use coscli::{BucketEntry, Coscli};
pub use error::{Result, TencentError};
pub use provider::TencentCloudProvider;
pub use tccli::Tccli;
