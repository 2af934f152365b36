//! In-memory cloud provider
//!
//! Keeps every resource in process memory. Used by `labforge --dry-run` and
//! by the tests, which also use its counters and failure switches.

use crate::error::{CloudError, Result};
use crate::provider::{
    AccountInfo, CloudProvider, Credential, LiveResource, Quota, RegionInfo, ResourceKind,
    ResourceRequest,
};
use crate::security::{Direction, ObservedRule, SecurityRule};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    regions: Vec<RegionInfo>,
    account: Option<AccountInfo>,
    resources: HashMap<ResourceKind, Vec<LiveResource>>,
    quotas: HashMap<ResourceKind, u64>,
    rules: HashMap<(String, Direction), Vec<SecurityRule>>,
    create_calls: HashMap<ResourceKind, u32>,
    failing_creates: HashSet<ResourceKind>,
    failing_rule_writes: u32,
    address_delay: u32,
    next_id: u64,
}

/// Provider that keeps resources in memory
#[derive(Debug)]
pub struct MemoryProvider {
    inner: Mutex<Inner>,
}

fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Project => "proj",
        ResourceKind::Vpc => "vpc",
        ResourceKind::Subnet => "subnet",
        ResourceKind::SecurityGroup => "sg",
        ResourceKind::Bucket => "bucket",
        ResourceKind::Cluster => "cls",
        ResourceKind::Instance => "ins",
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// A provider with one region, two zones and a fixed account
    pub fn new() -> Self {
        let inner = Inner {
            regions: vec![RegionInfo::new(
                "ap-guangzhou",
                &["ap-guangzhou-3", "ap-guangzhou-4"],
            )],
            account: Some(AccountInfo {
                id: "100000000001".to_string(),
                name: Some("memory".to_string()),
            }),
            ..Default::default()
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_regions(self, regions: Vec<RegionInfo>) -> Self {
        self.lock().regions = regions;
        self
    }

    pub fn with_account(self, id: impl Into<String>) -> Self {
        self.lock().account = Some(AccountInfo {
            id: id.into(),
            name: None,
        });
        self
    }

    /// Limit the number of resources of one kind
    pub fn with_quota(self, kind: ResourceKind, limit: u64) -> Self {
        self.lock().quotas.insert(kind, limit);
        self
    }

    /// Report instances without a public address for the first `polls` describes
    pub fn with_address_delay(self, polls: u32) -> Self {
        self.lock().address_delay = polls;
        self
    }

    /// Seed a resource as if it had been created out of band
    pub fn insert(&self, kind: ResourceKind, resource: LiveResource) {
        self.lock().resources.entry(kind).or_default().push(resource);
    }

    /// Drop a resource as if it had been deleted out of band
    pub fn remove(&self, kind: ResourceKind, id: &str) {
        if let Some(list) = self.lock().resources.get_mut(&kind) {
            list.retain(|r| r.id != id);
        }
    }

    pub fn resources(&self, kind: ResourceKind) -> Vec<LiveResource> {
        self.lock().resources.get(&kind).cloned().unwrap_or_default()
    }

    /// Make every later creation of `kind` fail
    pub fn fail_creates(&self, kind: ResourceKind) {
        self.lock().failing_creates.insert(kind);
    }

    pub fn allow_creates(&self, kind: ResourceKind) {
        self.lock().failing_creates.remove(&kind);
    }

    /// Make the next `n` rule additions or deletions fail
    pub fn fail_rule_writes(&self, n: u32) {
        self.lock().failing_rule_writes = n;
    }

    pub fn create_calls(&self, kind: ResourceKind) -> u32 {
        self.lock().create_calls.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_create_calls(&self) -> u32 {
        self.lock().create_calls.values().sum()
    }

    pub fn rules(&self, group_id: &str, direction: Direction) -> Vec<SecurityRule> {
        self.lock()
            .rules
            .get(&(group_id.to_string(), direction))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_rules(&self, group_id: &str, direction: Direction, rules: Vec<SecurityRule>) {
        self.lock()
            .rules
            .insert((group_id.to_string(), direction), rules);
    }

    fn take_rule_write_failure(inner: &mut Inner) -> bool {
        if inner.failing_rule_writes > 0 {
            inner.failing_rule_writes -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl CloudProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_regions(&self, _credential: &Credential) -> Result<Vec<RegionInfo>> {
        Ok(self.lock().regions.clone())
    }

    async fn account(&self, _credential: &Credential) -> Result<AccountInfo> {
        self.lock()
            .account
            .clone()
            .ok_or_else(|| CloudError::ProviderQuery("no account configured".to_string()))
    }

    async fn list(
        &self,
        _credential: &Credential,
        _region: &str,
        kind: ResourceKind,
    ) -> Result<Vec<LiveResource>> {
        Ok(self.resources(kind))
    }

    async fn quota(
        &self,
        _credential: &Credential,
        _region: &str,
        kind: ResourceKind,
    ) -> Result<Option<Quota>> {
        let inner = self.lock();
        Ok(inner.quotas.get(&kind).map(|limit| {
            let used = inner.resources.get(&kind).map(Vec::len).unwrap_or(0) as u64;
            Quota::new(used, *limit)
        }))
    }

    async fn create(
        &self,
        _credential: &Credential,
        request: &ResourceRequest,
    ) -> Result<LiveResource> {
        let mut inner = self.lock();
        *inner.create_calls.entry(request.kind).or_default() += 1;

        if inner.failing_creates.contains(&request.kind) {
            return Err(CloudError::ProviderSubmit {
                kind: request.kind,
                message: "InternalError: simulated failure".to_string(),
            });
        }

        inner.next_id += 1;
        let id = match request.kind {
            ResourceKind::Bucket => format!("{}-1250000000", request.name),
            kind => format!("{}-{:08x}", id_prefix(kind), inner.next_id),
        };

        let mut resource = LiveResource::new(&id, &request.name);
        resource.tags = request.tags.clone();
        if request.kind == ResourceKind::Instance {
            let host = inner.next_id % 250 + 1;
            resource.set_attribute(
                "public_ip",
                serde_json::json!(format!("203.0.113.{}", host)),
            );
            resource.set_attribute("state", serde_json::json!("RUNNING"));
        }
        if request.kind == ResourceKind::SecurityGroup {
            inner.rules.insert((id.clone(), Direction::Ingress), Vec::new());
            inner.rules.insert((id.clone(), Direction::Egress), Vec::new());
        }

        inner
            .resources
            .entry(request.kind)
            .or_default()
            .push(resource.clone());

        // Instances come up without an address; describe reveals it later.
        if request.kind == ResourceKind::Instance {
            resource.attributes.remove("public_ip");
        }
        Ok(resource)
    }

    async fn describe(
        &self,
        _credential: &Credential,
        _region: &str,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Option<LiveResource>> {
        let mut inner = self.lock();
        let hide_address = kind == ResourceKind::Instance && inner.address_delay > 0;
        if hide_address {
            inner.address_delay -= 1;
        }

        Ok(inner
            .resources
            .get(&kind)
            .and_then(|list| list.iter().find(|r| r.id == id))
            .cloned()
            .map(|mut r| {
                if hide_address {
                    r.attributes.remove("public_ip");
                }
                r
            }))
    }

    async fn list_security_rules(
        &self,
        _credential: &Credential,
        _region: &str,
        group_id: &str,
        direction: Direction,
    ) -> Result<Vec<ObservedRule>> {
        let inner = self.lock();
        let rules = inner
            .rules
            .get(&(group_id.to_string(), direction))
            .ok_or_else(|| {
                CloudError::ProviderQuery(format!("security group {} not found", group_id))
            })?;
        Ok(rules
            .iter()
            .enumerate()
            .map(|(i, rule)| ObservedRule {
                index: i as u32,
                rule: rule.clone(),
            })
            .collect())
    }

    async fn add_security_rules(
        &self,
        _credential: &Credential,
        _region: &str,
        group_id: &str,
        direction: Direction,
        rules: &[SecurityRule],
    ) -> Result<()> {
        let mut inner = self.lock();
        if Self::take_rule_write_failure(&mut inner) {
            return Err(CloudError::RuleWrite {
                group_id: group_id.to_string(),
                direction,
                message: "RequestLimitExceeded: simulated failure".to_string(),
            });
        }
        inner
            .rules
            .entry((group_id.to_string(), direction))
            .or_default()
            .extend(rules.iter().cloned());
        Ok(())
    }

    async fn delete_security_rules(
        &self,
        _credential: &Credential,
        _region: &str,
        group_id: &str,
        direction: Direction,
        indices: &[u32],
    ) -> Result<()> {
        let mut inner = self.lock();
        if Self::take_rule_write_failure(&mut inner) {
            return Err(CloudError::RuleWrite {
                group_id: group_id.to_string(),
                direction,
                message: "RequestLimitExceeded: simulated failure".to_string(),
            });
        }
        let rules = inner
            .rules
            .get_mut(&(group_id.to_string(), direction))
            .ok_or_else(|| {
                CloudError::ProviderQuery(format!("security group {} not found", group_id))
            })?;

        let mut sorted: Vec<usize> = indices.iter().map(|&i| i as usize).collect();
        sorted.sort_unstable();
        sorted.dedup();
        for index in sorted.into_iter().rev() {
            if index < rules.len() {
                rules.remove(index);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> Credential {
        Credential::new("AKID", "secret")
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let provider = MemoryProvider::new();
        let request = ResourceRequest::new(ResourceKind::Vpc, "lab-vpc-abc", "ap-guangzhou");

        let vpc = provider.create(&credential(), &request).await.unwrap();
        assert!(vpc.id.starts_with("vpc-"));

        let live = provider
            .list(&credential(), "ap-guangzhou", ResourceKind::Vpc)
            .await
            .unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(provider.create_calls(ResourceKind::Vpc), 1);
    }

    #[tokio::test]
    async fn test_quota_counts_live_resources() {
        let provider = MemoryProvider::new().with_quota(ResourceKind::Cluster, 1);
        provider.insert(ResourceKind::Cluster, LiveResource::new("cls-1", "other"));

        let quota = provider
            .quota(&credential(), "ap-guangzhou", ResourceKind::Cluster)
            .await
            .unwrap()
            .unwrap();
        assert!(quota.is_exhausted());
    }

    #[tokio::test]
    async fn test_delete_rules_by_index() {
        let provider = MemoryProvider::new();
        let a = SecurityRule::allow("tcp", "22", "0.0.0.0/0");
        let b = SecurityRule::allow("tcp", "80", "0.0.0.0/0");
        let c = SecurityRule::allow("tcp", "443", "0.0.0.0/0");
        provider.set_rules("sg-1", Direction::Ingress, vec![a, b.clone(), c]);

        provider
            .delete_security_rules(&credential(), "ap-guangzhou", "sg-1", Direction::Ingress, &[0, 2])
            .await
            .unwrap();
        assert_eq!(provider.rules("sg-1", Direction::Ingress), vec![b]);
    }

    #[tokio::test]
    async fn test_instance_address_appears_on_describe() {
        let provider = MemoryProvider::new().with_address_delay(1);
        let request = ResourceRequest::new(ResourceKind::Instance, "lab-node-x", "ap-guangzhou");
        let created = provider.create(&credential(), &request).await.unwrap();
        assert!(created.get_attribute::<String>("public_ip").is_none());

        let first = provider
            .describe(&credential(), "ap-guangzhou", ResourceKind::Instance, &created.id)
            .await
            .unwrap()
            .unwrap();
        assert!(first.get_attribute::<String>("public_ip").is_none());

        let second = provider
            .describe(&credential(), "ap-guangzhou", ResourceKind::Instance, &created.id)
            .await
            .unwrap()
            .unwrap();
        assert!(second.get_attribute::<String>("public_ip").is_some());
    }
}
