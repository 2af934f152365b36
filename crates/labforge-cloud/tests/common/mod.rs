use labforge_cloud::{
    CheckpointStore, CloudProvider, Credential, EngineContext, EngineSettings, MemoryProvider,
    MockConnector, RateLimiter, RemoteConnector, StageEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestLab {
    pub root: TempDir,
    pub provider: Arc<MemoryProvider>,
    pub connector: MockConnector,
    pub settings: EngineSettings,
}

impl TestLab {
    pub fn new() -> Self {
        Self::with_provider(MemoryProvider::new())
    }

    pub fn with_provider(provider: MemoryProvider) -> Self {
        let settings = EngineSettings {
            deployment: "test-lab".to_string(),
            ..Default::default()
        };
        Self {
            root: tempfile::tempdir().unwrap(),
            provider: Arc::new(provider),
            connector: MockConnector::new(),
            settings,
        }
    }

    pub fn with_connector(mut self, connector: MockConnector) -> Self {
        self.connector = connector;
        self
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.root.path().join(".labforge").join("checkpoint.json")
    }

    /// Engine over a freshly loaded checkpoint, as a new process would see it
    pub async fn engine(&self) -> StageEngine {
        let provider: Arc<dyn CloudProvider> = self.provider.clone();
        let connector: Arc<dyn RemoteConnector> = Arc::new(self.connector.clone());
        let ctx = EngineContext::new(
            provider,
            connector,
            Arc::new(RateLimiter::default()),
            self.settings.clone(),
        );
        let checkpoint = CheckpointStore::load(self.checkpoint_path()).await.unwrap();
        StageEngine::new(ctx, checkpoint)
    }
}

pub fn credential() -> Credential {
    Credential::new("AKIDtest", "test-secret")
}
