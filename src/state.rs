use std::sync::Arc;

use crate::analyzer::{self, Analyzer};
use crate::config::AppConfig;
use crate::connections::ConnectionRegistry;
use crate::db;
use crate::scans::pending::{EvictionPolicy, PendingScanStore};
use crate::scans::repo::{MemoryRepository, PgRepository, Repository};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pending: Arc<PendingScanStore>,
    pub analyzer: Arc<dyn Analyzer>,
    pub repo: Arc<dyn Repository>,
    pub connections: Arc<ConnectionRegistry>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let repo = match &config.database_url {
            Some(url) => Arc::new(PgRepository::new(db::connect(url).await?)) as Arc<dyn Repository>,
            None => {
                tracing::warn!("DATABASE_URL not set; confirmed scans are kept in memory only");
                Arc::new(MemoryRepository::new()) as Arc<dyn Repository>
            }
        };

        let analyzer = analyzer::from_config(&config.analyzer)?;
        Ok(Self::from_parts(config, analyzer, repo))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        analyzer: Arc<dyn Analyzer>,
        repo: Arc<dyn Repository>,
    ) -> Self {
        let pending = Arc::new(PendingScanStore::new(EvictionPolicy {
            ttl: config.pending.ttl,
            max_entries: config.pending.max_entries,
        }));
        Self {
            config,
            pending,
            analyzer,
            repo,
            connections: Arc::new(ConnectionRegistry::new()),
        }
    }

    #[cfg(test)]
    pub fn fake(analyzer: Arc<dyn Analyzer>, repo: Arc<dyn Repository>) -> Self {
        use crate::config::{AnalyzerConfig, AnalyzerKind, PendingConfig};
        use std::time::Duration;

        let config = Arc::new(AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            database_url: None,
            static_dir: "./static".into(),
            analyzer: AnalyzerConfig {
                kind: AnalyzerKind::Disabled,
                timeout: Duration::from_millis(500),
                ..AnalyzerConfig::default()
            },
            pending: PendingConfig {
                ttl: Some(Duration::from_secs(60)),
                max_entries: Some(64),
                sweep_every: Duration::from_secs(60),
            },
        });
        Self::from_parts(config, analyzer, repo)
    }
}
