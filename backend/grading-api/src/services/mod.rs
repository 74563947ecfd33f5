use std::sync::Arc;

use crate::config::Config;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;

pub mod ai_client;
pub mod evaluation_cache;
pub mod object_storage;
pub mod submission_repository;
pub mod submission_service;
pub mod sync_replay_worker;
pub mod sync_reporter;
pub mod task_pool;
pub mod user_service_client;

use ai_client::{AiEvaluator, HttpAiEvaluator};
use evaluation_cache::{EvaluationCache, RedisCacheStore};
use object_storage::{AudioFetcher, ObjectStorageClient};
use submission_repository::MongoSubmissionRepository;
use submission_service::SubmissionService;
use sync_reporter::SyncReporter;
use task_pool::TaskPool;
use user_service_client::HttpUserServiceClient;

/// Live MongoDB and Redis handles.
#[derive(Clone)]
pub struct Backends {
    pub mongo: Database,
    pub redis: ConnectionManager,
}

impl Backends {
    pub async fn connect(
        config: &Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        Ok(Self { mongo, redis })
    }
}

pub struct AppState {
    pub config: Config,
    /// `None` when the state is assembled from in-memory collaborators.
    pub backends: Option<Backends>,
    pub submissions: SubmissionService,
    pub evaluation_cache: EvaluationCache,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let backends = Backends::connect(&config, mongo_client, redis_client).await?;

        let repository = Arc::new(MongoSubmissionRepository::new(backends.mongo.clone()));
        let evaluation_cache =
            EvaluationCache::new(Arc::new(RedisCacheStore::new(backends.redis.clone())));

        let ai: Option<Arc<dyn AiEvaluator>> = match &config.ai_service_url {
            Some(url) => {
                let storage = config
                    .object_storage
                    .clone()
                    .map(ObjectStorageClient::new)
                    .transpose()?;
                let audio = AudioFetcher::new(reqwest::Client::new(), storage);
                Some(Arc::new(HttpAiEvaluator::new(
                    url.clone(),
                    config.ai_timeout(),
                    audio,
                )?))
            }
            None => {
                tracing::warn!("AI_SERVICE_URL not set; writing and speaking evaluations will fail");
                None
            }
        };

        let user_service = Arc::new(HttpUserServiceClient::new(
            config.user_service_url.clone(),
            config.internal_api_key.clone(),
            config.user_service_timeout(),
        )?);

        let submissions = SubmissionService::new(
            repository.clone(),
            ai,
            evaluation_cache.clone(),
            SyncReporter::new(repository, user_service),
            TaskPool::new(config.worker_concurrency),
        );

        Ok(Self {
            config,
            backends: Some(backends),
            submissions,
            evaluation_cache,
        })
    }

    pub fn with_services(
        config: Config,
        submissions: SubmissionService,
        evaluation_cache: EvaluationCache,
    ) -> Self {
        Self {
            config,
            backends: None,
            submissions,
            evaluation_cache,
        }
    }
}
