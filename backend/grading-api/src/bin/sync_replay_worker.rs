use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::fmt::init;

use ielts_grading_api::{
    config::Config,
    services::{
        evaluation_cache::{EvaluationCache, RedisCacheStore},
        submission_repository::MongoSubmissionRepository,
        sync_replay_worker::SyncReplayWorker,
        sync_reporter::SyncReporter,
        user_service_client::HttpUserServiceClient,
        Backends,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load()?;

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri).await?;
    let redis_client = redis::Client::open(config.redis_uri.clone())?;

    let backends = Backends::connect(&config, mongo_client, redis_client).await?;

    let repository = Arc::new(MongoSubmissionRepository::new(backends.mongo.clone()));
    let user_service = Arc::new(HttpUserServiceClient::new(
        config.user_service_url.clone(),
        config.internal_api_key.clone(),
        config.user_service_timeout(),
    )?);
    let cache = EvaluationCache::new(Arc::new(RedisCacheStore::new(backends.redis.clone())));

    let worker = SyncReplayWorker::new(
        repository.clone(),
        SyncReporter::new(repository, user_service),
        Duration::from_secs(config.sync_replay_interval_secs),
        config.sync_replay_batch_size,
    )
    .with_cache(cache);

    worker.run().await?;

    Ok(())
}
