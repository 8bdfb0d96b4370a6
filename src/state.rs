use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::config::{AppPaths, Settings};
use crate::model::openai_like::OpenAiLikeProvider;
use crate::model::ModelProvider;
use crate::pipeline::bus::{StageBus, StageReceivers};
use crate::pipeline::notify::BroadcastNotifier;
use crate::storage;
use crate::storage::documents::DocumentStore;
use crate::storage::embeddings::EmbeddingStore;
use crate::storage::object_store::ObjectStore;

pub struct AppState {
    pub settings: Settings,
    pub paths: Arc<AppPaths>,
    pub objects: Arc<ObjectStore>,
    pub documents: Arc<DocumentStore>,
    pub embeddings: Arc<EmbeddingStore>,
    pub model: Arc<dyn ModelProvider>,
    pub notifier: Arc<BroadcastNotifier>,
    pub bus: StageBus,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub async fn initialize() -> anyhow::Result<(Arc<Self>, StageReceivers)> {
        let paths = Arc::new(AppPaths::new());
        let settings = Settings::load(&paths)?;
        let model: Arc<dyn ModelProvider> = Arc::new(OpenAiLikeProvider::new(
            settings.model.base_url.clone(),
            settings.model.chat_model.clone(),
            settings.model.embedding_model.clone(),
        ));
        Self::build(settings, paths, model).await
    }

    /// Assemble the state from explicit parts. Tests inject a scripted
    /// model provider and a scratch data dir through this path.
    pub async fn build(
        settings: Settings,
        paths: Arc<AppPaths>,
        model: Arc<dyn ModelProvider>,
    ) -> anyhow::Result<(Arc<Self>, StageReceivers)> {
        let pool = storage::connect(&paths.db_path).await?;
        let documents = Arc::new(DocumentStore::new(pool.clone()).await?);
        let embeddings = Arc::new(EmbeddingStore::new(pool).await?);

        // Fail fast if the configured embedding model disagrees with
        // what the store was built with.
        embeddings
            .ensure_model(&settings.model.embedding_model, settings.model.embedding_dim)
            .await?;

        let objects = Arc::new(ObjectStore::new(
            paths.incoming_dir.clone(),
            paths.organized_dir.clone(),
        ));
        let notifier = Arc::new(BroadcastNotifier::new(64));
        let (bus, receivers) = StageBus::new(settings.pipeline.queue_depth);

        let state = Arc::new(AppState {
            settings,
            paths,
            objects,
            documents,
            embeddings,
            model,
            notifier,
            bus,
            started_at: Utc::now(),
        });

        Ok((state, receivers))
    }
}
