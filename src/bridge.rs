//! Root service graph: every component is constructed once here and
//! injected; nothing in the crate relies on module-level singletons.

use crate::config::BridgeConfig;
use crate::dedupe::EventDedupe;
use crate::dispatch::MessageDispatcher;
use crate::error::{BridgeError, BridgeResult};
use crate::letta::LettaClient;
use crate::matrix::types::MatrixEvent;
use crate::matrix::{HomeserverClient, SyncService};
use crate::media::document::{DocumentExtractor, DocumentPipeline, OcrEngine, WorkerPool};
use crate::media::transcribe::Transcriber;
use crate::media::MediaHandler;
use crate::provision::{ProvisioningEngine, RoomManager, SpaceManager, UserManager};
use crate::store::MappingStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// External engines the bridge drives but does not implement.
pub struct MediaCollaborators {
    /// Embedded document-to-text converter.
    pub extractor: Arc<dyn DocumentExtractor>,
    /// OCR engine for scanned PDFs, when available.
    pub ocr: Option<Arc<dyn OcrEngine>>,
    /// Speech-to-text engine, when available.
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

/// The assembled bridge.
pub struct Bridge {
    config: BridgeConfig,
    homeserver: Arc<HomeserverClient>,
    dispatcher: Arc<MessageDispatcher>,
    engine: Arc<ProvisioningEngine>,
    bot_token: String,
}

impl Bridge {
    /// Construct the full service graph and authenticate the main bot.
    ///
    /// The startup timestamp is captured here, before any sync request, so
    /// the boot replay guard covers everything the first sync could return.
    pub async fn start(
        config: BridgeConfig,
        collaborators: MediaCollaborators,
    ) -> BridgeResult<Self> {
        let startup_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|_| BridgeError::config("system clock is before the epoch"))?
            .as_millis() as u64;

        let homeserver = Arc::new(HomeserverClient::new(config.homeserver_url.clone())?);
        let letta = Arc::new(LettaClient::connect(
            config.letta_api_url.as_str(),
            config.letta_token.as_deref(),
        )?);
        let store = Arc::new(MappingStore::new(config.data_dir.clone()));
        let dedupe = Arc::new(EventDedupe::new());

        let server_name = config.server_name();
        let users = Arc::new(UserManager::new(
            homeserver.clone(),
            server_name.clone(),
            config.admin_user_id.clone(),
            config.admin_password.clone(),
            config.dev_mode,
        ));
        let spaces = Arc::new(SpaceManager::new(
            homeserver.clone(),
            users.clone(),
            store.clone(),
            server_name.clone(),
            config.admin_user_id.clone(),
            config.admin_password.clone(),
            config.bot_user_id.clone(),
        ));
        let rooms = Arc::new(RoomManager::new(
            homeserver.clone(),
            spaces.clone(),
            users.clone(),
            store.clone(),
            letta.clone(),
            config.room_invitees(),
            config.auto_join_accounts(),
            true,
        ));
        let engine = Arc::new(ProvisioningEngine::new(
            users.clone(),
            rooms,
            spaces,
            store.clone(),
            letta.clone(),
            config.core_users(),
            config.agent_sync_interval,
        ));

        let bot_session = homeserver
            .login(
                crate::config::localpart(&config.bot_user_id),
                &config.bot_password,
            )
            .await?;
        let bot_token = bot_session.access_token.clone();

        let pool = WorkerPool::default();
        let documents = DocumentPipeline::new(
            config.document_parsing.clone(),
            collaborators.extractor,
            collaborators.ocr,
            pool.clone(),
        );
        let media = Arc::new(MediaHandler::new(
            homeserver.clone(),
            letta.clone(),
            bot_token.clone(),
            config.embedding.clone(),
            documents,
            collaborators.transcriber,
            pool,
        ));

        let dispatcher = Arc::new(MessageDispatcher::new(
            homeserver.clone(),
            letta,
            store,
            dedupe,
            media,
            config.bot_user_id.clone(),
            bot_token.clone(),
            server_name,
            config.default_agent_id.clone(),
            config.streaming_enabled,
            config.streaming_timeout,
            startup_ms,
        ));

        Ok(Self {
            config,
            homeserver,
            dispatcher,
            engine,
            bot_token,
        })
    }

    /// Run until cancelled: provisioning on its ticker, sync driving
    /// dispatch.
    pub async fn run(self) -> BridgeResult<()> {
        if let Some(room_id) = &self.config.base_room_id {
            // The observer room is best effort; its absence is not fatal.
            match self.homeserver.join_room(room_id, &self.bot_token).await {
                Ok(_) => tracing::info!(room_id = %room_id, "joined base room"),
                Err(error) => tracing::warn!(room_id = %room_id, error = %error, "could not join base room"),
            }
        }

        let engine = self.engine.clone();
        let provisioning = tokio::spawn(async move { engine.run().await });

        let router = RoomRouter::new(self.dispatcher.clone());
        let sync = SyncService::new(self.homeserver.clone(), self.bot_token.clone());
        let result = sync
            .run_forever(|event| {
                let router = &router;
                async move { router.route(event).await }
            })
            .await;

        provisioning.abort();
        result
    }
}

/// Fans events out to one worker task per room.
///
/// Within a room, events are processed strictly in arrival order; across
/// rooms they run concurrently. There is no cross-room ordering guarantee.
struct RoomRouter {
    dispatcher: Arc<MessageDispatcher>,
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<MatrixEvent>>>,
}

impl RoomRouter {
    fn new(dispatcher: Arc<MessageDispatcher>) -> Self {
        Self {
            dispatcher,
            workers: Mutex::new(HashMap::new()),
        }
    }

    async fn route(&self, event: MatrixEvent) {
        let mut workers = self.workers.lock().await;
        let sender = workers
            .entry(event.room_id.clone())
            .or_insert_with(|| self.spawn_worker(&event.room_id));

        if sender.send(event).is_err() {
            // The worker died; it will be respawned for the next event.
            tracing::warn!("room worker channel closed, dropping event");
        }
    }

    fn spawn_worker(&self, room_id: &str) -> mpsc::UnboundedSender<MatrixEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel::<MatrixEvent>();
        let dispatcher = self.dispatcher.clone();
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            tracing::debug!(room_id = %room_id, "room worker started");
            while let Some(event) = rx.recv().await {
                dispatcher.handle_event(event).await;
            }
        });
        tx
    }
}
