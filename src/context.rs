/// Application context and dependency injection
use crate::{
    audit::AuditLogger,
    auth::{AuthService, GoTrueClient},
    backend::LocalBackend,
    challenges::ChallengeManager,
    config::ClubConfig,
    error::ClubResult,
    events::{EventListing, EventManager},
    gateway::{HttpGateway, RpcGateway},
    invites::InviteManager,
    moderation::{ContentModerator, ModerationQueue, ReportManager, ReportStatus},
    notifications::NotificationManager,
    organization::OrganizationContext,
    payments::PaymentsClient,
    session::SessionContext,
};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Application session holding all shared services
pub struct ClubContext {
    pub config: Arc<ClubConfig>,
    pub gateway: Arc<dyn RpcGateway>,
    pub session: Arc<SessionContext>,
    pub organization: Arc<OrganizationContext>,
    pub audit: Arc<AuditLogger>,
    // Admin panels
    pub reports: ReportManager,
    pub content: ContentModerator,
    pub events: EventManager,
    pub challenges: ChallengeManager,
    pub notifications: NotificationManager,
    pub invites: InviteManager,
    // External collaborators
    pub payments: PaymentsClient,
    organization_watch: Mutex<Option<JoinHandle<()>>>,
}

impl ClubContext {
    /// Connect to the hosted backend described by `config`.
    /// Must be called from within a tokio runtime.
    pub fn connect(config: ClubConfig) -> ClubResult<Self> {
        config.validate()?;

        let gateway = Arc::new(HttpGateway::new(&config.backend)?);
        let auth = Arc::new(GoTrueClient::new(&config.backend)?);
        tracing::info!("Connecting to {}", config.backend.url);

        Self::with_services(config, auth, gateway)
    }

    /// Run against the embedded backend as a fresh, signed-out client
    pub fn local(backend: &LocalBackend) -> ClubResult<Self> {
        let client = backend.client();
        Self::with_services(ClubConfig::local(), client.clone(), client)
    }

    /// Build the context over explicit auth and gateway implementations
    pub fn with_services(
        config: ClubConfig,
        auth: Arc<dyn AuthService>,
        gateway: Arc<dyn RpcGateway>,
    ) -> ClubResult<Self> {
        config.validate()?;

        let audit = Arc::new(AuditLogger::spawn(gateway.clone(), config.audit.queue_capacity));
        let session = Arc::new(SessionContext::start(
            auth,
            gateway.clone(),
            config.session.clone(),
        ));

        let organization = Arc::new(OrganizationContext::new(gateway.clone()));
        let organization_watch = organization.clone().watch_session(session.subscribe());

        Ok(Self {
            reports: ReportManager::new(gateway.clone(), audit.clone()),
            content: ContentModerator::new(gateway.clone(), audit.clone()),
            events: EventManager::new(gateway.clone(), audit.clone()),
            challenges: ChallengeManager::new(gateway.clone(), audit.clone()),
            notifications: NotificationManager::new(gateway.clone(), audit.clone()),
            invites: InviteManager::new(gateway.clone(), audit.clone()),
            payments: PaymentsClient::new(gateway.clone()),
            config: Arc::new(config),
            gateway,
            session,
            organization,
            audit,
            organization_watch: Mutex::new(Some(organization_watch)),
        })
    }

    /// Admin moderation view, optionally filtered by status
    pub fn moderation_queue(&self, filter: Option<ReportStatus>) -> ModerationQueue {
        ModerationQueue::new(self.reports.clone(), filter)
    }

    /// End-user events page
    pub fn event_listing(&self) -> EventListing {
        EventListing::new(self.events.clone())
    }

    /// Stop background work and flush queued audit entries
    pub async fn shutdown(&self) {
        self.session.shutdown();
        let watch = self.organization_watch.lock().ok().and_then(|mut w| w.take());
        if let Some(watch) = watch {
            watch.abort();
        }
        self.audit.close().await;
        tracing::info!("Club context shut down");
    }
}

impl Drop for ClubContext {
    fn drop(&mut self) {
        if let Ok(mut watch) = self.organization_watch.lock() {
            if let Some(watch) = watch.take() {
                watch.abort();
            }
        }
    }
}
