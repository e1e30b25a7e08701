//! App Core for Linkshelf.
//!
//! Resolves settings into a backend and a signed-in session, and owns the
//! bookmark list view model for that session.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::database::Database;
use crate::managers::bookmark_list::{BookmarkListConfig, BookmarkListViewModel};
use crate::platform;
use crate::services::data_service::{DataServiceClient, MutationGateway};
use crate::services::local_backend::LocalBackend;
use crate::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use crate::types::errors::{AppError, SettingsError};
use crate::types::session::SessionContext;
use crate::types::settings::{BackendKind, ClientSettings, ViewSettings};

/// Hosted access token for the signed-in user.
pub const ENV_ACCESS_TOKEN: &str = "LINKSHELF_ACCESS_TOKEN";

const DATABASE_FILE: &str = "linkshelf.db";

/// Central application struct: one session, one bookmark list.
///
/// `settings` is what this session was built from. Edits made through
/// `settings_engine` are persisted and take effect on the next launch.
pub struct App {
    pub settings: ClientSettings,
    pub settings_engine: Option<Mutex<SettingsEngine>>,
    pub bookmarks: BookmarkListViewModel,
}

impl App {
    /// Loads settings (file plus `LINKSHELF_*` overrides) and builds the app.
    pub fn new(settings_path: Option<String>) -> Result<Self, AppError> {
        let mut engine = SettingsEngine::new(settings_path);
        let settings = engine.load_with_env()?;
        info!(config = engine.get_config_path(), backend = ?settings.backend, "settings loaded");
        let mut app = Self::from_settings(settings)?;
        app.settings_engine = Some(Mutex::new(engine));
        Ok(app)
    }

    /// Builds the backend named by `settings` and signs in.
    pub fn from_settings(settings: ClientSettings) -> Result<Self, AppError> {
        match settings.backend {
            BackendKind::Local => {
                let path = match &settings.local.database_path {
                    Some(p) => PathBuf::from(p),
                    None => platform::get_data_dir().join(DATABASE_FILE),
                };
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent).map_err(|e| {
                            SettingsError::IoError(format!("Failed to create data directory: {}", e))
                        })?;
                    }
                }
                let db = Database::open(&path)?;
                let backend = Arc::new(LocalBackend::new(db));
                let session = backend.sign_in(&settings.local.user_email)?;
                info!(path = %path.display(), user_id = %session.user_id(), "local backend ready");
                let view = settings.view.clone();
                Ok(Self::assemble(settings, backend.clone(), backend, session, &view))
            }
            BackendKind::Hosted => Self::hosted(settings),
        }
    }

    #[cfg(feature = "hosted")]
    fn hosted(settings: ClientSettings) -> Result<Self, AppError> {
        use crate::services::rest_backend::RestBackend;

        let token = std::env::var(ENV_ACCESS_TOKEN).map_err(|_| {
            AppError::Unauthenticated(format!("{} is not set", ENV_ACCESS_TOKEN))
        })?;
        let session = SessionContext::from_access_token(token.trim())?;
        let backend = Arc::new(RestBackend::new(&settings.hosted)?);
        info!(url = %settings.hosted.base_url, user_id = %session.user_id(), "hosted backend ready");
        let view = settings.view.clone();
        Ok(Self::assemble(settings, backend.clone(), backend, session, &view))
    }

    #[cfg(not(feature = "hosted"))]
    fn hosted(_settings: ClientSettings) -> Result<Self, AppError> {
        Err(AppError::Backend(
            "built without the `hosted` feature".to_string(),
        ))
    }

    /// An app over a fresh in-memory local backend, signed in as `email`.
    pub fn in_memory(email: &str) -> Result<Self, AppError> {
        let backend = Arc::new(LocalBackend::open_in_memory()?);
        let session = backend.sign_in(email)?;
        let mut settings = ClientSettings::default();
        settings.local.user_email = email.to_string();
        let view = settings.view.clone();
        Ok(Self::assemble(settings, backend.clone(), backend, session, &view))
    }

    /// An app over caller-supplied collaborators.
    pub fn with_backend(
        data: Arc<dyn DataServiceClient>,
        gateway: Arc<dyn MutationGateway>,
        session: SessionContext,
        view: &ViewSettings,
    ) -> Self {
        Self::assemble(ClientSettings::default(), data, gateway, session, view)
    }

    fn assemble(
        mut settings: ClientSettings,
        data: Arc<dyn DataServiceClient>,
        gateway: Arc<dyn MutationGateway>,
        session: SessionContext,
        view: &ViewSettings,
    ) -> Self {
        settings.view = view.clone();
        let bookmarks =
            BookmarkListViewModel::new(data, gateway, session, BookmarkListConfig::from(view));
        Self {
            settings,
            settings_engine: None,
            bookmarks,
        }
    }

    pub fn session(&self) -> &SessionContext {
        self.bookmarks.session()
    }

    /// Mounts the bookmark list. Must run inside a Tokio runtime.
    pub async fn start(&self) -> bool {
        self.bookmarks.initialize().await
    }

    pub fn dispose(&self) {
        self.bookmarks.dispose();
    }
}
