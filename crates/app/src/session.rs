//! Backend profile lifecycle.
//!
//! A `Session` owns everything bound to one backend connection: the store
//! handle, the device board, every listener and the voice commands. It is
//! built when a profile is selected and dropped on switch, which releases
//! its subscriptions. Nothing outside holds the connection directly.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{Config, ProfileEntry, Transport};
use crate::controller::Controller;
use crate::i18n::Language;
use crate::registry::{ProfileId, Registry};
use crate::schedule::ScheduleStore;
use crate::sensors::SensorFeed;
use crate::settings::{Settings, SettingsDb, SettingsPatch};
use crate::state::{AppState, SharedState};
use crate::store::{MemoryStore, MqttStore, RemoteStore};
use crate::sync::{SyncHandle, Synchronizer};
use crate::voice::{build_device_commands, Dispatcher, Speaker};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session {
    pub profile: ProfileId,
    pub name: String,
    pub registry: Registry,
    pub store: Arc<dyn RemoteStore>,
    pub shared: SharedState,
    pub controller: Controller,
    pub schedules: ScheduleStore,
    pub dispatcher: RwLock<Dispatcher>,
    _sync: SyncHandle,
    _sensors: SensorFeed,
}

impl Session {
    pub fn connect(entry: &ProfileEntry, language: Language, speaker: Arc<dyn Speaker>) -> Result<Self> {
        let Some(profile) = entry.profile_id() else {
            bail!("unknown profile id '{}'", entry.id);
        };
        let store: Arc<dyn RemoteStore> = match entry.transport {
            Transport::Mqtt => Arc::new(MqttStore::connect(&entry.mqtt_target())),
            Transport::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(Self::with_store(profile, &entry.name, store, language, speaker))
    }

    pub fn with_store(
        profile: ProfileId,
        name: &str,
        store: Arc<dyn RemoteStore>,
        language: Language,
        speaker: Arc<dyn Speaker>,
    ) -> Self {
        let registry = Registry::for_profile(profile);
        let encoding = profile.encoding();
        let shared = AppState::shared(registry);

        let controller = Controller::new(store.clone(), registry, encoding, shared.clone());
        let sync = Synchronizer::start(store.clone(), registry, encoding, shared.clone());
        let sensors = SensorFeed::start(store.clone(), shared.clone());
        let schedules = ScheduleStore::start(store.clone(), shared.clone());

        let mut dispatcher = Dispatcher::new(language, speaker, shared.clone());
        dispatcher.replace_all(language, build_device_commands(language, &controller));

        info!(%profile, name, devices = registry.len(), "session opened");

        Self {
            profile,
            name: name.to_string(),
            registry,
            store,
            shared,
            controller,
            schedules,
            dispatcher: RwLock::new(dispatcher),
            _sync: sync,
            _sensors: sensors,
        }
    }

    /// Rebuild the voice commands for `language`.
    pub async fn register_commands(&self, language: Language) {
        let commands = build_device_commands(language, &self.controller);
        self.dispatcher.write().await.replace_all(language, commands);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        info!(profile = %self.profile, "session closed");
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct App {
    config: Config,
    db: SettingsDb,
    settings: RwLock<Settings>,
    session: RwLock<Arc<Session>>,
    speaker: Arc<dyn Speaker>,
}

impl App {
    /// Restore persisted settings and open the last used profile.
    pub async fn open(config: Config, db: SettingsDb, speaker: Arc<dyn Speaker>) -> Result<Self> {
        let settings = db.load().await?;
        let mut profile = settings.current_firebase_id;
        if config.profile(profile).is_none() {
            let Some(fallback) = config.profiles.iter().find_map(ProfileEntry::profile_id) else {
                bail!("no usable backend profile configured");
            };
            warn!(%profile, %fallback, "stored profile not configured, falling back");
            profile = fallback;
        }
        let entry = config
            .profile(profile)
            .with_context(|| format!("profile {profile} not configured"))?;
        let session = Session::connect(entry, settings.language, speaker.clone())?;

        Ok(Self {
            config,
            db,
            settings: RwLock::new(settings),
            session: RwLock::new(Arc::new(session)),
            speaker,
        })
    }

    pub async fn session(&self) -> Arc<Session> {
        self.session.read().await.clone()
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn language(&self) -> Language {
        self.settings.read().await.language
    }

    pub fn profile_name(&self, id: ProfileId) -> Option<&str> {
        self.config.profile(id).map(|p| p.name.as_str())
    }

    /// Tear down the current session and open `id` with a fresh board.
    pub async fn switch_profile(&self, id: ProfileId) -> Result<()> {
        let Some(entry) = self.config.profile(id) else {
            bail!("profile {id} is not configured");
        };
        let language = self.language().await;

        let mut slot = self.session.write().await;
        if slot.profile == id {
            return Ok(());
        }
        let previous = slot.profile;
        let next = Session::connect(entry, language, self.speaker.clone())
            .with_context(|| format!("failed to open profile {id}"))?;
        // The old session's listeners stop once the last handle to it drops.
        *slot = Arc::new(next);
        drop(slot);

        self.db.set_profile(id).await?;
        self.settings.write().await.current_firebase_id = id;
        info!(from = %previous, to = %id, "backend profile switched");
        Ok(())
    }

    pub async fn set_language(&self, language: Language) -> Result<()> {
        self.update_settings(&SettingsPatch {
            language: Some(language),
            ..SettingsPatch::default()
        })
        .await
        .map(|_| ())
    }

    /// Persist `patch`; a language change re-registers the voice commands.
    pub async fn update_settings(&self, patch: &SettingsPatch) -> Result<Settings> {
        self.db.apply(patch).await?;
        let updated = {
            let mut s = self.settings.write().await;
            if let Some(v) = patch.language {
                s.language = v;
            }
            if let Some(v) = patch.theme_mode {
                s.theme_mode = v;
            }
            if let Some(v) = patch.notifications {
                s.notifications = v;
            }
            if let Some(v) = patch.sound_alerts {
                s.sound_alerts = v;
            }
            if let Some(v) = patch.auto_refresh {
                s.auto_refresh = v;
            }
            s.clone()
        };
        if let Some(language) = patch.language {
            self.session().await.register_commands(language).await;
            info!(%language, "language changed");
        }
        Ok(updated)
    }

    /// Wipe stored settings back to defaults. The active profile stays open
    /// and is stored again so a restart reopens it.
    pub async fn reset_settings(&self) -> Result<Settings> {
        let profile = self.session().await.profile;
        self.db.clear().await?;
        self.db.set_profile(profile).await?;
        let reset = Settings {
            current_firebase_id: profile,
            ..Settings::default()
        };
        *self.settings.write().await = reset.clone();
        self.session().await.register_commands(reset.language).await;
        info!(%profile, "settings reset");
        Ok(reset)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
