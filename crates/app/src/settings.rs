use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::i18n::Language;
use crate::registry::ProfileId;

const KEY_LANGUAGE: &str = "language";
const KEY_THEME_MODE: &str = "themeMode";
const KEY_PROFILE: &str = "currentFirebaseId";
const KEY_NOTIFICATIONS: &str = "notifications";
const KEY_SOUND_ALERTS: &str = "soundAlerts";
const KEY_AUTO_REFRESH: &str = "autoRefresh";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub language: Language,
    pub theme_mode: ThemeMode,
    pub current_firebase_id: ProfileId,
    pub notifications: bool,
    pub sound_alerts: bool,
    pub auto_refresh: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language: Language::Vi,
            theme_mode: ThemeMode::System,
            current_firebase_id: ProfileId::IotDemo,
            notifications: true,
            sound_alerts: true,
            auto_refresh: true,
        }
    }
}

/// Partial update; `None` fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub language: Option<Language>,
    pub theme_mode: Option<ThemeMode>,
    pub notifications: Option<bool>,
    pub sound_alerts: Option<bool>,
    pub auto_refresh: Option<bool>,
}

#[derive(Clone)]
pub struct SettingsDb {
    pool: Pool<Sqlite>,
}

impl SettingsDb {
    /// db_url examples:
    /// - "sqlite:shrimptech.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal);

        // Every connection to `:memory:` is its own database.
        let in_memory = db_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .min_connections(if in_memory { 1 } else { 0 })
            .idle_timeout(None)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    /// Stored settings over defaults. A value that does not parse is
    /// reported and replaced by its default.
    pub async fn load(&self) -> Result<Settings> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await
            .context("load settings failed")?;

        let mut s = Settings::default();
        for (key, raw) in rows {
            match key.as_str() {
                KEY_LANGUAGE => assign(&mut s.language, &key, &raw),
                KEY_THEME_MODE => assign(&mut s.theme_mode, &key, &raw),
                KEY_PROFILE => assign(&mut s.current_firebase_id, &key, &raw),
                KEY_NOTIFICATIONS => assign(&mut s.notifications, &key, &raw),
                KEY_SOUND_ALERTS => assign(&mut s.sound_alerts, &key, &raw),
                KEY_AUTO_REFRESH => assign(&mut s.auto_refresh, &key, &raw),
                other => debug!(key = other, "ignoring unknown setting"),
            }
        }
        Ok(s)
    }

    pub async fn set_language(&self, language: Language) -> Result<()> {
        self.put(KEY_LANGUAGE, &language).await
    }

    pub async fn set_theme_mode(&self, mode: ThemeMode) -> Result<()> {
        self.put(KEY_THEME_MODE, &mode).await
    }

    pub async fn set_profile(&self, profile: ProfileId) -> Result<()> {
        self.put(KEY_PROFILE, &profile).await
    }

    pub async fn set_notifications(&self, on: bool) -> Result<()> {
        self.put(KEY_NOTIFICATIONS, &on).await
    }

    pub async fn set_sound_alerts(&self, on: bool) -> Result<()> {
        self.put(KEY_SOUND_ALERTS, &on).await
    }

    pub async fn set_auto_refresh(&self, on: bool) -> Result<()> {
        self.put(KEY_AUTO_REFRESH, &on).await
    }

    /// Persist every field present in `patch`.
    pub async fn apply(&self, patch: &SettingsPatch) -> Result<()> {
        if let Some(v) = patch.language {
            self.set_language(v).await?;
        }
        if let Some(v) = patch.theme_mode {
            self.set_theme_mode(v).await?;
        }
        if let Some(v) = patch.notifications {
            self.set_notifications(v).await?;
        }
        if let Some(v) = patch.sound_alerts {
            self.set_sound_alerts(v).await?;
        }
        if let Some(v) = patch.auto_refresh {
            self.set_auto_refresh(v).await?;
        }
        Ok(())
    }

    /// Drop every stored setting; the next `load` returns defaults.
    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM settings")
            .execute(&self.pool)
            .await
            .context("clear settings failed")?;
        Ok(())
    }

    async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value).with_context(|| format!("encode setting {key}"))?;
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(raw)
        .execute(&self.pool)
        .await
        .with_context(|| format!("save setting {key} failed"))?;
        Ok(())
    }

    #[cfg(test)]
    async fn put_raw(&self, key: &str, raw: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(raw)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn assign<T: for<'de> Deserialize<'de>>(slot: &mut T, key: &str, raw: &str) {
    match serde_json::from_str(raw) {
        Ok(v) => *slot = v,
        Err(e) => warn!(key, raw, "bad stored setting, using default: {e}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn db() -> SettingsDb {
        let db = SettingsDb::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn empty_db_loads_defaults() {
        let s = db().await.load().await.unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.language, Language::Vi);
        assert_eq!(s.current_firebase_id, ProfileId::IotDemo);
    }

    #[tokio::test]
    async fn setters_persist() {
        let db = db().await;
        db.set_language(Language::En).await.unwrap();
        db.set_theme_mode(ThemeMode::Dark).await.unwrap();
        db.set_profile(ProfileId::Nckh).await.unwrap();
        db.set_sound_alerts(false).await.unwrap();

        let s = db.load().await.unwrap();
        assert_eq!(s.language, Language::En);
        assert_eq!(s.theme_mode, ThemeMode::Dark);
        assert_eq!(s.current_firebase_id, ProfileId::Nckh);
        assert!(!s.sound_alerts);
        assert!(s.notifications);
    }

    #[tokio::test]
    async fn corrupt_values_fall_back() {
        let db = db().await;
        db.put_raw(KEY_LANGUAGE, "\"fr\"").await.unwrap();
        db.put_raw(KEY_AUTO_REFRESH, "not json").await.unwrap();
        db.put_raw(KEY_PROFILE, "\"firebase2\"").await.unwrap();

        let s = db.load().await.unwrap();
        assert_eq!(s.language, Language::Vi);
        assert!(s.auto_refresh);
        assert_eq!(s.current_firebase_id, ProfileId::Nckh);
    }

    #[tokio::test]
    async fn patch_only_touches_given_fields() {
        let db = db().await;
        db.set_notifications(false).await.unwrap();
        let patch: SettingsPatch = serde_json::from_str(r#"{"themeMode":"light"}"#).unwrap();
        db.apply(&patch).await.unwrap();

        let s = db.load().await.unwrap();
        assert_eq!(s.theme_mode, ThemeMode::Light);
        assert!(!s.notifications);
    }

    #[tokio::test]
    async fn clear_restores_defaults() {
        let db = db().await;
        db.set_language(Language::En).await.unwrap();
        db.clear().await.unwrap();
        assert_eq!(db.load().await.unwrap(), Settings::default());
    }

    #[test]
    fn settings_serialize_with_stored_key_names() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["themeMode"], "system");
        assert_eq!(json["currentFirebaseId"], "firebase1");
        assert_eq!(json["soundAlerts"], true);
    }
}
