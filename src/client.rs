//! Application context
//!
//! [`SpeechClient`] wires one API client, one cache per collection, the
//! speech dispatcher and a revalidation driver together. Nothing here is
//! global; two clients built from the same config share no state.

use crate::cache::{CacheKey, CacheSnapshot, ResourceCache, SharedFetcher, Subscription};
use crate::config::{validate_config_result, ClientConfig};
use crate::dispatch::{DispatchFailure, FireAndForgetDispatcher, OutboundRequest};
use crate::sync::{DriverEvent, DriverHandle, RevalidationDriver};
use crate::view::ListView;
use crate::web::ApiClient;
use crate::Result;
use chrono::NaiveDateTime;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use speech_api::{paths, FileEntry, UserModel};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

/// Client for the text-to-speech backend
pub struct SpeechClient {
    config: ClientConfig,
    api: ApiClient,
    files: ResourceCache<Vec<FileEntry>>,
    users: ResourceCache<Vec<UserModel>>,
    current_user: ResourceCache<UserModel>,
    dispatcher: FireAndForgetDispatcher,
    driver: Option<DriverHandle>,
}

impl SpeechClient {
    /// Build a client from a validated config
    ///
    /// The revalidation driver is spawned on the current tokio runtime; built
    /// outside one, the client works without interval, focus or reconnect
    /// revalidation.
    pub fn new(config: ClientConfig) -> Result<Self> {
        validate_config_result(&config)?;

        let api = ApiClient::from_config(&config)?;
        let cache_config = config.cache_config();
        let files = ResourceCache::new(cache_config.clone());
        let users = ResourceCache::new(cache_config.clone());
        let current_user = ResourceCache::new(cache_config);

        let dispatcher =
            FireAndForgetDispatcher::new(Arc::new(api.clone()), config.dispatch.on_error);

        let driver = if Handle::try_current().is_ok() {
            let driver = RevalidationDriver::new(config.trigger_config())
                .with_target(Arc::new(files.clone()))
                .with_target(Arc::new(users.clone()))
                .with_target(Arc::new(current_user.clone()));
            let handle = driver.handle();
            driver.spawn();
            Some(handle)
        } else {
            tracing::debug!("No tokio runtime; revalidation driver not started");
            None
        };

        tracing::info!(base_url = %config.base_url, "Speech client ready");

        Ok(Self {
            config,
            api,
            files,
            users,
            current_user,
            dispatcher,
            driver,
        })
    }

    /// Build a client from ~/.config/speechsync/config.yaml and the environment
    pub fn from_default_config() -> Result<Self> {
        Self::new(ClientConfig::load_default()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    fn fetcher<T>(&self) -> SharedFetcher<CacheKey, T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        Arc::new(self.api.clone())
    }

    /// Submit text for synthesis and return immediately
    ///
    /// The resulting file appears in the files collection once the backend
    /// has produced it; there is no way to tell which submission it came from.
    pub fn submit_speech(&self, text: impl Into<String>) {
        self.dispatcher.send(OutboundRequest::speech(text));
    }

    /// Failed submissions, when the dispatch policy is `surface`
    pub fn submission_failures(&self) -> broadcast::Receiver<DispatchFailure> {
        self.dispatcher.failures()
    }

    pub fn watch_files<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CacheSnapshot<Vec<FileEntry>>) + Send + Sync + 'static,
    {
        self.files
            .subscribe(CacheKey::new(paths::FILES), self.fetcher(), listener)
    }

    pub fn watch_users<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CacheSnapshot<Vec<UserModel>>) + Send + Sync + 'static,
    {
        self.users
            .subscribe(CacheKey::new(paths::USERS), self.fetcher(), listener)
    }

    pub fn watch_current_user<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CacheSnapshot<UserModel>) + Send + Sync + 'static,
    {
        self.current_user
            .subscribe(CacheKey::new(paths::CURRENT_USER), self.fetcher(), listener)
    }

    pub fn files_snapshot(&self) -> CacheSnapshot<Vec<FileEntry>> {
        self.files.snapshot(&CacheKey::new(paths::FILES))
    }

    pub fn users_snapshot(&self) -> CacheSnapshot<Vec<UserModel>> {
        self.users.snapshot(&CacheKey::new(paths::USERS))
    }

    pub fn files_view(&self) -> ListView<FileEntry> {
        ListView::from_snapshot(&self.files_snapshot())
    }

    pub fn users_view(&self) -> ListView<UserModel> {
        ListView::from_snapshot(&self.users_snapshot())
    }

    /// Most recently generated file among the cached ones
    ///
    /// Fails on a timestamp not in the backend's directory-name format.
    pub fn latest_file(&self) -> Result<Option<FileEntry>> {
        let Some(files) = self.files_snapshot().data else {
            return Ok(None);
        };
        let mut latest: Option<(NaiveDateTime, &FileEntry)> = None;
        for file in files.iter() {
            let generated_at = file.parsed_timestamp()?;
            if latest.map_or(true, |(newest, _)| generated_at > newest) {
                latest = Some((generated_at, file));
            }
        }
        Ok(latest.map(|(_, file)| file.clone()))
    }

    pub fn current_user(&self) -> Option<Arc<UserModel>> {
        self.current_user
            .snapshot(&CacheKey::new(paths::CURRENT_USER))
            .data
    }

    /// Re-fetch the files list; resolves once it has settled
    pub fn refresh_files(&self) -> BoxFuture<'static, ()> {
        self.files.revalidate(&CacheKey::new(paths::FILES))
    }

    pub fn refresh_users(&self) -> BoxFuture<'static, ()> {
        self.users.revalidate(&CacheKey::new(paths::USERS))
    }

    pub fn files_cache(&self) -> &ResourceCache<Vec<FileEntry>> {
        &self.files
    }

    pub fn users_cache(&self) -> &ResourceCache<Vec<UserModel>> {
        &self.users
    }

    /// Handle of the revalidation driver, if one is running
    pub fn driver(&self) -> Option<&DriverHandle> {
        self.driver.as_ref()
    }

    pub fn driver_events(&self) -> Option<broadcast::Receiver<DriverEvent>> {
        self.driver.as_ref().map(DriverHandle::subscribe)
    }

    /// Forward an application focus signal to the driver
    pub fn notify_focus(&self) {
        if let Some(driver) = &self.driver {
            if let Err(e) = driver.focus() {
                tracing::debug!(error = %e, "Focus signal dropped");
            }
        }
    }

    /// Forward a network reconnect signal to the driver
    pub fn notify_reconnect(&self) {
        if let Some(driver) = &self.driver {
            if let Err(e) = driver.reconnect() {
                tracing::debug!(error = %e, "Reconnect signal dropped");
            }
        }
    }

    /// Stop the driver and drop every cache entry
    ///
    /// Outstanding subscriptions become inert; the client should not be used
    /// afterwards.
    pub fn dispose(&self) {
        if let Some(driver) = &self.driver {
            if driver.shutdown().is_err() {
                tracing::trace!("Driver already stopped");
            }
        }
        self.files.dispose();
        self.users.dispose();
        self.current_user.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.files.is_disposed()
    }
}

impl std::fmt::Debug for SpeechClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechClient")
            .field("base_url", &self.config.base_url)
            .field("files", &self.files)
            .field("users", &self.users)
            .field("driver", &self.driver.is_some())
            .finish()
    }
}
