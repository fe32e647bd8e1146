//! Cluster connection manager.
//!
//! [`ConnManager`] validates the cluster once at construction and then
//! hands out backup RPC stubs over one cached channel per member. The
//! cache lock is held across member lookup and dialing, so at most one
//! dial is in flight per manager and a failed dial never leaves an entry
//! behind.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use shardline_meta::client::DEFAULT_CONNECT_TIMEOUT;
use shardline_meta::{MetaClient, MetadataClient, SecurityConfig};
use tokio::sync::Mutex;
use tonic::transport::{Channel, ClientTlsConfig};
use tracing::{debug, error, info, warn};

use crate::config::ConnConfig;
use crate::dial::{Dialer, GrpcChannel, GrpcDialer, Transport};
use crate::error::{ConnError, ConnResult};
use crate::pool::ChannelPool;
use crate::proto::backup_service_client::BackupServiceClient;
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::storage::{Domain, Glue, LockResolver, Storage, StorageOwnership};
use crate::stores::{check_cluster_health, get_all_stores};
use crate::version::check_cluster_version;

/// Stub type handed out by the manager.
pub type BackupClient = BackupServiceClient<Channel>;

/// Owns the per-member channel cache and the lifetimes of the metadata
/// client and (optionally) the storage and domain.
pub struct ConnManager {
    metadata: Arc<dyn MetadataClient>,
    dialer: Arc<dyn Dialer>,
    storage: Arc<dyn Storage>,
    lock_resolver: Arc<dyn LockResolver>,
    domain: Option<Arc<dyn Domain>>,
    ownership: StorageOwnership,
    tls: Option<ClientTlsConfig>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    /// member id -> established channel
    channels: Mutex<HashMap<u64, GrpcChannel>>,
    closed: AtomicBool,
}

impl ConnManager {
    /// Connect to the metadata service named in `config` and validate the
    /// cluster.
    pub async fn new(config: ConnConfig, storage: Arc<dyn Storage>, glue: &dyn Glue) -> ConnResult<Self> {
        if storage.lock_resolver().is_none() {
            return Err(ConnError::NotTransactional);
        }

        let tls = load_tls(&config.security)?;
        let dialer = GrpcDialer::new(tls.clone(), config.keepalive.resolve()?, config.dial.resolve()?);

        let metadata = MetaClient::connect_with_tls(&config.meta_addrs, tls.clone(), DEFAULT_CONNECT_TIMEOUT)
            .await
            .map_err(|e| ConnError::metadata("failed to connect to metadata service", e))?;

        Self::with_collaborators(config, tls, Arc::new(metadata), Arc::new(dialer), storage, glue).await
    }

    /// Build a manager over an already constructed metadata client and
    /// dialer. `tls` is the configuration those were built with; the
    /// manager only records it. On failure the metadata client is closed
    /// before returning.
    pub async fn with_collaborators(
        config: ConnConfig,
        tls: Option<ClientTlsConfig>,
        metadata: Arc<dyn MetadataClient>,
        dialer: Arc<dyn Dialer>,
        storage: Arc<dyn Storage>,
        glue: &dyn Glue,
    ) -> ConnResult<Self> {
        match Self::init(&config, tls, metadata.clone(), dialer, storage, glue).await {
            Ok(manager) => Ok(manager),
            Err(e) => {
                error!(error = %e, "connection manager setup failed");
                metadata.close().await;
                Err(e)
            }
        }
    }

    async fn init(
        config: &ConnConfig,
        tls: Option<ClientTlsConfig>,
        metadata: Arc<dyn MetadataClient>,
        dialer: Arc<dyn Dialer>,
        storage: Arc<dyn Storage>,
        glue: &dyn Glue,
    ) -> ConnResult<Self> {
        let lock_resolver = storage.lock_resolver().ok_or(ConnError::NotTransactional)?;
        let retry = config.reset_retry.resolve()?;

        if config.check_requirements {
            let requirement = config.version_requirement()?;
            let members = metadata
                .get_all_members(true)
                .await
                .map_err(|e| ConnError::metadata("failed to list cluster members", e))?;
            check_cluster_version(&members, &requirement).map_err(|e| match e {
                ConnError::ClusterIncompatible(msg) => ConnError::ClusterIncompatible(format!(
                    "{msg}; set `check_requirements = false` to skip"
                )),
                other => other,
            })?;
        }

        let stores = get_all_stores(metadata.as_ref(), config.store_behavior).await?;
        let health = check_cluster_health(&stores)?;

        let domain = glue.domain(&storage).await.map_err(ConnError::Domain)?;
        let ownership = StorageOwnership::from_glue(glue);

        info!(
            stores = health.total,
            live = health.live,
            ?ownership,
            tls = tls.is_some(),
            "connection manager ready"
        );

        Ok(Self {
            metadata,
            dialer,
            storage,
            lock_resolver,
            domain,
            ownership,
            tls,
            retry,
            sleeper: Arc::new(TokioSleeper),
            channels: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Replace the clock used between reset attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Backup stub for `member_id`, dialing the member on first use.
    pub async fn backup_client(&self, member_id: u64) -> ConnResult<BackupClient> {
        let mut channels = self.channels.lock().await;
        self.ensure_open()?;

        if let Some(channel) = channels.get(&member_id) {
            return Ok(BackupServiceClient::new(channel.channel()));
        }

        let channel = self.connect_member(member_id).await?;
        let client = BackupServiceClient::new(channel.channel());
        channels.insert(member_id, channel);
        Ok(client)
    }

    /// Drop the cached channel for `member_id` and dial a fresh one,
    /// retrying per the reset policy.
    ///
    /// When every attempt fails the last error is returned and the member
    /// has no cached channel. Errors that cannot clear up between attempts,
    /// such as an unknown member, end the loop early.
    pub async fn reset_backup_client(&self, member_id: u64) -> ConnResult<BackupClient> {
        let mut channels = self.channels.lock().await;
        self.ensure_open()?;

        if let Some(old) = channels.remove(&member_id) {
            let addr = old.target().to_string();
            if let Err(e) = old.close() {
                warn!(member_id, %addr, error = %e, "failed to close stale channel");
            }
        }

        let mut last_error = None;
        for attempt in 0..self.retry.attempts {
            match self.connect_member(member_id).await {
                Ok(channel) => {
                    let client = BackupServiceClient::new(channel.channel());
                    channels.insert(member_id, channel);
                    info!(member_id, attempt, "member connection reset");
                    return Ok(client);
                }
                Err(e) => {
                    warn!(member_id, attempt, error = %e, "failed to reset member connection");
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    last_error = Some(e);
                    if attempt + 1 < self.retry.attempts {
                        self.sleeper.sleep(self.retry.delay(attempt)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ConnError::Config("reset_retry.attempts must be at least 1".to_string())
        }))
    }

    /// A lazily filled pool of up to `capacity` channels to one member.
    ///
    /// The member address is resolved once, here. The pool is independent
    /// of the manager's cache and must be closed by the caller.
    pub async fn member_channel_pool(
        &self,
        member_id: u64,
        capacity: NonZeroUsize,
    ) -> ConnResult<ChannelPool<GrpcChannel>> {
        self.ensure_open()?;
        let member = self
            .metadata
            .get_member(member_id)
            .await
            .map_err(|e| ConnError::metadata(format!("failed to resolve member {member_id}"), e))?;
        let addr = member.dial_address().to_string();
        debug!(member_id, %addr, capacity = capacity.get(), "creating member channel pool");

        let dialer = self.dialer.clone();
        Ok(ChannelPool::new(capacity, move || {
            let dialer = dialer.clone();
            let addr = addr.clone();
            async move { dialer.dial(&addr).await }
        }))
    }

    /// Close cached channels, then (when owned) the domain and storage,
    /// then the metadata client.
    ///
    /// Only the first call tears down collaborators; later calls just
    /// drain the cache.
    pub async fn close(&self) {
        let (first, drained) = {
            let mut channels = self.channels.lock().await;
            let first = !self.closed.swap(true, Ordering::SeqCst);
            (first, channels.drain().collect::<Vec<_>>())
        };

        for (member_id, channel) in drained {
            let addr = channel.target().to_string();
            if let Err(e) = channel.close() {
                warn!(member_id, %addr, error = %e, "failed to close member channel");
            }
        }

        if !first {
            return;
        }

        if self.ownership.is_owned() {
            if let Some(domain) = &self.domain {
                domain.close().await;
            }
            self.storage.set_shutting_down();
            if let Err(e) = self.storage.close().await {
                error!(error = %e, "failed to close storage");
            }
        }

        self.metadata.close().await;
        info!("connection manager closed");
    }

    async fn connect_member(&self, member_id: u64) -> ConnResult<GrpcChannel> {
        let member = self
            .metadata
            .get_member(member_id)
            .await
            .map_err(|e| ConnError::metadata(format!("failed to resolve member {member_id}"), e))?;
        let addr = member.dial_address();

        let channel = self.dialer.dial(addr).await?;
        info!(member_id, %addr, "connected to member");
        Ok(channel)
    }

    fn ensure_open(&self) -> ConnResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ConnError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn tls_config(&self) -> Option<&ClientTlsConfig> {
        self.tls.as_ref()
    }

    pub fn domain(&self) -> Option<&Arc<dyn Domain>> {
        self.domain.as_ref()
    }

    pub fn lock_resolver(&self) -> &Arc<dyn LockResolver> {
        &self.lock_resolver
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataClient> {
        &self.metadata
    }

    pub fn ownership(&self) -> StorageOwnership {
        self.ownership
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Members with a cached channel, ascending.
    pub async fn cached_member_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.channels.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

fn load_tls(security: &SecurityConfig) -> ConnResult<Option<ClientTlsConfig>> {
    security
        .load_tls()
        .map_err(|e| ConnError::Config(format!("security: {e}")))
}
