use crate::drivers::traits::{DeviceDriver, DriverResult, TagRequest};
use crate::tags::engine::{TagChange, TagEngine};
use crate::tags::structures::{Quality, Tag, TagValue, ValueVariant};
use crate::tags::transform::ValueTransformer;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_SCAN_RATE_MS: u64 = 1000;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Write path shared by channels and trigger result reporting.
#[async_trait]
pub trait TagWriter: Send + Sync {
    /// Write `value` to the named tag. Unknown names are ignored.
    async fn write_tag(&self, name: &str, value: ValueVariant) -> DriverResult<()>;
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Polling session bound to one device and its tags.
pub struct Channel {
    id: String,
    driver: Arc<dyn DeviceDriver>,
    tags: HashMap<String, Arc<Tag>>,
    requests: Vec<TagRequest>,
    scan_interval: Duration,
    retry_delay: Duration,
    connect_timeout: Duration,
    transformer: Arc<ValueTransformer>,
    engine: TagEngine,
    running: Mutex<Option<RunningLoop>>,
}

impl Channel {
    pub fn new(
        driver: Arc<dyn DeviceDriver>,
        tags: Vec<Arc<Tag>>,
        transformer: Arc<ValueTransformer>,
        engine: TagEngine,
    ) -> Self {
        let config = driver.config();
        let scan_rate_ms = config
            .scan_rate_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_SCAN_RATE_MS);
        let retry_delay_ms = config
            .retry_delay_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_RETRY_DELAY_MS);
        let connect_timeout_ms = config
            .connect_timeout_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);

        let requests = tags
            .iter()
            .filter(|tag| tag.access.is_readable())
            .map(|tag| TagRequest {
                name: tag.name.clone(),
                address: tag.address.clone(),
                data_type: tag.data_type,
            })
            .collect();

        Channel {
            id: config.id.clone(),
            driver,
            tags: tags
                .into_iter()
                .map(|tag| (tag.name.clone(), tag))
                .collect(),
            requests,
            scan_interval: Duration::from_millis(scan_rate_ms),
            retry_delay: Duration::from_millis(retry_delay_ms),
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            transformer,
            engine,
            running: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn driver(&self) -> &Arc<dyn DeviceDriver> {
        &self.driver
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &String> {
        self.tags.keys()
    }

    pub fn contains_tag(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Spawn the polling loop. Calling it again while running does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("Channel '{}' already running", self.id);
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run(cancel.clone()));
        *running = Some(RunningLoop { cancel, handle });
    }

    /// Cancel the loop, wait for it to finish, then disconnect.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            error!("Channel '{}' loop ended abnormally: {}", self.id, e);
        }
        if let Err(e) = self.driver.disconnect().await {
            warn!("Channel '{}' failed to disconnect: {}", self.id, e);
        }
        info!("Channel '{}' stopped", self.id);
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            "Channel '{}' polling {} tags every {:?}",
            self.id,
            self.requests.len(),
            self.scan_interval
        );
        while !cancel.is_cancelled() {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.poll_once() => outcome,
            };
            let delay = match outcome {
                Ok(()) => self.scan_interval,
                Err(e) => {
                    error!(
                        "Channel '{}' poll failed: {}. Retrying in {:?}",
                        self.id, e, self.retry_delay
                    );
                    self.mark_bad();
                    self.retry_delay
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }
        debug!("Channel '{}' loop exited", self.id);
    }

    /// One connect/read/update cycle.
    pub async fn poll_once(&self) -> DriverResult<()> {
        if self.driver.check_status().await.is_err() {
            info!("Channel '{}' connecting to {}", self.id, self.driver.config().address);
            timeout(self.connect_timeout, self.driver.connect())
                .await
                .map_err(|_| {
                    format!(
                        "connection to {} timed out after {:?}",
                        self.driver.config().address,
                        self.connect_timeout
                    )
                })??;
        }
        if self.requests.is_empty() {
            return Ok(());
        }

        let results = self.driver.read_tags(&self.requests).await?;
        for (name, reading) in results {
            match self.tags.get(&name) {
                Some(tag) => self.apply(tag, reading),
                None => debug!("Channel '{}' ignoring unrequested tag '{}'", self.id, name),
            }
        }
        Ok(())
    }

    fn apply(&self, tag: &Arc<Tag>, reading: TagValue) {
        let value = if reading.quality == Quality::Good && !reading.value.is_null() {
            self.transformer.apply(tag, reading.value)
        } else {
            reading.value
        };
        self.publish_update(tag, value, reading.quality);
    }

    fn publish_update(&self, tag: &Arc<Tag>, value: ValueVariant, quality: Quality) {
        if let Some((previous, current)) = tag.replace(value, quality) {
            self.engine.notify(TagChange {
                tag_name: tag.name.clone(),
                previous,
                current,
            });
        }
    }

    /// Keep last values but flag them Bad after a failed cycle.
    fn mark_bad(&self) {
        for tag in self.tags.values() {
            let snapshot = tag.snapshot();
            if snapshot.quality != Quality::Bad {
                self.publish_update(tag, snapshot.value, Quality::Bad);
            }
        }
    }
}

#[async_trait]
impl TagWriter for Channel {
    async fn write_tag(&self, name: &str, value: ValueVariant) -> DriverResult<()> {
        let Some(tag) = self.tags.get(name) else {
            debug!("Channel '{}' ignoring write to unknown tag '{}'", self.id, name);
            return Ok(());
        };
        if !tag.access.is_writable() {
            return Err(format!("tag '{}' is read-only", name).into());
        }
        let value = value.coerce_to(tag.data_type).ok_or_else(|| {
            format!("value {:?} does not fit tag '{}' ({:?})", value, name, tag.data_type)
        })?;
        let request = TagRequest {
            name: tag.name.clone(),
            address: tag.address.clone(),
            data_type: tag.data_type,
        };
        self.driver.write_tag(&request, value).await
    }
}

/// Owns every channel and routes writes to the channel holding the tag.
pub struct ChannelManager {
    channels: Vec<Arc<Channel>>,
    routes: HashMap<String, Arc<Channel>>,
}

impl ChannelManager {
    pub fn new(channels: Vec<Arc<Channel>>) -> Self {
        let mut routes = HashMap::new();
        for channel in &channels {
            for name in channel.tag_names() {
                routes.insert(name.clone(), Arc::clone(channel));
            }
        }
        ChannelManager { channels, routes }
    }

    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    pub fn channel(&self, id: &str) -> Option<&Arc<Channel>> {
        self.channels.iter().find(|c| c.id() == id)
    }

    pub fn start_all(&self) {
        for channel in &self.channels {
            channel.start();
        }
    }

    pub async fn stop_all(&self) {
        for channel in &self.channels {
            channel.stop().await;
        }
    }

    /// (channel id, connected) for every channel.
    pub async fn connection_status(&self) -> Vec<(String, bool)> {
        let mut status = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let connected = channel.driver().check_status().await.is_ok();
            status.push((channel.id().to_string(), connected));
        }
        status
    }
}

#[async_trait]
impl TagWriter for ChannelManager {
    async fn write_tag(&self, name: &str, value: ValueVariant) -> DriverResult<()> {
        match self.routes.get(name) {
            Some(channel) => channel.write_tag(name, value).await,
            None => {
                debug!("Ignoring write to unknown tag '{}'", name);
                Ok(())
            }
        }
    }
}
