//! UpdatePipeline - debounced, diff-cached field writes
//!
//! Each input has its own channel: one cancellable delayed task, the pending
//! snapshot, and an in-flight flag. A burst of updates within the debounce
//! window collapses into one push carrying the last snapshot. Updates that
//! arrive while a push is in flight are held and pushed in the next cycle, so
//! at most one push per input is ever in flight.
//!
//! The cache records what vMix is known to display, keyed by the vMix target
//! the value was written to. It is updated only after a confirmed push.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::ConnectionManager;
use super::resolver::{FieldResolver, ResolvedValue};
use crate::config::{ConfigStore, FieldType, InputConfig};
use crate::drivers::{Driver, FieldBatch};
use crate::error::{SyncError, SyncResult};
use crate::snapshot::MatchSnapshot;

/// Last-applied values per (vMix target, field name)
#[derive(Debug, Default)]
pub struct FieldCache {
    values: HashMap<(String, String), String>,
    /// Image lane, reset independently after logo changes
    images: HashMap<(String, String), String>,
}

impl FieldCache {
    fn lane(&self, field_type: FieldType) -> &HashMap<(String, String), String> {
        match field_type {
            FieldType::Image => &self.images,
            _ => &self.values,
        }
    }

    pub fn get(&self, field_type: FieldType, target: &str, field: &str) -> Option<&str> {
        self.lane(field_type)
            .get(&(target.to_string(), field.to_string()))
            .map(String::as_str)
    }

    /// Record a confirmed batch
    pub fn record(&mut self, target: &str, batch: &FieldBatch) {
        let key = |field: &String| (target.to_string(), field.clone());
        for (field, value) in batch.text.iter().chain(batch.color.iter()) {
            self.values.insert(key(field), value.clone());
        }
        for (field, visible) in &batch.visibility {
            self.values.insert(key(field), visible.to_string());
        }
        for (field, value) in &batch.image {
            self.images.insert(key(field), value.clone());
        }
    }

    pub fn reset_images(&mut self) {
        self.images.clear();
    }

    pub fn reset_all(&mut self) {
        self.values.clear();
        self.images.clear();
    }

    /// Drop every entry written to one of `targets`
    pub fn invalidate_targets(&mut self, targets: &[String]) {
        let stale = |(target, _): &(String, String)| targets.iter().any(|t| t == target);
        self.values.retain(|key, _| !stale(key));
        self.images.retain(|key, _| !stale(key));
    }

    pub fn len(&self) -> usize {
        self.values.len() + self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Snapshot waiting for the next push of one input
#[derive(Clone)]
struct Pending {
    snapshot: Arc<MatchSnapshot>,
    force: bool,
}

#[derive(Default)]
struct Channel {
    seq: u64,
    timer: Option<JoinHandle<()>>,
    pending: Option<Pending>,
    in_flight: bool,
}

#[derive(Clone)]
pub struct UpdatePipeline {
    driver: Arc<dyn Driver>,
    store: ConfigStore,
    connection: ConnectionManager,
    resolver: Arc<RwLock<FieldResolver>>,
    debounce: Arc<RwLock<Duration>>,
    cache: Arc<Mutex<FieldCache>>,
    channels: Arc<Mutex<HashMap<String, Channel>>>,
    last_snapshot: Arc<RwLock<Option<Arc<MatchSnapshot>>>>,
}

impl UpdatePipeline {
    pub fn new(
        driver: Arc<dyn Driver>,
        store: ConfigStore,
        connection: ConnectionManager,
        resolver: FieldResolver,
        debounce: Duration,
    ) -> Self {
        Self {
            driver,
            store,
            connection,
            resolver: Arc::new(RwLock::new(resolver)),
            debounce: Arc::new(RwLock::new(debounce)),
            cache: Arc::new(Mutex::new(FieldCache::default())),
            channels: Arc::new(Mutex::new(HashMap::new())),
            last_snapshot: Arc::new(RwLock::new(None)),
        }
    }

    /// Apply new resolver settings and debounce window (settings save)
    pub fn reconfigure(&self, resolver: FieldResolver, debounce: Duration) {
        *self.resolver.write() = resolver;
        *self.debounce.write() = debounce;
    }

    pub fn last_snapshot(&self) -> Option<Arc<MatchSnapshot>> {
        self.last_snapshot.read().clone()
    }

    /// Queue a snapshot for every enabled input
    ///
    /// A change of match identity resets all caches and forces a full resend.
    pub fn update_match_data(&self, snapshot: MatchSnapshot, force: bool) {
        let snapshot = Arc::new(snapshot);
        let previous = self.last_snapshot.write().replace(Arc::clone(&snapshot));

        let mut force = force;
        if let Some(previous) = previous {
            let (old_id, new_id) = (previous.match_id(), snapshot.match_id());
            if new_id.is_some() && old_id != new_id {
                info!(
                    "🔄 Match changed ({} -> {}), full resend",
                    old_id.as_deref().unwrap_or("-"),
                    new_id.as_deref().unwrap_or("-")
                );
                self.reset_all();
                force = true;
            }
        }

        self.queue_all(snapshot, force);
    }

    /// Re-queue the last snapshot for every enabled input
    pub fn requeue(&self, force: bool) {
        if let Some(snapshot) = self.last_snapshot() {
            self.queue_all(snapshot, force);
        }
    }

    /// Re-queue the last snapshot for one input
    pub fn requeue_input(&self, input_id: &str, force: bool) {
        if let Some(snapshot) = self.last_snapshot() {
            self.arm(input_id, Pending { snapshot, force });
        }
    }

    fn queue_all(&self, snapshot: Arc<MatchSnapshot>, force: bool) {
        if !self.connection.is_connected() {
            debug!("Not connected, snapshot kept for the next connection");
            return;
        }
        for input in self.store.enabled_inputs() {
            self.arm(
                &input.id,
                Pending {
                    snapshot: Arc::clone(&snapshot),
                    force,
                },
            );
        }
    }

    /// Replace the pending snapshot of one input and restart its timer
    fn arm(&self, input_id: &str, pending: Pending) {
        let mut channels = self.channels.lock();
        let channel = channels.entry(input_id.to_string()).or_default();

        // A forced resend stays forced until it has been pushed
        let force = pending.force || channel.pending.as_ref().map(|p| p.force).unwrap_or(false);
        channel.pending = Some(Pending { force, ..pending });
        self.restart_timer(input_id, channel);
    }

    fn restart_timer(&self, input_id: &str, channel: &mut Channel) {
        channel.seq += 1;
        if let Some(timer) = channel.timer.take() {
            timer.abort();
        }

        let seq = channel.seq;
        let delay = *self.debounce.read();
        let this = self.clone();
        let id = input_id.to_string();
        channel.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.fire(&id, seq).await;
        }));
    }

    async fn fire(&self, input_id: &str, seq: u64) {
        let pending = {
            let mut channels = self.channels.lock();
            let Some(channel) = channels.get_mut(input_id) else {
                return;
            };
            if channel.seq != seq {
                return;
            }
            // From here on this task is the push, not a timer
            channel.timer = None;
            if channel.in_flight {
                return;
            }
            let Some(pending) = channel.pending.take() else {
                return;
            };
            channel.in_flight = true;
            pending
        };

        match self.push_input(input_id, &pending.snapshot, pending.force).await {
            Ok(0) => {},
            Ok(count) => debug!("Input '{}': {} field(s) pushed", input_id, count),
            Err(SyncError::Configuration(msg)) => {
                warn!("Input '{}' skipped: {}", input_id, msg)
            },
            Err(e) => warn!("⚠️ Push for input '{}' failed: {}", input_id, e),
        }

        let mut channels = self.channels.lock();
        if let Some(channel) = channels.get_mut(input_id) {
            channel.in_flight = false;
            if channel.pending.is_some() && channel.timer.is_none() {
                self.restart_timer(input_id, channel);
            }
        }
    }

    /// Fields of `input` whose resolved value differs from the cache
    pub fn changed_fields(
        &self,
        input: &InputConfig,
        target: &str,
        snapshot: &MatchSnapshot,
        force: bool,
    ) -> FieldBatch {
        let resolver = self.resolver.read().clone();
        let cache = self.cache.lock();
        let mut batch = FieldBatch::default();

        for (name, field) in &input.fields {
            let Some(value) = resolver.resolve(name, field, snapshot) else {
                continue;
            };
            let field_type = field.vmix_field_type;
            if !force && cache.get(field_type, target, name) == Some(value.cache_repr().as_str()) {
                continue;
            }

            match (field_type, value) {
                (FieldType::Visibility, ResolvedValue::Visible(visible)) => {
                    batch.visibility.insert(name.clone(), visible);
                },
                (FieldType::Color, ResolvedValue::Text(color)) => {
                    batch.color.insert(name.clone(), color);
                },
                (FieldType::Image, ResolvedValue::Text(image)) => {
                    batch.image.insert(name.clone(), image);
                },
                (_, value) => {
                    batch.text.insert(name.clone(), value.cache_repr());
                },
            }
        }
        batch
    }

    /// Resolve, diff and push one input; returns the number of fields sent
    pub async fn push_input(
        &self,
        input_id: &str,
        snapshot: &MatchSnapshot,
        force: bool,
    ) -> SyncResult<usize> {
        if !self.connection.is_connected() {
            return Err(SyncError::not_connected());
        }
        let generation = self.connection.generation();

        let input = self
            .store
            .input(input_id)
            .ok_or_else(|| SyncError::unknown_input(input_id))?;
        if !input.enabled {
            return Err(SyncError::Configuration(format!(
                "input '{}' is disabled",
                input.label()
            )));
        }
        let target = input.target().ok_or_else(|| {
            SyncError::Configuration(format!("input '{}' has no vMix identifier", input.label()))
        })?;

        let batch = self.changed_fields(&input, &target, snapshot, force);
        if batch.is_empty() {
            return Ok(0);
        }

        self.driver.push_fields(&target, &batch).await?;

        if self.connection.generation() != generation {
            debug!("Connection changed during push to {}, result discarded", target);
            return Ok(0);
        }
        self.cache.lock().record(&target, &batch);
        Ok(batch.len())
    }

    /// Forget cached image values only
    pub fn reset_image_fields_cache(&self) {
        self.cache.lock().reset_images();
        debug!("Image field cache reset");
    }

    pub fn reset_all(&self) {
        self.cache.lock().reset_all();
        debug!("Field caches reset");
    }

    pub fn invalidate_targets(&self, targets: &[String]) {
        self.cache.lock().invalidate_targets(targets);
    }

    pub fn cached(&self, field_type: FieldType, target: &str, field: &str) -> Option<String> {
        self.cache
            .lock()
            .get(field_type, target, field)
            .map(str::to_string)
    }

    /// Cancel every pending timer and drop queued snapshots
    ///
    /// In-flight pushes run to completion; their results are discarded by
    /// the generation check.
    pub fn cancel_all(&self) {
        let mut channels = self.channels.lock();
        for channel in channels.values_mut() {
            channel.seq += 1;
            channel.pending = None;
            if let Some(timer) = channel.timer.take() {
                timer.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ColorDefaults, FieldConfig};
    use crate::drivers::ConsoleDriver;
    use serde_json::json;

    fn make_input(target: &str) -> InputConfig {
        let mut input = AppConfig::from_yaml("vmix: { inputs: { score: {} } }")
            .unwrap()
            .vmix
            .inputs["score"]
            .clone();
        input.external_key = Some(target.to_string());
        input
            .fields
            .insert("TeamA".into(), FieldConfig::data("teamA.name", FieldType::Text));
        input
            .fields
            .insert("LogoA".into(), FieldConfig::data("teamA.logoPath", FieldType::Image));
        input
    }

    fn pipeline() -> UpdatePipeline {
        let driver = Arc::new(ConsoleDriver::new("test"));
        let store = ConfigStore::in_memory(AppConfig::from_yaml("vmix: {}").unwrap());
        let connection = ConnectionManager::new(driver.clone(), store.clone());
        UpdatePipeline::new(
            driver,
            store,
            connection,
            FieldResolver::new(ColorDefaults::default(), None),
            Duration::from_millis(300),
        )
    }

    #[test]
    fn test_changed_fields_respects_cache_lanes() {
        let pipeline = pipeline();
        let input = make_input("t1");
        let snap = MatchSnapshot::new(json!({ "teamA": { "name": "Alpha", "logoPath": "a.png" } }));

        let batch = pipeline.changed_fields(&input, "t1", &snap, false);
        assert_eq!(batch.len(), 2);
        pipeline.cache.lock().record("t1", &batch);

        assert!(pipeline.changed_fields(&input, "t1", &snap, false).is_empty());
        assert_eq!(pipeline.changed_fields(&input, "t1", &snap, true).len(), 2);

        pipeline.reset_image_fields_cache();
        let batch = pipeline.changed_fields(&input, "t1", &snap, false);
        assert!(batch.text.is_empty());
        assert_eq!(batch.image.get("LogoA").map(String::as_str), Some("a.png"));
    }

    #[test]
    fn test_invalidate_targets_only_touches_named_targets() {
        let mut cache = FieldCache::default();
        let mut batch = FieldBatch::default();
        batch.text.insert("TeamA".into(), "Alpha".into());
        batch.image.insert("LogoA".into(), "a.png".into());
        cache.record("old-key", &batch);
        cache.record("other", &batch);
        assert_eq!(cache.len(), 4);

        cache.invalidate_targets(&["old-key".to_string(), "13".to_string()]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(FieldType::Text, "other", "TeamA"), Some("Alpha"));
        assert_eq!(cache.get(FieldType::Text, "old-key", "TeamA"), None);

        cache.reset_all();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_push_requires_connection() {
        let pipeline = pipeline();
        let snap = MatchSnapshot::new(json!({}));
        assert_eq!(
            pipeline.push_input("score", &snap, false).await,
            Err(SyncError::not_connected())
        );
    }
}
