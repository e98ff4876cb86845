// Discord Rich Presence bridge.
//
// The handle lives behind one mutex shared by the inline update path and
// background reload tasks, so at most one mutation is in flight. Presence is
// best-effort everywhere: a failed update discards the handle (further
// updates become no-ops) and the only recovery is an explicit reload.

use anyhow::{anyhow, Result};
use discord_rich_presence::activity::{Activity, Assets, Button, Timestamps};
use discord_rich_presence::{DiscordIpc, DiscordIpcClient};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::config::PresenceConfig;
use crate::library;
use crate::share::ShareBridge;
use crate::term;

/// Structured presence update. Optional fields are simply left off the
/// activity; `duration_secs` feeds the deep-link elapsed offset.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub name: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub details: Option<String>,
    pub duration_secs: f64,
}

/// Fully composed activity, ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityFields {
    pub details: String,
    pub state: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub large_image: Option<String>,
    pub large_text: Option<String>,
    /// (label, url) pairs.
    pub buttons: Vec<(String, String)>,
}

/// Seam over the presence service: any raised condition means the handle is
/// now invalid and must be discarded.
pub trait PresenceClient: Send {
    fn set_activity(&mut self, fields: &ActivityFields) -> Result<()>;
    fn close(&mut self);
}

pub struct DiscordPresence {
    client: DiscordIpcClient,
}

impl DiscordPresence {
    pub fn connect(app_id: &str) -> Result<Self> {
        // The IPC client errors are not Send, so flatten them here.
        let mut client = DiscordIpcClient::new(app_id).map_err(|e| anyhow!("{e}"))?;
        client.connect().map_err(|e| anyhow!("{e}"))?;
        Ok(Self { client })
    }
}

impl PresenceClient for DiscordPresence {
    fn set_activity(&mut self, fields: &ActivityFields) -> Result<()> {
        let mut timestamps = Timestamps::new();
        if let Some(start) = fields.start {
            timestamps = timestamps.start(start);
        }
        if let Some(end) = fields.end {
            timestamps = timestamps.end(end);
        }

        let mut assets = Assets::new();
        if let Some(image) = &fields.large_image {
            assets = assets.large_image(image);
        }
        if let Some(text) = &fields.large_text {
            assets = assets.large_text(text);
        }

        let mut activity = Activity::new()
            .details(&fields.details)
            .state(&fields.state)
            .timestamps(timestamps)
            .assets(assets);

        let buttons: Vec<Button> = fields
            .buttons
            .iter()
            .map(|(label, url)| Button::new(label, url))
            .collect();
        if !buttons.is_empty() {
            activity = activity.buttons(buttons);
        }

        self.client
            .set_activity(activity)
            .map_err(|e| anyhow!("{e}"))
    }

    fn close(&mut self) {
        let _ = self.client.close();
    }
}

/// Constructs a fresh, connected presence client; used at startup and on
/// every reload.
pub type PresenceOpener = Box<dyn Fn() -> Result<Box<dyn PresenceClient>> + Send + Sync>;

#[derive(Debug, Clone, Deserialize)]
struct EnrichmentReply {
    maxres: String,
    #[serde(rename = "channelTitle")]
    channel_title: Option<String>,
}

pub struct PresenceBridge {
    handle: Mutex<Option<Box<dyn PresenceClient>>>,
    last_update: Mutex<Option<UpdateRequest>>,
    opener: PresenceOpener,
    share: Option<Arc<ShareBridge>>,
    disable_api: bool,
    http: reqwest::blocking::Client,
    enrich_cache: Mutex<HashMap<String, EnrichmentReply>>,
    config: PresenceConfig,
}

impl PresenceBridge {
    pub fn new(
        opener: PresenceOpener,
        share: Option<Arc<ShareBridge>>,
        disable_api: bool,
        config: PresenceConfig,
    ) -> Result<Arc<Self>> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.api_timeout_ms))
            .build()?;

        Ok(Arc::new(Self {
            handle: Mutex::new(None),
            last_update: Mutex::new(None),
            opener,
            share,
            disable_api,
            http,
            enrich_cache: Mutex::new(HashMap::new()),
            config,
        }))
    }

    /// First connection attempt at startup. Failure just leaves the handle
    /// absent; playback does not need presence.
    pub fn connect_initial(&self) {
        match (self.opener)() {
            Ok(client) => *self.handle.lock().unwrap() = Some(client),
            Err(e) => warn!("no presence: {e}"),
        }
    }

    /// Dispatch an update on a background task. Fire-and-forget; the
    /// foreground loop never waits on it.
    pub fn update(self: &Arc<Self>, request: UpdateRequest) {
        let bridge = Arc::clone(self);
        tokio::task::spawn_blocking(move || bridge.update_blocking(request));
    }

    /// Close and reconnect the handle on a background task, then re-issue
    /// the most recent update. Failures are swallowed.
    pub fn reload(self: &Arc<Self>) {
        let bridge = Arc::clone(self);
        tokio::task::spawn_blocking(move || bridge.reload_blocking());
    }

    /// Close the handle for good; used during process teardown.
    pub fn shutdown(&self) {
        if let Some(mut client) = self.handle.lock().unwrap().take() {
            client.close();
        }
    }

    pub(crate) fn update_blocking(&self, request: UpdateRequest) {
        *self.last_update.lock().unwrap() = Some(request.clone());

        let mut handle = self.handle.lock().unwrap();
        self.apply_locked(&mut handle, &request);
    }

    pub(crate) fn reload_blocking(&self) {
        let mut handle = self.handle.lock().unwrap();

        if let Some(mut client) = handle.take() {
            client.close();
        }
        match (self.opener)() {
            Ok(client) => *handle = Some(client),
            Err(e) => {
                debug!("presence reload failed: {e}");
                return;
            }
        }

        let last = self.last_update.lock().unwrap().clone();
        if let Some(request) = last {
            self.apply_locked(&mut handle, &request);
        }
    }

    /// Apply one update while the handle lock is held. Absent handle is a
    /// no-op; a raised condition discards the handle.
    fn apply_locked(
        &self,
        handle: &mut Option<Box<dyn PresenceClient>>,
        request: &UpdateRequest,
    ) {
        let Some(client) = handle.as_mut() else {
            return;
        };

        let fields = self.compose(request);
        if let Err(e) = client.set_activity(&fields) {
            debug!("presence update failed, dropping handle: {e}");
            if let Some(mut client) = handle.take() {
                client.close();
            }
        }
    }

    fn compose(&self, request: &UpdateRequest) -> ActivityFields {
        let video_id = library::extract_video_id(&request.name);

        let (large_image, large_text) = match &video_id {
            Some(id) => self.enrich(id),
            None => (None, None),
        };

        let mut buttons = Vec::new();
        if let Some(id) = &video_id {
            buttons.push(("Join".to_string(), self.join_url(id, request)));
        }
        buttons.push(("Source code".to_string(), self.config.source_url.clone()));

        let lines = term::wrap_title(&request.name);
        let details = format!(
            "{}{}",
            request.details.clone().unwrap_or_default(),
            lines.first().map(|l| l.trim()).unwrap_or("")
        );
        let state = lines
            .get(1..)
            .map(|rest| rest.concat().trim().to_string())
            .unwrap_or_default();

        ActivityFields {
            details,
            state,
            start: request.start,
            end: request.end,
            large_image,
            large_text,
            buttons,
        }
    }

    /// Deep link other people can follow: the share page when sharing is
    /// on, otherwise the platform watch URL with the elapsed offset.
    fn join_url(&self, video_id: &str, request: &UpdateRequest) -> String {
        if let Some(share) = &self.share {
            return share.share_link();
        }

        match request.end {
            Some(end) => {
                let offset = (request.duration_secs - (end as f64 - unix_now())).round();
                format!(
                    "https://youtube.com/watch?v={video_id}&t={}",
                    offset.max(0.0) as i64
                )
            }
            None => format!("https://youtube.com/watch?v={video_id}"),
        }
    }

    /// Best-effort thumbnail/channel lookup with a short timeout. Any
    /// failure falls back to the deterministic thumbnail URL; successes are
    /// cached for the rest of the run.
    fn enrich(&self, video_id: &str) -> (Option<String>, Option<String>) {
        if self.disable_api {
            return (Some(fallback_thumbnail(video_id)), None);
        }

        if let Some(hit) = self.enrich_cache.lock().unwrap().get(video_id) {
            return (Some(hit.maxres.clone()), hit.channel_title.clone());
        }

        let url = format!("{}{video_id}", self.config.api_url);
        let reply: Result<EnrichmentReply> = (|| {
            Ok(self
                .http
                .get(&url)
                .send()?
                .error_for_status()?
                .json::<EnrichmentReply>()?)
        })();

        match reply {
            Ok(reply) => {
                let result = (Some(reply.maxres.clone()), reply.channel_title.clone());
                self.enrich_cache
                    .lock()
                    .unwrap()
                    .insert(video_id.to_string(), reply);
                result
            }
            Err(e) => {
                debug!("enrichment lookup failed for {video_id}: {e}");
                (Some(fallback_thumbnail(video_id)), None)
            }
        }
    }
}

pub fn fallback_thumbnail(video_id: &str) -> String {
    format!("https://img.youtube.com/vi/{video_id}/maxresdefault.jpg")
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Current unix timestamp in whole seconds, for presence start/end fields.
pub fn unix_now_secs() -> i64 {
    unix_now() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockClient {
        calls: Arc<AtomicUsize>,
        fail: bool,
        closed: Arc<AtomicUsize>,
    }

    impl PresenceClient for MockClient {
        fn set_activity(&mut self, _fields: &ActivityFields) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(anyhow!("pipe closed"))
            } else {
                Ok(())
            }
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct MockCounters {
        calls: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        opens: Arc<AtomicUsize>,
    }

    fn bridge_with_mock(fail: bool) -> (Arc<PresenceBridge>, MockCounters) {
        let calls = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let opens = Arc::new(AtomicUsize::new(0));

        let counters = MockCounters {
            calls: Arc::clone(&calls),
            closed: Arc::clone(&closed),
            opens: Arc::clone(&opens),
        };

        let opener: PresenceOpener = Box::new(move || {
            opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockClient {
                calls: Arc::clone(&calls),
                fail,
                closed: Arc::clone(&closed),
            }) as Box<dyn PresenceClient>)
        });

        let bridge = PresenceBridge::new(
            opener,
            None,
            true, // no enrichment network calls in tests
            crate::config::Config::default().presence,
        )
        .unwrap();
        bridge.connect_initial();

        (bridge, counters)
    }

    fn request(name: &str) -> UpdateRequest {
        UpdateRequest {
            name: name.to_string(),
            start: Some(100),
            end: Some(300),
            details: None,
            duration_secs: 200.0,
        }
    }

    #[test]
    fn test_failed_update_makes_handle_inert() {
        let (bridge, counters) = bridge_with_mock(true);

        bridge.update_blocking(request("Song [dQw4w9WgXcQ]"));
        assert_eq!(counters.calls.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);

        // Handle was discarded; further updates never reach the client.
        bridge.update_blocking(request("Another [dQw4w9WgXcQ]"));
        assert_eq!(counters.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reload_reconnects_and_replays_last_update() {
        let (bridge, counters) = bridge_with_mock(false);

        bridge.update_blocking(request("Song [dQw4w9WgXcQ]"));
        assert_eq!(counters.calls.load(Ordering::SeqCst), 1);

        bridge.reload_blocking();
        // Old handle closed, new one opened, last update replayed.
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        assert_eq!(counters.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_compose_splits_title_and_appends_source_button() {
        let (bridge, _) = bridge_with_mock(false);

        let fields = bridge.compose(&request("Artist - Title [dQw4w9WgXcQ]"));
        assert!(!fields.details.is_empty());
        assert!(!fields.state.is_empty());
        // Join deep link first, fixed source-code button appended last.
        assert_eq!(fields.buttons.len(), 2);
        assert_eq!(fields.buttons[0].0, "Join");
        assert!(fields.buttons[0].1.contains("dQw4w9WgXcQ"));
        assert_eq!(fields.buttons[1].0, "Source code");
        // API disabled: deterministic thumbnail, no channel.
        assert_eq!(
            fields.large_image.as_deref(),
            Some("https://img.youtube.com/vi/dQw4w9WgXcQ/maxresdefault.jpg")
        );
        assert!(fields.large_text.is_none());
    }

    #[test]
    fn test_compose_without_video_id_has_only_source_button() {
        let (bridge, _) = bridge_with_mock(false);

        let fields = bridge.compose(&request("Plainly Named Track"));
        assert_eq!(fields.buttons.len(), 1);
        assert_eq!(fields.buttons[0].0, "Source code");
        assert!(fields.large_image.is_none());
    }

    #[test]
    fn test_update_on_absent_handle_is_a_noop() {
        let (bridge, counters) = bridge_with_mock(false);
        bridge.shutdown();

        bridge.update_blocking(request("Song [dQw4w9WgXcQ]"));
        assert_eq!(counters.calls.load(Ordering::SeqCst), 0);
    }
}
