// Listen-along share endpoint.
//
// A session is a secret (write credential) plus a public id (the link other
// people open). Progress pushes are fire-and-forget: transport failures are
// dropped, and a server-side "fail" status means the session expired, so a
// fresh one is started transparently before the next push.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
pub struct ShareSession {
    pub secret: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShareUpdate {
    pub playing: bool,
    pub id: String,
    pub progress: f64,
}

#[derive(Debug, Deserialize)]
pub struct PushReply {
    pub status: String,
}

pub trait ShareTransport: Send + Sync {
    fn start(&self) -> Result<ShareSession>;
    fn push(&self, secret: &str, update: &ShareUpdate) -> Result<PushReply>;
}

pub struct HttpShareTransport {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl HttpShareTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
        })
    }
}

impl ShareTransport for HttpShareTransport {
    fn start(&self) -> Result<ShareSession> {
        let session = self
            .http
            .post(format!("{}start", self.base_url))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(session)
    }

    fn push(&self, secret: &str, update: &ShareUpdate) -> Result<PushReply> {
        let reply = self
            .http
            .put(format!("{}update/{}", self.base_url, secret))
            .json(update)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(reply)
    }
}

pub struct ShareBridge {
    transport: Box<dyn ShareTransport>,
    base_url: String,
    session: Mutex<ShareSession>,
}

impl ShareBridge {
    /// Establish the initial session. Sharing was explicitly requested, so
    /// a failure here is fatal to startup.
    pub fn start(transport: Box<dyn ShareTransport>, base_url: &str) -> Result<Arc<Self>> {
        let session = transport
            .start()
            .context("Failed to start share session")?;
        info!("share session started, id {}", session.id);

        Ok(Arc::new(Self {
            transport,
            base_url: base_url.to_string(),
            session: Mutex::new(session),
        }))
    }

    /// Public link other listeners open.
    pub fn share_link(&self) -> String {
        let session = self.session.lock().unwrap();
        format!("{}{}", self.base_url, session.id)
    }

    /// Fire-and-forget progress push on a background task. The result is
    /// discarded; the UI already reflects local state and a missed beat
    /// self-heals on the next push.
    pub fn push(self: &Arc<Self>, video_id: &str, progress_secs: f64, playing: bool) {
        let bridge = Arc::clone(self);
        let update = ShareUpdate {
            playing,
            id: video_id.to_string(),
            progress: progress_secs,
        };

        tokio::task::spawn_blocking(move || bridge.push_blocking(&update));
    }

    fn push_blocking(&self, update: &ShareUpdate) {
        let secret = self.session.lock().unwrap().secret.clone();

        match self.transport.push(&secret, update) {
            Ok(reply) if reply.status == "fail" => {
                // Session expired server-side; renew once and keep the new
                // credentials for subsequent pushes.
                if let Ok(fresh) = self.transport.start() {
                    info!("share session expired, renewed as {}", fresh.id);
                    *self.session.lock().unwrap() = fresh;
                }
            }
            Ok(_) => {}
            Err(e) => debug!("share push dropped: {e}"),
        }
    }
}
