use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use reqwest::blocking::Client;
use serde::Serialize;

use crate::orchestrator::Notifier;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

pub const FALL_ALERT_TYPE: &str = "fall";
pub const WAKE_ALERT_TYPE: &str = "medical";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub user_id: Option<String>,
    pub alert_type: String,
    pub location: String,
    pub message: String,
    pub ai_response: Option<String>,
    pub timestamp: String,
}

impl AlertPayload {
    pub fn fall(location: &str, confidence: Option<f32>) -> Self {
        let mut message = "Fall detected by pose recognition system".to_string();
        if let Some(c) = confidence.filter(|c| *c > 0.0) {
            message.push_str(&format!(" (confidence: {:.1}%)", c * 100.0));
        }
        Self::new(
            FALL_ALERT_TYPE,
            location,
            message,
            "Emergency services may be required. Check on individual immediately.",
        )
    }

    pub fn wake(command: Option<&str>) -> Self {
        let mut message = "Wake word detected - user requesting assistance".to_string();
        if let Some(command) = command.filter(|c| !c.is_empty()) {
            message.push_str(&format!(" - Command: {command}"));
        }
        Self::new(
            WAKE_ALERT_TYPE,
            "Voice System",
            message,
            "User has verbally requested help. Respond immediately.",
        )
    }

    fn new(alert_type: &str, location: &str, message: String, ai_response: &str) -> Self {
        Self {
            user_id: None,
            alert_type: alert_type.to_string(),
            location: location.to_string(),
            message,
            ai_response: Some(ai_response.to_string()),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Per-alert-type rate limit. A slot is reserved before delivery starts so
/// concurrent callers cannot both get through.
#[derive(Debug)]
pub struct Cooldown {
    window: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(HashMap::new()),
        }
    }

    pub fn try_reserve(&self, alert_type: &str, now: Instant) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        match last.get(alert_type) {
            Some(prev) if now.saturating_duration_since(*prev) < self.window => false,
            _ => {
                last.insert(alert_type.to_string(), now);
                true
            }
        }
    }
}

/// Posts alerts to `<server>/api/alerts/trigger` from a detached thread.
pub struct HttpNotifier {
    client: Client,
    endpoint: String,
    cooldown: Arc<Cooldown>,
}

impl HttpNotifier {
    pub fn new(server_url: &str, cooldown: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build alert HTTP client")?;
        Ok(Self {
            client,
            endpoint: alert_endpoint(server_url),
            cooldown: Arc::new(Cooldown::new(cooldown)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn dispatch(&self, payload: AlertPayload) {
        if !self.cooldown.try_reserve(&payload.alert_type, Instant::now()) {
            log::info!("alert cooldown active for {}", payload.alert_type);
            return;
        }

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let spawned = thread::Builder::new()
            .name("alert-sender".into())
            .spawn(move || match post_alert(&client, &endpoint, &payload) {
                Ok(()) => log::info!("alert sent: {}", payload.alert_type),
                Err(err) => log::error!("failed to send {} alert: {err:#}", payload.alert_type),
            });
        if let Err(err) = spawned {
            log::error!("failed to spawn alert sender: {err}");
        }
    }
}

fn alert_endpoint(server_url: &str) -> String {
    format!("{}/api/alerts/trigger", server_url.trim_end_matches('/'))
}

fn post_alert(client: &Client, endpoint: &str, payload: &AlertPayload) -> anyhow::Result<()> {
    client
        .post(endpoint)
        .json(payload)
        .send()
        .with_context(|| format!("alert request to {endpoint} failed"))?
        .error_for_status()
        .context("alert server rejected the request")?;
    Ok(())
}

impl Notifier for HttpNotifier {
    fn send_fall_alert(&self, location: &str, confidence: Option<f32>) {
        self.dispatch(AlertPayload::fall(location, confidence));
    }

    fn send_wake_alert(&self, command: Option<&str>) {
        self.dispatch(AlertPayload::wake(command));
    }
}

/// Used when no alert server is configured: alerts only reach the log.
pub struct LogNotifier {
    cooldown: Cooldown,
}

impl LogNotifier {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown: Cooldown::new(cooldown),
        }
    }

    fn emit(&self, payload: AlertPayload) {
        if !self.cooldown.try_reserve(&payload.alert_type, Instant::now()) {
            log::info!("alert cooldown active for {}", payload.alert_type);
            return;
        }
        match serde_json::to_string(&payload) {
            Ok(json) => log::warn!("ALERT {json}"),
            Err(err) => log::error!("failed to encode alert: {err}"),
        }
    }
}

impl Notifier for LogNotifier {
    fn send_fall_alert(&self, location: &str, confidence: Option<f32>) {
        self.emit(AlertPayload::fall(location, confidence));
    }

    fn send_wake_alert(&self, command: Option<&str>) {
        self.emit(AlertPayload::wake(command));
    }
}
