// src/delivery/chat.rs
use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::{header, Client};
use serde::Serialize;

use super::{Delivery, ReportSink};
use crate::config::{ChatConfig, MAX_CHAT_RETRIES};

/// Posts reports into a chat room over HTTP, authenticated by a session cookie.
#[derive(Clone)]
pub struct ChatSink {
    endpoint: String,
    session: String,
    room: String,
    nickname: String,
    domain: String,
    classification: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatMessage<'a> {
    classification: &'a str,
    message: String,
    domain_id: &'a str,
    nick_name: &'a str,
    room_name: &'a str,
}

impl ChatSink {
    pub fn from_config(cfg: &ChatConfig) -> Self {
        Self {
            endpoint: format!("{}/api/chatserver/message", cfg.server_url.trim_end_matches('/')),
            session: cfg.session.clone(),
            room: cfg.room.clone(),
            nickname: cfg.nickname.clone(),
            domain: cfg.domain.clone(),
            classification: cfg.classification.clone(),
            client: Client::new(),
            timeout: Duration::from_secs(cfg.timeout_secs.max(1)),
            max_retries: cfg.max_retries.clamp(1, MAX_CHAT_RETRIES),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn body(&self, d: &Delivery) -> ChatMessage<'_> {
        let message = match &d.attachment {
            Some(img) => format!("{}\n[IMG] {}", d.text, img),
            None => d.text.clone(),
        };
        ChatMessage {
            classification: &self.classification,
            message,
            domain_id: &self.domain,
            nick_name: &self.nickname,
            room_name: &self.room,
        }
    }
}

/// 500ms doubling per attempt, capped at 32s.
fn retry_delay(attempt: u8) -> Duration {
    let exp = u32::from(attempt.saturating_sub(1)).min(6);
    Duration::from_millis(500u64 << exp)
}

#[async_trait::async_trait]
impl ReportSink for ChatSink {
    async fn deliver(&self, d: &Delivery) -> Result<()> {
        let payload = self.body(d);
        let cookie = format!("SESSION={}", self.session);

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.endpoint)
                .timeout(self.timeout)
                .header(header::COOKIE, &cookie)
                .json(&payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("chat HTTP error: {e}"),
                },
                Err(e) => anyhow!("chat request failed: {e}"),
            };

            if attempt >= self.max_retries {
                return Err(err);
            }
            tracing::debug!(target: "delivery", attempt, error = %err, "chat post retrying");
            tokio::time::sleep(retry_delay(attempt)).await;
        }
    }

    fn name(&self) -> &'static str {
        "chat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cfg() -> ChatConfig {
        ChatConfig {
            server_url: "https://chat.test/".into(),
            session: "abc".into(),
            room: "ops".into(),
            ..Default::default()
        }
    }

    #[test]
    fn endpoint_and_body_shape() {
        let sink = ChatSink::from_config(&cfg());
        assert_eq!(sink.endpoint(), "https://chat.test/api/chatserver/message");

        let d = Delivery {
            zone: "CLINTON".into(),
            text: "PR01//I001".into(),
            attachment: Some("http://img/x.jpg".into()),
            queued_at: Utc::now(),
        };
        let v = serde_json::to_value(sink.body(&d)).unwrap();
        assert_eq!(v["message"], "PR01//I001\n[IMG] http://img/x.jpg");
        assert_eq!(v["roomName"], "ops");
        assert_eq!(v["nickName"], "OSINT_Bot");
        assert_eq!(v["classification"], "UNCLASSIFIED//FOUO");
        assert!(v.get("domainId").is_some());
    }

    #[test]
    fn retry_delay_doubles_then_caps() {
        assert_eq!(retry_delay(1), Duration::from_millis(500));
        assert_eq!(retry_delay(3), Duration::from_millis(2000));
        assert_eq!(retry_delay(7), Duration::from_secs(32));
        assert_eq!(retry_delay(u8::MAX), Duration::from_secs(32));
    }

    #[test]
    fn retries_are_clamped() {
        let sink = ChatSink::from_config(&ChatConfig {
            max_retries: 250,
            ..cfg()
        });
        assert_eq!(sink.max_retries, MAX_CHAT_RETRIES);
    }
}
