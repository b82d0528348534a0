//! Telephony operations against the LiveKit server APIs.
//!
//! Rooms and agent join tokens go through `livekit-api`. The outbound SIP
//! create-participant call is issued directly against the provider's Twirp
//! JSON endpoint so the structured error body (`meta.sip_status_code`,
//! `meta.sip_status`) can be decoded losslessly into [`DialError`].

use crate::error::{DialError, VoiceError};
use async_trait::async_trait;
use livekit_api::access_token::{AccessToken, SIPGrants, VideoGrants};
use livekit_api::services::room::{CreateRoomOptions, RoomClient};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Identity the worker uses when minting tokens for SIP service calls.
const DIALER_IDENTITY: &str = "outcall-dialer";

/// TTL for tokens minted for SIP service calls. Dials block until the far
/// end answers, so this comfortably exceeds any ringing timeout.
const SIP_TOKEN_TTL: Duration = Duration::from_secs(600);

fn default_token_ttl_seconds() -> u64 {
    3600
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    pub url: String,
    pub api_key: String,
    #[serde(skip_serializing)]
    pub api_secret: String,
    /// Outbound trunk used to originate calls.
    pub trunk_id: String,
    /// JWT token TTL in seconds for agent join tokens. Default: 3600 (1 hour).
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
}

impl fmt::Debug for TelephonyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelephonyConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("trunk_id", &self.trunk_id)
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .finish()
    }
}

impl TelephonyConfig {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        trunk_id: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            trunk_id: trunk_id.into(),
            token_ttl_seconds: default_token_ttl_seconds(),
        }
    }
}

/// An outbound call leg request.
///
/// The participant identity defaults to the destination number so the
/// disconnect watcher can recognise the dialed leg by identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCall {
    pub room_name: String,
    pub trunk_id: String,
    pub call_to: String,
    pub participant_identity: String,
}

impl OutboundCall {
    pub fn new(
        room_name: impl Into<String>,
        trunk_id: impl Into<String>,
        call_to: impl Into<String>,
    ) -> Self {
        let call_to = call_to.into();
        Self {
            room_name: room_name.into(),
            trunk_id: trunk_id.into(),
            participant_identity: call_to.clone(),
            call_to,
        }
    }
}

/// The answered call leg returned by a successful dial.
#[derive(Debug, Clone)]
pub struct DialedParticipant {
    pub participant_id: String,
    pub identity: String,
    pub sip_call_id: Option<String>,
}

/// Room metadata returned by [`Telephony::ensure_room`].
#[derive(Debug, Clone)]
pub struct RoomMeta {
    pub name: String,
    pub sid: String,
}

impl From<livekit_protocol::Room> for RoomMeta {
    fn from(room: livekit_protocol::Room) -> Self {
        Self {
            name: room.name,
            sid: room.sid,
        }
    }
}

/// Server-side telephony operations the orchestrator depends on.
///
/// The production implementation is [`LiveKitTelephony`]; tests run the
/// orchestrator against mocks.
#[async_trait]
pub trait Telephony: Send + Sync {
    /// Creates the room for a job, or returns it if it already exists.
    async fn ensure_room(&self, name: &str) -> Result<RoomMeta, VoiceError>;

    /// Mints the agent's join token for a room.
    fn agent_token(&self, room_name: &str, identity: &str) -> Result<String, VoiceError>;

    /// Places an outbound call leg and waits until the far end answers.
    ///
    /// # Errors
    ///
    /// [`DialError::Provider`] when the provider reports a structured
    /// failure (carries SIP status metadata), [`DialError::Unexpected`] for
    /// anything else.
    async fn dial(&self, call: &OutboundCall) -> Result<DialedParticipant, DialError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSipParticipantBody<'a> {
    sip_trunk_id: &'a str,
    sip_call_to: &'a str,
    room_name: &'a str,
    participant_identity: &'a str,
    wait_until_answered: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SipParticipantInfo {
    #[serde(default)]
    participant_id: String,
    #[serde(default)]
    participant_identity: String,
    #[serde(default)]
    sip_call_id: Option<String>,
}

#[derive(Deserialize)]
struct TwirpErrorBody {
    #[serde(default)]
    msg: String,
    #[serde(default)]
    meta: HashMap<String, String>,
}

pub struct LiveKitTelephony {
    config: TelephonyConfig,
    room_client: RoomClient,
    http: reqwest::Client,
}

impl LiveKitTelephony {
    pub fn new(config: TelephonyConfig) -> Self {
        let room_client =
            RoomClient::with_api_key(&config.url, &config.api_key, &config.api_secret);
        Self {
            config,
            room_client,
            http: reqwest::Client::new(),
        }
    }

    /// The HTTP base for Twirp calls. LiveKit deployments are usually
    /// configured with a `wss://` URL; the Twirp services live on the same
    /// host over HTTPS.
    fn http_base(&self) -> String {
        let url = self.config.url.trim_end_matches('/');
        if let Some(rest) = url.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if let Some(rest) = url.strip_prefix("ws://") {
            format!("http://{rest}")
        } else {
            url.to_string()
        }
    }

    fn sip_token(&self) -> Result<String, VoiceError> {
        let token = AccessToken::with_api_key(&self.config.api_key, &self.config.api_secret)
            .with_identity(DIALER_IDENTITY)
            .with_grants(VideoGrants::default())
            .with_sip_grants(SIPGrants {
                admin: true,
                call: true,
            })
            .with_ttl(SIP_TOKEN_TTL);
        Ok(token.to_jwt()?)
    }
}

#[async_trait]
impl Telephony for LiveKitTelephony {
    async fn ensure_room(&self, name: &str) -> Result<RoomMeta, VoiceError> {
        let options = CreateRoomOptions::default();

        let room = self
            .room_client
            .create_room(name, options)
            .await
            .map_err(|e| VoiceError::RoomService(e.to_string()))?;

        Ok(room.into())
    }

    fn agent_token(&self, room_name: &str, identity: &str) -> Result<String, VoiceError> {
        let token = AccessToken::with_api_key(&self.config.api_key, &self.config.api_secret)
            .with_identity(identity)
            .with_name(identity)
            .with_grants(VideoGrants {
                room_join: true,
                room: room_name.to_string(),
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
                ..Default::default()
            })
            .with_ttl(Duration::from_secs(self.config.token_ttl_seconds));

        Ok(token.to_jwt()?)
    }

    async fn dial(&self, call: &OutboundCall) -> Result<DialedParticipant, DialError> {
        let token = self
            .sip_token()
            .map_err(|e| DialError::Unexpected(e.to_string()))?;

        let body = CreateSipParticipantBody {
            sip_trunk_id: &call.trunk_id,
            sip_call_to: &call.call_to,
            room_name: &call.room_name,
            participant_identity: &call.participant_identity,
            wait_until_answered: true,
        };

        // No request timeout here: with wait_until_answered the provider
        // holds the request open until the far end answers or the ringing
        // timeout elapses server-side.
        let response = self
            .http
            .post(format!(
                "{}/twirp/livekit.SIP/CreateSIPParticipant",
                self.http_base()
            ))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| DialError::Unexpected(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let info: SipParticipantInfo = response
                .json()
                .await
                .map_err(|e| DialError::Unexpected(e.to_string()))?;
            Ok(DialedParticipant {
                participant_id: info.participant_id,
                identity: if info.participant_identity.is_empty() {
                    call.participant_identity.clone()
                } else {
                    info.participant_identity
                },
                sip_call_id: info.sip_call_id,
            })
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(parse_twirp_error(status.as_u16(), &text))
        }
    }
}

/// Decodes a Twirp error body into a [`DialError`].
///
/// A well-formed body carries `msg` and a `meta` map with
/// `sip_status_code`/`sip_status`; anything else becomes
/// [`DialError::Unexpected`].
fn parse_twirp_error(http_status: u16, body: &str) -> DialError {
    match serde_json::from_str::<TwirpErrorBody>(body) {
        Ok(err) if !err.msg.is_empty() || !err.meta.is_empty() => DialError::Provider {
            message: err.msg,
            sip_status_code: err.meta.get("sip_status_code").cloned(),
            sip_status: err.meta.get("sip_status").cloned(),
        },
        _ => DialError::Unexpected(format!("HTTP {http_status}: {body}")),
    }
}
