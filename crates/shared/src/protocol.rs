//! Gateway wire protocol: frame envelope, opcodes, close codes and the
//! commands a client sends.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::models::{Activity, Snowflake, Status};

/// Gateway API version this client speaks.
pub const GATEWAY_VERSION: u8 = 10;

/// Gateway opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    PresenceUpdate = 3,
    VoiceStateUpdate = 4,
    Resume = 6,
    Reconnect = 7,
    RequestGuildMembers = 8,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl Opcode {
    pub fn from_u8(op: u8) -> Option<Self> {
        Some(match op {
            0 => Opcode::Dispatch,
            1 => Opcode::Heartbeat,
            2 => Opcode::Identify,
            3 => Opcode::PresenceUpdate,
            4 => Opcode::VoiceStateUpdate,
            6 => Opcode::Resume,
            7 => Opcode::Reconnect,
            8 => Opcode::RequestGuildMembers,
            9 => Opcode::InvalidSession,
            10 => Opcode::Hello,
            11 => Opcode::HeartbeatAck,
            _ => return None,
        })
    }
}

/// The JSON envelope every gateway frame travels in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    pub fn new(op: Opcode, d: Value) -> Self {
        Self {
            op: op as u8,
            d,
            s: None,
            t: None,
        }
    }

    pub fn hello(heartbeat_interval_ms: u64) -> Self {
        Self::new(
            Opcode::Hello,
            serde_json::json!({ "heartbeat_interval": heartbeat_interval_ms }),
        )
    }

    pub fn heartbeat_ack() -> Self {
        Self::new(Opcode::HeartbeatAck, Value::Null)
    }

    pub fn dispatch(seq: u64, name: impl Into<String>, data: Value) -> Self {
        Self {
            op: Opcode::Dispatch as u8,
            d: data,
            s: Some(seq),
            t: Some(name.into()),
        }
    }

    pub fn invalid_session(resumable: bool) -> Self {
        Self::new(Opcode::InvalidSession, Value::Bool(resumable))
    }

    pub fn reconnect() -> Self {
        Self::new(Opcode::Reconnect, Value::Null)
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.op)
    }

    pub fn to_json(&self) -> String {
        // A GatewayFrame is always representable as JSON.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A decoded frame received from the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Dispatch {
        seq: u64,
        name: String,
        data: Value,
    },
    /// The gateway asks for an immediate heartbeat.
    Heartbeat,
    Reconnect,
    InvalidSession {
        resumable: bool,
    },
    Hello {
        heartbeat_interval_ms: u64,
    },
    HeartbeatAck,
}

impl ServerFrame {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: GatewayFrame = serde_json::from_str(text)?;
        let op = frame
            .opcode()
            .ok_or(ProtocolError::UnknownOpcode(frame.op))?;

        match op {
            Opcode::Dispatch => {
                let seq = frame.s.ok_or(ProtocolError::MissingField("s"))?;
                let name = frame.t.ok_or(ProtocolError::MissingField("t"))?;
                Ok(ServerFrame::Dispatch {
                    seq,
                    name,
                    data: frame.d,
                })
            }
            Opcode::Heartbeat => Ok(ServerFrame::Heartbeat),
            Opcode::Reconnect => Ok(ServerFrame::Reconnect),
            Opcode::InvalidSession => Ok(ServerFrame::InvalidSession {
                resumable: frame.d.as_bool().unwrap_or(false),
            }),
            Opcode::Hello => {
                let interval = frame
                    .d
                    .get("heartbeat_interval")
                    .and_then(Value::as_u64)
                    .ok_or(ProtocolError::MissingField("heartbeat_interval"))?;
                Ok(ServerFrame::Hello {
                    heartbeat_interval_ms: interval,
                })
            }
            Opcode::HeartbeatAck => Ok(ServerFrame::HeartbeatAck),
            other => Err(ProtocolError::UnexpectedOpcode(other as u8)),
        }
    }
}

// --- Close codes ---

/// WebSocket close code as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    pub const NORMAL: CloseCode = CloseCode(1000);
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    pub const ABNORMAL: CloseCode = CloseCode(1006);
    pub const UNKNOWN_ERROR: CloseCode = CloseCode(4000);
    pub const UNKNOWN_OPCODE: CloseCode = CloseCode(4001);
    pub const DECODE_ERROR: CloseCode = CloseCode(4002);
    pub const NOT_AUTHENTICATED: CloseCode = CloseCode(4003);
    pub const AUTHENTICATION_FAILED: CloseCode = CloseCode(4004);
    pub const ALREADY_AUTHENTICATED: CloseCode = CloseCode(4005);
    pub const INVALID_SEQ: CloseCode = CloseCode(4007);
    pub const RATE_LIMITED: CloseCode = CloseCode(4008);
    pub const SESSION_TIMED_OUT: CloseCode = CloseCode(4009);
    pub const INVALID_SHARD: CloseCode = CloseCode(4010);
    pub const SHARDING_REQUIRED: CloseCode = CloseCode(4011);
    pub const INVALID_API_VERSION: CloseCode = CloseCode(4012);
    pub const INVALID_INTENTS: CloseCode = CloseCode(4013);
    pub const DISALLOWED_INTENTS: CloseCode = CloseCode(4014);

    /// Codes after which reconnecting can never succeed.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::AUTHENTICATION_FAILED
                | Self::INVALID_SHARD
                | Self::SHARDING_REQUIRED
                | Self::INVALID_API_VERSION
                | Self::INVALID_INTENTS
                | Self::DISALLOWED_INTENTS
        )
    }

    /// Whether the stored session may be resumed after this close.
    pub fn is_resumable(self) -> bool {
        !self.is_fatal()
            && !matches!(
                self,
                Self::NORMAL | Self::GOING_AWAY | Self::INVALID_SEQ | Self::SESSION_TIMED_OUT
            )
    }
}

// --- Intents ---

bitflags! {
    /// Gateway intent bits requested on identify.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        const GUILDS = 1 << 0;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_EMOJIS = 1 << 3;
        const GUILD_VOICE_STATES = 1 << 7;
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const DIRECT_MESSAGES = 1 << 12;
        const MESSAGE_CONTENT = 1 << 15;
    }
}

impl Intents {
    /// Intents that must be enabled for the application before use.
    pub const PRIVILEGED: Intents = Intents::GUILD_MEMBERS
        .union(Intents::GUILD_PRESENCES)
        .union(Intents::MESSAGE_CONTENT);
}

impl Default for Intents {
    /// Every intent that does not need to be enabled on the application.
    fn default() -> Self {
        Intents::GUILDS
            | Intents::GUILD_EMOJIS
            | Intents::GUILD_VOICE_STATES
            | Intents::GUILD_MESSAGES
            | Intents::DIRECT_MESSAGES
    }
}

// The gateway takes the raw integer, unknown bits included.
impl Serialize for Intents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Intents::from_bits_retain)
    }
}

// --- Client commands ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "hearth".to_string(),
            device: "hearth".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identify {
    pub token: String,
    pub intents: Intents,
    pub shard: [u32; 2],
    pub properties: ConnectionProperties,
    pub large_threshold: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceUpdate {
    /// Unix millis since the client went idle.
    pub since: Option<u64>,
    pub activities: Vec<Activity>,
    pub status: Status,
    pub afk: bool,
}

impl PresenceUpdate {
    pub fn new(status: Status, activity: Option<Activity>) -> Self {
        let since = (status == Status::Idle)
            .then(|| u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default());
        Self {
            since,
            activities: activity.into_iter().collect(),
            status,
            afk: status == Status::Idle,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestGuildMembers {
    pub guild_id: Snowflake,
    pub query: String,
    pub limit: u32,
    #[serde(default)]
    pub presences: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl RequestGuildMembers {
    /// Request every member of a guild.
    pub fn all(guild_id: Snowflake) -> Self {
        Self {
            guild_id,
            query: String::new(),
            limit: 0,
            presences: false,
            nonce: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceStateUpdate {
    pub guild_id: Snowflake,
    pub channel_id: Option<Snowflake>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// Frames the client sends to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Heartbeat { seq: Option<u64> },
    Identify(Identify),
    Resume(Resume),
    PresenceUpdate(PresenceUpdate),
    RequestGuildMembers(RequestGuildMembers),
    VoiceStateUpdate(VoiceStateUpdate),
}

impl ClientCommand {
    pub fn opcode(&self) -> Opcode {
        match self {
            ClientCommand::Heartbeat { .. } => Opcode::Heartbeat,
            ClientCommand::Identify(_) => Opcode::Identify,
            ClientCommand::Resume(_) => Opcode::Resume,
            ClientCommand::PresenceUpdate(_) => Opcode::PresenceUpdate,
            ClientCommand::RequestGuildMembers(_) => Opcode::RequestGuildMembers,
            ClientCommand::VoiceStateUpdate(_) => Opcode::VoiceStateUpdate,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let d = match self {
            ClientCommand::Heartbeat { seq } => serde_json::to_value(seq)?,
            ClientCommand::Identify(v) => serde_json::to_value(v)?,
            ClientCommand::Resume(v) => serde_json::to_value(v)?,
            ClientCommand::PresenceUpdate(v) => serde_json::to_value(v)?,
            ClientCommand::RequestGuildMembers(v) => serde_json::to_value(v)?,
            ClientCommand::VoiceStateUpdate(v) => serde_json::to_value(v)?,
        };
        Ok(serde_json::to_string(&GatewayFrame::new(self.opcode(), d))?)
    }
}

/// Wire dispatch names (`GUILD_CREATE`) become lowercase event names.
pub fn event_name(dispatch_name: &str) -> String {
    dispatch_name.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_dispatch() {
        let text = GatewayFrame::dispatch(5, "GUILD_CREATE", json!({ "id": "1" })).to_json();
        let frame = ServerFrame::decode(&text).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Dispatch {
                seq: 5,
                name: "GUILD_CREATE".into(),
                data: json!({ "id": "1" }),
            }
        );
    }

    #[test]
    fn dispatch_without_sequence_is_rejected() {
        let text = r#"{"op":0,"d":{},"t":"READY"}"#;
        assert!(matches!(
            ServerFrame::decode(text),
            Err(ProtocolError::MissingField("s"))
        ));
    }

    #[test]
    fn decodes_hello_and_invalid_session() {
        let hello = ServerFrame::decode(&GatewayFrame::hello(41_250).to_json()).unwrap();
        assert_eq!(
            hello,
            ServerFrame::Hello {
                heartbeat_interval_ms: 41_250
            }
        );

        let invalid = ServerFrame::decode(r#"{"op":9,"d":true}"#).unwrap();
        assert_eq!(invalid, ServerFrame::InvalidSession { resumable: true });
    }

    #[test]
    fn rejects_unknown_and_client_only_opcodes() {
        assert!(matches!(
            ServerFrame::decode(r#"{"op":42}"#),
            Err(ProtocolError::UnknownOpcode(42))
        ));
        assert!(matches!(
            ServerFrame::decode(r#"{"op":2,"d":{}}"#),
            Err(ProtocolError::UnexpectedOpcode(2))
        ));
        assert!(matches!(
            ServerFrame::decode("not json"),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn heartbeat_encodes_sequence() {
        let text = ClientCommand::Heartbeat { seq: Some(7) }.encode().unwrap();
        let frame: GatewayFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(frame.op, 1);
        assert_eq!(frame.d, json!(7));

        let text = ClientCommand::Heartbeat { seq: None }.encode().unwrap();
        let frame: GatewayFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(frame.d, Value::Null);
    }

    #[test]
    fn resume_encodes_token_and_sequence() {
        let text = ClientCommand::Resume(Resume {
            token: "t".into(),
            session_id: "abc".into(),
            seq: Some(9),
        })
        .encode()
        .unwrap();
        let frame: GatewayFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(frame.op, Opcode::Resume as u8);
        assert_eq!(frame.d["session_id"], json!("abc"));
        assert_eq!(frame.d["seq"], json!(9));
    }

    #[test]
    fn close_code_classification() {
        assert!(CloseCode::AUTHENTICATION_FAILED.is_fatal());
        assert!(!CloseCode::AUTHENTICATION_FAILED.is_resumable());
        assert!(CloseCode::UNKNOWN_ERROR.is_resumable());
        assert!(CloseCode::ABNORMAL.is_resumable());
        assert!(!CloseCode::INVALID_SEQ.is_resumable());
        assert!(!CloseCode::SESSION_TIMED_OUT.is_resumable());
        assert!(!CloseCode::NORMAL.is_resumable());
        assert!(!CloseCode::NORMAL.is_fatal());
    }

    #[test]
    fn default_intents_exclude_privileged() {
        let intents = Intents::default();
        assert!(intents.contains(Intents::GUILDS));
        assert_eq!(intents.bits() & Intents::PRIVILEGED.bits(), 0);
    }

    #[test]
    fn intents_travel_as_integers() {
        let intents = Intents::GUILDS | Intents::MESSAGE_CONTENT;
        assert_eq!(serde_json::to_value(intents).unwrap(), json!(32769));

        let unknown: Intents = serde_json::from_value(json!(1u64 << 40 | 1)).unwrap();
        assert!(unknown.contains(Intents::GUILDS));
        assert_eq!(unknown.bits(), 1u64 << 40 | 1);
    }

    #[test]
    fn event_names_are_lowercase() {
        assert_eq!(event_name("GUILD_MEMBER_ADD"), "guild_member_add");
    }
}
