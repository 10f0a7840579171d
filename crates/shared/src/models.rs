//! Entity records shared by the gateway session, the cache and REST calls.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Milliseconds between the Unix epoch and 2015-01-01T00:00:00Z.
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_420_070_400_000;

// --- Identity ---

/// Stable 64-bit identifier of an entity. Travels as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Snowflake(pub u64);

impl Snowflake {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Creation time encoded in the upper 42 bits.
    pub fn created_at(self) -> DateTime<Utc> {
        let ms = (self.0 >> 22) as i64 + SNOWFLAKE_EPOCH_MS;
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }
}

impl From<u64> for Snowflake {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(Self(n)),
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

// --- Users ---

fn default_discriminator() -> String {
    "0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Snowflake,
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_discriminator")]
    pub discriminator: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl User {
    /// Animated avatar hashes carry an `a_` prefix.
    pub fn is_avatar_animated(&self) -> bool {
        self.avatar.as_deref().is_some_and(|a| a.starts_with("a_"))
    }
}

/// A guild membership as it appears inside guild payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub user: User,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub joined_at: Option<String>,
}

// --- Guilds ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Guild {
    pub id: Snowflake,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub splash: Option<String>,
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub member_count: Option<u64>,
}

/// Full guild payload as delivered by `GUILD_CREATE` and inside `READY`.
///
/// The nested collections are split off into their own cache maps; only the
/// [`Guild`] record itself is stored under the guild identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuildPayload {
    #[serde(flatten)]
    pub guild: Guild,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub emojis: Vec<Emoji>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub voice_states: Vec<VoiceState>,
}

// --- Channels ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextChannel {
    pub id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub name: String,
    pub position: i32,
    pub parent_id: Option<Snowflake>,
    pub topic: Option<String>,
    pub nsfw: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceChannel {
    pub id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub name: String,
    pub position: i32,
    pub parent_id: Option<Snowflake>,
    pub bitrate: u32,
    pub user_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryChannel {
    pub id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub name: String,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectChannel {
    pub id: Snowflake,
    pub recipients: Vec<User>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupChannel {
    pub id: Snowflake,
    pub name: Option<String>,
    pub owner_id: Option<Snowflake>,
    pub recipients: Vec<User>,
}

/// A guild channel of a kind this client does not model (forums, threads...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OtherChannel {
    pub id: Snowflake,
    pub kind: u8,
    pub guild_id: Option<Snowflake>,
    pub name: Option<String>,
}

/// Channel kinds, discriminated by the integer `type` field on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "RawChannel", into = "RawChannel")]
pub enum Channel {
    Text(TextChannel),
    Voice(VoiceChannel),
    Category(CategoryChannel),
    Direct(DirectChannel),
    Group(GroupChannel),
    Other(OtherChannel),
}

impl Channel {
    pub fn id(&self) -> Snowflake {
        match self {
            Channel::Text(c) => c.id,
            Channel::Voice(c) => c.id,
            Channel::Category(c) => c.id,
            Channel::Direct(c) => c.id,
            Channel::Group(c) => c.id,
            Channel::Other(c) => c.id,
        }
    }

    /// Owning guild; `None` for private channels.
    pub fn guild_id(&self) -> Option<Snowflake> {
        match self {
            Channel::Text(c) => c.guild_id,
            Channel::Voice(c) => c.guild_id,
            Channel::Category(c) => c.guild_id,
            Channel::Other(c) => c.guild_id,
            Channel::Direct(_) | Channel::Group(_) => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Channel::Text(c) => Some(&c.name),
            Channel::Voice(c) => Some(&c.name),
            Channel::Category(c) => Some(&c.name),
            Channel::Group(c) => c.name.as_deref(),
            Channel::Other(c) => c.name.as_deref(),
            Channel::Direct(_) => None,
        }
    }

    /// Channels nested in a guild payload omit `guild_id`; stamp it.
    pub fn with_guild(mut self, guild_id: Snowflake) -> Self {
        match &mut self {
            Channel::Text(c) => c.guild_id = Some(guild_id),
            Channel::Voice(c) => c.guild_id = Some(guild_id),
            Channel::Category(c) => c.guild_id = Some(guild_id),
            Channel::Other(c) => c.guild_id = Some(guild_id),
            Channel::Direct(_) | Channel::Group(_) => {}
        }
        self
    }
}

mod channel_kind {
    pub const TEXT: u8 = 0;
    pub const DIRECT: u8 = 1;
    pub const VOICE: u8 = 2;
    pub const GROUP: u8 = 3;
    pub const CATEGORY: u8 = 4;
    pub const NEWS: u8 = 5;
    pub const STAGE: u8 = 13;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawChannel {
    id: Snowflake,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    guild_id: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_id: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nsfw: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner_id: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recipients: Option<Vec<User>>,
}

impl From<RawChannel> for Channel {
    fn from(raw: RawChannel) -> Self {
        use channel_kind::*;

        match raw.kind {
            TEXT | NEWS => Channel::Text(TextChannel {
                id: raw.id,
                guild_id: raw.guild_id,
                name: raw.name.unwrap_or_default(),
                position: raw.position.unwrap_or_default(),
                parent_id: raw.parent_id,
                topic: raw.topic,
                nsfw: raw.nsfw.unwrap_or_default(),
            }),
            VOICE | STAGE => Channel::Voice(VoiceChannel {
                id: raw.id,
                guild_id: raw.guild_id,
                name: raw.name.unwrap_or_default(),
                position: raw.position.unwrap_or_default(),
                parent_id: raw.parent_id,
                bitrate: raw.bitrate.unwrap_or(64_000),
                user_limit: raw.user_limit.unwrap_or_default(),
            }),
            CATEGORY => Channel::Category(CategoryChannel {
                id: raw.id,
                guild_id: raw.guild_id,
                name: raw.name.unwrap_or_default(),
                position: raw.position.unwrap_or_default(),
            }),
            DIRECT => Channel::Direct(DirectChannel {
                id: raw.id,
                recipients: raw.recipients.unwrap_or_default(),
            }),
            GROUP => Channel::Group(GroupChannel {
                id: raw.id,
                name: raw.name,
                owner_id: raw.owner_id,
                recipients: raw.recipients.unwrap_or_default(),
            }),
            kind => Channel::Other(OtherChannel {
                id: raw.id,
                kind,
                guild_id: raw.guild_id,
                name: raw.name,
            }),
        }
    }
}

impl From<Channel> for RawChannel {
    fn from(channel: Channel) -> Self {
        use channel_kind::*;

        match channel {
            Channel::Text(c) => RawChannel {
                id: c.id,
                kind: TEXT,
                guild_id: c.guild_id,
                name: Some(c.name),
                position: Some(c.position),
                parent_id: c.parent_id,
                topic: c.topic,
                nsfw: Some(c.nsfw),
                ..Default::default()
            },
            Channel::Voice(c) => RawChannel {
                id: c.id,
                kind: VOICE,
                guild_id: c.guild_id,
                name: Some(c.name),
                position: Some(c.position),
                parent_id: c.parent_id,
                bitrate: Some(c.bitrate),
                user_limit: Some(c.user_limit),
                ..Default::default()
            },
            Channel::Category(c) => RawChannel {
                id: c.id,
                kind: CATEGORY,
                guild_id: c.guild_id,
                name: Some(c.name),
                position: Some(c.position),
                ..Default::default()
            },
            Channel::Direct(c) => RawChannel {
                id: c.id,
                kind: DIRECT,
                recipients: Some(c.recipients),
                ..Default::default()
            },
            Channel::Group(c) => RawChannel {
                id: c.id,
                kind: GROUP,
                name: c.name,
                owner_id: c.owner_id,
                recipients: Some(c.recipients),
                ..Default::default()
            },
            Channel::Other(c) => RawChannel {
                id: c.id,
                kind: c.kind,
                guild_id: c.guild_id,
                name: c.name,
                ..Default::default()
            },
        }
    }
}

// --- Emojis ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Emoji {
    pub id: Snowflake,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub animated: bool,
    #[serde(default)]
    pub managed: bool,
}

// --- Voice ---

/// Voice state of any user, as sent by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceState {
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub channel_id: Option<Snowflake>,
    pub user_id: Snowflake,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub self_mute: bool,
    #[serde(default)]
    pub self_deaf: bool,
}

/// The current user's voice presence in one guild. Identified by guild.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceSession {
    pub guild_id: Snowflake,
    pub channel_id: Snowflake,
    pub session_id: String,
    pub self_mute: bool,
    pub self_deaf: bool,
}

// --- Presence ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Online,
    Idle,
    Dnd,
    Invisible,
    Offline,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(from = "u8", into = "u8")]
pub enum ActivityKind {
    #[default]
    Playing,
    Streaming,
    Listening,
    Watching,
    Custom,
    Competing,
    Unknown(u8),
}

impl From<u8> for ActivityKind {
    fn from(v: u8) -> Self {
        match v {
            0 => ActivityKind::Playing,
            1 => ActivityKind::Streaming,
            2 => ActivityKind::Listening,
            3 => ActivityKind::Watching,
            4 => ActivityKind::Custom,
            5 => ActivityKind::Competing,
            other => ActivityKind::Unknown(other),
        }
    }
}

impl From<ActivityKind> for u8 {
    fn from(kind: ActivityKind) -> Self {
        match kind {
            ActivityKind::Playing => 0,
            ActivityKind::Streaming => 1,
            ActivityKind::Listening => 2,
            ActivityKind::Watching => 3,
            ActivityKind::Custom => 4,
            ActivityKind::Competing => 5,
            ActivityKind::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Activity {
    pub fn playing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ActivityKind::Playing,
            url: None,
        }
    }

    pub fn streaming(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ActivityKind::Streaming,
            url: Some(url.into()),
        }
    }
}

// --- Gateway payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartialApplication {
    pub id: Snowflake,
}

/// The `READY` snapshot that opens a fresh session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ready {
    #[serde(default)]
    pub v: u8,
    pub user: User,
    #[serde(default)]
    pub guilds: Vec<GuildPayload>,
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
    #[serde(default)]
    pub application: Option<PartialApplication>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuildDelete {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuildEmojisUpdate {
    pub guild_id: Snowflake,
    pub emojis: Vec<Emoji>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuildMemberAdd {
    pub guild_id: Snowflake,
    #[serde(flatten)]
    pub member: Member,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuildMemberRemove {
    pub guild_id: Snowflake,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuildMembersChunk {
    pub guild_id: Snowflake,
    pub members: Vec<Member>,
    #[serde(default)]
    pub chunk_index: u32,
    #[serde(default)]
    pub chunk_count: u32,
}

/// Presence updates carry only a partial user; only `id` is guaranteed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceUpdateEvent {
    pub user: serde_json::Value,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub status: Option<Status>,
}

// --- REST values ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invite {
    pub code: String,
    #[serde(default)]
    pub guild: Option<Guild>,
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default)]
    pub inviter: Option<User>,
    #[serde(default)]
    pub approximate_member_count: Option<u64>,
    #[serde(default)]
    pub approximate_presence_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppInfo {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub bot_public: bool,
    #[serde(default)]
    pub bot_require_code_grant: bool,
    #[serde(default)]
    pub owner: Option<User>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Webhook {
    pub id: Snowflake,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub channel_id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectedAccount {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub user: User,
    #[serde(default)]
    pub premium_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub connected_accounts: Vec<ConnectedAccount>,
    #[serde(default)]
    pub mutual_guilds: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGuildRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Image data URI (`data:image/png;base64,...`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// A guild template: a frozen copy of a guild's layout that new guilds can
/// be created from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub code: String,
    #[serde(rename = "usage_count", default)]
    pub uses: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub creator: Option<User>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Last sync with the source guild.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_guild_id: Option<Snowflake>,
    /// The source guild as captured, without its id.
    #[serde(default)]
    pub serialized_source_guild: Option<serde_json::Value>,
    /// Unsynced changes in the source guild; absent on older payloads.
    #[serde(default)]
    pub is_dirty: Option<bool>,
}

impl Template {
    /// The captured source guild, identified by `source_guild_id`.
    pub fn source_guild(&self) -> Option<Guild> {
        let id = self.source_guild_id?;
        let mut raw = match &self.serialized_source_guild {
            Some(serde_json::Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        raw.insert("id".into(), serde_json::Value::String(id.to_string()));
        serde_json::from_value(serde_json::Value::Object(raw)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn template_carries_its_source_guild() {
        let template: Template = serde_json::from_value(json!({
            "code": "hgM48av5Q69A",
            "usage_count": 49,
            "name": "Friends & Family",
            "description": null,
            "creator": { "id": "132837293881950208", "username": "hoges" },
            "created_at": "2020-04-02T21:10:38+00:00",
            "updated_at": "2020-05-01T17:57:38+00:00",
            "source_guild_id": "678070694164299796",
            "serialized_source_guild": { "name": "Friends & Family", "icon": null },
            "is_dirty": null
        }))
        .unwrap();

        assert_eq!(template.uses, 49);
        assert_eq!(template.is_dirty, None);
        assert_eq!(template.created_at.unwrap().timestamp(), 1_585_861_838);
        let source = template.source_guild().unwrap();
        assert_eq!(source.id, Snowflake(678070694164299796));
        assert_eq!(source.name, "Friends & Family");
    }

    #[test]
    fn snowflake_accepts_string_and_number() {
        let a: Snowflake = serde_json::from_value(json!("175928847299117063")).unwrap();
        let b: Snowflake = serde_json::from_value(json!(175928847299117063u64)).unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_value(a).unwrap(), json!("175928847299117063"));
    }

    #[test]
    fn snowflake_timestamp() {
        let id = Snowflake(175928847299117063);
        assert_eq!(id.created_at().timestamp_millis(), 1_462_015_105_796);
    }

    #[test]
    fn channel_kinds_decode_to_variants() {
        let text: Channel = serde_json::from_value(json!({
            "id": "1", "type": 0, "guild_id": "9", "name": "general", "position": 2
        }))
        .unwrap();
        assert!(matches!(&text, Channel::Text(c) if c.name == "general" && c.position == 2));
        assert_eq!(text.guild_id(), Some(Snowflake(9)));

        let voice: Channel =
            serde_json::from_value(json!({ "id": "2", "type": 2, "name": "lounge" })).unwrap();
        assert!(matches!(voice, Channel::Voice(_)));

        let dm: Channel = serde_json::from_value(json!({
            "id": "3", "type": 1, "recipients": [{ "id": "7", "username": "kit" }]
        }))
        .unwrap();
        assert!(matches!(&dm, Channel::Direct(c) if c.recipients.len() == 1));
        assert_eq!(dm.guild_id(), None);

        let forum: Channel =
            serde_json::from_value(json!({ "id": "4", "type": 15, "name": "ideas" })).unwrap();
        assert!(matches!(forum, Channel::Other(OtherChannel { kind: 15, .. })));
    }

    #[test]
    fn nested_channel_gets_guild_stamped() {
        let ch: Channel =
            serde_json::from_value(json!({ "id": "5", "type": 4, "name": "cat" })).unwrap();
        assert_eq!(ch.guild_id(), None);
        assert_eq!(ch.with_guild(Snowflake(10)).guild_id(), Some(Snowflake(10)));
    }

    #[test]
    fn guild_payload_splits_nested_collections() {
        let payload: GuildPayload = serde_json::from_value(json!({
            "id": "42",
            "name": "hearth",
            "channels": [{ "id": "1", "type": 0, "name": "general" }],
            "emojis": [{ "id": "3", "name": "wave" }],
            "members": [{ "user": { "id": "7", "username": "kit" } }],
        }))
        .unwrap();
        assert_eq!(payload.guild.id, Snowflake(42));
        assert_eq!(payload.channels.len(), 1);
        assert_eq!(payload.emojis.len(), 1);
        assert_eq!(payload.members[0].user.username, "kit");
    }

    #[test]
    fn unavailable_guild_stub_decodes() {
        let payload: GuildPayload =
            serde_json::from_value(json!({ "id": "42", "unavailable": true })).unwrap();
        assert!(payload.guild.unavailable);
        assert!(payload.guild.name.is_empty());
    }

    #[test]
    fn activity_kind_round_trips_unknown_values() {
        let activity: Activity =
            serde_json::from_value(json!({ "name": "x", "type": 9 })).unwrap();
        assert_eq!(activity.kind, ActivityKind::Unknown(9));
        assert_eq!(serde_json::to_value(&activity).unwrap()["type"], json!(9));
    }
}
