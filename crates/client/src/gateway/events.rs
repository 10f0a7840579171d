//! Cache side effects of dispatch events.
//!
//! `READY` and `RESUMED` are handled by the session itself; everything else
//! that touches cached state goes through [`apply_event`].

use hearth_shared::{
    Channel, Guild, GuildDelete, GuildEmojisUpdate, GuildMemberAdd, GuildMemberRemove,
    GuildMembersChunk, GuildPayload, PresenceUpdateEvent, Snowflake, User, VoiceSession,
    VoiceState,
};
use serde::Deserialize;
use serde_json::Value;

use crate::cache::{CacheTxn, EntityCache};

/// Apply one dispatch event (by wire name) to the cache.
///
/// Events with no cache effect are accepted untouched. A payload that does
/// not decode leaves the cache unchanged and returns the error.
pub fn apply_event(cache: &EntityCache, name: &str, data: &Value) -> Result<(), serde_json::Error> {
    match name {
        "GUILD_CREATE" => {
            let payload = GuildPayload::deserialize(data)?;
            cache.batch(|txn| txn.upsert_guild_payload(payload));
        }
        "GUILD_UPDATE" => {
            let guild = Guild::deserialize(data)?;
            cache.upsert(guild);
        }
        "GUILD_DELETE" => {
            let event = GuildDelete::deserialize(data)?;
            if event.unavailable {
                cache.batch(|txn| {
                    if let Some(guild) = txn.get_mut::<Guild>(event.id) {
                        guild.unavailable = true;
                    }
                });
            } else {
                cache.remove::<Guild>(event.id);
            }
        }
        "CHANNEL_CREATE" | "CHANNEL_UPDATE" => {
            let channel = Channel::deserialize(data)?;
            cache.batch(|txn| upsert_channel(txn, channel));
        }
        "CHANNEL_DELETE" => {
            let channel = Channel::deserialize(data)?;
            cache.remove::<Channel>(channel.id());
        }
        "GUILD_EMOJIS_UPDATE" => {
            let event = GuildEmojisUpdate::deserialize(data)?;
            cache.batch(|txn| txn.replace_guild_emojis(event.guild_id, event.emojis));
        }
        "GUILD_MEMBER_ADD" | "GUILD_MEMBER_UPDATE" => {
            let event = GuildMemberAdd::deserialize(data)?;
            cache.batch(|txn| txn.add_member(event.guild_id, event.member));
        }
        "GUILD_MEMBER_REMOVE" => {
            let event = GuildMemberRemove::deserialize(data)?;
            cache.batch(|txn| txn.remove_member(event.guild_id, event.user.id));
        }
        "GUILD_MEMBERS_CHUNK" => {
            let chunk = GuildMembersChunk::deserialize(data)?;
            cache.batch(|txn| {
                for member in chunk.members {
                    txn.add_member(chunk.guild_id, member);
                }
            });
        }
        "USER_UPDATE" => {
            let user = User::deserialize(data)?;
            cache.batch(|txn| txn.set_current_user(user));
        }
        "VOICE_STATE_UPDATE" => {
            let state = VoiceState::deserialize(data)?;
            cache.batch(|txn| apply_voice_state(txn, state));
        }
        "PRESENCE_UPDATE" => {
            let event = PresenceUpdateEvent::deserialize(data)?;
            cache.batch(|txn| refresh_user(txn, &event.user));
        }
        _ => {}
    }
    Ok(())
}

fn upsert_channel(txn: &mut CacheTxn<'_>, channel: Channel) {
    let recipients = match &channel {
        Channel::Direct(dm) => dm.recipients.clone(),
        Channel::Group(group) => group.recipients.clone(),
        _ => Vec::new(),
    };
    for user in recipients {
        txn.upsert(user);
    }
    txn.upsert(channel);
}

/// Only the current user's voice state is cached, as a per-guild session.
fn apply_voice_state(txn: &mut CacheTxn<'_>, state: VoiceState) {
    let Some(guild_id) = state.guild_id else {
        return;
    };
    if txn.current_user().map(|u| u.id) != Some(state.user_id) {
        return;
    }
    match state.channel_id {
        Some(channel_id) => txn.upsert(VoiceSession {
            guild_id,
            channel_id,
            session_id: state.session_id,
            self_mute: state.self_mute,
            self_deaf: state.self_deaf,
        }),
        None => {
            txn.remove::<VoiceSession>(guild_id);
        }
    }
}

/// Presence updates carry a partial user; copy over whatever fields are
/// present onto an already cached record.
fn refresh_user(txn: &mut CacheTxn<'_>, partial: &Value) {
    let Some(id) = partial
        .get("id")
        .and_then(|id| Snowflake::deserialize(id).ok())
    else {
        return;
    };
    let Some(user) = txn.get_mut::<User>(id) else {
        return;
    };
    if let Some(name) = partial.get("username").and_then(Value::as_str) {
        user.username = name.to_string();
    }
    if let Some(discriminator) = partial.get("discriminator").and_then(Value::as_str) {
        user.discriminator = discriminator.to_string();
    }
    if let Some(avatar) = partial.get("avatar") {
        user.avatar = avatar.as_str().map(str::to_string);
    }
}
