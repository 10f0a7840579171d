//! In-memory entity cache fed by gateway events.
//!
//! One store per client, keyed by [`Snowflake`] per entity kind. The gateway
//! session is the only writer; everything else reads owned snapshots. Each
//! read takes the lock once, so a call never observes half of an event.
//!
//! Until the session has applied its initial snapshot (READY) the cache
//! reports itself empty: `list` returns nothing and `get` returns `None`.

use std::collections::{HashMap, HashSet};

use hearth_shared::{Channel, Emoji, Guild, GuildPayload, Member, Snowflake, User, VoiceSession};
use indexmap::IndexMap;
use parking_lot::RwLock;

/// Backing maps. Only reachable through [`EntityCache`] and [`CacheTxn`].
#[derive(Debug, Default)]
pub struct Store {
    ready: bool,
    current_user: Option<User>,
    guilds: IndexMap<Snowflake, Guild>,
    users: IndexMap<Snowflake, User>,
    channels: IndexMap<Snowflake, Channel>,
    emojis: IndexMap<Snowflake, Emoji>,
    voice_sessions: IndexMap<Snowflake, VoiceSession>,
    /// guild id -> member user ids
    members: HashMap<Snowflake, HashSet<Snowflake>>,
}

impl Store {
    /// A user stays cached while any guild lists it as a member, a private
    /// channel lists it as a recipient, or it is the current user.
    fn is_user_referenced(&self, user_id: Snowflake) -> bool {
        if self.current_user.as_ref().is_some_and(|u| u.id == user_id) {
            return true;
        }
        if self.members.values().any(|m| m.contains(&user_id)) {
            return true;
        }
        self.channels.values().any(|c| match c {
            Channel::Direct(dm) => dm.recipients.iter().any(|r| r.id == user_id),
            Channel::Group(group) => group.recipients.iter().any(|r| r.id == user_id),
            _ => false,
        })
    }

    fn prune_user(&mut self, user_id: Snowflake) {
        if !self.is_user_referenced(user_id) {
            self.users.shift_remove(&user_id);
        }
    }
}

/// An entity kind the cache stores.
pub trait Cached: Clone + Send + Sync + 'static {
    fn cache_id(&self) -> Snowflake;

    #[doc(hidden)]
    fn map(store: &Store) -> &IndexMap<Snowflake, Self>;

    #[doc(hidden)]
    fn map_mut(store: &mut Store) -> &mut IndexMap<Snowflake, Self>;

    /// Cascade run after `removed` has left its map.
    #[doc(hidden)]
    fn after_remove(_store: &mut Store, _removed: &Self) {}
}

impl Cached for Guild {
    fn cache_id(&self) -> Snowflake {
        self.id
    }

    fn map(store: &Store) -> &IndexMap<Snowflake, Self> {
        &store.guilds
    }

    fn map_mut(store: &mut Store) -> &mut IndexMap<Snowflake, Self> {
        &mut store.guilds
    }

    fn after_remove(store: &mut Store, guild: &Self) {
        store.channels.retain(|_, c| c.guild_id() != Some(guild.id));
        store.emojis.retain(|_, e| e.guild_id != Some(guild.id));
        store.voice_sessions.shift_remove(&guild.id);

        if let Some(members) = store.members.remove(&guild.id) {
            for user_id in members {
                store.prune_user(user_id);
            }
        }
    }
}

impl Cached for User {
    fn cache_id(&self) -> Snowflake {
        self.id
    }

    fn map(store: &Store) -> &IndexMap<Snowflake, Self> {
        &store.users
    }

    fn map_mut(store: &mut Store) -> &mut IndexMap<Snowflake, Self> {
        &mut store.users
    }

    fn after_remove(store: &mut Store, user: &Self) {
        for members in store.members.values_mut() {
            members.remove(&user.id);
        }
    }
}

impl Cached for Channel {
    fn cache_id(&self) -> Snowflake {
        self.id()
    }

    fn map(store: &Store) -> &IndexMap<Snowflake, Self> {
        &store.channels
    }

    fn map_mut(store: &mut Store) -> &mut IndexMap<Snowflake, Self> {
        &mut store.channels
    }

    fn after_remove(store: &mut Store, channel: &Self) {
        let recipients: Vec<Snowflake> = match channel {
            Channel::Direct(dm) => dm.recipients.iter().map(|r| r.id).collect(),
            Channel::Group(group) => group.recipients.iter().map(|r| r.id).collect(),
            _ => return,
        };
        for user_id in recipients {
            store.prune_user(user_id);
        }
    }
}

impl Cached for Emoji {
    fn cache_id(&self) -> Snowflake {
        self.id
    }

    fn map(store: &Store) -> &IndexMap<Snowflake, Self> {
        &store.emojis
    }

    fn map_mut(store: &mut Store) -> &mut IndexMap<Snowflake, Self> {
        &mut store.emojis
    }
}

impl Cached for VoiceSession {
    fn cache_id(&self) -> Snowflake {
        self.guild_id
    }

    fn map(store: &Store) -> &IndexMap<Snowflake, Self> {
        &store.voice_sessions
    }

    fn map_mut(store: &mut Store) -> &mut IndexMap<Snowflake, Self> {
        &mut store.voice_sessions
    }
}

/// Write access to the store for the duration of one [`EntityCache::batch`].
pub struct CacheTxn<'a> {
    store: &'a mut Store,
}

impl CacheTxn<'_> {
    /// Insert or replace in place; a replaced guild keeps its arrival slot.
    pub fn upsert<T: Cached>(&mut self, value: T) {
        T::map_mut(self.store).insert(value.cache_id(), value);
    }

    pub fn remove<T: Cached>(&mut self, id: Snowflake) -> Option<T> {
        let removed = T::map_mut(self.store).shift_remove(&id)?;
        T::after_remove(self.store, &removed);
        Some(removed)
    }

    /// Ungated read, for the writer's own bookkeeping.
    pub fn get<T: Cached>(&self, id: Snowflake) -> Option<&T> {
        T::map(self.store).get(&id)
    }

    pub fn get_mut<T: Cached>(&mut self, id: Snowflake) -> Option<&mut T> {
        T::map_mut(self.store).get_mut(&id)
    }

    pub fn current_user(&self) -> Option<&User> {
        self.store.current_user.as_ref()
    }

    pub fn set_current_user(&mut self, user: User) {
        self.store.users.insert(user.id, user.clone());
        self.store.current_user = Some(user);
    }

    pub fn add_member(&mut self, guild_id: Snowflake, member: Member) {
        let user_id = member.user.id;
        self.upsert(member.user);
        self.store.members.entry(guild_id).or_default().insert(user_id);
    }

    /// Drop a membership; the user goes too unless something else still
    /// references it.
    pub fn remove_member(&mut self, guild_id: Snowflake, user_id: Snowflake) {
        if let Some(members) = self.store.members.get_mut(&guild_id) {
            members.remove(&user_id);
        }
        self.store.prune_user(user_id);
    }

    /// Replace the emoji set of one guild.
    pub fn replace_guild_emojis(&mut self, guild_id: Snowflake, emojis: Vec<Emoji>) {
        self.store.emojis.retain(|_, e| e.guild_id != Some(guild_id));
        for mut emoji in emojis {
            emoji.guild_id = Some(guild_id);
            self.upsert(emoji);
        }
    }

    /// Apply a full guild payload: the guild record plus its channels,
    /// emojis, members and the current user's voice session.
    pub fn upsert_guild_payload(&mut self, payload: GuildPayload) {
        let GuildPayload {
            guild,
            channels,
            emojis,
            members,
            voice_states,
        } = payload;
        let guild_id = guild.id;

        if guild.unavailable {
            // An outage stub carries no data; keep whatever we knew.
            match self.get_mut::<Guild>(guild_id) {
                Some(existing) => existing.unavailable = true,
                None => self.upsert(guild),
            }
            return;
        }

        self.upsert(guild);
        for channel in channels {
            self.upsert(channel.with_guild(guild_id));
        }
        self.replace_guild_emojis(guild_id, emojis);
        for member in members {
            self.add_member(guild_id, member);
        }

        let me = self.current_user().map(|u| u.id);
        for state in voice_states {
            if Some(state.user_id) != me {
                continue;
            }
            if let Some(channel_id) = state.channel_id {
                self.upsert(VoiceSession {
                    guild_id,
                    channel_id,
                    session_id: state.session_id,
                    self_mute: state.self_mute,
                    self_deaf: state.self_deaf,
                });
            }
        }
    }

    /// Reset everything to a fresh snapshot and open the cache for reads.
    pub fn apply_snapshot(&mut self, user: User, guilds: Vec<GuildPayload>) {
        *self.store = Store::default();
        self.set_current_user(user);
        for guild in guilds {
            self.upsert_guild_payload(guild);
        }
        self.store.ready = true;
    }
}

#[derive(Debug, Default)]
pub struct EntityCache {
    inner: RwLock<Store>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run several mutations under one write lock so readers see all of
    /// them or none.
    pub fn batch<R>(&self, f: impl FnOnce(&mut CacheTxn<'_>) -> R) -> R {
        let mut store = self.inner.write();
        let mut txn = CacheTxn { store: &mut store };
        f(&mut txn)
    }

    pub fn upsert<T: Cached>(&self, value: T) {
        self.batch(|txn| txn.upsert(value));
    }

    pub fn remove<T: Cached>(&self, id: Snowflake) -> Option<T> {
        self.batch(|txn| txn.remove(id))
    }

    pub fn get<T: Cached>(&self, id: Snowflake) -> Option<T> {
        let store = self.inner.read();
        if !store.ready {
            return None;
        }
        T::map(&store).get(&id).cloned()
    }

    /// Every cached entity of one kind. Guilds come back in arrival order.
    pub fn list<T: Cached>(&self) -> Vec<T> {
        let store = self.inner.read();
        if !store.ready {
            return Vec::new();
        }
        T::map(&store).values().cloned().collect()
    }

    pub fn len<T: Cached>(&self) -> usize {
        let store = self.inner.read();
        if store.ready {
            T::map(&store).len()
        } else {
            0
        }
    }

    pub fn current_user(&self) -> Option<User> {
        let store = self.inner.read();
        if !store.ready {
            return None;
        }
        store.current_user.clone()
    }

    /// Cached members of a guild.
    pub fn members(&self, guild_id: Snowflake) -> Vec<User> {
        let store = self.inner.read();
        if !store.ready {
            return Vec::new();
        }
        store
            .members
            .get(&guild_id)
            .map(|ids| ids.iter().filter_map(|id| store.users.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Channels belonging to one guild.
    pub fn guild_channels(&self, guild_id: Snowflake) -> Vec<Channel> {
        let store = self.inner.read();
        if !store.ready {
            return Vec::new();
        }
        store
            .channels
            .values()
            .filter(|c| c.guild_id() == Some(guild_id))
            .cloned()
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.read().ready
    }

    pub fn apply_snapshot(&self, user: User, guilds: Vec<GuildPayload>) {
        self.batch(|txn| txn.apply_snapshot(user, guilds));
    }

    /// Forget everything and close the cache for reads.
    pub fn clear(&self) {
        *self.inner.write() = Store::default();
    }
}
