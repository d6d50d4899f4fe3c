//! Discord gateway session.
//!
//! Keeps the websocket alive, tracks guild membership and voice states in a
//! [`GatewayCache`], and turns dispatches into [`InboundEvent`]s. The
//! [`ReadyGate`] opens on `READY` and closes when the session ends.

use super::ReadyGate;
use super::discord::{DiscordRest, snowflake};
use super::events::{
    ChannelMessage, CommandOption, InboundEvent, Interaction, InteractionKind, OptionValue,
};
use crate::model::{ChannelId, GuildId, MessageId, UserId};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// GUILDS | GUILD_VOICE_STATES | GUILD_MESSAGES
pub const INTENTS: u64 = 1 | (1 << 7) | (1 << 9);
const DEFAULT_HEARTBEAT_MS: u64 = 41_250;

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// A voice connection change for one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceState {
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// `None` once the member leaves voice.
    pub channel_id: Option<ChannelId>,
    /// Bots are never counted as voice members.
    pub bot: bool,
}

#[derive(Debug, Default)]
struct CacheState {
    bot_user: Option<UserId>,
    guilds: BTreeSet<GuildId>,
    voice: HashMap<(GuildId, UserId), ChannelId>,
}

/// Guilds and voice states as last reported by the gateway.
#[derive(Debug, Default)]
pub struct GatewayCache {
    state: RwLock<CacheState>,
}

impl GatewayCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bot_user(&self) -> Option<UserId> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).bot_user
    }

    pub fn set_bot_user(&self, user: UserId) {
        self.state.write().unwrap_or_else(|e| e.into_inner()).bot_user = Some(user);
    }

    #[must_use]
    pub fn guilds(&self) -> Vec<GuildId> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .guilds
            .iter()
            .copied()
            .collect()
    }

    /// Record a guild, replacing its voice states with `voice_states`.
    pub fn add_guild(&self, guild: GuildId, voice_states: &[VoiceState]) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.guilds.insert(guild);
        state.voice.retain(|(g, _), _| *g != guild);
        for vs in voice_states.iter().filter(|vs| vs.guild_id == guild && !vs.bot) {
            if let Some(channel) = vs.channel_id {
                state.voice.insert((guild, vs.user_id), channel);
            }
        }
    }

    pub fn remove_guild(&self, guild: GuildId) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.guilds.remove(&guild);
        state.voice.retain(|(g, _), _| *g != guild);
    }

    pub fn apply_voice_state(&self, vs: VoiceState) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match vs.channel_id.filter(|_| !vs.bot) {
            Some(channel) => {
                state.voice.insert((vs.guild_id, vs.user_id), channel);
            }
            None => {
                state.voice.remove(&(vs.guild_id, vs.user_id));
            }
        }
    }

    #[must_use]
    pub fn voice_members(&self, channel: ChannelId) -> Vec<UserId> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut members: Vec<UserId> = state
            .voice
            .iter()
            .filter(|(_, c)| **c == channel)
            .map(|((_, user), _)| *user)
            .collect();
        members.sort();
        members
    }
}

/// An open websocket that has received HELLO.
pub struct GatewayConnection {
    socket: Socket,
    heartbeat_interval: Duration,
}

/// Why a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Discord asked us to reconnect (op 7).
    ReconnectRequested,
    /// The event receiver was dropped; the runtime is shutting down.
    ReceiverClosed,
}

pub struct GatewaySession {
    rest: DiscordRest,
    cache: Arc<GatewayCache>,
    gate: ReadyGate,
}

impl GatewaySession {
    #[must_use]
    pub fn new(rest: DiscordRest, cache: Arc<GatewayCache>, gate: ReadyGate) -> Self {
        Self { rest, cache, gate }
    }

    #[must_use]
    pub fn gate(&self) -> &ReadyGate {
        &self.gate
    }

    /// Open the websocket and wait for HELLO.
    pub async fn connect(&self) -> anyhow::Result<GatewayConnection> {
        let gateway_url = self.rest.gateway_url().await?;
        let ws_url = format!("{gateway_url}/?v=10&encoding=json");
        let (mut socket, _) = tokio_tungstenite::connect_async(&ws_url).await?;

        let hello = socket
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("gateway closed before hello"))??;
        let hello_text = match hello {
            Message::Text(text) => text,
            _ => anyhow::bail!("unexpected gateway hello payload"),
        };
        let hello_json: Value = serde_json::from_str(&hello_text)?;
        let heartbeat_ms = hello_json
            .get("d")
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_HEARTBEAT_MS);

        Ok(GatewayConnection {
            socket,
            heartbeat_interval: Duration::from_millis(heartbeat_ms),
        })
    }

    /// Identify and pump dispatches into `events` until the connection ends.
    /// The ready gate is closed on every exit path.
    pub async fn run(
        &self,
        connection: GatewayConnection,
        events: &mpsc::Sender<InboundEvent>,
    ) -> anyhow::Result<SessionEnd> {
        let result = self.pump(connection, events).await;
        self.gate.close();
        result
    }

    async fn pump(
        &self,
        connection: GatewayConnection,
        events: &mpsc::Sender<InboundEvent>,
    ) -> anyhow::Result<SessionEnd> {
        let GatewayConnection {
            socket,
            heartbeat_interval,
        } = connection;
        let (mut write, mut read) = socket.split();

        let identify = json!({
            "op": 2,
            "d": {
                "token": self.rest.token(),
                "intents": INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "taskboard",
                    "device": "taskboard"
                }
            }
        });
        write.send(Message::Text(identify.to_string())).await?;

        let (hb_tx, mut hb_rx) = mpsc::channel::<()>(1);
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            loop {
                interval.tick().await;
                if hb_tx.send(()).await.is_err() {
                    break;
                }
            }
        });

        let mut sequence: Option<u64> = None;
        let mut awaiting_ack = false;

        let outcome = loop {
            tokio::select! {
                _ = hb_rx.recv() => {
                    if awaiting_ack {
                        break Err(anyhow::anyhow!("gateway heartbeat was not acknowledged"));
                    }
                    let heartbeat = json!({"op": 1, "d": sequence});
                    if write.send(Message::Text(heartbeat.to_string())).await.is_err() {
                        break Err(anyhow::anyhow!("gateway heartbeat failed"));
                    }
                    awaiting_ack = true;
                }
                maybe_msg = read.next() => {
                    let raw = match maybe_msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            break Err(anyhow::anyhow!("gateway closed: {frame:?}"));
                        }
                        None => break Err(anyhow::anyhow!("gateway stream ended")),
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => break Err(anyhow::anyhow!("gateway error: {err}")),
                    };

                    let payload: Value = match serde_json::from_str(&raw) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if let Some(s) = payload.get("s").and_then(Value::as_u64) {
                        sequence = Some(s);
                    }

                    match payload.get("op").and_then(Value::as_u64).unwrap_or_default() {
                        0 => {
                            let name = payload.get("t").and_then(Value::as_str).unwrap_or_default();
                            let Some(data) = payload.get("d") else {
                                continue;
                            };
                            if let Some(event) = self.dispatch(name, data) {
                                if events.send(event).await.is_err() {
                                    break Ok(SessionEnd::ReceiverClosed);
                                }
                            }
                        }
                        1 => {
                            let heartbeat = json!({"op": 1, "d": sequence});
                            if write.send(Message::Text(heartbeat.to_string())).await.is_err() {
                                break Err(anyhow::anyhow!("gateway heartbeat failed"));
                            }
                        }
                        7 => break Ok(SessionEnd::ReconnectRequested),
                        9 => break Err(anyhow::anyhow!("gateway session invalidated")),
                        11 => awaiting_ack = false,
                        _ => {}
                    }
                }
            }
        };

        ticker.abort();
        outcome
    }

    /// Update caches for one dispatch and translate it for the runtime.
    pub fn dispatch(&self, name: &str, data: &Value) -> Option<InboundEvent> {
        match name {
            "READY" => {
                let bot_user = data.get("user").and_then(|u| snowflake(u, "id")).map(UserId)?;
                self.cache.set_bot_user(bot_user);
                self.gate.open();
                tracing::info!("gateway ready as user {bot_user}");
                Some(InboundEvent::Ready { bot_user })
            }
            "GUILD_CREATE" => {
                let guild = snowflake(data, "id").map(GuildId)?;
                if data.get("unavailable").and_then(Value::as_bool) == Some(true) {
                    return None;
                }
                // Guild voice states carry no member object; bot flags come
                // from the member list sent alongside.
                let bots: BTreeSet<UserId> = data
                    .get("members")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|m| m.get("user"))
                    .filter(|u| u.get("bot").and_then(Value::as_bool) == Some(true))
                    .filter_map(|u| snowflake(u, "id").map(UserId))
                    .collect();
                let voice_states: Vec<VoiceState> = data
                    .get("voice_states")
                    .and_then(Value::as_array)
                    .map(|states| {
                        states
                            .iter()
                            .filter_map(|vs| parse_voice_state(vs, Some(guild)))
                            .map(|vs| VoiceState {
                                bot: vs.bot || bots.contains(&vs.user_id),
                                ..vs
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                self.cache.add_guild(guild, &voice_states);
                Some(InboundEvent::GuildAvailable(guild))
            }
            "GUILD_DELETE" => {
                let guild = snowflake(data, "id").map(GuildId)?;
                // An outage reports `unavailable`; only a real removal drops the guild.
                if data.get("unavailable").and_then(Value::as_bool) == Some(true) {
                    return None;
                }
                self.cache.remove_guild(guild);
                Some(InboundEvent::GuildRemoved(guild))
            }
            "VOICE_STATE_UPDATE" => {
                if let Some(vs) = parse_voice_state(data, None) {
                    self.cache.apply_voice_state(vs);
                }
                None
            }
            "INTERACTION_CREATE" => parse_interaction(data).map(InboundEvent::Interaction),
            "MESSAGE_CREATE" => {
                let message = parse_message(data)?;
                if Some(message.author) == self.cache.bot_user() {
                    return None;
                }
                Some(InboundEvent::Message(message))
            }
            _ => None,
        }
    }
}

/// Parse a voice state; guild voice states omit `guild_id`, so the caller
/// may supply it.
#[must_use]
pub fn parse_voice_state(data: &Value, guild: Option<GuildId>) -> Option<VoiceState> {
    let guild_id = snowflake(data, "guild_id").map(GuildId).or(guild)?;
    let user_id = snowflake(data, "user_id").map(UserId)?;
    Some(VoiceState {
        guild_id,
        user_id,
        channel_id: snowflake(data, "channel_id").map(ChannelId),
        bot: data
            .get("member")
            .and_then(|m| m.get("user"))
            .and_then(|u| u.get("bot"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

#[must_use]
pub fn parse_message(data: &Value) -> Option<ChannelMessage> {
    let author = data.get("author")?;
    Some(ChannelMessage {
        id: snowflake(data, "id").map(MessageId)?,
        channel_id: snowflake(data, "channel_id").map(ChannelId)?,
        guild_id: snowflake(data, "guild_id").map(GuildId),
        author: snowflake(author, "id").map(UserId)?,
        author_is_bot: author.get("bot").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Parse an `INTERACTION_CREATE` payload. Slash commands (type 2), message
/// components (type 3) and modal submits (type 5) are recognised.
#[must_use]
pub fn parse_interaction(data: &Value) -> Option<Interaction> {
    let member = data.get("member");
    let user = member
        .and_then(|m| m.get("user"))
        .or_else(|| data.get("user"))
        .and_then(|u| snowflake(u, "id"))
        .map(UserId)?;
    let permissions = member
        .and_then(|m| m.get("permissions"))
        .and_then(Value::as_str)
        .and_then(|p| p.parse::<u64>().ok())
        .unwrap_or(0);

    let body = data.get("data")?;
    let kind = match data.get("type").and_then(Value::as_u64)? {
        2 => InteractionKind::Command {
            name: body.get("name").and_then(Value::as_str)?.to_owned(),
            options: body
                .get("options")
                .and_then(Value::as_array)
                .map(|opts| opts.iter().filter_map(parse_option).collect())
                .unwrap_or_default(),
        },
        3 => InteractionKind::Component {
            custom_id: body.get("custom_id").and_then(Value::as_str)?.to_owned(),
        },
        5 => InteractionKind::ModalSubmit {
            custom_id: body.get("custom_id").and_then(Value::as_str)?.to_owned(),
            fields: parse_modal_fields(body),
        },
        _ => return None,
    };

    Some(Interaction {
        id: data.get("id").and_then(Value::as_str)?.to_owned(),
        token: data.get("token").and_then(Value::as_str)?.to_owned(),
        application_id: data
            .get("application_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        guild_id: snowflake(data, "guild_id").map(GuildId),
        channel_id: snowflake(data, "channel_id").map(ChannelId),
        user,
        permissions,
        kind,
    })
}

/// Text inputs arrive nested one per action row.
fn parse_modal_fields(body: &Value) -> Vec<(String, String)> {
    body.get("components")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|row| row.get("components").and_then(Value::as_array))
        .flatten()
        .filter_map(|input| {
            let id = input.get("custom_id").and_then(Value::as_str)?;
            let value = input.get("value").and_then(Value::as_str).unwrap_or_default();
            Some((id.to_owned(), value.to_owned()))
        })
        .collect()
}

fn parse_option(option: &Value) -> Option<CommandOption> {
    let name = option.get("name").and_then(Value::as_str)?.to_owned();
    let raw = option.get("value")?;
    let value = match option.get("type").and_then(Value::as_u64)? {
        3 => OptionValue::String(raw.as_str()?.to_owned()),
        4 => OptionValue::Integer(raw.as_i64()?),
        5 => OptionValue::Bool(raw.as_bool()?),
        6 | 9 => OptionValue::User(UserId::parse(raw.as_str()?)?),
        7 => OptionValue::Channel(ChannelId::parse(raw.as_str()?)?),
        _ => return None,
    };
    Some(CommandOption { name, value })
}
