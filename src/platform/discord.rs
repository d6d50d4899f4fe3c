//! Discord REST API v10 client and the [`ChatPlatform`] implementation.

use super::events::{InputStyle, Interaction, Modal, Reply};
use super::gateway::GatewayCache;
use super::rate_limit::{ChannelRateLimiters, RateLimitError};
use super::{ChannelInfo, ChatPlatform, Member, PlatformError, PlatformResult};
use crate::board::{Block, Control, ControlStyle};
use crate::model::{ChannelId, GuildId, MessageId, UserId};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const API_BASE: &str = "https://discord.com/api/v10";

/// Retries after a 429 before the error is surfaced.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;
/// Discord refuses to bulk-delete messages older than two weeks.
const BULK_DELETE_MAX_AGE_MS: u64 = 14 * 24 * 60 * 60 * 1000 - 60_000;
const MAX_BUTTONS_PER_ROW: usize = 5;
const MAX_ROWS: usize = 5;
const MAX_EMBEDS_PER_MESSAGE: usize = 10;
/// Page size of the guild member listing.
const MEMBERS_PAGE: usize = 1000;

mod perms {
    pub const MANAGE_CHANNELS: u64 = 1 << 4;
    pub const ADD_REACTIONS: u64 = 1 << 6;
    pub const VIEW_CHANNEL: u64 = 1 << 10;
    pub const SEND_MESSAGES: u64 = 1 << 11;
    pub const MANAGE_MESSAGES: u64 = 1 << 13;
    pub const EMBED_LINKS: u64 = 1 << 14;
    pub const MANAGE_THREADS: u64 = 1 << 34;
    pub const CREATE_PUBLIC_THREADS: u64 = 1 << 35;
    pub const CREATE_PRIVATE_THREADS: u64 = 1 << 36;
    pub const SEND_MESSAGES_IN_THREADS: u64 = 1 << 38;
}

/// Thin REST client. Every call maps HTTP failures onto [`PlatformError`].
#[derive(Debug, Clone)]
pub struct DiscordRest {
    token: String,
    base_url: String,
    client: reqwest::Client,
}

impl DiscordRest {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, API_BASE)
    }

    #[must_use]
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Bot user id encoded in the first segment of a bot token.
    #[must_use]
    pub fn bot_user_id_from_token(token: &str) -> Option<UserId> {
        let first = token.split('.').next()?;
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(first.trim_end_matches('='))
            .ok()?;
        UserId::parse(&String::from_utf8(decoded).ok()?)
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> PlatformResult<Value> {
        let url = format!("{}{path}", self.base_url);
        let mut attempt = 0;
        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Authorization", format!("Bot {}", self.token));
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request
                .send()
                .await
                .map_err(|e| PlatformError::Unavailable(format!("{method} {path}: {e}")))?;
            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| PlatformError::Unavailable(format!("{method} {path}: {e}")))?;

            if status.is_success() {
                if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return serde_json::from_str(&text).map_err(|e| {
                    PlatformError::Protocol(format!("{method} {path}: bad JSON body: {e}"))
                });
            }

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RATE_LIMIT_RETRIES {
                let wait = retry_after(&text);
                tracing::debug!("{method} {path} rate limited; retrying in {wait:?}");
                tokio::time::sleep(wait).await;
                attempt += 1;
                continue;
            }

            return Err(classify(status, &text));
        }
    }

    /// `GET /gateway/bot` websocket URL.
    pub async fn gateway_url(&self) -> PlatformResult<String> {
        let body = self.call(Method::GET, "/gateway/bot", None).await?;
        body.get("url")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| PlatformError::Protocol("gateway response has no url".to_owned()))
    }

    pub async fn get_channel(&self, channel: ChannelId) -> PlatformResult<ChannelInfo> {
        let body = self
            .call(Method::GET, &format!("/channels/{channel}"), None)
            .await?;
        Ok(ChannelInfo {
            id: snowflake(&body, "id").map_or(channel, ChannelId),
            guild_id: snowflake(&body, "guild_id").map(GuildId),
        })
    }

    /// Text channel where `@everyone` may read but not post, and the bot may
    /// manage everything.
    pub async fn create_restricted_channel(
        &self,
        guild: GuildId,
        name: &str,
        bot_user: Option<UserId>,
    ) -> PlatformResult<ChannelId> {
        let body = json!({
            "name": name,
            "type": 0,
            "permission_overwrites": restricted_overwrites(guild, bot_user),
        });
        let created = self
            .call(Method::POST, &format!("/guilds/{guild}/channels"), Some(&body))
            .await?;
        snowflake(&created, "id")
            .map(ChannelId)
            .ok_or_else(|| PlatformError::Protocol("channel response has no id".to_owned()))
    }

    pub async fn delete_channel(&self, channel: ChannelId) -> PlatformResult<()> {
        self.call(Method::DELETE, &format!("/channels/{channel}"), None)
            .await
            .map(|_| ())
    }

    pub async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: u32,
    ) -> PlatformResult<Vec<MessageId>> {
        let limit = limit.clamp(1, 100);
        let body = self
            .call(
                Method::GET,
                &format!("/channels/{channel}/messages?limit={limit}"),
                None,
            )
            .await?;
        let Value::Array(messages) = body else {
            return Err(PlatformError::Protocol("message list is not an array".to_owned()));
        };
        Ok(messages
            .iter()
            .filter_map(|m| snowflake(m, "id"))
            .map(MessageId)
            .collect())
    }

    pub async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> PlatformResult<()> {
        self.call(
            Method::DELETE,
            &format!("/channels/{channel}/messages/{message}"),
            None,
        )
        .await
        .map(|_| ())
    }

    pub async fn bulk_delete(
        &self,
        channel: ChannelId,
        messages: &[MessageId],
    ) -> PlatformResult<()> {
        let ids: Vec<String> = messages.iter().map(ToString::to_string).collect();
        self.call(
            Method::POST,
            &format!("/channels/{channel}/messages/bulk-delete"),
            Some(&json!({ "messages": ids })),
        )
        .await
        .map(|_| ())
    }

    /// Delete up to `limit` recent messages. Messages young enough go through
    /// bulk delete; older ones are deleted one by one.
    pub async fn purge(
        &self,
        channel: ChannelId,
        limit: u32,
        now_ms: u64,
    ) -> PlatformResult<usize> {
        let messages = self.recent_messages(channel, limit).await?;
        let (young, old): (Vec<MessageId>, Vec<MessageId>) = messages
            .into_iter()
            .partition(|m| now_ms.saturating_sub(m.created_at_millis()) < BULK_DELETE_MAX_AGE_MS);

        let mut deleted = 0;
        for chunk in young.chunks(100) {
            if chunk.len() >= 2 {
                self.bulk_delete(channel, chunk).await?;
                deleted += chunk.len();
            } else {
                for message in chunk {
                    deleted += usize::from(self.delete_ignoring_missing(channel, *message).await?);
                }
            }
        }
        for message in old {
            deleted += usize::from(self.delete_ignoring_missing(channel, message).await?);
        }
        Ok(deleted)
    }

    async fn delete_ignoring_missing(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> PlatformResult<bool> {
        match self.delete_message(channel, message).await {
            Ok(()) => Ok(true),
            Err(PlatformError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn create_message(
        &self,
        channel: ChannelId,
        body: &Value,
    ) -> PlatformResult<MessageId> {
        let created = self
            .call(
                Method::POST,
                &format!("/channels/{channel}/messages"),
                Some(body),
            )
            .await?;
        snowflake(&created, "id")
            .map(MessageId)
            .ok_or_else(|| PlatformError::Protocol("message response has no id".to_owned()))
    }

    pub async fn create_thread(&self, parent: ChannelId, name: &str) -> PlatformResult<ChannelId> {
        let body = json!({
            "name": crate::board::truncate(name, 100),
            "type": 11,
            "auto_archive_duration": 10080,
        });
        let created = self
            .call(
                Method::POST,
                &format!("/channels/{parent}/threads"),
                Some(&body),
            )
            .await?;
        snowflake(&created, "id")
            .map(ChannelId)
            .ok_or_else(|| PlatformError::Protocol("thread response has no id".to_owned()))
    }

    pub async fn open_dm(&self, user: UserId) -> PlatformResult<ChannelId> {
        let body = json!({ "recipient_id": user.to_string() });
        let created = self
            .call(Method::POST, "/users/@me/channels", Some(&body))
            .await?;
        snowflake(&created, "id")
            .map(ChannelId)
            .ok_or_else(|| PlatformError::Protocol("DM channel response has no id".to_owned()))
    }

    pub async fn create_invite(
        &self,
        channel: ChannelId,
        max_age_secs: u64,
    ) -> PlatformResult<String> {
        let body = json!({ "max_age": max_age_secs, "max_uses": 0, "unique": true });
        let created = self
            .call(
                Method::POST,
                &format!("/channels/{channel}/invites"),
                Some(&body),
            )
            .await?;
        created
            .get("code")
            .and_then(Value::as_str)
            .map(|code| format!("https://discord.gg/{code}"))
            .ok_or_else(|| PlatformError::Protocol("invite response has no code".to_owned()))
    }

    /// Every member of `guild`, paged by user id. Needs the server members
    /// intent enabled for the application.
    pub async fn list_members(&self, guild: GuildId) -> PlatformResult<Vec<Member>> {
        let mut members = Vec::new();
        let mut after = 0;
        loop {
            let body = self
                .call(
                    Method::GET,
                    &format!("/guilds/{guild}/members?limit={MEMBERS_PAGE}&after={after}"),
                    None,
                )
                .await?;
            let Value::Array(page) = body else {
                return Err(PlatformError::Protocol("member list is not an array".to_owned()));
            };
            let fetched = page.len();
            for entry in &page {
                let Some(user) = entry.get("user") else {
                    continue;
                };
                let Some(id) = snowflake(user, "id") else {
                    continue;
                };
                after = after.max(id);
                members.push(Member {
                    id: UserId(id),
                    bot: user.get("bot").and_then(Value::as_bool).unwrap_or(false),
                });
            }
            if fetched < MEMBERS_PAGE {
                return Ok(members);
            }
        }
    }

    async fn interaction_callback(
        &self,
        interaction: &Interaction,
        body: &Value,
    ) -> PlatformResult<()> {
        self.call(
            Method::POST,
            &format!(
                "/interactions/{}/{}/callback",
                interaction.id, interaction.token
            ),
            Some(body),
        )
        .await
        .map(|_| ())
    }

    /// Deferred channel-message response (type 5).
    pub async fn defer_interaction(
        &self,
        interaction: &Interaction,
        ephemeral: bool,
    ) -> PlatformResult<()> {
        let mut body = json!({ "type": 5 });
        if ephemeral {
            body["data"] = json!({ "flags": 64 });
        }
        self.interaction_callback(interaction, &body).await
    }

    /// Modal response (type 9).
    pub async fn open_modal(&self, interaction: &Interaction, modal: &Modal) -> PlatformResult<()> {
        let body = json!({ "type": 9, "data": modal_json(modal) });
        self.interaction_callback(interaction, &body).await
    }

    pub async fn edit_original_response(
        &self,
        interaction: &Interaction,
        reply: &Reply,
    ) -> PlatformResult<()> {
        self.call(
            Method::PATCH,
            &format!(
                "/webhooks/{}/{}/messages/@original",
                interaction.application_id, interaction.token
            ),
            Some(&reply_body(reply)),
        )
        .await
        .map(|_| ())
    }

    /// Overwrite the global slash-command set.
    pub async fn register_commands(
        &self,
        application_id: u64,
        commands: &Value,
    ) -> PlatformResult<()> {
        self.call(
            Method::PUT,
            &format!("/applications/{application_id}/commands"),
            Some(commands),
        )
        .await
        .map(|_| ())
    }
}

/// [`ChatPlatform`] backed by Discord REST plus the gateway's caches.
pub struct DiscordPlatform {
    rest: DiscordRest,
    cache: Arc<GatewayCache>,
    limiters: Mutex<ChannelRateLimiters>,
    purge_limit: u32,
}

impl DiscordPlatform {
    #[must_use]
    pub fn new(
        rest: DiscordRest,
        cache: Arc<GatewayCache>,
        messages_per_minute: u32,
        purge_limit: u32,
    ) -> Self {
        Self {
            rest,
            cache,
            limiters: Mutex::new(ChannelRateLimiters::new(messages_per_minute)),
            purge_limit,
        }
    }

    #[must_use]
    pub fn rest(&self) -> &DiscordRest {
        &self.rest
    }

    /// Wait until the local limiter admits one more message to `channel`.
    async fn throttle(&self, channel: ChannelId) {
        loop {
            let verdict = self
                .limiters
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .try_acquire(channel);
            match verdict {
                Ok(()) => return,
                Err(RateLimitError::Exceeded { retry_after }) => {
                    tracing::debug!("channel {channel} throttled for {retry_after:?}");
                    tokio::time::sleep(retry_after).await;
                }
            }
        }
    }

    fn bot_user(&self) -> Option<UserId> {
        self.cache
            .bot_user()
            .or_else(|| DiscordRest::bot_user_id_from_token(self.rest.token()))
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    async fn guilds(&self) -> Vec<GuildId> {
        self.cache.guilds()
    }

    async fn create_restricted_channel(
        &self,
        guild: GuildId,
        name: &str,
    ) -> PlatformResult<ChannelId> {
        self.rest
            .create_restricted_channel(guild, name, self.bot_user())
            .await
    }

    async fn delete_channel(&self, channel: ChannelId) -> PlatformResult<()> {
        self.rest.delete_channel(channel).await
    }

    async fn resolve_channel(&self, channel: ChannelId) -> PlatformResult<ChannelInfo> {
        self.rest.get_channel(channel).await
    }

    async fn clear_channel(&self, channel: ChannelId) -> PlatformResult<()> {
        let now_ms = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        let deleted = self.rest.purge(channel, self.purge_limit, now_ms).await?;
        tracing::debug!("cleared {deleted} message(s) from channel {channel}");
        Ok(())
    }

    async fn post_block(&self, channel: ChannelId, block: &Block) -> PlatformResult<MessageId> {
        self.throttle(channel).await;
        let body = json!({
            "embeds": [embed_json(block)],
            "components": components_json(&block.controls),
        });
        self.rest.create_message(channel, &body).await
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> PlatformResult<MessageId> {
        self.throttle(channel).await;
        let body = json!({
            "content": content,
            "allowed_mentions": { "parse": ["users", "everyone"] },
        });
        self.rest.create_message(channel, &body).await
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> PlatformResult<()> {
        self.rest.delete_message(channel, message).await
    }

    async fn create_thread(&self, parent: ChannelId, name: &str) -> PlatformResult<ChannelId> {
        self.rest.create_thread(parent, name).await
    }

    async fn send_direct(&self, user: UserId, content: &str) -> PlatformResult<()> {
        let dm = self.rest.open_dm(user).await?;
        self.rest
            .create_message(dm, &json!({ "content": content }))
            .await
            .map(|_| ())
    }

    async fn create_invite(&self, channel: ChannelId, max_age_secs: u64) -> PlatformResult<String> {
        self.rest.create_invite(channel, max_age_secs).await
    }

    async fn voice_members(&self, channel: ChannelId) -> PlatformResult<Vec<UserId>> {
        Ok(self.cache.voice_members(channel))
    }

    async fn guild_members(&self, guild: GuildId) -> PlatformResult<Vec<Member>> {
        self.rest.list_members(guild).await
    }

    async fn open_modal(&self, interaction: &Interaction, modal: &Modal) -> PlatformResult<()> {
        self.rest.open_modal(interaction, modal).await
    }

    async fn defer_reply(&self, interaction: &Interaction, ephemeral: bool) -> PlatformResult<()> {
        self.rest.defer_interaction(interaction, ephemeral).await
    }

    async fn send_reply(&self, interaction: &Interaction, reply: &Reply) -> PlatformResult<()> {
        self.rest.edit_original_response(interaction, reply).await
    }
}

fn restricted_overwrites(guild: GuildId, bot_user: Option<UserId>) -> Value {
    // The @everyone role shares the guild's id.
    let deny = perms::SEND_MESSAGES
        | perms::ADD_REACTIONS
        | perms::CREATE_PUBLIC_THREADS
        | perms::CREATE_PRIVATE_THREADS;
    let mut overwrites = vec![json!({
        "id": guild.to_string(),
        "type": 0,
        "allow": "0",
        "deny": deny.to_string(),
    })];
    if let Some(bot) = bot_user {
        let allow = perms::VIEW_CHANNEL
            | perms::SEND_MESSAGES
            | perms::EMBED_LINKS
            | perms::MANAGE_MESSAGES
            | perms::MANAGE_CHANNELS
            | perms::ADD_REACTIONS
            | perms::MANAGE_THREADS
            | perms::CREATE_PUBLIC_THREADS
            | perms::SEND_MESSAGES_IN_THREADS;
        overwrites.push(json!({
            "id": bot.to_string(),
            "type": 1,
            "allow": allow.to_string(),
            "deny": "0",
        }));
    }
    Value::Array(overwrites)
}

/// Embed object for one block.
#[must_use]
pub fn embed_json(block: &Block) -> Value {
    let mut embed = json!({
        "title": block.title,
        "color": block.color,
        "fields": block.fields.iter().map(|f| json!({
            "name": f.name,
            "value": f.value,
            "inline": f.inline,
        })).collect::<Vec<_>>(),
    });
    if let Some(description) = &block.description {
        embed["description"] = json!(description);
    }
    if let Some(footer) = &block.footer {
        embed["footer"] = json!({ "text": footer });
    }
    embed
}

/// Action rows of buttons, five per row, at most five rows.
#[must_use]
pub fn components_json(controls: &[Control]) -> Value {
    let rows: Vec<Value> = controls
        .chunks(MAX_BUTTONS_PER_ROW)
        .take(MAX_ROWS)
        .map(|row| {
            json!({
                "type": 1,
                "components": row.iter().map(button_json).collect::<Vec<_>>(),
            })
        })
        .collect();
    Value::Array(rows)
}

fn button_json(control: &Control) -> Value {
    let style = match control.style {
        ControlStyle::Primary => 1,
        ControlStyle::Secondary => 2,
        ControlStyle::Success => 3,
        ControlStyle::Danger => 4,
    };
    let mut button = json!({
        "type": 2,
        "style": style,
        "label": control.label,
        "custom_id": control.custom_id(),
    });
    if let Some(emoji) = &control.emoji {
        button["emoji"] = json!({ "name": emoji });
    }
    button
}

/// Modal payload: one action row per text input.
#[must_use]
pub fn modal_json(modal: &Modal) -> Value {
    let rows: Vec<Value> = modal
        .inputs
        .iter()
        .take(MAX_ROWS)
        .map(|input| {
            let mut component = json!({
                "type": 4,
                "custom_id": input.custom_id,
                "label": input.label,
                "style": match input.style {
                    InputStyle::Short => 1,
                    InputStyle::Paragraph => 2,
                },
                "required": input.required,
                "max_length": input.max_length,
            });
            if let Some(placeholder) = &input.placeholder {
                component["placeholder"] = json!(placeholder);
            }
            json!({ "type": 1, "components": [component] })
        })
        .collect();
    json!({
        "custom_id": modal.custom_id,
        "title": crate::board::truncate(&modal.title, 45),
        "components": rows,
    })
}

fn reply_body(reply: &Reply) -> Value {
    json!({
        "content": reply.content.clone().unwrap_or_default(),
        "embeds": reply
            .blocks
            .iter()
            .take(MAX_EMBEDS_PER_MESSAGE)
            .map(embed_json)
            .collect::<Vec<_>>(),
        "components": components_json(&reply.controls),
    })
}

/// Discord sends snowflakes as strings; older payloads sometimes use numbers.
pub(crate) fn snowflake(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

fn retry_after(body: &str) -> Duration {
    let secs = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("retry_after").and_then(Value::as_f64))
        .unwrap_or(1.0);
    Duration::from_secs_f64(secs.clamp(0.0, 60.0))
}

fn classify(status: StatusCode, body: &str) -> PlatformError {
    let message = error_message(body);
    match status {
        StatusCode::NOT_FOUND => PlatformError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PlatformError::Forbidden(message),
        StatusCode::TOO_MANY_REQUESTS => {
            let wait = retry_after(body);
            PlatformError::RateLimited {
                retry_after_secs: wait.as_secs() + u64::from(wait.subsec_nanos() > 0),
            }
        }
        s if s.is_server_error() => PlatformError::Unavailable(format!("{s}: {message}")),
        s => PlatformError::Protocol(format!("{s}: {message}")),
    }
}
