//! Real-time event types.
//!
//! Defines every event kind streamed from the chat server, the decoded
//! `Event` value handed to subscribers, the channel identifier used to scope
//! events, and typed payload views over the raw event data.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cl_core::constants::event_names as names;
use cl_core::error::{ClError, ClResult};

/// All event kinds emitted by the chat server.
///
/// Kinds the client does not know about decode to `Unknown` so newer servers
/// never break older clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Keep-alive; the first one on a connection carries the session (`health.check`).
    HealthCheck,
    /// Server-side connection status change (`connection.changed`).
    ConnectionChanged,
    /// Server confirmed a recovered connection (`connection.recovered`).
    ConnectionRecovered,
    /// A user's profile changed (`user.updated`).
    UserUpdated,
    /// A user went online or offline (`user.presence.changed`).
    UserPresenceChanged,
    /// A user started watching a channel (`user.watching.start`).
    UserWatchingStart,
    /// A user stopped watching a channel (`user.watching.stop`).
    UserWatchingStop,
    /// Typing started in a channel (`typing.start`).
    TypingStart,
    /// Typing stopped in a channel (`typing.stop`).
    TypingStop,
    /// A new message in a watched channel (`message.new`).
    MessageNew,
    /// A message was edited (`message.updated`).
    MessageUpdated,
    /// A message was deleted (`message.deleted`).
    MessageDeleted,
    /// A member read a channel (`message.read`).
    MessageRead,
    /// A reaction was added (`reaction.new`).
    ReactionNew,
    /// A member joined a channel (`member.added`).
    MemberAdded,
    /// A member's role or state changed (`member.updated`).
    MemberUpdated,
    /// A member left a channel (`member.removed`).
    MemberRemoved,
    /// Channel data changed (`channel.updated`).
    ChannelUpdated,
    /// A channel was deleted (`channel.deleted`).
    ChannelDeleted,
    /// A channel's history was truncated (`channel.truncated`).
    ChannelTruncated,
    /// A channel was hidden for the current user (`channel.hidden`).
    ChannelHidden,
    /// A new message in a channel the user is a member of but not watching.
    NotificationMessageNew,
    /// The current user marked channels read (`notification.mark_read`).
    NotificationMarkRead,
    /// The current user marked a channel unread (`notification.mark_unread`).
    NotificationMarkUnread,
    /// The current user was added to a channel.
    NotificationAddedToChannel,
    /// The current user was removed from a channel.
    NotificationRemovedFromChannel,
    /// A channel the current user belongs to was deleted.
    NotificationChannelDeleted,
    /// Unknown/unhandled event type.
    Unknown(String),
}

impl EventKind {
    /// Parse a wire event name.
    pub fn from_name(s: &str) -> Self {
        match s {
            names::HEALTH_CHECK => Self::HealthCheck,
            names::CONNECTION_CHANGED => Self::ConnectionChanged,
            names::CONNECTION_RECOVERED => Self::ConnectionRecovered,
            names::USER_UPDATED => Self::UserUpdated,
            names::USER_PRESENCE_CHANGED => Self::UserPresenceChanged,
            names::USER_WATCHING_START => Self::UserWatchingStart,
            names::USER_WATCHING_STOP => Self::UserWatchingStop,
            names::TYPING_START => Self::TypingStart,
            names::TYPING_STOP => Self::TypingStop,
            names::MESSAGE_NEW => Self::MessageNew,
            names::MESSAGE_UPDATED => Self::MessageUpdated,
            names::MESSAGE_DELETED => Self::MessageDeleted,
            names::MESSAGE_READ => Self::MessageRead,
            names::REACTION_NEW => Self::ReactionNew,
            names::MEMBER_ADDED => Self::MemberAdded,
            names::MEMBER_UPDATED => Self::MemberUpdated,
            names::MEMBER_REMOVED => Self::MemberRemoved,
            names::CHANNEL_UPDATED => Self::ChannelUpdated,
            names::CHANNEL_DELETED => Self::ChannelDeleted,
            names::CHANNEL_TRUNCATED => Self::ChannelTruncated,
            names::CHANNEL_HIDDEN => Self::ChannelHidden,
            names::NOTIFICATION_MESSAGE_NEW => Self::NotificationMessageNew,
            names::NOTIFICATION_MARK_READ => Self::NotificationMarkRead,
            names::NOTIFICATION_MARK_UNREAD => Self::NotificationMarkUnread,
            names::NOTIFICATION_ADDED_TO_CHANNEL => Self::NotificationAddedToChannel,
            names::NOTIFICATION_REMOVED_FROM_CHANNEL => Self::NotificationRemovedFromChannel,
            names::NOTIFICATION_CHANNEL_DELETED => Self::NotificationChannelDeleted,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Convert to the wire event name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::HealthCheck => names::HEALTH_CHECK,
            Self::ConnectionChanged => names::CONNECTION_CHANGED,
            Self::ConnectionRecovered => names::CONNECTION_RECOVERED,
            Self::UserUpdated => names::USER_UPDATED,
            Self::UserPresenceChanged => names::USER_PRESENCE_CHANGED,
            Self::UserWatchingStart => names::USER_WATCHING_START,
            Self::UserWatchingStop => names::USER_WATCHING_STOP,
            Self::TypingStart => names::TYPING_START,
            Self::TypingStop => names::TYPING_STOP,
            Self::MessageNew => names::MESSAGE_NEW,
            Self::MessageUpdated => names::MESSAGE_UPDATED,
            Self::MessageDeleted => names::MESSAGE_DELETED,
            Self::MessageRead => names::MESSAGE_READ,
            Self::ReactionNew => names::REACTION_NEW,
            Self::MemberAdded => names::MEMBER_ADDED,
            Self::MemberUpdated => names::MEMBER_UPDATED,
            Self::MemberRemoved => names::MEMBER_REMOVED,
            Self::ChannelUpdated => names::CHANNEL_UPDATED,
            Self::ChannelDeleted => names::CHANNEL_DELETED,
            Self::ChannelTruncated => names::CHANNEL_TRUNCATED,
            Self::ChannelHidden => names::CHANNEL_HIDDEN,
            Self::NotificationMessageNew => names::NOTIFICATION_MESSAGE_NEW,
            Self::NotificationMarkRead => names::NOTIFICATION_MARK_READ,
            Self::NotificationMarkUnread => names::NOTIFICATION_MARK_UNREAD,
            Self::NotificationAddedToChannel => names::NOTIFICATION_ADDED_TO_CHANNEL,
            Self::NotificationRemovedFromChannel => names::NOTIFICATION_REMOVED_FROM_CHANNEL,
            Self::NotificationChannelDeleted => names::NOTIFICATION_CHANNEL_DELETED,
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Whether this kind announces a new message.
    pub fn is_new_message(&self) -> bool {
        matches!(self, Self::MessageNew | Self::NotificationMessageNew)
    }

    /// Whether this kind reports a read-state change.
    pub fn is_read_state(&self) -> bool {
        matches!(
            self,
            Self::MessageRead | Self::NotificationMarkRead | Self::NotificationMarkUnread
        )
    }

    /// Whether this kind relates to channel membership.
    pub fn is_member_event(&self) -> bool {
        matches!(
            self,
            Self::MemberAdded
                | Self::MemberUpdated
                | Self::MemberRemoved
                | Self::NotificationAddedToChannel
                | Self::NotificationRemovedFromChannel
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel identifier in `type:id` form, e.g. `messaging:general`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId {
    channel_type: String,
    id: String,
}

impl ChannelId {
    /// Build a channel id from its parts.
    pub fn new(channel_type: &str, id: &str) -> ClResult<Self> {
        if channel_type.is_empty() || id.is_empty() {
            return Err(ClError::Decode(format!(
                "channel id parts must not be empty: {channel_type:?}:{id:?}"
            )));
        }
        if channel_type.contains(':') {
            return Err(ClError::Decode(format!(
                "channel type must not contain ':': {channel_type}"
            )));
        }
        Ok(Self {
            channel_type: channel_type.to_string(),
            id: id.to_string(),
        })
    }

    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl FromStr for ChannelId {
    type Err = ClError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (channel_type, id) = s
            .split_once(':')
            .ok_or_else(|| ClError::Decode(format!("channel id is missing ':': {s}")))?;
        Self::new(channel_type, id)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = ClError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelId> for String {
    fn from(cid: ChannelId) -> Self {
        cid.to_string()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel_type, self.id)
    }
}

/// Snapshot of a user as seen by the server.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub online: bool,
    /// Unread messages across all channels (only on the current user).
    #[serde(default)]
    pub total_unread_count: u32,
    /// Channels with unread messages (only on the current user).
    #[serde(default)]
    pub unread_channels: u32,
    /// Custom fields and fields the client does not model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserSnapshot {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Payload of `health.check`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckPayload {
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Authoritative current user, present on the first health check only.
    #[serde(default)]
    pub me: Option<UserSnapshot>,
}

/// A chat message as embedded in events.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub user: Option<UserSnapshot>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub show_in_channel: Option<bool>,
    #[serde(default)]
    pub silent: bool,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
}

impl MessagePayload {
    /// Thread replies not echoed into the channel do not count as channel traffic.
    pub fn is_thread_only_reply(&self) -> bool {
        self.parent_id.is_some() && !self.show_in_channel.unwrap_or(false)
    }

    /// System and ephemeral messages never count as unread.
    pub fn counts_as_unread(&self) -> bool {
        !self.silent
            && !self.is_thread_only_reply()
            && !matches!(self.message_type.as_deref(), Some("system" | "ephemeral" | "error"))
    }
}

/// Payload of `message.new` and `notification.message_new`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEventPayload {
    pub message: MessagePayload,
    #[serde(default)]
    pub user: Option<UserSnapshot>,
    #[serde(default)]
    pub watcher_count: Option<u32>,
    #[serde(default)]
    pub total_unread_count: Option<u32>,
    #[serde(default)]
    pub unread_channels: Option<u32>,
}

impl MessageEventPayload {
    /// Author of the message, from the message itself or the event envelope.
    pub fn author_id(&self) -> Option<&str> {
        self.message
            .user
            .as_ref()
            .or(self.user.as_ref())
            .map(|u| u.id.as_str())
    }
}

/// Payload of `message.read`, `notification.mark_read` and `notification.mark_unread`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadStatePayload {
    #[serde(default)]
    pub user: Option<UserSnapshot>,
    #[serde(default)]
    pub total_unread_count: Option<u32>,
    #[serde(default)]
    pub unread_channels: Option<u32>,
    /// Unread messages left in the channel (mark-unread only).
    #[serde(default)]
    pub unread_messages: Option<u32>,
}

/// Aggregate unread totals carried by several event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnreadTotals {
    pub channels: u32,
    pub messages: u32,
}

/// A decoded server event.
///
/// Immutable once decoded; subscribers receive shared references.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// The kind of event.
    pub kind: EventKind,
    /// Channel the event is scoped to, when applicable.
    pub cid: Option<ChannelId>,
    /// Server timestamp.
    pub created_at: Option<DateTime<Utc>>,
    /// The full event payload from the server.
    pub data: serde_json::Value,
}

impl Event {
    /// Build an event from a kind and payload, picking `cid` and
    /// `created_at` out of the payload.
    pub fn from_data(kind: EventKind, data: serde_json::Value) -> ClResult<Self> {
        let cid = match data.get("cid").and_then(|v| v.as_str()) {
            Some(raw) => Some(raw.parse::<ChannelId>()?),
            None => None,
        };
        let created_at = data
            .get("created_at")
            .and_then(|v| v.as_str())
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc));
        Ok(Self {
            kind,
            cid,
            created_at,
            data,
        })
    }

    fn typed<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.data.clone()).ok()
    }

    /// Id of the user the event is about, if any.
    pub fn user_id(&self) -> Option<&str> {
        self.data
            .get("user")
            .and_then(|u| u.get("id"))
            .and_then(|id| id.as_str())
    }

    /// Watcher count carried by the event, if any.
    pub fn watcher_count(&self) -> Option<u32> {
        self.data
            .get("watcher_count")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
    }

    /// Member count of the channel carried by the event, if any.
    pub fn member_count(&self) -> Option<u32> {
        self.data
            .get("channel")
            .and_then(|c| c.get("member_count"))
            .or_else(|| self.data.get("member_count"))
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
    }

    /// Unread totals, when the payload carries both of them.
    pub fn unread_totals(&self) -> Option<UnreadTotals> {
        let messages = self.data.get("total_unread_count")?.as_u64()?;
        let channels = self.data.get("unread_channels")?.as_u64()?;
        Some(UnreadTotals {
            channels: channels as u32,
            messages: messages as u32,
        })
    }

    /// Try to view the data as a HealthCheckPayload.
    pub fn as_health_check(&self) -> Option<HealthCheckPayload> {
        if self.kind == EventKind::HealthCheck {
            self.typed()
        } else {
            None
        }
    }

    /// Try to view the data as a MessageEventPayload.
    pub fn as_message_new(&self) -> Option<MessageEventPayload> {
        if self.kind.is_new_message() {
            self.typed()
        } else {
            None
        }
    }

    /// Try to view the data as a ReadStatePayload.
    pub fn as_read_state(&self) -> Option<ReadStatePayload> {
        if self.kind.is_read_state() {
            self.typed()
        } else {
            None
        }
    }

    /// Try to view the data as an updated user.
    pub fn as_user_update(&self) -> Option<UserSnapshot> {
        match self.kind {
            EventKind::UserUpdated | EventKind::UserPresenceChanged => self
                .data
                .get("user")
                .and_then(|u| serde_json::from_value(u.clone()).ok()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_parsing() {
        assert_eq!(EventKind::from_name("health.check"), EventKind::HealthCheck);
        assert_eq!(EventKind::from_name("message.new"), EventKind::MessageNew);
        assert_eq!(
            EventKind::from_name("notification.mark_read"),
            EventKind::NotificationMarkRead
        );
        assert_eq!(
            EventKind::from_name("poll.vote_casted"),
            EventKind::Unknown("poll.vote_casted".into())
        );
    }

    #[test]
    fn test_unknown_kind_keeps_name() {
        let kind = EventKind::from_name("call.ring");
        assert_eq!(kind.as_str(), "call.ring");
        assert_eq!(kind.to_string(), "call.ring");
    }

    #[test]
    fn test_event_kind_categories() {
        assert!(EventKind::MessageNew.is_new_message());
        assert!(EventKind::NotificationMessageNew.is_new_message());
        assert!(!EventKind::MessageUpdated.is_new_message());
        assert!(EventKind::NotificationMarkUnread.is_read_state());
        assert!(EventKind::MemberAdded.is_member_event());
        assert!(!EventKind::TypingStart.is_member_event());
    }

    #[test]
    fn test_channel_id_parse() {
        let cid: ChannelId = "messaging:general".parse().unwrap();
        assert_eq!(cid.channel_type(), "messaging");
        assert_eq!(cid.id(), "general");
        assert_eq!(cid.to_string(), "messaging:general");

        // Ids may themselves contain colons.
        let cid: ChannelId = "livestream:match:42".parse().unwrap();
        assert_eq!(cid.id(), "match:42");

        assert!("general".parse::<ChannelId>().is_err());
        assert!(":general".parse::<ChannelId>().is_err());
        assert!("messaging:".parse::<ChannelId>().is_err());
    }

    #[test]
    fn test_channel_id_serde() {
        let cid: ChannelId = serde_json::from_value(json!("team:dev")).unwrap();
        assert_eq!(cid, ChannelId::new("team", "dev").unwrap());
        assert_eq!(serde_json::to_value(&cid).unwrap(), json!("team:dev"));
    }

    #[test]
    fn test_event_from_data_extracts_cid_and_time() {
        let event = Event::from_data(
            EventKind::MessageNew,
            json!({
                "cid": "messaging:general",
                "created_at": "2024-07-01T10:30:00Z",
                "watcher_count": 3,
                "message": {"id": "m1", "text": "hi", "user": {"id": "bob"}},
            }),
        )
        .unwrap();
        assert_eq!(event.cid.as_ref().unwrap().to_string(), "messaging:general");
        assert!(event.created_at.is_some());
        assert_eq!(event.watcher_count(), Some(3));

        let payload = event.as_message_new().unwrap();
        assert_eq!(payload.author_id(), Some("bob"));
        assert!(payload.message.counts_as_unread());
    }

    #[test]
    fn test_event_from_data_rejects_bad_cid() {
        let result = Event::from_data(EventKind::MessageNew, json!({"cid": "nocolon"}));
        assert!(matches!(result, Err(ClError::Decode(_))));
    }

    #[test]
    fn test_unread_totals_requires_both_fields() {
        let full = Event::from_data(
            EventKind::NotificationMarkRead,
            json!({"total_unread_count": 4, "unread_channels": 2}),
        )
        .unwrap();
        assert_eq!(
            full.unread_totals(),
            Some(UnreadTotals {
                channels: 2,
                messages: 4
            })
        );

        let partial =
            Event::from_data(EventKind::MessageNew, json!({"total_unread_count": 4})).unwrap();
        assert_eq!(partial.unread_totals(), None);
    }

    #[test]
    fn test_health_check_payload() {
        let event = Event::from_data(
            EventKind::HealthCheck,
            json!({
                "connection_id": "conn-1",
                "me": {"id": "alice", "name": "Alice", "total_unread_count": 5, "unread_channels": 1, "teams": ["red"]},
            }),
        )
        .unwrap();
        let payload = event.as_health_check().unwrap();
        assert_eq!(payload.connection_id.as_deref(), Some("conn-1"));
        let me = payload.me.unwrap();
        assert_eq!(me.name.as_deref(), Some("Alice"));
        assert_eq!(me.total_unread_count, 5);
        assert_eq!(me.extra["teams"], json!(["red"]));

        // Wrong kind yields None.
        assert!(event.as_read_state().is_none());
    }

    #[test]
    fn test_thread_reply_not_counted() {
        let event = Event::from_data(
            EventKind::MessageNew,
            json!({
                "cid": "messaging:general",
                "message": {"id": "m2", "parent_id": "m1", "user": {"id": "bob"}},
            }),
        )
        .unwrap();
        assert!(!event.as_message_new().unwrap().message.counts_as_unread());
    }

    #[test]
    fn test_user_update_view() {
        let event = Event::from_data(
            EventKind::UserUpdated,
            json!({"user": {"id": "alice", "name": "Alice B"}}),
        )
        .unwrap();
        assert_eq!(event.user_id(), Some("alice"));
        assert_eq!(event.as_user_update().unwrap().name.as_deref(), Some("Alice B"));
    }

    #[test]
    fn test_member_count() {
        let event = Event::from_data(
            EventKind::MemberAdded,
            json!({"cid": "team:dev", "channel": {"member_count": 12}}),
        )
        .unwrap();
        assert_eq!(event.member_count(), Some(12));
    }
}
