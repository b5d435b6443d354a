//! Client-wide constants.

/// Application name used in client identification.
pub const APP_NAME: &str = "chatlink";

/// Crate version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Path of the real-time endpoint relative to the base URL.
pub const CONNECT_PATH: &str = "connect";

/// Header carrying the client identifier on the socket upgrade request.
pub const CLIENT_HEADER: &str = "X-Client";

/// Auth type marker for token-authenticated sessions.
pub const AUTH_TYPE_JWT: &str = "jwt";

/// Auth type marker for anonymous sessions.
pub const AUTH_TYPE_ANONYMOUS: &str = "anonymous";

/// Capacity of the command channel feeding the connection actor.
pub const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the inbound frame channel of a transport connection.
pub const FRAME_CHANNEL_CAPACITY: usize = 1024;

/// Frames above this size are dropped without decoding.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Wire event names.
pub mod event_names {
    pub const HEALTH_CHECK: &str = "health.check";
    pub const CONNECTION_CHANGED: &str = "connection.changed";
    pub const CONNECTION_RECOVERED: &str = "connection.recovered";
    pub const USER_UPDATED: &str = "user.updated";
    pub const USER_PRESENCE_CHANGED: &str = "user.presence.changed";
    pub const USER_WATCHING_START: &str = "user.watching.start";
    pub const USER_WATCHING_STOP: &str = "user.watching.stop";
    pub const TYPING_START: &str = "typing.start";
    pub const TYPING_STOP: &str = "typing.stop";
    pub const MESSAGE_NEW: &str = "message.new";
    pub const MESSAGE_UPDATED: &str = "message.updated";
    pub const MESSAGE_DELETED: &str = "message.deleted";
    pub const MESSAGE_READ: &str = "message.read";
    pub const REACTION_NEW: &str = "reaction.new";
    pub const MEMBER_ADDED: &str = "member.added";
    pub const MEMBER_UPDATED: &str = "member.updated";
    pub const MEMBER_REMOVED: &str = "member.removed";
    pub const CHANNEL_UPDATED: &str = "channel.updated";
    pub const CHANNEL_DELETED: &str = "channel.deleted";
    pub const CHANNEL_TRUNCATED: &str = "channel.truncated";
    pub const CHANNEL_HIDDEN: &str = "channel.hidden";
    pub const NOTIFICATION_MESSAGE_NEW: &str = "notification.message_new";
    pub const NOTIFICATION_MARK_READ: &str = "notification.mark_read";
    pub const NOTIFICATION_MARK_UNREAD: &str = "notification.mark_unread";
    pub const NOTIFICATION_ADDED_TO_CHANNEL: &str = "notification.added_to_channel";
    pub const NOTIFICATION_REMOVED_FROM_CHANNEL: &str = "notification.removed_from_channel";
    pub const NOTIFICATION_CHANNEL_DELETED: &str = "notification.channel_deleted";
}
