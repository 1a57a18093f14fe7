/// Application name
pub const APP_NAME: &str = "Parley";

/// Id (and name) of the persistent channel every principal is joined to
pub const GENERAL_CHANNEL: &str = "general";

/// Prefix of direct-message channel ids
pub const DIRECT_CHANNEL_PREFIX: &str = "dm";

/// Default text prefix that routes a message to the assistant
pub const DEFAULT_ASSISTANT_PREFIX: &str = "/askAI ";

/// Default number of root messages kept per channel by the in-memory store
pub const DEFAULT_RETENTION_LIMIT: usize = 50;

/// Number of root messages sent with `initialize` / `channel-history`
pub const HISTORY_PAGE_SIZE: usize = 50;

/// Maximum message text length in bytes (16 KiB)
pub const MAX_MESSAGE_LEN: usize = 16 * 1024;

/// Maximum length of a reaction emoji in bytes
pub const MAX_EMOJI_LEN: usize = 32;

/// Maximum channel name length in characters
pub const MAX_CHANNEL_NAME_LEN: usize = 64;

/// Maximum display name length in characters
pub const MAX_DISPLAY_NAME_LEN: usize = 32;

/// Prefix given to guest display names
pub const GUEST_NAME_PREFIX: &str = "guest_";

/// Maximum upload size in bytes (5 MiB)
pub const MAX_UPLOAD_SIZE: usize = 5 * 1024 * 1024;

/// Content types accepted by the upload endpoint
pub const ALLOWED_UPLOAD_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "application/pdf",
    "text/plain",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];
