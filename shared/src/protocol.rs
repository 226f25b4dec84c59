/// Endpoint paths on the directory service, relative to its base URL
pub const PATH_ADD: &str = "/add";
pub const PATH_UPDATE: &str = "/update";
pub const PATH_REMOVE: &str = "/remove";

/// Form field keys understood by the directory service
pub const FIELD_KEY: &str = "serverKey";
pub const FIELD_UUID: &str = "serverUuid";
pub const FIELD_NAME: &str = "serverName";
pub const FIELD_PORT: &str = "serverPort";
pub const FIELD_PLAYERS: &str = "serverPlayers";
pub const FIELD_CAPACITY: &str = "serverCapacity";
pub const FIELD_EXTRAS: &str = "serverExtras";

/// Local API path prefix
pub const API_PREFIX: &str = "/v1";
