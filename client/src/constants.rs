pub const DEFAULT_WS_SERVER: &str = "ws://localhost:3005/";
pub const DEFAULT_HTTP_SERVER: &str = "http://localhost:3005/";

pub const WEBSOCKET_SERVER_ENV: &str = "SYNCROOM_WEBSOCKET_SERVER";
pub const HTTP_SERVER_ENV: &str = "SYNCROOM_HTTP_SERVER";

/// Current application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
