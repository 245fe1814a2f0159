//! Method name constants shared by relays and instances.

/// All method names an instance understands.
pub struct Methods;

impl Methods {
    // ── Lifecycle ───────────────────────────────────────────────────────
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";

    // ── Tools ───────────────────────────────────────────────────────────
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

/// Check if a method name is one an instance handles.
pub fn is_known_method(method: &str) -> bool {
    matches!(
        method,
        Methods::INITIALIZE
            | Methods::INITIALIZED
            | Methods::PING
            | Methods::TOOLS_LIST
            | Methods::TOOLS_CALL
    )
}
