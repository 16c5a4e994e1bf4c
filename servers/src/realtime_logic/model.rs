use serde::{Deserialize, Serialize};

/// Query string of the websocket upgrade, `GET /ws?userId=...`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    /// Absent, blank or `"undefined"` connects anonymously.
    pub user_id: Option<String>,
}

/// Body of `GET /` and `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// Always `"ok"` while the server answers.
    pub status: String,
    /// Users with a presence entry.
    pub online_users: usize,
    /// Open websocket connections, anonymous ones included.
    pub connections: usize,
    /// Entries in the live session directory.
    pub live_sessions: usize,
}

/// Reply of the message fan-out hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutAck {
    /// Target room.
    pub room: String,
    /// Connections the message was queued for.
    pub delivered: usize,
}
