use serde::{Deserialize, Serialize};

/// Server-advertised per-day cap on fresh IDENTIFY calls, returned by the
/// gateway bootstrap endpoint.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SessionStartLimit {
    /// Total number of session starts allowed per reset period.
    pub total: u32,
    /// Remaining session starts allowed per reset period.
    pub remaining: u32,
    /// Milliseconds until the limit resets.
    pub reset_after: u64,
    /// Number of identify requests allowed per 5 seconds.
    pub max_concurrency: u32,
}

/// Gateway bootstrap response: URL plus shard recommendation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GatewayInfo {
    /// WSS URL to connect to.
    pub url: String,
    /// Recommended number of shards.
    pub shards: u32,
    /// Current session start limit.
    pub session_start_limit: SessionStartLimit,
}

#[cfg(test)]
mod tests {
    use super::{GatewayInfo, SessionStartLimit};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(SessionStartLimit: Clone, Copy, Debug, Eq, Send, Sync);
    assert_impl_all!(GatewayInfo: Clone, Debug, Eq, Send, Sync);

    #[test]
    fn deserializes_from_typical_payload() {
        let json = r#"{
            "url": "wss://gateway.example.com",
            "shards": 12,
            "session_start_limit": {
                "total": 1000,
                "remaining": 998,
                "reset_after": 82_800_000,
                "max_concurrency": 1
            }
        }"#;

        let info: GatewayInfo = serde_json::from_str(json).unwrap();

        assert_eq!(info.shards, 12);
        assert_eq!(info.session_start_limit.max_concurrency, 1);
    }
}
