/// Topic namespace for tunnel channels; channel `C` maps to `public/C`
pub const TOPIC_PREFIX: &str = "public";

/// Prefix for per-process broker client identifiers
pub const CLIENT_ID_PREFIX: &str = "dtr";

/// Length of randomly generated channel identifiers
pub const CHANNEL_LENGTH: usize = 12;

/// Maximum length of an explicit channel identifier
pub const MAX_CHANNEL_LENGTH: usize = 64;

/// Broker handshake and subscribe timeout (10 seconds)
pub const BROKER_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Keep-alive ping interval on the broker connection (5 minutes)
pub const HEARTBEAT_INTERVAL_SECS: u64 = 300;

/// Broker idle timeout the heartbeat has to beat (10 minutes)
pub const BROKER_IDLE_TIMEOUT_SECS: u64 = 600;

/// Minimum delay for exponential backoff session resume (1 second)
pub const RECONNECT_MIN_DELAY_MS: u64 = 1000;

/// Maximum delay for exponential backoff session resume (60 seconds)
pub const RECONNECT_MAX_DELAY_MS: u64 = 60000;

/// Multiplier for exponential backoff session resume
pub const RECONNECT_MULTIPLIER: f64 = 2.0;

/// Capacity of the hand-off queue between the broker thread and the dispatcher
pub const INBOUND_QUEUE_CAPACITY: usize = 1024;

/// Placeholder status logged for replies that carry no HTTP status code
pub const NON_HTTP_STATUS: u16 = 418;

/// Status code of replies synthesized for failed invocations
pub const INVOCATION_ERROR_STATUS: u16 = 500;

/// Status code of replies synthesized for invocations past their deadline
pub const INVOCATION_TIMEOUT_STATUS: u16 = 504;

/// Request timeout for handlers served by a local HTTP process (Lambda max, 15 minutes)
pub const LOCAL_HANDLER_TIMEOUT_SECS: u64 = 900;

/// Default HTTP timeout for the shim's call to the relay ingress (Lambda max, 15 minutes)
pub const INGRESS_TIMEOUT_SECS: u64 = 900;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_values() {
        const _: () = assert!(HEARTBEAT_INTERVAL_SECS < BROKER_IDLE_TIMEOUT_SECS);
        const _: () = assert!(RECONNECT_MIN_DELAY_MS < RECONNECT_MAX_DELAY_MS);
        const _: () = assert!(RECONNECT_MULTIPLIER > 1.0);
        const _: () = assert!(CHANNEL_LENGTH <= MAX_CHANNEL_LENGTH);

        assert_eq!(NON_HTTP_STATUS, 418);
        assert_eq!(TOPIC_PREFIX, "public");
    }
}
