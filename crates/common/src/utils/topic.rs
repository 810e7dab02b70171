use crate::constants::TOPIC_PREFIX;

/// Broker topic carrying all traffic for a channel
pub fn topic_for_channel(channel: &str) -> String {
    format!("{}/{}", TOPIC_PREFIX, channel)
}
