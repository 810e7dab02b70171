mod id;
mod time;
mod topic;

pub use id::{generate_channel, generate_client_id};
pub use time::current_timestamp_millis;
pub use topic::topic_for_channel;
