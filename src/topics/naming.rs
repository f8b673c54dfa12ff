//! Deterministic topic naming.
//!
//! Work topics are pure functions of store name and version number so every
//! component (parent, regions, push jobs) derives the same name without
//! coordination. Store names may themselves contain underscores, so parsing
//! splits on the last `_v` marker.

const VERSION_SEPARATOR: &str = "_v";
const REPROCESSING_SUFFIX: &str = "_sr";
const ADMIN_TOPIC_PREFIX: &str = "admin_";

/// Admin topic for a cluster.
pub fn admin_topic_name(cluster: &str) -> String {
    format!("{}{}", ADMIN_TOPIC_PREFIX, cluster)
}

/// Work topic carrying the data of one store version.
pub fn work_topic_name(store: &str, version: u32) -> String {
    format!("{}{}{}", store, VERSION_SEPARATOR, version)
}

/// Companion topic for the stream-reprocessing flavor of a push.
pub fn reprocessing_topic_name(store: &str, version: u32) -> String {
    format!("{}{}", work_topic_name(store, version), REPROCESSING_SUFFIX)
}

pub fn is_reprocessing_topic(topic: &str) -> bool {
    topic.ends_with(REPROCESSING_SUFFIX)
}

fn strip_reprocessing(topic: &str) -> &str {
    topic.strip_suffix(REPROCESSING_SUFFIX).unwrap_or(topic)
}

/// Store name encoded in a work topic, if the topic parses as one.
pub fn parse_store_name(topic: &str) -> Option<&str> {
    let base = strip_reprocessing(topic);
    let idx = base.rfind(VERSION_SEPARATOR)?;
    let (store, rest) = base.split_at(idx);
    let digits = &rest[VERSION_SEPARATOR.len()..];
    if store.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(store)
}

/// Version number encoded in a work topic, if the topic parses as one.
pub fn parse_version(topic: &str) -> Option<u32> {
    let base = strip_reprocessing(topic);
    let idx = base.rfind(VERSION_SEPARATOR)?;
    let digits = &base[idx + VERSION_SEPARATOR.len()..];
    if idx == 0 || digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// True if the topic is a work topic (plain or reprocessing) of the store.
pub fn belongs_to_store(topic: &str, store: &str) -> bool {
    parse_store_name(topic) == Some(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let topic = work_topic_name("user_profiles", 12);
        assert_eq!(topic, "user_profiles_v12");
        assert_eq!(parse_store_name(&topic), Some("user_profiles"));
        assert_eq!(parse_version(&topic), Some(12));
        assert!(!is_reprocessing_topic(&topic));
    }

    #[test]
    fn test_store_name_containing_version_marker() {
        // "_v" inside the store name must not confuse the parser.
        let topic = work_topic_name("events_v2_backup", 3);
        assert_eq!(parse_store_name(&topic), Some("events_v2_backup"));
        assert_eq!(parse_version(&topic), Some(3));
    }

    #[test]
    fn test_reprocessing_topic() {
        let topic = reprocessing_topic_name("s", 4);
        assert_eq!(topic, "s_v4_sr");
        assert!(is_reprocessing_topic(&topic));
        assert_eq!(parse_store_name(&topic), Some("s"));
        assert_eq!(parse_version(&topic), Some(4));
    }

    #[test]
    fn test_non_work_topics_do_not_parse() {
        assert_eq!(parse_store_name("admin_cluster-0"), None);
        assert_eq!(parse_store_name("plain"), None);
        assert_eq!(parse_store_name("s_vabc"), None);
        assert_eq!(parse_version("_v3"), None);
    }

    #[test]
    fn test_belongs_to_store() {
        assert!(belongs_to_store("s_v1", "s"));
        assert!(belongs_to_store("s_v1_sr", "s"));
        assert!(!belongs_to_store("other_v1", "s"));
    }
}
