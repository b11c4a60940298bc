//! Text format shared by the broker and the clients: a delivered message and
//! the pingback acknowledging it are both `"<messageId>:<payload>"`.

/// Body returned to either side when its deadline elapses first.
pub const TIMEOUT_BODY: &str = "TIMEOUT";

pub fn format_delivery(message_id: u64, payload: &str) -> String {
    format!("{message_id}:{payload}")
}

/// Splits on the first colon only, so payloads may themselves contain colons.
pub fn parse_delivery(body: &str) -> Option<(u64, &str)> {
    let (id, payload) = body.split_once(':')?;
    let message_id = id.parse().ok()?;
    Some((message_id, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let body = format_delivery(7, "hello");
        assert_eq!(body, "7:hello");
        assert_eq!(parse_delivery(&body), Some((7, "hello")));
    }

    #[test]
    fn test_payload_may_contain_colons() {
        assert_eq!(parse_delivery("3:a:b:c"), Some((3, "a:b:c")));
    }

    #[test]
    fn test_malformed_bodies() {
        assert_eq!(parse_delivery("TIMEOUT"), None);
        assert_eq!(parse_delivery("abc:payload"), None);
        assert_eq!(parse_delivery(""), None);
    }
}
