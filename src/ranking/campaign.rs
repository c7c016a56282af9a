//! Campaign tag parsing
//!
//! View events correlate to boosts through tags of the form
//! `urn:boost:<location>:<guid>`. Any other tag belongs to a foreign namespace
//! and never resolves to a boost.

use super::types::BoostTargetLocation;

const BOOST_URN_PREFIX: &str = "urn:boost:";

/// Extract the boost guid from a campaign tag
pub fn boost_guid_from_tag(tag: &str) -> Option<&str> {
    let rest = tag.strip_prefix(BOOST_URN_PREFIX)?;
    let (location, guid) = rest.split_once(':')?;

    BoostTargetLocation::from_str(location)?;

    if guid.is_empty() || guid.contains(':') {
        return None;
    }
    Some(guid)
}

/// Build the campaign tag a delivered boost is tracked under
pub fn campaign_tag(location: BoostTargetLocation, boost_id: &str) -> String {
    format!("{}{}:{}", BOOST_URN_PREFIX, location.as_str(), boost_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_boost_tags() {
        assert_eq!(boost_guid_from_tag("urn:boost:newsfeed:1234"), Some("1234"));
        assert_eq!(boost_guid_from_tag("urn:boost:sidebar:99"), Some("99"));
    }

    #[test]
    fn test_rejects_foreign_and_malformed_tags() {
        assert_eq!(boost_guid_from_tag(""), None);
        assert_eq!(boost_guid_from_tag("urn:activity:1234"), None);
        assert_eq!(boost_guid_from_tag("urn:boost:1234"), None);
        assert_eq!(boost_guid_from_tag("urn:boost:newsfeed:"), None);
        assert_eq!(boost_guid_from_tag("urn:boost:banner:1234"), None);
        assert_eq!(boost_guid_from_tag("urn:boost:newsfeed:12:34"), None);
    }

    #[test]
    fn test_tag_builder_matches_parser() {
        let tag = campaign_tag(BoostTargetLocation::Sidebar, "abc");
        assert_eq!(tag, "urn:boost:sidebar:abc");
        assert_eq!(boost_guid_from_tag(&tag), Some("abc"));
    }
}
