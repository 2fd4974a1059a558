use serde::{Deserialize, Serialize};

// Podcasting 2.0 feed guid (podcast:guid), a uuid v5 in practice
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedGuid(pub String);

impl FeedGuid {
    pub fn new(s: &str) -> Self { Self(s.trim().to_string()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

// Episode guid as published in the feed's <guid>
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemGuid(pub String);

impl ItemGuid {
    pub fn new(s: &str) -> Self { Self(s.trim().to_string()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

/// A <podcast:remoteItem> reference to a track hosted in another feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteItem {
    pub feed_guid: FeedGuid,
    pub item_guid: Option<ItemGuid>,
    pub feed_url: Option<String>,
    pub medium: Option<String>
}

impl RemoteItem {
    pub fn new(feed_guid: &str, item_guid: Option<&str>) -> Self {
        Self {
            feed_guid: FeedGuid::new(feed_guid),
            item_guid: item_guid
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ItemGuid::new),
            feed_url: None,
            medium: None
        }
    }

    /// De-duplication key. Feed-only references (publisher / playlist of
    /// feeds) key on the feed guid alone.
    pub fn key(&self) -> String {
        match &self.item_guid {
            Some(item) => format!("{}:{}", self.feed_guid.as_str(), item.as_str()),
            None => self.feed_guid.as_str().to_string()
        }
    }
}
