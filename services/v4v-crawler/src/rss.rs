//!
//! src/rss.rs  Oct 15th, 2026
//!
//! Streaming RSS parser for Podcasting 2.0 music feeds. Pulls the channel
//! and item fields the catalog needs, value-for-value blocks, and every
//! podcast:remoteItem reference, skipping everything else
//!

use quick_xml::events::{BytesStart, Event};
use quick_xml::events::attributes::Attribute;
use quick_xml::Reader;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::CrawlerError;
use crate::types::RemoteItem;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enclosure {
    pub url: String,
    pub mime_type: Option<String>,
    pub length: Option<u64>
}

/// Strings that may arrive as null or as a number
pub fn de_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new()
    })
}

/// split="95" is an attribute in the feed, so stored copies carry either form
fn de_split<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let v = match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None
    };
    Ok(v.filter(|f| f.is_finite() && *f >= 0.0)
        .map(|f| f.min(u32::MAX as f64) as u32)
        .unwrap_or(0))
}

fn de_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValueRecipient {
    pub name: Option<String>,
    pub kind: Option<String>,
    #[serde(deserialize_with = "de_string")]
    pub address: String,
    #[serde(deserialize_with = "de_split")]
    pub split: u32,
    #[serde(deserialize_with = "de_flag")]
    pub fee: bool,
    pub custom_key: Option<String>,
    pub custom_value: Option<String>
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValueBlock {
    pub kind: Option<String>,
    pub method: Option<String>,
    pub suggested: Option<String>,
    pub recipients: Vec<ValueRecipient>
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedItem {
    pub title: Option<String>,
    pub guid: Option<String>,
    pub enclosure: Option<Enclosure>,
    pub image: Option<String>,
    pub duration: Option<u64>,
    pub pub_date: Option<String>,
    pub description: Option<String>,
    pub explicit: bool,
    pub episode: Option<u32>,
    pub value: Option<ValueBlock>,
    #[serde(default)]
    pub remote_items: Vec<RemoteItem>
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub image: Option<String>,
    pub guid: Option<String>,
    pub medium: Option<String>,
    pub language: Option<String>,
    pub value: Option<ValueBlock>,
    #[serde(default)]
    pub remote_items: Vec<RemoteItem>,
    #[serde(default)]
    pub items: Vec<ParsedItem>
}

impl ParsedFeed {
    /// Linear guid match: exact first, then trimmed and case-insensitive
    pub fn find_item(&self, guid: &str) -> Option<&ParsedItem> {
        let exact = self.items.iter()
            .find(|i| i.guid.as_deref() == Some(guid));
        if exact.is_some() {
            return exact;
        }
        let wanted = guid.trim();
        self.items.iter().find(|i| {
            i.guid.as_deref()
                .map(|g| g.trim().eq_ignore_ascii_case(wanted))
                .unwrap_or(false)
        })
    }

    /// Every remote reference in the document, channel level first
    pub fn all_remote_items(&self) -> impl Iterator<Item = &RemoteItem> {
        self.remote_items.iter()
            .chain(self.items.iter().flat_map(|i| i.remote_items.iter()))
    }
}

/// Parses itunes:duration style values into whole seconds.
/// Accepts SS, MM:SS, HH:MM:SS; fractional seconds are truncated
pub fn parse_duration(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || s.starts_with('-') {
        return None;
    }
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() > 3 || parts.iter().any(|p| p.trim().is_empty()) {
        return None;
    }

    let (last, leading) = parts.split_last()?;
    let seconds = last.trim().parse::<f64>().ok()
        .filter(|v| v.is_finite() && *v >= 0.0)?;
    if !leading.is_empty() && seconds >= 60.0 {
        return None;
    }
    let seconds = clamp_seconds(seconds)?;

    let mut total: u64 = 0;
    for part in leading {
        let v = part.trim().parse::<u64>().ok()?;
        total = total.checked_mul(60)?.checked_add(v)?;
    }
    if !leading.is_empty() {
        total = total.checked_mul(60)?;
    }
    total.checked_add(seconds).filter(|t| *t <= MAX_DURATION_SECS)
}

/// Upper bound on a believable track length, about 136 years
pub const MAX_DURATION_SECS: u64 = u32::MAX as u64;

/// Whole seconds of a non-negative float, None past MAX_DURATION_SECS
pub fn clamp_seconds(v: f64) -> Option<u64> {
    if !v.is_finite() || v < 0.0 || v > MAX_DURATION_SECS as f64 {
        return None;
    }
    Some(v.trunc() as u64)
}

/// Text content of an html fragment, whitespace collapsed
pub fn strip_html(s: &str) -> String {
    if !s.contains('<') {
        return collapse_ws(s);
    }
    let fragment = scraper::Html::parse_fragment(s);
    let text: String = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    collapse_ws(&text)
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn attr_value(attr: &Attribute<'_>) -> String {
    // feeds routinely carry bare '&' in urls, keep the raw bytes then
    match attr.unescape_value() {
        Ok(v) => v.trim().to_string(),
        Err(_) => String::from_utf8_lossy(&attr.value).trim().to_string()
    }
}

fn attrs(e: &BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .map(|a| (String::from_utf8_lossy(a.key.as_ref()).to_string(), attr_value(&a)))
        .collect()
}

fn get<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

#[derive(Default)]
struct FeedParser {
    feed: ParsedFeed,
    stack: Vec<String>,
    text: String,
    item: Option<ParsedItem>,
    value: Option<ValueBlock>,
    channel_image_url: Option<String>,
    saw_channel: bool
}

impl FeedParser {
    fn open(&mut self, name: &str, e: &BytesStart<'_>) {
        match name {
            "channel" => self.saw_channel = true,
            "item" => self.item = Some(ParsedItem::default()),
            _ => {}
        }
        self.element_attrs(name, e);
    }

    /// Handles the attribute carrying elements, both <x/> and <x></x> forms
    fn element_attrs(&mut self, name: &str, e: &BytesStart<'_>) {
        match name {
            "enclosure" => {
                let a = attrs(e);
                if let (Some(item), Some(url)) = (self.item.as_mut(), get(&a, "url")) {
                    item.enclosure = Some(Enclosure {
                        url: url.to_string(),
                        mime_type: get(&a, "type").map(str::to_string),
                        length: get(&a, "length").and_then(|l| l.parse().ok())
                    });
                }
            }
            "itunes:image" => {
                let a = attrs(e);
                if let Some(href) = get(&a, "href") {
                    match self.item.as_mut() {
                        Some(item) => { item.image.get_or_insert_with(|| href.to_string()); }
                        None => { self.feed.image.get_or_insert_with(|| href.to_string()); }
                    }
                }
            }
            "podcast:remoteItem" => {
                let a = attrs(e);
                if let Some(feed_guid) = get(&a, "feedGuid") {
                    let mut remote = RemoteItem::new(feed_guid, get(&a, "itemGuid"));
                    remote.feed_url = get(&a, "feedUrl").map(str::to_string);
                    remote.medium = get(&a, "medium").map(str::to_string);
                    match self.item.as_mut() {
                        Some(item) => item.remote_items.push(remote),
                        None => self.feed.remote_items.push(remote)
                    }
                }
            }
            "podcast:value" => {
                let a = attrs(e);
                self.value = Some(ValueBlock {
                    kind: get(&a, "type").map(str::to_string),
                    method: get(&a, "method").map(str::to_string),
                    suggested: get(&a, "suggested").map(str::to_string),
                    recipients: Vec::new()
                });
            }
            "podcast:valueRecipient" => {
                let a = attrs(e);
                if let (Some(value), Some(address)) = (self.value.as_mut(), get(&a, "address")) {
                    value.recipients.push(ValueRecipient {
                        name: get(&a, "name").map(str::to_string),
                        kind: get(&a, "type").map(str::to_string),
                        address: address.to_string(),
                        split: get(&a, "split").and_then(|s| s.parse().ok()).unwrap_or(0),
                        fee: get(&a, "fee").map(|f| f.eq_ignore_ascii_case("true")).unwrap_or(false),
                        custom_key: get(&a, "customKey").map(str::to_string),
                        custom_value: get(&a, "customValue").map(str::to_string)
                    });
                }
            }
            _ => {}
        }
    }

    fn close(&mut self, name: &str) {
        let text = std::mem::take(&mut self.text).trim().to_string();
        let parent = self.stack.len().checked_sub(2)
            .and_then(|i| self.stack.get(i))
            .map(String::as_str)
            .unwrap_or("");

        match (parent, name) {
            (_, "item") => {
                if let Some(item) = self.item.take() {
                    self.feed.items.push(item);
                }
            }
            (_, "podcast:value") => {
                let value = self.value.take();
                match self.item.as_mut() {
                    Some(item) => item.value = value,
                    None => self.feed.value = value
                }
            }
            ("item", _) => {
                let Some(item) = self.item.as_mut() else { return };
                match name {
                    "title" => item.title = non_empty(text),
                    "guid" => item.guid = non_empty(text),
                    "itunes:duration" => item.duration = parse_duration(&text),
                    "pubDate" => item.pub_date = non_empty(text),
                    "description" => item.description = non_empty(strip_html(&text)),
                    "content:encoded" if item.description.is_none() =>
                        item.description = non_empty(strip_html(&text)),
                    "itunes:summary" if item.description.is_none() =>
                        item.description = non_empty(strip_html(&text)),
                    "itunes:explicit" => item.explicit = matches!(
                        text.to_ascii_lowercase().as_str(), "yes" | "true" | "explicit"),
                    "itunes:episode" => item.episode = text.parse().ok(),
                    _ => {}
                }
            }
            ("channel", _) => {
                let feed = &mut self.feed;
                match name {
                    "title" => feed.title = non_empty(text),
                    "description" => feed.description = non_empty(strip_html(&text)),
                    "link" => feed.link = non_empty(text),
                    "language" => feed.language = non_empty(text),
                    "itunes:author" => feed.author = non_empty(text),
                    "podcast:guid" => feed.guid = non_empty(text),
                    "podcast:medium" => feed.medium = non_empty(text.to_ascii_lowercase()),
                    _ => {}
                }
            }
            ("image", "url") if self.item.is_none() => {
                self.channel_image_url = non_empty(text);
            }
            _ => {}
        }
    }

    fn finish(mut self) -> Result<ParsedFeed, CrawlerError> {
        if !self.saw_channel {
            return Err(CrawlerError::Parse("document has no <channel>".to_string()));
        }
        if self.feed.image.is_none() {
            self.feed.image = self.channel_image_url.take();
        }
        Ok(self.feed)
    }
}

/// Parses a complete feed document
pub fn parse_feed(xml: &str) -> Result<ParsedFeed, CrawlerError> {
    let mut reader = Reader::from_str(xml);
    let mut parser = FeedParser::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                parser.text.clear();
                parser.stack.push(name.clone());
                parser.open(&name, &e);
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                parser.element_attrs(&name, &e);
                if name == "podcast:value" {
                    parser.stack.push(name.clone());
                    parser.close(&name);
                    parser.stack.pop();
                }
            }
            Event::Text(e) => {
                match e.unescape() {
                    Ok(t) => parser.text.push_str(&t),
                    Err(_) => parser.text.push_str(&String::from_utf8_lossy(&e)),
                }
            }
            Event::CData(e) => {
                parser.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                parser.close(&name);
                parser.stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }
    parser.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALBUM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd"
     xmlns:podcast="https://podcastindex.org/namespace/1.0">
  <channel>
    <title>Stay Awhile</title>
    <description><![CDATA[<p>An album by <b>Able Kirby</b></p>]]></description>
    <link>https://example.com/stay-awhile</link>
    <itunes:author>Able Kirby</itunes:author>
    <podcast:guid>6dfdf7a3-4b0f-5b4e-8d4d-ffab36f31dd5</podcast:guid>
    <podcast:medium>Music</podcast:medium>
    <image>
      <url>https://example.com/fallback.jpg</url>
      <title>Not the channel title</title>
    </image>
    <itunes:image href="https://example.com/cover.jpg"/>
    <podcast:value type="lightning" method="keysend" suggested="0.00000005000">
      <podcast:valueRecipient name="Able Kirby" type="node" address="03ae9f91a0cb8ff43840e3c322c4c61f019d8c1c3cea15a25cfc425ac605e61a4a" split="95"/>
      <podcast:valueRecipient name="Host" type="node" address="02abc" split="5" fee="true"/>
    </podcast:value>
    <item>
      <title>Track One &amp; Only</title>
      <guid isPermaLink="false">  a1b2c3  </guid>
      <enclosure url="https://cdn.example.com/1.mp3?a=1&b=2" type="audio/mpeg" length="123456"/>
      <itunes:duration>03:25</itunes:duration>
      <itunes:image href="https://example.com/track1.jpg"/>
      <pubDate>Tue, 01 Aug 2023 12:00:00 GMT</pubDate>
      <itunes:explicit>no</itunes:explicit>
    </item>
    <item>
      <title><![CDATA[Track Two]]></title>
      <guid>D4E5F6</guid>
      <enclosure url="https://cdn.example.com/2.mp3" type="audio/mpeg"></enclosure>
      <itunes:duration>1:02:03</itunes:duration>
      <podcast:value type="lightning" method="keysend">
        <podcast:valueRecipient name="Guest" type="node" address="02def" split="50"/>
      </podcast:value>
    </item>
  </channel>
</rss>"#;

    const PLAYLIST: &str = r#"<rss xmlns:podcast="https://podcastindex.org/namespace/1.0">
  <channel>
    <title>Mix Tape</title>
    <podcast:medium>musicL</podcast:medium>
    <podcast:remoteItem feedGuid="feed-a" itemGuid="item-a"/>
    <podcast:remoteItem feedGuid="feed-b" itemGuid="item-b" feedUrl="https://b.example/feed.xml"/>
    <podcast:remoteItem feedGuid="publisher-only" medium="publisher"/>
    <item>
      <title>Episode with a song</title>
      <podcast:remoteItem feedGuid="feed-c" itemGuid="item-c"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn channel_fields() {
        let feed = parse_feed(ALBUM).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Stay Awhile"));
        assert_eq!(feed.description.as_deref(), Some("An album by Able Kirby"));
        assert_eq!(feed.author.as_deref(), Some("Able Kirby"));
        assert_eq!(feed.guid.as_deref(), Some("6dfdf7a3-4b0f-5b4e-8d4d-ffab36f31dd5"));
        assert_eq!(feed.medium.as_deref(), Some("music"));
        // itunes:image wins over <image><url>
        assert_eq!(feed.image.as_deref(), Some("https://example.com/cover.jpg"));
    }

    #[test]
    fn items_and_enclosures() {
        let feed = parse_feed(ALBUM).unwrap();
        assert_eq!(feed.items.len(), 2);

        let one = &feed.items[0];
        assert_eq!(one.title.as_deref(), Some("Track One & Only"));
        assert_eq!(one.guid.as_deref(), Some("a1b2c3"));
        assert_eq!(one.duration, Some(205));
        assert_eq!(one.image.as_deref(), Some("https://example.com/track1.jpg"));
        assert!(!one.explicit);
        let enc = one.enclosure.as_ref().unwrap();
        assert_eq!(enc.url, "https://cdn.example.com/1.mp3?a=1&b=2");
        assert_eq!(enc.length, Some(123456));

        let two = &feed.items[1];
        assert_eq!(two.title.as_deref(), Some("Track Two"));
        assert_eq!(two.duration, Some(3723));
        assert_eq!(two.enclosure.as_ref().unwrap().url, "https://cdn.example.com/2.mp3");
    }

    #[test]
    fn value_blocks_attach_to_their_scope() {
        let feed = parse_feed(ALBUM).unwrap();
        let channel = feed.value.as_ref().unwrap();
        assert_eq!(channel.method.as_deref(), Some("keysend"));
        assert_eq!(channel.recipients.len(), 2);
        assert_eq!(channel.recipients[0].split, 95);
        assert!(channel.recipients[1].fee);

        assert!(feed.items[0].value.is_none());
        let item_value = feed.items[1].value.as_ref().unwrap();
        assert_eq!(item_value.recipients[0].name.as_deref(), Some("Guest"));
    }

    #[test]
    fn remote_items_from_channel_and_items() {
        let feed = parse_feed(PLAYLIST).unwrap();
        assert_eq!(feed.remote_items.len(), 3);
        assert_eq!(feed.remote_items[1].feed_url.as_deref(), Some("https://b.example/feed.xml"));
        assert!(feed.remote_items[2].item_guid.is_none());

        let keys: Vec<String> = feed.all_remote_items().map(|r| r.key()).collect();
        assert_eq!(keys, vec!["feed-a:item-a", "feed-b:item-b", "publisher-only", "feed-c:item-c"]);
    }

    #[test]
    fn find_item_falls_back_to_case_insensitive() {
        let feed = parse_feed(ALBUM).unwrap();
        assert_eq!(feed.find_item("a1b2c3").unwrap().title.as_deref(), Some("Track One & Only"));
        assert_eq!(feed.find_item(" d4e5f6 ").unwrap().title.as_deref(), Some("Track Two"));
        assert!(feed.find_item("missing").is_none());
    }

    #[test]
    fn rejects_documents_without_channel() {
        assert!(matches!(
            parse_feed("<html><body>nope</body></html>"),
            Err(CrawlerError::Parse(_))
        ));
        assert!(parse_feed("<rss><channel><title>x</wrong></channel></rss>").is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("45"), Some(45));
        assert_eq!(parse_duration("245.7"), Some(245));
        assert_eq!(parse_duration("03:25"), Some(205));
        assert_eq!(parse_duration("1:02:03"), Some(3723));
        assert_eq!(parse_duration(" 00:00:07 "), Some(7));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("-5"), None);
        assert_eq!(parse_duration("1::3"), None);
        assert_eq!(parse_duration("1:2:3:4"), None);
        assert_eq!(parse_duration("three minutes"), None);
        assert_eq!(parse_duration("1:1e30"), None);
        assert_eq!(parse_duration("1:75"), None);
        assert_eq!(parse_duration("1e30"), None);
        assert_eq!(parse_duration("99999999999999999999:00:00"), None);
        assert_eq!(parse_duration("4294967295"), Some(MAX_DURATION_SECS));
        assert_eq!(parse_duration("4294967296"), None);
    }

    #[test]
    fn absurd_durations_in_feed_are_dropped() {
        let feed = parse_feed(r#"<rss><channel><title>x</title>
            <item><title>a</title><itunes:duration>1:99999999999999999999</itunes:duration></item>
            <item><title>b</title><itunes:duration>1e308</itunes:duration></item>
            </channel></rss>"#).unwrap();
        assert_eq!(feed.items.len(), 2);
        assert!(feed.items.iter().all(|i| i.duration.is_none()));
    }

    #[test]
    fn html_stripping() {
        assert_eq!(strip_html("<p>Hello <i>there</i></p>\n<p>world</p>"), "Hello there world");
        assert_eq!(strip_html("  plain   text "), "plain text");
    }
}
