mod common;

use common::*;
use news_aggregator::{AggregatorError, FeedParser, Result};

const RNZ_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>RNZ - New Zealand</title>
    <link>https://www.rnz.co.nz/news/national</link>
    <description>National news</description>
    <item>
      <title>  Budget passes third reading  </title>
      <link>https://www.rnz.co.nz/news/political/1</link>
      <description>The Budget has passed its final vote.</description>
      <pubDate>Mon, 01 Jan 2024 09:30:00 +1300</pubDate>
    </item>
    <item>
      <title>Item without a link</title>
      <description>Should be skipped.</description>
      <pubDate>Mon, 01 Jan 2024 10:00:00 +1300</pubDate>
    </item>
    <item>
      <title>Budget passes third reading (updated)</title>
      <link>https://www.rnz.co.nz/news/political/1</link>
      <pubDate>Mon, 01 Jan 2024 11:00:00 +1300</pubDate>
    </item>
    <item>
      <link>https://www.rnz.co.nz/news/national/2</link>
      <description>   </description>
    </item>
  </channel>
</rss>"#;

const ATOM_SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Atom</title>
  <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
  <updated>2024-02-01T12:00:00Z</updated>
  <entry>
    <title>Atom entry</title>
    <link href="https://atom.example/entries/1"/>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <updated>2024-02-01T12:00:00Z</updated>
    <content type="text">Full body of the entry.</content>
  </entry>
</feed>"#;

#[test]
fn test_rss_entries_are_normalized() -> Result<()> {
    init_tracing();
    let fetched_at = ts("2024-01-02T00:00:00Z");

    let parsed = FeedParser::parse_feed(RNZ_SAMPLE, fetched_at)?;
    assert_eq!(parsed.title.as_deref(), Some("RNZ - New Zealand"));
    assert_eq!(parsed.entries.len(), 2);
    assert_eq!(parsed.skipped, 2);

    let budget = &parsed.entries[0];
    assert_eq!(budget.url, "https://www.rnz.co.nz/news/political/1");
    assert_eq!(budget.headline, "Budget passes third reading");
    assert_eq!(budget.published_at, ts("2023-12-31T20:30:00Z"));
    assert!(budget.dated);
    assert_eq!(
        budget.summary_content.as_deref(),
        Some("The Budget has passed its final vote.")
    );

    let undated = &parsed.entries[1];
    assert_eq!(undated.url, "https://www.rnz.co.nz/news/national/2");
    assert_eq!(undated.headline, "Untitled");
    assert_eq!(undated.published_at, fetched_at);
    assert!(!undated.dated);
    assert_eq!(undated.summary_content, None);
    Ok(())
}

#[test]
fn test_atom_falls_back_to_updated_and_content() -> Result<()> {
    init_tracing();

    let parsed = FeedParser::parse_feed(ATOM_SAMPLE, ts("2024-03-01T00:00:00Z"))?;
    assert_eq!(parsed.entries.len(), 1);

    let entry = &parsed.entries[0];
    assert_eq!(entry.url, "https://atom.example/entries/1");
    assert_eq!(entry.published_at, ts("2024-02-01T12:00:00Z"));
    assert!(entry.dated);
    assert_eq!(entry.summary_content.as_deref(), Some("Full body of the entry."));
    Ok(())
}

#[test]
fn test_garbage_is_a_parse_error() {
    init_tracing();

    let err = FeedParser::parse_feed("this is not a feed", ts("2024-01-01T00:00:00Z")).unwrap_err();
    assert!(matches!(err, AggregatorError::Parse(_)));
}
