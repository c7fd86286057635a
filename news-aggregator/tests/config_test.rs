mod common;

use common::init_tracing;
use news_aggregator::config::DEFAULT_CONFIG_PATH;
use news_aggregator::{
    AggregatorError, AppConfig, ArticleStore, FeedSource, FetchConfig, Fetcher, PullFeed, Result, SourceConfig,
    SourceKind,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[test]
fn test_defaults() {
    let config = AppConfig::default();

    assert_eq!(config.database.url, "sqlite://news.db");
    assert_eq!(config.llm.model, "gpt-4o-mini");
    assert_eq!(config.analysis.concurrency, 1);

    let sources = config.effective_sources();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name, "rnz_national");
    assert_eq!(sources[0].kind, SourceKind::Rnz);
}

#[test]
fn test_json_sections_and_env_overrides() -> Result<()> {
    let mut config = AppConfig::from_json(
        r#"{
            "database": { "url": "sqlite://custom.db" },
            "llm": { "model": "gpt-4o", "timeout_seconds": 30 },
            "analysis": { "concurrency": 4 },
            "sources": [
                { "name": "rnz_world", "kind": "rnz" },
                { "name": "stuff", "kind": "rss", "url": "https://stuff.example/rss" }
            ]
        }"#,
    )?;

    assert_eq!(config.database.url, "sqlite://custom.db");
    assert_eq!(config.llm.timeout_seconds, 30);
    assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
    assert_eq!(config.analysis.concurrency, 4);
    assert_eq!(config.fetch.max_retries, FetchConfig::default().max_retries);
    assert_eq!(config.effective_sources().len(), 2);

    let env: HashMap<&str, &str> = [("DATABASE_URL", "sqlite::memory:"), ("LLM_MODEL", "gpt-4.1-mini"), ("OPENAI_API_KEY", "sk-test")]
        .into_iter()
        .collect();
    config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

    assert_eq!(config.database.url, "sqlite::memory:");
    assert_eq!(config.llm.model, "gpt-4.1-mini");
    assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
    Ok(())
}

#[test]
fn test_invalid_configurations_are_rejected() {
    let duplicate = AppConfig::from_json(
        r#"{ "sources": [ { "name": "a", "kind": "rss", "url": "https://a.example/rss" },
                          { "name": "a", "kind": "rnz" } ] }"#,
    )
    .and_then(|config| config.validate());
    assert!(matches!(duplicate, Err(AggregatorError::Config(_))));

    let no_workers = AppConfig::from_json(r#"{ "analysis": { "concurrency": 0 } }"#)
        .and_then(|config| config.validate());
    assert!(matches!(no_workers, Err(AggregatorError::Config(_))));

    let short_claims = AppConfig::from_json(
        r#"{ "llm": { "timeout_seconds": 120 }, "analysis": { "claim_ttl_seconds": 90 } }"#,
    )
    .and_then(|config| config.validate());
    assert!(matches!(short_claims, Err(AggregatorError::Config(_))));

    let equal_claims = AppConfig::from_json(
        r#"{ "llm": { "timeout_seconds": 120 }, "analysis": { "claim_ttl_seconds": 120 } }"#,
    )
    .and_then(|config| config.validate());
    assert!(matches!(equal_claims, Err(AggregatorError::Config(_))));

    let unknown_kind = AppConfig::from_json(r#"{ "sources": [ { "name": "x", "kind": "atom" } ] }"#);
    assert!(matches!(unknown_kind, Err(AggregatorError::Config(_))));
}

#[test]
fn test_missing_file_means_defaults() -> Result<()> {
    init_tracing();
    let config = AppConfig::load(Path::new("definitely/not/here/news-aggregator.json"))?;
    assert_eq!(config.analysis.claim_ttl_seconds, 600);
    assert_eq!(DEFAULT_CONFIG_PATH, "news-aggregator.json");
    Ok(())
}

#[tokio::test]
async fn test_init_writes_a_loadable_config_and_database() -> Result<()> {
    init_tracing();
    let dir = std::env::temp_dir().join(format!("news-aggregator-init-{}", uuid::Uuid::new_v4()));
    let path = dir.join(DEFAULT_CONFIG_PATH);

    let written = AppConfig::init(&path, false)?;
    let names: Vec<&str> = written.sources.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["rnz_national", "rnz_world", "rnz_business", "rnz_political"]);

    let loaded = AppConfig::load(&path)?;
    assert_eq!(loaded.sources.len(), 4);
    assert_eq!(loaded.analysis.claim_ttl_seconds, written.analysis.claim_ttl_seconds);

    let again = AppConfig::init(&path, false);
    assert!(matches!(again, Err(AggregatorError::Config(_))));
    AppConfig::init(&path, true)?;

    let db_path = dir.join("news.db");
    let store = ArticleStore::new(&format!("sqlite://{}", db_path.display())).await?;
    assert_eq!(store.stats().await?.total_articles, 0);
    assert!(db_path.exists());

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[tokio::test]
async fn test_sources_are_built_from_config() -> Result<()> {
    init_tracing();
    let fetcher = Arc::new(Fetcher::new(FetchConfig::default())?);

    let rnz = FeedSource::from_config(&SourceConfig::rnz("business"), fetcher.clone())?;
    assert_eq!(rnz.source_name(), "rnz_business");
    match &rnz {
        FeedSource::Rnz(source) => assert_eq!(source.url(), "https://www.rnz.co.nz/rss/business.xml"),
        FeedSource::Rss(_) => panic!("expected the RNZ variant"),
    }

    let rss = FeedSource::from_config(
        &SourceConfig {
            name: "stuff".to_string(),
            kind: SourceKind::Rss,
            url: Some("https://stuff.example/rss".to_string()),
        },
        fetcher.clone(),
    )?;
    assert!(matches!(rss, FeedSource::Rss(_)));

    let missing_url = FeedSource::from_config(
        &SourceConfig {
            name: "stuff".to_string(),
            kind: SourceKind::Rss,
            url: None,
        },
        fetcher.clone(),
    );
    assert!(matches!(missing_url, Err(AggregatorError::Config(_))));

    let bad_scheme = FeedSource::from_config(
        &SourceConfig {
            name: "ftp".to_string(),
            kind: SourceKind::Rss,
            url: Some("ftp://files.example/feed.xml".to_string()),
        },
        fetcher.clone(),
    );
    assert!(matches!(bad_scheme, Err(AggregatorError::Config(_))));

    let unnamed_rnz = FeedSource::from_config(
        &SourceConfig {
            name: "radio".to_string(),
            kind: SourceKind::Rnz,
            url: None,
        },
        fetcher,
    );
    assert!(matches!(unnamed_rnz, Err(AggregatorError::Config(_))));
    Ok(())
}
