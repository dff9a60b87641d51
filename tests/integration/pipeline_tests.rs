//! End-to-end pipeline tests
//!
//! These tests use wiremock to mock paginated/cursor-based APIs and drive
//! the full extract → transform → transfer cycle against temporary
//! databases.

use serde_json::json;
use std::collections::BTreeMap;
use tempfile::TempDir;
use tributary::config::{
    CursorLocation, DependencySpec, EntitySpec, MaxValueSpec, PaginationSpec, RequestTemplate,
    ResponseFormat, SourceConfig, StrategyKind,
};
use tributary::state::{FileStateStore, StateStore};
use tributary::storage::{StagingDb, StagingSink};
use tributary::{run_extraction, run_normalization, run_transfer, TributaryError};
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn source_config(host: &str, entities: Vec<EntitySpec>) -> SourceConfig {
    SourceConfig {
        id: "src".to_string(),
        host: host.to_string(),
        headers: BTreeMap::new(),
        rate_limit: 1000,
        cache_dir: None,
        debug: false,
        entities,
    }
}

fn request(url: &str) -> RequestTemplate {
    RequestTemplate {
        method: "GET".to_string(),
        url: url.to_string(),
        params: BTreeMap::new(),
        body: BTreeMap::new(),
    }
}

fn entity(name: &str, strategy: StrategyKind, url: &str) -> EntitySpec {
    EntitySpec {
        name: name.to_string(),
        strategy,
        format: ResponseFormat::Json,
        request: request(url),
        key: None,
        pagination: None,
        slice: None,
        dependencies: vec![],
        max_value: None,
        dedup_keys: vec![],
    }
}

fn query_pagination(start: i64, step: i64) -> PaginationSpec {
    PaginationSpec {
        location: CursorLocation::Query,
        param: Some("cursor".to_string()),
        start: Some(json!(start)),
        ref_fn: None,
        ref_path: None,
        step: Some(step),
        stop: None,
    }
}

#[tokio::test]
async fn test_listing_pipeline_end_to_end() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/articles"))
        .and(query_param("cursor", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "collection": [
                {"doi": "10.1/a", "version": 1, "title": "first"},
                {"doi": "10.1/b", "version": 1, "title": "second"},
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/articles"))
        .and(query_param("cursor", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "collection": [{"doi": "10.1/c", "version": 1, "title": "third"}]
        })))
        .mount(&server)
        .await;

    // The empty page ends pagination, after the zero-result retries
    Mock::given(method("GET"))
        .and(path("/articles"))
        .and(query_param("cursor", "200"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"collection": []})))
        .mount(&server)
        .await;

    let mut spec = entity("articles", StrategyKind::Listing, "/articles");
    spec.key = Some("collection".to_string());
    spec.pagination = Some(query_pagination(0, 100));
    spec.dedup_keys = vec!["doi".to_string(), "version".to_string()];
    let config = source_config(&server.uri(), vec![spec]);

    let tmp = TempDir::new().unwrap();
    let staging_path = tmp.path().join("staging.db");
    let mut staging = StagingDb::open(&staging_path).unwrap();
    let mut state = FileStateStore::new(&tmp.path().join("state")).unwrap();

    {
        let mut sink = StagingSink::new(&mut staging, &config);
        run_extraction(&config, &mut state, &mut sink).await.unwrap();
    }

    // Three articles staged, cursor advanced by step per successful page
    assert_eq!(staging.staged_count("src", "articles").unwrap(), 3);
    let saved = state.load("src.articles").unwrap();
    assert_eq!(saved.get("cursor"), Some(&json!(200)));

    // Re-running extraction ingests identical data without growing staging
    {
        let mut sink = StagingSink::new(&mut staging, &config);
        run_extraction(&config, &mut state, &mut sink).await.unwrap();
    }
    assert_eq!(staging.staged_count("src", "articles").unwrap(), 3);

    // Normalize into a typed table
    run_normalization(&mut staging, &config).unwrap();
    drop(staging);

    let conn = rusqlite::Connection::open(&staging_path).unwrap();
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM \"_raw_src_articles\"", [], |r| r.get(0))
        .unwrap();
    assert_eq!(rows, 3);
    let title: String = conn
        .query_row(
            "SELECT \"title\" FROM \"_raw_src_articles\" WHERE \"doi\" = '10.1/c'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(title, "third");
    drop(conn);

    // Transfer to a sqlite destination
    let dest_path = tmp.path().join("dest.db");
    let staging_uri = staging_path.to_string_lossy().into_owned();
    let dest_uri = dest_path.to_string_lossy().into_owned();
    run_transfer(&staging_uri, &dest_uri).unwrap();

    let dest = rusqlite::Connection::open(&dest_path).unwrap();
    let rows: i64 = dest
        .query_row("SELECT COUNT(*) FROM \"_raw_src_articles\"", [], |r| r.get(0))
        .unwrap();
    assert_eq!(rows, 3);

    // The ledger now covers all three hashes
    let staging = StagingDb::open(&staging_path).unwrap();
    assert_eq!(
        staging.ledger_hashes(&dest_uri, "_raw_src_articles").unwrap().len(),
        3
    );
}

#[tokio::test]
async fn test_dependency_chaining_binds_upstream_field() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"id": 7, "name": "ada"}]
        })))
        .mount(&server)
        .await;

    // The dependent fetch must hit /users/7
    Mock::given(method("GET"))
        .and(path("/users/7"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"login": "ada", "karma": 42})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut users = entity("users", StrategyKind::List, "/users");
    users.key = Some("results".to_string());
    users.dedup_keys = vec!["id".to_string()];

    let mut details = entity("user_details", StrategyKind::DirectFetch, "/users/{user_id}");
    details.dependencies = vec![DependencySpec {
        entity: "users".to_string(),
        field: "id".to_string(),
        param: "user_id".to_string(),
    }];

    let config = source_config(&server.uri(), vec![users, details]);

    let tmp = TempDir::new().unwrap();
    let mut staging = StagingDb::open(&tmp.path().join("staging.db")).unwrap();
    let mut state = FileStateStore::new(&tmp.path().join("state")).unwrap();

    {
        let mut sink = StagingSink::new(&mut staging, &config);
        run_extraction(&config, &mut state, &mut sink).await.unwrap();
    }

    assert_eq!(staging.staged_count("src", "users").unwrap(), 1);
    assert_eq!(staging.staged_count("src", "user_details").unwrap(), 1);

    // The bound parameter is merged into the emitted item
    let batch = staging.unprocessed_batch("src", "user_details", 10).unwrap();
    assert_eq!(batch[0].data["user_id"], json!(7));
    assert_eq!(batch[0].data["login"], json!("ada"));
}

#[tokio::test]
async fn test_looping_aborts_at_iteration_cap() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/maxitem.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("5000"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/item/\d+\.json$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"type": "story"})))
        .mount(&server)
        .await;

    let mut items = entity("items", StrategyKind::Looping, "/item/{value}.json");
    items.max_value = Some(MaxValueSpec {
        url: "/maxitem.json".to_string(),
        path: None,
    });
    let config = source_config(&server.uri(), vec![items]);

    let tmp = TempDir::new().unwrap();
    let mut staging = StagingDb::open(&tmp.path().join("staging.db")).unwrap();
    let mut state = FileStateStore::new(&tmp.path().join("state")).unwrap();

    let err = {
        let mut sink = StagingSink::new(&mut staging, &config);
        run_extraction(&config, &mut state, &mut sink)
            .await
            .unwrap_err()
    };

    assert!(matches!(
        err,
        TributaryError::IterationCap { limit: 1000, .. }
    ));
}

#[tokio::test]
async fn test_looping_debug_mode_truncates() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/maxitem.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("5000"))
        .mount(&server)
        .await;

    // Debug mode walks 5000, 4999, 4998 and stops; payloads are distinct so
    // each one stages its own row
    for id in [5000, 4999, 4998] {
        Mock::given(method("GET"))
            .and(path(format!("/item/{}.json", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": id})))
            .expect(1)
            .mount(&server)
            .await;
    }

    let mut items = entity("items", StrategyKind::Looping, "/item/{value}.json");
    items.max_value = Some(MaxValueSpec {
        url: "/maxitem.json".to_string(),
        path: None,
    });
    let mut config = source_config(&server.uri(), vec![items]);
    config.debug = true;

    let tmp = TempDir::new().unwrap();
    let mut staging = StagingDb::open(&tmp.path().join("staging.db")).unwrap();
    let mut state = FileStateStore::new(&tmp.path().join("state")).unwrap();

    {
        let mut sink = StagingSink::new(&mut staging, &config);
        run_extraction(&config, &mut state, &mut sink).await.unwrap();
    }

    assert_eq!(staging.staged_count("src", "items").unwrap(), 3);
}

#[tokio::test]
async fn test_atom_feed_listing() {
    let server = MockServer::start().await;

    let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>arxiv query</title>
  <entry>
    <id>http://arxiv.org/abs/1001.0001</id>
    <title>Paper one</title>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/1001.0002</id>
    <title>Paper two</title>
  </entry>
</feed>"#;

    Mock::given(method("GET"))
        .and(path("/query"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(atom)
                .insert_header("content-type", "application/atom+xml"),
        )
        .mount(&server)
        .await;

    let mut papers = entity("papers", StrategyKind::List, "/query");
    papers.format = ResponseFormat::Atom;
    papers.key = Some("feed.entry".to_string());
    papers.dedup_keys = vec!["id".to_string()];
    let config = source_config(&server.uri(), vec![papers]);

    let tmp = TempDir::new().unwrap();
    let mut staging = StagingDb::open(&tmp.path().join("staging.db")).unwrap();
    let mut state = FileStateStore::new(&tmp.path().join("state")).unwrap();

    {
        let mut sink = StagingSink::new(&mut staging, &config);
        run_extraction(&config, &mut state, &mut sink).await.unwrap();
    }

    assert_eq!(staging.staged_count("src", "papers").unwrap(), 2);
    let batch = staging.unprocessed_batch("src", "papers", 10).unwrap();
    let titles: Vec<&str> = batch
        .iter()
        .map(|r| r.data["title"].as_str().unwrap())
        .collect();
    assert!(titles.contains(&"Paper one"));
    assert!(titles.contains(&"Paper two"));
}

#[tokio::test]
async fn test_slicing_formats_date_bounds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .and(query_param("from", "2020-01-01"))
        .and(query_param("to", "2020-12-31"))
        .and(query_param("cursor", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "events": [{"id": 1, "at": "2020-03-01"}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .and(query_param("cursor", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"events": []})))
        .mount(&server)
        .await;

    let mut spec = entity("events", StrategyKind::Slicing, "/events");
    spec.key = Some("events".to_string());
    spec.pagination = Some(query_pagination(0, 100));
    spec.slice = Some(tributary::config::SliceSpec {
        date_format: "%Y-%m-%d".to_string(),
        from: chrono::NaiveDate::from_ymd_opt(2020, 1, 1),
        to: chrono::NaiveDate::from_ymd_opt(2020, 12, 31),
    });
    spec.request.params = [
        ("from".to_string(), "{from_date}".to_string()),
        ("to".to_string(), "{to_date}".to_string()),
    ]
    .into();
    spec.dedup_keys = vec!["id".to_string()];
    let config = source_config(&server.uri(), vec![spec]);

    let tmp = TempDir::new().unwrap();
    let mut staging = StagingDb::open(&tmp.path().join("staging.db")).unwrap();
    let mut state = FileStateStore::new(&tmp.path().join("state")).unwrap();

    {
        let mut sink = StagingSink::new(&mut staging, &config);
        run_extraction(&config, &mut state, &mut sink).await.unwrap();
    }

    assert_eq!(staging.staged_count("src", "events").unwrap(), 1);
}

#[tokio::test]
async fn test_listing_resumes_from_persisted_cursor() {
    let server = MockServer::start().await;

    // Only the resumed page is served; the first page must not be requested
    Mock::given(method("GET"))
        .and(path("/articles"))
        .and(query_param("cursor", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"collection": []})))
        .mount(&server)
        .await;

    let mut spec = entity("articles", StrategyKind::Listing, "/articles");
    spec.key = Some("collection".to_string());
    spec.pagination = Some(query_pagination(0, 100));
    let config = source_config(&server.uri(), vec![spec]);

    let tmp = TempDir::new().unwrap();
    let mut staging = StagingDb::open(&tmp.path().join("staging.db")).unwrap();
    let mut state = FileStateStore::new(&tmp.path().join("state")).unwrap();

    let mut saved = serde_json::Map::new();
    saved.insert("cursor".to_string(), json!(100));
    state.save("src.articles", &saved).unwrap();

    {
        let mut sink = StagingSink::new(&mut staging, &config);
        run_extraction(&config, &mut state, &mut sink).await.unwrap();
    }

    assert_eq!(staging.staged_count("src", "articles").unwrap(), 0);
}
