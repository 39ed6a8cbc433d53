//! Integration tests for the crawler
//!
//! These tests use wiremock to serve a small catalog and company pages and
//! run the full crawl cycle end-to-end, including resume from a checkpoint.
//! Pauses are recorded instead of slept.

use kved_crawl::config::{
    Config, CrawlerConfig, IdentityConfig, OutputConfig, OutputFormat, SourceConfig, SourceMode,
};
use kved_crawl::crawler::{
    run_crawl_with, CrawlComponents, CrawlOptions, PlanOutcome, RecordingPacer, ReqwestTransport,
    YouControlCatalog, YouControlDetail,
};
use kved_crawl::storage::{CheckpointStore, JsonCheckpointStore};
use kved_crawl::CrawlPosition;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const SECTIONS: &str = r#"<html><body>
<div class="kved-catalog-table"><table>
  <tr><td class="green-col-word">A</td><td class="caps-col">СІЛЬСЬКЕ ГОСПОДАРСТВО</td></tr>
  <tr><td class="green-col-num">01</td><td>Сільське господарство, мисливство</td></tr>
</table></div>
</body></html>"#;

const CHAPTER: &str = r#"<html><body><table>
  <tr><td class="green-col-word">01.1</td><td class="caps-col">Вирощування однорічних культур</td></tr>
  <tr><td class="green-col-num">01.10</td><td>Вирощування зернових культур</td></tr>
  <tr><td class="green-col-num">01.11</td><td>Вирощування бобових культур</td></tr>
  <tr><td class="green-col-num">01.13</td><td>Вирощування овочів</td></tr>
</table></body></html>"#;

fn company_id(class_code: &str, page: u32, n: u32) -> String {
    format!("3{}{}{:02}", class_code.replace('.', ""), page, n)
}

/// Listing page with two companies and a pagination control
fn listing(class_code: &str, page: u32, pages: u32) -> String {
    let mut html = String::from("<html><body>");
    for n in 0..2 {
        let id = company_id(class_code, page, n);
        html.push_str(&format!(
            r#"<a class="link-details link-open" href="/company/{id}/">{id}, ТОВ "КОМПАНІЯ {n}"</a>"#
        ));
    }
    if pages > 1 {
        html.push_str(r#"<ul class="pagination">"#);
        for p in 1..=pages {
            html.push_str(&format!(r#"<li><a href="?page={p}">{p}</a></li>"#));
        }
        html.push_str("</ul>");
    }
    html.push_str("</body></html>");
    html
}

fn company_page(request: &Request) -> ResponseTemplate {
    let id = request
        .url
        .path()
        .trim_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    ResponseTemplate::new(200).set_body_string(format!(
        r#"<html><body>
        <h2 class="seo-table-name">ТОВ "КОМПАНІЯ" {id}</h2>
        <div class="seo-table-contain" id="catalog-company-file">
          <div class="seo-table-row">
            <div class="seo-table-col-1">Статус</div>
            <div class="seo-table-col-2"><p class="copy-file-field">зареєстровано</p></div>
          </div>
        </div>
        </body></html>"#
    ))
}

/// Mounts the catalog: classes 01.10 (1 page), 01.11 (3 pages), 01.13 (1 page)
async fn mount_catalog(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/catalog/kved/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SECTIONS))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/catalog/kved/01"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CHAPTER))
        .mount(server)
        .await;

    for (class_code, suffix, pages) in [("01.10", "10", 1), ("01.11", "11", 3), ("01.13", "13", 1)] {
        Mock::given(method("GET"))
            .and(path(format!("/catalog/kved/01/{suffix}")))
            .respond_with(move |request: &Request| {
                let page = request
                    .url
                    .query_pairs()
                    .find(|(k, _)| k == "page")
                    .and_then(|(_, v)| v.parse::<u32>().ok())
                    .unwrap_or(1);
                ResponseTemplate::new(200).set_body_string(listing(class_code, page, pages))
            })
            .mount(server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path_regex(r"^/company/\d+/$"))
        .respond_with(company_page)
        .mount(server)
        .await;
}

fn test_config(dir: &Path, source: SourceConfig) -> Config {
    Config {
        crawler: CrawlerConfig {
            concurrency: 3,
            queue_capacity: 2,
            request_timeout_secs: 5,
            connect_timeout_secs: 5,
            reading_pause_probability: 0.0,
            ..CrawlerConfig::default()
        },
        identity: IdentityConfig::default(),
        source,
        output: OutputConfig {
            directory: dir.join("out"),
            checkpoint_path: dir.join("checkpoint.json"),
            format: OutputFormat::Jsonl,
            batch_size: 50,
            file_prefix: "kved".to_string(),
        },
    }
}

fn catalog_source(root: String) -> SourceConfig {
    SourceConfig {
        mode: SourceMode::Catalog,
        root_url: Some(root),
        class_filter: Vec::new(),
        identifiers_csv: None,
        identifier_column: "IDENTIFYCODE".to_string(),
        detail_url_template: None,
        chunk_size: 50,
        detail_marker: None,
    }
}

fn components(config: &Config) -> CrawlComponents {
    CrawlComponents {
        transport: Arc::new(ReqwestTransport::new(&config.crawler)),
        pacer: Arc::new(RecordingPacer::new()),
        catalog: Arc::new(YouControlCatalog),
        detail: Arc::new(YouControlDetail),
        seeder: None,
    }
}

/// Reads every JSON-lines output file in `dir`
fn read_records(dir: &Path) -> Vec<Value> {
    let mut records = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return records;
    };
    for entry in entries {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        for line in std::fs::read_to_string(&path).unwrap().lines() {
            records.push(serde_json::from_str(line).unwrap());
        }
    }
    records
}

fn identifiers(records: &[Value]) -> Vec<String> {
    let mut ids: Vec<String> = records
        .iter()
        .map(|r| r["EDRPOU_CODE"].as_str().unwrap_or_default().to_string())
        .collect();
    ids.sort();
    ids
}

async fn requested_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| match r.url.query() {
            Some(q) => format!("{}?{}", r.url.path(), q),
            None => r.url.path().to_string(),
        })
        .collect()
}

#[tokio::test]
async fn test_full_catalog_crawl() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let dir = TempDir::new().unwrap();
    let config = test_config(
        dir.path(),
        catalog_source(format!("{}/catalog/kved/", server.uri())),
    );

    let report = run_crawl_with(
        &config,
        &CrawlOptions::default(),
        components(&config),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, PlanOutcome::Completed);
    assert_eq!(report.stats.units_completed, 5);
    assert_eq!(report.stats.records_stored, 10);

    let records = read_records(&dir.path().join("out"));
    assert_eq!(records.len(), 10);

    let record = records
        .iter()
        .find(|r| r["EDRPOU_CODE"] == company_id("01.11", 3, 1))
        .expect("record from the last page of 01.11");
    assert_eq!(record["SECTION_CODE"], "A");
    assert_eq!(record["CHAPTER_CODE"], "01");
    assert_eq!(record["GROUP_CODE"], "01.1");
    assert_eq!(record["CLASS_NAME"], "Вирощування бобових культур");
    assert_eq!(record["PAGE"], "3");
    assert_eq!(record["PROFILE_СТАТУС"], "зареєстровано");
    assert_eq!(record["EDRPOU_FROM_TITLE"], company_id("01.11", 3, 1).as_str());

    let checkpoint = JsonCheckpointStore::new(&config.output.checkpoint_path)
        .load()
        .unwrap();
    assert_eq!(
        checkpoint.position,
        CrawlPosition::new("A", "01", "01.1", "01.13", 1)
    );
}

#[tokio::test]
async fn test_resume_from_checkpoint() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let dir = TempDir::new().unwrap();
    let config = test_config(
        dir.path(),
        catalog_source(format!("{}/catalog/kved/", server.uri())),
    );

    // A checkpoint as written by an earlier run that only knew the class
    std::fs::write(
        &config.output.checkpoint_path,
        r#"{"class_code": "01.11", "page": 2, "timestamp": "2024-05-01T10:00:00Z"}"#,
    )
    .unwrap();

    let report = run_crawl_with(
        &config,
        &CrawlOptions::default(),
        components(&config),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.outcome, PlanOutcome::Completed);

    let ids = identifiers(&read_records(&dir.path().join("out")));
    let mut expected = vec![
        company_id("01.11", 2, 0),
        company_id("01.11", 2, 1),
        company_id("01.11", 3, 0),
        company_id("01.11", 3, 1),
        company_id("01.13", 1, 0),
        company_id("01.13", 1, 1),
    ];
    expected.sort();
    assert_eq!(ids, expected);

    let paths = requested_paths(&server).await;
    assert!(!paths.iter().any(|p| p.starts_with("/catalog/kved/01/10")));
    assert!(!paths.iter().any(|p| p == "/catalog/kved/01/11?page=1"));
    assert!(paths.iter().any(|p| p == "/catalog/kved/01/11?page=2"));
}

#[tokio::test]
async fn test_fresh_ignores_checkpoint() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let dir = TempDir::new().unwrap();
    let mut source = catalog_source(format!("{}/catalog/kved/", server.uri()));
    source.class_filter = vec!["01.10".to_string()];
    let config = test_config(dir.path(), source);

    std::fs::write(
        &config.output.checkpoint_path,
        r#"{"class_code": "01.13", "page": 1, "timestamp": "2024-05-01T10:00:00Z"}"#,
    )
    .unwrap();

    let options = CrawlOptions {
        fresh: true,
        config_hash: Some("abc".to_string()),
    };
    let report = run_crawl_with(&config, &options, components(&config), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.records_stored, 2);
    let checkpoint = JsonCheckpointStore::new(&config.output.checkpoint_path)
        .load()
        .unwrap();
    assert_eq!(checkpoint.position.class_code, "01.10");
    assert_eq!(checkpoint.config_hash.as_deref(), Some("abc"));
}

#[tokio::test]
async fn test_identifier_list_crawl() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let dir = TempDir::new().unwrap();

    let csv_path = dir.path().join("companies.csv");
    std::fs::write(
        &csv_path,
        "NAME,IDENTIFYCODE\nА,30000001\nБ,30000002\nВ,30000003\nГ,30000004\nД,30000005\n",
    )
    .unwrap();

    let source = SourceConfig {
        mode: SourceMode::Identifiers,
        root_url: None,
        class_filter: Vec::new(),
        identifiers_csv: Some(csv_path),
        identifier_column: "IDENTIFYCODE".to_string(),
        detail_url_template: Some(format!("{}/company/{{id}}/", server.uri())),
        chunk_size: 2,
        detail_marker: None,
    };
    let config = test_config(dir.path(), source);
    let store = JsonCheckpointStore::new(&config.output.checkpoint_path);

    let report = run_crawl_with(
        &config,
        &CrawlOptions::default(),
        components(&config),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, PlanOutcome::Completed);
    assert_eq!(report.stats.units_completed, 3);

    let records = read_records(&dir.path().join("out"));
    assert_eq!(
        identifiers(&records),
        vec!["30000001", "30000002", "30000003", "30000004", "30000005"]
    );
    assert!(records.iter().all(|r| r["CLASS_CODE"] == "companies"));
    assert_eq!(store.load().unwrap().position, CrawlPosition::at_class("companies", 3));

    // A second run resumes at the last chunk and refetches only it
    let before = server.received_requests().await.unwrap_or_default().len();
    run_crawl_with(
        &config,
        &CrawlOptions::default(),
        components(&config),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let after = server.received_requests().await.unwrap_or_default().len();
    assert_eq!(after - before, 1);
}

#[tokio::test]
async fn test_cancelled_crawl_keeps_checkpoint() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let dir = TempDir::new().unwrap();
    let config = test_config(
        dir.path(),
        catalog_source(format!("{}/catalog/kved/", server.uri())),
    );

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let report = run_crawl_with(&config, &CrawlOptions::default(), components(&config), shutdown)
        .await
        .unwrap();

    assert_eq!(report.outcome, PlanOutcome::Interrupted);
    assert_eq!(report.stats.units_completed, 0);
    assert!(JsonCheckpointStore::new(&config.output.checkpoint_path)
        .load()
        .is_none());
}
