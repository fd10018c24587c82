//! Integration tests for the crawl pipeline
//!
//! These tests use wiremock to serve a small storefront and run a whole job
//! through the HTTP page driver, the selector catalog and a SQLite
//! checkpoint store.

use shelf_crawler::catalog::SelectorCatalog;
use shelf_crawler::checkpoint::{CheckpointManager, CheckpointStatus, PipelineStep};
use shelf_crawler::config::{parse_config, Config};
use shelf_crawler::output::write_markdown_summary;
use shelf_crawler::page::HttpBrowser;
use shelf_crawler::storage::{CheckpointStore, SqliteCheckpointStore};
use shelf_crawler::{CrawlJob, CrawlOrchestrator};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration with short delays and the given database
fn create_test_config(db_path: &Path) -> Config {
    let toml = format!(
        r#"
[crawler]
persist-backoff-ms = 10

[throttle]
default-delay-ms = 10
min-delay-ms = 5
max-delay-ms = 200

[pagination]
scroll-delay-ms = 10
navigation-timeout-ms = 5000

[user-agent]
crawler-name = "ShelfBot"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[output]
database-path = "{}"
summary-path = "./summary.md"

[http]
respect-robots = true
"#,
        db_path.display()
    );
    parse_config(&toml).unwrap()
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<html><body>{}</body></html>", body),
        "text/html; charset=utf-8",
    )
}

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

/// A storefront with one paginated category, one plain category and one
/// category hidden by robots.txt
async fn storefront() -> MockServer {
    let server = MockServer::start().await;

    mount(
        &server,
        "/robots.txt",
        ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /c/private\n"),
    )
    .await;
    mount(
        &server,
        "/",
        html(
            r#"<nav>
                 <a href="/c/shoes">Shoes</a>
                 <a href="/c/private">Staff Picks</a>
                 <a href="/c/bags">Bags</a>
               </nav>"#,
        ),
    )
    .await;
    mount(
        &server,
        "/c/shoes",
        html(
            r#"<ul>
                 <li class="product"><a href="/p/1">Trail Runner</a></li>
                 <li class="product"><a href="/p/2">Hiking Boot</a></li>
               </ul>
               <a rel="next" href="/c/shoes/page/2">Next</a>"#,
        ),
    )
    .await;
    mount(
        &server,
        "/c/shoes/page/2",
        html(r#"<ul><li class="product"><a href="/p/3">Sandal</a></li></ul>"#),
    )
    .await;
    mount(
        &server,
        "/c/bags",
        html(
            r#"<ul>
                 <li class="product"><a href="/p/1">Trail Runner</a></li>
                 <li class="product"><a href="/p/4">Tote</a></li>
               </ul>"#,
        ),
    )
    .await;

    server
}

fn orchestrator(config: &Config, checkpoints: Arc<CheckpointManager>) -> CrawlOrchestrator {
    let browser = Arc::new(HttpBrowser::new(config).unwrap());
    let catalog = Arc::new(SelectorCatalog::new(
        config.catalog.clone(),
        Duration::from_secs(5),
    ));
    CrawlOrchestrator::new(config, browser, catalog.clone(), catalog, checkpoints)
}

#[tokio::test]
async fn test_full_job_against_storefront() {
    let server = storefront().await;
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("checkpoints.db");
    let config = create_test_config(&db_path);

    let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::new(&db_path).unwrap());
    let checkpoints = Arc::new(CheckpointManager::new(store, 30));
    let job = CrawlJob::new(&format!("{}/", server.uri()), &config.crawler);

    let report = orchestrator(&config, checkpoints).run(job).await.unwrap();

    assert_eq!(report.status, CheckpointStatus::Completed);
    assert_eq!(report.categories_discovered, 3);
    assert_eq!(report.categories_targeted, 3);
    assert_eq!(report.categories_succeeded, 2);
    assert_eq!(report.categories_failed, 1);
    assert_eq!(report.errors[0].code, "robots");
    assert!(report.errors[0].category_url.ends_with("/c/private"));
    assert_eq!(report.pages_visited, 3);
    assert_eq!(report.quality.total_records, 5);
    assert_eq!(report.quality.unique_products, 4);
    assert_eq!(report.quality.duplicates_skipped, 1);
    assert_eq!(report.quality.complete_records, 4);

    // A fresh connection sees the finished checkpoint
    let reopened = SqliteCheckpointStore::new(&db_path).unwrap();
    let record = reopened.get(report.checkpoint_id).await.unwrap().unwrap();
    assert_eq!(record.status, CheckpointStatus::Completed);
    assert_eq!(record.pipeline_step, PipelineStep::FINALIZE);
    assert_eq!(record.pipeline_data.urls_processed.len(), 3);
    assert_eq!(record.pipeline_data.extraction_results.len(), 3);

    let summary = dir.path().join("out").join("summary.md");
    write_markdown_summary(&report, &summary).unwrap();
    let written = std::fs::read_to_string(&summary).unwrap();
    assert!(written.contains("Hiking Boot"));
    assert!(written.contains("## Category Errors"));
}

#[tokio::test]
async fn test_fresh_job_does_not_resume_completed_checkpoint() {
    let server = storefront().await;
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("checkpoints.db");
    let config = create_test_config(&db_path);

    let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::new(&db_path).unwrap());
    let checkpoints = Arc::new(CheckpointManager::new(store, 30));
    let orchestrator = orchestrator(&config, checkpoints);
    let root = format!("{}/", server.uri());

    let first = orchestrator
        .run(CrawlJob::new(&root, &config.crawler))
        .await
        .unwrap();
    let second = orchestrator
        .run(CrawlJob::new(&root, &config.crawler))
        .await
        .unwrap();

    assert_ne!(first.checkpoint_id, second.checkpoint_id);
    assert_eq!(second.quality.unique_products, 4);
}
