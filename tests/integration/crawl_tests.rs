//! Integration tests for the archiver
//!
//! These tests use wiremock to create mock HTTP servers and run the real
//! reqwest-backed fetcher through complete archive runs.

use std::io::Write;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};
use web_archiver::config::{load_config, ArchiverConfig, Profile};
use web_archiver::crawler::{archive_all, archive_site, HttpFetcher, HttpSettings};
use web_archiver::output::load_statistics;
use web_archiver::storage::{FrontierStore, SqliteFrontier};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Settings pointing at a fresh database in `dir`
fn test_settings(dir: &TempDir) -> ArchiverConfig {
    ArchiverConfig {
        database_path: dir.path().join("archive.db").display().to_string(),
        request_timeout: 5,
        connect_timeout: 2,
        max_redirects: 3,
        user_agents: vec!["TestBot/1.0".to_string(), "TestBot/2.0".to_string()],
        ..ArchiverConfig::default()
    }
}

fn fetcher(settings: &ArchiverConfig) -> Arc<HttpFetcher> {
    Arc::new(HttpFetcher::new(HttpSettings::from_config(settings)))
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(format!("<html><body>{}</body></html>", body))
        .insert_header("content-type", "text/html; charset=utf-8")
}

async fn mount_page(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(html(body))
        .mount(server)
        .await;
}

fn requests_to(requests: &[wiremock::Request], route: &str) -> usize {
    requests
        .iter()
        .filter(|request| request.url.path() == route)
        .count()
}

/// Opens the database and selects the namespace of `profile`
fn open_site(settings: &ArchiverConfig, profile: &Profile) -> SqliteFrontier {
    let mut store =
        SqliteFrontier::new(std::path::Path::new(&settings.database_path)).expect("open database");
    let site = store
        .list_sites()
        .expect("list sites")
        .into_iter()
        .find(|site| site.base_url == profile.seed_url())
        .expect("site namespace exists");
    store.use_site(&site);
    store
}

#[tokio::test]
async fn test_archives_pages_assets_and_links() {
    let server = MockServer::start().await;
    let base = format!("{}/", server.uri());

    mount_page(
        &server,
        "/",
        r#"<a href="/a">A</a>
           <img src="/img.png">
           <a href="http://other.test/x">Elsewhere</a>"#,
    )
    .await;
    mount_page(&server, "/a", "<p>Leaf page</p>").await;
    Mock::given(method("GET"))
        .and(path("/img.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"\x89PNG\r\n\x1a\n".to_vec())
                .insert_header("content-type", "image/png"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let profile = Profile::new(base.clone());

    let report = archive_site(settings.clone(), profile.clone(), fetcher(&settings))
        .await
        .expect("archive run failed");

    assert_eq!(report.page_count, 2);
    assert_eq!(report.asset_count, 1);
    assert_eq!(report.pages_processed, 2);
    assert_eq!(report.assets_processed, 1);
    assert_eq!(report.external_discarded, 1);
    assert!(report.failed_urls.is_empty());

    let store = open_site(&settings, &profile);
    let page_links = store.page_links_from(&base).unwrap();
    assert_eq!(page_links.len(), 1);
    assert_eq!(page_links[0].target_url, format!("{}a", base));
    assert!(page_links[0].followed);

    let asset_links = store.asset_links_from(&base).unwrap();
    assert_eq!(asset_links.len(), 1);
    assert_eq!(asset_links[0].target_url, format!("{}img.png", base));

    let asset = store
        .get_asset(&format!("{}img.png", base))
        .unwrap()
        .expect("asset row");
    assert_eq!(asset.asset_type, "image/png");

    let raw = store.raw_pages_for(&base).unwrap();
    assert_eq!(raw.len(), 1);
    assert!(raw[0].raw.as_ref().unwrap().starts_with(b"<html>"));
}

#[tokio::test]
async fn test_non_200_is_retried_with_rotated_identity() {
    let server = MockServer::start().await;
    let base = format!("{}/", server.uri());

    mount_page(&server, "/", r#"<a href="/flaky">Flaky</a><a href="/gone">Gone</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, "/flaky", "<p>Back</p>").await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let report = archive_site(settings.clone(), Profile::new(base.clone()), fetcher(&settings))
        .await
        .unwrap();

    assert_eq!(report.failed_urls, vec![format!("{}gone", base)]);
    assert_eq!(report.pages_processed, 2);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests_to(&requests, "/flaky"), 2);
    assert_eq!(requests_to(&requests, "/gone"), 2);
}

#[tokio::test]
async fn test_redirect_loop_fails_url_without_stopping() {
    let server = MockServer::start().await;
    let base = format!("{}/", server.uri());

    mount_page(&server, "/", r#"<a href="/loop">Loop</a><a href="/fine">Fine</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop"))
        .mount(&server)
        .await;
    mount_page(&server, "/fine", "<p>Fine</p>").await;

    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let report = archive_site(settings.clone(), Profile::new(base.clone()), fetcher(&settings))
        .await
        .unwrap();

    assert_eq!(report.failed_urls, vec![format!("{}loop", base)]);
    assert_eq!(report.pages_processed, 2);
}

#[tokio::test]
async fn test_out_of_scope_pages_are_not_followed() {
    let server = MockServer::start().await;
    let base = format!("{}/", server.uri());

    // localhost resolves to the same server but is outside the allowed hosts
    let port = url::Url::parse(&base).unwrap().port().unwrap();
    mount_page(
        &server,
        "/",
        &format!(
            r#"<a href="/inside">In</a><a href="http://localhost:{}/outside">Out</a>"#,
            port
        ),
    )
    .await;
    mount_page(&server, "/inside", "<p>In</p>").await;
    mount_page(&server, "/outside", "<p>Out</p>").await;

    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let report = archive_site(settings.clone(), Profile::new(base), fetcher(&settings))
        .await
        .unwrap();

    assert_eq!(report.page_count, 2);
    assert_eq!(report.external_discarded, 1);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests_to(&requests, "/outside"), 0);
}

#[tokio::test]
async fn test_second_run_does_not_refetch_consumed_pages() {
    let server = MockServer::start().await;
    let base = format!("{}/", server.uri());

    mount_page(&server, "/", r#"<a href="/a">A</a><link href="/site.css">"#).await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html("<p>A</p>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/site.css"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("body { color: black; }")
                .insert_header("content-type", "text/css"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let profile = Profile::new(base.clone());

    let first = archive_site(settings.clone(), profile.clone(), fetcher(&settings))
        .await
        .unwrap();
    let second = archive_site(settings.clone(), profile.clone(), fetcher(&settings))
        .await
        .unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(second.page_count, first.page_count);
    assert_eq!(second.pages_processed, 1);

    let store = open_site(&settings, &profile);
    let runs = store.runs().unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|run| run.is_finished()));
    // The base page was snapshotted by both runs
    assert_eq!(store.raw_pages_for(&base).unwrap().len(), 2);
}

#[tokio::test]
async fn test_archive_all_from_config_file() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    mount_page(&first, "/", r#"<a href="/one">One</a>"#).await;
    mount_page(&first, "/one", "<p>One</p>").await;
    mount_page(&second, "/", "<p>Lonely home page</p>").await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("sites.db");
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[archiver]
database-path = "{}"
request-timeout = 5
user-agents = ["TestBot/1.0"]

[[site]]
base-url = "{}/"
milestones = 1

[[site]]
base-url = "{}/"
"#,
        db_path.display(),
        first.uri(),
        second.uri()
    )
    .unwrap();

    let config = load_config(file.path()).expect("config loads");
    let settings = config.archiver.clone();
    let results = archive_all(config, fetcher(&settings)).await;

    assert_eq!(results.len(), 2);
    let reports: Vec<_> = results
        .into_iter()
        .map(|(base, result)| (base, result.expect("site run failed")))
        .collect();
    assert_eq!(reports[0].1.page_count, 2);
    assert_eq!(reports[1].1.page_count, 1);

    let mut store = SqliteFrontier::new(&db_path).unwrap();
    let stats = load_statistics(&mut store).unwrap();
    assert_eq!(stats.len(), 2);

    // Workers register their namespaces in whatever order they start
    let first_site = stats
        .iter()
        .find(|site| site.base_url == format!("{}/", first.uri()))
        .expect("first site statistics");
    assert_eq!(first_site.counts.pages, 2);
    assert_eq!(first_site.counts.pending_links, 0);
    assert_eq!(first_site.counts.finished_runs, 1);
    // finished checkpoint plus the rotating milestone slot
    assert_eq!(first_site.counts.checkpoints, 2);
}
