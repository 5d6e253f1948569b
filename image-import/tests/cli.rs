use assert_cmd::prelude::OutputAssertExt;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use tempfile::{NamedTempFile, TempDir};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_config(extra: &str) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    let yaml = format!(
        "ufile_bucket_name: images\nufile_key_name: disk.raw\nimage_name: centos-base\nimage_os_type: CentOS\nimage_os_name: CentOS 7\nformat: raw\nregion: cn-bj2\nproject_id: org-abc\n{extra}"
    );
    write(config.path(), yaml).expect("Writing temp config failed");
    config
}

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("ucloud-image-import").expect("Binary exists");
    cmd.env("UCLOUD_PUBLIC_KEY", "pub-key")
        .env("UCLOUD_PRIVATE_KEY", "priv-key")
        .env_remove("UCLOUD_REGION")
        .env_remove("UCLOUD_PROJECT_ID");
    cmd
}

#[test]
fn help_lists_import_command() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("import"));
}

#[test]
fn import_fails_for_missing_config_file() {
    let dir = TempDir::new().unwrap();
    cli()
        .arg("import")
        .arg("--config")
        .arg(dir.path().join("absent.yaml"))
        .arg("--artifact")
        .arg(dir.path().join("disk.raw"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn import_lists_every_config_error() {
    let config = NamedTempFile::new().unwrap();
    write(config.path(), "image_name: centos-base\nformat: iso\n").unwrap();

    cli()
        .arg("import")
        .arg("--config")
        .arg(config.path())
        .arg("--artifact")
        .arg("disk.raw")
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("ufile_bucket_name must be set")
                .and(predicate::str::contains("region must be set"))
                .and(predicate::str::contains("\"iso\"")),
        );
}

#[test]
fn import_fails_without_matching_artifact() {
    let config = write_config("");
    let dir = TempDir::new().unwrap();
    let artifact = dir.path().join("disk.qcow2");
    write(&artifact, b"qcow").unwrap();

    cli()
        .arg("import")
        .arg("--config")
        .arg(config.path())
        .arg("--artifact")
        .arg(&artifact)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No raw image file found in artifact"));
}

#[tokio::test(flavor = "multi_thread")]
async fn import_happy_flow_against_mock_ucloud() {
    let server = MockServer::start().await;
    let domain = server.uri().trim_start_matches("http://").to_string();

    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_string_contains("Action=DescribeBucket"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "RetCode": 0,
            "DataSet": [{"BucketName": "images", "Domain": {"Src": [domain]}, "Type": "public"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/disk.raw"))
        .and(query_param("uploads", ""))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "UploadId": "up-1",
            "BlkSize": 4194304
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/disk.raw"))
        .and(query_param("partNumber", "0"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "etag-0"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/disk.raw"))
        .and(query_param("uploadId", "up-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_string_contains("Action=ImportCustomImage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "RetCode": 0,
            "ImageId": "uimage-9"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_string_contains("Action=DescribeImage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "RetCode": 0,
            "ImageSet": [{"ImageId": "uimage-9", "State": "Available"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/disk.raw"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let config = write_config(&format!("base_url: {}\n", server.uri()));
    let dir = TempDir::new().unwrap();
    let artifact = dir.path().join("disk.raw");
    write(&artifact, b"raw disk bytes").unwrap();

    let output = tokio::task::spawn_blocking(move || {
        cli()
            .arg("import")
            .arg("--config")
            .arg(config.path())
            .arg("--artifact")
            .arg(&artifact)
            .output()
    })
    .await
    .unwrap()
    .unwrap();

    output.assert().success().stdout(
        predicate::str::contains("UCloud images were created:")
            .and(predicate::str::contains("uimage-9")),
    );
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*; // needed for .with()
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use image_import::cli::{run, Cli, Commands};

    let cli = Cli {
        command: Commands::Import {
            config: std::path::PathBuf::from("dummy.yaml"),
            artifacts: vec![std::path::PathBuf::from("disk.raw")],
        },
    };

    let _ = run(cli).await;

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
