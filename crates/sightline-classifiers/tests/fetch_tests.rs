//! Model fetch, install and update tests against a mock classification service

mod common;

use common::{config, entries, ids, install_local, model_body, png, recognizer_with, MockEngine};
use serde_json::json;
use sightline_classifiers::{Credentials, LocalRecognizer};
use sightline_core::Error;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "test-key";

fn credentials() -> Credentials {
    Credentials::new(API_KEY)
}

fn service(server: &MockServer) -> String {
    format!("{}/api/v3", server.uri())
}

async fn mount_model(server: &MockServer, id: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v3/classifiers/{}/model", id)))
        .and(header("x-api-key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.into_bytes()))
        .mount(server)
        .await;
}

async fn mount_model_once(server: &MockServer, id: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v3/classifiers/{}/model", id)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.into_bytes()))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_installs_and_classifies() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let recognizer = recognizer_with(config(dir.path(), &service(&server)), &engine);

    mount_model(&server, "dogs_1", model_body("dogs", "dogs_1", "beagle:0.7")).await;

    let installed = recognizer
        .download_and_install_model("dogs_1", &credentials())
        .await
        .unwrap();

    assert_eq!(installed, dir.path().join("models").join("dogs_1.mlmodelc"));
    assert!(installed.is_dir());
    assert_eq!(recognizer.list_local_models().unwrap(), ids(&["dogs_1"]));
    assert!(entries(&dir.path().join("scratch")).is_empty());

    let response = recognizer
        .classify_locally(&png(), Some(&ids(&["dogs_1"])), None)
        .await
        .unwrap();
    let result = response.classifier("dogs_1").unwrap();
    assert_eq!(result.display_name, "dogs");
    assert_eq!(result.classes[0].label, "beagle");

    assert_eq!(recognizer.metrics().fetches_installed, 1);
}

#[tokio::test]
async fn test_api_version_is_sent() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let mut config = config(dir.path(), &service(&server));
    config.api_version = Some("2018-03-19".to_string());
    let recognizer = recognizer_with(config, &engine);

    Mock::given(method("GET"))
        .and(path("/api/v3/classifiers/dogs_1/model"))
        .and(query_param("version", "2018-03-19"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(model_body("dogs", "dogs_1", "beagle:0.7").into_bytes()),
        )
        .expect(1)
        .mount(&server)
        .await;

    recognizer
        .download_and_install_model("dogs_1", &credentials())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_second_fetch_replaces_the_first() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let recognizer = recognizer_with(config(dir.path(), &service(&server)), &engine);

    mount_model_once(&server, "dogs_1", model_body("dogs v1", "dogs_1", "beagle:0.7")).await;
    mount_model_once(&server, "dogs_1", model_body("dogs v2", "dogs_1", "poodle:0.6")).await;

    recognizer
        .download_and_install_model("dogs_1", &credentials())
        .await
        .unwrap();
    let first = recognizer.resolve_model("dogs_1").unwrap().unwrap();
    assert_eq!(first.metadata().display_name.as_deref(), Some("dogs v1"));

    let installed = recognizer
        .download_and_install_model("dogs_1", &credentials())
        .await
        .unwrap();

    let definition = std::fs::read_to_string(installed.join("model.txt")).unwrap();
    assert_eq!(definition, "dogs v2|dogs_1|poodle:0.6");

    // Exactly one artifact, no staging leftovers
    assert_eq!(entries(&dir.path().join("models")), ids(&["dogs_1.mlmodelc"]));
    assert!(entries(&dir.path().join("scratch")).is_empty());

    let second = recognizer.resolve_model("dogs_1").unwrap().unwrap();
    assert_eq!(second.metadata().display_name.as_deref(), Some("dogs v2"));
}

#[tokio::test]
async fn test_missing_remote_model_cleans_up() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let recognizer = recognizer_with(config(dir.path(), &service(&server)), &engine);

    Mock::given(method("GET"))
        .and(path("/api/v3/classifiers/ghost/model"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = recognizer
        .download_and_install_model("ghost", &credentials())
        .await;

    assert!(matches!(result, Err(Error::Remote { status: 404, .. })));
    assert_eq!(engine.compiles(), 0);
    assert!(entries(&dir.path().join("scratch")).is_empty());
    assert!(recognizer.list_local_models().unwrap().is_empty());
    assert_eq!(recognizer.metrics().fetches_failed, 1);
}

#[tokio::test]
async fn test_unreachable_service_is_a_transport_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let recognizer = recognizer_with(config(dir.path(), "http://127.0.0.1:1/api/v3"), &engine);

    let result = recognizer
        .download_and_install_model("dogs_1", &credentials())
        .await;

    assert!(matches!(result, Err(Error::Transport(_))));
    assert!(entries(&dir.path().join("scratch")).is_empty());
}

#[tokio::test]
async fn test_compile_failure_cleans_up() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let recognizer = recognizer_with(config(dir.path(), &service(&server)), &engine);

    mount_model(&server, "dogs_1", "<html>not a model</html>".to_string()).await;
    let result = recognizer
        .download_and_install_model("dogs_1", &credentials())
        .await;
    assert!(matches!(result, Err(Error::Compile(_))));
    assert!(entries(&dir.path().join("scratch")).is_empty());

    // A compiler crash that leaves a partial bundle is cleaned up too
    engine.fail_compiles();
    let result = recognizer
        .download_and_install_model("dogs_1", &credentials())
        .await;
    assert!(matches!(result, Err(Error::Compile(_))));
    assert!(entries(&dir.path().join("scratch")).is_empty());
    assert!(recognizer.list_local_models().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_compile_keeps_previous_model() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let recognizer = recognizer_with(config(dir.path(), &service(&server)), &engine);

    install_local(&recognizer, &engine, "dogs_1", "dogs", "beagle:0.7");
    mount_model(&server, "dogs_1", "garbage".to_string()).await;

    let result = recognizer
        .download_and_install_model("dogs_1", &credentials())
        .await;
    assert!(result.is_err());

    let model = recognizer.resolve_model("dogs_1").unwrap().unwrap();
    assert_eq!(model.metadata().display_name.as_deref(), Some("dogs"));
}

#[tokio::test]
async fn test_install_failure_cleans_up() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();

    // The models directory cannot be created where a file already sits
    std::fs::write(dir.path().join("models"), b"in the way").unwrap();
    let recognizer = recognizer_with(config(dir.path(), &service(&server)), &engine);

    mount_model(&server, "dogs_1", model_body("dogs", "dogs_1", "beagle:0.7")).await;

    let result = recognizer
        .download_and_install_model("dogs_1", &credentials())
        .await;

    assert!(matches!(result, Err(Error::Install(_))));
    assert_eq!(engine.compiles(), 1);
    assert!(entries(&dir.path().join("scratch")).is_empty());
}

#[tokio::test]
async fn test_unusable_scratch_dir_is_an_install_error() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();

    std::fs::write(dir.path().join("scratch"), b"in the way").unwrap();
    let recognizer = recognizer_with(config(dir.path(), &service(&server)), &engine);

    mount_model(&server, "dogs_1", model_body("dogs", "dogs_1", "beagle:0.7")).await;

    let result = recognizer
        .download_and_install_model("dogs_1", &credentials())
        .await;

    assert!(matches!(result, Err(Error::Install(_))));
    assert_eq!(engine.compiles(), 0);
    assert!(recognizer.list_local_models().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_classifier_id_is_rejected_before_download() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let recognizer = recognizer_with(config(dir.path(), &service(&server)), &engine);

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = recognizer
        .download_and_install_model("../escape", &credentials())
        .await;
    assert!(matches!(result, Err(Error::InvalidClassifierId(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fetches_never_expose_a_torn_model() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let recognizer: Arc<LocalRecognizer> =
        Arc::new(recognizer_with(config(dir.path(), &service(&server)), &engine));

    mount_model(&server, "dogs_1", model_body("dogs", "dogs_1", "beagle:0.7")).await;
    install_local(&recognizer, &engine, "dogs_1", "dogs", "beagle:0.7");

    let done = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicUsize::new(0));

    let reader = {
        let recognizer = Arc::clone(&recognizer);
        let done = Arc::clone(&done);
        let observed = Arc::clone(&observed);
        tokio::task::spawn_blocking(move || {
            while !done.load(Ordering::SeqCst) {
                let model = recognizer
                    .resolve_model("dogs_1")
                    .expect("resolve failed during install")
                    .expect("model disappeared during install");
                assert_eq!(model.metadata().display_name.as_deref(), Some("dogs"));
                observed.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let mut fetches = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let recognizer = Arc::clone(&recognizer);
        fetches.spawn(async move {
            recognizer
                .download_and_install_model("dogs_1", &credentials())
                .await
        });
    }

    while let Some(joined) = fetches.join_next().await {
        joined.unwrap().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    reader.await.unwrap();

    assert!(observed.load(Ordering::SeqCst) > 0);
    assert_eq!(entries(&dir.path().join("models")), ids(&["dogs_1.mlmodelc"]));
    assert!(entries(&dir.path().join("scratch")).is_empty());
    assert_eq!(recognizer.metrics().fetches_installed, 8);
}

#[tokio::test]
async fn test_update_skips_fresh_model() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let recognizer = recognizer_with(config(dir.path(), &service(&server)), &engine);

    install_local(&recognizer, &engine, "dogs_1", "dogs", "beagle:0.7");

    Mock::given(method("GET"))
        .and(path("/api/v3/classifiers/dogs_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "classifier_id": "dogs_1",
            "name": "dogs",
            "status": "ready",
            "updated": "2001-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v3/classifiers/dogs_1/model"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    recognizer.update_model("dogs_1", &credentials()).await.unwrap();
    assert_eq!(recognizer.metrics().fetches_up_to_date, 1);
}

#[tokio::test]
async fn test_update_downloads_retrained_model() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let recognizer = recognizer_with(config(dir.path(), &service(&server)), &engine);

    install_local(&recognizer, &engine, "dogs_1", "dogs", "beagle:0.7");

    Mock::given(method("GET"))
        .and(path("/api/v3/classifiers/dogs_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "classifier_id": "dogs_1",
            "name": "dogs",
            "updated": "2999-01-01T00:00:00Z"
        })))
        .mount(&server)
        .await;

    mount_model(&server, "dogs_1", model_body("dogs v2", "dogs_1", "poodle:0.6")).await;

    recognizer.update_model("dogs_1", &credentials()).await.unwrap();

    let model = recognizer.resolve_model("dogs_1").unwrap().unwrap();
    assert_eq!(model.metadata().display_name.as_deref(), Some("dogs v2"));
    assert_eq!(recognizer.metrics().fetches_installed, 1);
}

#[tokio::test]
async fn test_update_installs_missing_model() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let recognizer = recognizer_with(config(dir.path(), &service(&server)), &engine);

    Mock::given(method("GET"))
        .and(path("/api/v3/classifiers/dogs_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "classifier_id": "dogs_1",
            "updated": "2001-01-01T00:00:00Z"
        })))
        .mount(&server)
        .await;
    mount_model(&server, "dogs_1", model_body("dogs", "dogs_1", "beagle:0.7")).await;

    recognizer.update_model("dogs_1", &credentials()).await.unwrap();
    assert_eq!(recognizer.list_local_models().unwrap(), ids(&["dogs_1"]));
}

#[tokio::test]
async fn test_update_reports_remote_errors() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let recognizer = recognizer_with(config(dir.path(), &service(&server)), &engine);

    Mock::given(method("GET"))
        .and(path("/api/v3/classifiers/dogs_1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = recognizer.update_model("dogs_1", &credentials()).await;
    assert!(matches!(result, Err(Error::Remote { status: 401, .. })));
    assert_eq!(recognizer.metrics().fetches_failed, 1);
}

#[tokio::test]
async fn test_list_and_delete_local_models() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let recognizer = recognizer_with(config(dir.path(), "http://127.0.0.1:1/api/v3"), &engine);

    assert!(recognizer.list_local_models().unwrap().is_empty());

    install_local(&recognizer, &engine, "pets", "pets", "cat:0.9");
    install_local(&recognizer, &engine, "dogs_1", "dogs", "beagle:0.7");
    std::fs::write(dir.path().join("models").join("notes.txt"), b"ignored").unwrap();

    assert_eq!(recognizer.list_local_models().unwrap(), ids(&["dogs_1", "pets"]));

    recognizer.delete_local_model("pets").unwrap();
    assert_eq!(recognizer.list_local_models().unwrap(), ids(&["dogs_1"]));
    assert!(recognizer.resolve_model("pets").unwrap().is_none());

    let result = recognizer.delete_local_model("pets");
    assert!(matches!(result, Err(Error::ModelNotFound(_))));
}
