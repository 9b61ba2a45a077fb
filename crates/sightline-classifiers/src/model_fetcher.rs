//! Model download, compilation and installation
//!
//! A fetch moves a model through `downloading(temp) -> compiled(temp) ->
//! installed`. Both temporary artifacts live in the scratch directory under
//! collision-free names and are owned by [`TempArtifact`] guards, so they are
//! removed whichever way the fetch ends.

use crate::artifact::TempArtifact;
use crate::classifier::InferenceEngine;
use crate::config::RecognizerConfig;
use crate::model_store::{validate_classifier_id, ModelStore};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use sightline_core::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Credentials for the remote classification service
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Classifier details reported by the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteClassifier {
    pub classifier_id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub status: Option<String>,

    /// Last time the classifier was retrained
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

/// Downloads, compiles and installs models from the remote service
pub struct ModelFetcher {
    client: Client,
    service_url: Url,
    api_version: Option<String>,
    api_key_header: String,
    scratch_dir: PathBuf,
    raw_extension: String,
    compiled_extension: String,
    engine: Arc<dyn InferenceEngine>,
    store: Arc<ModelStore>,
}

impl ModelFetcher {
    /// Create a fetcher installing into `store`
    pub fn new(
        config: &RecognizerConfig,
        engine: Arc<dyn InferenceEngine>,
        store: Arc<ModelStore>,
    ) -> Result<Self> {
        let service_url = Url::parse(&config.service_url).map_err(|e| {
            Error::config(format!("invalid service_url {:?}: {}", config.service_url, e))
        })?;
        if service_url.cannot_be_a_base() {
            return Err(Error::config(format!(
                "service_url {:?} cannot be used as a base URL",
                config.service_url
            )));
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            service_url,
            api_version: config.api_version.clone(),
            api_key_header: config.api_key_header.clone(),
            scratch_dir: config.scratch_dir.clone(),
            raw_extension: config.raw_extension.clone(),
            compiled_extension: config.compiled_extension.clone(),
            engine,
            store,
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.service_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::config("service_url cannot be used as a base URL"))?
            .pop_if_empty()
            .extend(segments);

        if let Some(version) = &self.api_version {
            url.query_pairs_mut().append_pair("version", version);
        }

        Ok(url)
    }

    async fn get(&self, url: Url, credentials: &Credentials) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .header(self.api_key_header.as_str(), credentials.api_key())
            .send()
            .await
            .map_err(|e| Error::transport(e.to_string()))
    }

    /// Query classifier details from the remote service
    pub async fn remote_classifier(
        &self,
        classifier_id: &str,
        credentials: &Credentials,
    ) -> Result<RemoteClassifier> {
        validate_classifier_id(classifier_id)?;
        let url = self.endpoint(&["classifiers", classifier_id])?;

        let response = self.get(url, credentials).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Remote {
                classifier_id: classifier_id.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<RemoteClassifier>()
            .await
            .map_err(|e| Error::transport(format!("invalid classifier details: {}", e)))
    }

    /// Download, compile and install the model for `classifier_id`
    ///
    /// Returns the installed path. Calling this twice for the same classifier
    /// replaces the first install.
    pub async fn fetch(&self, classifier_id: &str, credentials: &Credentials) -> Result<PathBuf> {
        validate_classifier_id(classifier_id)?;

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| {
                Error::install(format!(
                    "cannot create scratch directory {}: {}",
                    self.scratch_dir.display(),
                    e
                ))
            })?;

        let download = TempArtifact::unique_in(&self.scratch_dir, &self.raw_extension);
        self.download(classifier_id, credentials, download.path())
            .await?;

        let compiled = TempArtifact::unique_in(&self.scratch_dir, &self.compiled_extension);
        self.compile(download.path(), compiled.path()).await?;
        drop(download);

        let store = Arc::clone(&self.store);
        let id = classifier_id.to_string();
        let source = compiled.path().to_path_buf();
        let installed = tokio::task::spawn_blocking(move || store.install(&id, &source))
            .await
            .map_err(|e| Error::install(format!("install task failed: {}", e)))?
            .map_err(|e| match e {
                Error::Install(_) | Error::InvalidClassifierId(_) => e,
                other => Error::install(other.to_string()),
            })?;

        Ok(installed)
    }

    async fn download(
        &self,
        classifier_id: &str,
        credentials: &Credentials,
        destination: &Path,
    ) -> Result<()> {
        let url = self.endpoint(&["classifiers", classifier_id, "model"])?;
        info!(classifier_id = %classifier_id, url = %url, "Downloading model");

        let response = self.get(url, credentials).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Remote {
                classifier_id: classifier_id.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::transport(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        debug!(classifier_id = %classifier_id, bytes = written, "Model downloaded");
        Ok(())
    }

    async fn compile(&self, source: &Path, destination: &Path) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();

        tokio::task::spawn_blocking(move || engine.compile(&source, &destination))
            .await
            .map_err(|e| Error::compile(format!("compile task failed: {}", e)))?
            .map_err(|e| match e {
                Error::Compile(_) => e,
                other => Error::compile(other.to_string()),
            })
    }
}
