//! Remote object store reached over HTTPS.
//!
//! Objects are addressed path-style as `{endpoint}/{bucket}/{key}` and every
//! request carries basic-auth credentials. One pooled `reqwest::Client` is
//! shared by all operations; responses and request bodies are dropped before
//! each method returns.

use crate::services::{
    error::{DriveError, DriveResult},
    storage_backend::{ProgressEvent, ProgressListener, StorageBackend, object_key},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client, StatusCode, Url, header};
use std::{path::Path, time::Duration};
use tokio::{fs::File, sync::mpsc};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

/// Connection settings for [`ObjectStoreBackend`].
#[derive(Clone, Debug)]
pub struct ObjectStoreSettings {
    pub enabled: bool,
    /// Host name or full URL. A bare host is reached over `https://`.
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub access_key_secret: String,
    pub request_timeout: Option<Duration>,
}

pub struct ObjectStoreBackend {
    client: Client,
    /// `None` when the backend is disabled.
    base_url: Option<Url>,
    bucket: String,
    access_key_id: String,
    access_key_secret: String,
}

impl ObjectStoreBackend {
    pub fn new(settings: ObjectStoreSettings) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = settings.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        let base_url = if settings.enabled {
            Some(Url::parse(&normalize_endpoint(&settings.endpoint))?)
        } else {
            None
        };

        Ok(Self {
            client,
            base_url,
            bucket: settings.bucket,
            access_key_id: settings.access_key_id,
            access_key_secret: settings.access_key_secret,
        })
    }

    fn object_url(&self, key: &str) -> DriveResult<Url> {
        let Some(base) = self.base_url.as_ref() else {
            error!("object storage is disabled");
            return Err(DriveError::BackendDisabled);
        };
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| DriveError::UploadFailed(format!("endpoint `{}` cannot hold a path", base)))?
            .pop_if_empty()
            .push(&self.bucket)
            .extend(key.split('/'));
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.access_key_id, Some(&self.access_key_secret))
    }

    /// Send a streamed PUT, forwarding byte counts to `listener` in order.
    async fn put_file(
        &self,
        url: Url,
        source: &Path,
        listener: &dyn ProgressListener,
    ) -> Result<(), String> {
        let file = File::open(source).await.map_err(|e| e.to_string())?;
        let length = file.metadata().await.map_err(|e| e.to_string())?.len();

        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let body = ReaderStream::new(file).inspect(move |chunk| {
            if let Ok(chunk) = chunk {
                let _ = tx.send(chunk.len() as u64);
            }
        });

        let upload = self
            .request(reqwest::Method::PUT, url)
            .header(header::CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(body))
            .send();
        tokio::pin!(upload);

        let response = loop {
            tokio::select! {
                biased;
                Some(n) = rx.recv() => listener.on_event(ProgressEvent::BytesTransferred(n)),
                response = &mut upload => break response,
            }
        };
        while let Ok(n) = rx.try_recv() {
            listener.on_event(ProgressEvent::BytesTransferred(n));
        }

        let response = response.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    async fn store(&self, content: Bytes, destination: &str) -> DriveResult<String> {
        let key = object_key(destination);
        let url = self.object_url(&key)?;

        let response = self
            .request(reqwest::Method::PUT, url)
            .body(content)
            .send()
            .await
            .map_err(|err| {
                error!(
                    "failed to upload object: bucket={}, key={}, error={}",
                    self.bucket, key, err
                );
                DriveError::UploadFailed(err.to_string())
            })?;

        if !response.status().is_success() {
            error!(
                "object store rejected upload: bucket={}, key={}, status={}",
                self.bucket,
                key,
                response.status()
            );
            return Err(DriveError::UploadFailed(format!("HTTP {}", response.status())));
        }
        debug!("stored object {}/{}", self.bucket, key);
        Ok(key)
    }

    async fn store_with_progress(
        &self,
        source: &Path,
        destination: &str,
        declared_size: u64,
        listener: &dyn ProgressListener,
    ) -> DriveResult<String> {
        let key = object_key(destination);
        let url = match self.object_url(&key) {
            Ok(url) => url,
            Err(err) => {
                listener.on_event(ProgressEvent::Failed(err.to_string()));
                return Err(err);
            }
        };

        let is_file = tokio::fs::metadata(source)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            let err = DriveError::FileMissing(source.display().to_string());
            error!("{}", err);
            listener.on_event(ProgressEvent::Failed(err.to_string()));
            return Err(err);
        }

        info!(
            "uploading {} to {}/{} ({} bytes)",
            source.display(),
            self.bucket,
            key,
            declared_size
        );
        listener.on_event(ProgressEvent::ContentLength(declared_size));

        match self.put_file(url, source, listener).await {
            Ok(()) => {
                listener.on_event(ProgressEvent::Completed);
                Ok(key)
            }
            Err(message) => {
                error!(
                    "failed to upload object with progress: bucket={}, key={}, error={}",
                    self.bucket, key, message
                );
                let err = DriveError::UploadFailed(message);
                listener.on_event(ProgressEvent::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn retrieve(&self, object_key: &str) -> DriveResult<Bytes> {
        let url = self.object_url(object_key)?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|err| DriveError::DownloadFailed(err.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .bytes()
                .await
                .map_err(|err| DriveError::DownloadFailed(err.to_string())),
            StatusCode::NOT_FOUND => {
                error!("object not found: bucket={}, key={}", self.bucket, object_key);
                Err(DriveError::ObjectNotFound(object_key.to_string()))
            }
            status => Err(DriveError::DownloadFailed(format!("HTTP {}", status))),
        }
    }

    async fn remove(&self, object_key: &str) -> DriveResult<()> {
        let url = self.object_url(object_key)?;
        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .map_err(|err| DriveError::DeleteFailed(err.to_string()))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!("removed object {}/{} ({})", self.bucket, object_key, status);
            Ok(())
        } else {
            Err(DriveError::DeleteFailed(format!("HTTP {}", status)))
        }
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}
