//! Client for the backup API: upload, download and list files stored under
//! a backup account.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::time::Duration;

use anyhow::{format_err, Result};
use chlorocrypt::{DecryptingReader, EncryptingReader};
use reqwest::header::{ACCEPT, CONTENT_LENGTH};
use reqwest::{Body, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{block_in_place, spawn_blocking};
use tracing::{debug, instrument};

use crate::access_url::AccessUrl;
use crate::util::{ok_or_retry, stream_body, BodyReader, RequestError, SharedReader};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Downloading large files may take a long time.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(3600 * 24);

#[must_use]
pub fn upload_timeout(upload_size: u64) -> Duration {
    // Assuming upload speed above 1 MB/s.
    DEFAULT_TIMEOUT.saturating_add(Duration::from_micros(upload_size))
}

/// Failures reported by the service itself, as opposed to transport errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("access denied, check the access url")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("method not allowed for this access url")]
    MethodNotAllowed,
}

/// A stored file as reported by the list endpoint. Times are unix
/// timestamps; `deletetime` is set once the file has been deleted but is
/// still retained.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub createtime: i64,
    pub deletetime: Option<i64>,
}

/// Reuse a created client or clone it in order to reuse a connection pool.
#[derive(Debug, Clone)]
pub struct BackupApi {
    reqwest: reqwest::Client,
    access_url: AccessUrl,
}

impl BackupApi {
    pub fn new(access_url: AccessUrl) -> Result<Self> {
        Ok(Self {
            reqwest: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()?,
            access_url,
        })
    }

    #[must_use]
    pub fn access_url(&self) -> &AccessUrl {
        &self.access_url
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(
            self.access_url.username(),
            Some(self.access_url.password_unmasked()),
        )
    }

    /// Uploads `file` as-is under `name`, overwriting any previous version.
    #[instrument(skip_all, fields(name))]
    pub async fn put(&self, name: &str, file: impl Read + Seek + Send + 'static) -> Result<()> {
        let file = SharedReader::new(file);
        let size = file.clone().seek(SeekFrom::End(0))?;
        let url = self.access_url.file_url(name)?;
        debug!(size, "uploading");
        ok_or_retry(|| async {
            let mut body = file.clone();
            body.rewind().map_err(RequestError::application)?;
            let response = self
                .authorized(self.reqwest.put(url.clone()))
                .timeout(upload_timeout(size))
                .header(CONTENT_LENGTH, size)
                .body(Body::wrap_stream(stream_body(body)))
                .send()
                .await
                .map_err(RequestError::transport)?;
            check_status(response, name)?;
            Ok(())
        })
        .await
    }

    /// Encrypts `file` with `passphrase` while uploading it under `name`.
    ///
    /// A retried attempt re-encrypts from the start with a fresh salt, so
    /// only the full plaintext length needs to be known in advance.
    #[instrument(skip_all, fields(name))]
    pub async fn put_encrypted(
        &self,
        name: &str,
        passphrase: &[u8],
        file: impl Read + Seek + Send + 'static,
    ) -> Result<()> {
        let file = SharedReader::new(file);
        let plain_len = file.clone().seek(SeekFrom::End(0))?;
        let size = chlorocrypt::encrypted_len(plain_len);
        let url = self.access_url.file_url(name)?;
        debug!(plain_len, size, "uploading encrypted");
        ok_or_retry(|| async {
            let mut source = file.clone();
            source.rewind().map_err(RequestError::application)?;
            let encryptor =
                EncryptingReader::new(source, passphrase).map_err(RequestError::application)?;
            let response = self
                .authorized(self.reqwest.put(url.clone()))
                .timeout(upload_timeout(size))
                .header(CONTENT_LENGTH, size)
                .body(Body::wrap_stream(stream_body(encryptor)))
                .send()
                .await
                .map_err(RequestError::transport)?;
            check_status(response, name)?;
            Ok(())
        })
        .await
    }

    /// Downloads the file stored under `name` into `sink`.
    #[instrument(skip_all, fields(name))]
    pub async fn get(&self, name: &str, mut sink: impl Write + Send) -> Result<()> {
        let mut response = self.send_get(name).await?;
        while let Some(chunk) = response.chunk().await? {
            block_in_place(|| sink.write_all(&chunk))?;
        }
        block_in_place(|| sink.flush())?;
        Ok(())
    }

    /// Downloads and decrypts the file stored under `name` into `sink`,
    /// verifying its integrity. Nothing is held back except the final
    /// cipher block, so `sink` may receive data from a stream that later
    /// turns out to be corrupt; the returned error reports it.
    #[instrument(skip_all, fields(name))]
    pub async fn get_encrypted(
        &self,
        name: &str,
        passphrase: &[u8],
        mut sink: impl Write + Send + 'static,
    ) -> Result<()> {
        let mut response = self.send_get(name).await?;
        let passphrase = passphrase.to_vec();
        let (tx, rx) = mpsc::channel(8);
        let writer = spawn_blocking(move || -> Result<()> {
            let body = BodyReader::new(rx);
            let mut decryptor = DecryptingReader::new(body, &passphrase)?;
            io::copy(&mut decryptor, &mut sink)?;
            sink.flush()?;
            Ok(())
        });
        let feed = async move {
            while let Some(chunk) = response.chunk().await? {
                if tx.send(Ok(chunk)).await.is_err() {
                    break; // writer bailed out, its error is reported below
                }
            }
            anyhow::Ok(())
        };
        let (feed_result, writer_result) = tokio::join!(feed, writer);
        // A transport failure comes first: the writer would only report the
        // resulting truncation.
        feed_result?;
        writer_result??;
        Ok(())
    }

    /// Lists all stored files, including deleted but still retained ones.
    #[instrument(skip_all)]
    pub async fn list(&self) -> Result<Vec<FileEntry>> {
        let url = self.access_url.endpoint().clone();
        ok_or_retry(|| async {
            let response = self
                .authorized(self.reqwest.get(url.clone()))
                .header(ACCEPT, "application/json")
                .send()
                .await
                .map_err(RequestError::transport)?;
            check_status(response, "/")?
                .json()
                .await
                .map_err(RequestError::transport)
        })
        .await
    }

    async fn send_get(&self, name: &str) -> Result<Response> {
        let url = self.access_url.file_url(name)?;
        ok_or_retry(|| async {
            let response = self
                .authorized(self.reqwest.get(url.clone()))
                .timeout(RESPONSE_TIMEOUT)
                .send()
                .await
                .map_err(RequestError::transport)?;
            check_status(response, name)
        })
        .await
    }
}

/// Maps HTTP failures to either a retryable transport error (5xx) or a
/// typed application error.
pub(crate) fn check_status(response: Response, name: &str) -> Result<Response, RequestError> {
    match response.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(RequestError::application(ApiError::Unauthorized))
        }
        StatusCode::NOT_FOUND => Err(RequestError::application(ApiError::NotFound(
            name.to_owned(),
        ))),
        StatusCode::METHOD_NOT_ALLOWED => {
            Err(RequestError::application(ApiError::MethodNotAllowed))
        }
        status if status.is_server_error() => Err(RequestError::transport(format_err!(
            "server returned {status}"
        ))),
        _ => response
            .error_for_status()
            .map_err(RequestError::application),
    }
}
