use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::progress::single_transfer_progress;
use crate::transport::{AlbumStore, AlbumSummary, FileTransport, TransportError, UploadEntry};

/// How often the caller's thread checks on a request with no byte progress.
const PROGRESS_POLL: Duration = Duration::from_millis(100);

const DOWNLOAD_BUFFER: usize = 64 * 1024;

/// Every response body is wrapped as `{ "payload": ... }`.
#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    payload: T,
}

/// A media entry of an album as listed by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMedia {
    pub id: Value,
    pub path: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Blocking HTTP client for the album service.
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| http_error(e, config.base_url()))?;
        Ok(Self {
            http,
            base_url: config.base_url().to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn call<T: DeserializeOwned + Default>(
        &self,
        request: RequestBuilder,
        endpoint: &str,
    ) -> Result<T, TransportError> {
        tracing::debug!("Calling {}", endpoint);
        let response = request.send().map_err(|e| http_error(e, endpoint))?;
        let response = check_status(response, endpoint)?;
        let envelope: Envelope<T> = response.json().map_err(|e| http_error(e, endpoint))?;
        Ok(envelope.payload)
    }

    pub fn rename_album(&self, name: &str, new_name: &str) -> Result<Value, TransportError> {
        let endpoint = "/home/folders";
        let request = self
            .http
            .put(self.url(endpoint))
            .query(&[("name", name), ("newName", new_name)]);
        self.call(request, endpoint)
    }

    pub fn delete_album(&self, name: &str) -> Result<Value, TransportError> {
        let endpoint = "/home/folders";
        let request = self.http.delete(self.url(endpoint)).query(&[("name", name)]);
        self.call(request, endpoint)
    }

    /// Ask the server to re-index the media of an album.
    pub fn fix_album_media(&self, name: &str) -> Result<Value, TransportError> {
        let endpoint = "/home/fix_folders";
        let request = self.http.post(self.url(endpoint)).query(&[("folder", name)]);
        self.call(request, endpoint)
    }

    pub fn list_media(
        &self,
        album: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RemoteMedia>, TransportError> {
        let endpoint = "/folder/media";
        let request = self.http.get(self.url(endpoint)).query(&[
            ("folder", album.to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ]);
        self.call(request, endpoint)
    }

    pub fn delete_media(
        &self,
        media: &RemoteMedia,
        select_all: bool,
    ) -> Result<Value, TransportError> {
        let endpoint = "/folder/media";
        let request = self.http.delete(self.url(endpoint)).query(&[
            ("id", id_param(&media.id)),
            ("path", media.path.clone()),
            ("isSelectAll", select_all.to_string()),
        ]);
        self.call(request, endpoint)
    }

    /// Upload one file outside of a batch run.
    pub fn upload_media(
        &self,
        album: &str,
        entry: &UploadEntry,
        on_progress: &dyn Fn(u8),
    ) -> Result<(), TransportError> {
        let endpoint = "/folder/media/upload";
        let (tx, rx) = mpsc::channel();
        let (part, total) = file_part(entry, tx)?;
        let form = multipart::Form::new().part("file", part);
        let request = self
            .http
            .post(self.url(endpoint))
            .query(&[
                ("isVideo", entry.kind.is_video().to_string()),
                ("folder", album.to_string()),
                ("creationDate", entry.creation_date()),
            ])
            .multipart(form);

        let response = send_tracked(
            request,
            rx,
            total,
            &|loaded, total| on_progress(single_transfer_progress(loaded, total)),
            endpoint,
        )?;
        check_status(response, endpoint)?;
        on_progress(100);
        Ok(())
    }

    /// Download `remote_path` to `dest` through a `.part` file.
    ///
    /// When `captured_at` is given the file's modification time is set to it.
    /// Returns the number of bytes written.
    pub fn download_media(
        &self,
        remote_path: &str,
        dest: &Path,
        captured_at: Option<DateTime<Utc>>,
        on_progress: &dyn Fn(u8),
    ) -> Result<u64, TransportError> {
        let endpoint = format!("/media/{}", remote_path.trim_start_matches('/'));
        let response = self
            .http
            .get(self.url(&endpoint))
            .send()
            .map_err(|e| http_error(e, &endpoint))?;
        let mut response = check_status(response, &endpoint)?;
        let total = response.content_length().unwrap_or(0);

        let part = part_path(dest);
        let loaded = match copy_with_progress(&mut response, &part, total, on_progress) {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&part);
                return Err(e.into());
            }
        };
        fs::rename(&part, dest)?;

        if let Some(at) = captured_at {
            let ft = filetime::FileTime::from_unix_time(at.timestamp(), at.timestamp_subsec_nanos());
            filetime::set_file_mtime(dest, ft)?;
        }

        on_progress(100);
        tracing::debug!("Downloaded {} ({} bytes)", dest.display(), loaded);
        Ok(loaded)
    }
}

impl AlbumStore for ApiClient {
    /// The service answers with a falsy payload when it did not create the album.
    fn create_album(&self, name: &str) -> Result<(), TransportError> {
        let endpoint = "/home/folders";
        let request = self.http.post(self.url(endpoint)).query(&[("name", name)]);
        let payload: Value = self.call(request, endpoint)?;
        if is_truthy(&payload) {
            Ok(())
        } else {
            Err(TransportError::Rejected(format!(
                "album {} was not created",
                name
            )))
        }
    }

    fn list_albums(&self) -> Result<Vec<AlbumSummary>, TransportError> {
        let endpoint = "/home/folders";
        self.call(self.http.get(self.url(endpoint)), endpoint)
    }
}

impl FileTransport for ApiClient {
    fn send_batch(
        &self,
        album: &str,
        entries: &[UploadEntry],
        on_bytes: &dyn Fn(u64, u64),
    ) -> Result<(), TransportError> {
        let endpoint = "/folder/media/multiple_upload";
        let (tx, rx) = mpsc::channel();
        let mut form = multipart::Form::new();
        let mut total = 0u64;
        for entry in entries {
            let (part, len) = file_part(entry, tx.clone())?;
            total += len;
            form = form
                .part("files", part)
                .text("creationDates", entry.creation_date())
                .text("isVideoValues", entry.kind.is_video().to_string());
        }
        drop(tx);

        let request = self
            .http
            .post(self.url(endpoint))
            .query(&[("folder", album)])
            .multipart(form);
        let response = send_tracked(request, rx, total, on_bytes, endpoint)?;
        check_status(response, endpoint)?;
        on_bytes(total, total);
        Ok(())
    }
}

/// Counts bytes as reqwest pulls them from the file.
struct CountingReader<R> {
    inner: R,
    progress: Sender<u64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            let _ = self.progress.send(n as u64);
        }
        Ok(n)
    }
}

fn file_part(
    entry: &UploadEntry,
    progress: Sender<u64>,
) -> Result<(multipart::Part, u64), TransportError> {
    let file = File::open(&entry.local_path)?;
    let len = file.metadata()?.len();
    let reader = CountingReader {
        inner: file,
        progress,
    };
    let part = multipart::Part::reader_with_length(reader, len)
        .file_name(entry.display_name.clone())
        .mime_str(&entry.mime)
        .map_err(|e| http_error(e, "multipart"))?;
    Ok((part, len))
}

/// Send `request` on a scoped thread and relay byte counts to `on_bytes`
/// from the calling thread until the request body is consumed.
fn send_tracked(
    request: RequestBuilder,
    progress: Receiver<u64>,
    total: u64,
    on_bytes: &dyn Fn(u64, u64),
    endpoint: &str,
) -> Result<Response, TransportError> {
    std::thread::scope(|s| {
        let handle = s.spawn(move || request.send());
        let mut loaded = 0u64;
        loop {
            match progress.recv_timeout(PROGRESS_POLL) {
                Ok(n) => {
                    loaded = (loaded + n).min(total);
                    on_bytes(loaded, total);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if handle.is_finished() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        handle
            .join()
            .map_err(|_| TransportError::Interrupted)?
            .map_err(|e| http_error(e, endpoint))
    })
}

fn copy_with_progress(
    source: &mut impl Read,
    part: &Path,
    total: u64,
    on_progress: &dyn Fn(u8),
) -> io::Result<u64> {
    let mut out = BufWriter::new(File::create(part)?);
    let mut buf = vec![0u8; DOWNLOAD_BUFFER];
    let mut loaded = 0u64;
    loop {
        let n = source.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        loaded += n as u64;
        // Without a Content-Length only the final 100 is reported
        if total > 0 {
            on_progress(single_transfer_progress(loaded, total));
        }
    }
    out.flush()?;
    Ok(loaded)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn check_status(response: Response, endpoint: &str) -> Result<Response, TransportError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::HttpStatus {
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
        });
    }
    Ok(response)
}

fn http_error(source: reqwest::Error, endpoint: &str) -> TransportError {
    TransportError::Http {
        source,
        endpoint: endpoint.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn id_param(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
