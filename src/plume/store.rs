// Plume - Gas and distance telemetry publisher
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::clock::Timestamp;
use crate::network::{DeviceIdentity, Network};
use hyper::client::HttpConnector;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Client, Method, Request, StatusCode, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{self, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Path segment under the device identity that all readings are written beneath.
pub const SENSOR_DATA: &str = "sensorData";
pub const FIELD_PPM: &str = "ppm";
pub const FIELD_DISTANCE_CM: &str = "distance_cm";

/// How long to wait for the database to respond to a write.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

const JSON_FORMAT: &str = "application/json";

/// Location of a single value in the store: `/{identity}/sensorData/{timestamp}/{field}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn new(identity: &DeviceIdentity, timestamp: &Timestamp, field: &str) -> Self {
        Self {
            segments: vec![
                identity.as_str().to_owned(),
                SENSOR_DATA.to_owned(),
                timestamp.as_str().to_owned(),
                field.to_owned(),
            ],
        }
    }

    /// Path with each segment percent-encoded so that it can be used in a URI.
    fn encoded(&self) -> String {
        self.segments.iter().fold(String::new(), |mut acc, s| {
            acc.push('/');
            acc.push_str(&percent_encode(s));
            acc
        })
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for s in &self.segments {
            write!(f, "/{}", s)?;
        }

        Ok(())
    }
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }

    out
}

#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum StoreErrorKind {
    Configuration,
    Encoding,
    Request,
    Status,
    Timeout,
}

impl StoreErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreErrorKind::Configuration => "configuration",
            StoreErrorKind::Encoding => "encoding",
            StoreErrorKind::Request => "request",
            StoreErrorKind::Status => "status",
            StoreErrorKind::Timeout => "timeout",
        }
    }
}

/// Error writing a value to the remote store
#[derive(Debug)]
pub enum StoreError {
    Status(u16, String),
    KindMsg(StoreErrorKind, &'static str),
    KindMsgCause(StoreErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::Status(_, _) => StoreErrorKind::Status,
            StoreError::KindMsg(kind, _) => *kind,
            StoreError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Status(code, reason) => write!(f, "unexpected status {}: {}", code, reason),
            StoreError::KindMsg(_, msg) => msg.fmt(f),
            StoreError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Remote keyed store that readings are published to.
///
/// Writes are independent of each other and not transactional.
pub trait Store {
    /// Return true if the store can currently accept writes.
    fn ready(&self) -> bool;
    fn write_integer(&mut self, path: &StorePath, value: i64) -> Result<(), StoreError>;
    fn write_float(&mut self, path: &StorePath, value: f64) -> Result<(), StoreError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Pick the most useful reason for a failed write: the `error` field that Firebase
/// includes in error responses, falling back to the HTTP status.
fn error_reason(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown error").to_owned())
}

fn request_uri(base: &str, path: &StorePath, auth: Option<&str>) -> Result<Uri, StoreError> {
    let mut uri = format!("{}{}.json", base.trim_end_matches('/'), path.encoded());
    if let Some(token) = auth {
        uri.push_str("?auth=");
        uri.push_str(&percent_encode(token));
    }

    uri.parse::<Uri>().map_err(|e| {
        StoreError::KindMsgCause(StoreErrorKind::Configuration, "unable to build request URI", Box::new(e))
    })
}

/// Firebase Realtime Database accessed via its REST API.
///
/// Values are written with `PUT {url}/{path}.json`. Writes block the calling thread
/// until the database responds or `RESPONSE_TIMEOUT` elapses, so this must be used from
/// a thread that is not driving the tokio runtime (e.g. via `spawn_blocking`).
pub struct RealtimeDatabase {
    client: Client<HttpsConnector<HttpConnector>>,
    runtime: Handle,
    network: Arc<dyn Network + Send + Sync + 'static>,
    base_url: String,
    auth: Option<String>,
    timeout: Duration,
}

impl RealtimeDatabase {
    /// Create a new client for the database at `base_url`, e.g. `https://example-default-rtdb.firebaseio.com`.
    ///
    /// `auth` is an already issued ID token or database secret appended to each request,
    /// if any. Obtaining or refreshing it is not handled here.
    pub fn new(
        base_url: &str,
        auth: Option<String>,
        network: Arc<dyn Network + Send + Sync + 'static>,
        runtime: Handle,
    ) -> Result<Self, StoreError> {
        let uri = base_url.parse::<Uri>().map_err(|e| {
            StoreError::KindMsgCause(StoreErrorKind::Configuration, "invalid database URL", Box::new(e))
        })?;

        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => {
                return Err(StoreError::KindMsg(
                    StoreErrorKind::Configuration,
                    "database URL must be http or https",
                ))
            }
        }

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();

        Ok(Self {
            client: Client::builder().build(connector),
            runtime,
            network,
            base_url: base_url.to_owned(),
            auth,
            timeout: RESPONSE_TIMEOUT,
        })
    }

    fn put<T: Serialize>(&self, path: &StorePath, value: &T) -> Result<(), StoreError> {
        let uri = request_uri(&self.base_url, path, self.auth.as_deref())?;
        let body = serde_json::to_vec(value).map_err(|e| {
            StoreError::KindMsgCause(StoreErrorKind::Encoding, "unable to encode value", Box::new(e))
        })?;

        let req = Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header(CONTENT_TYPE, JSON_FORMAT)
            .body(Body::from(body))
            .map_err(|e| StoreError::KindMsgCause(StoreErrorKind::Request, "unable to build request", Box::new(e)))?;

        let client = self.client.clone();
        let timeout = self.timeout;
        let res = self.runtime.block_on(async move {
            tokio::time::timeout(timeout, async move {
                let res = client.request(req).await?;
                let status = res.status();
                let body = hyper::body::to_bytes(res.into_body()).await?;
                Ok::<_, hyper::Error>((status, body))
            })
            .await
        });

        match res {
            Err(_) => Err(StoreError::KindMsg(
                StoreErrorKind::Timeout,
                "timeout waiting for database response",
            )),
            Ok(Err(e)) => Err(StoreError::KindMsgCause(
                StoreErrorKind::Request,
                "unable to write to database",
                Box::new(e),
            )),
            Ok(Ok((status, _))) if status.is_success() => {
                tracing::debug!(message = "wrote value to database", path = %path, status = status.as_u16());
                Ok(())
            }
            Ok(Ok((status, body))) => Err(StoreError::Status(status.as_u16(), error_reason(status, &body))),
        }
    }
}

impl Store for RealtimeDatabase {
    fn ready(&self) -> bool {
        self.network.is_connected()
    }

    fn write_integer(&mut self, path: &StorePath, value: i64) -> Result<(), StoreError> {
        self.put(path, &value)
    }

    fn write_float(&mut self, path: &StorePath, value: f64) -> Result<(), StoreError> {
        self.put(path, &value)
    }
}

impl fmt::Debug for RealtimeDatabase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeDatabase")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}
