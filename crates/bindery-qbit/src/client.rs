//! Session-aware qBittorrent client.
//!
//! # Design
//! - One `reqwest::Client` with a fixed request timeout.
//! - The `SID` session cookie is kept in memory and attached by hand; a 403
//!   triggers exactly one fresh login before the error surfaces.
//! - Without a configured username no login is attempted (qBittorrent's
//!   local auth bypass).

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bindery_config::AgentSettings;
use bindery_core::{AgentError, AgentResult, RemoteAgent, RemoteFile, RemoteStatus, TransferSource};
use reqwest::header::{COOKIE, HeaderMap, REFERER, SET_COOKIE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::wire::{FileEntry, TorrentInfo, magnet_hash};

/// Timeout applied to every request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const LOGIN_PATH: &str = "api/v2/auth/login";
const INFO_PATH: &str = "api/v2/torrents/info";
const FILES_PATH: &str = "api/v2/torrents/files";
const DELETE_PATH: &str = "api/v2/torrents/delete";
const ADD_PATH: &str = "api/v2/torrents/add";

struct Credentials {
    username: String,
    password: String,
}

/// Request description, rebuilt for each attempt.
struct Call<'a> {
    operation: &'static str,
    method: Method,
    path: &'static str,
    query: &'a [(&'static str, &'a str)],
    form: &'a [(&'static str, &'a str)],
}

/// [`RemoteAgent`] backed by the qBittorrent Web API v2.
pub struct QbitClient {
    http: Client,
    base: Url,
    credentials: Option<Credentials>,
    session: Mutex<Option<String>>,
}

impl fmt::Debug for QbitClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("QbitClient")
            .field("base", &self.base.as_str())
            .field(
                "username",
                &self.credentials.as_ref().map(|creds| creds.username.as_str()),
            )
            .finish_non_exhaustive()
    }
}

impl QbitClient {
    /// Build a client from resolved connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Unreachable`] when the HTTP client cannot be
    /// constructed.
    pub fn new(settings: &AgentSettings) -> AgentResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AgentError::unreachable("client.build", err))?;

        let mut base = settings.url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let credentials = settings.username.clone().map(|username| Credentials {
            username,
            password: settings.password.clone().unwrap_or_default(),
        });

        Ok(Self {
            http,
            base,
            credentials,
            session: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> AgentResult<Url> {
        self.base
            .join(path)
            .map_err(|_| AgentError::InvalidInput {
                field: "qbittorrent.url",
                reason: "cannot be used as an API base",
            })
    }

    /// Current session id, logging in first when none is held.
    async fn session_id(&self) -> AgentResult<Option<String>> {
        let Some(credentials) = &self.credentials else {
            return Ok(None);
        };
        let mut session = self.session.lock().await;
        if let Some(sid) = session.as_ref() {
            return Ok(Some(sid.clone()));
        }
        let sid = self.login(credentials).await?;
        *session = Some(sid.clone());
        Ok(Some(sid))
    }

    async fn invalidate(&self, stale: Option<&str>) {
        let mut session = self.session.lock().await;
        if session.as_deref() == stale {
            *session = None;
        }
    }

    async fn login(&self, credentials: &Credentials) -> AgentResult<String> {
        const OPERATION: &str = "auth.login";

        let response = self
            .http
            .post(self.endpoint(LOGIN_PATH)?)
            .header(REFERER, self.base.as_str())
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(|err| AgentError::unreachable(OPERATION, err))?;

        match response.status() {
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                return Err(AgentError::Authentication);
            }
            status if !status.is_success() => {
                return Err(AgentError::Status {
                    operation: OPERATION,
                    status: status.as_u16(),
                });
            }
            _ => {}
        }

        let sid = session_cookie(response.headers());
        let body = response
            .text()
            .await
            .map_err(|err| AgentError::unreachable(OPERATION, err))?;
        if body.trim() != "Ok." {
            return Err(AgentError::Authentication);
        }
        debug!(username = %credentials.username, "qbittorrent login succeeded");
        sid.ok_or_else(|| AgentError::Rejected {
            operation: OPERATION,
            detail: "login response carried no SID cookie".to_string(),
        })
    }

    async fn send(&self, call: &Call<'_>, sid: Option<&str>) -> AgentResult<Response> {
        let mut request = self
            .http
            .request(call.method.clone(), self.endpoint(call.path)?)
            .header(REFERER, self.base.as_str());
        if !call.query.is_empty() {
            request = request.query(call.query);
        }
        if !call.form.is_empty() {
            request = request.form(call.form);
        }
        if let Some(sid) = sid {
            request = request.header(COOKIE, format!("SID={sid}"));
        }
        request
            .send()
            .await
            .map_err(|err| AgentError::unreachable(call.operation, err))
    }

    async fn execute(&self, call: &Call<'_>) -> AgentResult<Response> {
        let mut retried = false;
        loop {
            let sid = self.session_id().await?;
            let response = self.send(call, sid.as_deref()).await?;
            if response.status() == StatusCode::FORBIDDEN
                && self.credentials.is_some()
                && !retried
            {
                debug!(operation = call.operation, "session rejected; logging in again");
                self.invalidate(sid.as_deref()).await;
                retried = true;
                continue;
            }
            return Ok(response);
        }
    }

    async fn torrent_info(&self, handle: &str) -> AgentResult<TorrentInfo> {
        let call = Call {
            operation: "torrents.info",
            method: Method::GET,
            path: INFO_PATH,
            query: &[("hashes", handle)],
            form: &[],
        };
        let response = self.execute(&call).await?;
        ensure_success(call.operation, handle, &response)?;
        let entries: Vec<TorrentInfo> = decode(call.operation, response).await?;
        entries
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::NotFound {
                handle: handle.to_string(),
            })
    }
}

#[async_trait]
impl RemoteAgent for QbitClient {
    async fn status(&self, handle: &str) -> AgentResult<RemoteStatus> {
        let info = self.torrent_info(handle).await?;
        Ok(RemoteStatus {
            state: info.state,
            progress: (info.progress * 100.0).clamp(0.0, 100.0),
        })
    }

    async fn files(&self, handle: &str) -> AgentResult<Vec<RemoteFile>> {
        let call = Call {
            operation: "torrents.files",
            method: Method::GET,
            path: FILES_PATH,
            query: &[("hash", handle)],
            form: &[],
        };
        let response = self.execute(&call).await?;
        ensure_success(call.operation, handle, &response)?;
        let entries: Vec<FileEntry> = decode(call.operation, response).await?;

        let info = self.torrent_info(handle).await?;
        let save_path = Path::new(&info.save_path);
        Ok(entries
            .into_iter()
            .map(|entry| RemoteFile {
                path: save_path.join(&entry.name),
                name: entry.name,
                size: entry.size,
            })
            .collect())
    }

    async fn delete(&self, handle: &str, delete_files: bool) -> AgentResult<()> {
        let call = Call {
            operation: "torrents.delete",
            method: Method::POST,
            path: DELETE_PATH,
            query: &[],
            form: &[
                ("hashes", handle),
                ("deleteFiles", if delete_files { "true" } else { "false" }),
            ],
        };
        let response = self.execute(&call).await?;
        ensure_success(call.operation, handle, &response)
    }

    async fn add(&self, source: TransferSource, category: Option<&str>) -> AgentResult<String> {
        let (link, handle) = match &source {
            TransferSource::Magnet(magnet) => {
                let handle = magnet_hash(magnet).ok_or(AgentError::InvalidInput {
                    field: "magnet",
                    reason: "missing urn:btih info-hash",
                })?;
                (magnet.as_str(), handle)
            }
            TransferSource::Url { url, handle } => {
                let handle = handle
                    .as_deref()
                    .map(str::trim)
                    .filter(|handle| !handle.is_empty())
                    .map(str::to_ascii_lowercase)
                    .ok_or(AgentError::InvalidInput {
                        field: "handle",
                        reason: "torrent URLs need a known info-hash",
                    })?;
                (url.as_str(), handle)
            }
        };

        let mut form = vec![("urls", link)];
        if let Some(category) = category.map(str::trim).filter(|value| !value.is_empty()) {
            form.push(("category", category));
        }
        let call = Call {
            operation: "torrents.add",
            method: Method::POST,
            path: ADD_PATH,
            query: &[],
            form: &form,
        };
        let response = self.execute(&call).await?;
        ensure_success(call.operation, &handle, &response)?;
        let body = response
            .text()
            .await
            .map_err(|err| AgentError::unreachable(call.operation, err))?;
        if body.trim() == "Fails." {
            warn!(handle = %handle, "qbittorrent refused the transfer");
            return Err(AgentError::Rejected {
                operation: call.operation,
                detail: body.trim().to_string(),
            });
        }
        Ok(handle)
    }
}

fn ensure_success(operation: &'static str, handle: &str, response: &Response) -> AgentResult<()> {
    match response.status() {
        status if status.is_success() => Ok(()),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Err(AgentError::Authentication),
        StatusCode::NOT_FOUND => Err(AgentError::NotFound {
            handle: handle.to_string(),
        }),
        status => Err(AgentError::Status {
            operation,
            status: status.as_u16(),
        }),
    }
}

async fn decode<T: DeserializeOwned>(operation: &'static str, response: Response) -> AgentResult<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|err| AgentError::unreachable(operation, err))?;
    serde_json::from_slice(&bytes).map_err(|err| AgentError::decode(operation, err))
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .find_map(|pair| pair.trim().strip_prefix("SID="))
        .filter(|sid| !sid.is_empty())
        .map(str::to_string)
}
