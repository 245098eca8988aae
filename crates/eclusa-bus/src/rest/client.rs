// REST command client
//
// Wraps `reqwest::Client` with URL construction and error-body parsing for
// the SCADA backend. Only the calls the live-state engine needs live here:
// snapshot reads that seed reconcilers, the three imperative commands, and
// bus discovery.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::models::{BusInfo, ErrorResponse, FaultDto, PlcDto, TagDto, TagReadingDto, TagWriteRequest};
use crate::error::Error;
use crate::http::HttpConfig;

/// HTTP client for the backend's REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client for `base_url` (e.g. `https://scada.local:8080`).
    pub fn new(base_url: &str, config: &HttpConfig) -> Result<Self, Error> {
        let http = config.build_client()?;
        Self::from_reqwest(base_url, http)
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let mut base_url = Url::parse(base_url)?;
        let path = base_url.path().trim_end_matches('/').to_owned();
        base_url.set_path(&format!("{path}/"));
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Snapshot reads ───────────────────────────────────────────────

    /// `GET /api/faults[?activeOnly=true]`
    pub async fn list_faults(&self, active_only: bool) -> Result<Vec<FaultDto>, Error> {
        if active_only {
            self.get_with_params("api/faults", &[("activeOnly", "true".into())])
                .await
        } else {
            self.get("api/faults").await
        }
    }

    /// `GET /api/plcs/{plc_id}/tags`
    pub async fn list_tags(&self, plc_id: u64) -> Result<Vec<TagDto>, Error> {
        self.get(&format!("api/plcs/{plc_id}/tags")).await
    }

    /// `GET /api/plcs`
    pub async fn list_plcs(&self) -> Result<Vec<PlcDto>, Error> {
        self.get("api/plcs").await
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// `POST /api/faults/{id}/acknowledge`
    ///
    /// The backend answers immediately; the acknowledgement itself becomes
    /// visible when it is broadcast on the bus.
    pub async fn acknowledge_fault(&self, id: u64) -> Result<(), Error> {
        self.post_no_response(&format!("api/faults/{id}/acknowledge"), &serde_json::json!({}))
            .await
    }

    /// `PUT /api/tags/{tag_id}/value`
    pub async fn write_tag_value(&self, tag_id: u64, value: &serde_json::Value) -> Result<(), Error> {
        let url = self.url(&format!("api/tags/{tag_id}/value"))?;
        debug!("PUT {url}");

        let resp = self
            .http
            .put(url)
            .json(&TagWriteRequest { value })
            .send()
            .await?;
        self.handle_empty(resp).await
    }

    /// `GET /api/tags/{tag_id}/value`
    pub async fn read_tag_value(&self, tag_id: u64) -> Result<TagReadingDto, Error> {
        self.get(&format!("api/tags/{tag_id}/value")).await
    }

    // ── Discovery ────────────────────────────────────────────────────

    /// `GET /api/bus/info`
    pub async fn bus_info(&self) -> Result<BusInfo, Error> {
        self.get("api/bus/info").await
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        self.handle_response(resp).await
    }

    async fn get_with_params<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("GET {url} params={params:?}");

        let resp = self.http.get(url).query(params).send().await?;
        self.handle_response(resp).await
    }

    async fn post_no_response<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<(), Error> {
        let url = self.url(path)?;
        debug!("POST {url}");

        let resp = self.http.post(url).json(body).send().await?;
        self.handle_empty(resp).await
    }

    async fn handle_response<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            serde_json::from_str(&body).map_err(|e| {
                let preview: String = body.chars().take(200).collect();
                Error::Deserialization {
                    message: format!("{e} (body preview: {preview:?})"),
                    body,
                }
            })
        } else {
            Err(self.parse_error(status, resp).await)
        }
    }

    async fn handle_empty(&self, resp: reqwest::Response) -> Result<(), Error> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.parse_error(status, resp).await)
        }
    }

    async fn parse_error(&self, status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
        let raw = resp.text().await.unwrap_or_default();

        let message = serde_json::from_str::<ErrorResponse>(&raw)
            .ok()
            .and_then(|err| err.message)
            .unwrap_or_else(|| {
                if raw.is_empty() {
                    status.to_string()
                } else {
                    raw
                }
            });

        Error::Api {
            status: status.as_u16(),
            message,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let client = ApiClient::from_reqwest("http://scada.local:8080/backend", reqwest::Client::new())
            .unwrap();
        assert_eq!(client.base_url().as_str(), "http://scada.local:8080/backend/");
        assert_eq!(
            client.url("api/plcs").unwrap().as_str(),
            "http://scada.local:8080/backend/api/plcs"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(
            ApiClient::from_reqwest("not a url", reqwest::Client::new()),
            Err(Error::InvalidUrl(_))
        ));
    }
}
