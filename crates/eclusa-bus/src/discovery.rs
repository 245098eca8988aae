// ── Bus discovery ──
//
// The backend advertises where its event bus lives and which subjects it
// uses. Relative and HTTP-scheme URLs are resolved against the API base so
// a reverse proxy can front both on one origin.

use url::Url;

use crate::error::Error;
use crate::rest::{ApiClient, BusInfo};

impl BusInfo {
    /// Resolve the advertised bus URL into a `ws://` / `wss://` endpoint.
    pub fn websocket_url(&self, api_base: &Url) -> Result<Url, Error> {
        let mut url = match Url::parse(&self.url) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => api_base.join(&self.url)?,
            Err(e) => return Err(e.into()),
        };

        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            "ws" | "wss" => return Ok(url),
            other => {
                return Err(Error::Connect(format!(
                    "unsupported bus URL scheme '{other}'"
                )));
            }
        };

        url.set_scheme(scheme)
            .map_err(|()| Error::Connect(format!("cannot switch bus URL to {scheme}")))?;
        Ok(url)
    }
}

/// Query the backend and return the resolved bus endpoint together with
/// the advertised subject roles.
pub async fn discover(api: &ApiClient) -> Result<(Url, BusInfo), Error> {
    let info = api.bus_info().await?;
    let url = info.websocket_url(api.base_url())?;
    tracing::debug!(%url, roles = info.subjects.len(), "bus discovered");
    Ok((url, info))
}
