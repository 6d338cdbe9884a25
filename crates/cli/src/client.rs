//! A thin HTTP client for the daemon's command and metrics endpoints.

use zoneward_api::{CommandEnvelope, DispatchResult};

const KID_HEADER: &str = "x-zoneward-kid";

pub struct Client {
    http: reqwest::Client,
    base_url: url::Url,
    kid: String,
}

impl Client {
    pub fn new(base_url: url::Url, kid: String) -> Self {
        Client {
            http: reqwest::Client::new(),
            base_url,
            kid,
        }
    }

    pub async fn dispatch(&self, command: String, zones: Vec<String>) -> reqwest::Result<DispatchResult> {
        let url = self.base_url.join("/command").expect("'/command' is a valid relative URL");
        self.http
            .post(url)
            .header(KID_HEADER, &self.kid)
            .json(&CommandEnvelope { command, zones })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub async fn metrics(&self) -> reqwest::Result<String> {
        let url = self.base_url.join("/metrics").expect("'/metrics' is a valid relative URL");
        self.http.get(url).send().await?.error_for_status()?.text().await
    }
}
