//! HTTP access to the perceptual-model API.

use std::path::PathBuf;

use geojson::GeoJson;
use reqwest::{Client, Response};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{debug, instrument};

use crate::{
    error::{MapError, Result},
    model::{Feature, decode_collection, parse_collection},
};

/// Endpoint URLs derived from the API base.
#[derive(Clone, Debug)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    pub fn new(base: &str) -> Self {
        Self { base: base.trim_end_matches('/').to_string() }
    }

    pub fn perceptual_models_geojson(&self) -> String {
        format!("{}/perceptual_model/geojson", self.base)
    }

    pub fn perceptual_models(&self) -> String {
        format!("{}/perceptual_model/", self.base)
    }

    pub fn process_taxonomies(&self) -> String {
        format!("{}/process_taxonomy/process_taxonomies", self.base)
    }

    pub fn spatial_zones(&self) -> String {
        format!("{}/process_taxonomy/spatial_zones", self.base)
    }

    pub fn temporal_zones(&self) -> String {
        format!("{}/process_taxonomy/temporal_zones", self.base)
    }

    pub fn auth_login(&self) -> String {
        format!("{}/auth/jwt/login", self.base)
    }

    pub fn auth_logout(&self) -> String {
        format!("{}/auth/jwt/logout", self.base)
    }

    pub fn user_info(&self) -> String {
        format!("{}/users/me", self.base)
    }
}

/// Row of the plain model list; only the identity is read.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ModelSummary {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ProcessTaxonomyEntry {
    pub id: i64,
    #[serde(default)]
    pub process: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SpatialZoneEntry {
    pub id: i64,
    #[serde(default)]
    pub spatial_property: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TemporalZoneEntry {
    pub id: i64,
    #[serde(default)]
    pub temporal_property: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UserInfo {
    #[serde(default)]
    pub id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub is_superuser: bool,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

/// Where the feature collection comes from.
pub trait FeatureSource {
    fn fetch_features(&self) -> impl Future<Output = Result<Vec<Feature>>> + Send;
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    http: Client,
    endpoints: Endpoints,
}

impl ApiClient {
    pub fn new(http: Client, base: &str) -> Self {
        Self { http, endpoints: Endpoints::new(base) }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        let resp = self.http.get(&url).send().await?;
        let resp = check_status(&url, resp)?;
        Ok(resp.json().await?)
    }

    #[instrument(skip(self))]
    pub async fn fetch_geojson(&self) -> Result<GeoJson> {
        let url = self.endpoints.perceptual_models_geojson();
        let resp = check_status(&url, self.http.get(&url).send().await?)?;
        let bytes = resp.bytes().await?;
        debug!(bytes = bytes.len(), "dataset received");
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn perceptual_models(&self) -> Result<Vec<ModelSummary>> {
        self.get_json(self.endpoints.perceptual_models()).await
    }

    pub async fn process_taxonomies(&self) -> Result<Vec<ProcessTaxonomyEntry>> {
        self.get_json(self.endpoints.process_taxonomies()).await
    }

    pub async fn spatial_zones(&self) -> Result<Vec<SpatialZoneEntry>> {
        self.get_json(self.endpoints.spatial_zones()).await
    }

    pub async fn temporal_zones(&self) -> Result<Vec<TemporalZoneEntry>> {
        self.get_json(self.endpoints.temporal_zones()).await
    }

    /// Form-encoded login. A rejected login surfaces the server's `detail` text.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenResponse> {
        let url = self.endpoints.auth_login();
        let resp = self
            .http
            .post(&url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let detail = resp
                .json::<ErrorDetail>()
                .await
                .ok()
                .and_then(|e| e.detail)
                .map(|d| match d {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| format!("login rejected with status {status}"));
            return Err(MapError::Auth(detail));
        }
        Ok(resp.json().await?)
    }

    pub async fn logout(&self, token: Option<&str>) -> Result<()> {
        let url = self.endpoints.auth_logout();
        let mut req = self.http.post(&url);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        check_status(&url, req.send().await?)?;
        Ok(())
    }

    pub async fn current_user(&self, token: &str) -> Result<UserInfo> {
        let url = self.endpoints.user_info();
        let resp = self.http.get(&url).bearer_auth(token).send().await?;
        Ok(check_status(&url, resp)?.json().await?)
    }
}

impl FeatureSource for ApiClient {
    async fn fetch_features(&self) -> Result<Vec<Feature>> {
        decode_collection(self.fetch_geojson().await?)
    }
}

/// A FeatureCollection on disk, for offline use.
#[derive(Clone, Debug)]
pub struct LocalDataset {
    pub path: PathBuf,
}

impl FeatureSource for LocalDataset {
    async fn fetch_features(&self) -> Result<Vec<Feature>> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        parse_collection(&text)
    }
}

fn check_status(url: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(MapError::Status { endpoint: url.to_string(), status: status.as_u16() })
    }
}
