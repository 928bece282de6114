use crate::types::{
    DetectionLine, DetectionPolygon, SpeedLimit, VehicleRecord, PLACEHOLDER_LICENSE_TEXT,
};
use failure::{Error, Fail};
use log::{debug, error, warn};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Fail)]
pub enum BackendError {
    #[fail(display = "Request to {} failed: {}", endpoint, reason)]
    Transport { endpoint: String, reason: String },
    #[fail(display = "{} returned HTTP {}", endpoint, status)]
    Status { endpoint: String, status: u16 },
    #[fail(display = "{} returned a malformed body: {}", endpoint, reason)]
    Body { endpoint: String, reason: String },
}

#[derive(Deserialize)]
struct LicenseText {
    license_text: String,
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base: Url,
    token: Option<String>,
}

impl BackendClient {
    pub fn new(base: Url) -> Result<Self, Error> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(BackendClient {
            http,
            base,
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub async fn vehicles(&self) -> Result<Vec<VehicleRecord>, Error> {
        self.get_json("vehicles").await
    }

    pub async fn line(&self) -> Result<DetectionLine, Error> {
        self.get_json("get_line").await
    }

    pub async fn set_line(&self, line: &DetectionLine) -> Result<(), Error> {
        self.post_json("update_line", line).await.map(drop)
    }

    pub async fn polygon(&self) -> Result<DetectionPolygon, Error> {
        self.get_json("get_polygon").await
    }

    pub async fn set_polygon(&self, polygon: &DetectionPolygon) -> Result<(), Error> {
        self.post_json("update_polygon", polygon).await.map(drop)
    }

    pub async fn speed_limit(&self) -> Result<SpeedLimit, Error> {
        self.get_json("get_speed_limit").await
    }

    pub async fn set_speed_limit(&self, limit: &SpeedLimit) -> Result<(), Error> {
        self.post_json("update_speed_limit", limit).await.map(drop)
    }

    /// Recognized plate text for a vehicle. Never fails: any problem yields
    /// the placeholder text.
    pub async fn license_text(&self, vehicle_id: u64) -> String {
        let path = format!("get_license_text/{}", vehicle_id);
        match self.get_json::<LicenseText>(&path).await {
            Ok(body) if !body.license_text.trim().is_empty() => body.license_text,
            Ok(_) => PLACEHOLDER_LICENSE_TEXT.to_string(),
            Err(e) => {
                error!("Error fetching license text for vehicle {}: {}", vehicle_id, e);
                PLACEHOLDER_LICENSE_TEXT.to_string()
            }
        }
    }

    /// Adds an email address to the alert list; true iff the backend
    /// answered 201 Created.
    pub async fn subscribe(&self, email: &str) -> Result<bool, Error> {
        let response = self.send_post("subscribe", &json!({ "email": email })).await?;
        let created = response.status() == StatusCode::CREATED;
        if !created {
            let message = response.text().await.unwrap_or_default();
            warn!("Subscription for {} not created: {}", email, message);
        }
        Ok(created)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<String, Error> {
        let body = json!({ "username": username, "password": password });
        let response = self.post_json("auth/login", &body).await?;
        let token: AccessToken = decode("auth/login", response).await?;
        Ok(token.access_token)
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Value, Error> {
        let endpoint = "auth/register";
        let body = json!({ "username": username, "email": email, "password": password });
        let response = self.send_post(endpoint, &body).await?;
        let status = response.status();
        let value: Value = decode(endpoint, response).await?;
        if !status.is_success() {
            match value["message"].as_str() {
                Some(message) => bail!("Registration failed: {}", message),
                None => {
                    return Err(BackendError::Status {
                        endpoint: endpoint.to_string(),
                        status: status.as_u16(),
                    }
                    .into())
                }
            }
        }
        Ok(value)
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.base
            .join(path)
            .map_err(|e| format_err!("Bad endpoint path {}: {}", path, e))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let mut request = self.http.get(self.url(path)?);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        debug!("GET {}", path);
        let response = request.send().await.map_err(|e| transport(path, e))?;
        let response = check_status(path, response)?;
        decode(path, response).await
    }

    async fn post_json<B>(&self, path: &str, body: &B) -> Result<Response, Error>
    where
        B: Serialize + ?Sized,
    {
        let response = self.send_post(path, body).await?;
        check_status(path, response)
    }

    async fn send_post<B>(&self, path: &str, body: &B) -> Result<Response, Error>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.http.post(self.url(path)?).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        debug!("POST {}", path);
        Ok(request.send().await.map_err(|e| transport(path, e))?)
    }
}

fn transport(endpoint: &str, e: reqwest::Error) -> BackendError {
    let mut reason = e.to_string();
    let mut cause = std::error::Error::source(&e);
    while let Some(inner) = cause {
        reason = format!("{}: {}", reason, inner);
        cause = inner.source();
    }
    BackendError::Transport {
        endpoint: endpoint.to_string(),
        reason,
    }
}

fn check_status(endpoint: &str, response: Response) -> Result<Response, Error> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(BackendError::Status {
            endpoint: endpoint.to_string(),
            status: response.status().as_u16(),
        }
        .into())
    }
}

async fn decode<T: DeserializeOwned>(endpoint: &str, response: Response) -> Result<T, Error> {
    let bytes = response.bytes().await.map_err(|e| transport(endpoint, e))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        BackendError::Body {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
