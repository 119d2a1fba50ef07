//! Read side of the catalog: the OMERO.web JSON API.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::domain::{DatasetRecord, EntityId, ImageRecord, ProjectRecord};
use crate::error::ImporterError;

const PAGE_LIMIT: usize = 200;

/// Security context returned by a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    pub user_id: i64,
    pub group_id: i64,
    pub session_uuid: String,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    data: String,
}

#[derive(Debug, Deserialize)]
struct ServersResponse {
    data: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    id: i64,
    host: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    #[serde(default)]
    success: bool,
    event_context: Option<EventContext>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    meta: Option<PageMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageMeta {
    total_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct NamedObject {
    #[serde(rename = "@id")]
    id: i64,
    #[serde(rename = "Name", default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Experimenter {
    #[serde(rename = "@id")]
    id: i64,
    #[serde(rename = "UserName", default)]
    user_name: String,
}

#[derive(Clone)]
pub struct WebClient {
    client: Client,
    base_url: String,
    csrf_token: Option<String>,
}

impl WebClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ImporterError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("omero-importer/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ImporterError::UnexpectedResponse(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|err| ImporterError::ServiceUnavailable(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            csrf_token: None,
        })
    }

    /// Logs in to the server registered as `host:port` and returns its event context.
    pub fn login(
        &mut self,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> Result<EventContext, ImporterError> {
        let token = self.csrf_token()?;
        let server = self.server_id(host, port)?;

        let url = format!("{}/api/v0/login/", self.base_url);
        let server = server.to_string();
        let response = self
            .client
            .post(&url)
            .header("X-CSRFToken", token)
            .header(REFERER, &url)
            .form(&[
                ("server", server.as_str()),
                ("username", username),
                ("password", password),
            ])
            .send()
            .map_err(map_transport_error)?;

        let status = response.status();
        let body: LoginResponse = response
            .json()
            .map_err(|err| ImporterError::UnexpectedResponse(err.to_string()))?;
        match body.event_context {
            Some(context) if body.success && status.is_success() => {
                tracing::debug!(user_id = context.user_id, group_id = context.group_id, "logged in");
                Ok(context)
            }
            _ => Err(ImporterError::AccessDenied(
                body.message
                    .unwrap_or_else(|| format!("login rejected with status {}", status.as_u16())),
            )),
        }
    }

    pub fn logout(&self) -> Result<(), ImporterError> {
        let url = format!("{}/webclient/logout/", self.base_url);
        let mut request = self.client.post(&url).header(REFERER, &url);
        if let Some(token) = &self.csrf_token {
            request = request.header("X-CSRFToken", token);
        }
        let response = request.send().map_err(map_transport_error)?;
        // logout answers with a redirect to the login page
        if response.status().is_success() || response.status().is_redirection() {
            return Ok(());
        }
        Self::handle_status(response).map(|_| ())
    }

    pub fn projects(&self) -> Result<Vec<ProjectRecord>, ImporterError> {
        Ok(self
            .paged::<NamedObject>("/api/v0/m/projects/")?
            .into_iter()
            .map(|object| ProjectRecord {
                id: EntityId::new(object.id),
                name: object.name,
            })
            .collect())
    }

    pub fn datasets(&self, project: EntityId) -> Result<Vec<DatasetRecord>, ImporterError> {
        Ok(self
            .paged::<NamedObject>(&format!("/api/v0/m/projects/{project}/datasets/"))?
            .into_iter()
            .map(|object| DatasetRecord {
                id: EntityId::new(object.id),
                name: object.name,
            })
            .collect())
    }

    pub fn images(&self, dataset: EntityId) -> Result<Vec<ImageRecord>, ImporterError> {
        Ok(self
            .paged::<NamedObject>(&format!("/api/v0/m/datasets/{dataset}/images/"))?
            .into_iter()
            .map(|object| ImageRecord {
                id: EntityId::new(object.id),
                name: object.name,
            })
            .collect())
    }

    pub fn experimenter_id(&self, name: &str) -> Result<Option<EntityId>, ImporterError> {
        Ok(self
            .paged::<Experimenter>("/api/v0/m/experimenters/")?
            .into_iter()
            .find(|user| user.user_name == name)
            .map(|user| EntityId::new(user.id)))
    }

    fn csrf_token(&mut self) -> Result<String, ImporterError> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let token: TokenResponse = self.get_json(&format!("{}/api/v0/token/", self.base_url))?;
        self.csrf_token = Some(token.data.clone());
        Ok(token.data)
    }

    fn server_id(&self, host: &str, port: u16) -> Result<i64, ImporterError> {
        let servers: ServersResponse =
            self.get_json(&format!("{}/api/v0/servers/", self.base_url))?;
        pick_server(&servers.data, host, port).ok_or_else(|| {
            ImporterError::ServiceUnavailable(format!(
                "{host}:{port} is not registered with OMERO.web at {}",
                self.base_url
            ))
        })
    }

    fn paged<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ImporterError> {
        let url = format!("{}{}", self.base_url, path);
        let mut items = Vec::new();
        let mut offset = 0usize;
        loop {
            let response = self
                .client
                .get(&url)
                .query(&[("limit", PAGE_LIMIT), ("offset", offset)])
                .send()
                .map_err(map_transport_error)?;
            let page: Page<T> = Self::handle_status(response)?
                .json()
                .map_err(|err| ImporterError::UnexpectedResponse(err.to_string()))?;

            let received = page.data.len();
            items.extend(page.data);
            offset += received;
            let total = page.meta.and_then(|meta| meta.total_count);
            let done = match total {
                Some(total) => offset >= total,
                None => received < PAGE_LIMIT,
            };
            if done || received == 0 {
                break;
            }
        }
        tracing::debug!(path, count = items.len(), "listed");
        Ok(items)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ImporterError> {
        let response = self.client.get(url).send().map_err(map_transport_error)?;
        Self::handle_status(response)?
            .json()
            .map_err(|err| ImporterError::UnexpectedResponse(err.to_string()))
    }

    fn handle_status(response: Response) -> Result<Response, ImporterError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .unwrap_or_else(|_| "OMERO.web request failed".to_string());
        Err(status_error(status, message))
    }
}

fn pick_server(servers: &[ServerEntry], host: &str, port: u16) -> Option<i64> {
    servers
        .iter()
        .find(|server| server.host == host && server.port == port)
        .or_else(|| match servers {
            // a single configured server is used whatever name the web tier knows it by
            [only] => Some(only),
            _ => None,
        })
        .map(|server| server.id)
}

fn status_error(status: StatusCode, message: String) -> ImporterError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ImporterError::AccessDenied(message),
        _ => ImporterError::ServiceStatus {
            status: status.as_u16(),
            message,
        },
    }
}

fn map_transport_error(err: reqwest::Error) -> ImporterError {
    ImporterError::ServiceUnavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn page_parses_web_api_objects() {
        let body = r#"{
            "data": [
                {"@id": 101, "@type": "http://www.openmicroscopy.org/Schemas/OME/2016-06#Project", "Name": "ProjA"},
                {"@id": 102, "Name": "ProjB"}
            ],
            "meta": {"offset": 0, "limit": 200, "maxLimit": 500, "totalCount": 2}
        }"#;
        let page: Page<NamedObject> = serde_json::from_str(body).unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0].id, 101);
        assert_eq!(page.data[1].name, "ProjB");
        assert_eq!(page.meta.unwrap().total_count, Some(2));
    }

    #[test]
    fn login_response_carries_event_context() {
        let body = r#"{
            "success": true,
            "eventContext": {"userId": 52, "groupId": 3, "sessionUuid": "abc-123", "userName": "root", "isAdmin": true}
        }"#;
        let login: LoginResponse = serde_json::from_str(body).unwrap();
        let context = login.event_context.unwrap();
        assert_eq!(context.user_id, 52);
        assert_eq!(context.session_uuid, "abc-123");
    }

    #[test]
    fn server_matches_host_and_port() {
        let servers = vec![
            ServerEntry {
                id: 1,
                host: "omero-a".to_string(),
                port: 4064,
            },
            ServerEntry {
                id: 2,
                host: "omero-b".to_string(),
                port: 4064,
            },
        ];
        assert_eq!(pick_server(&servers, "omero-b", 4064), Some(2));
        assert_eq!(pick_server(&servers, "localhost", 4064), None);
        assert_eq!(pick_server(&servers[..1], "localhost", 4064), Some(1));
    }

    #[test]
    fn auth_statuses_map_to_access_errors() {
        assert_matches!(
            status_error(StatusCode::FORBIDDEN, "no".to_string()),
            ImporterError::AccessDenied(_)
        );
        assert_matches!(
            status_error(StatusCode::BAD_GATEWAY, "down".to_string()),
            ImporterError::ServiceStatus { status: 502, .. }
        );
    }
}
