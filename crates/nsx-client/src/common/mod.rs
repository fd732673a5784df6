//! Common utilities for the NSX API client
//!
//! Provides the authenticated HTTP wrapper shared by all endpoints plus path
//! helpers.

pub mod path;

use crate::error::{ApiError, NsxError};
use crate::models::ListResult;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Prefix of the policy API
pub const POLICY_API: &str = "/policy/api/v1";

/// HTTP client wrapper with basic authentication
pub struct HttpClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, username: String, password: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Build a policy API URL for an NSX object path
    pub fn policy_url(&self, object_path: &str) -> String {
        self.build_url(&format!("{POLICY_API}{object_path}"))
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        let credentials = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {credentials}")
    }

    /// Map a non-success response into an error
    async fn check(response: Response, method: &str, url: &str) -> Result<Response, NsxError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let context = format!("{method} {url} failed: {status}");
        match status {
            StatusCode::NOT_FOUND => Err(NsxError::NotFound(format!("{context} - {body}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(NsxError::Authentication(format!("{context} - {body}")))
            }
            _ => Err(NsxError::Api(ApiError::from_response(status.as_u16(), &context, &body))),
        }
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, NsxError> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .send()
            .await?;

        let response = Self::check(response, "GET", url).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            NsxError::InvalidRequest(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Make a POST request and decode the response
    pub async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, NsxError> {
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        let response = Self::check(response, "POST", url).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request whose response body is ignored (actions)
    pub async fn post_action(&self, url: &str, body: &serde_json::Value) -> Result<(), NsxError> {
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        Self::check(response, "POST", url).await?;
        Ok(())
    }

    /// Make a PATCH request; NSX answers policy PATCHes with an empty body
    pub async fn patch(&self, url: &str, body: &serde_json::Value) -> Result<(), NsxError> {
        debug!("PATCH {}", url);

        let response = self
            .client
            .patch(url)
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        Self::check(response, "PATCH", url).await?;
        Ok(())
    }

    /// Make a DELETE request
    pub async fn delete(&self, url: &str) -> Result<(), NsxError> {
        debug!("DELETE {}", url);

        let response = self
            .client
            .delete(url)
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .send()
            .await?;

        Self::check(response, "DELETE", url).await?;
        Ok(())
    }

    /// Follow `cursor` until every page of a list endpoint has been read
    pub async fn fetch_all_pages<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, NsxError> {
        let mut all_results = Vec::new();
        let separator = if url.contains('?') { '&' } else { '?' };
        let mut cursor: Option<String> = None;

        loop {
            let page_url = match &cursor {
                Some(c) => format!("{url}{separator}cursor={}", urlencoding::encode(c)),
                None => url.to_string(),
            };
            let page: ListResult<T> = self.get(&page_url).await?;
            all_results.extend(page.results);

            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(all_results)
    }

    /// Run a policy search query across all pages
    pub async fn search<T: DeserializeOwned>(&self, query: &str) -> Result<Vec<T>, NsxError> {
        let url = self.build_url(&format!(
            "{POLICY_API}/search/query?query={}",
            urlencoding::encode(query)
        ));
        self.fetch_all_pages(&url).await
    }
}

/// Build a search query matching a resource type owned by a cluster
pub fn cluster_query(resource_type: &str, cluster: &str) -> String {
    format!(
        "resource_type:{resource_type} AND tags.scope:nsx-op\\/cluster AND tags.tag:{}",
        escape_query_value(cluster)
    )
}

/// Escape characters that are reserved in the search query language
pub fn escape_query_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '/' | ':' | '-' | '+' | '!' | '(' | ')' | '"' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpClient {
        HttpClient::new(Client::new(), "https://nsx.example.com/".to_string(), "admin".to_string(), "secret".to_string())
    }

    #[test]
    fn test_build_url_trims_trailing_slash() {
        let c = client();
        assert_eq!(c.base_url(), "https://nsx.example.com");
        assert_eq!(
            c.policy_url("/orgs/default/projects/p/vpcs/v"),
            "https://nsx.example.com/policy/api/v1/orgs/default/projects/p/vpcs/v"
        );
        assert_eq!(c.build_url("https://other/x"), "https://other/x");
    }

    #[test]
    fn test_auth_header_is_basic() {
        // "admin:secret"
        assert_eq!(client().auth_header(), "Basic YWRtaW46c2VjcmV0");
    }

    #[test]
    fn test_cluster_query_escapes_values() {
        assert_eq!(
            cluster_query("Vpc", "k8s-cl1"),
            "resource_type:Vpc AND tags.scope:nsx-op\\/cluster AND tags.tag:k8s\\-cl1"
        );
    }
}
