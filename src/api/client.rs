use async_trait::async_trait;
use reqwest::Response;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::keys::CollectionQuery;
use super::transport::{ActionVerb, EnvToken, TokenSource, Transport};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::payload::ItemId;

/// REST transport for the admin API
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base: Url,
  tokens: Arc<dyn TokenSource>,
}

impl HttpTransport {
  pub fn new(base_url: &str, tokens: Arc<dyn TokenSource>) -> Result<Self> {
    let base = Url::parse(base_url)
      .map_err(|e| SyncError::Precondition(format!("invalid API URL {}: {}", base_url, e)))?;
    if base.cannot_be_a_base() {
      return Err(SyncError::Precondition(format!(
        "{} cannot be used as an API base URL",
        base_url
      )));
    }

    let client = reqwest::Client::builder()
      .user_agent(concat!("admin-sync/", env!("CARGO_PKG_VERSION")))
      .build()?;

    Ok(Self {
      client,
      base,
      tokens,
    })
  }

  /// Build a transport from the loaded configuration, reading the token
  /// from the configured environment variable.
  pub fn from_config(config: &Config) -> Result<Self> {
    Self::new(
      &config.api.url,
      Arc::new(EnvToken::new(config.api.token_env.clone())),
    )
  }

  /// Base URL with `segments` appended as path segments.
  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  fn collection_url(&self, query: &CollectionQuery) -> Url {
    let mut url = self.endpoint(&[query.resource.as_str()]);
    let search = query.search.trim();
    if !search.is_empty() {
      url.query_pairs_mut().append_pair("search", search);
    }
    url
  }

  fn action_url(&self, resource: &str, id: &ItemId, verb: ActionVerb) -> Url {
    match verb {
      ActionVerb::Delete => self.endpoint(&[resource, id.as_str()]),
      ActionVerb::Approve | ActionVerb::Cancel => {
        self.endpoint(&[resource, id.as_str(), verb.as_str()])
      }
    }
  }
}

/// Turn non-2xx responses into transport errors carrying the status code.
async fn check_status(response: Response) -> Result<Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let body = response.text().await.unwrap_or_default();
  let message = if body.trim().is_empty() {
    status
      .canonical_reason()
      .unwrap_or("request failed")
      .to_string()
  } else {
    body
  };
  Err(SyncError::http(status.as_u16(), message))
}

#[async_trait]
impl Transport for HttpTransport {
  async fn fetch(&self, query: &CollectionQuery) -> Result<Value> {
    let token = self.tokens.bearer()?;
    let url = self.collection_url(query);
    debug!("GET {}", url);

    let response = self.client.get(url).bearer_auth(token).send().await?;
    let payload = check_status(response).await?.json::<Value>().await?;
    Ok(payload)
  }

  async fn mutate(&self, resource: &str, id: &ItemId, verb: ActionVerb) -> Result<()> {
    let token = self.tokens.bearer()?;
    let url = self.action_url(resource, id, verb);

    let request = match verb {
      ActionVerb::Delete => self.client.delete(url.clone()),
      ActionVerb::Approve | ActionVerb::Cancel => self.client.post(url.clone()),
    };
    debug!("{} {}", verb, url);

    let response = request.bearer_auth(token).send().await?;
    check_status(response).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::StaticToken;
  use mockito::{Matcher, Server};
  use serde_json::json;

  fn transport(base: &str, token: Option<&str>) -> HttpTransport {
    HttpTransport::new(base, Arc::new(StaticToken(token.map(String::from)))).unwrap()
  }

  #[test]
  fn test_urls() {
    let t = transport("https://admin.example.com/api/v1/", Some("t"));

    let url = t.collection_url(&CollectionQuery::new("requests").with_search(" late fee "));
    assert_eq!(
      url.as_str(),
      "https://admin.example.com/api/v1/requests?search=late+fee"
    );

    let url = t.action_url("requests", &ItemId::from(12u64), ActionVerb::Approve);
    assert_eq!(url.as_str(), "https://admin.example.com/api/v1/requests/12/approve");

    let url = t.action_url("orders", &ItemId::from("a/b"), ActionVerb::Delete);
    assert_eq!(url.as_str(), "https://admin.example.com/api/v1/orders/a%2Fb");
  }

  #[test]
  fn test_rejects_bad_base_url() {
    let err = HttpTransport::new("not a url", Arc::new(StaticToken(None))).err();
    assert!(matches!(err, Some(SyncError::Precondition(_))));
  }

  #[tokio::test]
  async fn test_missing_token_fails_before_network() {
    // Nothing listens here; a network attempt would be a transport error
    let t = transport("http://127.0.0.1:9/", None);
    let err = t.fetch(&CollectionQuery::new("requests")).await.unwrap_err();
    assert!(matches!(err, SyncError::Precondition(_)));

    let err = t
      .mutate("requests", &ItemId::from(1u64), ActionVerb::Cancel)
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::Precondition(_)));
  }

  #[tokio::test]
  async fn test_fetch_sends_bearer_and_parses_payload() {
    let mut server = Server::new_async().await;
    let _m = server
      .mock("GET", "/requests")
      .match_header("authorization", "Bearer secret")
      .match_query(Matcher::UrlEncoded("search".into(), "refund".into()))
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"{"data":[{"id":1,"status":"pending"}]}"#)
      .create_async()
      .await;

    let t = transport(&server.url(), Some("secret"));
    let payload = t
      .fetch(&CollectionQuery::new("requests").with_search("refund"))
      .await
      .unwrap();

    assert_eq!(payload, json!({"data": [{"id": 1, "status": "pending"}]}));
  }

  #[tokio::test]
  async fn test_http_error_carries_status() {
    let mut server = Server::new_async().await;
    let _m = server
      .mock("POST", "/requests/7/approve")
      .with_status(409)
      .with_body("already processed")
      .create_async()
      .await;

    let t = transport(&server.url(), Some("secret"));
    let err = t
      .mutate("requests", &ItemId::from(7u64), ActionVerb::Approve)
      .await
      .unwrap_err();

    assert_eq!(err, SyncError::http(409, "already processed"));
  }

  #[tokio::test]
  async fn test_delete_uses_delete_method() {
    let mut server = Server::new_async().await;
    let m = server
      .mock("DELETE", "/orders/3")
      .with_status(204)
      .create_async()
      .await;

    let t = transport(&server.url(), Some("secret"));
    t.mutate("orders", &ItemId::from(3u64), ActionVerb::Delete)
      .await
      .unwrap();
    m.assert_async().await;
  }
}
