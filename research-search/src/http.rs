//! Shared HTTP client and failure classification for backend requests.
//!
//! Every adapter goes through [`get_text`], so transport errors and status
//! codes map to the same [`SearchError`] variants for all backends.

use crate::error::SearchError;

/// User-Agent sent when the configuration does not name one.
pub const DEFAULT_USER_AGENT: &str = concat!(
    "research-search/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/saorsa-labs/research-assistant)"
);

/// Build a [`reqwest::Client`] for backend API calls.
///
/// The client has no overall timeout of its own: per-attempt deadlines are
/// enforced by the resilience controller. Brotli and gzip decompression are
/// enabled.
///
/// # Errors
///
/// Returns [`SearchError::Http`] if the client cannot be constructed.
pub fn build_client(user_agent: Option<&str>) -> Result<reqwest::Client, SearchError> {
    reqwest::Client::builder()
        .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| SearchError::Http(format!("failed to build HTTP client: {e}")))
}

/// Classify a transport-level failure.
pub(crate) fn classify_transport(backend: &str, err: &reqwest::Error) -> SearchError {
    if err.is_timeout() {
        SearchError::Timeout(format!("{backend}: {err}"))
    } else if err.is_connect() || err.is_request() {
        SearchError::Unreachable(format!("{backend}: {err}"))
    } else if err.is_decode() || err.is_body() {
        SearchError::MalformedResponse(format!("{backend}: {err}"))
    } else {
        SearchError::Unreachable(format!("{backend}: {err}"))
    }
}

/// Classify a non-success HTTP status.
pub(crate) fn classify_status(backend: &str, status: reqwest::StatusCode) -> SearchError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        SearchError::RateLimited(format!("{backend}: HTTP {status}"))
    } else if status.is_server_error() {
        SearchError::Unreachable(format!("{backend}: HTTP {status}"))
    } else {
        SearchError::MalformedResponse(format!("{backend}: unexpected HTTP {status}"))
    }
}

/// Send a GET request and return the body text of a 2xx response.
pub(crate) async fn get_text(
    client: &reqwest::Client,
    backend: &str,
    url: &str,
    params: &[(&str, String)],
) -> Result<String, SearchError> {
    let response = client
        .get(url)
        .query(params)
        .send()
        .await
        .map_err(|e| classify_transport(backend, &e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(classify_status(backend, status));
    }

    let body = response
        .text()
        .await
        .map_err(|e| classify_transport(backend, &e))?;
    tracing::trace!(backend, bytes = body.len(), "backend response received");
    Ok(body)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use reqwest::StatusCode;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn build_client_with_defaults() {
        assert!(build_client(None).is_ok());
    }

    #[test]
    fn build_client_with_custom_ua() {
        assert!(build_client(Some("CustomBot/1.0")).is_ok());
    }

    #[test]
    fn default_user_agent_names_crate() {
        assert!(DEFAULT_USER_AGENT.starts_with("research-search/"));
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status("x", StatusCode::TOO_MANY_REQUESTS),
            SearchError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status("x", StatusCode::BAD_GATEWAY),
            SearchError::Unreachable(_)
        ));
        assert!(matches!(
            classify_status("x", StatusCode::NOT_FOUND),
            SearchError::MalformedResponse(_)
        ));
    }

    #[tokio::test]
    async fn get_text_returns_body_and_sends_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "rust lang"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let client = build_client(None).unwrap();
        let body = get_text(
            &client,
            "searx",
            &format!("{}/search", server.uri()),
            &[("q", "rust lang".to_string())],
        )
        .await
        .unwrap();
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn get_text_classifies_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = build_client(None).unwrap();
        let err = get_text(&client, "searx", &server.uri(), &[]).await.unwrap_err();
        assert!(matches!(err, SearchError::RateLimited(_)));
    }

    #[tokio::test]
    async fn get_text_classifies_server_error_as_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = build_client(None).unwrap();
        let err = get_text(&client, "searx", &server.uri(), &[]).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn get_text_classifies_refused_connection() {
        // Bind then drop a listener to obtain a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = build_client(None).unwrap();
        let err = get_text(&client, "searx", &format!("http://127.0.0.1:{port}/"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Unreachable(_)));
    }
}
