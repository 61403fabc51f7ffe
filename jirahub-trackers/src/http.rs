//! Blocking JSON-over-HTTP plumbing shared by both tracker clients.
//!
//! Every failure is classified into a [`TrackerError`] here, so the engine's
//! retry policy sees the same taxonomy regardless of the service.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;

use jirahub_core::{TrackerError, TrackerResult};

const TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("jirahub/", env!("CARGO_PKG_VERSION"));
/// Longest server message carried into an error.
const MAX_MESSAGE_LEN: usize = 300;

/// One service endpoint with fixed headers.
pub(crate) struct Http {
    agent: ureq::Agent,
    service: &'static str,
    base_url: String,
    authorization: Option<String>,
    accept: &'static str,
}

impl Http {
    pub fn new(
        service: &'static str,
        base_url: &str,
        authorization: Option<String>,
        accept: &'static str,
    ) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(TIMEOUT)
                .user_agent(USER_AGENT)
                .build(),
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization,
            accept,
        }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn has_credentials(&self) -> bool {
        self.authorization.is_some()
    }

    /// Absolute URL for `path`; absolute URLs (pagination links) pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Perform one request, mapping every non-2xx status to a [`TrackerError`].
    pub fn send(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> TrackerResult<ureq::Response> {
        let url = self.url(path);
        let mut request = self
            .agent
            .request(method, &url)
            .set("Accept", self.accept);
        if let Some(auth) = &self.authorization {
            request = request.set("Authorization", auth);
        }
        for (key, value) in query {
            request = request.query(key, value);
        }
        tracing::debug!(service = self.service, %method, %url, "request");
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        result.map_err(|err| self.classify(err))
    }

    pub fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> TrackerResult<T> {
        let response = self.send("GET", path, query, None)?;
        self.decode(response)
    }

    /// `GET` that turns 404 into `None`.
    pub fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> TrackerResult<Option<T>> {
        match self.get_json(path, query) {
            Ok(value) => Ok(Some(value)),
            Err(TrackerError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Send a JSON body, decoding the response. Empty responses decode as
    /// JSON `null`.
    pub fn send_json<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, String)],
        body: &Value,
    ) -> TrackerResult<T> {
        let response = self.send(method, path, query, Some(body))?;
        self.decode(response)
    }

    pub fn decode<T: DeserializeOwned>(&self, response: ureq::Response) -> TrackerResult<T> {
        let text = response
            .into_string()
            .map_err(|e| TrackerError::transient(self.service, format!("reading response: {e}")))?;
        let value: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| TrackerError::decode(self.service, e.to_string()))?
        };
        serde_json::from_value(value).map_err(|e| TrackerError::decode(self.service, e.to_string()))
    }

    fn classify(&self, err: ureq::Error) -> TrackerError {
        match err {
            ureq::Error::Status(status, response) => {
                let limited = response.header("x-ratelimit-remaining") == Some("0");
                let retry_after = retry_after(
                    response.header("retry-after"),
                    response.header("x-ratelimit-reset"),
                    Utc::now().timestamp(),
                );
                let message = response
                    .into_string()
                    .map(|body| error_message(&body))
                    .unwrap_or_default();
                // GitHub reports an exhausted rate limit as 403.
                let status = if status == 403 && limited { 429 } else { status };
                TrackerError::from_status(self.service, status, message, retry_after)
            }
            ureq::Error::Transport(transport) => {
                TrackerError::transient(self.service, transport.to_string())
            }
        }
    }
}

/// Server-requested delay: `Retry-After` seconds, or the rate-limit reset
/// epoch relative to `now`.
pub(crate) fn retry_after(header: Option<&str>, reset: Option<&str>, now: i64) -> Option<Duration> {
    if let Some(secs) = header.and_then(|h| h.trim().parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }
    let reset = reset?.trim().parse::<i64>().ok()?;
    Some(Duration::from_secs(reset.saturating_sub(now).max(1) as u64))
}

/// Human-readable part of an error body (GitHub `message`, JIRA
/// `errorMessages` and `errors`), falling back to the raw text.
pub(crate) fn error_message(body: &str) -> String {
    let message = match serde_json::from_str::<Value>(body) {
        Ok(json) => {
            let mut parts = Vec::new();
            if let Some(msg) = json.get("message").and_then(Value::as_str) {
                parts.push(msg.to_string());
            }
            if let Some(list) = json.get("errorMessages").and_then(Value::as_array) {
                parts.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
            }
            if let Some(map) = json.get("errors").and_then(Value::as_object) {
                parts.extend(
                    map.iter()
                        .map(|(field, msg)| format!("{field}: {}", msg.as_str().unwrap_or_default())),
                );
            }
            if parts.is_empty() {
                body.trim().to_string()
            } else {
                parts.join("; ")
            }
        }
        Err(_) => body.trim().to_string(),
    };
    truncate(message, MAX_MESSAGE_LEN)
}

fn truncate(mut text: String, max: usize) -> String {
    if text.chars().count() > max {
        text = text.chars().take(max).collect();
        text.push('…');
    }
    text
}

/// The `rel="next"` target of a GitHub `Link` header.
pub(crate) fn next_link(header: Option<&str>) -> Option<String> {
    header?.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == r#"rel="next""#)
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// One page of results and the cursor of the following page.
pub(crate) struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// Lazily walk pages starting at `first`. The stream ends after the first
/// error.
pub(crate) fn paginate<'a, T: 'a>(
    first: String,
    mut fetch: impl FnMut(&str) -> TrackerResult<Page<T>> + 'a,
) -> impl Iterator<Item = TrackerResult<T>> + 'a {
    let mut next = Some(first);
    let mut buffer = VecDeque::new();
    std::iter::from_fn(move || loop {
        if let Some(item) = buffer.pop_front() {
            return Some(Ok(item));
        }
        let cursor = next.take()?;
        match fetch(&cursor) {
            Ok(page) => {
                buffer.extend(page.items);
                next = page.next;
            }
            Err(err) => return Some(Err(err)),
        }
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn next_link_is_found_among_relations() {
        let header = r#"<https://api.github.com/repositories/1/issues?page=2>; rel="next", <https://api.github.com/repositories/1/issues?page=5>; rel="last""#;
        assert_eq!(
            next_link(Some(header)).as_deref(),
            Some("https://api.github.com/repositories/1/issues?page=2")
        );
        let last = r#"<https://api.github.com/x?page=1>; rel="prev""#;
        assert_eq!(next_link(Some(last)), None);
        assert_eq!(next_link(None), None);
    }

    #[rstest]
    #[case(Some("30"), None, Some(30))]
    #[case(None, Some("1000"), Some(100))]
    #[case(None, Some("800"), Some(1))]
    #[case(Some("soon"), None, None)]
    #[case(None, None, None)]
    fn retry_after_sources(
        #[case] header: Option<&str>,
        #[case] reset: Option<&str>,
        #[case] expected: Option<u64>,
    ) {
        assert_eq!(
            retry_after(header, reset, 900),
            expected.map(Duration::from_secs)
        );
    }

    #[test]
    fn error_messages_are_extracted() {
        assert_eq!(error_message(r#"{"message":"Bad credentials"}"#), "Bad credentials");
        assert_eq!(
            error_message(r#"{"errorMessages":["Issue does not exist"],"errors":{"summary":"required"}}"#),
            "Issue does not exist; summary: required"
        );
        assert_eq!(error_message("  gateway timeout "), "gateway timeout");
        assert!(error_message(&"x".repeat(1000)).chars().count() <= MAX_MESSAGE_LEN + 1);
    }

    #[test]
    fn pagination_is_lazy_and_stops_on_error() {
        let pages: Vec<_> = paginate("0".to_string(), |cursor| {
            match cursor {
                "0" => Ok(Page {
                    items: vec![1, 2],
                    next: Some("2".into()),
                }),
                "2" => Ok(Page {
                    items: vec![3],
                    next: Some("3".into()),
                }),
                _ => Err(TrackerError::transient("JIRA", "boom")),
            }
        })
        .collect();
        assert_eq!(pages.len(), 4);
        assert!(matches!(pages[2], Ok(3)));
        assert!(pages[3].is_err());

        let first: Vec<_> = paginate("0".to_string(), |_| {
            Ok(Page {
                items: vec!["a"],
                next: Some("again".into()),
            })
        })
        .take(3)
        .collect::<Result<_, _>>()
        .unwrap();
        assert_eq!(first, vec!["a", "a", "a"]);
    }
}
