use crate::config::GateConfig;
use crate::create_app;
use crate::session::{session_key, UserSession};
use crate::state::AppState;
use crate::store::StoreBackend;
use axum::body::Body;
use axum::Router;
use http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

/// Test fixture for setting up a complete test environment with a mocked OPA.
///
/// The fixture builds the application around an in-memory store, so tests
/// can seed browser sessions directly and inspect what the endpoints wrote.
///
/// # Examples
///
/// ```rust
/// #[tokio::test]
/// async fn test_endpoint() {
///     let fixture = TestFixture::new().await;
///     fixture.require_level("one_factor", 1).await;
///
///     let session_id = fixture.seed_session(&UserSession::default()).await;
///     let response = fixture.authorize_get("/api/oidc/authorize?...", Some(&session_id)).await;
///
///     response.assert_status(StatusCode::FOUND);
/// }
/// ```
pub struct TestFixture {
    /// The application router
    pub app: Router,
    /// Configuration the application was built with
    pub config: GateConfig,
    /// Shared state, used to reach the store
    pub state: AppState,
    /// Mock server for OPA
    pub opa_mock: MockServer,
}

impl TestFixture {
    /// Creates a new test fixture with an OPA mock server.
    pub async fn new() -> Self {
        Self::setup_logger(LevelFilter::Debug);

        let opa_mock = MockServer::start().await;
        let config = GateConfig::for_test_with_mocks(&opa_mock);
        let state = AppState::for_testing(&config);
        let app = create_app(state.clone()).await;

        Self {
            app,
            config,
            state,
            opa_mock,
        }
    }

    /// Initializes the test logger with customized settings.
    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    /// Makes OPA answer every level query with `level`
    pub async fn require_level(&self, level: &str, expected_calls: u64) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path(format!("/{}", self.config.policy.opa.policy_path)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"result": {"level": level}})),
            )
            .expect(expected_calls)
            .mount(&self.opa_mock)
            .await;
    }

    /// Makes every OPA level query fail
    pub async fn fail_policy(&self) {
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&self.opa_mock)
            .await;
    }

    /// Stores `session` and returns the id to send as cookie
    pub async fn seed_session(&self, session: &UserSession) -> String {
        let id = format!("test-session-{}", rand::random::<u32>());
        self.state
            .store
            .set(&session_key(&id), session)
            .await
            .expect("Failed to seed session");
        id
    }

    pub async fn load_session(&self, id: &str) -> Option<UserSession> {
        self.load(&session_key(id)).await
    }

    pub async fn load<T: DeserializeOwned + Send + Sync>(&self, key: &str) -> Option<T> {
        self.state.store.get(key).await.expect("Failed to read store")
    }

    /// Creates a request builder carrying the edge proxy headers and the session cookie.
    pub fn request_builder(
        &self,
        method: Method,
        uri: impl AsRef<str>,
        session_id: Option<&str>,
    ) -> http::request::Builder {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri.as_ref())
            .header("X-Forwarded-Proto", "https")
            .header("X-Forwarded-Host", "auth.example.com")
            .header("X-Forwarded-For", "10.0.0.7");

        if let Some(id) = session_id {
            builder = builder.header(COOKIE, format!("{}={id}", self.config.session.cookie_name));
        }
        builder
    }

    /// Sends a GET request without any proxy header or cookie
    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri.as_ref())
            .body(Body::empty())
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Navigates to the authorize endpoint as the browser would through the proxy
    pub async fn authorize_get(&self, uri: impl AsRef<str>, session_id: Option<&str>) -> TestResponse {
        let request = self
            .request_builder(Method::GET, uri, session_id)
            .body(Body::empty())
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Navigates to the authorize endpoint with exactly the given headers
    pub async fn authorize_get_with_headers(
        &self,
        uri: impl AsRef<str>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder().method(Method::GET).uri(uri.as_ref());
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::empty()).expect("Failed to build request");

        self.send(request).await
    }

    /// Replays a confirmed authorization request as a form post
    pub async fn authorize_post(
        &self,
        form: &[(&str, &str)],
        session_id: Option<&str>,
    ) -> TestResponse {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        let request = self
            .request_builder(Method::POST, crate::api::oidc::AUTHORIZE_PATH, session_id)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a request and returns a TestResponse.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body).into_owned();
        let json = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));

        TestResponse {
            status,
            headers,
            json,
            text,
        }
    }
}

/// Response from a test request
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Response body as JSON (if present and valid JSON)
    pub json: Value,
    /// Raw response body
    pub text: String,
}

impl TestResponse {
    /// Asserts that the response has the expected status code.
    ///
    /// # Panics
    ///
    /// Panics if the status code doesn't match the expected value.
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status, expected,
            "Expected status {} but got {} with body: {}",
            expected, self.status, self.text
        );
        self
    }

    /// Asserts that the response status is OK (200).
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    /// The `Location` header, if any
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// Session id of the cookie set by the response, if any
    pub fn session_cookie(&self) -> Option<String> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|cookie| cookie.split(';').next())
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == "gate_session")
            .map(|(_, value)| value.to_string())
    }
}
