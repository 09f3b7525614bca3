mod client;
mod error;

pub use client::{BrokerClient, BrokerOutcome, BrokerStatus, SecretMap};
pub use error::BrokerError;

#[cfg(test)]
mod tests {
    use httptest::matchers::*;
    use httptest::responders::*;
    use httptest::Server;
    use maplit::hashmap;

    use super::*;

    #[tokio::test]
    async fn store_sends_basic_auth_and_json_body() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(all_of![
                request::method_path("POST", "/secrets"),
                request::headers(contains(("authorization", matches("^Basic ")))),
            ])
            .respond_with(status_code(200)),
        );
        let client = BrokerClient::new(server.url_str("").trim_end_matches('/'), "svc", "secret").unwrap();
        let secrets = hashmap! { "k1".to_string() => serde_json::json!({"password": "hunter2"}) };
        client.store(&secrets).await.unwrap();
    }

    #[tokio::test]
    async fn collect_parses_the_secrets_envelope() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(request::method_path("GET", "/secrets")).respond_with(json_encoded(
                serde_json::json!({"state": "ok", "secrets": {"k1": {"password": "hunter2"}}}),
            )),
        );
        let client = BrokerClient::new(server.url_str("").trim_end_matches('/'), "svc", "secret").unwrap();
        let secrets = client.collect(&["k1".to_string()]).await.unwrap();
        assert_eq!(secrets["k1"]["password"], "hunter2");
    }

    #[tokio::test]
    async fn collect_with_failed_state_is_classified_as_unavailable() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(request::method_path("GET", "/secrets")).respond_with(json_encoded(
                serde_json::json!({"state": "failed", "debug_info": "key not found"}),
            )),
        );
        let client = BrokerClient::new(server.url_str("").trim_end_matches('/'), "svc", "secret").unwrap();
        let err = client.collect(&["k1".to_string()]).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn server_error_is_classified_as_unavailable() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(request::method_path("GET", "/")).respond_with(status_code(503)),
        );
        let client = BrokerClient::new(server.url_str("").trim_end_matches('/'), "svc", "secret").unwrap();
        let err = client.inspect().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn inspect_with_failed_state_is_classified_as_unavailable() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(request::method_path("GET", "/")).respond_with(json_encoded(
                serde_json::json!({"state": "failed", "debug_info": "broker degraded"}),
            )),
        );
        let client = BrokerClient::new(server.url_str("").trim_end_matches('/'), "svc", "secret").unwrap();
        let err = client.inspect().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn bad_json_body_is_classified_as_malformed() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(request::method_path("GET", "/")).respond_with(
                httptest::responders::status_code(200).body("not json"),
            ),
        );
        let client = BrokerClient::new(server.url_str("").trim_end_matches('/'), "svc", "secret").unwrap();
        let err = client.inspect().await.unwrap_err();
        assert!(!err.is_transient());
    }
}
