mod archive;
mod driver;
mod error;
mod http;
mod spec;

pub use archive::{build_tar, first_file_contents};
pub use driver::ContainerDriver;
pub use error::ContainerError;
pub use http::{HttpContainerDriver, INSPECTION_IMAGE};
pub use spec::{
    ContainerSpec, ContainerStatusFilter, ContainerSummary, ExecResult, ImageAuth, RuntimeInfo,
};

#[cfg(test)]
mod tests {
    use httptest::matchers::*;
    use httptest::responders::*;
    use httptest::Server;

    use super::*;

    #[tokio::test]
    async fn pull_sends_registry_auth_header() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(all_of![
                request::method("POST"),
                request::headers(contains(("x-registry-auth", matches(".+")))),
            ])
            .respond_with(status_code(200)),
        );
        let driver = HttpContainerDriver::new(server.url_str("").trim_end_matches('/')).unwrap();
        let auth = ImageAuth { username: "u".to_string(), password: "p".to_string() };
        driver.pull("busybox", Some(&auth)).await.unwrap();
    }

    #[tokio::test]
    async fn info_detects_native_nvidia_runtime() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(request::method_path("GET", "/info")).respond_with(json_encoded(
                serde_json::json!({"MemTotal": 17179869184u64, "NCPU": 8, "Runtimes": {"nvidia": {}}}),
            )),
        );
        let driver = HttpContainerDriver::new(server.url_str("").trim_end_matches('/')).unwrap();
        let info = driver.info().await.unwrap();
        assert_eq!(info.ram_mb, 16384);
        assert_eq!(info.cpus, 8);
        assert!(info.has_native_gpu_runtime);
    }

    #[tokio::test]
    async fn list_parses_container_summaries() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(request::method("GET")).respond_with(json_encoded(serde_json::json!([
                {"Id": "abc123", "Names": ["/batch-1"], "State": "exited"}
            ]))),
        );
        let driver = HttpContainerDriver::new(server.url_str("").trim_end_matches('/')).unwrap();
        let containers = driver.list(ContainerStatusFilter::Exited).await.unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "batch-1");
    }

    #[tokio::test]
    async fn logs_returns_stdout_for_an_exited_container() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(request::method_path("GET", "/containers/done/logs"))
                .respond_with(status_code(200).body(r#"{"state":"succeeded","returnCode":0,"executed":true}"#)),
        );
        let driver = HttpContainerDriver::new(server.url_str("").trim_end_matches('/')).unwrap();
        let (stdout, _stderr) = driver.logs("done").await.unwrap();
        assert!(stdout.contains("succeeded"));
    }

    #[tokio::test]
    async fn not_found_status_maps_to_not_found_error() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(request::method_path("POST", "/containers/missing/start"))
                .respond_with(status_code(404)),
        );
        let driver = HttpContainerDriver::new(server.url_str("").trim_end_matches('/')).unwrap();
        let err = driver.start("missing").await.unwrap_err();
        assert!(matches!(err, ContainerError::NotFound(_)));
    }
}
