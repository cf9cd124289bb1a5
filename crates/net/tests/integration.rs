//! Integration tests for net crate

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hotload_errors::{Error, NetworkError, UserFacingError};
    use hotload_net::*;
    use httpmock::prelude::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn fast_client(retry_count: u32) -> NetClient {
        NetClient::new(NetConfig {
            retry_count,
            retry_delay: Duration::from_millis(1),
            ..NetConfig::default()
        })
        .unwrap()
    }

    /// Answer one request on a local socket with a raw `response`.
    async fn serve_once(response: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/red.manifest.hotload.json")
    }

    #[tokio::test]
    async fn test_download_returns_body() {
        let server = MockServer::start();
        let content = b"module bytes";
        let mock = server.mock(|when, then| {
            when.method(GET).path("/alpha.bin");
            then.status(200)
                .header("content-length", content.len().to_string())
                .body(content);
        });

        let client = fast_client(0);
        let body = client.download(&server.url("/alpha.bin"), &[], None).await.unwrap();

        mock.assert();
        assert_eq!(body, content);
    }

    #[tokio::test]
    async fn test_download_sends_request_headers() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/beta.bin")
                .header("cache-control", "no-store");
            then.status(200).body("ok");
        });

        let client = fast_client(0);
        let headers = vec![(
            CACHE_CONTROL_NO_STORE.0.to_string(),
            CACHE_CONTROL_NO_STORE.1.to_string(),
        )];
        client
            .download(&server.url("/beta.bin"), &headers, None)
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404);
        });

        let client = fast_client(3);
        let err = client.download(&server.url("/missing"), &[], None).await.unwrap_err();

        mock.assert_hits(1);
        assert!(matches!(
            err,
            Error::Network(NetworkError::HttpError { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/flaky");
            then.status(503);
        });

        let client = fast_client(2);
        let err = client.download(&server.url("/flaky"), &[], None).await.unwrap_err();

        mock.assert_hits(3);
        assert!(matches!(
            err,
            Error::Network(NetworkError::HttpError { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_announced_oversized_body_is_rejected_without_buffering() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 1099511627776\r\n\r\n{}".to_vec()).await;

        let err = fast_client(0)
            .download(&url, &[], Some(1024))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Network(NetworkError::ResponseTooLarge {
                size: 1_099_511_627_776,
                max: 1024,
                ..
            })
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_streamed_body_stops_at_limit() {
        let mut response = b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_vec();
        response.extend_from_slice(&[b'x'; 64]);
        let url = serve_once(response).await;

        let err = fast_client(0).download(&url, &[], Some(16)).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Network(NetworkError::ResponseTooLarge { max: 16, .. })
        ));
    }

    #[tokio::test]
    async fn test_body_within_limit_is_returned() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/small.bin");
            then.status(200).body("0123456789");
        });

        let body = fast_client(0)
            .download(&server.url("/small.bin"), &[], Some(10))
            .await
            .unwrap();
        assert_eq!(body, b"0123456789");
    }

    #[tokio::test]
    async fn test_invalid_url_fails_fast() {
        let client = fast_client(3);
        let err = client.download("not a url", &[], None).await.unwrap_err();
        assert!(matches!(err, Error::Network(NetworkError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_default_resolve_joins_links() {
        let client = fast_client(0);
        let resolved = client
            .resolve("https://example.com/app/red.manifest.hotload.json", "alpha.bin")
            .unwrap();
        assert_eq!(resolved, "https://example.com/app/alpha.bin");
    }
}
