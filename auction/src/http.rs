use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::header::{CONTENT_ENCODING, HeaderValue};
use std::io::Write;

use crate::bidder::{CallPlan, ResponseData};
use crate::config::EndpointCompression;
use crate::errors::BidderError;

/// Executes a single bidder call and reads the full response body.
///
/// No deadline is applied here. Calls run inside the auction's task set and
/// are aborted by the dispatcher when the auction deadline passes; the
/// client's own connect timeout still applies.
pub async fn send_call(
    client: &reqwest::Client,
    plan: &CallPlan,
    compression: EndpointCompression,
) -> Result<ResponseData, BidderError> {
    let mut headers = plan.headers.clone();
    let body = match compression {
        EndpointCompression::None => plan.body.clone(),
        EndpointCompression::Gzip => {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            gzip(&plan.body).map_err(|e| BidderError::Build(format!("Failed to compress body: {e}")))?
        }
    };

    let response = client
        .request(plan.method.clone(), plan.uri.as_str())
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                BidderError::Timeout
            } else {
                BidderError::Transport(e.to_string())
            }
        })?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| BidderError::Transport(format!("Failed to read response body: {e}")))?;

    Ok(ResponseData {
        status,
        body,
        headers,
    })
}

pub(crate) fn gzip(data: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::testutils::{MockResponse, start_mock_server};
    use flate2::read::GzDecoder;
    use http::StatusCode;
    use std::io::Read;

    #[tokio::test]
    async fn test_send_call_returns_body() {
        let server = start_mock_server(|_| MockResponse::json(StatusCode::OK, b"{\"id\":\"r\"}")).await;
        let client = reqwest::Client::new();
        let plan = CallPlan::post_json("acme", server.url("/bid"), Bytes::from_static(b"{}"), vec![]);

        let response = send_call(&client, &plan, EndpointCompression::None).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], b"{\"id\":\"r\"}");

        let received = server.received().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].method, http::Method::POST);
        assert_eq!(received[0].path, "/bid");
        assert_eq!(&received[0].body[..], b"{}");
        assert_eq!(
            received[0].headers.get("x-openrtb-version").unwrap(),
            "2.5"
        );
    }

    #[tokio::test]
    async fn test_send_call_gzip() {
        let server = start_mock_server(|_| MockResponse::empty(StatusCode::NO_CONTENT)).await;
        let client = reqwest::Client::new();
        let payload = Bytes::from_static(b"{\"id\":\"compressed\"}");
        let plan = CallPlan::post_json("acme", server.url("/bid"), payload.clone(), vec![]);

        let response = send_call(&client, &plan, EndpointCompression::Gzip).await.unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);

        let received = server.received().await;
        assert_eq!(received[0].headers.get(CONTENT_ENCODING).unwrap(), "gzip");
        let mut decoded = Vec::new();
        GzDecoder::new(&received[0].body[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn test_send_call_connection_refused() {
        // Bind and drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = reqwest::Client::new();
        let plan = CallPlan::post_json(
            "acme",
            format!("http://127.0.0.1:{port}/bid"),
            Bytes::new(),
            vec![],
        );
        let result = send_call(&client, &plan, EndpointCompression::None).await;
        assert!(matches!(result, Err(BidderError::Transport(_))));
    }
}
