//! Outbound RPC clients to recorder nodes and room servers (spec §6).
//!
//! JSON over an HTTP-like transport, mirroring the teacher's `AcClient`
//! shape (a `reqwest::Client` with configured timeouts, a typed request and
//! response per endpoint, status-code mapping to `RpcError`).

use common::error::RpcError;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;

/// Port allocation timeout (§4.5).
pub const ALLOCATE_PORTS_TIMEOUT: Duration = Duration::from_secs(5);
/// RTP forwarding setup / recorder start timeout (§4.5).
pub const SETUP_TIMEOUT: Duration = Duration::from_secs(15);
/// Stop-call timeout (§4.5).
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

fn map_status(status: StatusCode, body: String) -> RpcError {
    if status.is_server_error() {
        RpcError::ServerError {
            status: status.as_u16(),
            body,
        }
    } else {
        RpcError::ClientError {
            status: status.as_u16(),
            body,
        }
    }
}

async fn post_json<Req: Serialize + ?Sized, Resp: for<'de> Deserialize<'de>>(
    client: &Client,
    url: &str,
    body: &Req,
    timeout: Duration,
) -> Result<Resp, RpcError> {
    let response = client
        .post(url)
        .timeout(timeout)
        .json(body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                RpcError::Timeout(timeout)
            } else {
                RpcError::Transport(e.to_string())
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(map_status(status, text));
    }

    response
        .json()
        .await
        .map_err(|e| RpcError::Decode(e.to_string()))
}

async fn post_no_body<Req: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &Req,
    timeout: Duration,
) -> Result<(), RpcError> {
    let response = client
        .post(url)
        .timeout(timeout)
        .json(body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                RpcError::Timeout(timeout)
            } else {
                RpcError::Transport(e.to_string())
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(map_status(status, text));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct AllocatePortsRequest {
    count: u32,
}

#[derive(Debug, Deserialize)]
pub struct AllocatePortsResponse {
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RtpStreamWire {
    pub kind: String,
    pub port: u16,
    #[serde(rename = "payloadType")]
    pub payload_type: u8,
    pub ssrc: u32,
    #[serde(rename = "codecName")]
    pub codec_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerInfoWire {
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub authenticated: bool,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomInfoWire {
    #[serde(rename = "roomServerId")]
    pub room_server_id: String,
    #[serde(rename = "roomId")]
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingOptionsWire {
    pub quality: String,
    #[serde(rename = "containerFormat")]
    pub container_format: String,
    #[serde(rename = "includeAudio")]
    pub include_audio: bool,
    #[serde(rename = "includeVideo")]
    pub include_video: bool,
    #[serde(rename = "maxDurationSecs", skip_serializing_if = "Option::is_none")]
    pub max_duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartRecordingRequest {
    #[serde(rename = "jobId")]
    pub job_id: String,
    #[serde(rename = "peerInfo")]
    pub peer_info: PeerInfoWire,
    #[serde(rename = "rtpStreams")]
    pub rtp_streams: Vec<RtpStreamWire>,
    pub options: RecordingOptionsWire,
    #[serde(rename = "roomInfo")]
    pub room_info: RoomInfoWire,
    #[serde(rename = "orchestratorCallbackUrl")]
    pub orchestrator_callback_url: String,
}

#[derive(Debug, Serialize)]
struct JobIdOnlyRequest {
    #[serde(rename = "jobId")]
    job_id: String,
}

/// Client for the recorder-node RPC surface (§6).
#[derive(Clone)]
pub struct RecorderClient {
    client: Client,
}

impl RecorderClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    #[instrument(skip(self), fields(endpoint = %endpoint, count))]
    pub async fn allocate_ports(&self, endpoint: &str, count: u32) -> Result<Vec<u16>, RpcError> {
        let url = format!("{endpoint}/allocate-ports");
        let response: AllocatePortsResponse = post_json(
            &self.client,
            &url,
            &AllocatePortsRequest { count },
            ALLOCATE_PORTS_TIMEOUT,
        )
        .await?;
        Ok(response.ports)
    }

    #[instrument(skip(self, request), fields(endpoint = %endpoint, job_id = %request.job_id))]
    pub async fn start_recording(
        &self,
        endpoint: &str,
        request: &StartRecordingRequest,
    ) -> Result<(), RpcError> {
        let url = format!("{endpoint}/start-recording");
        post_no_body(&self.client, &url, request, SETUP_TIMEOUT).await
    }

    /// Must be idempotent server-side (§6); safe to call on an already-stopped job.
    #[instrument(skip(self), fields(endpoint = %endpoint, job_id = %job_id))]
    pub async fn stop_recording(&self, endpoint: &str, job_id: &str) -> Result<(), RpcError> {
        let url = format!("{endpoint}/stop-recording");
        post_no_body(
            &self.client,
            &url,
            &JobIdOnlyRequest {
                job_id: job_id.to_string(),
            },
            STOP_TIMEOUT,
        )
        .await
    }
}

impl Default for RecorderClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetNodeWire {
    pub ip: String,
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigureRtpForwardingRequest {
    #[serde(rename = "jobId")]
    pub job_id: String,
    #[serde(rename = "peerId")]
    pub peer_id: String,
    #[serde(rename = "targetNode")]
    pub target_node: TargetNodeWire,
    #[serde(rename = "rtpStreams")]
    pub rtp_streams: Vec<RtpStreamWire>,
}

/// Client for the room-server RPC surface (§6).
#[derive(Clone)]
pub struct RoomServerClient {
    client: Client,
}

impl RoomServerClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    #[instrument(skip(self, request), fields(endpoint = %endpoint, job_id = %request.job_id))]
    pub async fn configure_rtp_forwarding(
        &self,
        endpoint: &str,
        request: &ConfigureRtpForwardingRequest,
    ) -> Result<(), RpcError> {
        let url = format!("{endpoint}/configure-rtp-forwarding");
        post_no_body(&self.client, &url, request, SETUP_TIMEOUT).await
    }

    /// Must be idempotent server-side (§6).
    #[instrument(skip(self), fields(endpoint = %endpoint, job_id = %job_id))]
    pub async fn stop_rtp_forwarding(&self, endpoint: &str, job_id: &str) -> Result<(), RpcError> {
        let url = format!("{endpoint}/stop-rtp-forwarding");
        post_no_body(
            &self.client,
            &url,
            &JobIdOnlyRequest {
                job_id: job_id.to_string(),
            },
            STOP_TIMEOUT,
        )
        .await
    }
}

impl Default for RoomServerClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts the IP/host portion of a recorder endpoint URL, used to build
/// the RTP forwarding target (§4.5 step 3).
#[must_use]
pub fn extract_host(endpoint: &str) -> String {
    endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split(['/', ':'])
        .next()
        .unwrap_or(endpoint)
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn extract_host_strips_scheme_and_port() {
        assert_eq!(extract_host("http://recorder-1:9000"), "recorder-1");
        assert_eq!(extract_host("https://10.0.0.5:9443"), "10.0.0.5");
        assert_eq!(extract_host("recorder-1"), "recorder-1");
    }

    #[tokio::test]
    async fn allocate_ports_parses_response_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/allocate-ports"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ports": [5000, 5002],
            })))
            .mount(&server)
            .await;

        let client = RecorderClient::new();
        let ports = client
            .allocate_ports(&server.uri(), 2)
            .await
            .expect("allocate should succeed");
        assert_eq!(ports, vec![5000, 5002]);
    }

    #[tokio::test]
    async fn allocate_ports_maps_5xx_to_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/allocate-ports"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = RecorderClient::new();
        let err = client
            .allocate_ports(&server.uri(), 2)
            .await
            .expect_err("503 should surface as an error");
        assert!(matches!(err, RpcError::ServerError { status: 503, .. }));
    }

    #[tokio::test]
    async fn allocate_ports_maps_4xx_to_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/allocate-ports"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let client = RecorderClient::new();
        let err = client
            .allocate_ports(&server.uri(), 2)
            .await
            .expect_err("400 should surface as an error");
        assert!(matches!(err, RpcError::ClientError { status: 400, .. }));
    }

    #[tokio::test]
    async fn start_recording_succeeds_on_2xx_with_no_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/start-recording"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let client = RecorderClient::new();
        let request = StartRecordingRequest {
            job_id: "rec-1".to_string(),
            peer_info: PeerInfoWire {
                display_name: "alice".to_string(),
                authenticated: true,
                roles: vec![],
            },
            rtp_streams: vec![],
            options: RecordingOptionsWire {
                quality: "medium".to_string(),
                container_format: "mp4".to_string(),
                include_audio: true,
                include_video: false,
                max_duration_secs: None,
            },
            room_info: RoomInfoWire {
                room_server_id: "rs-1".to_string(),
                room_id: "room-1".to_string(),
            },
            orchestrator_callback_url: "http://orchestrator:8080/events/rec-1".to_string(),
        };

        client
            .start_recording(&server.uri(), &request)
            .await
            .expect("start-recording should succeed");
    }

    #[tokio::test]
    async fn stop_recording_is_idempotent_against_repeated_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stop-recording"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = RecorderClient::new();
        client
            .stop_recording(&server.uri(), "rec-1")
            .await
            .expect("first stop should succeed");
        client
            .stop_recording(&server.uri(), "rec-1")
            .await
            .expect("second stop should also succeed (server-side idempotent)");
    }

    #[tokio::test]
    async fn configure_rtp_forwarding_succeeds_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/configure-rtp-forwarding"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = RoomServerClient::new();
        let request = ConfigureRtpForwardingRequest {
            job_id: "rec-1".to_string(),
            peer_id: "peer-1".to_string(),
            target_node: TargetNodeWire {
                ip: "10.0.0.5".to_string(),
                ports: vec![5000, 5002],
            },
            rtp_streams: vec![],
        };

        client
            .configure_rtp_forwarding(&server.uri(), &request)
            .await
            .expect("configure should succeed");
    }

    #[tokio::test]
    async fn post_no_body_maps_timeout_to_rpc_error() {
        // Exercises the shared `post_no_body` timeout path directly with a
        // short deadline so the test doesn't have to wait out the real
        // (multi-second) §4.5 timeout constants.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stop-rtp-forwarding"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .mount(&server)
            .await;

        let client = Client::new();
        let url = format!("{}/stop-rtp-forwarding", server.uri());
        let err = post_no_body(
            &client,
            &url,
            &JobIdOnlyRequest {
                job_id: "rec-1".to_string(),
            },
            Duration::from_millis(20),
        )
        .await
        .expect_err("a 20ms deadline against a 200ms delay should time out");
        assert!(matches!(err, RpcError::Timeout(_)));
    }
}
