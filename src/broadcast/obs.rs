//! Broadcaster control over obs-websocket v5
//!
//! The controller only needs a handful of scene, input and output requests,
//! exposed through [`BroadcasterControl`]. [`ObsClient`] speaks the protocol
//! over a single WebSocket: Hello (op 0), Identify (op 1), Identified
//! (op 2), then Request (op 6) / RequestResponse (op 7) pairs. Events
//! (op 5) are ignored.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};

use super::types::{SourceSettings, StreamServiceSettings};
use crate::config::BroadcasterConfig;
use crate::error::{AppError, Result};

const RPC_VERSION: u64 = 1;

/// Input kind used for the relay source
const BROWSER_SOURCE_KIND: &str = "browser_source";

/// Operations the broadcast controller performs on the broadcaster
#[async_trait]
pub trait BroadcasterControl: Send {
    async fn scene_names(&mut self) -> Result<Vec<String>>;
    async fn create_scene(&mut self, scene: &str) -> Result<()>;
    async fn input_names(&mut self) -> Result<Vec<String>>;
    async fn remove_input(&mut self, input: &str) -> Result<()>;
    /// Create a browser source showing `settings.url` inside `scene`
    async fn create_browser_input(
        &mut self,
        scene: &str,
        input: &str,
        settings: &SourceSettings,
    ) -> Result<()>;
    async fn scene_item_names(&mut self, scene: &str) -> Result<Vec<String>>;
    async fn add_scene_item(&mut self, scene: &str, source: &str) -> Result<()>;
    async fn set_program_scene(&mut self, scene: &str) -> Result<()>;
    async fn output_active(&mut self) -> Result<bool>;
    async fn set_stream_service(&mut self, settings: &StreamServiceSettings) -> Result<()>;
    async fn start_output(&mut self) -> Result<()>;
    async fn stop_output(&mut self) -> Result<()>;
}

/// Opens control sessions
#[async_trait]
pub trait BroadcasterConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BroadcasterControl>>;
}

/// Connector for an obs-websocket server
pub struct ObsConnector {
    host: String,
    port: u16,
    password: Option<String>,
    timeout: Duration,
}

impl ObsConnector {
    pub fn new(config: &BroadcasterConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            password: config.password.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
        }
    }
}

#[async_trait]
impl BroadcasterConnector for ObsConnector {
    async fn connect(&self) -> Result<Box<dyn BroadcasterControl>> {
        let client =
            ObsClient::connect(&self.host, self.port, self.password.as_deref(), self.timeout)
                .await?;
        Ok(Box::new(client))
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct ObsClient {
    ws: WsStream,
    timeout: Duration,
}

impl ObsClient {
    /// Connect and complete the Hello/Identify handshake
    pub async fn connect(
        host: &str,
        port: u16,
        password: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let url = format!("ws://{}:{}", host, port);
        debug!("Connecting to broadcaster at {}", url);

        let (ws, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str()))
            .await
            .map_err(|_| AppError::Timeout(format!("connect to {}", url)))?
            .map_err(|e| AppError::BroadcasterUnavailable(format!("{}: {}", url, e)))?;

        let mut client = Self { ws, timeout };

        let hello = client.recv_op(0).await?;
        let mut identify = json!({ "rpcVersion": RPC_VERSION, "eventSubscriptions": 0 });
        if let Some(auth) = hello.get("authentication") {
            let password = password.ok_or_else(|| {
                AppError::Config("Broadcaster requires a password but none is configured".into())
            })?;
            let salt = auth.get("salt").and_then(Value::as_str).unwrap_or_default();
            let challenge = auth.get("challenge").and_then(Value::as_str).unwrap_or_default();
            identify["authentication"] = Value::String(auth_response(password, salt, challenge));
        }
        client.send(json!({ "op": 1, "d": identify })).await?;
        client.recv_op(2).await?;

        info!("Connected to broadcaster at {}", url);
        Ok(client)
    }

    async fn send(&mut self, message: Value) -> Result<()> {
        tokio::time::timeout(self.timeout, self.ws.send(Message::Text(message.to_string())))
            .await
            .map_err(|_| AppError::Timeout("broadcaster send".into()))?
            .map_err(|e| AppError::BroadcasterUnavailable(e.to_string()))
    }

    /// Wait for the next message with opcode `op`, returning its `d` payload
    async fn recv_op(&mut self, op: u64) -> Result<Value> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, self.ws.next())
                .await
                .map_err(|_| AppError::Timeout(format!("broadcaster op {}", op)))?;

            let text = match next {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    return Err(AppError::BroadcasterUnavailable(format!(
                        "connection closed: {:?}",
                        frame.map(|f| f.reason.to_string())
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(AppError::BroadcasterUnavailable(e.to_string())),
                None => {
                    return Err(AppError::BroadcasterUnavailable("connection closed".into()));
                }
            };

            let message: Value = serde_json::from_str(&text)?;
            if message.get("op").and_then(Value::as_u64) == Some(op) {
                return Ok(message.get("d").cloned().unwrap_or(Value::Null));
            }
        }
    }

    /// Issue a request and return its `responseData` (Null when absent)
    async fn request(&mut self, request_type: &str, data: Option<Value>) -> Result<Value> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut d = json!({ "requestType": request_type, "requestId": request_id });
        if let Some(data) = data {
            d["requestData"] = data;
        }
        self.send(json!({ "op": 6, "d": d })).await?;

        loop {
            let response = self.recv_op(7).await?;
            if response.get("requestId").and_then(Value::as_str) != Some(request_id.as_str()) {
                continue;
            }
            return parse_request_response(request_type, response);
        }
    }
}

/// obs-websocket authentication string
///
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{}{}", password, salt).as_bytes()));
    BASE64.encode(Sha256::digest(format!("{}{}", secret, challenge).as_bytes()))
}

fn parse_request_response(request_type: &str, response: Value) -> Result<Value> {
    let status = response.get("requestStatus").cloned().unwrap_or(Value::Null);
    if status.get("result").and_then(Value::as_bool) == Some(true) {
        return Ok(response.get("responseData").cloned().unwrap_or(Value::Null));
    }
    Err(AppError::BroadcasterRequest {
        request: request_type.to_string(),
        code: status.get("code").and_then(Value::as_i64).unwrap_or(0),
        reason: status
            .get("comment")
            .and_then(Value::as_str)
            .unwrap_or("no comment")
            .to_string(),
    })
}

fn names(data: &Value, list: &str, field: &str) -> Vec<String> {
    data.get(list)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(field).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl BroadcasterControl for ObsClient {
    async fn scene_names(&mut self) -> Result<Vec<String>> {
        let data = self.request("GetSceneList", None).await?;
        Ok(names(&data, "scenes", "sceneName"))
    }

    async fn create_scene(&mut self, scene: &str) -> Result<()> {
        self.request("CreateScene", Some(json!({ "sceneName": scene })))
            .await
            .map(|_| ())
    }

    async fn input_names(&mut self) -> Result<Vec<String>> {
        let data = self.request("GetInputList", None).await?;
        Ok(names(&data, "inputs", "inputName"))
    }

    async fn remove_input(&mut self, input: &str) -> Result<()> {
        self.request("RemoveInput", Some(json!({ "inputName": input })))
            .await
            .map(|_| ())
    }

    async fn create_browser_input(
        &mut self,
        scene: &str,
        input: &str,
        settings: &SourceSettings,
    ) -> Result<()> {
        let data = json!({
            "sceneName": scene,
            "inputName": input,
            "inputKind": BROWSER_SOURCE_KIND,
            "inputSettings": {
                "url": settings.url,
                "width": settings.width,
                "height": settings.height,
                "fps": settings.fps,
                "reroute_audio": false,
                "restart_when_active": true,
            },
            "sceneItemEnabled": true,
        });
        self.request("CreateInput", Some(data)).await.map(|_| ())
    }

    async fn scene_item_names(&mut self, scene: &str) -> Result<Vec<String>> {
        let data = self
            .request("GetSceneItemList", Some(json!({ "sceneName": scene })))
            .await?;
        Ok(names(&data, "sceneItems", "sourceName"))
    }

    async fn add_scene_item(&mut self, scene: &str, source: &str) -> Result<()> {
        self.request(
            "CreateSceneItem",
            Some(json!({ "sceneName": scene, "sourceName": source, "sceneItemEnabled": true })),
        )
        .await
        .map(|_| ())
    }

    async fn set_program_scene(&mut self, scene: &str) -> Result<()> {
        self.request("SetCurrentProgramScene", Some(json!({ "sceneName": scene })))
            .await
            .map(|_| ())
    }

    async fn output_active(&mut self) -> Result<bool> {
        let data = self.request("GetStreamStatus", None).await?;
        Ok(data
            .get("outputActive")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn set_stream_service(&mut self, settings: &StreamServiceSettings) -> Result<()> {
        let data = json!({
            "streamServiceType": "rtmp_custom",
            "streamServiceSettings": {
                "server": settings.server,
                "key": settings.key,
                "use_auth": false,
            },
        });
        self.request("SetStreamServiceSettings", Some(data))
            .await
            .map(|_| ())
    }

    async fn start_output(&mut self) -> Result<()> {
        self.request("StartStream", None).await.map(|_| ())
    }

    async fn stop_output(&mut self) -> Result<()> {
        self.request("StopStream", None).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_response_matches_protocol_example() {
        let auth = auth_response(
            "supersecretpassword",
            "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=",
            "+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY=",
        );
        assert_eq!(auth, "1Ct943GAT+6YQUUX47Ia/ncufilbe6+oD6lY+5kaCu4=");
    }

    #[test]
    fn test_request_failure_maps_status() {
        let response = json!({
            "requestType": "CreateScene",
            "requestId": "x",
            "requestStatus": { "result": false, "code": 601, "comment": "already exists" }
        });
        match parse_request_response("CreateScene", response) {
            Err(AppError::BroadcasterRequest { request, code, reason }) => {
                assert_eq!(request, "CreateScene");
                assert_eq!(code, 601);
                assert_eq!(reason, "already exists");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_scene_names_extracted() {
        let data = json!({ "scenes": [{ "sceneName": "A" }, { "sceneName": "B" }, {}] });
        assert_eq!(names(&data, "scenes", "sceneName"), vec!["A", "B"]);
        assert!(names(&Value::Null, "scenes", "sceneName").is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = ObsClient::connect("127.0.0.1", port, None, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(AppError::BroadcasterUnavailable(_))));
    }
}
