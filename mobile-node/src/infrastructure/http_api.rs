//! HTTP API and gateway served with axum.
//!
//! Which handlers are mounted on a listener is decided by its
//! [`ServeOption`] list. Content retrieval is not part of this node, so
//! gateway paths answer reads with 501 and reject writes on read-only
//! gateways with 405.

use crate::application_service::mobile::WEBUI_PATH;
use crate::infrastructure::behaviour::{AGENT_VERSION, IDENTIFY_PROTOCOL};
use crate::port::http::{HttpServer, ServeListener, ServeOption, ServeSocket};
use crate::port::node::CoreNode;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::Engine;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const AGENT_PREFIX: &str = "mobile-node/";

/// Default [`HttpServer`]: one axum server per listener.
#[derive(Debug, Default, Clone, Copy)]
pub struct AxumHttpServer;

#[async_trait]
impl HttpServer for AxumHttpServer {
    async fn serve(
        &self,
        node: Arc<dyn CoreNode>,
        listener: ServeListener,
        options: Vec<ServeOption>,
    ) -> Result<()> {
        let router = create_router(node, &options);
        let ServeListener {
            socket,
            addr,
            shutdown,
        } = listener;
        info!("Serving HTTP on {}", addr);

        match socket {
            ServeSocket::Tcp(listener) => axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .with_context(|| format!("HTTP server on {} failed", addr))?,
            #[cfg(unix)]
            ServeSocket::Unix(listener) => axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .with_context(|| format!("HTTP server on {} failed", addr))?,
        }

        debug!("Stopped serving HTTP on {}", addr);
        Ok(())
    }
}

// ============================================================================
// Router
// ============================================================================

#[derive(Debug, Clone)]
struct GatewayMount {
    prefix: String,
    writable: bool,
}

#[derive(Debug, Default)]
struct GatewayConfig {
    mounts: Vec<GatewayMount>,
    hostname: bool,
}

impl GatewayConfig {
    /// Longest mounted prefix covering `path`.
    fn mount_for(&self, path: &str) -> Option<&GatewayMount> {
        self.mounts
            .iter()
            .filter(|m| {
                path == m.prefix
                    || path
                        .strip_prefix(m.prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|m| m.prefix.len())
    }
}

struct ApiState {
    node: Arc<dyn CoreNode>,
    gateway: GatewayConfig,
}

type AppState = Arc<ApiState>;

/// Build the router for one listener.
pub fn create_router(node: Arc<dyn CoreNode>, options: &[ServeOption]) -> Router {
    let mut router: Router<AppState> = Router::new();
    let mut gateway = GatewayConfig::default();
    let (mut webui, mut commands, mut version, mut check_version) = (false, false, false, false);

    for option in options {
        match option {
            ServeOption::WebUi if !webui => {
                webui = true;
                router = router.route("/webui", get(webui_redirect));
            }
            ServeOption::Commands if !commands => {
                commands = true;
                router = router
                    .route("/api/v0/id", get(id).post(id))
                    .route("/api/v0/version", get(api_version).post(api_version))
                    .route("/api/v0/swarm/peers", get(swarm_peers).post(swarm_peers));
            }
            ServeOption::Version if !version => {
                version = true;
                router = router.route("/version", get(version_text));
            }
            ServeOption::Gateway { paths, writable } => {
                gateway.mounts.extend(paths.iter().map(|path| GatewayMount {
                    prefix: path.trim_end_matches('/').to_string(),
                    writable: *writable,
                }));
            }
            ServeOption::Hostname => gateway.hostname = true,
            ServeOption::CheckVersion => check_version = true,
            _ => {}
        }
    }

    let state = Arc::new(ApiState { node, gateway });
    let router = router.fallback(gateway_handler).with_state(state);
    if check_version {
        router.layer(middleware::from_fn(check_client_version))
    } else {
        router
    }
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IdResponse {
    #[serde(rename = "ID")]
    pub id: String,
    pub public_key: String,
    pub addresses: Vec<String>,
    pub agent_version: String,
    pub protocol_version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionResponse {
    pub version: String,
    pub system: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SwarmPeer {
    pub peer: String,
    pub addr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SwarmPeersResponse {
    pub peers: Vec<SwarmPeer>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorResponse {
    pub message: String,
    pub code: u16,
    #[serde(rename = "Type")]
    pub kind: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            message: message.into(),
            code: status.as_u16(),
            kind: "error".to_string(),
        }),
    )
        .into_response()
}

fn system() -> String {
    format!("{}/{}", std::env::consts::ARCH, std::env::consts::OS)
}

// ============================================================================
// Handlers
// ============================================================================

async fn webui_redirect() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, WEBUI_PATH)])
}

/// Identity of the local node.
async fn id(State(state): State<AppState>) -> Response {
    let peer = state.node.peer_id();
    let host = state.node.peer_host();

    let addrs = match host.listen_addrs().await {
        Ok(addrs) => addrs,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let public_key = host
        .peerstore()
        .private_key(&peer)
        .map(|key| base64::engine::general_purpose::STANDARD.encode(key.public().encode_protobuf()))
        .unwrap_or_default();

    Json(IdResponse {
        id: peer.to_string(),
        public_key,
        addresses: addrs
            .iter()
            .map(|addr| format!("{}/p2p/{}", addr, peer))
            .collect(),
        agent_version: AGENT_VERSION.to_string(),
        protocol_version: IDENTIFY_PROTOCOL.to_string(),
    })
    .into_response()
}

async fn api_version() -> impl IntoResponse {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        system: system(),
    })
}

/// Peers with an open connection.
async fn swarm_peers(State(state): State<AppState>) -> Response {
    let host = state.node.peer_host();
    match host.connected_peers().await {
        Ok(peers) => {
            let peerstore = host.peerstore();
            let peers = peers
                .into_iter()
                .map(|peer| SwarmPeer {
                    addr: peerstore
                        .addrs(&peer)
                        .first()
                        .map(|a| a.to_string())
                        .unwrap_or_default(),
                    peer: peer.to_string(),
                })
                .collect();
            Json(SwarmPeersResponse { peers }).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn version_text() -> String {
    format!(
        "Client Version: {}\nProtocol Version: {}\nSystem Version: {}\n",
        AGENT_VERSION,
        IDENTIFY_PROTOCOL,
        system()
    )
}

/// Map a subdomain request (`<id>.ipfs.<domain>`) to its path form.
fn subdomain_path(headers: &HeaderMap, path: &str) -> Option<String> {
    let host = headers.get(header::HOST)?.to_str().ok()?;
    let host = host.split(':').next()?;
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 || labels[0].is_empty() {
        return None;
    }
    let namespace = labels[1];
    if namespace != "ipfs" && namespace != "ipns" {
        return None;
    }
    let rest = if path == "/" { "" } else { path };
    Some(format!("/{}/{}{}", namespace, labels[0], rest))
}

async fn gateway_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let path = if state.gateway.hostname {
        subdomain_path(&headers, uri.path()).unwrap_or_else(|| uri.path().to_string())
    } else {
        uri.path().to_string()
    };

    let Some(mount) = state.gateway.mount_for(&path) else {
        return error_response(StatusCode::NOT_FOUND, format!("no handler for {}", path));
    };

    match method {
        Method::GET | Method::HEAD => error_response(
            StatusCode::NOT_IMPLEMENTED,
            "content retrieval is not available on this node",
        ),
        Method::POST | Method::PUT | Method::DELETE if mount.writable => error_response(
            StatusCode::NOT_IMPLEMENTED,
            "content writes are not available on this node",
        ),
        _ => {
            let mut response = error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                format!("method {} not allowed on read-only gateway", method),
            );
            response.headers_mut().insert(
                header::ALLOW,
                header::HeaderValue::from_static("GET, HEAD"),
            );
            response
        }
    }
}

/// Reject API calls from clients of this implementation running another
/// version.
async fn check_client_version(request: Request, next: Next) -> Response {
    if request.uri().path().starts_with("/api/") {
        let agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok());
        if let Some(agent) = agent {
            if agent.starts_with(AGENT_PREFIX) && agent != AGENT_VERSION {
                warn!("Rejected API client {}", agent);
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!(
                        "{} does not match server version {}",
                        agent, AGENT_VERSION
                    ),
                );
            }
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::listener;
    use crate::port::host::Host;
    use crate::test_utils::{MockCoreNode, MockHost};
    use libp2p::identity::Keypair;
    use libp2p::multiaddr::Protocol;
    use libp2p::PeerId;
    use std::time::Duration;

    fn node() -> (Arc<MockCoreNode>, PeerId) {
        let keypair = Keypair::generate_ed25519();
        let peer = keypair.public().to_peer_id();
        let host = MockHost::new(peer)
            .with_listen_addrs(vec!["/ip4/127.0.0.1/tcp/4001".parse().unwrap()]);
        host.peerstore().add_key(peer, keypair);
        (Arc::new(MockCoreNode::new(Arc::new(host))), peer)
    }

    /// Serve `options` on an ephemeral port and return its base URL.
    async fn serve(
        node: Arc<MockCoreNode>,
        options: Vec<ServeOption>,
    ) -> (String, tokio_util::sync::CancellationToken) {
        let (bound, _registered) = listener::bind(&"/ip4/127.0.0.1/tcp/0".parse().unwrap())
            .await
            .unwrap();
        let port = bound
            .addr
            .iter()
            .find_map(|p| match p {
                Protocol::Tcp(port) => Some(port),
                _ => None,
            })
            .unwrap();
        let token = bound.shutdown.clone();
        tokio::spawn(async move { AxumHttpServer.serve(node, bound, options).await });
        (format!("http://127.0.0.1:{}", port), token)
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    #[test]
    fn test_mount_for_prefers_longest_prefix() {
        let config = GatewayConfig {
            mounts: vec![
                GatewayMount {
                    prefix: "/ipfs".to_string(),
                    writable: true,
                },
                GatewayMount {
                    prefix: WEBUI_PATH.to_string(),
                    writable: false,
                },
            ],
            hostname: false,
        };
        assert!(config.mount_for(&format!("{}/index.html", WEBUI_PATH)).is_some_and(|m| !m.writable));
        assert!(config.mount_for("/ipfs/bafy").is_some_and(|m| m.writable));
        assert!(config.mount_for("/ipfsx").is_none());
        assert!(config.mount_for("/ipns/name").is_none());
    }

    #[test]
    fn test_subdomain_path() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "bafyabc.ipfs.localhost:8080".parse().unwrap());
        assert_eq!(
            subdomain_path(&headers, "/"),
            Some("/ipfs/bafyabc".to_string())
        );
        assert_eq!(
            subdomain_path(&headers, "/a/b.txt"),
            Some("/ipfs/bafyabc/a/b.txt".to_string())
        );

        headers.insert(header::HOST, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(subdomain_path(&headers, "/"), None);
    }

    #[tokio::test]
    async fn test_api_id_reports_peer() {
        let (node, peer) = node();
        let (url, token) = serve(node, vec![ServeOption::Commands]).await;

        let body: serde_json::Value = client()
            .post(format!("{}/api/v0/id", url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["ID"], peer.to_string());
        assert_eq!(body["AgentVersion"], AGENT_VERSION);
        assert_eq!(
            body["Addresses"][0],
            format!("/ip4/127.0.0.1/tcp/4001/p2p/{}", peer)
        );
        assert!(!body["PublicKey"].as_str().unwrap().is_empty());
        token.cancel();
    }

    #[tokio::test]
    async fn test_read_only_gateway_rejects_writes() {
        let (node, _) = node();
        let (url, token) = serve(node, crate::application_service::mobile::gateway_options(false)).await;
        let client = client();

        let get = client.get(format!("{}/ipfs/bafyabc", url)).send().await.unwrap();
        assert_eq!(get.status(), reqwest::StatusCode::NOT_IMPLEMENTED);

        let post = client.post(format!("{}/ipfs/", url)).send().await.unwrap();
        assert_eq!(post.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);

        let other = client.get(format!("{}/elsewhere", url)).send().await.unwrap();
        assert_eq!(other.status(), reqwest::StatusCode::NOT_FOUND);
        token.cancel();
    }

    #[tokio::test]
    async fn test_writable_gateway_accepts_writes() {
        let (node, _) = node();
        let (url, token) = serve(node, crate::application_service::mobile::gateway_options(true)).await;

        let post = client().post(format!("{}/ipfs/", url)).send().await.unwrap();
        assert_eq!(post.status(), reqwest::StatusCode::NOT_IMPLEMENTED);
        token.cancel();
    }

    #[tokio::test]
    async fn test_webui_redirect_and_version() {
        let (node, _) = node();
        let mut options = crate::application_service::mobile::core_http_options(false);
        options.push(ServeOption::Version);
        let (url, token) = serve(node, options).await;
        let client = client();

        let redirect = client.get(format!("{}/webui", url)).send().await.unwrap();
        assert_eq!(redirect.status(), reqwest::StatusCode::FOUND);
        assert_eq!(redirect.headers()[reqwest::header::LOCATION], WEBUI_PATH);

        let text = client
            .get(format!("{}/version", url))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(text.contains(AGENT_VERSION));
        token.cancel();
    }

    #[tokio::test]
    async fn test_check_version_rejects_mismatched_client() {
        let (node, _) = node();
        let (url, token) =
            serve(node, vec![ServeOption::Commands, ServeOption::CheckVersion]).await;
        let client = client();

        let rejected = client
            .post(format!("{}/api/v0/version", url))
            .header(reqwest::header::USER_AGENT, "mobile-node/0.0.0-old")
            .send()
            .await
            .unwrap();
        assert_eq!(rejected.status(), reqwest::StatusCode::BAD_REQUEST);

        let same = client
            .post(format!("{}/api/v0/version", url))
            .header(reqwest::header::USER_AGENT, AGENT_VERSION)
            .send()
            .await
            .unwrap();
        assert!(same.status().is_success());

        let foreign = client
            .post(format!("{}/api/v0/version", url))
            .header(reqwest::header::USER_AGENT, "curl/8.0")
            .send()
            .await
            .unwrap();
        assert!(foreign.status().is_success());
        token.cancel();
    }

    #[tokio::test]
    async fn test_serve_returns_after_shutdown() {
        let (node, _) = node();
        let (bound, _registered) = listener::bind(&"/ip4/127.0.0.1/tcp/0".parse().unwrap())
            .await
            .unwrap();
        let token = bound.shutdown.clone();
        let task = tokio::spawn(async move {
            AxumHttpServer
                .serve(node, bound, vec![ServeOption::Commands])
                .await
        });

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
