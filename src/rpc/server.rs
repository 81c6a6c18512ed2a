//! Minimal HTTP/1.1-over-Unix-socket server speaking the Docker
//! `go-plugins-helper` wire format: `POST /Plugin.Activate`,
//! `POST /NetworkDriver.CreateNetwork`, etc. Just enough framing to read a
//! `Content-Length`-delimited JSON body and write one back; this is not a
//! general HTTP stack.

use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use crate::builder::{NetworkBuilder, NetworkState};
use crate::container::ContainerRuntime;
use crate::rpc::protocol::{self, CreateNetworkRequest, DeleteNetworkRequest, GetCapabilitiesResponse};

const DEFAULT_DEF_PATH: &str = "/tmp/netDef.json";

/// Shared driver state: one `NetworkState` per live network id.
pub struct Driver {
    builder: NetworkBuilder,
    networks: Mutex<IndexMap<String, NetworkState>>,
    default_def_path: PathBuf,
}

impl Driver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, default_def_path: Option<PathBuf>) -> Self {
        Self {
            builder: NetworkBuilder::new(runtime),
            networks: Mutex::new(IndexMap::new()),
            default_def_path: default_def_path.unwrap_or_else(|| PathBuf::from(DEFAULT_DEF_PATH)),
        }
    }
}

/// Binds the `dvnet` socket under `socket_dir` (the plugin socket Docker
/// expects to find — conventionally `/run/docker/plugins`) and serves
/// requests until the process is killed.
pub async fn serve(driver: Arc<Driver>, socket_dir: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(socket_dir)?;
    let socket_path: PathBuf = socket_dir.join("dvnet");
    let _ = std::fs::remove_file(&socket_path);

    let listener = UnixListener::bind(&socket_path)?;
    log::info!("listening on {}", socket_path.display());

    loop {
        let (stream, _) = listener.accept().await?;
        let driver = Arc::clone(&driver);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(driver, stream).await {
                log::warn!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(driver: Arc<Driver>, stream: UnixStream) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await? == 0 {
            return Ok(());
        }
        let mut parts = request_line.split_whitespace();
        let _method = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default().to_string();

        let mut content_length: usize = 0;
        loop {
            let mut header_line = String::new();
            if reader.read_line(&mut header_line).await? == 0 {
                return Ok(());
            }
            let header_line = header_line.trim_end();
            if header_line.is_empty() {
                break;
            }
            if let Some((name, value)) = header_line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }

        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await?;

        let response = dispatch(&driver, &path, &body).await;
        let payload = serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec());
        let http_response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            payload.len()
        );
        writer.write_all(http_response.as_bytes()).await?;
        writer.write_all(&payload).await?;
    }
}

async fn dispatch(driver: &Driver, path: &str, body: &[u8]) -> Value {
    match path {
        "/Plugin.Activate" => json!({ "Implements": ["NetworkDriver"] }),
        "/NetworkDriver.GetCapabilities" => {
            serde_json::to_value(GetCapabilitiesResponse::default()).unwrap_or(json!({}))
        }
        "/NetworkDriver.CreateNetwork" => handle_create_network(driver, body).await,
        "/NetworkDriver.DeleteNetwork" => handle_delete_network(driver, body).await,
        // The driver owns endpoint lifecycle internally, so these are all
        // empty successes.
        "/NetworkDriver.AllocateNetwork"
        | "/NetworkDriver.FreeNetwork"
        | "/NetworkDriver.CreateEndpoint"
        | "/NetworkDriver.DeleteEndpoint"
        | "/NetworkDriver.EndpointOperInfo"
        | "/NetworkDriver.Join"
        | "/NetworkDriver.Leave"
        | "/NetworkDriver.DiscoverNew"
        | "/NetworkDriver.DiscoverDelete"
        | "/NetworkDriver.ProgramExternalConnectivity"
        | "/NetworkDriver.RevokeExternalConnectivity" => json!({}),
        other => {
            log::debug!("unhandled endpoint {other}");
            json!({})
        }
    }
}

async fn handle_create_network(driver: &Driver, body: &[u8]) -> Value {
    let request: CreateNetworkRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return json!({ "Err": format!("malformed CreateNetwork request: {e}") }),
    };

    let options = protocol::parse_network_options(&request.options);
    let def_path = options
        .def_path
        .map(PathBuf::from)
        .unwrap_or_else(|| driver.default_def_path.clone());
    if let Some(mode) = &options.mode {
        log::debug!("net.dvnet.mode={mode} parsed, not used by the core");
    }
    if let Some(mtu) = options.mtu {
        log::debug!("net.dvnet.mtu={mtu} parsed, not used by the core");
    }

    match driver.builder.create(&def_path).await {
        Ok(state) => {
            driver
                .networks
                .lock()
                .await
                .insert(request.network_id, state);
            json!({})
        }
        Err(e) => json!({ "Err": e.to_string() }),
    }
}

async fn handle_delete_network(driver: &Driver, body: &[u8]) -> Value {
    let request: DeleteNetworkRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return json!({ "Err": format!("malformed DeleteNetwork request: {e}") }),
    };

    let state = driver.networks.lock().await.shift_remove(&request.network_id);
    match state {
        Some(state) => {
            driver.builder.delete(state).await;
            json!({})
        }
        None => json!({ "Err": format!("unknown network: {}", request.network_id) }),
    }
}
