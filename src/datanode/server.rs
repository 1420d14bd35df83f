//! Data node server
//!
//! Registers with the coordinator once at startup, then serves chunk PUT/GET
//! requests straight from clients, one request per connection.

use crate::common::{clean_path, retry_with_backoff, validate_file_name, DataNodeConfig, Error, Result};
use crate::datanode::block::BlockStore;
use crate::protocol::{BlockId, Connection, NodeId, Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Outcome of the startup handshake with the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    AlreadyRegistered,
}

pub struct DataNode {
    config: DataNodeConfig,
    listener: TcpListener,
    store: Arc<BlockStore>,
}

impl DataNode {
    /// Bind the listen socket and open block storage.
    ///
    /// The node's identity is the advertised address (or the bound IP) plus
    /// the port actually bound, so binding port 0 yields a usable identity.
    pub async fn bind(config: DataNodeConfig) -> Result<Self> {
        if config.bind_addr.ip().is_unspecified() && config.advertise_addr.is_none() {
            return Err(Error::InvalidConfig(format!(
                "binding {} needs an advertised address clients can reach",
                config.bind_addr
            )));
        }

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local = listener.local_addr()?;

        let address = config
            .advertise_addr
            .clone()
            .unwrap_or_else(|| local.ip().to_string());

        let store = BlockStore::open(&config.data_path, NodeId::new(address, local.port()))?;

        Ok(Self {
            config,
            listener,
            store: Arc::new(store),
        })
    }

    pub fn node(&self) -> &NodeId {
        self.store.node()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Register with the coordinator, retrying NAKs and unreachable
    /// coordinators up to `register_attempts` times
    pub async fn register(&self) -> Result<Registration> {
        let node = self.store.node();
        let config = &self.config;
        retry_with_backoff(
            || register_once(config, node),
            config.register_attempts,
            config.register_backoff(),
        )
        .await
    }

    /// Register, then serve until the process stops
    pub async fn run(self) -> Result<()> {
        self.register().await?;
        self.serve().await
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting data node: {}", self.node());
        tracing::info!("  Listening on: {}", self.local_addr()?);
        tracing::info!("  Data path: {}", self.store.root().display());

        let limits = Limits {
            max_frame_len: self.config.max_frame_len,
            max_block_len: self.config.max_block_len,
            timeout: self.config.io_timeout(),
        };

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let store = self.store.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(store, stream, limits).await {
                    tracing::error!("Connection from {} failed: {}", peer, e);
                }
            });
        }
    }
}

async fn register_once(config: &DataNodeConfig, node: &NodeId) -> Result<Registration> {
    tracing::info!("Registering {} with coordinator {}", node, config.coordinator_addr);

    let mut conn = Connection::connect(
        &config.coordinator_addr,
        config.max_frame_len,
        config.io_timeout(),
    )
    .await?;

    match conn.call(&Request::reg(node.address.clone(), node.port)).await? {
        Response::Ack => {
            tracing::info!("Registered");
            Ok(Registration::Registered)
        }
        Response::Dup => {
            tracing::info!("Duplicate registration");
            Ok(Registration::AlreadyRegistered)
        }
        other => Err(other.into_error("registration")),
    }
}

/// Run filesystem work off the async workers
async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {}", e)))?
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    max_frame_len: usize,
    max_block_len: u64,
    timeout: Option<Duration>,
}

async fn handle_connection(store: Arc<BlockStore>, stream: TcpStream, limits: Limits) -> Result<()> {
    let mut conn = Connection::from_stream(stream, limits.max_frame_len, limits.timeout);

    let request = match conn.recv::<Request>().await {
        Ok(request) => request,
        Err(e @ (Error::Codec(_) | Error::FrameTooLarge { .. })) => {
            tracing::warn!("Malformed request from {}: {}", conn.peer(), e);
            conn.send(&Response::nak(format!("malformed request: {}", e)))
                .await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    match request {
        Request::Put { name, size } => {
            handle_put(&store, &mut conn, &name, size, limits.max_block_len).await?
        }
        Request::Get { name, block_id } => handle_get(&store, &mut conn, &name, block_id).await?,
        other => {
            conn.send(&Response::nak(format!(
                "data node does not handle {}",
                other.command()
            )))
            .await?
        }
    }

    conn.finish().await;
    Ok(())
}

/// Hand out a block id, receive exactly `size` bytes, persist them
async fn handle_put(
    store: &Arc<BlockStore>,
    conn: &mut Connection,
    name: &str,
    size: u64,
    max_block_len: u64,
) -> Result<()> {
    let name = clean_path(name).to_string();
    if let Err(e) = validate_file_name(&name) {
        return conn.send(&Response::nak(e.to_string())).await;
    }
    if size > max_block_len {
        tracing::warn!(
            "PUT {} refused: {} bytes exceeds the {}-byte block limit",
            name,
            size,
            max_block_len
        );
        return conn
            .send(&Response::nak(format!(
                "block of {} bytes exceeds limit of {}",
                size, max_block_len
            )))
            .await;
    }

    let block_id = store.new_block_id();
    tracing::info!("PUT {} ({} bytes) as block {}", name, size, block_id);
    conn.send(&Response::Assigned {
        block_id: block_id.clone(),
    })
    .await?;

    let data = conn.recv_bytes(size).await?;

    let written = {
        let store = store.clone();
        let block_id = block_id.clone();
        let name = name.clone();
        blocking(move || store.write_block(&name, &block_id, &data)).await
    };

    match written {
        Ok(meta) => {
            conn.send(&Response::Stored {
                block_id,
                checksum: meta.checksum,
            })
            .await
        }
        Err(e) => {
            conn.send(&Response::nak(e.to_string())).await?;
            Err(e)
        }
    }
}

/// Stream back this node's block of `name`
async fn handle_get(
    store: &Arc<BlockStore>,
    conn: &mut Connection,
    name: &str,
    block_id: Option<BlockId>,
) -> Result<()> {
    let name = clean_path(name).to_string();

    let loaded = {
        let store = store.clone();
        let name = name.clone();
        blocking(move || store.load(&name, block_id.as_ref())).await
    };

    match loaded {
        Ok((meta, data)) => {
            tracing::info!("GET {} -> block {} ({} bytes)", name, meta.block_id, meta.size);
            conn.send(&Response::Block { size: meta.size }).await?;
            conn.send_bytes(&data).await
        }
        Err(Error::NotFound(what)) => {
            tracing::warn!("GET {}: not found ({})", name, what);
            conn.send(&Response::NotFound { name }).await
        }
        Err(e) => {
            tracing::warn!("GET {} failed: {}", name, e);
            conn.send(&Response::nak(e.to_string())).await
        }
    }
}
