//! Binary entry point: parse config, stand up a `PostgresStorage`, and run
//! the websocket acceptor. Mirrors the teacher's `main.rs` shape — parse
//! config, `init_tracing()`, build the storage backend, run — generalized
//! from the teacher's in-process ring buffer to a networked service.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use isu_room_server::server::Server;
use isu_room_server::storage::PostgresStorage;
use isu_room_server::{init_tracing, RoomOps, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_args();
    init_tracing();

    let pg_config = tokio_postgres::Config::from_str(&config.database_url)
        .context("parsing --database-url")?;
    let storage = PostgresStorage::new(pg_config, config.db_pool_size)
        .context("building Postgres connection pool")?;

    if config.migrate_on_start {
        storage.init_schema().await.context("running schema migration")?;
    }
    let catalog = storage.load_catalog().await.context("loading item catalog")?;

    let bind_addr: SocketAddr = config.bind_addr.parse().context("parsing --bind-addr")?;
    let ops = Arc::new(RoomOps::new(storage, catalog));
    let server = Server::new(ops, bind_addr, config.status_push_interval());

    server.run().await
}
