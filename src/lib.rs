pub mod bigint;
pub mod catalog;
pub mod config;
pub mod error;
pub mod room_lock;
pub mod room_ops;
pub mod server;
pub mod session;
pub mod status;

pub mod storage {
    pub mod memory;
    pub mod postgres;
    pub mod traits;

    pub use memory::{MemoryStorage, ScriptedClock, SystemClock};
    pub use postgres::PostgresStorage;
    pub use traits::{AddingRow, BuyingRow, Clock, RoomTransaction, Storage};
}

pub use bigint::{to_exp, Exp};
pub use catalog::{Catalog, CatalogItem};
pub use config::ServerConfig;
pub use error::{RoomError, StorageError};
pub use room_ops::RoomOps;
pub use session::SessionLoop;
pub use status::{compute_status, GameStatus};

/// Initialize tracing for the process. Mirrors the teacher's
/// `tracing_subscriber::fmt::init()` call in `lib.rs::init()`, generalized
/// to honor `RUST_LOG` via an `EnvFilter`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
