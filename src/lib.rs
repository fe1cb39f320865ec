//! pos-core - offline-first restaurant POS data layer
//!
//! The session-scoped [`store::PosStore`] owns every collection in memory,
//! resolved once at startup from the remote backend, the local SQLite
//! cache, or first-run seed fixtures. Mutations are optimistic: they apply
//! locally (and persist to the cache) before the matching remote call is
//! pushed in the background, and a realtime change feed folds other
//! terminals' writes back in. Domain engines (orders, inventory, loyalty,
//! cash register, void/refund, purchasing, finance, KPI) sit on top of
//! that surface.
//!
//! Collection CRUD without extra domain rules goes straight through the
//! generic [`sync`] operations, e.g. `sync::create::<MenuItem>(...)`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod cache;
pub mod diagnostics;
pub mod error;
pub mod finance;
pub mod inventory;
pub mod kpi;
pub mod loyalty;
pub mod notify;
pub mod orders;
pub mod purchasing;
pub mod realtime;
pub mod register;
pub mod registry;
pub mod remote;
pub mod resolver;
pub mod store;
pub mod sync;
pub mod types;
pub mod voidrefund;

pub use error::StoreError;
pub use notify::Notifier;
pub use remote::RemoteClient;
pub use store::{PosStore, SeedData};

/// Initialize structured console logging. Call once from the embedding
/// application; honors `RUST_LOG` when set.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pos_core=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}
