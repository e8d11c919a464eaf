mod connection;
mod proxy;
mod session;

use std::sync::Once;

pub use connection::{ConnectionState, HubConnection, HubOptions};
pub use proxy::connect_via_proxy;
pub use session::SessionFactory;

static RUSTLS_PROVIDER_INIT: Once = Once::new();

/// Install the ring crypto provider for rustls once per process.
pub(crate) fn ensure_crypto_provider() {
    RUSTLS_PROVIDER_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
