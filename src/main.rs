use std::sync::Arc;

use tracing::{error, info, warn};

use filo::server::{ChatServer, SessionContext, SessionHandler};
use filo::store::SqliteStore;
use filo::{ChatRegistry, Config, UserRegistry};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    // Initialize logging
    if let Err(e) = filo::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        filo::logging::init_console_only(&config.logging.level);
    }

    info!("filo chat server");

    let users = Arc::new(UserRegistry::new());
    let chats = Arc::new(ChatRegistry::new());

    // Persistence is best-effort: a store that fails to open or load leaves
    // the server running on empty in-memory registries.
    let store = if config.database.enabled {
        open_store(&config, &users, &chats).await
    } else {
        info!("Persistence disabled by configuration");
        None
    };

    let server = match ChatServer::bind(&config.server).await {
        Ok(server) => server,
        Err(e) => {
            error!(
                "Failed to bind {}:{}: {}",
                config.server.host, config.server.port, e
            );
            std::process::exit(1);
        }
    };

    let ctx = SessionContext {
        users,
        chats,
        store,
    };

    let result = server
        .run(move |stream, addr| {
            let ctx = ctx.clone();
            async move {
                SessionHandler::new(ctx, addr).run(stream).await;
            }
        })
        .await;

    if let Err(e) = result {
        error!("Server terminated: {}", e);
        std::process::exit(1);
    }
}

/// Open the store and seed the registries from it.
async fn open_store(
    config: &Config,
    users: &Arc<UserRegistry>,
    chats: &Arc<ChatRegistry>,
) -> Option<Arc<SqliteStore>> {
    let store = match SqliteStore::open(&config.database).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("Store unavailable, running without persistence: {}", e);
            return None;
        }
    };

    match store.load_all_users().await {
        Ok(accounts) => {
            for account in accounts {
                users.insert_loaded(account).await;
            }
            info!("Loaded {} users from the store", users.count().await);
        }
        Err(e) => warn!("Loading users failed, starting empty: {}", e),
    }

    match store.load_all_chats().await {
        Ok(entities) => {
            for entity in entities {
                chats.insert_loaded(entity).await;
            }
            info!("Loaded {} chats from the store", chats.count().await);
        }
        Err(e) => warn!("Loading chats failed, starting empty: {}", e),
    }

    Some(store)
}
