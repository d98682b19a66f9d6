use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub relay: RelaySettings,
    pub log: LogSettings,
}

/// Listener configuration for the HTTP and WebSocket servers.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    /// HTTP API port.
    pub port: u16,
    pub ws_port: u16,
    /// Path the WebSocket handshake must target.
    pub ws_path: String,
    pub max_connections: usize,
}

/// Connection parameters for PostgreSQL.
///
/// `url` wins over the individual parts when set.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    /// Size of the publish pool. Listen connections are not counted here.
    pub pool_size: u32,
}

impl DatabaseSettings {
    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.name
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelaySettings {
    /// Per-connection outbound queue length; messages beyond it are dropped.
    pub outbound_queue_capacity: usize,
    /// Advertised in the greeting. Advisory only, not an allow-list.
    pub available_channels: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub database: Option<PartialDatabaseSettings>,
    pub relay: Option<PartialRelaySettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ws_port: Option<u16>,
    pub ws_path: Option<String>,
    pub max_connections: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialDatabaseSettings {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub pool_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PartialRelaySettings {
    pub outbound_queue_capacity: Option<usize>,
    pub available_channels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 3000,
                ws_port: 3001,
                ws_path: "/ws".to_string(),
                max_connections: 1000,
            },
            database: DatabaseSettings {
                url: None,
                host: "localhost".to_string(),
                port: 5432,
                name: "pg_notify_demo".to_string(),
                user: "postgres".to_string(),
                password: "postgres".to_string(),
                pool_size: 10,
            },
            relay: RelaySettings {
                outbound_queue_capacity: 256,
                available_channels: ["chat", "orders", "notifications", "system"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server;
        let database = self.database;
        let relay = self.relay;
        let log = self.log;

        Settings {
            server: match server {
                Some(s) => ServerSettings {
                    host: s.host.unwrap_or(default.server.host),
                    port: s.port.unwrap_or(default.server.port),
                    ws_port: s.ws_port.unwrap_or(default.server.ws_port),
                    ws_path: s.ws_path.unwrap_or(default.server.ws_path),
                    max_connections: s.max_connections.unwrap_or(default.server.max_connections),
                },
                None => default.server,
            },
            database: match database {
                Some(d) => DatabaseSettings {
                    url: d.url.or(default.database.url),
                    host: d.host.unwrap_or(default.database.host),
                    port: d.port.unwrap_or(default.database.port),
                    name: d.name.unwrap_or(default.database.name),
                    user: d.user.unwrap_or(default.database.user),
                    password: d.password.unwrap_or(default.database.password),
                    pool_size: d.pool_size.unwrap_or(default.database.pool_size),
                },
                None => default.database,
            },
            relay: match relay {
                Some(r) => RelaySettings {
                    outbound_queue_capacity: r
                        .outbound_queue_capacity
                        .unwrap_or(default.relay.outbound_queue_capacity),
                    available_channels: r
                        .available_channels
                        .unwrap_or(default.relay.available_channels),
                },
                None => default.relay,
            },
            log: match log {
                Some(l) => LogSettings {
                    level: l.level.unwrap_or(default.log.level),
                },
                None => default.log,
            },
        }
    }
}
