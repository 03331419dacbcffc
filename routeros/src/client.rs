// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Router client owning the API session

use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::DEFAULT_API_PORT;
use crate::connection::Connection;
use crate::error::RouterError;
use crate::sentence::{Attributes, Command};

#[allow(unused)]
use tracing::{debug, info, warn};

/// Address of the router API service: a host name or IP address with an optional port
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterAddress {
    host: String,
    port: u16,
}

impl RouterAddress {
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

fn valid_hostname(host: &str) -> bool {
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

impl FromStr for RouterAddress {
    type Err = RouterError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        let bad = || RouterError::InvalidAddress(input.to_string());
        if let Ok(sock) = SocketAddr::from_str(input) {
            return Ok(Self {
                host: sock.ip().to_string(),
                port: sock.port(),
            });
        }
        if let Ok(ip) = IpAddr::from_str(input) {
            return Ok(Self {
                host: ip.to_string(),
                port: DEFAULT_API_PORT,
            });
        }
        let (host, port) = match input.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| bad())?),
            None => (input, DEFAULT_API_PORT),
        };
        if !valid_hostname(host) || port == 0 {
            return Err(bad());
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl Display for RouterAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match IpAddr::from_str(&self.host) {
            Ok(IpAddr::V6(_)) => write!(f, "[{}]:{}", self.host, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// Parameters to reach and authenticate with the router
#[derive(Clone)]
pub struct RouterConfig {
    pub address: RouterAddress,
    pub username: String,
    pub password: String,
    /// bound on connecting and on running any single command
    pub timeout: Duration,
}

impl std::fmt::Debug for RouterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterConfig")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A client to a router. The client owns one API session, which is opened lazily and
/// re-opened after any error that leaves it unusable.
pub struct Client {
    config: RouterConfig,
    session: Mutex<Option<Connection<TcpStream>>>,
}

impl Client {
    /// Create a client without connecting
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// Create a client and open its session right away
    pub async fn connect(config: RouterConfig) -> Result<Self, RouterError> {
        let client = Self::new(config);
        let session = client.open().await?;
        *client.session.lock().await = Some(session);
        Ok(client)
    }

    async fn open(&self) -> Result<Connection<TcpStream>, RouterError> {
        let address = self.config.address.to_string();
        let timeout = self.config.timeout;
        debug!("Connecting to router at {address}...");
        let stream = tokio::time::timeout(
            timeout,
            TcpStream::connect((self.config.address.host(), self.config.address.port())),
        )
        .await
        .map_err(|_| RouterError::Timeout(timeout))?
        .map_err(|source| RouterError::Connect {
            address: address.clone(),
            source,
        })?;
        let mut session = Connection::new(stream);
        tokio::time::timeout(
            timeout,
            session.login(&self.config.username, &self.config.password),
        )
        .await
        .map_err(|_| RouterError::Timeout(timeout))??;
        info!(
            "Logged in to router at {address} as '{}'",
            self.config.username
        );
        Ok(session)
    }

    /// Run a command on the router, opening a session first if needed.
    ///
    /// # Errors
    /// Fails if a session can't be opened, the command is rejected, or no reply arrives in time.
    pub async fn run(&self, command: &Command) -> Result<Vec<Attributes>, RouterError> {
        let mut guard = self.session.lock().await;
        let session = match guard.take() {
            Some(session) => guard.insert(session),
            None => guard.insert(self.open().await?),
        };
        let timeout = self.config.timeout;
        let result = match tokio::time::timeout(timeout, session.run(command)).await {
            Ok(result) => result,
            Err(_) => Err(RouterError::Timeout(timeout)),
        };
        if let Err(e) = &result
            && e.breaks_connection()
        {
            warn!("Dropping router session: {e}");
            guard.take();
        }
        result
    }

    /// Close the session, if any
    pub async fn close(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            let timeout = self.config.timeout;
            if tokio::time::timeout(timeout, session.close()).await.is_err() {
                debug!("Timed out closing router session");
            }
            info!("Closed session to router at {}", self.config.address);
        }
    }
}
