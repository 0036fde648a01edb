// ABOUTME: Typed client configuration and the builder used to construct it
// ABOUTME: Fluent builder so callers don't construct PushConfig field-by-field

use std::path::PathBuf;

/// Port used for plaintext (non-TLS) push sessions.
pub const PUSH_OPEN_PORT: u16 = 3200;
/// Port used for TLS push sessions.
pub const PUSH_SECURE_PORT: u16 = 3201;

/// How the client should establish trust for a TLS push session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaCerts {
    /// Trust exactly the certificates in this PEM bundle.
    File(PathBuf),
    /// Disable certificate verification (the `"nonprod"` sentinel). The
    /// channel remains encrypted; only trust checking is skipped.
    Insecure,
    /// Use the library-bundled Mozilla trust store (the default).
    Bundled,
}

impl Default for CaCerts {
    fn default() -> Self {
        CaCerts::Bundled
    }
}

/// Configuration recognised by [`crate::client::PushClient`].
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub username: String,
    pub password: String,
    pub hostname: String,
    pub secure: bool,
    pub ca_certs: CaCerts,
    pub workers: usize,
    /// Override the session port instead of the `secure`-derived default.
    /// Used by tests to point at an ephemeral listener; production
    /// configuration should leave this unset.
    pub port_override: Option<u16>,
}

impl PushConfig {
    pub fn builder(username: impl Into<String>, password: impl Into<String>) -> PushConfigBuilder {
        PushConfigBuilder::new(username, password)
    }

    /// The port to connect to for a new push session, per `secure`, unless
    /// overridden.
    pub fn push_port(&self) -> u16 {
        self.port_override.unwrap_or(if self.secure { PUSH_SECURE_PORT } else { PUSH_OPEN_PORT })
    }
}

/// Builder for [`PushConfig`].
#[derive(Debug, Clone)]
pub struct PushConfigBuilder {
    username: String,
    password: String,
    hostname: String,
    secure: bool,
    ca_certs: CaCerts,
    workers: usize,
    port_override: Option<u16>,
}

impl PushConfigBuilder {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            hostname: "login.etherios.com".to_string(),
            secure: true,
            ca_certs: CaCerts::default(),
            workers: 1,
            port_override: None,
        }
    }

    /// Override the session port. Intended for tests; leave unset in
    /// production so `secure` selects the standard port.
    pub fn port(mut self, port: u16) -> Self {
        self.port_override = Some(port);
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn ca_certs(mut self, ca_certs: CaCerts) -> Self {
        self.ca_certs = ca_certs;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn build(self) -> PushConfig {
        PushConfig {
            username: self.username,
            password: self.password,
            hostname: self.hostname,
            secure: self.secure,
            ca_certs: self.ca_certs,
            workers: self.workers,
            port_override: self.port_override,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_builder_is_secure_with_one_worker() {
        let cfg = PushConfig::builder("u", "p").build();
        assert!(cfg.secure);
        assert_eq!(cfg.workers, 1);
        assert_eq!(cfg.push_port(), PUSH_SECURE_PORT);
        assert_eq!(cfg.ca_certs, CaCerts::Bundled);
    }

    #[test]
    fn insecure_builder_selects_plaintext_port() {
        let cfg = PushConfig::builder("u", "p").secure(false).workers(4).build();
        assert_eq!(cfg.push_port(), PUSH_OPEN_PORT);
        assert_eq!(cfg.workers, 4);
    }

    #[test]
    fn workers_is_clamped_to_at_least_one() {
        let cfg = PushConfig::builder("u", "p").workers(0).build();
        assert_eq!(cfg.workers, 1);
    }
}
