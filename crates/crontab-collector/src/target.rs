use anyhow::Context;
use serde::Serialize;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// One remote host, the account used to log in, and the account whose
/// crontab is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub login_user: String,
    pub crontab_user: String,
    #[serde(skip)]
    pub ssh_args: Vec<String>,
}

impl Target {
    /// Accepts `host`, `host:port` and `[v6addr]:port`. Without a distinct
    /// crontab user the login user's own crontab is read.
    pub fn parse(
        descriptor: &str,
        login_user: &str,
        crontab_user: Option<&str>,
    ) -> anyhow::Result<Self> {
        let (host, port) = parse_host_port(descriptor.trim())?;
        if login_user.trim().is_empty() {
            anyhow::bail!("login user for {host} cannot be empty");
        }
        let crontab_user = crontab_user
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .unwrap_or(login_user);
        Ok(Self {
            host,
            port,
            login_user: login_user.to_string(),
            crontab_user: crontab_user.to_string(),
            ssh_args: Vec::new(),
        })
    }

    pub fn with_ssh_args(mut self, ssh_args: Vec<String>) -> Self {
        self.ssh_args = ssh_args;
        self
    }

    /// Identity used to order and display targets.
    pub fn label(&self) -> String {
        if self.port == DEFAULT_SSH_PORT {
            self.host.clone()
        } else if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.login_user, self.host)
    }

    pub fn needs_elevation(&self) -> bool {
        self.crontab_user != self.login_user
    }
}

fn parse_host_port(descriptor: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = if let Some(rest) = descriptor.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| anyhow::anyhow!("invalid target {descriptor}, missing ']'"))?;
        let port = match tail {
            "" => None,
            tail => Some(tail.strip_prefix(':').ok_or_else(|| {
                anyhow::anyhow!("invalid target {descriptor}, expected [host]:port")
            })?),
        };
        (host, port)
    } else {
        match descriptor.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => (host, Some(port)),
            _ => (descriptor, None),
        }
    };

    if host.is_empty() {
        anyhow::bail!("invalid target '{descriptor}', host is empty");
    }
    if host.starts_with('-') || host.contains(char::is_whitespace) || host.contains('@') {
        anyhow::bail!("invalid target host '{host}'");
    }
    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .with_context(|| format!("invalid port in target {descriptor}"))?,
        None => DEFAULT_SSH_PORT,
    };
    if port == 0 {
        anyhow::bail!("invalid port 0 in target {descriptor}");
    }
    Ok((host.to_string(), port))
}
