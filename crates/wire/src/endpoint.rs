use std::path::Path;

use crate::error::WireError;

/// Where remote functions are reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Run functions inside this process.
    InProcess,

    /// Unix domain socket, named under `/tmp/spillway/`.
    Ipc(String),

    /// TCP for hosts on other machines.
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Parse `in-process`, `ipc://name` or `tcp://host:port`.
    pub fn parse(s: &str) -> Result<Self, WireError> {
        if s == "in-process" {
            return Ok(Self::InProcess);
        }
        if let Some(name) = s.strip_prefix("ipc://") {
            if name.is_empty() || name.contains('/') {
                return Err(WireError::Endpoint(format!(
                    "ipc endpoint needs a bare socket name, got '{s}'"
                )));
            }
            return Ok(Self::ipc(name));
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| WireError::Endpoint(format!("missing port in '{s}'")))?;
            let port = port
                .parse()
                .map_err(|_| WireError::Endpoint(format!("invalid port in '{s}'")))?;
            if host.is_empty() {
                return Err(WireError::Endpoint(format!("missing host in '{s}'")));
            }
            return Ok(Self::tcp(host, port));
        }
        Err(WireError::Endpoint(format!("unsupported endpoint '{s}'")))
    }

    /// ZeroMQ endpoint address. `None` for in-process.
    pub fn zmq_address(&self) -> Option<String> {
        match self {
            Self::InProcess => None,
            Self::Ipc(name) => Some(format!("ipc:///tmp/spillway/{name}.sock")),
            Self::Tcp { host, port } => Some(format!("tcp://{host}:{port}")),
        }
    }

    fn ipc_path(&self) -> Option<String> {
        self.zmq_address()
            .filter(|_| matches!(self, Self::Ipc(_)))
            .and_then(|a| a.strip_prefix("ipc://").map(str::to_string))
    }

    /// For IPC endpoints, ensure the socket directory exists.
    pub fn ensure_ipc_dir(&self) -> std::io::Result<()> {
        if let Some(path) = self.ipc_path() {
            if let Some(parent) = Path::new(&path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Remove an IPC socket file left over from a previous run.
    pub fn remove_stale_socket(&self) -> std::io::Result<()> {
        if let Some(path) = self.ipc_path() {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path, "removed stale IPC socket"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.zmq_address() {
            Some(addr) => write!(f, "{addr}"),
            None => write!(f, "in-process"),
        }
    }
}

impl std::str::FromStr for Endpoint {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_in_process() {
        assert_eq!(Endpoint::parse("in-process").unwrap(), Endpoint::InProcess);
        assert_eq!(Endpoint::InProcess.to_string(), "in-process");
        assert!(Endpoint::InProcess.zmq_address().is_none());
    }

    #[test]
    fn parse_tcp() {
        let ep = Endpoint::parse("tcp://127.0.0.1:16600").unwrap();
        assert_eq!(ep, Endpoint::tcp("127.0.0.1", 16600));
        assert_eq!(ep.to_string(), "tcp://127.0.0.1:16600");
    }

    #[test]
    fn parse_ipc() {
        let ep = Endpoint::parse("ipc://functions").unwrap();
        assert_eq!(ep.zmq_address().unwrap(), "ipc:///tmp/spillway/functions.sock");
    }

    #[test]
    fn reject_bad_endpoints() {
        assert!(Endpoint::parse("http://lambda").is_err());
        assert!(Endpoint::parse("tcp://nohost").is_err());
        assert!(Endpoint::parse("tcp://:80").is_err());
        assert!(Endpoint::parse("tcp://h:notaport").is_err());
        assert!(Endpoint::parse("ipc://a/b").is_err());
    }

    #[test]
    fn stale_socket_cleanup_is_noop_for_tcp() {
        let ep = Endpoint::tcp("127.0.0.1", 1);
        ep.ensure_ipc_dir().unwrap();
        ep.remove_stale_socket().unwrap();
    }
}
