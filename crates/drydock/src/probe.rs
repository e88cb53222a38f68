//! Readiness probes deciding when a spawned daemon accepts requests.
//!
//! Probes only observe; they never change handle state. Polling cadence is a
//! [`ProbePolicy`] supplied by the harness context rather than a constant.

use std::fmt;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use crate::protocol::{DaemonStatus, HealthRequest, HealthResponse};

/// Cadence and per-attempt budget for readiness polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Pause between attempts.
    pub interval: Duration,
    /// Connect/read timeout for one attempt.
    pub attempt_timeout: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            attempt_timeout: Duration::from_millis(500),
        }
    }
}

/// Result of one probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The daemon accepts requests.
    Ready,
    /// Not yet; the string explains what was observed.
    NotReady(String),
}

/// A check confirming a process accepts requests, not merely runs.
pub trait ReadinessProbe: Send + Sync + fmt::Debug {
    /// Performs one attempt.
    fn check(&self) -> ProbeOutcome;

    /// Short description used in logs and errors.
    fn describe(&self) -> String;
}

/// Succeeds once a TCP connection to the address is accepted.
#[derive(Debug, Clone)]
pub struct TcpConnectProbe {
    address: SocketAddr,
    timeout: Duration,
}

impl TcpConnectProbe {
    /// Probes `127.0.0.1:port`.
    #[must_use]
    pub fn loopback(port: u16, timeout: Duration) -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::LOCALHOST, port)), timeout)
    }

    /// Probes an arbitrary address.
    #[must_use]
    pub const fn new(address: SocketAddr, timeout: Duration) -> Self {
        Self { address, timeout }
    }
}

impl ReadinessProbe for TcpConnectProbe {
    fn check(&self) -> ProbeOutcome {
        match TcpStream::connect_timeout(&self.address, self.timeout) {
            Ok(_) => ProbeOutcome::Ready,
            Err(error) => ProbeOutcome::NotReady(format!("connect failed: {error}")),
        }
    }

    fn describe(&self) -> String {
        format!("tcp connect {}", self.address)
    }
}

/// Sends a health request and succeeds on a `ready` answer.
#[derive(Debug, Clone)]
pub struct RpcHealthProbe {
    address: SocketAddr,
    timeout: Duration,
}

impl RpcHealthProbe {
    /// Probes `127.0.0.1:port`.
    #[must_use]
    pub fn loopback(port: u16, timeout: Duration) -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::LOCALHOST, port)), timeout)
    }

    /// Probes an arbitrary address.
    #[must_use]
    pub const fn new(address: SocketAddr, timeout: Duration) -> Self {
        Self { address, timeout }
    }

    fn exchange(&self) -> io::Result<HealthResponse> {
        let mut stream = TcpStream::connect_timeout(&self.address, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        let mut request = serde_json::to_vec(&HealthRequest::health())?;
        request.push(b'\n');
        stream.write_all(&request)?;
        stream.flush()?;
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line)?;
        if line.trim().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "empty health response",
            ));
        }
        serde_json::from_str(line.trim()).map_err(io::Error::from)
    }
}

impl ReadinessProbe for RpcHealthProbe {
    fn check(&self) -> ProbeOutcome {
        match self.exchange() {
            Ok(response) if response.status == DaemonStatus::Ready => ProbeOutcome::Ready,
            Ok(response) => ProbeOutcome::NotReady(format!(
                "daemon pid {} reported {:?}",
                response.pid, response.status
            )),
            Err(error) => ProbeOutcome::NotReady(format!("health request failed: {error}")),
        }
    }

    fn describe(&self) -> String {
        format!("rpc health {}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn answer_once(listener: TcpListener, reply: &'static str) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut line = String::new();
            reader.read_line(&mut line).expect("read request");
            let request: HealthRequest = serde_json::from_str(line.trim()).expect("parse request");
            assert_eq!(request, HealthRequest::health());
            let mut stream = stream;
            stream.write_all(reply.as_bytes()).expect("write reply");
        })
    }

    #[test]
    fn tcp_probe_tracks_listener() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let probe = TcpConnectProbe::loopback(port, TIMEOUT);
        assert_eq!(probe.check(), ProbeOutcome::Ready);
        drop(listener);
        assert!(matches!(probe.check(), ProbeOutcome::NotReady(_)));
    }

    #[test]
    fn rpc_probe_accepts_ready_status() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = answer_once(listener, "{\"status\":\"ready\",\"pid\":7}\n");
        assert_eq!(RpcHealthProbe::loopback(port, TIMEOUT).check(), ProbeOutcome::Ready);
        server.join().expect("server");
    }

    #[test]
    fn rpc_probe_rejects_starting_status() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = answer_once(listener, "{\"status\":\"starting\",\"pid\":7}\n");
        let outcome = RpcHealthProbe::loopback(port, TIMEOUT).check();
        assert_eq!(
            outcome,
            ProbeOutcome::NotReady("daemon pid 7 reported Starting".to_owned())
        );
        server.join().expect("server");
    }

    #[test]
    fn rpc_probe_treats_bare_listener_as_not_ready() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            drop(stream);
        });
        let outcome = RpcHealthProbe::loopback(port, TIMEOUT).check();
        assert!(matches!(outcome, ProbeOutcome::NotReady(_)), "{outcome:?}");
        server.join().expect("server");
    }
}
