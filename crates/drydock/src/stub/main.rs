//! Stand-in daemon used by the harness's own tests and for dry runs.
//!
//! Listens on `127.0.0.1:<port>` and speaks the readiness protocol of the
//! chosen role: a JSON health line for control and agent daemons, a bare
//! accept for remote-exec. Flags simulate slow, hung and crashing daemons.

use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use drydock::protocol::{DaemonStatus, HealthRequest, HealthResponse};
use drydock::{ProbeKind, Role};
use signal_hook::consts::signal::{SIGINT, SIGTERM};

const IDLE_POLL: Duration = Duration::from_millis(10);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(1);

/// Command-line flags of the stub daemon.
#[derive(Parser, Debug)]
#[command(name = "drydockd-stub")]
struct Args {
    /// Role whose readiness protocol to speak.
    #[arg(long)]
    role: Role,
    /// Logical daemon name, echoed in output.
    #[arg(long)]
    name: String,
    /// Port to listen on.
    #[arg(long)]
    port: u16,
    /// Directory holding the rendered configuration.
    #[arg(long)]
    config_dir: PathBuf,
    /// Delay before reporting ready.
    #[arg(long, default_value_t = 0)]
    ready_after_ms: u64,
    /// Never become ready.
    #[arg(long)]
    never_ready: bool,
    /// Keep running after SIGTERM.
    #[arg(long)]
    ignore_sigterm: bool,
    /// Exit immediately with this status instead of serving.
    #[arg(long)]
    exit_code: Option<u8>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(code) => code,
        Err(error) => {
            let _ = writeln!(io::stderr(), "stub {}: {error}", args.name);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> io::Result<ExitCode> {
    let config_file = args.config_dir.join(args.role.base_file());
    let config = fs::read_to_string(&config_file).map_err(|error| {
        io::Error::new(
            error.kind(),
            format!("cannot read config {}: {error}", config_file.display()),
        )
    })?;
    say(args, &format!("loaded {} config lines", config.lines().count()));
    if let Some(code) = args.exit_code {
        let _ = writeln!(io::stderr(), "stub {}: exiting early with {code}", args.name);
        return Ok(ExitCode::from(code));
    }
    let stop = Arc::new(AtomicBool::new(false));
    if args.ignore_sigterm {
        signal_hook::flag::register(SIGTERM, Arc::new(AtomicBool::new(false)))?;
    } else {
        signal_hook::flag::register(SIGTERM, Arc::clone(&stop))?;
    }
    signal_hook::flag::register(SIGINT, Arc::clone(&stop))?;
    if args.role == Role::RemoteExec {
        write_host_key(&args.config_dir, &args.name)?;
    }
    if args.never_ready {
        say(args, "configured never to become ready");
        idle(&stop);
        return Ok(ExitCode::SUCCESS);
    }
    let ready_at = Instant::now() + Duration::from_millis(args.ready_after_ms);
    if args.role.probe_kind() == ProbeKind::TcpConnect {
        while Instant::now() < ready_at && !stop.load(Ordering::SeqCst) {
            thread::sleep(IDLE_POLL);
        }
    }
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, args.port))?;
    listener.set_nonblocking(true)?;
    say(args, &format!("listening on port {}", args.port));
    serve(args, &listener, &stop, ready_at)?;
    say(args, "stopping");
    Ok(ExitCode::SUCCESS)
}

fn serve(
    args: &Args,
    listener: &TcpListener,
    stop: &AtomicBool,
    ready_at: Instant,
) -> io::Result<()> {
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if args.role.probe_kind() == ProbeKind::RpcHealth {
                    let status = if Instant::now() >= ready_at {
                        DaemonStatus::Ready
                    } else {
                        DaemonStatus::Starting
                    };
                    if let Err(error) = answer(stream, status) {
                        say(args, &format!("health exchange failed: {error}"));
                    }
                }
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => thread::sleep(IDLE_POLL),
            Err(error) => return Err(error),
        }
    }
    Ok(())
}

fn answer(stream: TcpStream, status: DaemonStatus) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let request: HealthRequest = serde_json::from_str(line.trim()).map_err(io::Error::from)?;
    if request != HealthRequest::health() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported request {:?}", request.request),
        ));
    }
    let response = HealthResponse {
        status,
        pid: std::process::id(),
    };
    let mut payload = serde_json::to_vec(&response).map_err(io::Error::from)?;
    payload.push(b'\n');
    let mut writer = stream;
    writer.write_all(&payload)?;
    writer.flush()
}

fn write_host_key(config_dir: &Path, name: &str) -> io::Result<()> {
    fs::write(
        config_dir.join("ssh_host_ed25519_key.pub"),
        format!("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIDrydockStubKey {name}\n"),
    )
}

fn idle(stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        thread::sleep(IDLE_POLL);
    }
}

fn say(args: &Args, message: &str) {
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "stub {} ({}): {message}", args.name, args.role);
    let _ = stdout.flush();
}
