// CLI entry point for PartyQueue.
//
// Hosts a shared queue, scans the LAN for hosts, or joins one. `host` and
// `join` read line commands from stdin and print session notifications and
// snapshots to stdout as JSON. Logs go to stderr (`RUST_LOG`, default info).
//
// Usage:
//   partyqueue [OPTIONS] host
//   partyqueue [OPTIONS] scan
//   partyqueue [OPTIONS] join <ADDR>
//
//   --config <PATH>     Config file (default: per-user partyqueue/config.toml)
//   --bind <IP>         Local address to bind
//   --port <PORT>       Host port, TCP and UDP (default: 47474)
//   --target <ADDR>     Scan target, repeatable (default: 255.255.255.255:47474)
//   --name <NAME>       Queue name (host)
//   --owner <NAME>      Owner name (host)
//   --user <ID>         User id (host user id, or client requester id)
//   --playlist <ID>     Shared playlist id (host)
//   --fair-play         Round-robin requesters (host)
//   --framed            Length-prefixed frames instead of raw reads
//
// Commands on stdin:
//   add <URI>   queue a track
//   next        advance playback (host only)
//   status      print a snapshot
//   quit        leave

use std::io::{self, BufRead};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use partyqueue_net::config::FileConfig;
use partyqueue_net::{
    EndpointId, LanDiscovery, NoPlayback, NullCatalog, Result, join, start_host,
};
use partyqueue_protocol::Framing;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

enum Command {
    Host,
    Scan,
    Join(SocketAddr),
}

struct Cli {
    command: Command,
    config: FileConfig,
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = parse_args();
    let result = match cli.command {
        Command::Host => run_host(cli.config),
        Command::Scan => run_scan(cli.config),
        Command::Join(addr) => run_join(cli.config, addr),
    };
    if let Err(e) = result {
        eprintln!("partyqueue: {e}");
        std::process::exit(1);
    }
}

fn run_host(config: FileConfig) -> Result<()> {
    let discovery = LanDiscovery::new(config.discovery);
    let (notify_tx, notify_rx) = mpsc::channel();
    let handle = start_host(config.host, &discovery, Box::new(NoPlayback), Some(notify_tx))?;
    println!("Hosting on {}", handle.local_addr());
    thread::spawn(move || notify_rx.iter().for_each(|n| print_json(&n)));

    for line in io::stdin().lock().lines() {
        let line = line?;
        match parse_line(&line) {
            Some(("add", uri)) if !uri.is_empty() => handle.add_track(uri)?,
            Some(("next", _)) => handle.playback_advanced()?,
            Some(("status", _)) => print_json_pretty(&handle.snapshot()?),
            Some(("quit", _)) => break,
            Some(_) => eprintln!("commands: add <uri>, next, status, quit"),
            None => {}
        }
    }
    handle.stop();
    Ok(())
}

fn run_scan(config: FileConfig) -> Result<()> {
    let discovery = LanDiscovery::new(config.discovery);
    for host in discovery.scan()? {
        print_json(&host);
    }
    Ok(())
}

fn run_join(config: FileConfig, addr: SocketAddr) -> Result<()> {
    let discovery = LanDiscovery::new(config.discovery);
    let (notify_tx, notify_rx) = mpsc::channel();
    let handle = join(
        config.client,
        &discovery,
        EndpointId(addr),
        NullCatalog,
        Some(notify_tx),
    )?;
    println!("Joined {addr}");
    thread::spawn(move || notify_rx.iter().for_each(|n| print_json(&n)));

    for line in io::stdin().lock().lines() {
        let line = line?;
        match parse_line(&line) {
            Some(("add", uri)) if !uri.is_empty() => {
                if let Err(e) = handle.add_track(uri) {
                    eprintln!("add failed: {e}");
                }
            }
            Some(("next", _)) => eprintln!("only the host controls playback"),
            Some(("status", _)) => print_json_pretty(&handle.snapshot()?),
            Some(("quit", _)) => break,
            Some(_) => eprintln!("commands: add <uri>, status, quit"),
            None => {}
        }
    }
    handle.leave();
    Ok(())
}

/// Split a command line into its verb and the (trimmed) rest.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    })
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to encode output: {e}"),
    }
}

fn print_json_pretty<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to encode output: {e}"),
    }
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching,
/// no clap dependency. Flags override values from the config file.
fn parse_args() -> Cli {
    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut i = 1;
    while i < args.len() {
        if args[i] == "--config" {
            config_path = Some(PathBuf::from(required(&args, i + 1, "--config")));
        }
        i += 1;
    }
    let loaded = match &config_path {
        Some(path) => FileConfig::load(path),
        None => FileConfig::load_default(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });

    let mut command = None;
    let mut targets: Vec<SocketAddr> = Vec::new();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => i += 1,
            "--bind" => {
                i += 1;
                config.discovery.bind_ip = parsed(&args, i, "--bind requires an IP address");
            }
            "--port" => {
                i += 1;
                config.discovery.port = parsed(&args, i, "--port requires a valid port number");
            }
            "--target" => {
                i += 1;
                targets.push(parsed(&args, i, "--target requires an address like 10.0.0.255:47474"));
            }
            "--name" => {
                i += 1;
                config.host.queue_name = required(&args, i, "--name").to_owned();
            }
            "--owner" => {
                i += 1;
                config.host.owner_name = required(&args, i, "--owner").to_owned();
            }
            "--user" => {
                i += 1;
                let user = required(&args, i, "--user").to_owned();
                config.host.host_user_id = user.clone();
                config.client.display_name = user.clone();
                config.client.user_id = user;
            }
            "--playlist" => {
                i += 1;
                config.host.playlist_id = required(&args, i, "--playlist").to_owned();
            }
            "--fair-play" => config.host.fair_play = true,
            "--framed" => {
                config.host.framing = Framing::LengthPrefixed;
                config.client.framing = Framing::LengthPrefixed;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "host" if command.is_none() => command = Some(Command::Host),
            "scan" if command.is_none() => command = Some(Command::Scan),
            "join" if command.is_none() => {
                i += 1;
                command = Some(Command::Join(parsed(
                    &args,
                    i,
                    "join requires a host address like 192.168.1.20:47474",
                )));
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    if !targets.is_empty() {
        config.discovery.scan_targets = targets;
    }
    let Some(command) = command else {
        print_usage();
        std::process::exit(1);
    };
    Cli { command, config }
}

fn required<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    args.get(i).map(String::as_str).unwrap_or_else(|| {
        eprintln!("{flag} requires a value");
        std::process::exit(1);
    })
}

fn parsed<T: std::str::FromStr>(args: &[String], i: usize, message: &str) -> T {
    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        eprintln!("{message}");
        std::process::exit(1);
    })
}

fn print_usage() {
    println!("Usage: partyqueue [OPTIONS] <host | scan | join <ADDR>>");
    println!();
    println!("Options:");
    println!("  --config <PATH>     Config file (default: per-user partyqueue/config.toml)");
    println!("  --bind <IP>         Local address to bind");
    println!("  --port <PORT>       Host port, TCP and UDP (default: 47474)");
    println!("  --target <ADDR>     Scan target, repeatable (default: 255.255.255.255:47474)");
    println!("  --name <NAME>       Queue name");
    println!("  --owner <NAME>      Owner name");
    println!("  --user <ID>         User id");
    println!("  --playlist <ID>     Shared playlist id");
    println!("  --fair-play         Round-robin requesters");
    println!("  --framed            Length-prefixed frames instead of raw reads");
    println!("  --help, -h          Show this help");
    println!();
    println!("Commands on stdin: add <uri>, next (host), status, quit");
}
