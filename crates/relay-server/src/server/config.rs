use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use relay::{DispatchConfig, THREADS_PER_CPU};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Runtime configuration for the `relay-server` binary.
///
/// All values are parsed from CLI arguments or environment variables, with
/// defaults that match the dispatcher's own.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "relay-server",
    version,
    about = "Serves per-host static content through a bounded worker pool"
)]
pub struct CliArgs {
    /// TCP port to listen on.
    ///
    /// Environment variable: `PORT`
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Local address to bind.
    ///
    /// Environment variable: `BIND_ADDR`
    #[arg(long, env = "BIND_ADDR", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Directory holding one subdirectory per served host name.
    ///
    /// Environment variable: `CONTENT_ROOT`
    #[arg(long, env = "CONTENT_ROOT", default_value = "./hosts")]
    pub root: PathBuf,

    /// Worker threads per logical CPU. Ignored when `--pool-size` is given.
    ///
    /// Environment variable: `THREADS_PER_CPU`
    #[arg(long, env = "THREADS_PER_CPU", default_value_t = THREADS_PER_CPU)]
    pub threads_per_cpu: usize,

    /// Exact number of worker threads.
    ///
    /// Environment variable: `POOL_SIZE`
    #[arg(long, env = "POOL_SIZE")]
    pub pool_size: Option<usize>,

    /// How long an accepted connection may wait for a free worker before it
    /// is answered with `504 Gateway Timeout`.
    ///
    /// Environment variable: `HANDOFF_TIMEOUT_MS`
    #[arg(long, env = "HANDOFF_TIMEOUT_MS", default_value_t = 1000)]
    pub handoff_timeout_ms: u64,

    /// Length of each shutdown phase. Shutdown waits at most two of these per
    /// component.
    ///
    /// Environment variable: `GRACE_PERIOD_MS`
    #[arg(long, env = "GRACE_PERIOD_MS", default_value_t = 1000)]
    pub grace_period_ms: u64,

    /// How long a client may take to send its request head.
    ///
    /// Environment variable: `READ_TIMEOUT_MS`
    #[arg(long, env = "READ_TIMEOUT_MS", default_value_t = 5000)]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub content_root: PathBuf,
    pub read_timeout: Duration,
    pub dispatch: DispatchConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.threads_per_cpu == 0 {
            bail!("THREADS_PER_CPU must be greater than 0");
        }

        let pool_size = match args.pool_size {
            Some(0) => bail!("POOL_SIZE must be greater than 0"),
            Some(size) => size,
            None => DispatchConfig::pool_size_per_cpu(args.threads_per_cpu),
        };

        if args.handoff_timeout_ms == 0 {
            bail!("HANDOFF_TIMEOUT_MS must be greater than 0");
        }

        if args.grace_period_ms == 0 {
            bail!("GRACE_PERIOD_MS must be greater than 0");
        }

        if args.read_timeout_ms == 0 {
            bail!("READ_TIMEOUT_MS must be greater than 0");
        }

        let dispatch = DispatchConfig::default()
            .with_pool_size(pool_size)
            .with_handoff_timeout(Duration::from_millis(args.handoff_timeout_ms))
            .with_grace_period(Duration::from_millis(args.grace_period_ms));

        Ok(Self {
            bind_addr: SocketAddr::new(args.bind, args.port),
            content_root: args.root,
            read_timeout: Duration::from_millis(args.read_timeout_ms),
            dispatch,
        })
    }
}
