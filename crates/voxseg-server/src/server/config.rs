use anyhow::{Context, bail};
use clap::{ArgAction, Parser};
use core::time::Duration;
use voxseg::{BlockSize, DEFAULT_MAX_LOCATIONS, LookupConfig, PoolConfig, default_num_workers};

/// Runtime configuration for the `voxseg-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file in the working directory is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "voxseg-server",
    version,
    about = "An HTTP service returning segment IDs at batches of voxel locations"
)]
pub struct CliArgs {
    /// Location of the precomputed segmentation volume.
    ///
    /// A local directory, optionally written as `file:///path` or
    /// `precomputed://file:///path`.
    ///
    /// Environment variable: `VOLUME_PATH`
    #[arg(long, env = "VOLUME_PATH")]
    pub volume_path: String,

    /// Resolution level (index into the volume's scales) to read from.
    ///
    /// Environment variable: `VOLUME_MIP`
    #[arg(long, env = "VOLUME_MIP", default_value_t = 0)]
    pub mip: usize,

    /// Treat missing chunk files as background (`0`) instead of failing.
    ///
    /// Environment variable: `FILL_MISSING`
    #[arg(long, env = "FILL_MISSING", default_value_t = true, action = ArgAction::Set)]
    pub fill_missing: bool,

    /// Size of the blocks queries are grouped into, e.g. `128,128,32`.
    ///
    /// Each occupied block costs one store read, so this should match (or be
    /// a multiple of) the volume's storage chunk size.
    ///
    /// Environment variable: `BLOCK_SIZE`
    #[arg(long, env = "BLOCK_SIZE", default_value_t = BlockSize::DEFAULT)]
    pub block_size: BlockSize,

    /// Number of concurrent block fetches.
    ///
    /// Defaults to the number of logical CPUs minus 5, and never less than 1.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS")]
    pub num_workers: Option<usize>,

    /// Capacity of each worker's request queue.
    ///
    /// Environment variable: `WORKER_QUEUE_DEPTH`
    #[arg(long, env = "WORKER_QUEUE_DEPTH", default_value_t = 1)]
    pub worker_queue_depth: usize,

    /// Maximum number of locations accepted per request.
    ///
    /// Environment variable: `MAX_LOCATIONS`
    #[arg(long, env = "MAX_LOCATIONS", default_value_t = DEFAULT_MAX_LOCATIONS)]
    pub max_locations: usize,

    /// Maximum size of a request body in bytes.
    ///
    /// Environment variable: `MAX_BODY_BYTES`
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 64 * 1024 * 1024)]
    pub max_body_bytes: usize,

    /// Seconds to wait for in-flight lookups during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix
    /// socket).
    ///
    /// Example: "0.0.0.0:5000" or "/tmp/voxseg.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:5000"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be
    /// a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub volume_path: String,
    pub mip: usize,
    pub fill_missing: bool,
    pub block_size: BlockSize,
    pub num_workers: usize,
    pub worker_queue_depth: usize,
    pub max_locations: usize,
    pub max_body_bytes: usize,
    pub shutdown_timeout: Duration,
    pub server_addr: String,
    pub uds: bool,
}

impl ServerConfig {
    pub fn lookup_config(&self) -> LookupConfig {
        LookupConfig {
            pool: PoolConfig {
                num_workers: self.num_workers,
                queue_depth: self.worker_queue_depth,
                block_size: self.block_size,
                shutdown_timeout: self.shutdown_timeout,
            },
            max_locations: self.max_locations,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let num_workers = args.num_workers.unwrap_or_else(default_num_workers);

        if num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }
        if args.worker_queue_depth == 0 {
            bail!("WORKER_QUEUE_DEPTH must be greater than 0");
        }
        if args.max_locations == 0 {
            bail!("MAX_LOCATIONS must be greater than 0");
        }
        if args.volume_path.trim().is_empty() {
            bail!("VOLUME_PATH must not be empty");
        }

        // Every coordinate is 3 JSON numbers; make sure a full batch fits.
        let min_body = args
            .max_locations
            .checked_mul(6)
            .context("Overflow in MAX_LOCATIONS body size computation")?;
        if args.max_body_bytes < min_body {
            bail!(
                "MAX_BODY_BYTES ({}) is too small for MAX_LOCATIONS ({}); need at least {}",
                args.max_body_bytes,
                args.max_locations,
                min_body
            );
        }

        Ok(Self {
            volume_path: args.volume_path,
            mip: args.mip,
            fill_missing: args.fill_missing,
            block_size: args.block_size,
            num_workers,
            worker_queue_depth: args.worker_queue_depth,
            max_locations: args.max_locations,
            max_body_bytes: args.max_body_bytes,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            server_addr: args.server_addr,
            uds: args.uds,
        })
    }
}
