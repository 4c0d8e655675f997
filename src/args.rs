use clap::{ArgAction, Parser, Subcommand};

/// Provision, lock and reset OPAL locking ranges
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Debug logging; RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print help
    Docs,
    /// Show OPAL support and locking flags of a device
    Status {
        /// Device path, e.g. /dev/nvme0n1
        device: String,
    },
    /// Show block size and alignment constraints
    Geometry {
        /// Device path
        device: String,
    },
    /// Create a locking range and leave it locked
    Setup {
        /// Device path
        device: String,
        /// Locking range number (1-8)
        #[arg(short, long)]
        segment: u32,
        /// First sector of the range (512-byte sectors)
        #[arg(long)]
        start: u64,
        /// Range length in 512-byte sectors
        #[arg(long)]
        length: u64,
        /// Volume key: literal, key file or '-' for stdin; if omitted, use SED_RANGE_KEY
        #[arg(long)]
        key: Option<String>,
        /// Admin key: literal, key file or '-'; if omitted, use SED_RANGE_ADMIN_KEY
        #[arg(long)]
        admin_key: Option<String>,
    },
    /// Lock a range with the key saved on its last unlock
    Lock {
        /// Device path
        device: String,
        /// Locking range number (1-8)
        #[arg(short, long)]
        segment: u32,
    },
    /// Unlock a range
    Unlock {
        /// Device path
        device: String,
        /// Locking range number (1-8)
        #[arg(short, long)]
        segment: u32,
        /// Key: literal, key file or '-' for stdin; if omitted, use SED_RANGE_KEY
        #[arg(long)]
        key: Option<String>,
    },
    /// Read back a range and compare it with the expected layout
    Check {
        /// Device path
        device: String,
        /// Locking range number (1-8)
        #[arg(short, long)]
        segment: u32,
        /// Expected first sector
        #[arg(long)]
        start: Option<u64>,
        /// Expected length in sectors
        #[arg(long)]
        length: Option<u64>,
        /// Key: literal, key file or '-' for stdin; if omitted, use SED_RANGE_KEY
        #[arg(long)]
        key: Option<String>,
    },
    /// Revert the whole drive to factory state (destroys all data)
    FactoryReset {
        /// Device path
        device: String,
        /// PSID from the drive label, key file or '-'; if omitted, use SED_RANGE_PSID
        #[arg(long)]
        psid: Option<String>,
    },
    /// Erase one range and disable it
    ResetSegment {
        /// Device path
        device: String,
        /// Locking range number (1-8)
        #[arg(short, long)]
        segment: u32,
        /// Admin key: literal, key file or '-'; if omitted, use SED_RANGE_ADMIN_KEY
        #[arg(long)]
        admin_key: Option<String>,
    },
}
