//! CLI actions: key argument handling and one function per subcommand.

use crate::opal::{self, RangeExpectations, StatusFlags};
use crate::open_drive;
use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::io::{self, Read};
use zeroize::Zeroizing;

/// Environment variable holding the user / volume key.
pub const KEY_ENV: &str = "SED_RANGE_KEY";
/// Environment variable holding the Admin1 / SID key.
pub const ADMIN_KEY_ENV: &str = "SED_RANGE_ADMIN_KEY";
/// Environment variable holding the drive PSID.
pub const PSID_ENV: &str = "SED_RANGE_PSID";

type Secret = Zeroizing<Vec<u8>>;

fn trim_line_end(mut buf: Secret) -> Secret {
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    buf
}

/// Read key material from stdin (`-`), a file, a literal argument or
/// `env`, in that order.
pub fn read_key_arg(key_arg: Option<String>, env: &str) -> Result<Secret> {
    if let Some(arg) = key_arg {
        let arg = Zeroizing::new(arg);
        if arg.as_str() == "-" {
            // Read *all* of stdin, keys may be binary
            let mut buf = Zeroizing::new(Vec::new());
            io::stdin().read_to_end(&mut buf).context("reading key from stdin")?;
            return Ok(trim_line_end(buf));
        } else if fs::metadata(arg.as_str()).is_ok() {
            let buf = fs::read(arg.as_str()).with_context(|| format!("reading key file {}", arg.as_str()))?;
            return Ok(trim_line_end(Zeroizing::new(buf)));
        } else {
            return Ok(Zeroizing::new(arg.as_bytes().to_vec()));
        }
    }

    if let Ok(k) = std::env::var(env) {
        return Ok(trim_line_end(Zeroizing::new(k.into_bytes())));
    }

    Err(anyhow!("No key provided (argument, key file, stdin or {env} env var)"))
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

fn print_status(device: &str, f: StatusFlags) {
    println!("{device}:");
    println!("  OPAL supported:    {}", yes_no(f.supported()));
    println!("  Locking enabled:   {}", yes_no(f.locking_enabled()));
    println!("  Locked:            {}", yes_no(f.locked()));
    println!("  MBR enabled:       {}", yes_no(f.mbr_enabled()));
    println!("  MBR done:          {}", yes_no(f.mbr_done()));
    println!("  Single user mode:  {}", yes_no(f.sum_supported()));
    println!("  Raw flags:         0x{:08x}", f.0);
}

pub fn do_status(device: String) -> Result<()> {
    let drive = open_drive(&device);
    let flags = opal::status(&drive)?;
    print_status(&device, flags);
    if !flags.supported() {
        bail!("{device} does not support OPAL locking");
    }
    Ok(())
}

pub fn do_geometry(device: String) -> Result<()> {
    let drive = open_drive(&device);
    let g = opal::geometry(&drive)?;
    println!("{device}:");
    println!("  Logical block size:     {} bytes", g.logical_block_size);
    println!("  Alignment required:     {}", yes_no(g.fixed_address_alignment_required));
    println!("  Alignment granularity:  {} blocks", g.alignment_granularity_blocks);
    println!("  Lowest aligned LBA:     {}", g.lowest_aligned_lba_blocks);
    Ok(())
}

pub fn do_setup(
    device: String,
    segment: u32,
    start: u64,
    length: u64,
    key_arg: Option<String>,
    admin_arg: Option<String>,
) -> Result<()> {
    let key = read_key_arg(key_arg, KEY_ENV)?;
    let admin = read_key_arg(admin_arg, ADMIN_KEY_ENV)?;
    let drive = open_drive(&device);
    opal::setup_range(&drive, &key, start, length, segment, &admin)
        .with_context(|| format!("setting up OPAL range {segment} on {device}"))?;
    println!("{device}: range {segment} ({length} sectors at {start}) is set up and locked");
    Ok(())
}

pub fn do_lock(device: String, segment: u32) -> Result<()> {
    let drive = open_drive(&device);
    opal::lock(&drive, segment).with_context(|| format!("locking OPAL range {segment} on {device}"))?;
    Ok(())
}

pub fn do_unlock(device: String, segment: u32, key_arg: Option<String>) -> Result<()> {
    let key = read_key_arg(key_arg, KEY_ENV)?;
    let drive = open_drive(&device);
    opal::unlock(&drive, segment, &key)
        .with_context(|| format!("unlocking OPAL range {segment} on {device}"))?;
    Ok(())
}

pub fn do_check(
    device: String,
    segment: u32,
    start: Option<u64>,
    length: Option<u64>,
    key_arg: Option<String>,
) -> Result<()> {
    let key = read_key_arg(key_arg, KEY_ENV)?;
    let drive = open_drive(&device);
    let want = RangeExpectations { offset_sectors: start, length_sectors: length, ..Default::default() };
    let attrs = opal::verify(&drive, &key, segment, &want)
        .with_context(|| format!("checking OPAL range {segment} on {device}"))?;
    println!(
        "{device}: range {segment} at {} for {} sectors, {}",
        attrs.offset_sectors,
        attrs.length_sectors,
        if attrs.read_locked { "LOCKED" } else { "UNLOCKED" }
    );
    Ok(())
}

pub fn do_factory_reset(device: String, psid_arg: Option<String>) -> Result<()> {
    let psid = read_key_arg(psid_arg, PSID_ENV)?;
    let drive = open_drive(&device);
    opal::factory_reset(&drive, &psid).with_context(|| format!("factory reset of {device}"))?;
    println!("{device}: reverted to factory state");
    Ok(())
}

pub fn do_reset_segment(device: String, segment: u32, admin_arg: Option<String>) -> Result<()> {
    let admin = read_key_arg(admin_arg, ADMIN_KEY_ENV)?;
    let drive = open_drive(&device);
    opal::reset_segment(&drive, segment, &admin)
        .with_context(|| format!("resetting OPAL range {segment} on {device}"))?;
    println!("{device}: range {segment} erased and disabled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn literal_key_is_taken_verbatim() {
        let k = read_key_arg(Some("not/a/file/secret".into()), "SED_RANGE_TEST_UNSET").unwrap();
        assert_eq!(k.as_slice(), b"not/a/file/secret");
    }

    #[test]
    fn key_file_is_trimmed() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "from-file\r\n").unwrap();
        let k = read_key_arg(Some(tmp.path().display().to_string()), "SED_RANGE_TEST_UNSET").unwrap();
        assert_eq!(k.as_slice(), b"from-file");
    }

    #[test]
    fn missing_key_names_the_variable() {
        let err = read_key_arg(None, "SED_RANGE_TEST_UNSET").unwrap_err();
        assert!(err.to_string().contains("SED_RANGE_TEST_UNSET"));
    }
}
