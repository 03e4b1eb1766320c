//! Command-line front end: file IO, payload decoding and exit codes.
//! Everything interesting happens in the library.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;

use certtag::Binary;

#[derive(Parser, Debug)]
#[command(
    name = "certtag",
    version,
    about = "Rewrites updater tags in Authenticode-signed PE and MSI binaries"
)]
struct Args {
    /// Signed PE or MSI file to operate on
    input: PathBuf,

    /// Print the appended tag, if any
    #[arg(long)]
    dump_appended_tag: bool,

    /// Strip the appended tag
    #[arg(long)]
    remove_appended_tag: bool,

    /// Append the contents of this file as the appended tag
    #[arg(long, value_name = "FILE")]
    load_appended_tag: Option<PathBuf>,

    /// Set the superfluous-cert tag payload; a leading 0x means hex
    #[arg(long, value_name = "PAYLOAD")]
    set_superfluous_cert_tag: Option<String>,

    /// Zero-pad the payload up to this many bytes
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    padded_length: usize,

    /// Write the embedded PKCS#7 blob to this file
    #[arg(long, value_name = "FILE")]
    save_pkcs7: Option<PathBuf>,

    /// Output path; defaults to rewriting the input in place
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Locate the superfluous-cert tag in the result and print it
    #[arg(long)]
    print_tag_details: bool,

    /// Increase log verbosity (-v, -vv, ...)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Usage problems exit with 255, failed operations with 1.
enum Failure {
    Usage(anyhow::Error),
    Operation(anyhow::Error),
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // clap renders help/version on stdout and usage errors on
            // stderr; only the latter are failures.
            let is_usage_error = err.use_stderr();
            let _ = err.print();
            return if is_usage_error {
                ExitCode::from(255)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    let _ = stderrlog::new()
        .verbosity(args.verbose as usize)
        .init();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Usage(err)) => {
            eprintln!("certtag: {err:#}");
            ExitCode::from(255)
        }
        Err(Failure::Operation(err)) => {
            eprintln!("certtag: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: &Args) -> Result<(), Failure> {
    let payload = args
        .set_superfluous_cert_tag
        .as_deref()
        .map(|arg| decode_payload(arg, args.padded_length))
        .transpose()
        .map_err(Failure::Usage)?;

    let operation = |err: anyhow::Error| Failure::Operation(err);
    let mut data = fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))
        .map_err(operation)?;
    let mut dirty = false;

    {
        let binary = Binary::parse(&data)
            .context("parsing input")
            .map_err(operation)?;
        if args.dump_appended_tag {
            match binary.appended_tag().map_err(|e| operation(e.into()))? {
                Some(tag) => println!("Appended tag: {}", String::from_utf8_lossy(tag)),
                None => println!("No appended tag"),
            }
        }
        if let Some(path) = &args.save_pkcs7 {
            let pkcs7 = binary.asn1_data().map_err(|e| operation(e.into()))?;
            fs::write(path, pkcs7)
                .with_context(|| format!("writing {}", path.display()))
                .map_err(operation)?;
        }
    }

    if args.remove_appended_tag {
        data = rewrite(&data, |binary| binary.remove_appended_tag()).map_err(operation)?;
        dirty = true;
    }
    if let Some(path) = &args.load_appended_tag {
        let body = fs::read(path)
            .with_context(|| format!("reading {}", path.display()))
            .map_err(operation)?;
        data = rewrite(&data, |binary| binary.set_appended_tag(&body)).map_err(operation)?;
        dirty = true;
    }
    if let Some(payload) = &payload {
        data = rewrite(&data, |binary| binary.set_superfluous_cert_tag(payload))
            .map_err(operation)?;
        dirty = true;
    }

    if args.print_tag_details {
        let binary = Binary::parse(&data)
            .context("parsing result")
            .map_err(operation)?;
        let start = binary.certificate_offset().map_err(|e| operation(e.into()))?;
        let (offset, length) = certtag::find_tag(&data, start).map_err(|e| operation(e.into()))?;
        println!("Tag payload: offset {offset}, length {length}");
    }

    if dirty {
        let out = args.out.as_ref().unwrap_or(&args.input);
        fs::write(out, &data)
            .with_context(|| format!("writing {}", out.display()))
            .map_err(operation)?;
    }
    Ok(())
}

fn rewrite(data: &[u8], op: impl FnOnce(&Binary) -> certtag::Result<Vec<u8>>) -> Result<Vec<u8>> {
    let binary = Binary::parse(data)?;
    Ok(op(&binary)?)
}

fn decode_payload(arg: &str, padded_length: usize) -> Result<Vec<u8>> {
    let mut payload = match arg.strip_prefix("0x") {
        Some(hex) => from_hex(hex)?,
        None => arg.as_bytes().to_vec(),
    };
    if padded_length > payload.len() {
        payload.resize(padded_length, 0);
    }
    Ok(payload)
}

fn from_hex(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        bail!("hex payload has an odd number of digits");
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair)?;
            u8::from_str_radix(pair, 16).with_context(|| format!("bad hex byte {pair:?}"))
        })
        .collect()
}
