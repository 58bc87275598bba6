//! Encode and decode values of a schema type from the command line.
//!
//! Usage:
//!   rawcodec SCHEMA.dsl TYPE encode-json JSON     print the RAW encoding as hex
//!   rawcodec SCHEMA.dsl TYPE decode HEX [--json]  print the decoded value
//!
//! Options:
//!   --msb        default bit order MSB first (LSB otherwise)
//!   --pretty     indent JSON output
//!
//! Logging follows RUST_LOG (e.g. RUST_LOG=rawstruct=debug).

use anyhow::{bail, Context};
use rawstruct::{dump, parse, BitOrder, Codec, CodecConfig, ResolvedSchema};
use tracing_subscriber::EnvFilter;

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    match args.iter().position(|a| a == flag) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

fn parse_hex(s: &str) -> anyhow::Result<Vec<u8>> {
    let s: String = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if s.len() % 2 != 0 {
        bail!("hex input has an odd number of digits");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).with_context(|| format!("invalid hex at offset {}", i)))
        .collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let as_json = take_flag(&mut args, "--json");
    let msb = take_flag(&mut args, "--msb");
    let pretty = take_flag(&mut args, "--pretty");
    if args.len() != 4 {
        eprintln!("Usage: rawcodec SCHEMA.dsl TYPE (encode-json JSON | decode HEX [--json]) [--msb] [--pretty]");
        std::process::exit(2);
    }

    let src = std::fs::read_to_string(&args[0]).with_context(|| format!("reading {}", args[0]))?;
    let schema = parse(&src).map_err(anyhow::Error::msg)?;
    let resolved = ResolvedSchema::resolve(schema)?;
    let config = CodecConfig {
        bit_order: if msb { BitOrder::Msb } else { BitOrder::Lsb },
        json_pretty: pretty,
        ..CodecConfig::default()
    };
    let codec = Codec::new(resolved, config);
    let type_name = &args[1];

    match args[2].as_str() {
        "encode-json" => {
            let value = codec.decode_json(type_name, &args[3])?;
            let bytes = codec.encode_raw(type_name, &value)?;
            let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            println!("{}", hex);
        }
        "decode" => {
            let bytes = parse_hex(&args[3])?;
            let value = codec.decode_raw(type_name, &bytes)?;
            if as_json {
                println!("{}", codec.encode_json(type_name, &value)?);
            } else {
                println!("{}", dump::format_typed(codec.schema(), type_name, &value));
            }
        }
        other => bail!("unknown command '{}'", other),
    }
    Ok(())
}
