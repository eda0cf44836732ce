use satsink_frame::{DELIMITER, HEADER_SIZE, PACKET_HEADER_LEN};
use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct VersionInfo {
    name: &'static str,
    version: &'static str,
    target: &'static str,
    profile: &'static str,
    protocol_versions: [u8; 2],
    packet_header_len: usize,
    frame_header_len: usize,
    delimiter: &'static str,
}

impl VersionInfo {
    fn collect() -> Self {
        Self {
            name: "satsink",
            version: env!("CARGO_PKG_VERSION"),
            target: option_env!("SATSINK_BUILD_TARGET").unwrap_or("unknown"),
            profile: option_env!("SATSINK_BUILD_PROFILE").unwrap_or("unknown"),
            protocol_versions: [1, 2],
            packet_header_len: PACKET_HEADER_LEN,
            frame_header_len: HEADER_SIZE,
            delimiter: std::str::from_utf8(DELIMITER).unwrap_or_default(),
        }
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    let info = VersionInfo::collect();

    if matches!(format, OutputFormat::Json) {
        println!(
            "{}",
            serde_json::to_string(&info).unwrap_or_else(|_| "{}".to_string())
        );
        return Ok(SUCCESS);
    }

    if !args.extended {
        println!("{} {}", info.name, info.version);
        return Ok(SUCCESS);
    }

    println!("name: {}", info.name);
    println!("version: {}", info.version);
    println!("target: {}", info.target);
    println!("profile: {}", info.profile);
    println!("target_os: {}", std::env::consts::OS);
    println!("protocol_versions: 1 (raw copy), 2 (demux)");
    println!("packet_header_len: {}", info.packet_header_len);
    println!("frame_header_len: {}", info.frame_header_len);
    println!("delimiter: {}", info.delimiter);

    Ok(SUCCESS)
}
