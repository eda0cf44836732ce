use std::fs::File;
use std::io::Read;

use satsink_frame::{FrameConfig, FrameError, FrameReader};

use crate::cmd::{parse_size, TailArgs};
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: TailArgs, format: OutputFormat) -> CliResult<i32> {
    let config = FrameConfig {
        max_payload_size: parse_size(&args.max_payload)?,
        ..FrameConfig::default()
    };

    let input: Box<dyn Read> = match &args.path {
        Some(path) => Box::new(
            File::open(path).map_err(|err| io_error(&format!("open {}", path.display()), err))?,
        ),
        None => Box::new(std::io::stdin().lock()),
    };

    tail(input, config, args.count, |index, payload| {
        print_message(index, payload, format)
    })?;
    Ok(SUCCESS)
}

/// Decode frames until EOF or `count` messages. Returns the number printed.
fn tail<R: Read>(
    input: R,
    config: FrameConfig,
    count: Option<u64>,
    mut emit: impl FnMut(u64, &[u8]),
) -> CliResult<u64> {
    let mut reader = FrameReader::with_config(input, config);
    let mut printed = 0u64;

    while count.is_none_or(|limit| printed < limit) {
        match reader.read_frame() {
            Ok(frame) => {
                emit(printed, frame.payload.as_ref());
                printed += 1;
            }
            Err(FrameError::ConnectionClosed) => break,
            Err(err) => return Err(frame_error("user stream", err)),
        }
    }
    Ok(printed)
}
