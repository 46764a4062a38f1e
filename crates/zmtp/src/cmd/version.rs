use zmtp_frame::{INPUT_BUFFER_SIZE, MAX_CONNECTIONS, MAX_MESSAGES};
use zmtp_peer::{MAX_CHANNELS, MAX_ENDPOINTS, VERSION_MAJOR, VERSION_MINOR};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("zmtp {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: zmtp");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("protocol: ZMTP {VERSION_MAJOR}.{VERSION_MINOR} (NULL mechanism)");
    println!(
        "pools: endpoints={MAX_ENDPOINTS}, connections={MAX_CONNECTIONS}, messages={MAX_MESSAGES}, channels={MAX_CHANNELS}"
    );
    println!("input_buffer: {INPUT_BUFFER_SIZE} bytes");
    println!("target: {}", option_env!("ZMTP_BUILD_TARGET").unwrap_or("unknown"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "features: peer={}, cli=true",
        cfg!(feature = "peer")
    );

    Ok(SUCCESS)
}
