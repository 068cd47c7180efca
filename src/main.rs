use clap::Parser;

use ripple_drive::cli::{self, Cli};

fn main() {
    let cli = Cli::parse();

    // Single-threaded runtime: workers are separate processes.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("ripple: cannot start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(cli::run(cli, std::io::stdout())) {
        eprintln!("ripple: {}", e);
        std::process::exit(1);
    }
}
