//! kestrel CLI entry point.

use kestrel_lib::cli::{self, Cli};

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse_args();

    if let Err(err) = cli::execute(cli).await {
        tracing::error!(category = err.category(), "{}", err);
        eprintln!("kestrel: {err}");
        std::process::exit(err.exit_code());
    }
}
