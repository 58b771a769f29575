use clap::Parser;
use tracing::warn;

#[tokio::main]
async fn main() {
    let cli = kamishibaictl::Cli::parse();
    kamishibaictl::init_tracing(cli.log_level.as_deref());

    tokio::select! {
        result = kamishibaictl::run(cli) => {
            if let Err(err) = result {
                eprintln!("{}", err.report());
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, temporary files may remain");
            std::process::exit(130);
        }
    }
}
