use clap::Parser;
use tradeflow::cli::{Cli, run};
use tradeflow::logging::{init_json_logging, init_logging};

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    if cli.json_logs {
        init_json_logging();
    } else {
        init_logging();
    }
    run(cli)
}
