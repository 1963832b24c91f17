use chatlog_rs::{cli, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());

    telemetry::init(cli.verbose);

    if let Err(e) = cli::run(cli) {
        tracing::error!(effect = e.effect().as_str(), "error: {e}");
        std::process::exit(1);
    }
}
