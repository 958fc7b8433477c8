use clap::Parser;

fn main() {
    let cli = recipostctl::Cli::parse();
    recipostctl::init_tracing(cli.verbose);
    if let Err(err) = recipostctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
