use rotee::cli::Cli;

fn main() {
    // Initialize CLI and execute
    if let Err(e) = Cli::run() {
        eprintln!("✗ Error: {}", e);
        std::process::exit(1);
    }
}
