use std::process;

mod headless;
mod logging;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let parsed = match headless::parse_headless_args(&args) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("{err}");
            process::exit(2);
        }
    };
    logging::setup_tracing(parsed.log_level);

    tracing::info!("geoflow starting");
    if let Err(err) = headless::run_headless(&parsed) {
        eprintln!("headless error: {err}");
        process::exit(1);
    }
}
