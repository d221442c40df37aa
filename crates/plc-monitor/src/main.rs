mod infra {
    pub mod audit;
}
mod runtime;

fn main() {
    if let Err(err) = runtime::run_from_args() {
        eprintln!("plc-monitor: {err}");
        std::process::exit(1);
    }
}
