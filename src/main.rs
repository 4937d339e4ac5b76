fn main() {
    if let Err(e) = mcp_pulse_lib::run() {
        eprintln!("mcp-pulse: {e}");
        std::process::exit(1);
    }
}
