fn main() {
    if let Err(e) = vlbd_cmd::cmd::run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
