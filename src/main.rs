fn main() {
    std::process::exit(portcap_lib::run())
}
