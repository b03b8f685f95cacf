fn main() {
    initd_rs::entrypoints::run_supervisor();
}
