fn main() -> std::process::ExitCode {
    medscribe_lib::run()
}
