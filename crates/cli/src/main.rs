use std::process::ExitCode;

fn main() -> ExitCode {
    careercoach_cli::run()
}
