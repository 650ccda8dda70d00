pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "careercoach",
    about = "Career coach operator CLI",
    long_about = "Operate the career coach service: startup preflight, migrations, config inspection, readiness checks and background job lookups.",
    after_help = "Examples:\n  careercoach doctor --json\n  careercoach config\n  careercoach job-status 7f3c2a4e-..."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run startup preflight checks and return structured status output")]
    Start,
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, LLM provider settings, DB connectivity and migration state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Show the state, attempts and result of a background job")]
    JobStatus {
        #[arg(help = "Task id returned when the job was submitted")]
        task_id: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start => commands::start::run(),
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::JobStatus { task_id } => commands::job_status::run(&task_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn job_status_takes_the_task_id_positionally() {
        let cli = Cli::try_parse_from(["careercoach", "job-status", "task-42"]).expect("parse");
        assert!(matches!(cli.command, Command::JobStatus { task_id } if task_id == "task-42"));
    }

    #[test]
    fn doctor_accepts_json_flag() {
        let cli = Cli::try_parse_from(["careercoach", "doctor", "--json"]).expect("parse");
        assert!(matches!(cli.command, Command::Doctor { json: true }));
    }
}
