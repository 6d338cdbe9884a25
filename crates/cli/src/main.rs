mod args;
mod client;

use clap::Parser;
use zoneward_api::Outcome;

use args::{Cli, Command};
use client::Client;

#[macro_export]
macro_rules! println {
    ($($t:tt)*) => {{
        #[allow(clippy::disallowed_macros)]
        let x = anstream::println!($($t)*);
        x
    }};
}

#[macro_export]
macro_rules! eprintln {
    ($($t:tt)*) => {{
        #[allow(clippy::disallowed_macros)]
        let x = anstream::eprintln!($($t)*);
        x
    }};
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(cli.base_url, cli.kid);

    match run(client, cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(client: Client, command: Command) -> reqwest::Result<std::process::ExitCode> {
    match command {
        Command::Dispatch { command, zones } => {
            let result = client.dispatch(command, zones).await?;
            match result {
                None => {
                    println!("rejected: unknown command or access denied");
                    return Ok(std::process::ExitCode::FAILURE);
                }
                Some(grouped) => {
                    let mut saw_failure = false;
                    for (outcome, zones) in grouped {
                        for zone in zones {
                            println!("{zone}: {outcome}");
                        }
                        saw_failure |= !matches!(outcome, Outcome::Ok);
                    }
                    if saw_failure {
                        return Ok(std::process::ExitCode::FAILURE);
                    }
                }
            }
        }
        Command::Metrics => {
            let body = client.metrics().await?;
            print!("{body}");
        }
    }

    Ok(std::process::ExitCode::SUCCESS)
}
