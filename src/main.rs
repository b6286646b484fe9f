use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    helixagent::cli::run().await
}
