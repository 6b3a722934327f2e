use std::process::ExitCode;

use irrd::cli::options::Options;

#[tokio::main]
async fn main() -> ExitCode {
    let options = Options::from_args();
    let format = options.general.format;
    let client = match options.general.client() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    options.command.run(&client).await.report(format)
}
