use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match heritage_rag_lib::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
