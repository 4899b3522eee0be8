pub mod server;

use crate::cli::telemetry;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
}

impl Action {
    /// Execute the action, flushing traces once it returns.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        let result = match self {
            Self::Server(args) => server::execute(args).await,
        };
        telemetry::shutdown_tracer();
        result
    }
}
