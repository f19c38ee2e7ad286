pub mod config;
pub mod core_state; // Shared analysis core
pub mod models;
pub mod pipeline;
pub mod registry; // Lazily loaded model slots

pub use core_state::{AssistCore, CoreStatus};
pub use pipeline::chat::ChatSession;
pub use pipeline::retrieval::CorpusSource;
pub use pipeline::{AssistError, PipelineError, PipelineStage};

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `config::default_log_filter()`. Calling this more
/// than once is harmless.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} core v{}", config::APP_NAME, config::APP_VERSION);
    }
}
