use tracing::Subscriber;
use tracing_subscriber::{EnvFilter, fmt::MakeWriter};

pub const DEFAULT_FILTER: &str = "info";

/// Builds the subscriber that receives every diagnostic of a run.
///
/// `writer` is stderr in the binary. Nothing here touches stdout, which is
/// reserved for the result record. `RUST_LOG` overrides the default filter.
pub fn subscriber<W>(writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(filter)
        .finish()
}
