use std::collections::HashMap;
use std::time::Duration;

use confidence_events::{ConfidenceValue, EventsConfig};

#[tokio::main]
async fn main() -> confidence_events::Result<()> {
    // Configure env_logger to see SDK logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("confidence=debug"))
        .init();

    let client_secret = std::env::var("CONFIDENCE_CLIENT_SECRET")
        .expect("CONFIDENCE_CLIENT_SECRET env variable should contain client secret");

    let engine = EventsConfig::from_client_secret(client_secret)
        .flush_interval(Duration::from_secs(5))
        .start_engine()?;

    engine.put_context(HashMap::from([(
        "visitor_id".to_owned(),
        ConfidenceValue::from("demo-visitor"),
    )]))?;

    engine.emit(
        "navigate",
        HashMap::from([
            ("current".to_owned(), ConfidenceValue::from("home-page")),
            ("target".to_owned(), ConfidenceValue::from("profile-page")),
        ]),
    )?;

    // Flushes whatever is still queued.
    engine.shutdown().await?;

    Ok(())
}
