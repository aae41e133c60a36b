use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, instrument};

use crate::interaction::{
    dispatcher::{DispatchOutcome, Dispatcher},
    normalizer::RawEvent,
};

/// Dispatch an inbound event on its own task, so a slow rule never holds up other events.
///
/// Errors are logged, not returned.
#[instrument(skip_all)]
pub fn handle_chat_event(event: RawEvent, dispatcher: Dispatcher) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            // Process the event.
            let result = dispatcher.handle_inbound_event(event).await;

            // Log the outcome.
            match result {
                Ok(DispatchOutcome::Replied { rule }) => info!("Replied with rule `{}`.", rule),
                Ok(_) => {}
                Err(err) => error!("Error while handling: {}", err),
            }
        }
        .in_current_span(),
    )
}
