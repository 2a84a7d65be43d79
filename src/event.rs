//! Re-emission of driver-level events through a single tagged callback.

use std::sync::Arc;

use mongodb::{
    event::{
        cmap::{CmapEvent, ConnectionCheckoutFailedEvent},
        command::{
            CommandEvent, CommandFailedEvent, CommandStartedEvent, CommandSucceededEvent,
        },
        EventHandler,
    },
    options::ClientOptions,
};

/// A driver-level event observed by a [`DbContext`](crate::DbContext),
/// re-emitted with its driver-native payload. No fields are added.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum DbEvent {
    /// A database command was initiated.
    CommandStarted(CommandStartedEvent),

    /// A database command completed successfully.
    CommandSucceeded(CommandSucceededEvent),

    /// A database command failed.
    CommandFailed(CommandFailedEvent),

    /// Checking out a connection from the pool failed.
    ConnectionFailed(ConnectionCheckoutFailedEvent),
}

/// The callback receiving every [`DbEvent`] observed by a context.
pub type EventCallback = Arc<dyn Fn(DbEvent) + Send + Sync>;

/// Installs the forwarding handlers into the driver client options.
pub(crate) fn install(options: &mut ClientOptions, callback: EventCallback) {
    let command_callback = Arc::clone(&callback);
    options.command_event_handler = Some(EventHandler::callback(move |event: CommandEvent| {
        match event {
            CommandEvent::Started(started) => command_callback(DbEvent::CommandStarted(started)),
            CommandEvent::Succeeded(succeeded) => {
                command_callback(DbEvent::CommandSucceeded(succeeded))
            }
            CommandEvent::Failed(failed) => command_callback(DbEvent::CommandFailed(failed)),
            _ => {}
        }
    }));

    options.cmap_event_handler = Some(EventHandler::callback(move |event: CmapEvent| {
        if let CmapEvent::ConnectionCheckoutFailed(failed) = event {
            callback(DbEvent::ConnectionFailed(failed));
        }
    }));
}
