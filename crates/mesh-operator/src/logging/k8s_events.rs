//! Publishing of reconcile failures as Kubernetes events.

use std::{error::Error, fmt::Write};

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::{
    controller,
    events::{Event, EventType, Recorder, Reporter},
};
use tracing::Instrument;

use super::controller::ReconcilerError;

/// Upper bound of an event note in bytes, as enforced by the API server.
const MAX_NOTE_LEN: usize = 1024;

/// Builds a `Warning` event describing `error` and its whole source chain.
fn error_to_event<E: ReconcilerError>(error: &E) -> Event {
    let mut note = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        // Writing to a String cannot fail.
        let _ = write!(note, ": {cause}");
        source = cause.source();
    }
    truncate_with_ellipsis(&mut note, MAX_NOTE_LEN);

    Event {
        type_: EventType::Warning,
        reason: error.category().to_owned(),
        note: Some(note),
        action: "Reconcile".to_owned(),
        secondary: error.secondary_object().map(ObjectReference::from),
    }
}

/// Publishes a failed reconcile of `controller` as an event on the reconciled
/// object, in the background.
///
/// Queue and watch errors are not tied to an object and are skipped.
#[tracing::instrument(skip(client, controller_error))]
pub fn publish_controller_error_as_k8s_event<ReconcileErr, QueueErr>(
    client: &kube::Client,
    controller: &str,
    controller_error: &controller::Error<ReconcileErr, QueueErr>,
) where
    ReconcileErr: ReconcilerError,
    QueueErr: Error,
{
    let controller::Error::ReconcilerFailed(error, obj) = controller_error else {
        return;
    };

    let recorder = Recorder::new(client.clone(), Reporter {
        controller: controller.to_owned(),
        instance: None,
    });
    let reference = ObjectReference::from(obj.clone());
    let event = error_to_event(error);

    tokio::spawn(
        async move {
            if let Err(error) = recorder.publish(&event, &reference).await {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to publish reconcile error as Kubernetes event"
                );
            }
        }
        .in_current_span(),
    );
}

/// Shortens `msg` to at most `max_len` bytes, replacing the cut off tail with
/// an ellipsis. Never splits a character.
fn truncate_with_ellipsis(msg: &mut String, max_len: usize) {
    const ELLIPSIS: char = '…';

    if msg.len() <= max_len {
        return;
    }

    let Some(budget) = max_len.checked_sub(ELLIPSIS.len_utf8()) else {
        msg.clear();
        return;
    };
    let cut = msg
        .char_indices()
        .map(|(index, _)| index)
        .take_while(|index| *index <= budget)
        .last()
        .unwrap_or(0);
    msg.truncate(cut);
    msg.push(ELLIPSIS);
}
