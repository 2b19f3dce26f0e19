//! Queue publishing and the notification intake service.

mod intake;
#[allow(clippy::module_inception)]
mod publisher;

pub use intake::{NotificationIntake, SubmitError};
pub use publisher::{NotificationPublisher, PublishError};
