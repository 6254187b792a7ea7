//! Scoped dispatch of transient UI actions (toasts, refresh requests, list
//! changes). Components receive a [`UiDispatcher`] or any [`Notifier`] instead
//! of reaching for a process-wide bus.

use shared::protocol::{Notice, NoticeKind, RefreshTarget, UiCommand};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NoticeKind, message: &str);
}

/// Cloneable sender handed to components that need to reach the presenter.
#[derive(Clone)]
pub struct UiDispatcher {
    tx: mpsc::UnboundedSender<UiCommand>,
}

impl UiDispatcher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn dispatch(&self, command: UiCommand) {
        if self.tx.send(command).is_err() {
            debug!("ui dispatcher: presenter dropped; command discarded");
        }
    }

    pub fn refresh(&self, target: RefreshTarget) {
        self.dispatch(UiCommand::Refresh(target));
    }

    pub fn item_removed(&self, table: &str, id: impl ToString) {
        self.dispatch(UiCommand::ItemRemoved {
            table: table.to_string(),
            id: id.to_string(),
        });
    }

    pub fn item_created(&self, table: &str, id: impl ToString) {
        self.dispatch(UiCommand::ItemCreated {
            table: table.to_string(),
            id: id.to_string(),
        });
    }
}

impl Notifier for UiDispatcher {
    fn notify(&self, kind: NoticeKind, message: &str) {
        self.dispatch(UiCommand::Toast(Notice::new(kind, message)));
    }
}

/// Notifier for headless callers: every notice goes to the log.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        match kind {
            NoticeKind::Success | NoticeKind::Info => info!(?kind, "{message}"),
            NoticeKind::Warning => warn!("{message}"),
            NoticeKind::Error => error!("{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_delivers_commands_in_order() {
        let (dispatcher, mut commands) = UiDispatcher::channel();
        dispatcher.notify(NoticeKind::Error, "permission denied");
        dispatcher.item_removed("users", 7);
        dispatcher.refresh(RefreshTarget::Users);

        assert_eq!(
            commands.try_recv().expect("toast"),
            UiCommand::Toast(Notice::new(NoticeKind::Error, "permission denied"))
        );
        assert_eq!(
            commands.try_recv().expect("removal"),
            UiCommand::ItemRemoved {
                table: "users".to_string(),
                id: "7".to_string(),
            }
        );
        assert_eq!(
            commands.try_recv().expect("refresh"),
            UiCommand::Refresh(RefreshTarget::Users)
        );
    }

    #[test]
    fn dispatch_after_presenter_dropped_is_harmless() {
        let (dispatcher, commands) = UiDispatcher::channel();
        drop(commands);
        dispatcher.notify(NoticeKind::Success, "saved");
    }
}
