use std::sync::{Arc, Mutex};

use crate::actions::LoadTask;
use crate::error::SyncError;
use crate::handler::ErrorHandler;

/// A call received by a [`RecordingErrorHandler`].
#[derive(Debug, Clone)]
pub enum HandlerEvent {
    Reported { error: SyncError },
    Notified { task: LoadTask, error: SyncError },
}

/// [`ErrorHandler`] recording every call, in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingErrorHandler {
    events: Arc<Mutex<Vec<HandlerEvent>>>,
}

impl RecordingErrorHandler {
    pub fn events(&self) -> Vec<HandlerEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Tasks passed to [`ErrorHandler::notify_error`], in order.
    pub fn notified_tasks(&self) -> Vec<LoadTask> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HandlerEvent::Notified { task, .. } => Some(task),
                HandlerEvent::Reported { .. } => None,
            })
            .collect()
    }

    /// Errors passed to [`ErrorHandler::report`], in order.
    pub fn reported_errors(&self) -> Vec<SyncError> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HandlerEvent::Reported { error } => Some(error),
                HandlerEvent::Notified { .. } => None,
            })
            .collect()
    }
}

impl ErrorHandler for RecordingErrorHandler {
    fn report(&self, error: &SyncError) {
        self.events.lock().unwrap().push(HandlerEvent::Reported {
            error: error.clone(),
        });
    }

    fn notify_error(&self, task: &LoadTask, error: &SyncError) {
        self.events.lock().unwrap().push(HandlerEvent::Notified {
            task: task.clone(),
            error: error.clone(),
        });
    }
}
