/// Behaviour for reporting back to the user.
///
/// The console implementation writes help to stdout and errors to stderr;
/// tests substitute an in-memory implementation.
pub trait UserInterface {
    /// Print an informational message (help, version).
    fn print(&self, message: String);

    /// Print an error message.
    fn print_error(&self, message: String);
}

/// The standard console [`UserInterface`].
#[derive(Default)]
pub struct ConsoleInterface {}

impl UserInterface for ConsoleInterface {
    fn print(&self, message: String) {
        println!("{message}");
    }

    fn print_error(&self, message: String) {
        eprintln!("{message}");
    }
}

#[cfg(test)]
pub(crate) mod util {
    use super::UserInterface;
    use std::sync::mpsc;

    pub(crate) fn channel_interface() -> (SenderInterface, ReceiverInterface) {
        let (message_tx, message_rx) = mpsc::channel();
        let (error_tx, error_rx) = mpsc::channel();
        (
            SenderInterface {
                message_tx,
                error_tx,
            },
            ReceiverInterface {
                message_rx,
                error_rx,
            },
        )
    }

    pub(crate) struct SenderInterface {
        message_tx: mpsc::Sender<String>,
        error_tx: mpsc::Sender<String>,
    }

    impl UserInterface for SenderInterface {
        fn print(&self, message: String) {
            self.message_tx.send(message).unwrap();
        }

        fn print_error(&self, message: String) {
            self.error_tx.send(message).unwrap();
        }
    }

    pub(crate) struct ReceiverInterface {
        message_rx: mpsc::Receiver<String>,
        error_rx: mpsc::Receiver<String>,
    }

    impl ReceiverInterface {
        pub(crate) fn consume(self) -> (Option<String>, Option<String>) {
            (drain(self.message_rx), drain(self.error_rx))
        }

        pub(crate) fn consume_message(self) -> String {
            let (message, error) = self.consume();
            assert_eq!(error, None);
            message.unwrap()
        }

        pub(crate) fn consume_error(self) -> String {
            let (message, error) = self.consume();
            assert_eq!(message, None);
            error.unwrap()
        }
    }

    fn drain(receiver: mpsc::Receiver<String>) -> Option<String> {
        let values: Vec<String> = receiver.try_iter().collect();

        if values.is_empty() {
            None
        } else {
            Some(values.join("\n"))
        }
    }
}
