pub mod backoff;
pub mod connection;
pub mod directory;
pub mod error;
pub mod handler;
pub mod irc_parser;
pub mod mailbox;
pub mod scheduler;
pub mod session;
pub mod speech;
pub mod types;

pub use backoff::Backoff;
pub use connection::TcpConnector;
pub use directory::DirectoryClient;
pub use handler::{AllowList, ChatHandler, PlainBot};
pub use mailbox::NotificationMailbox;
pub use scheduler::{SchedulerSettings, TaskScheduler};
pub use session::Session;
pub use speech::{ConfiguredSpeaker, SpeechBot};
pub use types::Credentials;
