pub mod ensure;
pub mod read;
pub mod watch;
pub mod write;
