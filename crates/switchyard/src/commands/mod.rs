pub mod conversations;
pub mod init;
pub mod models;
pub mod serve;
