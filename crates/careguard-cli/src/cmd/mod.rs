pub mod audit;
pub mod init;
pub mod policy;
pub mod serve;
pub mod status;
pub mod submit;
pub mod tickets;
