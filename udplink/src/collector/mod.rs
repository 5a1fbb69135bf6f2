pub mod parser;
pub mod udp;
