pub mod exec;
pub mod login;
pub mod provision;
pub mod rules;
pub mod shell;
pub mod status;
