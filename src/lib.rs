pub mod auth;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod drafts;
pub mod engine;
pub mod front_desk;
pub mod limits;
pub mod mail;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod repository;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
