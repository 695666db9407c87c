//! CLI command implementations.
//!
//! | Module    | Commands handled   |
//! |-----------|--------------------|
//! | `serve`   | `Serve`            |
//! | `inspect` | `Extract`, `Sign`  |
//! | `config`  | `Config`           |

pub mod config;
pub mod inspect;
pub mod serve;

pub use config::cmd_config;
pub use inspect::{cmd_extract, cmd_sign};
pub use serve::cmd_serve;
