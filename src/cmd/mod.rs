//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `run`      | `Run`            |
//! | `taxonomy` | `Taxonomy`       |
//! | `config`   | `Config`         |

pub mod config;
pub mod run;
pub mod taxonomy;

pub use config::cmd_config;
pub use run::cmd_run;
pub use taxonomy::cmd_taxonomy;
