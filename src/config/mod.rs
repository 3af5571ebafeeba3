//! Configuration and settings management.
//!
//! Settings come from environment variables, optionally seeded from
//! `.env.local` and `.env` files. Nothing is written back.

mod settings;

pub use settings::{
    load_dotenv, AiSettings, ConfigError, GoogleSettings, LlmBackend, RunSettings, Settings,
};
