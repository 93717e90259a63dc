use std::env;

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub write_log_to_file: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let write_log_to_file = env::var("WRITE_LOG_TO_FILE")
            .unwrap_or_else(|_| "0".to_string())
            .to_lowercase();
        let write_log_to_file = matches!(write_log_to_file.as_str(), "1" | "true" | "yes");

        Self {
            database_url,
            write_log_to_file,
        }
    }
}
