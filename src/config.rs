// Application configuration, loaded from environment variables and CLI flags.

use std::path::PathBuf;

/// Application configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Directory containing pre-built frontend files to serve.
    /// When set, the backend serves static files from this path.
    pub static_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `STATIC_DIR` - Path to frontend dist directory for static serving
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_parts(&args, std::env::var("PORT").ok(), std::env::var("STATIC_DIR").ok())
    }

    fn from_parts(args: &[String], port_env: Option<String>, static_env: Option<String>) -> Self {
        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| port_env.and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let static_dir = static_env.map(PathBuf::from);

        Config { port, static_dir }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}
