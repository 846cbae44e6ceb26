//! Tech stack detection from a service's launch command.
//!
//! Drives port suggestions: each detected stack has a conventional default
//! port and a range to scan when the default is taken.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Development tool or framework a service command launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stack {
    Vite,
    CreateReactApp,
    Vue,
    WebpackDevServer,
    FastApi,
    Flask,
    Django,
    Express,
    NestJs,
    /// A Python entrypoint with no recognisable framework.
    Python,
    Custom,
}

impl Stack {
    /// The port the tool binds by default when unconfigured.
    pub fn default_port(self) -> u16 {
        match self {
            Stack::Vite => 5173,
            Stack::CreateReactApp | Stack::Express | Stack::NestJs => 3000,
            Stack::Vue | Stack::WebpackDevServer => 8080,
            Stack::FastApi | Stack::Django | Stack::Python => 8000,
            Stack::Flask => 5000,
            Stack::Custom => 9000,
        }
    }

    /// Range to scan for a free port when the default is unavailable.
    pub fn suggestion_range(self) -> (u16, u16) {
        match self {
            Stack::Vite => (5170, 5199),
            Stack::CreateReactApp | Stack::Vue | Stack::WebpackDevServer => (3000, 3999),
            Stack::FastApi | Stack::Flask | Stack::Django | Stack::Python => (8000, 8099),
            Stack::Express | Stack::NestJs => (4000, 4099),
            Stack::Custom => (9000, 9999),
        }
    }
}

impl std::fmt::Display for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stack::Vite => "vite",
            Stack::CreateReactApp => "create-react-app",
            Stack::Vue => "vue",
            Stack::WebpackDevServer => "webpack-dev-server",
            Stack::FastApi => "fastapi",
            Stack::Flask => "flask",
            Stack::Django => "django",
            Stack::Express => "express",
            Stack::NestJs => "nestjs",
            Stack::Python => "python",
            Stack::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Guess the stack from the launch command, with a `requirements.txt` sniff
/// in `cwd` to disambiguate bare Python entrypoints.
pub fn detect_stack(command: &str, cwd: &Path) -> Stack {
    let cmd = command.to_lowercase();

    // Frontend dev servers
    if cmd.contains("npm run dev") || cmd.contains("vite") {
        return Stack::Vite;
    }
    if cmd.contains("npm start") || cmd.contains("react-scripts") {
        return Stack::CreateReactApp;
    }
    if cmd.contains("vue-cli-service") {
        return Stack::Vue;
    }
    if cmd.contains("webpack-dev-server") {
        return Stack::WebpackDevServer;
    }

    // Python backends
    if cmd.contains("uvicorn") || cmd.contains("fastapi") {
        return Stack::FastApi;
    }
    if cmd.contains("flask") {
        return Stack::Flask;
    }
    if cmd.contains("django") || cmd.contains("manage.py runserver") {
        return Stack::Django;
    }
    if cmd.contains("python")
        && ["main.py", "app.py", "run.py"].iter().any(|e| cmd.contains(e))
    {
        if let Ok(reqs) = std::fs::read_to_string(cwd.join("requirements.txt")) {
            let reqs = reqs.to_lowercase();
            if reqs.contains("fastapi") {
                return Stack::FastApi;
            }
            if reqs.contains("flask") {
                return Stack::Flask;
            }
        }
        return Stack::Python;
    }

    // Node backends
    if cmd.contains("express") {
        return Stack::Express;
    }
    if cmd.contains("nest") {
        return Stack::NestJs;
    }

    Stack::Custom
}
